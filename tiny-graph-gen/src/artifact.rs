//! Writing generated sources to disk.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::config::EmitTarget;
use crate::error::Result;

/// Write `contents` to `path`, replacing any previous file.
///
/// The bytes go to a sibling temp file first and are renamed into place, so
/// a failed run never leaves a truncated artifact behind.
pub fn write_artifact(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let tmp = temp_sibling(path);
    if let Err(e) = write_file(&tmp, contents) {
        let _ = fs::remove_file(&tmp);
        return Err(e);
    }
    if let Err(e) = fs::rename(&tmp, path) {
        let _ = fs::remove_file(&tmp);
        return Err(e.into());
    }
    log::info!("wrote {} ({} bytes)", path.display(), contents.len());
    Ok(())
}

/// Write into `dir` under the target's default file name.
pub fn write_to_dir(dir: &Path, target: EmitTarget, contents: &str) -> Result<PathBuf> {
    let path = dir.join(target.file_name());
    write_artifact(&path, contents)?;
    Ok(path)
}

fn write_file(path: &Path, contents: &str) -> Result<()> {
    let mut out = BufWriter::new(File::create(path)?);
    out.write_all(contents.as_bytes())?;
    out.flush()?;
    Ok(())
}

fn temp_sibling(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(format!(".tmp{}", std::process::id()));
    path.with_file_name(name)
}
