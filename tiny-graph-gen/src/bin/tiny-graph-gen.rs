//! `tiny-graph-gen`: compile a quantization-aware graph into a tiny graph artifact.
//!
//! Usage:
//!   tiny-graph-gen model.json kws -o out/
//!   tiny-graph-gen model.json --emit rust --date 20190909

use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;

use tiny_graph_gen::artifact::write_to_dir;
use tiny_graph_gen::config::{parse_date, parse_nn_id, EmitTarget, GenConfig, OverflowPolicy};
use tiny_graph_gen::ir::{DataLayout, FilterLayout};
use tiny_graph_gen::parse::load_graph;

#[derive(Parser, Debug)]
#[command(version, about = "Compile a quantization-aware graph into a static INT8 tiny graph")]
struct Args {
    /// Graph description (JSON interchange format)
    model_path: PathBuf,

    /// Name stored in the graph root
    graph_name: Option<String>,

    /// Output directory
    #[arg(short, long, default_value = ".")]
    out: PathBuf,

    /// Artifact language: c or rust
    #[arg(long, default_value = "c")]
    emit: EmitTarget,

    /// Creation date stamped into the graph (YYYYMMDD)
    #[arg(long, value_parser = parse_date)]
    date: Option<u32>,

    /// Graph id, decimal or 0x-prefixed hex
    #[arg(long, value_parser = parse_nn_id)]
    nn_id: Option<u32>,

    /// Force the data layout instead of detecting it (nhwc or nchw)
    #[arg(long)]
    layout: Option<DataLayout>,

    /// Filter axis order: follow-data (OHWI/OIHW) or hwio
    #[arg(long)]
    filter_layout: Option<FilterLayout>,

    /// Fail instead of clamping when a constant overflows int8
    #[arg(long)]
    strict_overflow: bool,

    /// Do not add an integer bit when rounding overflows
    #[arg(long)]
    no_widen: bool,

    /// File copied verbatim to the top of the artifact
    #[arg(long, value_name = "FILE")]
    header: Option<PathBuf>,
}

impl Args {
    fn into_config(self, mut config: GenConfig) -> Result<GenConfig> {
        if let Some(name) = self.graph_name {
            config.graph_name = name;
        }
        if let Some(id) = self.nn_id {
            config.nn_id = id;
        }
        if self.date.is_some() {
            config.create_date = self.date;
        }
        if self.layout.is_some() {
            config.layout = self.layout;
        }
        if let Some(filter_layout) = self.filter_layout {
            config.filter_layout = filter_layout;
        }
        if self.strict_overflow {
            config.quant.overflow = OverflowPolicy::Error;
        }
        if self.no_widen {
            config.quant.widen_on_overflow = false;
        }
        config.emit = self.emit;
        if let Some(path) = self.header {
            let text = fs::read_to_string(&path)
                .with_context(|| format!("reading header {}", path.display()))?;
            config.header = Some(text);
        }
        Ok(config)
    }
}

fn main() -> Result<()> {
    env_logger::init();

    let args = Args::parse();
    let model_path = args.model_path.clone();
    let out_dir = args.out.clone();
    let config = args.into_config(GenConfig::from_env()?)?;

    let graph = load_graph(&model_path)
        .with_context(|| format!("loading {}", model_path.display()))?;
    let generated = tiny_graph_gen::compile(&graph, &config)
        .with_context(|| format!("compiling {}", model_path.display()))?;

    let path = write_to_dir(&out_dir, generated.target, &generated.source)
        .with_context(|| format!("writing to {}", out_dir.display()))?;

    eprintln!(
        "Generated {} ({} nodes, {} tensors)",
        path.display(),
        generated.plan.nodes.len(),
        generated.plan.tensors.len()
    );
    Ok(())
}
