//! Generator configuration.

use std::str::FromStr;

use chrono::{Datelike, NaiveDate};

use crate::error::{Error, Result};
use crate::ir::{DataLayout, FilterLayout};

/// Environment variable pinning the graph creation date (`YYYYMMDD`) for reproducible output.
pub const CREATE_DATE_ENV: &str = "TINY_GRAPH_CREATE_DATE";

pub const DEFAULT_GRAPH_NAME: &str = "tengine-lite";
pub const DEFAULT_NN_ID: u32 = 0xdead_beaf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OverflowPolicy {
    /// Saturate to the int8 range and log a warning.
    #[default]
    Clamp,
    /// Fail with `Error::Overflow`.
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuantConfig {
    /// Add one integer bit when rounding pushes a value past the int8 range.
    pub widen_on_overflow: bool,
    pub overflow: OverflowPolicy,
}

impl Default for QuantConfig {
    fn default() -> Self {
        Self {
            widen_on_overflow: true,
            overflow: OverflowPolicy::Clamp,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EmitTarget {
    #[default]
    C,
    Rust,
}

impl EmitTarget {
    pub fn file_name(self) -> &'static str {
        match self {
            EmitTarget::C => "tiny_graph_generated.c",
            EmitTarget::Rust => "tiny_graph_generated.rs",
        }
    }
}

impl FromStr for EmitTarget {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "c" => Ok(EmitTarget::C),
            "rust" | "rs" => Ok(EmitTarget::Rust),
            _ => Err(Error::Config(format!("unknown emit target '{s}'"))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct GenConfig {
    pub graph_name: String,
    pub nn_id: u32,
    /// `YYYYMMDD`; `None` uses today's local date.
    pub create_date: Option<u32>,
    /// Overrides the layout detected from the graph's `data_format` attributes.
    pub layout: Option<DataLayout>,
    pub filter_layout: FilterLayout,
    pub quant: QuantConfig,
    pub emit: EmitTarget,
    /// Text copied verbatim to the top of the artifact (license boilerplate).
    pub header: Option<String>,
}

impl Default for GenConfig {
    fn default() -> Self {
        Self {
            graph_name: DEFAULT_GRAPH_NAME.to_string(),
            nn_id: DEFAULT_NN_ID,
            create_date: None,
            layout: None,
            filter_layout: FilterLayout::default(),
            quant: QuantConfig::default(),
            emit: EmitTarget::default(),
            header: None,
        }
    }
}

impl GenConfig {
    /// Defaults plus overrides read from the environment.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        if let Ok(value) = std::env::var(CREATE_DATE_ENV) {
            config.create_date = Some(parse_date(&value)?);
        }
        Ok(config)
    }

    /// Creation date stamped into the graph root.
    pub fn resolved_create_date(&self) -> u32 {
        self.create_date.unwrap_or_else(|| {
            let today = chrono::Local::now().date_naive();
            date_to_u32(today)
        })
    }
}

/// Parse and validate a `YYYYMMDD` date.
pub fn parse_date(s: &str) -> Result<u32> {
    let date = NaiveDate::parse_from_str(s.trim(), "%Y%m%d")
        .map_err(|e| Error::Config(format!("invalid date '{s}' (expected YYYYMMDD): {e}")))?;
    if !(1000..=9999).contains(&date.year()) {
        return Err(Error::Config(format!(
            "invalid date '{s}': year must have four digits"
        )));
    }
    Ok(date_to_u32(date))
}

fn date_to_u32(date: NaiveDate) -> u32 {
    date.year() as u32 * 10_000 + date.month() * 100 + date.day()
}

/// Parse a decimal or `0x`-prefixed hexadecimal graph id.
pub fn parse_nn_id(s: &str) -> Result<u32> {
    let s = s.trim();
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => s.parse::<u32>(),
    };
    parsed.map_err(|e| Error::Config(format!("invalid graph id '{s}': {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn date_round_trips() {
        assert_eq!(parse_date("20190909").unwrap(), 20190909);
        assert!(parse_date("20191340").is_err());
        assert!(parse_date("2019-09-09").is_err());
    }

    #[test]
    fn date_needs_four_digit_year() {
        assert!(parse_date("00000101").is_err());
        assert!(parse_date("09990101").is_err());
        assert_eq!(parse_date("10000101").unwrap(), 10000101);
    }

    #[test]
    fn pinned_date_wins() {
        let config = GenConfig {
            create_date: Some(20200101),
            ..GenConfig::default()
        };
        assert_eq!(config.resolved_create_date(), 20200101);
    }

    #[test]
    fn today_is_eight_digits() {
        let date = GenConfig::default().resolved_create_date();
        assert!((19_700_101..=99_991_231).contains(&date), "got {date}");
    }

    #[test]
    fn nn_id_parsing() {
        assert_eq!(parse_nn_id("0xdeadbeaf").unwrap(), DEFAULT_NN_ID);
        assert_eq!(parse_nn_id("42").unwrap(), 42);
        assert!(parse_nn_id("0xzz").is_err());
    }

    #[test]
    fn emit_target_names() {
        assert_eq!("rust".parse::<EmitTarget>().unwrap(), EmitTarget::Rust);
        assert_eq!(EmitTarget::C.file_name(), "tiny_graph_generated.c");
        assert!("asm".parse::<EmitTarget>().is_err());
    }
}
