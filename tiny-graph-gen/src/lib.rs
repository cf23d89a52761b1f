//! Quantization-aware graph compiler: generates a static INT8 "tiny graph"
//! (C source or a Rust module) for embedded inference runtimes.

pub mod artifact;
pub mod codegen;
pub mod config;
pub mod error;
pub mod ir;
pub mod parse;
pub mod quant;

pub use codegen::{compile, Generated};
pub use config::GenConfig;
pub use error::{Error, Result};
pub use ir::{Graph, GraphDef};
