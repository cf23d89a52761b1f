//! Graph loaders.

pub mod json;

pub use json::load_graph;
