//! JSON interchange loader.
//!
//! The document is a serialized [`GraphDef`]. TensorFlow control
//! dependencies (`^node` inputs) carry no data and are dropped before the
//! typed decode.

use std::fs;
use std::path::Path;

use serde_json::Value;

use crate::error::Result;
use crate::ir::{Graph, GraphDef};

/// Read, validate and index a graph file.
pub fn load_graph(path: impl AsRef<Path>) -> Result<Graph> {
    let path = path.as_ref();
    let text = fs::read_to_string(path)?;
    log::info!("loading graph from {}", path.display());
    from_str(&text)
}

pub fn from_str(text: &str) -> Result<Graph> {
    let def = parse_def(text)?;
    let graph = Graph::from_def(def)?;
    log::info!("graph has {} nodes", graph.nodes().len());
    Ok(graph)
}

/// Decode without validating.
pub fn parse_def(text: &str) -> Result<GraphDef> {
    let mut doc: Value = serde_json::from_str(text)?;
    let dropped = strip_control_inputs(&mut doc);
    if dropped > 0 {
        log::debug!("dropped {dropped} control inputs");
    }
    Ok(serde_json::from_value(doc)?)
}

fn strip_control_inputs(doc: &mut Value) -> usize {
    let Some(nodes) = doc.get_mut("nodes").and_then(Value::as_array_mut) else {
        return 0;
    };
    let mut dropped = 0;
    for node in nodes {
        if let Some(inputs) = node.get_mut("inputs").and_then(Value::as_array_mut) {
            let before = inputs.len();
            inputs.retain(|i| !i.as_str().is_some_and(|s| s.starts_with('^')));
            dropped += before - inputs.len();
        }
    }
    dropped
}
