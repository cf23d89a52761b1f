use std::collections::{HashMap, HashSet};

use crate::ir::{Graph, TensorRef};

/// Turn an arbitrary node name into a C identifier fragment.
///
/// Characters outside `[A-Za-z0-9_]` become `_`; a leading digit gets an `n_` prefix.
pub fn mangle(name: &str) -> String {
    let mut out: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect();
    if out.is_empty() {
        out.push('_');
    }
    if out.starts_with(|c: char| c.is_ascii_digit()) {
        out.insert_str(0, "n_");
    }
    out
}

/**
 * Maps graph node names to unique identifier bases and derives every
 * emitted symbol from them.
 *
 * Bases are unique ignoring case, so the upper-cased `_DATA`/`_SHIFT`
 * defines never collide either.
 */
#[derive(Debug, Default)]
pub struct SymbolTable {
    bases: HashMap<String, String>,
    taken: HashSet<String>,
}

impl SymbolTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register every node of the graph in graph order.
    pub fn from_graph(graph: &Graph) -> Self {
        let mut table = Self::new();
        for node in graph.nodes() {
            table.intern(&node.name);
        }
        table
    }

    /// Base identifier for a node, assigning one on first sight.
    pub fn intern(&mut self, node: &str) -> &str {
        if !self.bases.contains_key(node) {
            let mangled = mangle(node);
            let mut candidate = mangled.clone();
            let mut n = 0;
            while self.taken.contains(&candidate.to_ascii_uppercase()) {
                n += 1;
                candidate = format!("{mangled}_{n}");
            }
            if n > 0 {
                log::warn!("symbol '{mangled}' for node '{node}' already taken, using '{candidate}'");
            }
            self.taken.insert(candidate.to_ascii_uppercase());
            self.bases.insert(node.to_string(), candidate);
        }
        &self.bases[node]
    }

    /// Base identifier of a registered node.
    pub fn base(&self, node: &str) -> &str {
        &self.bases[node]
    }

    /// Tensor record: `<base>_<slot>`.
    pub fn tensor(&self, t: &TensorRef) -> String {
        format!("{}_{}", self.base(&t.node), t.slot)
    }

    /// Quantized data array: `<base>_data`.
    pub fn data_array(&self, node: &str) -> String {
        format!("{}_data", self.base(node))
    }

    /// Quantized data define: `<BASE>_DATA`.
    pub fn data_define(&self, node: &str) -> String {
        format!("{}_DATA", self.base(node).to_ascii_uppercase())
    }

    /// Shift define: `<BASE>_SHIFT`.
    pub fn shift(&self, node: &str) -> String {
        format!("{}_SHIFT", self.base(node).to_ascii_uppercase())
    }

    /// Parameter record: `<base>_param`.
    pub fn param(&self, node: &str) -> String {
        format!("{}_param", self.base(node))
    }

    /// Node record: `<base>_node`.
    pub fn node_record(&self, node: &str) -> String {
        format!("{}_node", self.base(node))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mangling() {
        assert_eq!(mangle("conv1/weights/read"), "conv1_weights_read");
        assert_eq!(mangle("fc-1.bias"), "fc_1_bias");
        assert_eq!(mangle("0_conv"), "n_0_conv");
        assert_eq!(mangle(""), "_");
    }

    #[test]
    fn collisions_get_numbered_suffixes() {
        let mut table = SymbolTable::new();
        assert_eq!(table.intern("a/b"), "a_b");
        assert_eq!(table.intern("a.b"), "a_b_1");
        assert_eq!(table.intern("a-b"), "a_b_2");
        // stable on re-intern
        assert_eq!(table.intern("a.b"), "a_b_1");
    }

    #[test]
    fn collisions_ignore_case() {
        let mut table = SymbolTable::new();
        table.intern("Conv");
        assert_eq!(table.intern("conv"), "conv_1");
        assert_eq!(table.shift("Conv"), "CONV_SHIFT");
        assert_eq!(table.shift("conv"), "CONV_1_SHIFT");
    }

    #[test]
    fn derived_names() {
        let mut table = SymbolTable::new();
        table.intern("conv1/weights");
        assert_eq!(table.tensor(&TensorRef::new("conv1/weights", 0)), "conv1_weights_0");
        assert_eq!(table.data_array("conv1/weights"), "conv1_weights_data");
        assert_eq!(table.data_define("conv1/weights"), "CONV1_WEIGHTS_DATA");
        assert_eq!(table.shift("conv1/weights"), "CONV1_WEIGHTS_SHIFT");
        assert_eq!(table.param("conv1/weights"), "conv1_weights_param");
        assert_eq!(table.node_record("conv1/weights"), "conv1_weights_node");
    }
}
