//! Shift propagation across compute units.
//!
//! A unit computes `acc = Σ x·w + (b << bias_shift)` in a 32-bit accumulator
//! and stores `acc >> out_shift`. With `x` in Q.prior, `w` in Q.weight, `b`
//! in Q.bias and the result in Q.next:
//!
//! - `bias_shift = prior + weight − bias`
//! - `out_shift = prior + weight − next`
//!
//! Weights are stored as quantized, so their own shift is always 0.

use std::collections::HashMap;

use crate::codegen::fuse::{ComputeUnit, UnitSet};
use crate::codegen::symbol::SymbolTable;
use crate::error::{Error, Result};
use crate::ir::{Graph, NodeId, OpKind};
use crate::quant::QuantTable;

/// Largest shift the runtime's 32-bit accumulator arithmetic accepts.
pub const MAX_SHIFT: i32 = 31;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShiftKind {
    Weight,
    BiasLeft,
    OutputRight,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShiftBinding {
    /// `<BASE>_SHIFT`
    pub symbol: String,
    pub value: i32,
    pub kind: ShiftKind,
    /// Weight/bias `Const` node, or the compute node for output shifts.
    pub node: NodeId,
}

/// Ordered shift bindings with lookups by symbol and by node.
#[derive(Debug, Default)]
pub struct ShiftTable {
    bindings: Vec<ShiftBinding>,
    by_symbol: HashMap<String, usize>,
    by_node: HashMap<NodeId, usize>,
}

impl ShiftTable {
    pub fn bindings(&self) -> &[ShiftBinding] {
        &self.bindings
    }

    pub fn get(&self, symbol: &str) -> Option<&ShiftBinding> {
        self.by_symbol.get(symbol).map(|&i| &self.bindings[i])
    }

    pub fn for_node(&self, id: NodeId) -> Option<&ShiftBinding> {
        self.by_node.get(&id).map(|&i| &self.bindings[i])
    }

    /// Add a binding. Re-binding a symbol to the same value is a no-op.
    pub fn bind(&mut self, binding: ShiftBinding) -> Result<()> {
        if !(0..=MAX_SHIFT).contains(&binding.value) {
            return Err(Error::ShiftOutOfRange {
                symbol: binding.symbol,
                value: binding.value,
            });
        }
        if let Some(existing) = self.get(&binding.symbol) {
            if existing.value != binding.value {
                return Err(Error::ConflictingShift {
                    symbol: binding.symbol,
                    existing: existing.value,
                    new: binding.value,
                });
            }
            return Ok(());
        }
        log::debug!("{} = {} ({:?})", binding.symbol, binding.value, binding.kind);
        let index = self.bindings.len();
        self.by_symbol.insert(binding.symbol.clone(), index);
        self.by_node.insert(binding.node, index);
        self.bindings.push(binding);
        Ok(())
    }
}

pub fn bias_left_shift(prior_frac: i32, weight_frac: i32, bias_frac: i32) -> i32 {
    prior_frac + weight_frac - bias_frac
}

pub fn output_right_shift(prior_frac: i32, weight_frac: i32, next_frac: i32) -> i32 {
    prior_frac + weight_frac - next_frac
}

/// Derive weight, bias and output shifts for every compute unit, in graph order.
pub fn propagate(
    graph: &Graph,
    units: &UnitSet,
    quant: &QuantTable,
    symbols: &SymbolTable,
) -> Result<ShiftTable> {
    let mut table = ShiftTable::default();

    for unit in units.units() {
        let compute = graph.node(unit.compute);
        let prior = prior_output_frac(graph, units, quant, unit)?;
        let weight_frac = const_frac(graph, quant, unit.weight, &compute.name)?;
        let next = marker_frac(graph, quant, unit.marker)?;

        let weight_name = &graph.node(unit.weight).name;
        table.bind(ShiftBinding {
            symbol: symbols.shift(weight_name),
            value: 0,
            kind: ShiftKind::Weight,
            node: unit.weight,
        })?;

        if let Some(fused) = &unit.bias {
            let bias_frac = const_frac(graph, quant, fused.bias, &compute.name)?;
            table.bind(ShiftBinding {
                symbol: symbols.shift(&graph.node(fused.bias).name),
                value: bias_left_shift(prior, weight_frac, bias_frac),
                kind: ShiftKind::BiasLeft,
                node: fused.bias,
            })?;
        }

        table.bind(ShiftBinding {
            symbol: symbols.shift(&compute.name),
            value: output_right_shift(prior, weight_frac, next),
            kind: ShiftKind::OutputRight,
            node: unit.compute,
        })?;
    }

    log::info!(
        "propagated {} shift bindings over {} compute units",
        table.bindings.len(),
        units.units().len()
    );
    Ok(table)
}

/// Fixed-point format of a unit's data input.
///
/// Walks back through ops that keep their input's format until a quantization
/// marker or the output of another compute unit.
pub fn prior_output_frac(
    graph: &Graph,
    units: &UnitSet,
    quant: &QuantTable,
    unit: &ComputeUnit,
) -> Result<i32> {
    let compute = &graph.node(unit.compute).name;
    let mut current = unit.data.clone();
    loop {
        let producer_id = graph.producer(&current);
        let producer = graph.node(producer_id);
        if producer.op == OpKind::QuantizationMarker {
            return marker_frac(graph, quant, producer_id);
        }
        if let Some(prev) = units.producing(&current) {
            return marker_frac(graph, quant, prev.marker);
        }
        match producer.inputs.first() {
            Some(first) if producer.op.is_scale_preserving() => current = first.clone(),
            _ if producer.op == OpKind::Placeholder => {
                return Err(Error::topology(
                    compute,
                    format!(
                        "input '{}' reaches graph input '{}' without a quantization marker",
                        unit.data, producer.name
                    ),
                ))
            }
            _ => {
                return Err(Error::topology(
                    compute,
                    format!(
                        "cannot determine the fixed-point format of input '{}' ({} '{}' in the way)",
                        unit.data, producer.op, producer.name
                    ),
                ))
            }
        }
    }
}

fn marker_frac(graph: &Graph, quant: &QuantTable, marker: NodeId) -> Result<i32> {
    let name = &graph.node(marker).name;
    quant
        .marker(name)
        .map(|m| m.frac_bits)
        .ok_or_else(|| Error::topology(name, "quantization marker has no range"))
}

fn const_frac(graph: &Graph, quant: &QuantTable, id: NodeId, user: &str) -> Result<i32> {
    let name = &graph.node(id).name;
    quant
        .get(name)
        .map(|t| t.frac_bits)
        .ok_or_else(|| Error::topology(user, format!("constant '{name}' was not quantized")))
}
