//! Artifact plan IR
//!
//! Everything the emitters need, already linearized and named:
//! 1. **ConstData / ShiftDef**: quantized data and shift defines
//! 2. **TensorRecord**: one `tiny_tensor` per distinct resolved tensor
//! 3. **ParamRecord / NodeRecord**: operator parameters and nodes in execution order

use crate::ir::{DataLayout, OpParam, TensorRef, TensorRole, TinyOp};

/// Runtime limit on tensor rank.
pub const MAX_DIMS: usize = 4;

/// Complete plan for one graph. Produced by `linearize()`, consumed by the emitters.
#[derive(Debug, Clone, PartialEq)]
pub struct ArtifactPlan {
    pub meta: GraphMeta,
    pub constants: Vec<ConstData>,
    pub shifts: Vec<ShiftDef>,
    pub tensors: Vec<TensorRecord>,
    pub params: Vec<ParamRecord>,
    pub nodes: Vec<NodeRecord>,
}

impl ArtifactPlan {
    pub fn shift_value(&self, symbol: &str) -> Option<i32> {
        self.shifts
            .iter()
            .find(|s| s.symbol == symbol)
            .map(|s| s.value)
    }

    pub fn tensor(&self, symbol: &str) -> Option<&TensorRecord> {
        self.tensors.iter().find(|t| t.symbol == symbol)
    }

    pub fn node(&self, graph_name: &str) -> Option<&NodeRecord> {
        self.nodes.iter().find(|n| n.source == graph_name)
    }
}

/// Graph root fields.
#[derive(Debug, Clone, PartialEq)]
pub struct GraphMeta {
    pub name: String,
    pub nn_id: u32,
    /// `YYYYMMDD`
    pub create_date: u32,
    pub layout: DataLayout,
    /// Verbatim text placed above the generated code.
    pub header: Option<String>,
}

// ─── (1) Quantized data and shifts ─────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct ConstData {
    /// `<BASE>_DATA`
    pub define: String,
    /// `<base>_data`
    pub array: String,
    pub source: String,
    pub values: Vec<i8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShiftDef {
    pub symbol: String,
    pub value: i32,
}

// ─── (2) Tensor records ────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShiftRef {
    Zero,
    Symbol(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct TensorRecord {
    pub symbol: String,
    /// Alias-resolved tensor this record stands for.
    pub source: TensorRef,
    pub dims: Vec<usize>,
    pub shift: ShiftRef,
    pub role: TensorRole,
    /// `<base>_data` for constants.
    pub data: Option<String>,
}

// ─── (3) Parameters and nodes ──────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct ParamRecord {
    pub symbol: String,
    pub param: OpParam,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NodeRecord {
    pub symbol: String,
    /// Graph node the record was emitted for.
    pub source: String,
    pub op: TinyOp,
    pub param: Option<String>,
    /// Tensor record symbols: data, then weight and bias for fused units.
    pub inputs: Vec<String>,
    pub output: String,
}
