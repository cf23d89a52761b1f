//! Error types for graph loading, quantization and code generation.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("duplicate node name '{0}'")]
    DuplicateNode(String),

    #[error("invalid tensor reference '{0}'")]
    BadTensorRef(String),

    #[error("node '{node}': input '{input}' does not resolve to a node output")]
    DanglingInput { node: String, input: String },

    #[error("node '{node}': missing attribute '{attr}'")]
    MissingAttr { node: String, attr: String },

    #[error("node '{node}': invalid attribute '{attr}': {reason}")]
    InvalidAttr {
        node: String,
        attr: String,
        reason: String,
    },

    #[error("node '{node}': unsupported operator '{op}'")]
    UnsupportedOp { node: String, op: String },

    #[error("node '{node}': {reason}")]
    Topology { node: String, reason: String },

    #[error("constant '{node}' is empty")]
    EmptyTensor { node: String },

    #[error("constant '{node}' contains a non-finite value at index {index}")]
    NonFinite { node: String, index: usize },

    #[error(
        "constant '{node}': value {value} at index {index} overflows int8 with {frac_bits} fractional bits"
    )]
    Overflow {
        node: String,
        index: usize,
        value: f32,
        frac_bits: i32,
    },

    #[error("shift {symbol} = {value} is outside [0, 31]")]
    ShiftOutOfRange { symbol: String, value: i32 },

    #[error("shift {symbol} bound to both {existing} and {new}")]
    ConflictingShift {
        symbol: String,
        existing: i32,
        new: i32,
    },

    #[error("tensor '{tensor}' has no shift binding")]
    MissingShift { tensor: String },

    #[error("tensor '{tensor}' has rank {rank}; at most {max} dims are supported")]
    TooManyDims {
        tensor: String,
        rank: usize,
        max: usize,
    },

    #[error("graph mixes data layouts ({first} on '{first_node}', {second} on '{second_node}')")]
    MixedLayout {
        first: String,
        first_node: String,
        second: String,
        second_node: String,
    },

    #[error("graph has no emittable nodes")]
    EmptyGraph,

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("generated Rust module does not parse: {0}")]
    RustSyntax(#[from] syn::Error),
}

impl Error {
    pub(crate) fn topology(node: &str, reason: impl Into<String>) -> Self {
        Error::Topology {
            node: node.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn missing_attr(node: &str, attr: &str) -> Self {
        Error::MissingAttr {
            node: node.to_string(),
            attr: attr.to_string(),
        }
    }

    pub(crate) fn invalid_attr(node: &str, attr: &str, reason: impl Into<String>) -> Self {
        Error::InvalidAttr {
            node: node.to_string(),
            attr: attr.to_string(),
            reason: reason.into(),
        }
    }
}
