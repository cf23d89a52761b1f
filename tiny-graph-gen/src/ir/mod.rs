pub mod graph;
pub mod tiny;

pub use graph::{
    AttrValue, ConstTensor, DType, Graph, GraphDef, GraphNode, NodeId, OpKind, TensorDesc,
    TensorRef, TensorRole,
};
pub use tiny::{ConvParam, DataLayout, FilterLayout, OpParam, PadMode, PoolMethod, PoolParam, TinyOp};
