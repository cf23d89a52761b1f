//! Tiny-graph target IR
//! each emitted node maps to a runtime op tag
//!

use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};
use crate::ir::graph::{GraphNode, OpKind};

/// Op tags understood by the tiny runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TinyOp {
    Conv,
    DwConv,
    Fc,
    Pool,
    Relu,
    Softmax,
    Reshape,
}

impl TinyOp {
    pub fn from_kind(node: &GraphNode) -> Result<Self> {
        Ok(match node.op {
            OpKind::Conv2D => TinyOp::Conv,
            OpKind::DepthwiseConv2D => TinyOp::DwConv,
            OpKind::MatMul => TinyOp::Fc,
            OpKind::MaxPool | OpKind::AvgPool => TinyOp::Pool,
            OpKind::Relu => TinyOp::Relu,
            OpKind::Softmax => TinyOp::Softmax,
            OpKind::Reshape => TinyOp::Reshape,
            ref other => {
                return Err(Error::UnsupportedOp {
                    node: node.name.clone(),
                    op: other.to_string(),
                })
            }
        })
    }

    pub fn c_tag(self) -> &'static str {
        match self {
            TinyOp::Conv => "NN_OP_CONV",
            TinyOp::DwConv => "NN_OP_DWCONV",
            TinyOp::Fc => "NN_OP_FC",
            TinyOp::Pool => "NN_OP_POOL",
            TinyOp::Relu => "NN_OP_RELU",
            TinyOp::Softmax => "NN_OP_SOFTMAX",
            TinyOp::Reshape => "NN_OP_RESHAPE",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DataLayout {
    #[default]
    Nhwc,
    Nchw,
}

impl DataLayout {
    /// Indices of the (h, w) axes in 4-element ksize/strides lists.
    pub fn spatial_axes(self) -> (usize, usize) {
        match self {
            DataLayout::Nhwc => (1, 2),
            DataLayout::Nchw => (2, 3),
        }
    }

    pub fn c_tag(self) -> &'static str {
        match self {
            DataLayout::Nhwc => "NN_LAYOUT_NHWC",
            DataLayout::Nchw => "NN_LAYOUT_NCHW",
        }
    }

    /// Layout declared by a node's `data_format` attribute (TensorFlow defaults to NHWC).
    pub fn of_node(node: &GraphNode) -> Result<Option<Self>> {
        match node.attr_str("data_format")? {
            Some(s) => s
                .parse()
                .map(Some)
                .map_err(|_| Error::invalid_attr(&node.name, "data_format", format!("unknown layout '{s}'"))),
            None => Ok(None),
        }
    }
}

impl FromStr for DataLayout {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "NHWC" => Ok(DataLayout::Nhwc),
            "NCHW" => Ok(DataLayout::Nchw),
            _ => Err(Error::Config(format!("unknown data layout '{s}'"))),
        }
    }
}

impl fmt::Display for DataLayout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DataLayout::Nhwc => "NHWC",
            DataLayout::Nchw => "NCHW",
        })
    }
}

/// Where the kernel height/width live in a convolution weight tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FilterLayout {
    /// `[O, H, W, I]` for NHWC graphs, `[O, I, H, W]` for NCHW graphs
    #[default]
    FollowData,
    /// TensorFlow-native `[H, W, I, O]`
    Hwio,
}

impl FilterLayout {
    pub fn kernel_axes(self, data: DataLayout) -> (usize, usize) {
        match self {
            FilterLayout::FollowData => data.spatial_axes(),
            FilterLayout::Hwio => (0, 1),
        }
    }
}

impl FromStr for FilterLayout {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "follow-data" | "ohwi" | "oihw" => Ok(FilterLayout::FollowData),
            "hwio" => Ok(FilterLayout::Hwio),
            _ => Err(Error::Config(format!("unknown filter layout '{s}'"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PadMode {
    Same,
    Valid,
}

impl PadMode {
    /// `SAME` maps to same-padding, anything else (or nothing) to valid.
    pub fn from_attr(padding: Option<&str>) -> Self {
        match padding {
            Some("SAME") => PadMode::Same,
            _ => PadMode::Valid,
        }
    }

    pub fn c_tag(self) -> &'static str {
        match self {
            PadMode::Same => "NN_PAD_SAME",
            PadMode::Valid => "NN_PAD_VALID",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolMethod {
    Max,
    Avg,
}

impl PoolMethod {
    pub fn c_tag(self) -> &'static str {
        match self {
            PoolMethod::Max => "NN_POOL_MAX",
            PoolMethod::Avg => "NN_POOL_AVG",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConvParam {
    pub kernel_h: usize,
    pub kernel_w: usize,
    pub stride_h: usize,
    pub stride_w: usize,
    pub pad: PadMode,
    /// Fused activation; the generator never fuses one, so this is always -1.
    pub activation: i32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolParam {
    pub kernel_h: usize,
    pub kernel_w: usize,
    pub stride_h: usize,
    pub stride_w: usize,
    pub pad: PadMode,
    pub method: PoolMethod,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OpParam {
    Conv(ConvParam),
    Pool(PoolParam),
}

impl OpParam {
    pub fn c_struct(&self) -> &'static str {
        match self {
            OpParam::Conv(_) => "tiny_conv_param",
            OpParam::Pool(_) => "tiny_pool_param",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_axes() {
        assert_eq!(DataLayout::Nhwc.spatial_axes(), (1, 2));
        assert_eq!(DataLayout::Nchw.spatial_axes(), (2, 3));
        assert_eq!(FilterLayout::Hwio.kernel_axes(DataLayout::Nchw), (0, 1));
        assert_eq!(FilterLayout::FollowData.kernel_axes(DataLayout::Nchw), (2, 3));
    }

    #[test]
    fn padding_mapping() {
        assert_eq!(PadMode::from_attr(Some("SAME")), PadMode::Same);
        assert_eq!(PadMode::from_attr(Some("VALID")), PadMode::Valid);
        assert_eq!(PadMode::from_attr(Some("EXPLICIT")), PadMode::Valid);
        assert_eq!(PadMode::from_attr(None), PadMode::Valid);
    }

    #[test]
    fn unsupported_op_named() {
        let node = GraphNode::new("mystery", OpKind::Other("Tanh".into()));
        let err = TinyOp::from_kind(&node).unwrap_err();
        assert_eq!(err.to_string(), "node 'mystery': unsupported operator 'Tanh'");
    }

    #[test]
    fn layout_parsing() {
        assert_eq!("nchw".parse::<DataLayout>().unwrap(), DataLayout::Nchw);
        assert!("HWCN".parse::<DataLayout>().is_err());
        assert_eq!("HWIO".parse::<FilterLayout>().unwrap(), FilterLayout::Hwio);
    }
}
