//! Small graphs shared by the codegen and quantization tests.

use crate::ir::{AttrValue, ConstTensor, DType, GraphDef, GraphNode, OpKind};

fn ints(v: &[i64]) -> AttrValue {
    AttrValue::Ints(v.to_vec())
}

fn text(s: &str) -> AttrValue {
    AttrValue::Str(s.to_string())
}

fn marker_attrs(name: &str, input: &str, shape: &[usize], min: f64, max: f64) -> GraphNode {
    GraphNode::new(name, OpKind::QuantizationMarker)
        .input(input, 0)
        .attr("min", AttrValue::Float(min))
        .attr("max", AttrValue::Float(max))
        .output(shape, DType::F32)
}

/// `x -> x_quant -> Conv2D(+bias) -> act_quant`, NHWC, 3x3 SAME conv to 2 channels.
///
/// Formats: input frac 5, weights frac 7, bias frac 8, output frac 6.
pub fn conv_graph() -> GraphDef {
    let weights: Vec<f32> = (0..18).map(|i| (i as f32 - 9.0) / 12.0).collect();
    let mut def = GraphDef::new();
    def.push(
        GraphNode::new("x", OpKind::Placeholder).output_desc(crate::ir::TensorDesc {
            shape: vec![None, Some(4), Some(4), Some(1)],
            dtype: DType::F32,
        }),
    )
    .push(marker_attrs("x_quant", "x", &[1, 4, 4, 1], -4.0, 4.0))
    .push(GraphNode::constant("conv/weights", &[2, 3, 3, 1], weights))
    .push(
        GraphNode::new("conv/weights/read", OpKind::Identity)
            .input("conv/weights", 0)
            .output(&[2, 3, 3, 1], DType::F32),
    )
    .push(
        GraphNode::new("conv/Conv2D", OpKind::Conv2D)
            .input("x_quant", 0)
            .input("conv/weights/read", 0)
            .attr("strides", ints(&[1, 1, 1, 1]))
            .attr("padding", text("SAME"))
            .attr("data_format", text("NHWC"))
            .output(&[1, 4, 4, 2], DType::F32),
    )
    .push(GraphNode::constant("conv/bias", &[2], vec![0.25, -0.125]))
    .push(
        GraphNode::new("conv/BiasAdd", OpKind::BiasAdd)
            .input("conv/Conv2D", 0)
            .input("conv/bias", 0)
            .output(&[1, 4, 4, 2], DType::F32),
    )
    .push(GraphNode::constant("conv/act_quant/min", &[], vec![-2.0]))
    .push(GraphNode::constant("conv/act_quant/max", &[], vec![2.0]))
    .push(
        GraphNode::new("conv/act_quant", OpKind::QuantizationMarker)
            .input("conv/BiasAdd", 0)
            .input("conv/act_quant/min", 0)
            .input("conv/act_quant/max", 0)
            .output(&[1, 4, 4, 2], DType::F32),
    );
    def
}

/// Keyword-spotting style network:
/// `conv1(+bias) -> marker -> relu -> maxpool -> reshape -> fc(+bias) -> marker -> softmax`.
///
/// Formats: input 5; conv1 weights 7, bias 8, output 6; fc weights 6, bias 7, output 3.
/// Shifts: conv1 bias 4, out 6; fc bias 5, out 9.
pub fn kws_graph() -> GraphDef {
    let conv_w: Vec<f32> = (0..18).map(|i| (i as f32 - 9.0) / 12.0).collect();
    let fc_w: Vec<f32> = (0..24).map(|i| (i as f32 - 12.0) / 8.0).collect();

    let mut def = GraphDef::new();
    def.name = Some("kws".to_string());
    def.push(
        GraphNode::new("x", OpKind::Placeholder).output_desc(crate::ir::TensorDesc {
            shape: vec![None, Some(4), Some(4), Some(1)],
            dtype: DType::F32,
        }),
    )
    .push(marker_attrs("x_quant", "x", &[1, 4, 4, 1], -4.0, 4.0))
    .push(GraphNode::constant("conv1/weights", &[2, 3, 3, 1], conv_w))
    .push(
        GraphNode::new("conv1/weights/read", OpKind::Identity)
            .input("conv1/weights", 0)
            .output(&[2, 3, 3, 1], DType::F32),
    )
    .push(
        GraphNode::new("conv1/Conv2D", OpKind::Conv2D)
            .input("x_quant", 0)
            .input("conv1/weights/read", 0)
            .attr("strides", ints(&[1, 1, 1, 1]))
            .attr("padding", text("SAME"))
            .attr("data_format", text("NHWC"))
            .output(&[1, 4, 4, 2], DType::F32),
    )
    .push(GraphNode::constant("conv1/biases", &[2], vec![0.25, -0.125]))
    .push(
        GraphNode::new("conv1/BiasAdd", OpKind::BiasAdd)
            .input("conv1/Conv2D", 0)
            .input("conv1/biases", 0)
            .output(&[1, 4, 4, 2], DType::F32),
    )
    .push(GraphNode::constant("conv1/act_quant/min", &[], vec![-2.0]))
    .push(GraphNode::constant("conv1/act_quant/max", &[], vec![2.0]))
    .push(
        GraphNode::new("conv1/act_quant", OpKind::QuantizationMarker)
            .input("conv1/BiasAdd", 0)
            .input("conv1/act_quant/min", 0)
            .input("conv1/act_quant/max", 0)
            .output(&[1, 4, 4, 2], DType::F32),
    )
    .push(
        GraphNode::new("conv1/Relu", OpKind::Relu)
            .input("conv1/act_quant", 0)
            .output(&[1, 4, 4, 2], DType::F32),
    )
    .push(
        GraphNode::new("pool", OpKind::MaxPool)
            .input("conv1/Relu", 0)
            .attr("ksize", ints(&[1, 2, 2, 1]))
            .attr("strides", ints(&[1, 2, 2, 1]))
            .attr("padding", text("SAME"))
            .attr("data_format", text("NHWC"))
            .output(&[1, 2, 2, 2], DType::F32),
    )
    .push(GraphNode::new("flatten/shape", OpKind::Const).attr(
        "value",
        AttrValue::Tensor(ConstTensor {
            dtype: DType::I32,
            shape: vec![2],
            values: vec![-1.0, 8.0],
        }),
    ))
    .push(
        GraphNode::new("flatten", OpKind::Reshape)
            .input("pool", 0)
            .input("flatten/shape", 0)
            .output(&[1, 8], DType::F32),
    )
    .push(GraphNode::constant("fc/weights", &[8, 3], fc_w))
    .push(
        GraphNode::new("fc/MatMul", OpKind::MatMul)
            .input("flatten", 0)
            .input("fc/weights", 0)
            .output(&[1, 3], DType::F32),
    )
    .push(GraphNode::constant("fc/biases", &[3], vec![0.5, -0.5, 0.25]))
    .push(
        GraphNode::new("fc/add", OpKind::Add)
            .input("fc/MatMul", 0)
            .input("fc/biases", 0)
            .output(&[1, 3], DType::F32),
    )
    .push(marker_attrs("fc/act_quant", "fc/add", &[1, 3], -16.0, 16.0))
    .push(
        GraphNode::new("labels_softmax", OpKind::Softmax)
            .input("fc/act_quant", 0)
            .output(&[1, 3], DType::F32),
    );
    def
}
