//! Compute-unit discovery
//! A conv/matmul, its weight constant, an optional bias-add folded into it
//! and the quantization marker that fixes its output format.

use std::collections::HashMap;

use crate::error::{Error, Result};
use crate::ir::{Graph, GraphNode, NodeId, OpKind, TensorRef};

/// Bias-add absorbed into the preceding compute node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FusedBias {
    pub add: NodeId,
    /// `Const` node holding the bias values.
    pub bias: NodeId,
    /// Bias operand of the add as written in the graph.
    pub operand: TensorRef,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComputeUnit {
    pub compute: NodeId,
    /// Data operand as written in the graph (may go through aliases).
    pub data: TensorRef,
    /// `Const` node holding the weights.
    pub weight: NodeId,
    pub bias: Option<FusedBias>,
    /// Tensor the unit exposes downstream: the bias-add output when fused.
    pub output: TensorRef,
    /// Quantization marker giving the output format.
    pub marker: NodeId,
}

/// Every compute unit of a graph, in graph order.
#[derive(Debug, Default)]
pub struct UnitSet {
    units: Vec<ComputeUnit>,
    by_compute: HashMap<NodeId, usize>,
    by_add: HashMap<NodeId, usize>,
}

impl UnitSet {
    pub fn units(&self) -> &[ComputeUnit] {
        &self.units
    }

    pub fn by_compute(&self, id: NodeId) -> Option<&ComputeUnit> {
        self.by_compute.get(&id).map(|&i| &self.units[i])
    }

    /// Unit that absorbed the given bias-add node.
    pub fn by_bias_add(&self, id: NodeId) -> Option<&ComputeUnit> {
        self.by_add.get(&id).map(|&i| &self.units[i])
    }

    /// Unit whose exposed output is `t`.
    pub fn producing(&self, t: &TensorRef) -> Option<&ComputeUnit> {
        self.units.iter().find(|u| &u.output == t)
    }
}

/// Find the compute units from producer/consumer edges.
pub fn find_units(graph: &Graph) -> Result<UnitSet> {
    let mut set = UnitSet::default();

    for (id, node) in graph.nodes().iter().enumerate() {
        if !node.op.is_compute() {
            continue;
        }
        if node.inputs.len() != 2 {
            return Err(Error::topology(
                &node.name,
                format!("expected data and weight inputs, found {} inputs", node.inputs.len()),
            ));
        }
        if node.outputs.len() != 1 {
            return Err(Error::topology(
                &node.name,
                format!("expected 1 output, found {}", node.outputs.len()),
            ));
        }

        let weight = float_const(graph, &node.inputs[1]).ok_or_else(|| {
            Error::topology(
                &node.name,
                format!("weight input '{}' is not a float constant", node.inputs[1]),
            )
        })?;

        let bias = fusable_bias(graph, node)?;
        let output = match &bias {
            Some(fused) => graph.node(fused.add).output_ref(0),
            None => node.output_ref(0),
        };
        let marker = output_marker(graph, node, &output)?;

        log::debug!(
            "unit {}: weight {}, bias {}, marker {}",
            node.name,
            graph.node(weight).name,
            bias.as_ref()
                .map(|b| graph.node(b.bias).name.as_str())
                .unwrap_or("-"),
            graph.node(marker).name
        );

        let index = set.units.len();
        set.by_compute.insert(id, index);
        if let Some(fused) = &bias {
            set.by_add.insert(fused.add, index);
        }
        set.units.push(ComputeUnit {
            compute: id,
            data: node.inputs[0].clone(),
            weight,
            bias,
            output,
            marker,
        });
    }

    Ok(set)
}

/// Producer of `t` after alias resolution, if it is a float `Const`.
fn float_const(graph: &Graph, t: &TensorRef) -> Option<NodeId> {
    let source = graph.resolve_alias(t);
    let id = graph.producer(&source);
    let node = graph.node(id);
    match node.const_value() {
        Ok(value) if node.op == OpKind::Const && value.dtype.is_float() => Some(id),
        _ => None,
    }
}

/// A bias-add fuses when it is the sole consumer of the compute output and
/// its other operand is a float constant. `BiasAdd` takes the value first;
/// a plain `Add` may list its operands in either order.
fn fusable_bias(graph: &Graph, compute: &GraphNode) -> Result<Option<FusedBias>> {
    let out = compute.output_ref(0);
    let [only] = graph.consumers(&out) else {
        return Ok(None);
    };
    let add = graph.node(*only);
    if !add.op.is_bias_add() || add.inputs.len() != 2 {
        return Ok(None);
    }
    let operand = match (&add.inputs[0], &add.inputs[1]) {
        (value, bias) if *value == out && *bias != out => bias,
        (bias, value) if add.op == OpKind::Add && *value == out && *bias != out => bias,
        _ => return Ok(None),
    };
    if add.outputs.len() != 1 {
        return Err(Error::topology(
            &add.name,
            format!("expected 1 output, found {}", add.outputs.len()),
        ));
    }
    Ok(float_const(graph, operand).map(|bias| FusedBias {
        add: *only,
        bias,
        operand: operand.clone(),
    }))
}

/// Follow the single-consumer chain through scale-preserving ops to the marker.
fn output_marker(graph: &Graph, compute: &GraphNode, output: &TensorRef) -> Result<NodeId> {
    let mut current = output.clone();
    loop {
        let next = match graph.consumers(&current) {
            [only] => *only,
            _ => break,
        };
        let node = graph.node(next);
        if node.op == OpKind::QuantizationMarker {
            return Ok(next);
        }
        if node.op.is_bias_add() {
            return Err(Error::topology(
                &node.name,
                format!("bias-add cannot be fused into '{}'", compute.name),
            ));
        }
        if !node.op.is_scale_preserving() || node.inputs.first() != Some(&current) {
            break;
        }
        current = node.output_ref(0);
    }
    Err(Error::topology(
        &compute.name,
        format!("output '{output}' reaches no quantization marker"),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codegen::fixtures::{conv_graph, kws_graph};
    use crate::ir::{DType, GraphNode};

    fn name(graph: &Graph, id: NodeId) -> &str {
        &graph.node(id).name
    }

    #[test]
    fn units_follow_edges() {
        let graph = Graph::from_def(kws_graph()).unwrap();
        let set = find_units(&graph).unwrap();
        assert_eq!(set.units().len(), 2);

        let conv = &set.units()[0];
        assert_eq!(name(&graph, conv.compute), "conv1/Conv2D");
        assert_eq!(name(&graph, conv.weight), "conv1/weights");
        let bias = conv.bias.as_ref().unwrap();
        assert_eq!(name(&graph, bias.add), "conv1/BiasAdd");
        assert_eq!(name(&graph, bias.bias), "conv1/biases");
        assert_eq!(conv.output, TensorRef::new("conv1/BiasAdd", 0));
        assert_eq!(name(&graph, conv.marker), "conv1/act_quant");

        let fc = &set.units()[1];
        assert_eq!(name(&graph, fc.compute), "fc/MatMul");
        assert_eq!(name(&graph, fc.marker), "fc/act_quant");
        assert!(set.by_bias_add(bias.add).is_some());
        assert_eq!(set.producing(&TensorRef::new("fc/add", 0)).unwrap().compute, fc.compute);
    }

    #[test]
    fn unit_without_bias() {
        let mut def = conv_graph();
        // drop the bias-add: the marker reads the conv output directly
        def.nodes.retain(|n| n.name != "conv/BiasAdd" && n.name != "conv/bias");
        for node in &mut def.nodes {
            if node.name == "conv/act_quant" {
                node.inputs[0] = TensorRef::new("conv/Conv2D", 0);
            }
        }
        let graph = Graph::from_def(def).unwrap();
        let set = find_units(&graph).unwrap();
        let unit = &set.units()[0];
        assert!(unit.bias.is_none());
        assert_eq!(unit.output, TensorRef::new("conv/Conv2D", 0));
    }

    #[test]
    fn marker_found_through_relu() {
        let mut def = conv_graph();
        for node in &mut def.nodes {
            if node.name == "conv/act_quant" {
                node.inputs[0] = TensorRef::new("conv/Relu", 0);
            }
        }
        def.push(
            GraphNode::new("conv/Relu", OpKind::Relu)
                .input("conv/BiasAdd", 0)
                .output(&[1, 4, 4, 2], DType::F32),
        );
        let graph = Graph::from_def(def).unwrap();
        let set = find_units(&graph).unwrap();
        assert_eq!(name(&graph, set.units()[0].marker), "conv/act_quant");
    }

    #[test]
    fn missing_marker_rejected() {
        let mut def = conv_graph();
        def.nodes.retain(|n| !n.name.starts_with("conv/act_quant"));
        let graph = Graph::from_def(def).unwrap();
        let err = find_units(&graph).unwrap_err();
        assert!(err.to_string().contains("no quantization marker"), "got: {err}");
    }

    #[test]
    fn non_constant_weight_rejected() {
        let mut def = conv_graph();
        def.push(GraphNode::new("y", OpKind::Placeholder).output(&[2, 3, 3, 1], DType::F32));
        for node in &mut def.nodes {
            if node.name == "conv/Conv2D" {
                node.inputs[1] = TensorRef::new("y", 0);
            }
        }
        let graph = Graph::from_def(def).unwrap();
        let err = find_units(&graph).unwrap_err();
        assert!(err.to_string().contains("not a float constant"), "got: {err}");
    }

    #[test]
    fn add_with_bias_first_fuses() {
        let mut def = kws_graph();
        for node in &mut def.nodes {
            if node.name == "fc/add" {
                node.inputs.swap(0, 1);
            }
        }
        let graph = Graph::from_def(def).unwrap();
        let set = find_units(&graph).unwrap();
        let fc = &set.units()[1];
        let bias = fc.bias.as_ref().unwrap();
        assert_eq!(name(&graph, bias.add), "fc/add");
        assert_eq!(name(&graph, bias.bias), "fc/biases");
        assert_eq!(bias.operand, TensorRef::new("fc/biases", 0));
        assert_eq!(fc.output, TensorRef::new("fc/add", 0));
    }

    #[test]
    fn bias_add_keeps_value_first() {
        let mut def = conv_graph();
        for node in &mut def.nodes {
            if node.name == "conv/BiasAdd" {
                node.inputs.swap(0, 1);
            }
        }
        let graph = Graph::from_def(def).unwrap();
        let err = find_units(&graph).unwrap_err();
        assert_eq!(
            err.to_string(),
            "node 'conv/BiasAdd': bias-add cannot be fused into 'conv/Conv2D'"
        );
    }

    #[test]
    fn add_with_variable_operand_rejected() {
        let mut def = conv_graph();
        def.push(GraphNode::new("y", OpKind::Placeholder).output(&[2], DType::F32));
        for node in &mut def.nodes {
            if node.name == "conv/BiasAdd" {
                node.inputs[1] = TensorRef::new("y", 0);
            }
        }
        let graph = Graph::from_def(def).unwrap();
        let err = find_units(&graph).unwrap_err();
        assert_eq!(
            err.to_string(),
            "node 'conv/BiasAdd': bias-add cannot be fused into 'conv/Conv2D'"
        );
    }
}
