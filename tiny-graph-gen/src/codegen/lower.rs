use std::collections::BTreeSet;

use crate::config::GenConfig;
use crate::error::{Error, Result};
use crate::ir::{
    ConvParam, DataLayout, FilterLayout, Graph, GraphNode, NodeId, OpKind, OpParam, PadMode,
    PoolMethod, PoolParam, TensorRef, TensorRole, TinyOp,
};

use super::plan::*;
use super::Analysis;

/// Where a node stands in the single linearization pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NodeState {
    Pending,
    /// Bias-add absorbed by the compute node before it.
    FusedIntoPrior,
    /// Graph input, constant or alias: never a runtime node.
    Skipped,
    Emitted,
}

/**
 * Linearize an analysed graph into an ArtifactPlan.
 */
pub fn linearize(graph: &Graph, analysis: &Analysis, config: &GenConfig) -> Result<ArtifactPlan> {
    let layout = match config.layout {
        Some(layout) => layout,
        None => detect_layout(graph)?,
    };

    let mut lowering = Lowering {
        graph,
        analysis,
        layout,
        filter_layout: config.filter_layout,
        tensors: Vec::new(),
        used_consts: BTreeSet::new(),
    };
    let (params, nodes) = lowering.lower_nodes()?;
    if nodes.is_empty() {
        return Err(Error::EmptyGraph);
    }

    let constants = lowering.constants();
    let shifts = analysis
        .shifts
        .bindings()
        .iter()
        .map(|b| ShiftDef {
            symbol: b.symbol.clone(),
            value: b.value,
        })
        .collect();

    log::info!(
        "linearized {} nodes, {} tensors, {} parameter records ({layout})",
        nodes.len(),
        lowering.tensors.len(),
        params.len()
    );

    Ok(ArtifactPlan {
        meta: GraphMeta {
            name: config.graph_name.clone(),
            nn_id: config.nn_id,
            create_date: config.resolved_create_date(),
            layout,
            header: config.header.clone(),
        },
        constants,
        shifts,
        tensors: lowering.tensors,
        params,
        nodes,
    })
}

/// Layout declared by the conv/pool `data_format` attributes, NHWC when none is.
pub fn detect_layout(graph: &Graph) -> Result<DataLayout> {
    let mut found: Option<(DataLayout, &str)> = None;
    for node in graph.nodes() {
        let spatial = node.op.is_compute() || matches!(node.op, OpKind::MaxPool | OpKind::AvgPool);
        if !spatial {
            continue;
        }
        let Some(layout) = DataLayout::of_node(node)? else {
            continue;
        };
        match found {
            None => found = Some((layout, node.name.as_str())),
            Some((first, first_node)) if first != layout => {
                return Err(Error::MixedLayout {
                    first: first.to_string(),
                    first_node: first_node.to_string(),
                    second: layout.to_string(),
                    second_node: node.name.clone(),
                })
            }
            Some(_) => {}
        }
    }
    Ok(found.map(|(layout, _)| layout).unwrap_or_default())
}

struct Lowering<'a> {
    graph: &'a Graph,
    analysis: &'a Analysis,
    layout: DataLayout,
    filter_layout: FilterLayout,
    tensors: Vec<TensorRecord>,
    used_consts: BTreeSet<NodeId>,
}

impl<'a> Lowering<'a> {
    fn lower_nodes(&mut self) -> Result<(Vec<ParamRecord>, Vec<NodeRecord>)> {
        let graph = self.graph;
        let analysis = self.analysis;
        let units = &analysis.units;
        let symbols = &analysis.symbols;

        let mut state = vec![NodeState::Pending; graph.nodes().len()];
        let mut params = Vec::new();
        let mut nodes = Vec::new();

        for (id, node) in graph.nodes().iter().enumerate() {
            if state[id] != NodeState::Pending {
                continue;
            }
            match node.op {
                OpKind::Placeholder | OpKind::Const | OpKind::Identity | OpKind::QuantizationMarker => {
                    state[id] = NodeState::Skipped;
                    continue;
                }
                ref op if op.is_bias_add() => {
                    return Err(Error::topology(
                        &node.name,
                        "bias-add does not follow a conv/matmul it can be fused into",
                    ));
                }
                _ => {}
            }

            let op = TinyOp::from_kind(node)?;
            if node.outputs.len() != 1 {
                return Err(Error::topology(
                    &node.name,
                    format!("expected 1 output, found {}", node.outputs.len()),
                ));
            }

            let (operands, output) = match units.by_compute(id) {
                Some(unit) => {
                    let mut operands = vec![unit.data.clone(), node.inputs[1].clone()];
                    if let Some(fused) = &unit.bias {
                        operands.push(fused.operand.clone());
                        state[fused.add] = NodeState::FusedIntoPrior;
                    }
                    (operands, unit.output.clone())
                }
                None if node.op == OpKind::Reshape => {
                    let data = node.inputs.first().cloned().ok_or_else(|| {
                        Error::topology(&node.name, "reshape has no data input")
                    })?;
                    (vec![data], node.output_ref(0))
                }
                None => (node.inputs.clone(), node.output_ref(0)),
            };
            if operands.is_empty() {
                return Err(Error::topology(&node.name, "node has no inputs"));
            }

            let mut inputs = Vec::with_capacity(operands.len());
            for operand in &operands {
                let resolved = graph.resolve_alias(operand);
                inputs.push(self.record_tensor(&resolved)?);
            }
            let output = self.record_tensor(&output)?;

            let param = match self.param_for(node, op)? {
                Some(param) => {
                    let symbol = symbols.param(&node.name);
                    params.push(ParamRecord {
                        symbol: symbol.clone(),
                        param,
                    });
                    Some(symbol)
                }
                None => None,
            };

            log::debug!(
                "node {}: {} [{}] -> {}",
                node.name,
                op.c_tag(),
                inputs.join(", "),
                output
            );
            nodes.push(NodeRecord {
                symbol: symbols.node_record(&node.name),
                source: node.name.clone(),
                op,
                param,
                inputs,
                output,
            });
            state[id] = NodeState::Emitted;
        }

        Ok((params, nodes))
    }

    /// Record symbol for an alias-resolved tensor, creating the record on first reference.
    fn record_tensor(&mut self, t: &TensorRef) -> Result<String> {
        if let Some(existing) = self.tensors.iter().find(|r| &r.source == t) {
            return Ok(existing.symbol.clone());
        }

        let graph = self.graph;
        let analysis = self.analysis;
        let symbols = &analysis.symbols;
        let symbol = symbols.tensor(t);

        let mut dims = graph.tensor_desc(t).dims();
        if dims.len() > MAX_DIMS {
            return Err(Error::TooManyDims {
                tensor: t.to_string(),
                rank: dims.len(),
                max: MAX_DIMS,
            });
        }
        if dims.is_empty() {
            dims.push(1);
        }

        let role = graph.role(t);
        let producer = graph.producer(t);
        let (shift, data) = match role {
            TensorRole::Input => (ShiftRef::Zero, None),
            TensorRole::Constant => {
                let binding = analysis
                    .shifts
                    .for_node(producer)
                    .ok_or_else(|| Error::MissingShift {
                        tensor: t.to_string(),
                    })?;
                self.used_consts.insert(producer);
                let name = &graph.node(producer).name;
                (
                    ShiftRef::Symbol(binding.symbol.clone()),
                    Some(symbols.data_array(name)),
                )
            }
            TensorRole::Variable => (self.variable_shift(producer, t)?, None),
        };

        self.tensors.push(TensorRecord {
            symbol: symbol.clone(),
            source: t.clone(),
            dims,
            shift,
            role,
            data,
        });
        Ok(symbol)
    }

    /// Compute-unit outputs carry the unit's output shift; every other activation 0.
    fn variable_shift(&self, producer: NodeId, t: &TensorRef) -> Result<ShiftRef> {
        let units = &self.analysis.units;
        let unit = units
            .by_compute(producer)
            .or_else(|| units.by_bias_add(producer));
        match unit {
            Some(unit) => self
                .analysis
                .shifts
                .for_node(unit.compute)
                .map(|b| ShiftRef::Symbol(b.symbol.clone()))
                .ok_or_else(|| Error::MissingShift {
                    tensor: t.to_string(),
                }),
            None => Ok(ShiftRef::Zero),
        }
    }

    fn param_for(&self, node: &GraphNode, op: TinyOp) -> Result<Option<OpParam>> {
        Ok(match op {
            TinyOp::Pool => Some(OpParam::Pool(self.pool_param(node)?)),
            TinyOp::Conv | TinyOp::DwConv => Some(OpParam::Conv(self.conv_param(node)?)),
            TinyOp::Fc | TinyOp::Relu | TinyOp::Softmax | TinyOp::Reshape => None,
        })
    }

    fn pool_param(&self, node: &GraphNode) -> Result<PoolParam> {
        let (kernel_h, kernel_w) = self.spatial_pair(node, "ksize")?;
        let (stride_h, stride_w) = self.spatial_pair(node, "strides")?;
        let method = match node.op {
            OpKind::AvgPool => PoolMethod::Avg,
            _ => PoolMethod::Max,
        };
        Ok(PoolParam {
            kernel_h,
            kernel_w,
            stride_h,
            stride_w,
            pad: PadMode::from_attr(node.attr_str("padding")?),
            method,
        })
    }

    fn conv_param(&self, node: &GraphNode) -> Result<ConvParam> {
        if node.attrs.contains_key("dilations") {
            let dilations = node.attr_ints("dilations")?;
            if dilations.iter().any(|&d| d != 1) {
                return Err(Error::invalid_attr(
                    &node.name,
                    "dilations",
                    format!("non-unit dilations {dilations:?} are not supported"),
                ));
            }
        }

        let weight = self.graph.resolve_alias(&node.inputs[1]);
        let shape = self.graph.tensor_desc(&weight).dims();
        if shape.len() != 4 {
            return Err(Error::topology(
                &node.name,
                format!("weight '{weight}' must be 4-D, found shape {shape:?}"),
            ));
        }
        let (kh, kw) = self.filter_layout.kernel_axes(self.layout);
        let (stride_h, stride_w) = self.spatial_pair(node, "strides")?;

        Ok(ConvParam {
            kernel_h: shape[kh],
            kernel_w: shape[kw],
            stride_h,
            stride_w,
            pad: PadMode::from_attr(node.attr_str("padding")?),
            activation: -1,
        })
    }

    /// (h, w) entries of a 4-element `ksize`/`strides` list for the graph layout.
    fn spatial_pair(&self, node: &GraphNode, attr: &str) -> Result<(usize, usize)> {
        let values = node.attr_ints(attr)?;
        if values.len() != 4 {
            return Err(Error::invalid_attr(
                &node.name,
                attr,
                format!("expected 4 values, found {}", values.len()),
            ));
        }
        let (h, w) = self.layout.spatial_axes();
        let positive = |v: i64| {
            usize::try_from(v)
                .ok()
                .filter(|&v| v > 0)
                .ok_or_else(|| Error::invalid_attr(&node.name, attr, format!("{values:?} has a non-positive entry")))
        };
        Ok((positive(values[h])?, positive(values[w])?))
    }

    /// Quantized data of every constant referenced by a tensor record, in graph order.
    fn constants(&self) -> Vec<ConstData> {
        let symbols = &self.analysis.symbols;
        self.used_consts
            .iter()
            .filter_map(|&id| {
                let name = &self.graph.node(id).name;
                self.analysis.quant.get(name).map(|q| ConstData {
                    define: symbols.data_define(name),
                    array: symbols.data_array(name),
                    source: name.clone(),
                    values: q.data.clone(),
                })
            })
            .collect()
    }
}
