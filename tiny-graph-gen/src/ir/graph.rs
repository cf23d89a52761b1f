//! Core graph types: the deserialized input graph and its indexed view.

use std::cmp::Reverse;
use std::collections::{BTreeMap, BinaryHeap, HashMap};
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

pub type NodeId = usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DType {
    #[serde(rename = "float32")]
    F32,
    #[serde(rename = "int32")]
    I32,
    #[serde(rename = "int8")]
    I8,
    #[serde(rename = "uint8")]
    U8,
}

impl DType {
    pub fn is_float(self) -> bool {
        matches!(self, DType::F32)
    }
}

/// A node output slot, written `node:slot` (a bare `node` means slot 0).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TensorRef {
    pub node: String,
    pub slot: usize,
}

impl TensorRef {
    pub fn new(node: impl Into<String>, slot: usize) -> Self {
        Self {
            node: node.into(),
            slot,
        }
    }
}

impl fmt::Display for TensorRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.node, self.slot)
    }
}

impl FromStr for TensorRef {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        if s.is_empty() || s.starts_with('^') {
            return Err(Error::BadTensorRef(s.to_string()));
        }
        match s.rsplit_once(':') {
            Some((node, slot)) if !node.is_empty() => {
                let slot = slot
                    .parse::<usize>()
                    .map_err(|_| Error::BadTensorRef(s.to_string()))?;
                Ok(TensorRef::new(node, slot))
            }
            Some(_) => Err(Error::BadTensorRef(s.to_string())),
            None => Ok(TensorRef::new(s, 0)),
        }
    }
}

impl TryFrom<String> for TensorRef {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<TensorRef> for String {
    fn from(t: TensorRef) -> String {
        t.to_string()
    }
}

/// Static description of one node output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TensorDesc {
    /// `None` marks an unknown dimension (e.g. the batch axis).
    pub shape: Vec<Option<usize>>,
    pub dtype: DType,
}

impl TensorDesc {
    pub fn new(shape: &[usize], dtype: DType) -> Self {
        Self {
            shape: shape.iter().map(|&d| Some(d)).collect(),
            dtype,
        }
    }

    /// Concrete dims, unknown dimensions read as 1.
    pub fn dims(&self) -> Vec<usize> {
        self.shape.iter().map(|d| d.unwrap_or(1)).collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TensorRole {
    /// Graph input - provided by caller
    Input,
    /// Activation produced by an emitted node
    Variable,
    /// Quantized weights/biases baked into the artifact
    Constant,
}

/// Raw constant payload carried by a `Const` node's `value` attribute.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConstTensor {
    pub dtype: DType,
    #[serde(default)]
    pub shape: Vec<usize>,
    pub values: Vec<f32>,
}

impl ConstTensor {
    pub fn float(shape: &[usize], values: Vec<f32>) -> Self {
        Self {
            dtype: DType::F32,
            shape: shape.to_vec(),
            values,
        }
    }

    pub fn element_count(&self) -> usize {
        self.shape.iter().product()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttrValue {
    Int(i64),
    Float(f64),
    Str(String),
    Ints(Vec<i64>),
    Floats(Vec<f64>),
    Tensor(ConstTensor),
}

impl AttrValue {
    fn kind(&self) -> &'static str {
        match self {
            AttrValue::Int(_) => "int",
            AttrValue::Float(_) => "float",
            AttrValue::Str(_) => "string",
            AttrValue::Ints(_) => "int list",
            AttrValue::Floats(_) => "float list",
            AttrValue::Tensor(_) => "tensor",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum OpKind {
    Placeholder,
    Const,
    Identity,
    Conv2D,
    DepthwiseConv2D,
    MatMul,
    Add,
    BiasAdd,
    MaxPool,
    AvgPool,
    Reshape,
    Relu,
    Softmax,
    /// Fake-quantization boundary (`FakeQuantWithMinMaxVars`/`Args`)
    QuantizationMarker,
    Other(String),
}

impl OpKind {
    /// Map a TensorFlow op type name onto an operator kind.
    pub fn from_tf(name: &str) -> Self {
        match name {
            "Placeholder" => OpKind::Placeholder,
            "Const" => OpKind::Const,
            "Identity" => OpKind::Identity,
            "Conv2D" => OpKind::Conv2D,
            "DepthwiseConv2dNative" | "DepthwiseConv2D" => OpKind::DepthwiseConv2D,
            "MatMul" => OpKind::MatMul,
            "Add" | "AddV2" => OpKind::Add,
            "BiasAdd" => OpKind::BiasAdd,
            "MaxPool" => OpKind::MaxPool,
            "AvgPool" => OpKind::AvgPool,
            "Reshape" => OpKind::Reshape,
            "Relu" => OpKind::Relu,
            "Softmax" => OpKind::Softmax,
            "FakeQuantWithMinMaxVars" | "FakeQuantWithMinMaxArgs" | "QuantizationMarker" => {
                OpKind::QuantizationMarker
            }
            other => OpKind::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            OpKind::Placeholder => "Placeholder",
            OpKind::Const => "Const",
            OpKind::Identity => "Identity",
            OpKind::Conv2D => "Conv2D",
            OpKind::DepthwiseConv2D => "DepthwiseConv2dNative",
            OpKind::MatMul => "MatMul",
            OpKind::Add => "Add",
            OpKind::BiasAdd => "BiasAdd",
            OpKind::MaxPool => "MaxPool",
            OpKind::AvgPool => "AvgPool",
            OpKind::Reshape => "Reshape",
            OpKind::Relu => "Relu",
            OpKind::Softmax => "Softmax",
            OpKind::QuantizationMarker => "FakeQuantWithMinMaxVars",
            OpKind::Other(name) => name,
        }
    }

    /// Conv/matmul nodes that can absorb a following bias-add.
    pub fn is_compute(&self) -> bool {
        matches!(
            self,
            OpKind::Conv2D | OpKind::DepthwiseConv2D | OpKind::MatMul
        )
    }

    pub fn is_bias_add(&self) -> bool {
        matches!(self, OpKind::Add | OpKind::BiasAdd)
    }

    /// Nodes whose output is their first input under another name.
    pub fn is_alias(&self) -> bool {
        matches!(self, OpKind::Identity | OpKind::QuantizationMarker)
    }

    /// Ops whose output keeps the fixed-point format of their first input.
    pub fn is_scale_preserving(&self) -> bool {
        matches!(
            self,
            OpKind::Identity
                | OpKind::Relu
                | OpKind::MaxPool
                | OpKind::AvgPool
                | OpKind::Reshape
        )
    }
}

impl From<String> for OpKind {
    fn from(s: String) -> Self {
        OpKind::from_tf(&s)
    }
}

impl From<OpKind> for String {
    fn from(op: OpKind) -> String {
        op.as_str().to_string()
    }
}

impl fmt::Display for OpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphNode {
    pub name: String,
    pub op: OpKind,
    #[serde(default)]
    pub inputs: Vec<TensorRef>,
    #[serde(default)]
    pub outputs: Vec<TensorDesc>,
    #[serde(default)]
    pub attrs: BTreeMap<String, AttrValue>,
}

impl GraphNode {
    pub fn new(name: impl Into<String>, op: OpKind) -> Self {
        Self {
            name: name.into(),
            op,
            inputs: Vec::new(),
            outputs: Vec::new(),
            attrs: BTreeMap::new(),
        }
    }

    /// A float `Const` node holding `values` with the given shape.
    pub fn constant(name: impl Into<String>, shape: &[usize], values: Vec<f32>) -> Self {
        GraphNode::new(name, OpKind::Const)
            .output(shape, DType::F32)
            .attr("value", AttrValue::Tensor(ConstTensor::float(shape, values)))
    }

    pub fn input(mut self, node: &str, slot: usize) -> Self {
        self.inputs.push(TensorRef::new(node, slot));
        self
    }

    pub fn output(mut self, shape: &[usize], dtype: DType) -> Self {
        self.outputs.push(TensorDesc::new(shape, dtype));
        self
    }

    pub fn output_desc(mut self, desc: TensorDesc) -> Self {
        self.outputs.push(desc);
        self
    }

    pub fn attr(mut self, key: &str, value: AttrValue) -> Self {
        self.attrs.insert(key.to_string(), value);
        self
    }

    pub fn output_ref(&self, slot: usize) -> TensorRef {
        TensorRef::new(self.name.clone(), slot)
    }

    pub fn attr_ints(&self, key: &str) -> Result<&[i64]> {
        match self.attrs.get(key) {
            Some(AttrValue::Ints(v)) => Ok(v),
            Some(other) => Err(Error::invalid_attr(
                &self.name,
                key,
                format!("expected int list, found {}", other.kind()),
            )),
            None => Err(Error::missing_attr(&self.name, key)),
        }
    }

    pub fn attr_str(&self, key: &str) -> Result<Option<&str>> {
        match self.attrs.get(key) {
            Some(AttrValue::Str(s)) => Ok(Some(s)),
            Some(other) => Err(Error::invalid_attr(
                &self.name,
                key,
                format!("expected string, found {}", other.kind()),
            )),
            None => Ok(None),
        }
    }

    pub fn attr_f64(&self, key: &str) -> Result<Option<f64>> {
        match self.attrs.get(key) {
            Some(AttrValue::Float(v)) => Ok(Some(*v)),
            Some(AttrValue::Int(v)) => Ok(Some(*v as f64)),
            Some(other) => Err(Error::invalid_attr(
                &self.name,
                key,
                format!("expected number, found {}", other.kind()),
            )),
            None => Ok(None),
        }
    }

    /// The `value` payload of a `Const` node.
    pub fn const_value(&self) -> Result<&ConstTensor> {
        match self.attrs.get("value") {
            Some(AttrValue::Tensor(t)) => Ok(t),
            Some(other) => Err(Error::invalid_attr(
                &self.name,
                "value",
                format!("expected tensor, found {}", other.kind()),
            )),
            None => Err(Error::missing_attr(&self.name, "value")),
        }
    }
}

/// A deserialized graph as handed over by a graph loader.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphDef {
    #[serde(default)]
    pub name: Option<String>,
    pub nodes: Vec<GraphNode>,
}

impl GraphDef {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, node: GraphNode) -> &mut Self {
        self.nodes.push(node);
        self
    }
}

/// Validated, topologically ordered graph with producer/consumer lookups.
#[derive(Debug)]
pub struct Graph {
    pub name: Option<String>,
    nodes: Vec<GraphNode>,
    index: HashMap<String, NodeId>,
    /// consumers[node][slot] = consuming nodes in graph order
    consumers: Vec<Vec<Vec<NodeId>>>,
}

impl Graph {
    /// Validate a `GraphDef` and index it.
    ///
    /// Nodes are reordered into a stable topological order (ties keep the
    /// declaration order), so downstream passes never depend on how the
    /// loader happened to list them.
    pub fn from_def(def: GraphDef) -> Result<Self> {
        let mut nodes = def.nodes;

        for node in &mut nodes {
            if node.op == OpKind::Const {
                let value = node.const_value()?;
                let expected = value.element_count();
                if value.values.len() != expected {
                    return Err(Error::invalid_attr(
                        &node.name,
                        "value",
                        format!(
                            "shape {:?} needs {} values, found {}",
                            value.shape,
                            expected,
                            value.values.len()
                        ),
                    ));
                }
                if node.outputs.is_empty() {
                    let desc = TensorDesc::new(&value.shape, value.dtype);
                    node.outputs.push(desc);
                }
            }
        }

        let mut index = HashMap::with_capacity(nodes.len());
        for (id, node) in nodes.iter().enumerate() {
            if index.insert(node.name.clone(), id).is_some() {
                return Err(Error::DuplicateNode(node.name.clone()));
            }
        }

        for node in &nodes {
            for input in &node.inputs {
                let valid = index
                    .get(&input.node)
                    .map(|&p| input.slot < nodes[p].outputs.len())
                    .unwrap_or(false);
                if !valid {
                    return Err(Error::DanglingInput {
                        node: node.name.clone(),
                        input: input.to_string(),
                    });
                }
            }
        }

        let order = topo_order(&nodes, &index)?;
        let mut slots: Vec<Option<GraphNode>> = nodes.into_iter().map(Some).collect();
        let nodes: Vec<GraphNode> = order
            .iter()
            .filter_map(|&old| slots[old].take())
            .collect();
        let index: HashMap<String, NodeId> = nodes
            .iter()
            .enumerate()
            .map(|(id, n)| (n.name.clone(), id))
            .collect();

        let mut consumers: Vec<Vec<Vec<NodeId>>> = nodes
            .iter()
            .map(|n| vec![Vec::new(); n.outputs.len()])
            .collect();
        for (id, node) in nodes.iter().enumerate() {
            for input in &node.inputs {
                let list = &mut consumers[index[&input.node]][input.slot];
                if !list.contains(&id) {
                    list.push(id);
                }
            }
        }

        Ok(Self {
            name: def.name,
            nodes,
            index,
            consumers,
        })
    }

    pub fn nodes(&self) -> &[GraphNode] {
        &self.nodes
    }

    pub fn node(&self, id: NodeId) -> &GraphNode {
        &self.nodes[id]
    }

    pub fn id_of(&self, name: &str) -> Option<NodeId> {
        self.index.get(name).copied()
    }

    /// Producer of a tensor. Every input of a validated graph has one.
    pub fn producer(&self, t: &TensorRef) -> NodeId {
        self.index[&t.node]
    }

    pub fn producer_node(&self, t: &TensorRef) -> &GraphNode {
        self.node(self.producer(t))
    }

    pub fn consumers(&self, t: &TensorRef) -> &[NodeId] {
        &self.consumers[self.producer(t)][t.slot]
    }

    pub fn tensor_desc(&self, t: &TensorRef) -> &TensorDesc {
        &self.producer_node(t).outputs[t.slot]
    }

    /// Follow Identity and quantization-marker nodes back to the tensor they forward.
    pub fn resolve_alias(&self, t: &TensorRef) -> TensorRef {
        let mut current = t.clone();
        loop {
            let producer = self.producer_node(&current);
            match producer.inputs.first() {
                Some(first) if producer.op.is_alias() => current = first.clone(),
                _ => return current,
            }
        }
    }

    /// Role of an already alias-resolved tensor.
    pub fn role(&self, t: &TensorRef) -> TensorRole {
        match self.producer_node(t).op {
            OpKind::Placeholder => TensorRole::Input,
            OpKind::Const => TensorRole::Constant,
            _ => TensorRole::Variable,
        }
    }
}

fn topo_order(nodes: &[GraphNode], index: &HashMap<String, NodeId>) -> Result<Vec<NodeId>> {
    let mut pending: Vec<usize> = vec![0; nodes.len()];
    let mut users: Vec<Vec<NodeId>> = vec![Vec::new(); nodes.len()];
    for (id, node) in nodes.iter().enumerate() {
        for input in &node.inputs {
            let producer = index[&input.node];
            pending[id] += 1;
            users[producer].push(id);
        }
    }

    let mut ready: BinaryHeap<Reverse<NodeId>> = pending
        .iter()
        .enumerate()
        .filter(|(_, &count)| count == 0)
        .map(|(id, _)| Reverse(id))
        .collect();
    let mut order = Vec::with_capacity(nodes.len());
    while let Some(Reverse(id)) = ready.pop() {
        order.push(id);
        for &user in &users[id] {
            pending[user] -= 1;
            if pending[user] == 0 {
                ready.push(Reverse(user));
            }
        }
    }

    if order.len() != nodes.len() {
        let stuck = pending
            .iter()
            .position(|&count| count > 0)
            .map(|id| nodes[id].name.as_str())
            .unwrap_or("?");
        return Err(Error::topology(stuck, "graph contains a cycle"));
    }
    Ok(order)
}
