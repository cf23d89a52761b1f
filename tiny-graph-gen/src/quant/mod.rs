//! Symmetric INT8 fixed-point quantization.
//!
//! A tensor with dynamic range `max(|min|, |max|)` is stored as Q(int_bits).(frac_bits)
//! with `1 + int_bits + frac_bits = 8`: `int_bits = ceil(log2(range))` and each value
//! becomes `round(v * 2^frac_bits)`. Rounding is half away from zero.

pub mod shift;

use std::collections::HashMap;

use crate::config::{OverflowPolicy, QuantConfig};
use crate::error::{Error, Result};
use crate::ir::{Graph, GraphNode, OpKind};

/// Magnitude bits of a signed 8-bit value.
pub const Q7_BITS: i32 = 7;

#[derive(Debug, Clone, PartialEq)]
pub struct QuantizedTensor {
    /// Name of the `Const` node the data came from.
    pub node: String,
    pub int_bits: i32,
    pub frac_bits: i32,
    pub shape: Vec<usize>,
    pub data: Vec<i8>,
    /// Values saturated under `OverflowPolicy::Clamp`.
    pub clamped: usize,
}

impl QuantizedTensor {
    pub fn dequantize(&self) -> Vec<f32> {
        let scale = (-self.frac_bits as f64).exp2();
        self.data.iter().map(|&q| (q as f64 * scale) as f32).collect()
    }
}

/// Output format declared by a quantization marker.
#[derive(Debug, Clone, PartialEq)]
pub struct MarkerFormat {
    pub node: String,
    pub min: f64,
    pub max: f64,
    pub frac_bits: i32,
}

/// Integer bits needed to hold `max_abs`. A zero range uses 0 instead of `log2(0)`.
pub fn int_bits_for(max_abs: f64) -> i32 {
    if max_abs == 0.0 {
        0
    } else {
        max_abs.log2().ceil() as i32
    }
}

/// Fractional bits for a marker's `[min, max]` range.
pub fn frac_bits_for_range(min: f64, max: f64) -> i32 {
    Q7_BITS - int_bits_for(min.abs().max(max.abs()))
}

/// Quantize one constant tensor.
pub fn quantize(node: &str, shape: &[usize], values: &[f32], config: &QuantConfig) -> Result<QuantizedTensor> {
    if values.is_empty() {
        return Err(Error::EmptyTensor {
            node: node.to_string(),
        });
    }
    if let Some(index) = values.iter().position(|v| !v.is_finite()) {
        return Err(Error::NonFinite {
            node: node.to_string(),
            index,
        });
    }

    let max_abs = values
        .iter()
        .fold(0.0f64, |acc, &v| acc.max((v as f64).abs()));
    let mut int_bits = int_bits_for(max_abs);
    let mut scaled = scale_values(values, Q7_BITS - int_bits);

    if config.widen_on_overflow && first_overflow(&scaled).is_some() {
        int_bits += 1;
        scaled = scale_values(values, Q7_BITS - int_bits);
    }
    let frac_bits = Q7_BITS - int_bits;

    let mut clamped = 0;
    let mut data = Vec::with_capacity(scaled.len());
    for (index, &q) in scaled.iter().enumerate() {
        if (i8::MIN as f64..=i8::MAX as f64).contains(&q) {
            data.push(q as i8);
            continue;
        }
        match config.overflow {
            OverflowPolicy::Error => {
                return Err(Error::Overflow {
                    node: node.to_string(),
                    index,
                    value: values[index],
                    frac_bits,
                })
            }
            OverflowPolicy::Clamp => {
                if clamped == 0 {
                    log::warn!(
                        "{node}: value {} at index {index} saturates int8 with {frac_bits} fractional bits",
                        values[index]
                    );
                }
                clamped += 1;
                data.push(q.clamp(i8::MIN as f64, i8::MAX as f64) as i8);
            }
        }
    }
    if clamped > 1 {
        log::warn!("{node}: {clamped} values clamped in total");
    }

    log::debug!("{node}: int_bits = {int_bits}, frac_bits = {frac_bits}, {} values", data.len());

    Ok(QuantizedTensor {
        node: node.to_string(),
        int_bits,
        frac_bits,
        shape: shape.to_vec(),
        data,
        clamped,
    })
}

fn scale_values(values: &[f32], frac_bits: i32) -> Vec<f64> {
    let scale = (frac_bits as f64).exp2();
    values.iter().map(|&v| (v as f64 * scale).round()).collect()
}

fn first_overflow(scaled: &[f64]) -> Option<usize> {
    scaled
        .iter()
        .position(|&q| q < i8::MIN as f64 || q > i8::MAX as f64)
}

/// Quantized constants and marker formats for a whole graph.
#[derive(Debug, Default)]
pub struct QuantTable {
    tensors: Vec<QuantizedTensor>,
    by_node: HashMap<String, usize>,
    markers: HashMap<String, MarkerFormat>,
}

impl QuantTable {
    /// Quantized constants in graph order.
    pub fn tensors(&self) -> &[QuantizedTensor] {
        &self.tensors
    }

    pub fn get(&self, const_node: &str) -> Option<&QuantizedTensor> {
        self.by_node.get(const_node).map(|&i| &self.tensors[i])
    }

    pub fn marker(&self, marker_node: &str) -> Option<&MarkerFormat> {
        self.markers.get(marker_node)
    }
}

/// Quantize every float constant of the graph and read every marker's range.
///
/// Constants that only feed a marker's min/max slots describe a range, not
/// weight data, and are not stored. Integer constants (reshape targets) are
/// left alone.
pub fn quantize_graph(graph: &Graph, config: &QuantConfig) -> Result<QuantTable> {
    let mut table = QuantTable::default();
    let mut range_consts: Vec<&str> = Vec::new();

    for node in graph.nodes() {
        if node.op != OpKind::QuantizationMarker {
            continue;
        }
        let format = marker_format(graph, node)?;
        log::debug!(
            "{}: marker range [{}, {}] -> frac_bits = {}",
            node.name,
            format.min,
            format.max,
            format.frac_bits
        );
        for input in node.inputs.iter().skip(1) {
            let source = graph.resolve_alias(input);
            range_consts.push(graph.producer_node(&source).name.as_str());
        }
        table.markers.insert(node.name.clone(), format);
    }

    for node in graph.nodes() {
        if node.op != OpKind::Const || range_consts.contains(&node.name.as_str()) {
            continue;
        }
        let value = node.const_value()?;
        if !value.dtype.is_float() {
            log::debug!("{}: {:?} constant left unquantized", node.name, value.dtype);
            continue;
        }
        let quantized = quantize(&node.name, &value.shape, &value.values, config)?;
        table.by_node.insert(node.name.clone(), table.tensors.len());
        table.tensors.push(quantized);
    }

    log::info!(
        "quantized {} constants, {} quantization markers",
        table.tensors.len(),
        table.markers.len()
    );
    Ok(table)
}

fn marker_format(graph: &Graph, node: &GraphNode) -> Result<MarkerFormat> {
    let (min, max) = if node.inputs.len() >= 3 {
        let min = range_const(graph, node, 1, "min")?;
        let max = range_const(graph, node, 2, "max")?;
        (
            min.iter().copied().fold(f64::INFINITY, f64::min),
            max.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        )
    } else {
        let min = node
            .attr_f64("min")?
            .ok_or_else(|| Error::missing_attr(&node.name, "min"))?;
        let max = node
            .attr_f64("max")?
            .ok_or_else(|| Error::missing_attr(&node.name, "max"))?;
        (min, max)
    };

    if !min.is_finite() || !max.is_finite() || min > max {
        return Err(Error::invalid_attr(
            &node.name,
            "min/max",
            format!("invalid range [{min}, {max}]"),
        ));
    }

    Ok(MarkerFormat {
        node: node.name.clone(),
        min,
        max,
        frac_bits: frac_bits_for_range(min, max),
    })
}

fn range_const(graph: &Graph, marker: &GraphNode, slot: usize, what: &str) -> Result<Vec<f64>> {
    let source = graph.resolve_alias(&marker.inputs[slot]);
    let producer = graph.producer_node(&source);
    if producer.op != OpKind::Const {
        return Err(Error::topology(
            &marker.name,
            format!("{what} input '{}' is not a constant", marker.inputs[slot]),
        ));
    }
    let value = producer.const_value()?;
    if value.values.is_empty() {
        return Err(Error::EmptyTensor {
            node: producer.name.clone(),
        });
    }
    Ok(value.values.iter().map(|&v| v as f64).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{AttrValue, DType, GraphDef};

    fn q(values: &[f32]) -> QuantizedTensor {
        quantize("t", &[values.len()], values, &QuantConfig::default()).unwrap()
    }

    #[test]
    fn unit_range_widens_to_one_int_bit() {
        let t = q(&[-1.0, 0.5, 1.0]);
        assert_eq!(t.int_bits, 1);
        assert_eq!(t.frac_bits, 6);
        assert_eq!(t.data, vec![-64, 32, 64]);
        assert_eq!(t.clamped, 0);
    }

    #[test]
    fn negative_power_of_two_fits_without_widening() {
        let t = q(&[-1.0, 0.25]);
        assert_eq!(t.int_bits, 0);
        assert_eq!(t.data, vec![-128, 32]);
    }

    #[test]
    fn small_ranges_get_more_fractional_bits() {
        // max 0.01 -> ceil(log2(0.01)) = -6 -> 13 fractional bits
        let t = q(&[0.01, -0.005]);
        assert_eq!(t.int_bits, -6);
        assert_eq!(t.frac_bits, 13);
        assert_eq!(t.data, vec![82, -41]);
    }

    #[test]
    fn large_ranges_get_negative_fractional_bits() {
        let t = q(&[300.0, -20.0]);
        assert_eq!(t.int_bits, 9);
        assert_eq!(t.frac_bits, -2);
        assert_eq!(t.data, vec![75, -5]);
    }

    #[test]
    fn zero_tensor_uses_zero_int_bits() {
        let t = q(&[0.0, 0.0, -0.0]);
        assert_eq!(t.int_bits, 0);
        assert_eq!(t.frac_bits, 7);
        assert_eq!(t.data, vec![0, 0, 0]);
    }

    #[test]
    fn ties_round_away_from_zero() {
        // frac_bits = 6 for range 1.5: 0.5/64 steps
        let t = q(&[1.5, 1.0 / 128.0, -1.0 / 128.0]);
        assert_eq!(t.frac_bits, 6);
        assert_eq!(t.data[1], 1);
        assert_eq!(t.data[2], -1);
    }

    #[test]
    fn values_within_half_a_step() {
        let values: Vec<f32> = (0..200).map(|i| ((i as f32) * 0.37).sin() * 3.3).collect();
        let t = q(&values);
        let step = (-t.frac_bits as f64).exp2();
        for (orig, back) in values.iter().zip(t.dequantize()) {
            assert!(((*orig as f64) - back as f64).abs() <= 0.5 * step + 1e-9);
        }
        let max_abs = values.iter().fold(0.0f32, |a, v| a.max(v.abs())) as f64;
        assert!(max_abs <= (t.int_bits as f64).exp2());
        assert!(max_abs > ((t.int_bits - 1) as f64).exp2());
    }

    #[test]
    fn overflow_clamps_without_widening() {
        let config = QuantConfig {
            widen_on_overflow: false,
            overflow: OverflowPolicy::Clamp,
        };
        let t = quantize("w", &[2], &[1.0, -0.5], &config).unwrap();
        assert_eq!(t.int_bits, 0);
        assert_eq!(t.data, vec![127, -64]);
        assert_eq!(t.clamped, 1);
    }

    #[test]
    fn overflow_errors_when_strict() {
        let config = QuantConfig {
            widen_on_overflow: false,
            overflow: OverflowPolicy::Error,
        };
        let err = quantize("conv/w", &[2], &[0.25, 1.0], &config).unwrap_err();
        match err {
            Error::Overflow { node, index, frac_bits, .. } => {
                assert_eq!(node, "conv/w");
                assert_eq!(index, 1);
                assert_eq!(frac_bits, 7);
            }
            other => panic!("expected overflow, got {other:?}"),
        }
    }

    #[test]
    fn non_finite_and_empty_rejected() {
        let config = QuantConfig::default();
        assert!(matches!(
            quantize("w", &[2], &[1.0, f32::NAN], &config),
            Err(Error::NonFinite { index: 1, .. })
        ));
        assert!(matches!(
            quantize("w", &[0], &[], &config),
            Err(Error::EmptyTensor { .. })
        ));
    }

    #[test]
    fn marker_range_formats() {
        assert_eq!(frac_bits_for_range(-8.0, 8.0), 4);
        assert_eq!(frac_bits_for_range(-3.0, 2.0), 5);
        assert_eq!(frac_bits_for_range(0.0, 0.0), 7);
    }

    #[test]
    fn graph_skips_marker_ranges_and_int_constants() {
        let mut def = GraphDef::new();
        def.push(GraphNode::new("x", OpKind::Placeholder).output(&[1, 4], DType::F32))
            .push(GraphNode::constant("act_quant/min", &[], vec![-4.0]))
            .push(GraphNode::constant("act_quant/max", &[], vec![4.0]))
            .push(
                GraphNode::new("act_quant", OpKind::QuantizationMarker)
                    .input("x", 0)
                    .input("act_quant/min", 0)
                    .input("act_quant/max", 0)
                    .output(&[1, 4], DType::F32),
            )
            .push(GraphNode::new("shape", OpKind::Const).attr(
                "value",
                AttrValue::Tensor(crate::ir::ConstTensor {
                    dtype: DType::I32,
                    shape: vec![2],
                    values: vec![1.0, 4.0],
                }),
            ))
            .push(GraphNode::constant("w", &[2], vec![0.5, -0.25]));
        let graph = Graph::from_def(def).unwrap();
        let table = quantize_graph(&graph, &QuantConfig::default()).unwrap();

        let names: Vec<&str> = table.tensors().iter().map(|t| t.node.as_str()).collect();
        assert_eq!(names, vec!["w"]);
        assert_eq!(table.marker("act_quant").unwrap().frac_bits, 5);
    }

    #[test]
    fn marker_range_from_attributes() {
        let mut def = GraphDef::new();
        def.push(GraphNode::new("x", OpKind::Placeholder).output(&[4], DType::F32))
            .push(
                GraphNode::new("fq", OpKind::QuantizationMarker)
                    .input("x", 0)
                    .attr("min", AttrValue::Float(-2.0))
                    .attr("max", AttrValue::Float(2.0))
                    .output(&[4], DType::F32),
            );
        let graph = Graph::from_def(def).unwrap();
        let table = quantize_graph(&graph, &QuantConfig::default()).unwrap();
        assert_eq!(table.marker("fq").unwrap().frac_bits, 6);
    }

    #[test]
    fn marker_without_range_rejected() {
        let mut def = GraphDef::new();
        def.push(GraphNode::new("x", OpKind::Placeholder).output(&[4], DType::F32))
            .push(
                GraphNode::new("fq", OpKind::QuantizationMarker)
                    .input("x", 0)
                    .output(&[4], DType::F32),
            );
        let graph = Graph::from_def(def).unwrap();
        let err = quantize_graph(&graph, &QuantConfig::default()).unwrap_err();
        assert_eq!(err.to_string(), "node 'fq': missing attribute 'min'");
    }
}
