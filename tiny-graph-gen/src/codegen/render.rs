//! Renders an `ArtifactPlan` as a C translation unit for the tiny runtime.
//!
//! Sections are written in dependency order so every symbol is defined
//! before it is referenced; no forward declarations are needed.

use std::io::{self, Write};

use crate::error::Result;
use crate::ir::{OpParam, TensorRole};

use super::plan::*;

/// Values per `#define NAME_DATA` line before a continuation.
const DATA_VALUES_PER_LINE: usize = 20;
/// Entries per `node_list` line.
const NODES_PER_LINE: usize = 5;

pub fn render<W: Write>(plan: &ArtifactPlan, out: &mut W) -> io::Result<()> {
    render_preamble(plan, out)?;
    render_data_defines(plan, out)?;
    render_shift_defines(plan, out)?;
    render_data_arrays(plan, out)?;
    render_tensors(plan, out)?;
    render_params(plan, out)?;
    render_nodes(plan, out)?;
    render_node_list(plan, out)?;
    render_graph(plan, out)
}

pub fn render_to_string(plan: &ArtifactPlan) -> Result<String> {
    let mut buf = Vec::new();
    render(plan, &mut buf)?;
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

// ---------------------------------------------------------------------------
// Preamble
// ---------------------------------------------------------------------------

fn render_preamble<W: Write>(plan: &ArtifactPlan, out: &mut W) -> io::Result<()> {
    if let Some(header) = &plan.meta.header {
        out.write_all(header.as_bytes())?;
        if !header.ends_with('\n') {
            writeln!(out)?;
        }
        writeln!(out)?;
    }
    writeln!(out, "/*")?;
    writeln!(out, " * This file is generated automatically, please do not modify.")?;
    writeln!(out, " */")?;
    writeln!(out)?;
    writeln!(out, "#include \"tiny_graph.h\"")?;
    writeln!(out)
}

// ---------------------------------------------------------------------------
// Quantized data and shifts
// ---------------------------------------------------------------------------

fn render_data_defines<W: Write>(plan: &ArtifactPlan, out: &mut W) -> io::Result<()> {
    for data in &plan.constants {
        write!(out, "#define {} {{", data.define)?;
        for (i, value) in data.values.iter().enumerate() {
            if i > 0 {
                write!(out, ", ")?;
                if i % DATA_VALUES_PER_LINE == 0 {
                    write!(out, "\\\n    ")?;
                }
            }
            write!(out, "{value}")?;
        }
        writeln!(out, "}}")?;
    }
    if !plan.constants.is_empty() {
        writeln!(out)?;
    }
    Ok(())
}

fn render_shift_defines<W: Write>(plan: &ArtifactPlan, out: &mut W) -> io::Result<()> {
    for shift in &plan.shifts {
        writeln!(out, "#define {} {}", shift.symbol, shift.value)?;
    }
    if !plan.shifts.is_empty() {
        writeln!(out)?;
    }
    Ok(())
}

fn render_data_arrays<W: Write>(plan: &ArtifactPlan, out: &mut W) -> io::Result<()> {
    for data in &plan.constants {
        writeln!(out, "static const signed char {}[] = {};", data.array, data.define)?;
    }
    if !plan.constants.is_empty() {
        writeln!(out)?;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

fn render_tensors<W: Write>(plan: &ArtifactPlan, out: &mut W) -> io::Result<()> {
    for tensor in &plan.tensors {
        let dims: Vec<String> = tensor.dims.iter().map(|d| d.to_string()).collect();
        let shift = match &tensor.shift {
            ShiftRef::Zero => "0",
            ShiftRef::Symbol(symbol) => symbol.as_str(),
        };
        writeln!(out, "static const struct tiny_tensor {} = {{", tensor.symbol)?;
        writeln!(out, "    .dim_num = {},", tensor.dims.len())?;
        writeln!(out, "    .dims = {{{}}},", dims.join(", "))?;
        writeln!(out, "    .shift = {shift},")?;
        writeln!(out, "    .data_type = NN_DT_Q7,")?;
        writeln!(out, "    .tensor_type = {},", tensor_type_tag(tensor.role))?;
        writeln!(out, "    .data = {},", tensor.data.as_deref().unwrap_or("NULL"))?;
        writeln!(out, "}};")?;
        writeln!(out)?;
    }
    Ok(())
}

fn render_params<W: Write>(plan: &ArtifactPlan, out: &mut W) -> io::Result<()> {
    for record in &plan.params {
        writeln!(
            out,
            "static const struct {} {} = {{",
            record.param.c_struct(),
            record.symbol
        )?;
        match &record.param {
            OpParam::Conv(conv) => {
                writeln!(out, "    .kernel_h = {},", conv.kernel_h)?;
                writeln!(out, "    .kernel_w = {},", conv.kernel_w)?;
                writeln!(out, "    .stride_h = {},", conv.stride_h)?;
                writeln!(out, "    .stride_w = {},", conv.stride_w)?;
                writeln!(out, "    .pad_h = {},", conv.pad.c_tag())?;
                writeln!(out, "    .pad_w = {},", conv.pad.c_tag())?;
                writeln!(out, "    .activation = {},", conv.activation)?;
            }
            OpParam::Pool(pool) => {
                writeln!(out, "    .kernel_h = {},", pool.kernel_h)?;
                writeln!(out, "    .kernel_w = {},", pool.kernel_w)?;
                writeln!(out, "    .stride_h = {},", pool.stride_h)?;
                writeln!(out, "    .stride_w = {},", pool.stride_w)?;
                writeln!(out, "    .pad_h = {},", pool.pad.c_tag())?;
                writeln!(out, "    .pad_w = {},", pool.pad.c_tag())?;
                writeln!(out, "    .pool_method = {},", pool.method.c_tag())?;
            }
        }
        writeln!(out, "}};")?;
        writeln!(out)?;
    }
    Ok(())
}

fn render_nodes<W: Write>(plan: &ArtifactPlan, out: &mut W) -> io::Result<()> {
    for node in &plan.nodes {
        let inputs: Vec<String> = node.inputs.iter().map(|i| format!("&{i}")).collect();
        let param = match &node.param {
            Some(symbol) => format!("&{symbol}"),
            None => "NULL".to_string(),
        };
        writeln!(out, "static const struct tiny_node {} = {{", node.symbol)?;
        writeln!(out, "    .input_num = {},", node.inputs.len())?;
        writeln!(out, "    .output_num = 1,")?;
        writeln!(out, "    .op_type = {},", node.op.c_tag())?;
        writeln!(out, "    .op_ver = NN_OP_VERSION_1,")?;
        writeln!(out, "    .op_param = {param},")?;
        writeln!(out, "    .input = {{{}}},", inputs.join(", "))?;
        writeln!(out, "    .output = &{},", node.output)?;
        writeln!(out, "}};")?;
        writeln!(out)?;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Node list, graph root and accessors
// ---------------------------------------------------------------------------

fn render_node_list<W: Write>(plan: &ArtifactPlan, out: &mut W) -> io::Result<()> {
    writeln!(out, "static const struct tiny_node* node_list[] = {{")?;
    for chunk in plan.nodes.chunks(NODES_PER_LINE) {
        let refs: Vec<String> = chunk.iter().map(|n| format!("&{}", n.symbol)).collect();
        writeln!(out, "    {},", refs.join(", "))?;
    }
    writeln!(out, "}};")?;
    writeln!(out)
}

fn render_graph<W: Write>(plan: &ArtifactPlan, out: &mut W) -> io::Result<()> {
    let meta = &plan.meta;
    writeln!(out, "static const struct tiny_graph tiny_graph = {{")?;
    writeln!(out, "    .name = \"{}\",", c_escape(&meta.name))?;
    writeln!(out, "    .tiny_version = NN_TINY_VERSION_1,")?;
    writeln!(out, "    .nn_id = {:#x},", meta.nn_id)?;
    writeln!(out, "    .create_time = {},", meta.create_date)?;
    writeln!(out, "    .layout = {},", meta.layout.c_tag())?;
    writeln!(out, "    .node_num = sizeof(node_list) / sizeof(void*),")?;
    writeln!(out, "    .node_list = node_list,")?;
    writeln!(out, "}};")?;
    writeln!(out)?;
    writeln!(out, "const struct tiny_graph* get_tiny_graph(void)")?;
    writeln!(out, "{{")?;
    writeln!(out, "    return &tiny_graph;")?;
    writeln!(out, "}}")?;
    writeln!(out)?;
    writeln!(out, "void free_tiny_graph(const struct tiny_graph* tiny_graph)")?;
    writeln!(out, "{{")?;
    writeln!(out, "    /* NOTHING NEEDS TO DO */")?;
    writeln!(out, "}}")
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn tensor_type_tag(role: TensorRole) -> &'static str {
    match role {
        TensorRole::Input => "NN_TENSOR_INPUT",
        TensorRole::Variable => "NN_TENSOR_VAR",
        TensorRole::Constant => "NN_TENSOR_CONST",
    }
}

fn c_escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            c => out.push(c),
        }
    }
    out
}
