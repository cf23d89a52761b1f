pub mod fuse;
pub mod lower;
pub mod plan;
pub mod render;
pub mod rust;
pub mod symbol;

#[cfg(test)]
pub(crate) mod fixtures;

use crate::config::{EmitTarget, GenConfig};
use crate::error::Result;
use crate::ir::Graph;
use crate::quant::shift::{propagate, ShiftTable};
use crate::quant::{quantize_graph, QuantTable};

use fuse::{find_units, UnitSet};
use plan::ArtifactPlan;
use symbol::SymbolTable;

/// Everything derived from the graph before linearization.
#[derive(Debug)]
pub struct Analysis {
    pub quant: QuantTable,
    pub units: UnitSet,
    pub symbols: SymbolTable,
    pub shifts: ShiftTable,
}

pub struct Generated {
    pub plan: ArtifactPlan,
    pub target: EmitTarget,
    pub source: String,
}

/// Quantize constants, group compute units and propagate shifts.
pub fn analyze(graph: &Graph, config: &GenConfig) -> Result<Analysis> {
    let quant = quantize_graph(graph, &config.quant)?;
    let units = find_units(graph)?;
    log::info!("found {} compute units", units.units().len());
    let symbols = SymbolTable::from_graph(graph);
    let shifts = propagate(graph, &units, &quant, &symbols)?;
    Ok(Analysis {
        quant,
        units,
        symbols,
        shifts,
    })
}

pub fn compile_plan(graph: &Graph, config: &GenConfig) -> Result<ArtifactPlan> {
    let analysis = analyze(graph, config)?;
    lower::linearize(graph, &analysis, config)
}

/// Serialize a plan for the given target.
pub fn emit(plan: &ArtifactPlan, target: EmitTarget) -> Result<String> {
    match target {
        EmitTarget::C => render::render_to_string(plan),
        EmitTarget::Rust => rust::format_module(plan),
    }
}

/// Full pipeline: graph in, artifact source out.
pub fn compile(graph: &Graph, config: &GenConfig) -> Result<Generated> {
    log::info!(
        "compiling graph '{}' ({} nodes)",
        graph.name.as_deref().unwrap_or(&config.graph_name),
        graph.nodes().len()
    );
    let plan = compile_plan(graph, config)?;
    let source = emit(&plan, config.emit)?;
    log::info!("emitted {} bytes of {:?} source", source.len(), config.emit);
    Ok(Generated {
        plan,
        target: config.emit,
        source,
    })
}
