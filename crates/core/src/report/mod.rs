//! Risk-scored anomaly reports.
//!
//! Merges produce [`ReportEntry`] candidates. An [`ExecutionReport`] scores
//! each candidate against historical event frequencies as it is added, sorts
//! by descending risk index, and renders one `NNNN description` line per entry.

pub mod frequencies;

use std::cmp::Ordering;
use std::io::Write;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use frequencies::{target_id, ModuleEventFrequencies, ProgramEventFrequencies};

use crate::graph::{EdgeType, MetaNodeType, Node};
use crate::merge::MergeOutcome;

/// Risk index of a module no baseline has seen.
pub const NEW_MODULE_RISK: u32 = 1000;

/// Floor for the standalone-region risk scale.
pub const MIN_STANDALONE_SCALE: f64 = 0.02;

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("Median for {name} must be at least 2, got {value}")]
    InvalidMedian { name: String, value: u32 },

    #[error("Failed to write report: {0}")]
    Io(#[from] std::io::Error),
}

/// Historical median event counts at program and module scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MedianPair {
    pub program: u32,
    pub module: u32,
}

/// Medians used to turn raw event counts into precedence scores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskConfig {
    #[serde(default = "default_abnormal_return_medians")]
    pub abnormal_returns: MedianPair,
    #[serde(default = "default_indirect_edge_medians")]
    pub indirect_edges: MedianPair,
    #[serde(default = "default_standalone_medians")]
    pub standalones: MedianPair,
}

fn default_abnormal_return_medians() -> MedianPair {
    MedianPair { program: 8, module: 3 }
}

fn default_indirect_edge_medians() -> MedianPair {
    MedianPair { program: 20, module: 5 }
}

fn default_standalone_medians() -> MedianPair {
    MedianPair { program: 200, module: 50 }
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            abnormal_returns: default_abnormal_return_medians(),
            indirect_edges: default_indirect_edge_medians(),
            standalones: default_standalone_medians(),
        }
    }
}

impl RiskConfig {
    /// Every median must be at least 2, otherwise its log10 is not a usable divisor.
    pub fn validate(&self) -> Result<(), ReportError> {
        let pairs = [
            ("abnormal_returns", self.abnormal_returns),
            ("indirect_edges", self.indirect_edges),
            ("standalones", self.standalones),
        ];
        for (name, pair) in pairs {
            for (scope, value) in [("program", pair.program), ("module", pair.module)] {
                if value < 2 {
                    return Err(ReportError::InvalidMedian {
                        name: format!("{name}.{scope}"),
                        value,
                    });
                }
            }
        }
        Ok(())
    }
}

/// How common an event is relative to its historical median, in `(0, 1]`.
///
/// Counts below 2 use a log-scale floor of 0.01.
pub fn calculate_precedence(median: u32, observed: u32) -> f64 {
    let median_scale = f64::from(median).log10();
    let observed_scale = if observed < 2 { 0.01 } else { f64::from(observed).log10() };
    (observed_scale / (median_scale * 2.0)).min(1.0)
}

/// Convert a risk scale to an integer index.
pub fn quantize(scale: f64) -> u32 {
    (scale * 1000.0).round() as u32
}

fn module_precedence(median: u32, observed: Option<u32>) -> f64 {
    match observed {
        Some(count) if count > 0 => calculate_precedence(median, count),
        _ => 0.0,
    }
}

/// Display data for one node referenced by a report entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeSummary {
    pub module: String,
    pub kind: MetaNodeType,
    pub hash: u64,
    pub tag: u64,
}

impl NodeSummary {
    pub fn of(node: &Node) -> Self {
        Self {
            module: node.module().to_string(),
            kind: node.kind(),
            hash: node.hash(),
            tag: node.tag(),
        }
    }

    /// Hash for boundary nodes, relative tag for everything else.
    pub fn display_id(&self) -> u64 {
        if self.kind.is_boundary() {
            self.hash
        } else {
            self.tag
        }
    }

    fn label(&self) -> String {
        match self.kind {
            MetaNodeType::ModuleEntry => format!("Module entry from {}", self.module),
            MetaNodeType::ModuleExit => format!("Module exit to {}", self.module),
            MetaNodeType::Singleton => format!("JIT singleton {}", self.module),
            MetaNodeType::Trampoline => format!("Dynamic standalone {}", self.module),
            MetaNodeType::Normal | MetaNodeType::Return | MetaNodeType::SignatureHash => {
                self.module.clone()
            }
        }
    }

    fn render(&self) -> String {
        format!("{}(0x{:x})", self.label(), self.display_id())
    }
}

/// One anomaly candidate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum ReportEntry {
    NewModule { module: String },
    AbnormalReturn { node: NodeSummary },
    JitSingleton { node: NodeSummary },
    IndirectEdge { from: NodeSummary, to: NodeSummary, ordinal: u32 },
    /// A write into, or a permission change on, generated code.
    GencodeEdge { from: NodeSummary, to: NodeSummary, edge: EdgeType, ordinal: u32 },
    NewStandalone {
        module: String,
        node_count: usize,
        /// Nodes of the region already in the baseline; zero for a first occurrence.
        expanded_from: usize,
    },
}

impl ReportEntry {
    pub fn describe(&self) -> String {
        match self {
            ReportEntry::NewModule { module } => format!("Untrusted module {module}"),
            ReportEntry::AbnormalReturn { node } => format!("Abnormal return {}", node.render()),
            ReportEntry::JitSingleton { node } => {
                format!("JIT singleton owned by module {}", node.module)
            }
            ReportEntry::IndirectEdge { from, to, ordinal } => format!(
                "Structural indirect branch {} -{}-> {}",
                from.render(),
                ordinal,
                to.render()
            ),
            ReportEntry::GencodeEdge { from, to, edge, ordinal } => {
                let action = if *edge == EdgeType::GencodePerm { "chmod" } else { "write" };
                format!("Gencode {action} {} -{}-> {}", from.render(), ordinal, to.render())
            }
            ReportEntry::NewStandalone { module, node_count, expanded_from } => {
                if *expanded_from > 0 {
                    format!(
                        "Dynamic standalone owned by {module} expanded from {expanded_from} to {node_count} nodes"
                    )
                } else {
                    format!("Dynamic standalone of size {node_count} nodes owned by {module}")
                }
            }
        }
    }

    /// Risk index given program statistics and, when available, the owning module's.
    pub fn risk_index(
        &self,
        program: &ProgramEventFrequencies,
        module: Option<&ModuleEventFrequencies>,
        risk: &RiskConfig,
    ) -> u32 {
        match self {
            ReportEntry::NewModule { .. } => NEW_MODULE_RISK,
            ReportEntry::JitSingleton { .. } | ReportEntry::GencodeEdge { .. } => quantize(1.0),
            ReportEntry::AbnormalReturn { .. } => {
                let medians = risk.abnormal_returns;
                let program_precedence =
                    calculate_precedence(medians.program, program.abnormal_returns);
                let module_precedence =
                    module_precedence(medians.module, module.map(|m| m.abnormal_returns));
                quantize(2.0 / (program_precedence + module_precedence))
            }
            ReportEntry::IndirectEdge { to, .. } => {
                let medians = risk.indirect_edges;
                let target = to.display_id();
                let program_precedence =
                    calculate_precedence(medians.program, program.indirect_target_count(target));
                let module_precedence = module_precedence(
                    medians.module,
                    module.map(|m| m.indirect_target_count(target)),
                );
                quantize(2.0 / (program_precedence + module_precedence))
            }
            ReportEntry::NewStandalone { expanded_from, .. } => {
                let medians = risk.standalones;
                let program_precedence = calculate_precedence(medians.program, program.standalones);
                let module_precedence =
                    module_precedence(medians.module, module.map(|m| m.standalones));
                let mut scale = (1.0 - (program_precedence + module_precedence) / 2.0)
                    .max(MIN_STANDALONE_SCALE);
                if *expanded_from > 0 {
                    scale /= 2.0;
                }
                quantize(scale)
            }
        }
    }
}

/// A candidate with its computed risk index and rendered description.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredEntry {
    pub risk_index: u32,
    pub description: String,
    pub entry: ReportEntry,
    #[serde(skip)]
    sequence: usize,
}

impl ScoredEntry {
    /// One report line: zero-padded risk index, a space, the description.
    pub fn render(&self) -> String {
        format!("{:04} {}", self.risk_index, self.description)
    }
}

/// Report ordering: risk index descending, then description, then insertion order.
fn risk_order(first: &ScoredEntry, second: &ScoredEntry) -> Ordering {
    second
        .risk_index
        .cmp(&first.risk_index)
        .then_with(|| first.description.cmp(&second.description))
        .then_with(|| first.sequence.cmp(&second.sequence))
}

/// Scored anomaly report for one analysis run.
#[derive(Debug)]
pub struct ExecutionReport<'f> {
    frequencies: &'f ProgramEventFrequencies,
    risk: RiskConfig,
    current_module: Option<String>,
    entries: Vec<ScoredEntry>,
}

impl<'f> ExecutionReport<'f> {
    pub fn new(frequencies: &'f ProgramEventFrequencies, risk: RiskConfig) -> Result<Self, ReportError> {
        risk.validate()?;
        Ok(Self { frequencies, risk, current_module: None, entries: Vec::new() })
    }

    /// Select the module whose statistics apply to entries added next.
    pub fn set_current_module(&mut self, module: &str) {
        if self.frequencies.module(module).is_some() {
            log::debug!("Found module event frequencies for {module}");
        } else {
            log::info!("No module event frequencies for {module}");
        }
        self.current_module = Some(module.to_string());
    }

    /// Score `entry` against the attached statistics and append it.
    pub fn add_entry(&mut self, entry: ReportEntry) {
        let module = self.current_module.as_deref().and_then(|name| self.frequencies.module(name));
        let risk_index = entry.risk_index(self.frequencies, module, &self.risk);
        let description = entry.describe();
        let sequence = self.entries.len();
        self.entries.push(ScoredEntry { risk_index, description, entry, sequence });
    }

    /// Add every candidate produced by one merge.
    pub fn add_outcome(&mut self, outcome: &MergeOutcome) {
        self.set_current_module(&outcome.module);
        for candidate in &outcome.candidates {
            self.add_entry(candidate.clone());
        }
    }

    pub fn sort(&mut self) {
        self.entries.sort_by(risk_order);
    }

    pub fn entries(&self) -> &[ScoredEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Rendered lines in current order.
    pub fn lines(&self) -> Vec<String> {
        self.entries.iter().map(ScoredEntry::render).collect()
    }

    pub fn write_to<W: Write>(&self, mut out: W) -> Result<(), ReportError> {
        for entry in &self.entries {
            writeln!(out, "{}", entry.render())?;
        }
        Ok(())
    }
}
