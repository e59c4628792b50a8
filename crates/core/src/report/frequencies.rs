use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::graph::{EdgeType, Graph, MergedClusterGraph, MetaNodeType, Node};

/// Historical event counts for one module.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleEventFrequencies {
    #[serde(default)]
    pub abnormal_returns: u32,
    #[serde(default)]
    pub standalones: u32,
    /// Observations per indirect-branch target id.
    #[serde(default)]
    pub indirect_targets: BTreeMap<u64, u32>,
}

impl ModuleEventFrequencies {
    pub fn indirect_target_count(&self, target: u64) -> u32 {
        self.indirect_targets.get(&target).copied().unwrap_or(0)
    }
}

/// Historical event counts for a whole program, with per-module breakdowns.
///
/// How these counts are produced is up to the caller; [`ProgramEventFrequencies::tally`]
/// derives them from existing baselines.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgramEventFrequencies {
    #[serde(default)]
    pub abnormal_returns: u32,
    #[serde(default)]
    pub standalones: u32,
    #[serde(default)]
    pub indirect_targets: BTreeMap<u64, u32>,
    #[serde(default)]
    pub modules: BTreeMap<String, ModuleEventFrequencies>,
}

/// Id used to key indirect-branch targets: the hash for boundary nodes, the tag otherwise.
pub fn target_id(node: &Node) -> u64 {
    if node.kind().is_boundary() {
        node.hash()
    } else {
        node.tag()
    }
}

impl ProgramEventFrequencies {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn module(&self, name: &str) -> Option<&ModuleEventFrequencies> {
        self.modules.get(name)
    }

    pub fn indirect_target_count(&self, target: u64) -> u32 {
        self.indirect_targets.get(&target).copied().unwrap_or(0)
    }

    /// Count abnormal returns, indirect targets and standalone regions in `baselines`.
    pub fn tally<'a>(baselines: impl IntoIterator<Item = &'a MergedClusterGraph>) -> Self {
        let mut freq = Self::new();
        for baseline in baselines {
            freq.count_graph(&baseline.graph);
        }
        freq
    }

    fn count_graph(&mut self, graph: &Graph) {
        for (id, node) in graph.nodes() {
            let unexpected_return =
                graph.outgoing_edges(id).any(|edge| edge.kind == EdgeType::UnexpectedReturn);
            if unexpected_return
                || (node.kind() == MetaNodeType::Return && !node.outgoing().is_empty())
            {
                self.abnormal_returns += 1;
                self.module_mut(node.module()).abnormal_returns += 1;
            }
            for edge in graph.outgoing_edges(id) {
                if edge.kind != EdgeType::Indirect {
                    continue;
                }
                let target = target_id(graph.node(edge.to));
                *self.indirect_targets.entry(target).or_insert(0) += 1;
                *self.module_mut(node.module()).indirect_targets.entry(target).or_insert(0) += 1;
            }
        }

        for region in graph.trampoline_regions() {
            self.standalones += 1;
            if let Some(first) = region.first() {
                let module = graph.node(*first).module().to_string();
                self.module_mut(&module).standalones += 1;
            }
        }
    }

    fn module_mut(&mut self, name: &str) -> &mut ModuleEventFrequencies {
        self.modules.entry(name.to_string()).or_default()
    }
}
