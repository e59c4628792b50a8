use std::collections::BTreeMap;

use crate::context::AnalysisContext;
use crate::graph::{ExecutionGraph, MergedClusterGraph};
use crate::merge::{GraphMerger, MergeFailure, MergeOutcome, MergeRecorder};

/// One baseline per distribution, created on first use.
#[derive(Debug, Clone, Default)]
pub struct DistributionBaselines {
    graphs: BTreeMap<String, MergedClusterGraph>,
}

impl DistributionBaselines {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, distribution: &str) -> Option<&MergedClusterGraph> {
        self.graphs.get(distribution)
    }

    /// Install a baseline, replacing any existing one for the same distribution.
    pub fn insert(&mut self, baseline: MergedClusterGraph) -> Option<MergedClusterGraph> {
        self.graphs.insert(baseline.distribution.clone(), baseline)
    }

    pub fn iter(&self) -> impl Iterator<Item = &MergedClusterGraph> {
        self.graphs.values()
    }

    pub fn names(&self) -> Vec<String> {
        self.graphs.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.graphs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.graphs.is_empty()
    }

    /// Merge into whichever distribution the registry assigns the execution's module to.
    pub fn merge_execution(
        &mut self,
        ctx: &AnalysisContext,
        execution: &ExecutionGraph,
        recorder: Option<&mut dyn MergeRecorder>,
    ) -> Result<MergeOutcome, MergeFailure> {
        let distribution = ctx.registry.distribution_for(&execution.module).to_string();
        self.merge_into(ctx, &distribution, execution, recorder)
    }

    /// The distribution whose baseline already holds `module`, if any.
    pub fn holder_of(&self, module: &str) -> Option<&str> {
        self.graphs
            .values()
            .find(|baseline| baseline.contains_module(module))
            .map(|baseline| baseline.distribution.as_str())
    }

    /// Merge into a named distribution.
    ///
    /// Refused when the registry assigns the module to a different
    /// distribution, or when another distribution's baseline already holds
    /// the module. A module belongs to one trust boundary only, even after
    /// the distribution configs change.
    pub fn merge_into(
        &mut self,
        ctx: &AnalysisContext,
        distribution: &str,
        execution: &ExecutionGraph,
        recorder: Option<&mut dyn MergeRecorder>,
    ) -> Result<MergeOutcome, MergeFailure> {
        if let Some(claimed) = ctx.registry.claimed_by(&execution.module) {
            if claimed.name != distribution {
                return Err(MergeFailure::DistributionConflict {
                    module: execution.module.clone(),
                    claimed: claimed.name.clone(),
                    requested: distribution.to_string(),
                });
            }
        }

        let held_elsewhere = self.graphs.values().find(|baseline| {
            baseline.distribution != distribution && baseline.contains_module(&execution.module)
        });
        if let Some(holder) = held_elsewhere {
            return Err(MergeFailure::ModuleHeldElsewhere {
                module: execution.module.clone(),
                holder: holder.distribution.clone(),
                requested: distribution.to_string(),
            });
        }

        let mut merger = GraphMerger::new(ctx.merge.clone());
        if let Some(recorder) = recorder {
            merger = merger.with_recorder(recorder);
        }

        match self.graphs.get_mut(distribution) {
            Some(baseline) => merger.merge(baseline, execution),
            None => {
                // A rejected first merge must not leave an empty baseline behind.
                let mut baseline = MergedClusterGraph::new(distribution);
                let outcome = merger.merge(&mut baseline, execution)?;
                log::info!("Created baseline for distribution {distribution}");
                self.graphs.insert(distribution.to_string(), baseline);
                Ok(outcome)
            }
        }
    }
}
