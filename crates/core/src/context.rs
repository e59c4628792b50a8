use crate::dist::DistributionRegistry;
use crate::merge::MergeConfig;
use crate::report::RiskConfig;

/// Read-only settings shared by every merge and report in one session.
///
/// Built once and passed by reference; merges for different distributions can
/// share one context without any global state.
#[derive(Debug, Clone, Default)]
pub struct AnalysisContext {
    pub registry: DistributionRegistry,
    pub merge: MergeConfig,
    pub risk: RiskConfig,
}

impl AnalysisContext {
    pub fn new(registry: DistributionRegistry) -> Self {
        Self { registry, merge: MergeConfig::default(), risk: RiskConfig::default() }
    }

    pub fn with_merge_config(mut self, merge: MergeConfig) -> Self {
        self.merge = merge;
        self
    }

    pub fn with_risk_config(mut self, risk: RiskConfig) -> Self {
        self.risk = risk;
        self
    }
}
