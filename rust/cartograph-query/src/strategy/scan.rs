use async_trait::async_trait;

use super::{InvocationConstraints, QueryStrategy, StrategyResult};
use crate::context::QueryContext;
use crate::error::EngineResult;
use crate::profiler::OperationType;
use crate::target::{QueryMode, QuerySpecTypeNode};

/// Resolves targets that are already known facts. Costs nothing and runs
/// first; the policy used is [crate::EngineConfig::scan_policy].
#[derive(Debug, Clone, Copy, Default)]
pub struct ScanStrategy;

#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
impl QueryStrategy for ScanStrategy {
    fn name(&self) -> &str {
        "scan"
    }

    async fn invoke(
        &self,
        targets: &[QuerySpecTypeNode],
        context: &QueryContext,
        constraints: &InvocationConstraints,
    ) -> EngineResult<StrategyResult> {
        let policy = context.engine().config().scan_policy;
        let scope = context.start_child("ScanStrategy", "scan", OperationType::PolicyEvaluation);
        scope.operation().add_context("policy", format!("{policy:?}"));

        let mut result = StrategyResult::empty();
        for target in constraints
            .unresolved(targets)
            .filter(|target| target.mode() == QueryMode::Discover)
        {
            if let Some(fact) = context.find_fact(target.ty(), policy) {
                result.matched.insert(target.clone(), fact);
            }
        }

        scope.stop(Some(serde_json::json!({ "matched": result.matched.len() })));
        Ok(result)
    }
}
