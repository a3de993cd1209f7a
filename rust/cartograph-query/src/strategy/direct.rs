use async_trait::async_trait;
use cartograph_schema::TypedInstance;

use super::{InvocationConstraints, QueryStrategy, StrategyResult};
use crate::context::QueryContext;
use crate::error::{EngineResult, QueryError};
use crate::target::{QueryMode, QuerySpecTypeNode};

/// Resolves a target by calling an operation that needs no input and
/// returns exactly the target type. Candidates are tried in schema order
/// until one succeeds.
#[derive(Debug, Clone, Copy, Default)]
pub struct DirectServiceInvocationStrategy;

impl DirectServiceInvocationStrategy {
    async fn resolve(
        &self,
        target: &QuerySpecTypeNode,
        context: &QueryContext,
        constraints: &InvocationConstraints,
    ) -> EngineResult<Option<TypedInstance>> {
        let candidates = context
            .schema()
            .operations_with_no_argument()
            .into_iter()
            .filter(|(_, operation)| {
                operation.return_type().fqn() == target.ty().fqn()
                    && !constraints
                        .excluded_operations
                        .contains(&operation.reference())
            });

        for (service, operation) in candidates {
            match context
                .engine()
                .invocation_service()
                .invoke(&service, &operation, Vec::new(), context)
                .await
            {
                Ok(value) => return Ok(Some(value)),
                Err(QueryError::QueryCancelled) => return Err(QueryError::QueryCancelled),
                Err(error) => {
                    tracing::debug!(
                        operation = %operation.reference(),
                        %error,
                        "Direct invocation failed, trying the next candidate"
                    );
                }
            }
        }
        Ok(None)
    }
}

#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
impl QueryStrategy for DirectServiceInvocationStrategy {
    fn name(&self) -> &str {
        "direct"
    }

    async fn invoke(
        &self,
        targets: &[QuerySpecTypeNode],
        context: &QueryContext,
        constraints: &InvocationConstraints,
    ) -> EngineResult<StrategyResult> {
        let mut result = StrategyResult::empty();
        for target in constraints
            .unresolved(targets)
            .filter(|target| target.mode() == QueryMode::Discover)
        {
            if let Some(value) = self.resolve(target, context, constraints).await? {
                result.matched.insert(target.clone(), value);
            }
        }
        Ok(result)
    }
}
