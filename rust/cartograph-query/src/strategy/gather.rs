use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use cartograph_schema::{DataSource, Operation, OperationRef, Service, Type, TypedInstance};
use futures_util::{StreamExt, stream};

use super::{DiscoverStrategy, InvocationConstraints, QueryStrategy, StrategyResult};
use crate::context::QueryContext;
use crate::error::{EngineResult, QueryError};
use crate::profiler::OperationType;
use crate::target::{QueryMode, QuerySpecTypeNode};

/// Resolves a `GATHER` target by asking every operation that can produce
/// the target's member type, and collecting all of their values.
///
/// Candidates run concurrently (up to [crate::EngineConfig::gather_concurrency])
/// and independently: one failing candidate is logged and skipped. Operations
/// that need inputs are reached through [DiscoverStrategy] with the other
/// candidates excluded, so each discovery exercises its own operation.
#[derive(Debug, Clone, Copy, Default)]
pub struct GatherStrategy {
    discover: DiscoverStrategy,
}

fn produces(operation: &Operation, member_type: &Type) -> bool {
    let returns = operation.return_type();
    returns.is_assignable_to(member_type)
        || returns
            .collection_type()
            .is_some_and(|member| member.is_assignable_to(member_type))
}

impl GatherStrategy {
    async fn resolve_candidate(
        &self,
        service: &Arc<Service>,
        operation: &Arc<Operation>,
        candidates: &[OperationRef],
        context: &QueryContext,
    ) -> EngineResult<Option<TypedInstance>> {
        let reference = operation.reference();
        let scope = context.start_child("GatherStrategy", reference.to_string(), OperationType::Lookup);
        let context = context.scoped(scope.operation().clone());

        let outcome = if operation.parameters().is_empty() {
            context
                .engine()
                .invocation_service()
                .invoke(service, operation, Vec::new(), &context)
                .await
                .map(Some)
        } else {
            let context = context.excluding(
                candidates
                    .iter()
                    .filter(|candidate| **candidate != reference)
                    .cloned(),
            );
            let node = QuerySpecTypeNode::discover(operation.return_type().clone());
            let constraints = InvocationConstraints {
                excluded_operations: context.excluded_operations().clone(),
                resolved: HashSet::new(),
            };
            self.discover
                .invoke(std::slice::from_ref(&node), &context, &constraints)
                .await
                .map(|mut result| result.matched.swap_remove(&node))
        };

        scope.stop(Some(serde_json::json!({
            "resolved": matches!(outcome, Ok(Some(_))),
        })));
        outcome
    }

    async fn gather(
        &self,
        target: &QuerySpecTypeNode,
        context: &QueryContext,
        constraints: &InvocationConstraints,
    ) -> EngineResult<Option<TypedInstance>> {
        let member_type = target
            .ty()
            .collection_type()
            .cloned()
            .unwrap_or_else(|| target.ty().clone());

        let candidates = context
            .schema()
            .operations()
            .filter(|(_, operation)| {
                produces(operation, &member_type)
                    && !constraints
                        .excluded_operations
                        .contains(&operation.reference())
            })
            .map(|(service, operation)| (service.clone(), operation.clone()))
            .collect::<Vec<_>>();
        if candidates.is_empty() {
            return Ok(None);
        }

        let scope = context.start_child("GatherStrategy", target.to_string(), OperationType::Lookup);
        let scoped = context.scoped(scope.operation().clone());
        let references = candidates
            .iter()
            .map(|(_, operation)| operation.reference())
            .collect::<Vec<_>>();
        let concurrency = context.engine().config().gather_concurrency.max(1);

        let outcomes = stream::iter(0..candidates.len())
            .map(|index| {
                let (service, operation) = &candidates[index];
                self.resolve_candidate(service, operation, &references, &scoped)
            })
            .buffered(concurrency)
            .collect::<Vec<_>>()
            .await;

        let mut values = Vec::new();
        for ((_, operation), outcome) in candidates.iter().zip(outcomes) {
            match outcome {
                Ok(Some(value)) => {
                    if value.ty().is_collection() {
                        values.extend(
                            value
                                .members()
                                .iter()
                                .filter(|member| member.ty().is_assignable_to(&member_type))
                                .cloned(),
                        );
                    } else if value.ty().is_assignable_to(&member_type) {
                        values.push(value);
                    }
                }
                Ok(None) => {
                    tracing::debug!(operation = %operation.reference(), "Gather candidate produced nothing");
                }
                Err(QueryError::QueryCancelled) => return Err(QueryError::QueryCancelled),
                Err(error) => {
                    tracing::warn!(
                        operation = %operation.reference(),
                        %error,
                        "Gather candidate failed, continuing with the others"
                    );
                }
            }
        }

        scope.stop(Some(serde_json::json!({
            "candidates": candidates.len(),
            "values": values.len(),
        })));
        if values.is_empty() {
            return Ok(None);
        }
        Ok(Some(TypedInstance::collection(
            member_type,
            values,
            DataSource::Mixed,
        )))
    }
}

#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
impl QueryStrategy for GatherStrategy {
    fn name(&self) -> &str {
        "gather"
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
            .filter(|target| target.mode() == QueryMode::Gather)
        {
            if let Some(value) = self.gather(target, context, constraints).await? {
                result.matched.insert(target.clone(), value);
            }
        }
        Ok(result)
    }
}
