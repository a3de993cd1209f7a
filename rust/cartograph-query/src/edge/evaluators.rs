use async_trait::async_trait;
use cartograph_schema::{OperationRef, TypedInstance};

use super::{EdgeEvaluator, EvaluatableEdge, EvaluatedEdge, ParameterFactory};
use crate::context::QueryContext;
use crate::discovery::TypeMatchingStrategy;
use crate::error::{EngineResult, QueryError};
use crate::graph::Relationship;

/// Carries the previous value forward unchanged. Used for edges that only
/// change how a value is viewed (instance to type, subtype to supertype,
/// parameter to operation).
#[derive(Debug, Clone, Copy)]
pub struct PassThroughEvaluator {
    relationship: Relationship,
}

impl PassThroughEvaluator {
    /// Handles `relationship`
    pub fn new(relationship: Relationship) -> Self {
        Self { relationship }
    }
}

#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
impl EdgeEvaluator for PassThroughEvaluator {
    fn relationship(&self) -> Relationship {
        self.relationship
    }

    async fn evaluate(
        &self,
        edge: EvaluatableEdge,
        _context: &QueryContext,
    ) -> EngineResult<EvaluatedEdge> {
        Ok(match edge.previous_value() {
            Some(value) => EvaluatedEdge::success(&edge.edge, value.clone()),
            None => EvaluatedEdge::failure(&edge.edge, "No value to pass through"),
        })
    }
}

/// Reads an attribute off the previous value
#[derive(Debug, Clone, Copy)]
pub struct AttributeEvaluator {
    relationship: Relationship,
}

impl AttributeEvaluator {
    /// Handles `relationship` (`HAS_ATTRIBUTE` or `INSTANCE_HAS_ATTRIBUTE`)
    pub fn new(relationship: Relationship) -> Self {
        Self { relationship }
    }
}

#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
impl EdgeEvaluator for AttributeEvaluator {
    fn relationship(&self) -> Relationship {
        self.relationship
    }

    async fn evaluate(
        &self,
        edge: EvaluatableEdge,
        _context: &QueryContext,
    ) -> EngineResult<EvaluatedEdge> {
        let Some(attribute) = edge.edge.attribute.as_deref() else {
            return Ok(EvaluatedEdge::failure(&edge.edge, "Edge names no attribute"));
        };
        let Some(owner) = edge.previous_value() else {
            return Ok(EvaluatedEdge::failure(
                &edge.edge,
                format!("Cannot read {attribute} from a null value"),
            ));
        };

        Ok(match owner.attribute(attribute) {
            Some(value) if !value.is_null() => EvaluatedEdge::success(&edge.edge, value.clone()),
            _ => EvaluatedEdge::failure(
                &edge.edge,
                format!("{} has no value for {attribute}", owner.ty()),
            ),
        })
    }
}

/// Finds the known fact that owns the previous value as one of its
/// attributes
#[derive(Debug, Clone, Copy, Default)]
pub struct AttributeOfEvaluator;

#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
impl EdgeEvaluator for AttributeOfEvaluator {
    fn relationship(&self) -> Relationship {
        Relationship::AttributeOf
    }

    async fn evaluate(
        &self,
        edge: EvaluatableEdge,
        context: &QueryContext,
    ) -> EngineResult<EvaluatedEdge> {
        let Some(attribute) = edge.edge.attribute.as_deref() else {
            return Ok(EvaluatedEdge::failure(&edge.edge, "Edge names no attribute"));
        };
        let Some(value) = edge.previous_value() else {
            return Ok(EvaluatedEdge::failure(&edge.edge, "No value to look up"));
        };
        let owner_type = context.schema().type_by_name(&edge.edge.to.value)?;

        let owner = context.model_tree().find(|candidate| {
            TypeMatchingStrategy::AllowInheritedTypes.matches(&owner_type, candidate.ty())
                && candidate
                    .attribute(attribute)
                    .is_some_and(|candidate_value| candidate_value == value)
        });

        Ok(match owner {
            Some(owner) => EvaluatedEdge::success(&edge.edge, owner),
            None => EvaluatedEdge::failure(
                &edge.edge,
                format!("No known {owner_type} has {attribute} = {value}"),
            ),
        })
    }
}

fn operation_of(edge: &EvaluatableEdge) -> Option<&OperationRef> {
    edge.edge.operation.as_ref()
}

/// Discovers a parameter an operation needs
#[derive(Debug, Clone, Copy, Default)]
pub struct RequiresParameterEvaluator;

#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
impl EdgeEvaluator for RequiresParameterEvaluator {
    fn relationship(&self) -> Relationship {
        Relationship::RequiresParameter
    }

    async fn evaluate(
        &self,
        edge: EvaluatableEdge,
        context: &QueryContext,
    ) -> EngineResult<EvaluatedEdge> {
        let Some(reference) = operation_of(&edge) else {
            return Ok(EvaluatedEdge::failure(&edge.edge, "Edge names no operation"));
        };
        let (_, operation) = context.schema().operation(reference)?;
        let parameter_type = context.schema().type_by_name(&edge.edge.to.value)?;

        match ParameterFactory::new(context)
            .discover(&parameter_type, edge.previous_value(), &operation)
            .await
        {
            Ok(parameter) => Ok(EvaluatedEdge::success(&edge.edge, parameter)),
            Err(QueryError::QueryCancelled) => Err(QueryError::QueryCancelled),
            Err(error) => Ok(EvaluatedEdge::failure(&edge.edge, error.to_string())),
        }
    }
}

/// Invokes the operation behind a `CAN_POPULATE` edge, using the previous
/// value as its preferred input. The result is added to the context as a new
/// fact.
#[derive(Debug, Clone, Copy, Default)]
pub struct OperationInvocationEvaluator;

#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
impl EdgeEvaluator for OperationInvocationEvaluator {
    fn relationship(&self) -> Relationship {
        Relationship::CanPopulate
    }

    async fn evaluate(
        &self,
        edge: EvaluatableEdge,
        context: &QueryContext,
    ) -> EngineResult<EvaluatedEdge> {
        let Some(reference) = operation_of(&edge) else {
            return Ok(EvaluatedEdge::failure(&edge.edge, "Edge names no operation"));
        };
        let (service, operation) = context.schema().operation(reference)?;
        let preferred = edge.previous_value().cloned().into_iter().collect::<Vec<TypedInstance>>();

        match context
            .engine()
            .invocation_service()
            .invoke_operation(&service, &operation, context, &preferred)
            .await
        {
            Ok(value) => {
                context.add_fact(value.clone());
                Ok(EvaluatedEdge::success(&edge.edge, value))
            }
            Err(QueryError::QueryCancelled) => Err(QueryError::QueryCancelled),
            Err(error) => {
                tracing::debug!(operation = %reference, %error, "Operation invocation failed");
                Ok(EvaluatedEdge::failure(&edge.edge, error.to_string()))
            }
        }
    }
}
