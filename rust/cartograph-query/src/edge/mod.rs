//! Evaluation of semantic graph edges.
//!
//! A discovered path is walked one edge at a time. Each [EvaluatableEdge]
//! pairs an edge with the outcome of the edge before it, and the
//! [EdgeNavigator] dispatches it to the [EdgeEvaluator] registered for its
//! [Relationship].

mod evaluators;
mod parameters;

pub use evaluators::*;
pub use parameters::*;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use cartograph_common::{ConditionalSend, ConditionalSync};
use cartograph_schema::TypedInstance;
use serde_json::json;

use crate::context::QueryContext;
use crate::error::EngineResult;
use crate::graph::{Edge, Link, Relationship};
use crate::profiler::OperationType;

/// The outcome of evaluating one edge
#[derive(Debug, Clone)]
pub struct EvaluatedEdge {
    link: Link,
    value: Option<TypedInstance>,
    error: Option<String>,
}

impl EvaluatedEdge {
    /// `edge` was traversed and produced `value`
    pub fn success(edge: &Edge, value: TypedInstance) -> Self {
        Self {
            link: Link::from(edge),
            value: Some(value),
            error: None,
        }
    }

    /// `edge` could not be traversed
    pub fn failure(edge: &Edge, error: impl Into<String>) -> Self {
        Self {
            link: Link::from(edge),
            value: None,
            error: Some(error.into()),
        }
    }

    /// The traversed step
    pub fn link(&self) -> &Link {
        &self.link
    }

    /// The value produced, if successful
    pub fn value(&self) -> Option<&TypedInstance> {
        self.value.as_ref()
    }

    /// The failure description, if unsuccessful
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// True if the edge produced a value
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    /// A one-line rendering of the outcome
    pub fn description(&self) -> String {
        let step = format!(
            "{} -[{}]-> {}",
            self.link.start, self.link.relationship, self.link.end
        );
        match (&self.value, &self.error) {
            (_, Some(error)) => format!("{step} failed: {error}"),
            (Some(value), None) => format!("{step} = {value}"),
            (None, None) => step,
        }
    }
}

/// An edge waiting to be evaluated, paired with the outcome of the edge
/// before it
#[derive(Debug, Clone)]
pub struct EvaluatableEdge {
    /// The previous step's outcome
    pub previous: EvaluatedEdge,
    /// The edge to traverse
    pub edge: Edge,
}

impl EvaluatableEdge {
    /// The value the previous step produced
    pub fn previous_value(&self) -> Option<&TypedInstance> {
        self.previous.value().filter(|value| !value.is_null())
    }
}

/// Traverses edges of one [Relationship].
///
/// Evaluation failures (a missing attribute, a failing remote call) are
/// reported as a failed [EvaluatedEdge]. An `Err` is reserved for conditions
/// that end the whole query, such as cancellation.
#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
pub trait EdgeEvaluator: ConditionalSend + ConditionalSync {
    /// The relationship this evaluator handles
    fn relationship(&self) -> Relationship;

    /// Traverses `edge`
    async fn evaluate(
        &self,
        edge: EvaluatableEdge,
        context: &QueryContext,
    ) -> EngineResult<EvaluatedEdge>;
}

/// Dispatches edges to evaluators by relationship
#[derive(Clone)]
pub struct EdgeNavigator {
    evaluators: HashMap<Relationship, Arc<dyn EdgeEvaluator>>,
}

impl std::fmt::Debug for EdgeNavigator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut relationships = self.evaluators.keys().collect::<Vec<_>>();
        relationships.sort();
        f.debug_struct("EdgeNavigator")
            .field("relationships", &relationships)
            .finish()
    }
}

impl Default for EdgeNavigator {
    fn default() -> Self {
        Self::new([
            Arc::new(PassThroughEvaluator::new(Relationship::IsTypeOf)) as Arc<dyn EdgeEvaluator>,
            Arc::new(PassThroughEvaluator::new(Relationship::ExtendsType)),
            Arc::new(PassThroughEvaluator::new(Relationship::OperationParameter)),
            Arc::new(AttributeEvaluator::new(Relationship::HasAttribute)),
            Arc::new(AttributeEvaluator::new(Relationship::InstanceHasAttribute)),
            Arc::new(AttributeOfEvaluator),
            Arc::new(RequiresParameterEvaluator),
            Arc::new(OperationInvocationEvaluator),
        ])
    }
}

impl EdgeNavigator {
    /// A navigator using `evaluators`. Later evaluators replace earlier ones
    /// registered for the same relationship.
    pub fn new(evaluators: impl IntoIterator<Item = Arc<dyn EdgeEvaluator>>) -> Self {
        Self {
            evaluators: evaluators
                .into_iter()
                .map(|evaluator| (evaluator.relationship(), evaluator))
                .collect(),
        }
    }

    /// Registers `evaluator`, replacing any evaluator for its relationship
    pub fn with_evaluator(mut self, evaluator: Arc<dyn EdgeEvaluator>) -> Self {
        self.evaluators.insert(evaluator.relationship(), evaluator);
        self
    }

    /// Evaluates `edge` inside a graph traversal profiler scope and records
    /// the outcome in the context's edge log
    pub async fn evaluate(
        &self,
        edge: EvaluatableEdge,
        context: &QueryContext,
    ) -> EngineResult<EvaluatedEdge> {
        let scope = context.start_child(
            "EdgeNavigator",
            edge.edge.description(),
            OperationType::GraphTraversal,
        );
        let scoped = context.scoped(scope.operation().clone());

        let evaluated = match self.evaluators.get(&edge.edge.relationship) {
            Some(evaluator) => evaluator.evaluate(edge, &scoped).await?,
            None => {
                let message = format!("No evaluator handles {}", edge.edge.relationship);
                EvaluatedEdge::failure(&edge.edge, message)
            }
        };

        context.record_edge(evaluated.clone());
        scope.stop(Some(match evaluated.error() {
            Some(error) => json!({ "success": false, "error": error }),
            None => json!({
                "success": true,
                "value": evaluated.value().map(TypedInstance::to_raw),
            }),
        }));
        Ok(evaluated)
    }
}
