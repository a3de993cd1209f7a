//! The query pipeline: strategies tried in order against a shared context

use std::any::Any;
use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use cartograph_schema::{Schema, TypedInstance};
use futures_util::FutureExt;
use indexmap::IndexMap;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use crate::config::EngineConfig;
use crate::context::QueryContext;
use crate::edge::{EdgeEvaluator, EdgeNavigator};
use crate::error::{EngineResult, QueryError};
use crate::graph::{Path, SemanticGraphBuilder};
use crate::invocation::{OperationInvocationService, OperationInvoker};
use crate::profiler::{OperationType, ProfilerOperation, RemoteCall};
use crate::strategy::{
    DirectServiceInvocationStrategy, DiscoverStrategy, GatherStrategy, InvocationConstraints,
    QueryStrategy, ScanStrategy,
};
use crate::target::{QueryMode, QuerySpecTypeNode};

/// Resolves typed targets by trying, in order, the scan, direct invocation,
/// discover and gather strategies followed by any custom strategies.
///
/// An engine is immutable once built and is shared between queries; every
/// query gets its own [QueryContext] from [QueryEngine::query_context].
pub struct QueryEngine {
    schema: Arc<Schema>,
    strategies: Vec<Arc<dyn QueryStrategy>>,
    invocation_service: OperationInvocationService,
    navigator: EdgeNavigator,
    graph_builder: SemanticGraphBuilder,
    config: EngineConfig,
}

impl std::fmt::Debug for QueryEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryEngine")
            .field("schema", &self.schema.fingerprint())
            .field(
                "strategies",
                &self
                    .strategies
                    .iter()
                    .map(|strategy| strategy.name())
                    .collect::<Vec<_>>(),
            )
            .field("invocation_service", &self.invocation_service)
            .field("config", &self.config)
            .finish()
    }
}

impl QueryEngine {
    /// Starts configuring an engine for `schema`
    pub fn builder(schema: Arc<Schema>) -> QueryEngineBuilder {
        QueryEngineBuilder::new(schema)
    }

    /// The schema every query is interpreted against
    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    /// The engine's configuration
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Calls operations on behalf of strategies and evaluators
    pub fn invocation_service(&self) -> &OperationInvocationService {
        &self.invocation_service
    }

    /// Evaluates graph edges
    pub fn navigator(&self) -> &EdgeNavigator {
        &self.navigator
    }

    /// Builds (and caches) semantic graphs
    pub fn graph_builder(&self) -> &SemanticGraphBuilder {
        &self.graph_builder
    }

    /// A fresh context seeded with `facts`
    pub fn query_context(self: &Arc<Self>, facts: Vec<TypedInstance>) -> QueryContext {
        self.query_context_with_cancellation(facts, CancellationToken::new())
    }

    /// A fresh context seeded with `facts` that is cancelled together with
    /// `cancellation`
    pub fn query_context_with_cancellation(
        self: &Arc<Self>,
        facts: Vec<TypedInstance>,
        cancellation: CancellationToken,
    ) -> QueryContext {
        QueryContext::new(self.clone(), facts, cancellation)
    }

    /// Resolves `targets` against `context`.
    ///
    /// Unresolvable targets are reported in [QueryResult::unmatched_nodes].
    /// Errors are reserved for failed path evaluations, cancellation and
    /// unexpected failures; at the top level the latter (including panics)
    /// surface as [QueryError::SearchRuntime].
    pub async fn find(
        &self,
        targets: Vec<QuerySpecTypeNode>,
        context: &QueryContext,
    ) -> EngineResult<QueryResult> {
        let mut unique = Vec::with_capacity(targets.len());
        for target in targets {
            if !unique.contains(&target) {
                unique.push(target);
            }
        }
        let targets = unique;

        let depth = context.depth();
        if depth > self.config.max_query_depth {
            tracing::debug!(
                depth,
                limit = self.config.max_query_depth,
                "Nested query too deep, leaving targets unresolved"
            );
            return Ok(QueryResult {
                results: targets.iter().map(|target| (target.clone(), None)).collect(),
                unmatched_nodes: targets,
                path: None,
                profiler: context.profiler().clone(),
            });
        }

        let operation_type = if depth == 0 {
            OperationType::Root
        } else {
            OperationType::Lookup
        };
        let scope = context.start_child("QueryEngine", "find", operation_type);
        scope.operation().add_context(
            "targets",
            targets
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>(),
        );
        let profiler = scope.operation().clone();
        let scoped = context.scoped(profiler.clone());

        tracing::debug!(
            depth,
            targets = ?targets.iter().map(ToString::to_string).collect::<Vec<_>>(),
            "Starting query"
        );

        let outcome = if depth == 0 {
            match AssertUnwindSafe(self.resolve(&targets, &scoped))
                .catch_unwind()
                .await
            {
                Ok(Ok(result)) => Ok(result),
                Ok(Err(error)) => Err(unexpected(error, &profiler)),
                Err(panic) => Err(QueryError::SearchRuntime {
                    message: panic_message(panic.as_ref()),
                    profiler: Some(profiler.clone()),
                }),
            }
        } else {
            self.resolve(&targets, &scoped).await
        };

        match &outcome {
            Ok(result) => scope.stop(Some(json!({
                "resolved": result.results.len() - result.unmatched_nodes.len(),
                "unmatched": result.unmatched_nodes.len(),
            }))),
            Err(error) => {
                tracing::debug!(depth, %error, "Query failed");
                scope.stop(Some(json!({ "error": error.to_string() })));
            }
        }
        outcome
    }

    /// Resolves every target in [QueryMode::Gather]
    pub async fn gather(
        &self,
        targets: Vec<QuerySpecTypeNode>,
        context: &QueryContext,
    ) -> EngineResult<QueryResult> {
        let targets = targets
            .iter()
            .map(|target| target.with_mode(QueryMode::Gather))
            .collect();
        self.find(targets, context).await
    }

    /// Finds a single value of the named type
    pub async fn find_type(&self, name: &str, context: &QueryContext) -> EngineResult<QueryResult> {
        let ty = self.schema.type_by_name(name)?;
        self.find(vec![QuerySpecTypeNode::discover(ty)], context)
            .await
    }

    /// Gathers every value of the named type
    pub async fn gather_type(
        &self,
        name: &str,
        context: &QueryContext,
    ) -> EngineResult<QueryResult> {
        let ty = self.schema.type_by_name(name)?;
        self.find(vec![QuerySpecTypeNode::gather(ty)], context)
            .await
    }

    async fn resolve(
        &self,
        targets: &[QuerySpecTypeNode],
        context: &QueryContext,
    ) -> EngineResult<QueryResult> {
        let mut resolved = IndexMap::<QuerySpecTypeNode, TypedInstance>::new();
        let mut path = None;
        let mut constraints = InvocationConstraints {
            excluded_operations: context.excluded_operations().clone(),
            resolved: HashSet::new(),
        };

        for strategy in &self.strategies {
            if constraints.unresolved(targets).next().is_none() {
                break;
            }
            if context.is_cancelled() {
                return Err(QueryError::QueryCancelled);
            }

            let outcome = strategy.invoke(targets, context, &constraints).await?;
            tracing::trace!(
                strategy = strategy.name(),
                matched = outcome.matched.len(),
                "Strategy finished"
            );

            for (target, value) in outcome.matched {
                if resolved.contains_key(&target) || !targets.contains(&target) {
                    continue;
                }
                context.add_fact(value.clone());
                constraints.resolved.insert(target.clone());
                resolved.insert(target, value);
            }
            if path.is_none() {
                path = outcome.path;
            }
        }

        let single_discovery =
            targets.len() == 1 && targets.iter().all(|target| target.mode() == QueryMode::Discover);
        let results = targets
            .iter()
            .map(|target| (target.clone(), resolved.get(target).cloned()))
            .collect::<IndexMap<_, _>>();
        let unmatched_nodes = targets
            .iter()
            .filter(|target| !resolved.contains_key(*target))
            .cloned()
            .collect();

        Ok(QueryResult {
            results,
            unmatched_nodes,
            path: if single_discovery { path } else { None },
            profiler: context.profiler().clone(),
        })
    }
}

fn unexpected(error: QueryError, profiler: &ProfilerOperation) -> QueryError {
    match error {
        QueryError::SearchFailed { .. }
        | QueryError::SearchRuntime { .. }
        | QueryError::QueryCancelled => error,
        other => QueryError::SearchRuntime {
            message: other.to_string(),
            profiler: Some(profiler.clone()),
        },
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "Strategy panicked".to_string()
    }
}

/// The outcome of a query
#[derive(Debug, Clone)]
pub struct QueryResult {
    results: IndexMap<QuerySpecTypeNode, Option<TypedInstance>>,
    unmatched_nodes: Vec<QuerySpecTypeNode>,
    path: Option<Path>,
    profiler: ProfilerOperation,
}

impl QueryResult {
    /// The value resolved for `target`
    pub fn get(&self, target: &QuerySpecTypeNode) -> Option<&TypedInstance> {
        self.results.get(target).and_then(Option::as_ref)
    }

    /// The value resolved for the first target of the named type
    pub fn get_type(&self, name: &str) -> Option<&TypedInstance> {
        self.results
            .iter()
            .find(|(target, _)| target.ty().fqn() == name)
            .and_then(|(_, value)| value.as_ref())
    }

    /// Every requested target with its value, in request order
    pub fn results(&self) -> &IndexMap<QuerySpecTypeNode, Option<TypedInstance>> {
        &self.results
    }

    /// Targets no strategy could resolve
    pub fn unmatched_nodes(&self) -> &[QuerySpecTypeNode] {
        &self.unmatched_nodes
    }

    /// True when every target resolved
    pub fn is_fully_resolved(&self) -> bool {
        self.unmatched_nodes.is_empty()
    }

    /// The graph path used, for a single discovered target
    pub fn path(&self) -> Option<&Path> {
        self.path.as_ref()
    }

    /// The profiler operation covering this query
    pub fn profiler(&self) -> &ProfilerOperation {
        &self.profiler
    }

    /// Every remote call made while answering this query
    pub fn remote_calls(&self) -> Vec<RemoteCall> {
        self.profiler.remote_calls()
    }
}

/// Configures a [QueryEngine]
pub struct QueryEngineBuilder {
    schema: Arc<Schema>,
    invokers: Vec<Arc<dyn OperationInvoker>>,
    strategies: Vec<Arc<dyn QueryStrategy>>,
    navigator: EdgeNavigator,
    config: EngineConfig,
}

impl QueryEngineBuilder {
    /// A builder with the built-in strategies and evaluators
    pub fn new(schema: Arc<Schema>) -> Self {
        Self {
            schema,
            invokers: Vec::new(),
            strategies: Vec::new(),
            navigator: EdgeNavigator::default(),
            config: EngineConfig::default(),
        }
    }

    /// Adds an invoker. Invokers are asked in registration order.
    pub fn invoker(mut self, invoker: Arc<dyn OperationInvoker>) -> Self {
        self.invokers.push(invoker);
        self
    }

    /// Appends a strategy after the built-in ones
    pub fn strategy(mut self, strategy: Arc<dyn QueryStrategy>) -> Self {
        self.strategies.push(strategy);
        self
    }

    /// Replaces the evaluator for the evaluator's relationship
    pub fn evaluator(mut self, evaluator: Arc<dyn EdgeEvaluator>) -> Self {
        self.navigator = self.navigator.with_evaluator(evaluator);
        self
    }

    /// Uses `config` instead of [EngineConfig::default]
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Builds the engine
    pub fn build(self) -> EngineResult<Arc<QueryEngine>> {
        if self.config.gather_concurrency == 0 {
            return Err(QueryError::Configuration(
                "gatherConcurrency must be at least 1".into(),
            ));
        }

        let graph_builder = SemanticGraphBuilder::new(
            self.config.graph_cache_capacity,
            self.config.relationship_costs.clone(),
        )?;
        let invocation_service =
            OperationInvocationService::new(self.invokers, self.config.invocation_timeout());

        let mut strategies: Vec<Arc<dyn QueryStrategy>> = vec![
            Arc::new(ScanStrategy),
            Arc::new(DirectServiceInvocationStrategy),
            Arc::new(DiscoverStrategy),
            Arc::new(GatherStrategy::default()),
        ];
        strategies.extend(self.strategies);

        Ok(Arc::new(QueryEngine {
            schema: self.schema,
            strategies,
            invocation_service,
            navigator: self.navigator,
            graph_builder,
            config: self.config,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cartograph_schema::{DataSource, TypeDefinition};
    use pretty_assertions::assert_eq;

    fn schema() -> anyhow::Result<Arc<Schema>> {
        Ok(Arc::new(
            Schema::builder()
                .scalar("Name")
                .type_definition(TypeDefinition::new("Person").attribute("name", "Name"))
                .build()?,
        ))
    }

    #[test]
    fn it_rejects_zero_gather_concurrency() -> anyhow::Result<()> {
        let config = EngineConfig {
            gather_concurrency: 0,
            ..EngineConfig::default()
        };
        let outcome = QueryEngine::builder(schema()?).config(config).build();

        assert!(matches!(outcome, Err(QueryError::Configuration(_))));
        Ok(())
    }

    #[tokio::test]
    async fn it_deduplicates_targets() -> anyhow::Result<()> {
        let schema = schema()?;
        let engine = QueryEngine::builder(schema.clone()).build()?;
        let person = schema.type_by_name("Person")?;
        let context = engine.query_context(vec![TypedInstance::scalar(
            schema.type_by_name("Name")?,
            "Ada",
            DataSource::Provided,
        )]);

        let node = QuerySpecTypeNode::discover(person);
        let result = context.find(vec![node.clone(), node.clone()]).await?;

        assert_eq!(result.results().len(), 1);
        assert_eq!(result.unmatched_nodes(), &[node]);
        Ok(())
    }

    #[tokio::test]
    async fn it_leaves_targets_unresolved_when_nested_too_deeply() -> anyhow::Result<()> {
        let schema = schema()?;
        let engine = QueryEngine::builder(schema.clone())
            .config(EngineConfig {
                max_query_depth: 1,
                ..EngineConfig::default()
            })
            .build()?;
        let context = engine.query_context(Vec::new()).nested().nested();
        let node = QuerySpecTypeNode::discover(schema.type_by_name("Name")?);

        let result = context.find(vec![node.clone()]).await?;

        assert_eq!(result.unmatched_nodes(), &[node]);
        assert_eq!(engine.graph_builder().build_count(), 0);
        Ok(())
    }
}
