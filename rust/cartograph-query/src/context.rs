//! The working memory of one query

use std::collections::BTreeSet;
use std::sync::Arc;

use cartograph_schema::{OperationRef, Schema, Type, TypedInstance};
use parking_lot::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;

use crate::discovery::{FactDiscoveryStrategy, ModelTree, TypeMatchingStrategy};
use crate::edge::EvaluatedEdge;
use crate::engine::{QueryEngine, QueryResult};
use crate::error::EngineResult;
use crate::profiler::{OperationType, ProfilerOperation, ProfilerScope};
use crate::target::QuerySpecTypeNode;

#[derive(Debug)]
struct ContextState {
    schema: Arc<Schema>,
    engine: Arc<QueryEngine>,
    facts: RwLock<Vec<TypedInstance>>,
    evaluated_edges: Mutex<Vec<EvaluatedEdge>>,
    cancellation: CancellationToken,
}

/// The facts known to a query, the schema they are interpreted against, and
/// the profiler operation that is current for whoever holds this handle.
///
/// Handles are cheap to clone. Clones share the fact set, the evaluated edge
/// log and the cancellation token; [QueryContext::scoped],
/// [QueryContext::excluding] and [QueryContext::nested] produce handles that
/// differ only in profiler scope, excluded operations or nesting depth.
#[derive(Debug, Clone)]
pub struct QueryContext {
    state: Arc<ContextState>,
    profiler: ProfilerOperation,
    excluded_operations: Arc<BTreeSet<OperationRef>>,
    depth: usize,
}

impl QueryContext {
    pub(crate) fn new(
        engine: Arc<QueryEngine>,
        facts: Vec<TypedInstance>,
        cancellation: CancellationToken,
    ) -> Self {
        let context = Self {
            state: Arc::new(ContextState {
                schema: engine.schema().clone(),
                engine,
                facts: RwLock::new(Vec::new()),
                evaluated_edges: Mutex::new(Vec::new()),
                cancellation,
            }),
            profiler: ProfilerOperation::root("QueryContext", "context"),
            excluded_operations: Arc::new(BTreeSet::new()),
            depth: 0,
        };
        context.add_facts(facts);
        context
    }

    /// The schema facts are interpreted against
    pub fn schema(&self) -> &Arc<Schema> {
        &self.state.schema
    }

    /// The engine that owns this query
    pub fn engine(&self) -> &Arc<QueryEngine> {
        &self.state.engine
    }

    /// The profiler operation current for this handle
    pub fn profiler(&self) -> &ProfilerOperation {
        &self.profiler
    }

    /// Operations that must not be used by searches through this handle
    pub fn excluded_operations(&self) -> &BTreeSet<OperationRef> {
        &self.excluded_operations
    }

    /// How many nested finds enclose this handle
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// A handle whose current profiler operation is `profiler`
    pub fn scoped(&self, profiler: ProfilerOperation) -> Self {
        Self {
            state: self.state.clone(),
            profiler,
            excluded_operations: self.excluded_operations.clone(),
            depth: self.depth,
        }
    }

    /// A handle that additionally excludes `operations`
    pub fn excluding(&self, operations: impl IntoIterator<Item = OperationRef>) -> Self {
        let mut excluded = (*self.excluded_operations).clone();
        excluded.extend(operations);
        Self {
            state: self.state.clone(),
            profiler: self.profiler.clone(),
            excluded_operations: Arc::new(excluded),
            depth: self.depth,
        }
    }

    /// A handle one nesting level deeper
    pub fn nested(&self) -> Self {
        Self {
            state: self.state.clone(),
            profiler: self.profiler.clone(),
            excluded_operations: self.excluded_operations.clone(),
            depth: self.depth + 1,
        }
    }

    /// Opens a profiler child under the current operation
    pub fn start_child(
        &self,
        component: impl Into<String>,
        name: impl Into<String>,
        operation_type: OperationType,
    ) -> ProfilerScope {
        self.profiler.start_child(component, name, operation_type)
    }

    /// A snapshot of the facts held directly, in insertion order
    pub fn facts(&self) -> Vec<TypedInstance> {
        self.state.facts.read().clone()
    }

    /// True if this very instance is held directly
    pub fn contains(&self, fact: &TypedInstance) -> bool {
        self.state.facts.read().iter().any(|known| known.ptr_eq(fact))
    }

    /// Adds a fact. Null values and instances already held (by reference)
    /// are ignored; returns whether the fact was added.
    pub fn add_fact(&self, fact: TypedInstance) -> bool {
        if fact.is_null() {
            return false;
        }
        let mut facts = self.state.facts.write();
        if facts.iter().any(|known| known.ptr_eq(&fact)) {
            return false;
        }
        facts.push(fact);
        true
    }

    /// Adds several facts
    pub fn add_facts(&self, facts: impl IntoIterator<Item = TypedInstance>) {
        for fact in facts {
            self.add_fact(fact);
        }
    }

    /// A fresh breadth-first walk over every fact
    pub fn model_tree(&self) -> ModelTree {
        ModelTree::new(&self.facts())
    }

    /// Looks for an existing fact of type `ty`, accepting subtypes
    pub fn find_fact(&self, ty: &Arc<Type>, policy: FactDiscoveryStrategy) -> Option<TypedInstance> {
        self.find_fact_matching(ty, policy, TypeMatchingStrategy::AllowInheritedTypes)
    }

    /// Looks for an existing fact of type `ty` using an explicit matching rule
    pub fn find_fact_matching(
        &self,
        ty: &Arc<Type>,
        policy: FactDiscoveryStrategy,
        matching: TypeMatchingStrategy,
    ) -> Option<TypedInstance> {
        policy.discover(&self.state.facts.read(), ty, matching)
    }

    /// True if a top-level fact satisfies `ty`
    pub fn has_fact_of_type(&self, ty: &Arc<Type>) -> bool {
        self.find_fact(ty, FactDiscoveryStrategy::TopLevelOnly).is_some()
    }

    pub(crate) fn record_edge(&self, edge: EvaluatedEdge) {
        self.state.evaluated_edges.lock().push(edge);
    }

    /// Every edge evaluated by this query, in evaluation order
    pub fn evaluated_edges(&self) -> Vec<EvaluatedEdge> {
        self.state.evaluated_edges.lock().clone()
    }

    /// Cancels the query. In-flight remote calls are abandoned and the query
    /// ends with [crate::QueryError::QueryCancelled].
    pub fn cancel(&self) {
        self.state.cancellation.cancel();
    }

    /// True once cancelled
    pub fn is_cancelled(&self) -> bool {
        self.state.cancellation.is_cancelled()
    }

    /// The token observed by remote calls
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.state.cancellation
    }

    /// Resolves `targets` against this context
    pub async fn find(&self, targets: Vec<QuerySpecTypeNode>) -> EngineResult<QueryResult> {
        self.engine().find(targets, self).await
    }

    /// Gathers every available value of each target type
    pub async fn gather(&self, targets: Vec<QuerySpecTypeNode>) -> EngineResult<QueryResult> {
        self.engine().gather(targets, self).await
    }
}
