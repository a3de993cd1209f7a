//! A tree-shaped recorder of engine work.
//!
//! Every unit of work opens a [ProfilerScope] under the operation that is
//! current for it. Scopes are passed explicitly (through
//! [crate::QueryContext::scoped]) rather than kept on an ambient stack, so
//! concurrently running branches each own a private child.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use cartograph_common::time::{Instant, SystemTime, epoch_millis, now};
use cartograph_schema::{OperationInput, OperationRef};
use indexmap::IndexMap;
use parking_lot::Mutex;
use serde::Serialize;
use ulid::Ulid;

/// The kind of work an operation records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperationType {
    /// A whole query
    Root,
    /// Building a semantic graph
    GraphBuilding,
    /// Evaluating one graph edge
    GraphTraversal,
    /// Looking up or gathering facts
    Lookup,
    /// Evaluating a fact discovery policy
    PolicyEvaluation,
    /// Waiting on a remote call
    RemoteCall,
}

impl OperationType {
    /// Internal operations are the engine's own overhead, as opposed to time
    /// spent waiting on remote systems
    pub fn is_internal(&self) -> bool {
        !matches!(self, OperationType::Root | OperationType::RemoteCall)
    }
}

/// How a remote call ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum RemoteCallOutcome {
    /// The call produced `values` values
    Success {
        /// Number of values returned
        values: usize,
    },
    /// The call failed
    Failed {
        /// The failure description
        message: String,
    },
    /// The call exceeded its timeout
    TimedOut,
    /// The query was cancelled while the call was in flight
    Cancelled,
}

/// A record of one remote call, kept for audit
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteCall {
    /// Unique id, also referenced by the provenance of returned facts
    pub id: String,
    /// The operation invoked
    pub operation: OperationRef,
    /// The inputs sent
    pub inputs: Vec<OperationInput>,
    /// The declared return type
    pub response_type: String,
    /// Wall-clock time spent
    pub duration_ms: u64,
    /// How the call ended
    pub outcome: RemoteCallOutcome,
}

#[derive(Debug, Default)]
struct OperationState {
    duration: Option<Duration>,
    result: Option<serde_json::Value>,
    children: Vec<ProfilerOperation>,
    context: IndexMap<String, serde_json::Value>,
    remote_calls: Vec<RemoteCall>,
}

#[derive(Debug)]
struct OperationNode {
    id: Ulid,
    component: String,
    name: String,
    operation_type: OperationType,
    path: String,
    is_root: bool,
    started_at: SystemTime,
    started: Instant,
    stops: AtomicUsize,
    state: Mutex<OperationState>,
}

/// A node of the profiler tree. Handles are cheap to clone and all clones
/// refer to the same node.
#[derive(Debug, Clone)]
pub struct ProfilerOperation(Arc<OperationNode>);

impl ProfilerOperation {
    /// Starts a new tree. Roots are containers: they are not opened through
    /// [ProfilerOperation::start_child] and need not be stopped.
    pub fn root(component: impl Into<String>, name: impl Into<String>) -> Self {
        Self::create(component.into(), name.into(), OperationType::Root, None)
    }

    fn create(
        component: String,
        name: String,
        operation_type: OperationType,
        parent: Option<&ProfilerOperation>,
    ) -> Self {
        let path = match parent {
            Some(parent) => format!("{}/{}.{}", parent.0.path, component, name),
            None => format!("/{}.{}", component, name),
        };
        Self(Arc::new(OperationNode {
            id: Ulid::new(),
            component,
            name,
            operation_type,
            path,
            is_root: parent.is_none(),
            started_at: now(),
            started: Instant::now(),
            stops: AtomicUsize::new(0),
            state: Mutex::new(OperationState::default()),
        }))
    }

    /// Opens a child operation. The returned scope stops the child when it
    /// is stopped explicitly or dropped, whichever happens first.
    pub fn start_child(
        &self,
        component: impl Into<String>,
        name: impl Into<String>,
        operation_type: OperationType,
    ) -> ProfilerScope {
        let child = Self::create(component.into(), name.into(), operation_type, Some(self));
        self.0.state.lock().children.push(child.clone());
        ProfilerScope {
            operation: child,
            stopped: false,
        }
    }

    /// Stops the operation. Stopping twice is a bug: it is logged and the
    /// first result is kept.
    pub fn stop(&self, result: Option<serde_json::Value>) {
        let previous = self.0.stops.fetch_add(1, Ordering::SeqCst);
        if previous > 0 {
            tracing::error!(
                path = %self.0.path,
                stops = previous + 1,
                "Profiler operation stopped more than once"
            );
            return;
        }
        let mut state = self.0.state.lock();
        state.duration = Some(self.0.started.elapsed());
        state.result = result;
    }

    /// Attaches a key to the operation's free-form context
    pub fn add_context(&self, key: impl Into<String>, value: impl Into<serde_json::Value>) {
        self.0.state.lock().context.insert(key.into(), value.into());
    }

    /// Records a remote call against this operation
    pub fn add_remote_call(&self, call: RemoteCall) {
        self.0.state.lock().remote_calls.push(call);
    }

    /// The unique id of the operation
    pub fn id(&self) -> String {
        self.0.id.to_string()
    }

    /// The component that opened the operation
    pub fn component(&self) -> &str {
        &self.0.component
    }

    /// The operation's name
    pub fn name(&self) -> &str {
        &self.0.name
    }

    /// The kind of work recorded
    pub fn operation_type(&self) -> OperationType {
        self.0.operation_type
    }

    /// Slash separated `component.name` segments from the root
    pub fn path(&self) -> &str {
        &self.0.path
    }

    /// True once stopped
    pub fn is_stopped(&self) -> bool {
        self.0.stops.load(Ordering::SeqCst) > 0
    }

    /// How many times the operation was stopped
    pub fn stop_count(&self) -> usize {
        self.0.stops.load(Ordering::SeqCst)
    }

    /// The recorded duration, or the time elapsed so far while running
    pub fn duration(&self) -> Duration {
        self.0
            .state
            .lock()
            .duration
            .unwrap_or_else(|| self.0.started.elapsed())
    }

    /// The value recorded at stop
    pub fn result(&self) -> Option<serde_json::Value> {
        self.0.state.lock().result.clone()
    }

    /// A context value
    pub fn context(&self, key: &str) -> Option<serde_json::Value> {
        self.0.state.lock().context.get(key).cloned()
    }

    /// Direct children, in start order
    pub fn children(&self) -> Vec<ProfilerOperation> {
        self.0.state.lock().children.clone()
    }

    /// Remote calls recorded by this operation and all of its descendants
    pub fn remote_calls(&self) -> Vec<RemoteCall> {
        let (mut calls, children) = {
            let state = self.0.state.lock();
            (state.remote_calls.clone(), state.children.clone())
        };
        for child in children {
            calls.extend(child.remote_calls());
        }
        calls
    }

    /// True if every descendant was stopped exactly once, and this operation
    /// was too unless it is a root
    pub fn is_balanced(&self) -> bool {
        let stops = self.stop_count();
        let own = if self.0.is_root { stops <= 1 } else { stops == 1 };
        own && self.children().iter().all(ProfilerOperation::is_balanced)
    }

    /// Time spent per operation type in this subtree, excluding time spent
    /// in children
    pub fn timings(&self) -> BTreeMap<OperationType, Duration> {
        let mut timings = BTreeMap::new();
        self.collect_timings(&mut timings);
        timings
    }

    fn collect_timings(&self, timings: &mut BTreeMap<OperationType, Duration>) {
        let children = self.children();
        let in_children = children
            .iter()
            .map(ProfilerOperation::duration)
            .sum::<Duration>();
        *timings.entry(self.operation_type()).or_default() +=
            self.duration().saturating_sub(in_children);
        for child in children {
            child.collect_timings(timings);
        }
    }

    /// Total time spent in internal operations
    pub fn internal_cost(&self) -> Duration {
        self.timings()
            .into_iter()
            .filter(|(operation_type, _)| operation_type.is_internal())
            .map(|(_, duration)| duration)
            .sum()
    }

    /// A serializable copy of the subtree
    pub fn snapshot(&self) -> ProfilerSnapshot {
        let (result, context, remote_calls, children) = {
            let state = self.0.state.lock();
            (
                state.result.clone(),
                state.context.clone(),
                state.remote_calls.clone(),
                state.children.clone(),
            )
        };
        ProfilerSnapshot {
            id: self.id(),
            component: self.0.component.clone(),
            name: self.0.name.clone(),
            operation_type: self.0.operation_type,
            path: self.0.path.clone(),
            start_time: epoch_millis(self.0.started_at),
            duration_ms: self.duration().as_millis() as u64,
            stopped: self.is_stopped(),
            result,
            context,
            remote_calls,
            children: children.iter().map(ProfilerOperation::snapshot).collect(),
        }
    }
}

/// Owns a running [ProfilerOperation] and guarantees it is stopped exactly
/// once, including when the work it measures fails, panics or is cancelled.
#[derive(Debug)]
pub struct ProfilerScope {
    operation: ProfilerOperation,
    stopped: bool,
}

impl ProfilerScope {
    /// The operation this scope measures
    pub fn operation(&self) -> &ProfilerOperation {
        &self.operation
    }

    /// Stops the operation with a result value
    pub fn stop(mut self, result: Option<serde_json::Value>) {
        self.stopped = true;
        self.operation.stop(result);
    }
}

impl Drop for ProfilerScope {
    fn drop(&mut self) {
        if !self.stopped {
            self.operation.add_context("aborted", true);
            self.operation.stop(None);
        }
    }
}

/// The serialized form of a profiler subtree
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfilerSnapshot {
    /// Operation id
    pub id: String,
    /// Opening component
    pub component: String,
    /// Operation name
    pub name: String,
    /// Kind of work
    #[serde(rename = "type")]
    pub operation_type: OperationType,
    /// Path from the root
    pub path: String,
    /// Start, in milliseconds since the unix epoch
    pub start_time: u64,
    /// Duration in milliseconds
    pub duration_ms: u64,
    /// Whether the operation was stopped
    pub stopped: bool,
    /// Result recorded at stop
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    /// Free-form context
    pub context: IndexMap<String, serde_json::Value>,
    /// Remote calls recorded directly by this operation
    pub remote_calls: Vec<RemoteCall>,
    /// Child operations
    pub children: Vec<ProfilerSnapshot>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn call(id: &str) -> RemoteCall {
        RemoteCall {
            id: id.into(),
            operation: OperationRef::new("Service", "op"),
            inputs: Vec::new(),
            response_type: "Thing".into(),
            duration_ms: 0,
            outcome: RemoteCallOutcome::Success { values: 1 },
        }
    }

    #[test]
    fn it_builds_a_tree_matching_call_nesting() {
        let root = ProfilerOperation::root("Engine", "query");
        let outer = root.start_child("Discover", "search", OperationType::Lookup);
        let inner = outer
            .operation()
            .start_child("Navigator", "edge", OperationType::GraphTraversal);

        assert_eq!(inner.operation().path(), "/Engine.query/Discover.search/Navigator.edge");
        inner.stop(None);
        outer.stop(Some(serde_json::json!("done")));

        assert!(root.is_balanced());
        assert_eq!(root.children().len(), 1);
        assert_eq!(root.children()[0].children().len(), 1);
    }

    #[test]
    fn it_stops_scopes_on_every_exit_path() {
        let root = ProfilerOperation::root("Engine", "query");

        let failing = || -> Result<(), &'static str> {
            let _scope = root.start_child("Strategy", "fails", OperationType::Lookup);
            Err("boom")
        };
        assert!(failing().is_err());

        let children = root.children();
        let child = &children[0];
        assert!(child.is_stopped());
        assert_eq!(child.context("aborted"), Some(serde_json::json!(true)));
        assert!(root.is_balanced());
    }

    #[test]
    fn it_flags_double_stops_as_unbalanced() {
        let root = ProfilerOperation::root("Engine", "query");
        let scope = root.start_child("Strategy", "twice", OperationType::Lookup);
        let handle = scope.operation().clone();
        scope.stop(Some(serde_json::json!(1)));
        handle.stop(Some(serde_json::json!(2)));

        assert_eq!(handle.stop_count(), 2);
        assert_eq!(handle.result(), Some(serde_json::json!(1)));
        assert!(!root.is_balanced());
    }

    #[test]
    fn it_flags_running_children_as_unbalanced() {
        let root = ProfilerOperation::root("Engine", "query");
        let scope = root.start_child("Strategy", "running", OperationType::Lookup);

        assert!(!root.is_balanced());
        scope.stop(None);
        assert!(root.is_balanced());
    }

    #[test]
    fn it_collates_remote_calls_across_the_subtree() {
        let root = ProfilerOperation::root("Engine", "query");
        let first = root.start_child("Invoker", "a", OperationType::RemoteCall);
        first.operation().add_remote_call(call("a"));
        let nested = first
            .operation()
            .start_child("Invoker", "b", OperationType::RemoteCall);
        nested.operation().add_remote_call(call("b"));
        nested.stop(None);
        first.stop(None);

        let ids = root
            .remote_calls()
            .into_iter()
            .map(|call| call.id)
            .collect::<Vec<_>>();
        assert_eq!(ids, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn it_attributes_time_excluding_children() {
        let root = ProfilerOperation::root("Engine", "query");
        let lookup = root.start_child("Strategy", "lookup", OperationType::Lookup);
        let remote = lookup
            .operation()
            .start_child("Invoker", "call", OperationType::RemoteCall);
        std::thread::sleep(Duration::from_millis(20));
        remote.stop(None);
        lookup.stop(None);

        let timings = root.timings();
        let remote_time = timings
            .get(&OperationType::RemoteCall)
            .copied()
            .unwrap_or_default();
        let lookup_time = timings
            .get(&OperationType::Lookup)
            .copied()
            .unwrap_or_default();
        assert!(remote_time >= Duration::from_millis(20));
        assert!(lookup_time < remote_time);
        assert_eq!(root.internal_cost(), lookup_time);
    }

    #[test]
    fn it_serializes_snapshots() -> anyhow::Result<()> {
        let root = ProfilerOperation::root("Engine", "query");
        let scope = root.start_child("Strategy", "scan", OperationType::Lookup);
        scope.operation().add_context("targets", 1);
        scope.stop(None);

        let snapshot = serde_json::to_value(root.snapshot())?;
        assert_eq!(snapshot["children"][0]["type"], "LOOKUP");
        assert_eq!(snapshot["children"][0]["context"]["targets"], 1);
        assert_eq!(snapshot["children"][0]["stopped"], true);
        Ok(())
    }
}
