//! Error types for the query engine

use cartograph_schema::{OperationRef, SchemaError};
use serde::Serialize;
use thiserror::Error;

use crate::edge::EvaluatedEdge;
use crate::profiler::{ProfilerOperation, ProfilerSnapshot};

/// Errors raised by an [crate::OperationInvoker] or while awaiting one
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InvocationError {
    /// No registered invoker accepts the operation
    #[error("No invoker supports {operation}")]
    NoInvoker { operation: OperationRef },

    /// The remote call did not complete in time
    #[error("{operation} timed out after {timeout_ms}ms")]
    Timeout {
        operation: OperationRef,
        timeout_ms: u64,
    },

    /// The remote call reported a failure
    #[error("{operation} failed: {message}")]
    Failed {
        operation: OperationRef,
        message: String,
    },

    /// The remote call completed without producing a value
    #[error("{operation} returned no values")]
    NoResult { operation: OperationRef },

    /// The query was cancelled while the call was in flight
    #[error("Remote call to {operation} was cancelled")]
    Cancelled { operation: OperationRef },
}

/// Errors that terminate a query
#[derive(Error, Debug, Clone)]
pub enum QueryError {
    /// An edge along a discovered path could not be evaluated. Carries the
    /// edges that were evaluated successfully before the failure.
    #[error("Search failed: {message}")]
    SearchFailed {
        message: String,
        evaluated_path: Vec<EvaluatedEdge>,
        profiler: ProfilerOperation,
    },

    /// An unexpected failure inside strategy execution
    #[error("Search failed unexpectedly: {message}")]
    SearchRuntime {
        message: String,
        profiler: Option<ProfilerOperation>,
    },

    /// The query was cancelled from outside
    #[error("Query was cancelled")]
    QueryCancelled,

    /// An operation's inputs could not be found or constructed
    #[error("Unable to resolve parameters {parameters:?} of {operation}")]
    UnresolvedOperationParameters {
        operation: OperationRef,
        parameters: Vec<String>,
    },

    /// A remote call failed
    #[error(transparent)]
    Invocation(#[from] InvocationError),

    /// A schema lookup failed
    #[error(transparent)]
    Schema(#[from] SchemaError),

    /// Engine configuration was invalid
    #[error("Invalid configuration: {0}")]
    Configuration(String),

    /// Engine state did not match what an operation required
    #[error("Inconsistent engine state: {message}")]
    Inconsistent { message: String },
}

/// Result type for engine operations
pub type EngineResult<T> = Result<T, QueryError>;

impl From<serde_json::Error> for QueryError {
    fn from(error: serde_json::Error) -> Self {
        QueryError::Configuration(error.to_string())
    }
}

impl QueryError {
    /// The profiler tree attached to this error, if any
    pub fn profiler(&self) -> Option<&ProfilerOperation> {
        match self {
            QueryError::SearchFailed { profiler, .. } => Some(profiler),
            QueryError::SearchRuntime { profiler, .. } => profiler.as_ref(),
            _ => None,
        }
    }

    /// A short, stable name for the kind of failure
    pub fn kind(&self) -> &'static str {
        match self {
            QueryError::SearchFailed { .. } => "searchFailed",
            QueryError::SearchRuntime { .. } => "searchRuntime",
            QueryError::QueryCancelled => "queryCancelled",
            QueryError::UnresolvedOperationParameters { .. } => "unresolvedOperationParameters",
            QueryError::Invocation(_) => "invocation",
            QueryError::Schema(_) => "schema",
            QueryError::Configuration(_) => "configuration",
            QueryError::Inconsistent { .. } => "inconsistent",
        }
    }

    /// The serializable failure object handed to callers
    pub fn failure(&self) -> QueryFailure {
        let path = match self {
            QueryError::SearchFailed { evaluated_path, .. } => evaluated_path
                .iter()
                .map(EvaluatedEdge::description)
                .collect(),
            _ => Vec::new(),
        };
        QueryFailure {
            kind: self.kind(),
            message: self.to_string(),
            path,
            profiler: self.profiler().map(ProfilerOperation::snapshot),
        }
    }
}

/// A structured description of a failed query
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryFailure {
    /// See [QueryError::kind]
    pub kind: &'static str,
    /// Human readable message
    pub message: String,
    /// Descriptions of the edges evaluated before the failure
    pub path: Vec<String>,
    /// The profiler tree at the time of failure
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profiler: Option<ProfilerSnapshot>,
}
