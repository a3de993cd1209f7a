#![warn(missing_docs)]

//! Semantic query resolution. Given a set of known facts and a requested
//! output type, the engine works out which operations to call (and in which
//! order) to produce a value of that type.
//!
//! Resolution is driven by [QueryEngine], which tries a fixed list of
//! strategies: reuse an existing fact, call an operation that needs no input,
//! search the [graph::SemanticGraph] for a path from a known fact to the
//! target, or gather values from every operation that can produce it.

/// Engine tunables
pub mod config;
pub use config::*;

/// Per-query working memory
pub mod context;
pub use context::*;

/// Policies for finding existing facts
pub mod discovery;
pub use discovery::*;

/// Edge evaluation and parameter resolution
pub mod edge;
pub use edge::*;

/// The query pipeline and its result type
pub mod engine;
pub use engine::*;

/// Error types raised by the engine
pub mod error;
pub use error::*;

/// The semantic graph and path search
pub mod graph;

/// Remote operation invocation
pub mod invocation;
pub use invocation::*;

/// Hierarchical operation profiling
pub mod profiler;
pub use profiler::*;

/// Resolution strategies
pub mod strategy;
pub use strategy::*;

/// Query targets
pub mod target;
pub use target::*;

/// Test helpers
#[cfg(any(test, feature = "helpers"))]
pub mod helpers;
