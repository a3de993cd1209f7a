#![warn(missing_docs)]

//! The schema side of cartograph: named semantic types, the services and
//! operations that can produce them, and the typed facts that flow through a
//! query. Everything in this crate is immutable once built and can be shared
//! freely between concurrent queries.

/// Error types raised while building or reading a schema
pub mod error;
pub use error::*;

/// Fully-qualified, possibly parameterized type names
pub mod name;
pub use name::*;

/// Semantic types and their attributes
pub mod types;
pub use types::*;

/// Services and the operations they expose
pub mod service;
pub use service::*;

/// The schema registry and its builder
pub mod schema;
pub use schema::*;

/// Provenance records attached to every fact
pub mod source;
pub use source::*;

/// Typed values (facts)
pub mod instance;
pub use instance::*;
