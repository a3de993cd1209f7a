//! Error types for schema construction and lookup

use thiserror::Error;

/// Errors that can occur while building a [crate::Schema] or converting data
/// against it
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchemaError {
    /// A type was referenced by name but is not declared
    #[error("Type {name:?} is not present in the schema")]
    UnknownType { name: String },

    /// An operation was referenced but is not declared
    #[error("Operation {operation:?} is not present in the schema")]
    UnknownOperation { operation: String },

    /// The same type was declared twice
    #[error("Type {name:?} is declared more than once")]
    DuplicateType { name: String },

    /// An operation declaration is missing a required part
    #[error("Operation {operation:?} is incomplete: {reason}")]
    IncompleteOperation { operation: String, reason: String },

    /// A type (transitively) inherits from itself
    #[error("Type {name:?} participates in an inheritance cycle")]
    InheritanceCycle { name: String },

    /// A type name could not be parsed
    #[error("Invalid type name {name:?}: {reason}")]
    InvalidName { name: String, reason: String },

    /// Raw data did not have the shape its type requires
    #[error("Value for {type_name} is incompatible: {reason}")]
    IncompatibleValue { type_name: String, reason: String },
}

/// Result type for schema operations
pub type SchemaResult<T> = Result<T, SchemaError>;
