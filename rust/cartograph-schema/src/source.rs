use serde::{Deserialize, Serialize};

use crate::OperationRef;

/// Identifies one recorded remote call
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteCallRef {
    /// Unique id of the call, shared with the profiler record
    pub id: String,
    /// The operation that was invoked
    pub operation: OperationRef,
}

/// One input passed to a remote call, kept in raw form for lineage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationInput {
    /// The parameter's type
    pub type_name: String,
    /// The parameter's name, if declared
    pub parameter: Option<String>,
    /// The raw value that was sent
    pub value: serde_json::Value,
}

/// How a fact came to be known
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum DataSource {
    /// Supplied by the caller
    Provided,
    /// Returned by a remote call
    #[serde(rename_all = "camelCase")]
    OperationResult {
        /// The call that produced the value
        remote_call: RemoteCallRef,
        /// What the call was given
        inputs: Vec<OperationInput>,
    },
    /// Computed by the engine from other facts (reading an attribute,
    /// constructing a parameter object)
    Derived {
        /// A human readable description of the derivation
        description: String,
    },
    /// A collection assembled from members with different sources
    Mixed,
    /// No provenance was recorded
    #[default]
    Undefined,
}

impl DataSource {
    /// A derived source described by `description`
    pub fn derived(description: impl Into<String>) -> Self {
        DataSource::Derived {
            description: description.into(),
        }
    }

    /// The remote call behind this value, if any
    pub fn remote_call(&self) -> Option<&RemoteCallRef> {
        match self {
            DataSource::OperationResult { remote_call, .. } => Some(remote_call),
            _ => None,
        }
    }
}
