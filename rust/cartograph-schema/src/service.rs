use std::fmt::{self, Display};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::Type;

/// Identifies one operation of one service
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OperationRef {
    /// Name of the owning service
    pub service: String,
    /// Name of the operation within the service
    pub operation: String,
}

impl OperationRef {
    /// Refers to `operation` of `service`
    pub fn new(service: impl Into<String>, operation: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            operation: operation.into(),
        }
    }
}

impl Display for OperationRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@@{}", self.service, self.operation)
    }
}

/// One input of an operation
#[derive(Debug, Clone)]
pub struct Parameter {
    name: Option<String>,
    ty: Arc<Type>,
}

impl Parameter {
    pub(crate) fn new(name: Option<String>, ty: Arc<Type>) -> Self {
        Self { name, ty }
    }

    /// The declared parameter name, if any
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// The parameter's type
    pub fn ty(&self) -> &Arc<Type> {
        &self.ty
    }
}

/// A remote operation: the edge kind that lets the engine turn values it has
/// into values it wants.
#[derive(Debug, Clone)]
pub struct Operation {
    name: String,
    service: String,
    parameters: Vec<Parameter>,
    return_type: Arc<Type>,
}

impl Operation {
    pub(crate) fn new(
        name: String,
        service: String,
        parameters: Vec<Parameter>,
        return_type: Arc<Type>,
    ) -> Self {
        Self {
            name,
            service,
            parameters,
            return_type,
        }
    }

    /// The operation name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The name of the owning service
    pub fn service_name(&self) -> &str {
        &self.service
    }

    /// Inputs in declaration order
    pub fn parameters(&self) -> &[Parameter] {
        &self.parameters
    }

    /// The type the operation returns
    pub fn return_type(&self) -> &Arc<Type> {
        &self.return_type
    }

    /// A reference usable as a map key
    pub fn reference(&self) -> OperationRef {
        OperationRef::new(&self.service, &self.name)
    }
}

/// A named group of operations
#[derive(Debug, Clone)]
pub struct Service {
    name: String,
    operations: Vec<Arc<Operation>>,
}

impl Service {
    pub(crate) fn new(name: String, operations: Vec<Arc<Operation>>) -> Self {
        Self { name, operations }
    }

    /// The service name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Operations in declaration order
    pub fn operations(&self) -> &[Arc<Operation>] {
        &self.operations
    }

    /// Looks up an operation by name
    pub fn operation(&self, name: &str) -> Option<&Arc<Operation>> {
        self.operations
            .iter()
            .find(|operation| operation.name() == name)
    }
}

/// An operation declaration handed to [crate::SchemaBuilder]
#[derive(Debug, Clone)]
pub struct OperationDefinition {
    pub(crate) name: String,
    pub(crate) parameters: Vec<(Option<String>, String)>,
    pub(crate) return_type: Option<String>,
}

impl OperationDefinition {
    /// Starts a declaration for `name`
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            parameters: Vec::new(),
            return_type: None,
        }
    }

    /// Adds an unnamed parameter of type `type_name`
    pub fn parameter(mut self, type_name: impl Into<String>) -> Self {
        self.parameters.push((None, type_name.into()));
        self
    }

    /// Adds a named parameter of type `type_name`
    pub fn named_parameter(
        mut self,
        name: impl Into<String>,
        type_name: impl Into<String>,
    ) -> Self {
        self.parameters.push((Some(name.into()), type_name.into()));
        self
    }

    /// Sets the return type
    pub fn returns(mut self, type_name: impl Into<String>) -> Self {
        self.return_type = Some(type_name.into());
        self
    }
}

/// A service declaration handed to [crate::SchemaBuilder]
#[derive(Debug, Clone)]
pub struct ServiceDefinition {
    pub(crate) name: String,
    pub(crate) operations: Vec<OperationDefinition>,
}

impl ServiceDefinition {
    /// Starts a declaration for `name`
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            operations: Vec::new(),
        }
    }

    /// Adds an operation
    pub fn operation(mut self, operation: OperationDefinition) -> Self {
        self.operations.push(operation);
        self
    }
}
