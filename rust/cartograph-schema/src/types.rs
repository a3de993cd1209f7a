use std::collections::BTreeSet;
use std::fmt::{self, Display};
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use indexmap::IndexMap;
use serde::Serialize;

use crate::QualifiedName;

/// A declared attribute of an object type
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Field {
    name: String,
    type_name: QualifiedName,
}

impl Field {
    /// Declares `name` with values of the type `type_name`
    pub fn new(name: impl Into<String>, type_name: QualifiedName) -> Self {
        Self {
            name: name.into(),
            type_name,
        }
    }

    /// The attribute name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The type of the attribute's values
    pub fn type_name(&self) -> &QualifiedName {
        &self.type_name
    }
}

/// A named semantic type.
///
/// Types are identified by their parameterized name. Equality and hashing
/// only consider that name, so two handles to the same declared type compare
/// equal no matter where they were obtained.
#[derive(Debug, Clone)]
pub struct Type {
    name: QualifiedName,
    canonical_name: String,
    attributes: IndexMap<String, Field>,
    inherits: Vec<QualifiedName>,
    inheritance_graph: BTreeSet<String>,
    closed: bool,
    parameter_type: bool,
    member: Option<Arc<Type>>,
}

impl Type {
    pub(crate) fn declared(
        name: QualifiedName,
        attributes: IndexMap<String, Field>,
        inherits: Vec<QualifiedName>,
        inheritance_graph: BTreeSet<String>,
        closed: bool,
        parameter_type: bool,
    ) -> Self {
        Self {
            canonical_name: name.parameterized_name(),
            name,
            attributes,
            inherits,
            inheritance_graph,
            closed,
            parameter_type,
            member: None,
        }
    }

    /// The collection type whose members are `member`
    pub fn array_of(member: Arc<Type>) -> Self {
        let name = QualifiedName::array_of(member.name.clone());
        let inheritance_graph = member
            .inheritance_graph
            .iter()
            .map(|ancestor| format!("{}<{}>", crate::ARRAY_TYPE_NAME, ancestor))
            .collect();
        Self {
            canonical_name: name.parameterized_name(),
            name,
            attributes: IndexMap::new(),
            inherits: Vec::new(),
            inheritance_graph,
            closed: false,
            parameter_type: false,
            member: Some(member),
        }
    }

    /// The qualified name of this type
    pub fn name(&self) -> &QualifiedName {
        &self.name
    }

    /// The canonical (parameterized) name, used as the type's identity
    pub fn fqn(&self) -> &str {
        &self.canonical_name
    }

    /// Declared attributes in declaration order
    pub fn attributes(&self) -> &IndexMap<String, Field> {
        &self.attributes
    }

    /// Looks up a declared attribute
    pub fn attribute(&self, name: &str) -> Option<&Field> {
        self.attributes.get(name)
    }

    /// Directly declared supertypes
    pub fn inherits(&self) -> &[QualifiedName] {
        &self.inherits
    }

    /// Every supertype this type transitively inherits from, by canonical
    /// name. The type itself is not included.
    pub fn inheritance_graph(&self) -> &BTreeSet<String> {
        &self.inheritance_graph
    }

    /// True if `name` is a (transitive) supertype of this type
    pub fn inherits_from(&self, name: &str) -> bool {
        self.inheritance_graph.contains(name)
    }

    /// Scalars hold a single raw value and have no attributes
    pub fn is_scalar(&self) -> bool {
        self.attributes.is_empty() && self.member.is_none()
    }

    /// Closed types are opaque: their values are never traversed
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Parameter types may be constructed by the engine from their
    /// attributes when an operation requires one
    pub fn is_parameter_type(&self) -> bool {
        self.parameter_type
    }

    /// True for `Array<T>`
    pub fn is_collection(&self) -> bool {
        self.member.is_some()
    }

    /// The member type of a collection
    pub fn collection_type(&self) -> Option<&Arc<Type>> {
        self.member.as_ref()
    }

    /// True if a value of this type may be used where `requested` is wanted:
    /// the names are equal, or `requested` appears in this type's inheritance
    /// graph.
    pub fn is_assignable_to(&self, requested: &Type) -> bool {
        if self.canonical_name == requested.canonical_name
            || self.inherits_from(&requested.canonical_name)
        {
            return true;
        }
        match (&self.member, &requested.member) {
            (Some(member), Some(requested_member)) => member.is_assignable_to(requested_member),
            _ => false,
        }
    }
}

impl PartialEq for Type {
    fn eq(&self, other: &Self) -> bool {
        self.canonical_name == other.canonical_name
    }
}

impl Eq for Type {}

impl Hash for Type {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.canonical_name.hash(state);
    }
}

impl Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.canonical_name)
    }
}

/// A type declaration handed to [crate::SchemaBuilder]
#[derive(Debug, Clone)]
pub struct TypeDefinition {
    pub(crate) name: String,
    pub(crate) attributes: Vec<(String, String)>,
    pub(crate) inherits: Vec<String>,
    pub(crate) closed: bool,
    pub(crate) parameter_type: bool,
}

impl TypeDefinition {
    /// Starts a declaration for `name`. Without attributes it is a scalar.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            attributes: Vec::new(),
            inherits: Vec::new(),
            closed: false,
            parameter_type: false,
        }
    }

    /// Adds an attribute named `name` of type `type_name`
    pub fn attribute(mut self, name: impl Into<String>, type_name: impl Into<String>) -> Self {
        self.attributes.push((name.into(), type_name.into()));
        self
    }

    /// Declares a supertype
    pub fn inherits(mut self, type_name: impl Into<String>) -> Self {
        self.inherits.push(type_name.into());
        self
    }

    /// Marks the type as closed
    pub fn closed(mut self) -> Self {
        self.closed = true;
        self
    }

    /// Marks the type as constructible from its attributes
    pub fn parameter_type(mut self) -> Self {
        self.parameter_type = true;
        self
    }
}
