use std::fmt::{self, Display};
use std::sync::Arc;

use indexmap::IndexMap;

use crate::{DataSource, Schema, SchemaError, SchemaResult, Type};

/// The payload of a [TypedInstance]
#[derive(Debug, Clone)]
pub enum InstanceValue {
    /// A single raw value
    Scalar(serde_json::Value),
    /// Attribute values of an object type, in declaration order
    Object(IndexMap<String, TypedInstance>),
    /// Members of a collection type
    Collection(Vec<TypedInstance>),
    /// No value
    Null,
}

#[derive(Debug)]
struct InstanceData {
    ty: Arc<Type>,
    value: InstanceValue,
    source: DataSource,
}

/// A value annotated with its semantic type and provenance: a fact.
///
/// Instances are immutable and cheap to clone. Cloning preserves reference
/// identity ([TypedInstance::ptr_eq]); `==` compares type and value and
/// ignores provenance.
#[derive(Debug, Clone)]
pub struct TypedInstance(Arc<InstanceData>);

impl TypedInstance {
    /// Wraps `value` as an instance of `ty`
    pub fn new(ty: Arc<Type>, value: InstanceValue, source: DataSource) -> Self {
        Self(Arc::new(InstanceData { ty, value, source }))
    }

    /// A scalar instance
    pub fn scalar(ty: Arc<Type>, value: impl Into<serde_json::Value>, source: DataSource) -> Self {
        Self::new(ty, InstanceValue::Scalar(value.into()), source)
    }

    /// An object instance built from attribute values
    pub fn object(
        ty: Arc<Type>,
        attributes: IndexMap<String, TypedInstance>,
        source: DataSource,
    ) -> Self {
        Self::new(ty, InstanceValue::Object(attributes), source)
    }

    /// A collection of `members` typed as `Array<member_type>`
    pub fn collection(
        member_type: Arc<Type>,
        members: Vec<TypedInstance>,
        source: DataSource,
    ) -> Self {
        Self::new(
            Arc::new(Type::array_of(member_type)),
            InstanceValue::Collection(members),
            source,
        )
    }

    /// The null value of `ty`
    pub fn null(ty: Arc<Type>, source: DataSource) -> Self {
        Self::new(ty, InstanceValue::Null, source)
    }

    /// Converts a JSON document into a fact tree following the attributes
    /// declared on `ty`. Undeclared JSON keys are ignored; declared
    /// attributes missing from the document are left absent.
    pub fn from_json(
        ty: Arc<Type>,
        json: &serde_json::Value,
        schema: &Schema,
        source: DataSource,
    ) -> SchemaResult<Self> {
        use serde_json::Value;

        let incompatible = |type_name: &str, reason: &str| SchemaError::IncompatibleValue {
            type_name: type_name.to_string(),
            reason: reason.to_string(),
        };

        if json.is_null() {
            return Ok(Self::null(ty, source));
        }

        if let Some(member_type) = ty.collection_type() {
            let Value::Array(items) = json else {
                return Err(incompatible(ty.fqn(), "expected an array"));
            };
            let members = items
                .iter()
                .map(|item| Self::from_json(member_type.clone(), item, schema, source.clone()))
                .collect::<SchemaResult<Vec<_>>>()?;
            return Ok(Self::new(ty, InstanceValue::Collection(members), source));
        }

        if ty.is_scalar() {
            if json.is_array() || json.is_object() {
                return Err(incompatible(ty.fqn(), "expected a scalar"));
            }
            return Ok(Self::scalar(ty, json.clone(), source));
        }

        let Value::Object(entries) = json else {
            return Err(incompatible(ty.fqn(), "expected an object"));
        };
        let mut attributes = IndexMap::new();
        for (name, field) in ty.attributes() {
            let Some(entry) = entries.get(name) else {
                continue;
            };
            let field_type = schema.resolve(field.type_name())?;
            attributes.insert(
                name.clone(),
                Self::from_json(field_type, entry, schema, source.clone())?,
            );
        }
        Ok(Self::object(ty, attributes, source))
    }

    /// Converts the fact tree back to plain JSON
    pub fn to_raw(&self) -> serde_json::Value {
        match self.value() {
            InstanceValue::Scalar(value) => value.clone(),
            InstanceValue::Object(attributes) => serde_json::Value::Object(
                attributes
                    .iter()
                    .map(|(name, value)| (name.clone(), value.to_raw()))
                    .collect(),
            ),
            InstanceValue::Collection(members) => {
                serde_json::Value::Array(members.iter().map(TypedInstance::to_raw).collect())
            }
            InstanceValue::Null => serde_json::Value::Null,
        }
    }

    /// The instance's type
    pub fn ty(&self) -> &Arc<Type> {
        &self.0.ty
    }

    /// The instance's payload
    pub fn value(&self) -> &InstanceValue {
        &self.0.value
    }

    /// The instance's provenance
    pub fn source(&self) -> &DataSource {
        &self.0.source
    }

    /// Reads an attribute of an object instance
    pub fn attribute(&self, name: &str) -> Option<&TypedInstance> {
        match self.value() {
            InstanceValue::Object(attributes) => attributes.get(name),
            _ => None,
        }
    }

    /// Members of a collection instance
    pub fn members(&self) -> &[TypedInstance] {
        match self.value() {
            InstanceValue::Collection(members) => members,
            _ => &[],
        }
    }

    /// True if this holds no value
    pub fn is_null(&self) -> bool {
        matches!(self.value(), InstanceValue::Null)
    }

    /// True if both handles refer to the very same instance
    pub fn ptr_eq(&self, other: &TypedInstance) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// The same type and value with a different provenance
    pub fn with_source(&self, source: DataSource) -> Self {
        Self::new(self.ty().clone(), self.value().clone(), source)
    }
}

impl PartialEq for TypedInstance {
    fn eq(&self, other: &Self) -> bool {
        if self.ptr_eq(other) {
            return true;
        }
        if self.ty() != other.ty() {
            return false;
        }
        match (self.value(), other.value()) {
            (InstanceValue::Scalar(left), InstanceValue::Scalar(right)) => left == right,
            (InstanceValue::Object(left), InstanceValue::Object(right)) => left == right,
            (InstanceValue::Collection(left), InstanceValue::Collection(right)) => left == right,
            (InstanceValue::Null, InstanceValue::Null) => true,
            _ => false,
        }
    }
}

impl Display for TypedInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.ty().name().short_name(), self.to_raw())
    }
}
