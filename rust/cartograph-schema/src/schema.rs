use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use indexmap::IndexMap;

use crate::{
    Field, Operation, OperationRef, Parameter, QualifiedName, SchemaError, SchemaResult, Service,
    ServiceDefinition, Type, TypeDefinition,
};

/// A read-only registry of types and services.
///
/// A schema is built once with a [SchemaBuilder] and is then shared (behind an
/// [Arc]) by every query that runs against it.
#[derive(Debug)]
pub struct Schema {
    types: IndexMap<String, Arc<Type>>,
    services: Vec<Arc<Service>>,
    fingerprint: String,
}

impl Schema {
    /// Starts building a schema
    pub fn builder() -> SchemaBuilder {
        SchemaBuilder::default()
    }

    /// Resolves a type by name. Collection names (`Order[]`, `Array<Order>`)
    /// resolve as long as their member type is known.
    pub fn type_by_name(&self, name: &str) -> SchemaResult<Arc<Type>> {
        self.resolve(&QualifiedName::parse(name)?)
    }

    /// Resolves a type by qualified name
    pub fn resolve(&self, name: &QualifiedName) -> SchemaResult<Arc<Type>> {
        let canonical = name.parameterized_name();
        if let Some(ty) = self.types.get(&canonical) {
            return Ok(ty.clone());
        }
        match name.member() {
            Some(member) => Ok(Arc::new(Type::array_of(self.resolve(member)?))),
            None => Err(SchemaError::UnknownType { name: canonical }),
        }
    }

    /// True if `name` resolves to a type
    pub fn has_type(&self, name: &str) -> bool {
        self.type_by_name(name).is_ok()
    }

    /// Resolves the type of the attribute `attribute` declared on `owner`
    pub fn attribute_type(&self, owner: &Type, attribute: &str) -> SchemaResult<Arc<Type>> {
        let field = owner
            .attribute(attribute)
            .ok_or_else(|| SchemaError::UnknownType {
                name: format!("{}.{}", owner.fqn(), attribute),
            })?;
        self.resolve(field.type_name())
    }

    /// Declared and referenced types, in declaration order
    pub fn types(&self) -> impl Iterator<Item = &Arc<Type>> {
        self.types.values()
    }

    /// Declared services, in declaration order
    pub fn services(&self) -> &[Arc<Service>] {
        &self.services
    }

    /// Every operation paired with its service, in declaration order
    pub fn operations(&self) -> impl Iterator<Item = (&Arc<Service>, &Arc<Operation>)> {
        self.services.iter().flat_map(|service| {
            service
                .operations()
                .iter()
                .map(move |operation| (service, operation))
        })
    }

    /// Looks up a single operation
    pub fn operation(&self, reference: &OperationRef) -> SchemaResult<(Arc<Service>, Arc<Operation>)> {
        self.operations()
            .find(|(_, operation)| operation.reference() == *reference)
            .map(|(service, operation)| (service.clone(), operation.clone()))
            .ok_or_else(|| SchemaError::UnknownOperation {
                operation: reference.to_string(),
            })
    }

    /// Operations whose return type may be used as `ty`
    pub fn operations_with_return_type(&self, ty: &Type) -> Vec<(Arc<Service>, Arc<Operation>)> {
        self.operations()
            .filter(|(_, operation)| operation.return_type().is_assignable_to(ty))
            .map(|(service, operation)| (service.clone(), operation.clone()))
            .collect()
    }

    /// Operations that can be invoked without any input
    pub fn operations_with_no_argument(&self) -> Vec<(Arc<Service>, Arc<Operation>)> {
        self.operations()
            .filter(|(_, operation)| operation.parameters().is_empty())
            .map(|(service, operation)| (service.clone(), operation.clone()))
            .collect()
    }

    /// A stable hash over every type and operation. Two schemas with the same
    /// fingerprint produce the same semantic graph.
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }
}

/// Collects type and service declarations and validates them into a [Schema]
#[derive(Debug, Default, Clone)]
pub struct SchemaBuilder {
    types: Vec<TypeDefinition>,
    services: Vec<ServiceDefinition>,
}

impl SchemaBuilder {
    /// Declares a type
    pub fn type_definition(mut self, definition: TypeDefinition) -> Self {
        self.types.push(definition);
        self
    }

    /// Declares a scalar type
    pub fn scalar(self, name: impl Into<String>) -> Self {
        self.type_definition(TypeDefinition::new(name))
    }

    /// Declares a service
    pub fn service(mut self, definition: ServiceDefinition) -> Self {
        self.services.push(definition);
        self
    }

    /// Validates the declarations and produces the schema
    pub fn build(self) -> SchemaResult<Schema> {
        let mut definitions = IndexMap::new();
        for definition in &self.types {
            let name = QualifiedName::parse(&definition.name)?;
            let canonical = name.parameterized_name();
            if definitions.insert(canonical.clone(), (name, definition)).is_some() {
                return Err(SchemaError::DuplicateType { name: canonical });
            }
        }

        let mut ancestry = BTreeMap::new();
        for canonical in definitions.keys() {
            collect_ancestors(canonical, &definitions, &mut Vec::new(), &mut ancestry)?;
        }

        let mut types = IndexMap::new();
        for (canonical, (name, definition)) in &definitions {
            let mut attributes = IndexMap::new();
            for (attribute, type_name) in &definition.attributes {
                attributes.insert(
                    attribute.clone(),
                    Field::new(attribute.clone(), QualifiedName::parse(type_name)?),
                );
            }
            let inherits = definition
                .inherits
                .iter()
                .map(|parent| QualifiedName::parse(parent))
                .collect::<SchemaResult<Vec<_>>>()?;
            let inheritance_graph = ancestry.get(canonical).cloned().unwrap_or_default();

            types.insert(
                canonical.clone(),
                Arc::new(Type::declared(
                    name.clone(),
                    attributes,
                    inherits,
                    inheritance_graph,
                    definition.closed,
                    definition.parameter_type,
                )),
            );
        }

        let declared = types.values().cloned().collect::<Vec<_>>();
        for ty in declared {
            for field in ty.attributes().values() {
                resolve_or_synthesize(field.type_name(), &mut types)?;
            }
        }

        let mut services = Vec::new();
        for service in &self.services {
            let mut operations = Vec::new();
            for operation in &service.operations {
                let mut parameters = Vec::new();
                for (name, type_name) in &operation.parameters {
                    let ty = resolve_or_synthesize(&QualifiedName::parse(type_name)?, &mut types)?;
                    parameters.push(Parameter::new(name.clone(), ty));
                }
                let return_type = operation.return_type.as_deref().ok_or_else(|| {
                    SchemaError::IncompleteOperation {
                        operation: format!("{}@@{}", service.name, operation.name),
                        reason: "no return type declared".into(),
                    }
                })?;
                let return_type =
                    resolve_or_synthesize(&QualifiedName::parse(return_type)?, &mut types)?;
                operations.push(Arc::new(Operation::new(
                    operation.name.clone(),
                    service.name.clone(),
                    parameters,
                    return_type,
                )));
            }
            services.push(Arc::new(Service::new(service.name.clone(), operations)));
        }

        let fingerprint = fingerprint(&types, &services);

        Ok(Schema {
            types,
            services,
            fingerprint,
        })
    }
}

fn collect_ancestors(
    canonical: &str,
    definitions: &IndexMap<String, (QualifiedName, &TypeDefinition)>,
    visiting: &mut Vec<String>,
    ancestry: &mut BTreeMap<String, BTreeSet<String>>,
) -> SchemaResult<BTreeSet<String>> {
    if let Some(ancestors) = ancestry.get(canonical) {
        return Ok(ancestors.clone());
    }
    if visiting.iter().any(|name| name == canonical) {
        return Err(SchemaError::InheritanceCycle {
            name: canonical.to_string(),
        });
    }
    let (_, definition) = definitions
        .get(canonical)
        .ok_or_else(|| SchemaError::UnknownType {
            name: canonical.to_string(),
        })?;

    visiting.push(canonical.to_string());
    let mut ancestors = BTreeSet::new();
    for parent in &definition.inherits {
        let parent = QualifiedName::parse(parent)?.parameterized_name();
        ancestors.extend(collect_ancestors(&parent, definitions, visiting, ancestry)?);
        ancestors.insert(parent);
    }
    visiting.pop();

    ancestry.insert(canonical.to_string(), ancestors.clone());
    Ok(ancestors)
}

fn resolve_or_synthesize(
    name: &QualifiedName,
    types: &mut IndexMap<String, Arc<Type>>,
) -> SchemaResult<Arc<Type>> {
    let canonical = name.parameterized_name();
    if let Some(ty) = types.get(&canonical) {
        return Ok(ty.clone());
    }
    let member = name.member().ok_or(SchemaError::UnknownType { name: canonical })?;
    let member = resolve_or_synthesize(member, types)?;
    let collection = Arc::new(Type::array_of(member));
    types.insert(collection.fqn().to_string(), collection.clone());
    Ok(collection)
}

fn fingerprint(types: &IndexMap<String, Arc<Type>>, services: &[Arc<Service>]) -> String {
    let mut hasher = blake3::Hasher::new();

    let mut sorted = types.values().collect::<Vec<_>>();
    sorted.sort_by(|left, right| left.fqn().cmp(right.fqn()));
    for ty in sorted {
        hasher.update(b"type:");
        hasher.update(ty.fqn().as_bytes());
        for ancestor in ty.inheritance_graph() {
            hasher.update(b"<:");
            hasher.update(ancestor.as_bytes());
        }
        for field in ty.attributes().values() {
            hasher.update(b"attr:");
            hasher.update(field.name().as_bytes());
            hasher.update(b"=");
            hasher.update(field.type_name().parameterized_name().as_bytes());
        }
        hasher.update(&[ty.is_closed() as u8, ty.is_parameter_type() as u8]);
    }

    let mut operations = services
        .iter()
        .flat_map(|service| service.operations().iter())
        .collect::<Vec<_>>();
    operations.sort_by_key(|operation| operation.reference());
    for operation in operations {
        hasher.update(b"op:");
        hasher.update(operation.reference().to_string().as_bytes());
        for parameter in operation.parameters() {
            hasher.update(b"(");
            hasher.update(parameter.ty().fqn().as_bytes());
        }
        hasher.update(b"->");
        hasher.update(operation.return_type().fqn().as_bytes());
    }

    hasher.finalize().to_hex().to_string()
}
