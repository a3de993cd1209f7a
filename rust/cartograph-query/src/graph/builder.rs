use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use cartograph_schema::{InstanceValue, OperationRef, Schema, TypedInstance};
use parking_lot::Mutex;
use sieve_cache::SieveCache;

use super::{Edge, Element, Relationship, SemanticGraph};
use crate::error::{EngineResult, QueryError};

type GraphKey = (String, Vec<OperationRef>);

/// Builds [SemanticGraph]s.
///
/// The schema-derived part of a graph only depends on the schema and the set
/// of excluded operations, so it is built once and kept in a [SieveCache].
/// Every build clones it and adds the edges derived from the current facts.
pub struct SemanticGraphBuilder {
    cache: Mutex<SieveCache<GraphKey, Arc<SemanticGraph>>>,
    costs: BTreeMap<Relationship, u32>,
    builds: AtomicUsize,
    schema_builds: AtomicUsize,
}

impl std::fmt::Debug for SemanticGraphBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SemanticGraphBuilder")
            .field("cached", &self.cache.lock().len())
            .field("builds", &self.build_count())
            .finish()
    }
}

impl SemanticGraphBuilder {
    /// A builder that keeps up to `cache_capacity` schema graphs and uses
    /// `costs` to override [Relationship::default_cost]
    pub fn new(cache_capacity: usize, costs: BTreeMap<Relationship, u32>) -> EngineResult<Self> {
        let cache = SieveCache::new(cache_capacity).map_err(|error| {
            QueryError::Configuration(format!("Could not initialize graph cache: {error}"))
        })?;
        Ok(Self {
            cache: Mutex::new(cache),
            costs,
            builds: AtomicUsize::new(0),
            schema_builds: AtomicUsize::new(0),
        })
    }

    /// How many graphs have been built
    pub fn build_count(&self) -> usize {
        self.builds.load(Ordering::SeqCst)
    }

    /// How many schema graphs were built because the cache missed
    pub fn schema_build_count(&self) -> usize {
        self.schema_builds.load(Ordering::SeqCst)
    }

    fn edge(&self, from: Element, relationship: Relationship, to: Element) -> Edge {
        Edge {
            from,
            relationship,
            to,
            cost: self
                .costs
                .get(&relationship)
                .copied()
                .unwrap_or_else(|| relationship.default_cost()),
            operation: None,
            attribute: None,
        }
    }

    /// Builds the graph for `facts`, leaving out every operation in
    /// `excluded`.
    ///
    /// Each non-null fact becomes an instance vertex linked to its type by
    /// `IS_TYPE_OF`. `ATTRIBUTE_OF` edges only exist for owners that are
    /// held: for every populated attribute of a held object of an open type,
    /// the attribute's type points back at the owner's type.
    pub fn build(
        &self,
        schema: &Schema,
        facts: &[TypedInstance],
        excluded: &BTreeSet<OperationRef>,
    ) -> SemanticGraph {
        self.builds.fetch_add(1, Ordering::SeqCst);

        let key = (
            schema.fingerprint().to_string(),
            excluded.iter().cloned().collect::<Vec<_>>(),
        );
        let base = {
            let mut cache = self.cache.lock();
            match cache.get(&key) {
                Some(graph) => graph.clone(),
                None => {
                    let graph = Arc::new(self.schema_graph(schema, excluded));
                    cache.insert(key, graph.clone());
                    graph
                }
            }
        };

        let mut graph = SemanticGraph::clone(&base);
        for (index, fact) in facts.iter().enumerate() {
            if fact.is_null() {
                continue;
            }
            let element = Element::instance(fact.ty(), index);
            graph.register_instance(element.clone(), fact.clone());
            graph.insert(self.edge(
                element,
                Relationship::IsTypeOf,
                Element::of_type(fact.ty()),
            ));
            self.insert_attribute_of(&mut graph, fact);
        }

        tracing::debug!(
            edges = graph.len(),
            facts = facts.len(),
            "Built semantic graph"
        );
        graph
    }

    fn insert_attribute_of(&self, graph: &mut SemanticGraph, fact: &TypedInstance) {
        match fact.value() {
            InstanceValue::Object(attributes) if !fact.ty().is_closed() => {
                let owner = Element::of_type(fact.ty());
                for (name, value) in attributes {
                    if value.is_null() {
                        continue;
                    }
                    let mut edge = self.edge(
                        Element::of_type(value.ty()),
                        Relationship::AttributeOf,
                        owner.clone(),
                    );
                    edge.attribute = Some(name.clone());
                    graph.insert(edge);
                    self.insert_attribute_of(graph, value);
                }
            }
            InstanceValue::Collection(members) => {
                for member in members {
                    self.insert_attribute_of(graph, member);
                }
            }
            _ => {}
        }
    }

    fn schema_graph(&self, schema: &Schema, excluded: &BTreeSet<OperationRef>) -> SemanticGraph {
        self.schema_builds.fetch_add(1, Ordering::SeqCst);
        let mut graph = SemanticGraph::default();

        for ty in schema.types() {
            let owner = Element::of_type(ty);
            if !ty.is_closed() {
                for (name, field) in ty.attributes() {
                    let Ok(attribute_type) = schema.resolve(field.type_name()) else {
                        continue;
                    };
                    let mut has_attribute = self.edge(
                        owner.clone(),
                        Relationship::HasAttribute,
                        Element::of_type(&attribute_type),
                    );
                    has_attribute.attribute = Some(name.clone());
                    graph.insert(has_attribute);
                }
            }
            for parent in ty.inherits() {
                let Ok(parent) = schema.resolve(parent) else {
                    continue;
                };
                graph.insert(self.edge(
                    owner.clone(),
                    Relationship::ExtendsType,
                    Element::of_type(&parent),
                ));
            }
        }

        for (_, operation) in schema.operations() {
            let reference = operation.reference();
            if excluded.contains(&reference) {
                continue;
            }
            let operation_element = Element::operation(&reference);
            let returns = Element::of_type(operation.return_type());

            for parameter in operation.parameters() {
                let parameter_element = Element::of_type(parameter.ty());

                let mut can_populate = self.edge(
                    parameter_element.clone(),
                    Relationship::CanPopulate,
                    returns.clone(),
                );
                can_populate.operation = Some(reference.clone());
                graph.insert(can_populate);

                let mut operation_parameter = self.edge(
                    parameter_element.clone(),
                    Relationship::OperationParameter,
                    operation_element.clone(),
                );
                operation_parameter.operation = Some(reference.clone());
                graph.insert(operation_parameter);

                let mut requires_parameter = self.edge(
                    operation_element.clone(),
                    Relationship::RequiresParameter,
                    parameter_element,
                );
                requires_parameter.operation = Some(reference.clone());
                graph.insert(requires_parameter);
            }
        }

        tracing::debug!(
            edges = graph.len(),
            excluded = excluded.len(),
            "Built schema graph"
        );
        graph
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{ZeroHeuristic, find_path, find_path_where};
    use anyhow::Result;
    use cartograph_schema::{
        DataSource, OperationDefinition, ServiceDefinition, TypeDefinition,
    };
    use pretty_assertions::assert_eq;

    fn schema() -> Result<Schema> {
        Ok(Schema::builder()
            .scalar("CustomerId")
            .scalar("Email")
            .type_definition(
                TypeDefinition::new("Customer")
                    .attribute("id", "CustomerId")
                    .attribute("email", "Email"),
            )
            .service(
                ServiceDefinition::new("CustomerService")
                    .operation(
                        OperationDefinition::new("getCustomerById")
                            .parameter("CustomerId")
                            .returns("Customer"),
                    )
                    .operation(
                        OperationDefinition::new("findCustomer")
                            .parameter("CustomerId")
                            .returns("Customer"),
                    ),
            )
            .build()?)
    }

    #[test]
    fn it_deduplicates_edges_between_the_same_vertices() -> Result<()> {
        let schema = schema()?;
        let builder = SemanticGraphBuilder::new(4, BTreeMap::new())?;
        let graph = builder.build(&schema, &[], &BTreeSet::new());

        let can_populate = graph
            .edges()
            .filter(|edge| edge.relationship == Relationship::CanPopulate)
            .collect::<Vec<_>>();
        assert_eq!(can_populate.len(), 1);
        assert_eq!(
            can_populate[0].operation,
            Some(OperationRef::new("CustomerService", "getCustomerById"))
        );
        Ok(())
    }

    #[test]
    fn it_caches_schema_graphs_per_exclusion_set() -> Result<()> {
        let schema = schema()?;
        let builder = SemanticGraphBuilder::new(4, BTreeMap::new())?;
        let excluded = BTreeSet::from([OperationRef::new("CustomerService", "getCustomerById")]);

        builder.build(&schema, &[], &BTreeSet::new());
        builder.build(&schema, &[], &BTreeSet::new());
        let graph = builder.build(&schema, &[], &excluded);

        assert_eq!(builder.build_count(), 3);
        assert_eq!(builder.schema_build_count(), 2);
        let populating = graph
            .edges()
            .filter_map(|edge| edge.operation.clone())
            .collect::<BTreeSet<_>>();
        assert_eq!(
            populating,
            BTreeSet::from([OperationRef::new("CustomerService", "findCustomer")])
        );
        Ok(())
    }

    #[test]
    fn it_links_facts_to_their_types() -> Result<()> {
        let schema = schema()?;
        let builder = SemanticGraphBuilder::new(4, BTreeMap::new())?;
        let customer = TypedInstance::from_json(
            schema.type_by_name("Customer")?,
            &serde_json::json!({ "id": 1, "email": "ada@acme.io" }),
            &schema,
            DataSource::Provided,
        )?;
        let graph = builder.build(&schema, &[customer.clone()], &BTreeSet::new());

        let instance = Element::instance(customer.ty(), 0);
        let relationships = graph
            .outgoing(&instance)
            .map(|edge| edge.description())
            .collect::<Vec<_>>();
        assert_eq!(
            relationships,
            vec!["instance(Customer@0) -[IS_TYPE_OF]-> Customer".to_string()]
        );
        assert!(graph.instance(&instance).is_some_and(|fact| fact.ptr_eq(&customer)));
        Ok(())
    }

    #[test]
    fn it_derives_reverse_attribute_edges_from_held_owners_only() -> Result<()> {
        let schema = schema()?;
        let builder = SemanticGraphBuilder::new(4, BTreeMap::new())?;
        let email = Element::of_type(&*schema.type_by_name("Email")?);
        let reverse_lookups = |graph: &SemanticGraph| {
            graph
                .edges()
                .filter(|edge| edge.relationship == Relationship::AttributeOf)
                .map(Edge::description)
                .collect::<Vec<_>>()
        };

        let lone_email = TypedInstance::scalar(
            schema.type_by_name("Email")?,
            "ada@acme.io",
            DataSource::Provided,
        );
        let graph = builder.build(&schema, &[lone_email.clone()], &BTreeSet::new());
        assert!(reverse_lookups(&graph).is_empty());
        assert!(graph.outgoing(&email).next().is_none());

        let customer = TypedInstance::from_json(
            schema.type_by_name("Customer")?,
            &serde_json::json!({ "email": "ada@acme.io" }),
            &schema,
            DataSource::Provided,
        )?;
        let graph = builder.build(&schema, &[lone_email, customer], &BTreeSet::new());
        assert_eq!(
            reverse_lookups(&graph),
            vec!["Email -[ATTRIBUTE_OF]-> Customer".to_string()]
        );
        assert_eq!(builder.schema_build_count(), 1);
        Ok(())
    }

    #[test]
    fn it_leaves_closed_types_opaque() -> Result<()> {
        let schema = Schema::builder()
            .scalar("CustomerId")
            .scalar("Email")
            .type_definition(
                TypeDefinition::new("Customer")
                    .attribute("id", "CustomerId")
                    .attribute("email", "Email")
                    .closed(),
            )
            .build()?;
        let builder = SemanticGraphBuilder::new(4, BTreeMap::new())?;
        let customer = TypedInstance::from_json(
            schema.type_by_name("Customer")?,
            &serde_json::json!({ "id": 1, "email": "ada@acme.io" }),
            &schema,
            DataSource::Provided,
        )?;
        let graph = builder.build(&schema, &[customer], &BTreeSet::new());

        let attribute_edges = graph
            .edges()
            .filter(|edge| {
                matches!(
                    edge.relationship,
                    Relationship::HasAttribute | Relationship::AttributeOf
                )
            })
            .count();
        assert_eq!(attribute_edges, 0);
        Ok(())
    }

    #[test]
    fn it_finds_the_cheapest_path_deterministically() -> Result<()> {
        let schema = schema()?;
        let builder = SemanticGraphBuilder::new(4, BTreeMap::new())?;
        let graph = builder.build(&schema, &[], &BTreeSet::new());
        let start = Element::of_type(&*schema.type_by_name("CustomerId")?);
        let target = Element::of_type(&*schema.type_by_name("Email")?);

        let first = find_path(&graph, &start, &target, &ZeroHeuristic)
            .ok_or_else(|| anyhow::anyhow!("no path"))?;
        let second = find_path(&graph, &start, &target, &ZeroHeuristic)
            .ok_or_else(|| anyhow::anyhow!("no path"))?;

        let described = first.iter().map(Edge::description).collect::<Vec<_>>();
        assert_eq!(
            described,
            vec![
                "CustomerId -[CAN_POPULATE]-> Customer".to_string(),
                "Customer -[HAS_ATTRIBUTE]-> Email".to_string(),
            ]
        );
        assert_eq!(first, second);
        Ok(())
    }

    #[test]
    fn it_reports_unreachable_targets() -> Result<()> {
        let schema = schema()?;
        let builder = SemanticGraphBuilder::new(4, BTreeMap::new())?;
        let graph = builder.build(&schema, &[], &BTreeSet::new());
        let email = Element::of_type(&*schema.type_by_name("Email")?);
        let customer_id = Element::of_type(&*schema.type_by_name("CustomerId")?);

        // Without a held Customer there is no way back from an Email
        assert_eq!(find_path(&graph, &email, &customer_id, &ZeroHeuristic), None);

        let nowhere = Element::operation(&OperationRef::new("Nope", "nope"));
        assert_eq!(find_path(&graph, &customer_id, &nowhere, &ZeroHeuristic), None);
        assert_eq!(
            find_path(&graph, &customer_id, &customer_id, &ZeroHeuristic),
            Some(Vec::new())
        );
        Ok(())
    }

    #[test]
    fn it_only_traverses_accepted_edges() -> Result<()> {
        let schema = schema()?;
        let builder = SemanticGraphBuilder::new(4, BTreeMap::new())?;
        let graph = builder.build(&schema, &[], &BTreeSet::new());
        let start = Element::of_type(&*schema.type_by_name("CustomerId")?);
        let target = Element::of_type(&*schema.type_by_name("Email")?);

        let path = find_path_where(&graph, &start, &target, &ZeroHeuristic, |edge| {
            edge.relationship != Relationship::CanPopulate
        });

        assert_eq!(path, None);
        Ok(())
    }
}
