//! The semantic graph: types, facts and operations as vertices, connected by
//! the relationships the engine knows how to traverse.

mod builder;
mod path;
mod search;

pub use builder::*;
pub use path::*;
pub use search::*;

use std::collections::HashMap;
use std::fmt::{self, Display};

use cartograph_schema::{OperationRef, Type, TypedInstance};
use indexmap::IndexMap;
use petgraph::stable_graph::{EdgeIndex, NodeIndex, StableDiGraph};
use petgraph::visit::EdgeRef;
use serde::{Deserialize, Serialize};

/// The kind of value a vertex stands for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ElementType {
    /// A schema type
    Type,
    /// A fact held by the query context
    Instance,
    /// A schema operation
    Operation,
}

/// A vertex of the semantic graph. Two elements are equal when they stand for
/// the same underlying value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Element {
    /// What the vertex stands for
    pub kind: ElementType,
    /// The type name, instance id or operation reference
    pub value: String,
}

impl Element {
    /// The vertex for a type
    pub fn of_type(ty: &Type) -> Self {
        Self {
            kind: ElementType::Type,
            value: ty.fqn().to_string(),
        }
    }

    /// The vertex for the `index`th fact, which is of type `ty`
    pub fn instance(ty: &Type, index: usize) -> Self {
        Self {
            kind: ElementType::Instance,
            value: format!("{}@{}", ty.fqn(), index),
        }
    }

    /// The vertex for an operation
    pub fn operation(operation: &OperationRef) -> Self {
        Self {
            kind: ElementType::Operation,
            value: operation.to_string(),
        }
    }
}

impl Display for Element {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            ElementType::Type => write!(f, "{}", self.value),
            ElementType::Instance => write!(f, "instance({})", self.value),
            ElementType::Operation => write!(f, "operation({})", self.value),
        }
    }
}

/// The kind of an edge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Relationship {
    /// Instance to its type
    IsTypeOf,
    /// Subtype to supertype
    ExtendsType,
    /// Owning type to an attribute's type
    HasAttribute,
    /// Attribute type back to its owning type, derived per query from the
    /// facts that are held
    AttributeOf,
    /// Instance to the type of one of its populated attributes. Not derived
    /// by [SemanticGraphBuilder]; available to custom strategies that walk
    /// instance vertices.
    InstanceHasAttribute,
    /// Operation to one of its parameter types
    RequiresParameter,
    /// Parameter type to the operation that consumes it
    OperationParameter,
    /// Parameter type to an operation's return type, via that operation
    CanPopulate,
}

impl Relationship {
    /// Every relationship, in declaration order
    pub const ALL: [Relationship; 8] = [
        Relationship::IsTypeOf,
        Relationship::ExtendsType,
        Relationship::HasAttribute,
        Relationship::AttributeOf,
        Relationship::InstanceHasAttribute,
        Relationship::RequiresParameter,
        Relationship::OperationParameter,
        Relationship::CanPopulate,
    ];

    /// The cost used when configuration does not override it. Remote calls
    /// and reverse attribute lookups are weighted up so the search prefers
    /// reading data it already holds.
    pub fn default_cost(&self) -> u32 {
        match self {
            Relationship::CanPopulate => 3,
            Relationship::AttributeOf => 5,
            _ => 1,
        }
    }

    /// The conventional upper snake case name
    pub fn name(&self) -> &'static str {
        match self {
            Relationship::IsTypeOf => "IS_TYPE_OF",
            Relationship::ExtendsType => "EXTENDS_TYPE",
            Relationship::HasAttribute => "HAS_ATTRIBUTE",
            Relationship::AttributeOf => "ATTRIBUTE_OF",
            Relationship::InstanceHasAttribute => "INSTANCE_HAS_ATTRIBUTE",
            Relationship::RequiresParameter => "REQUIRES_PARAMETER",
            Relationship::OperationParameter => "OPERATION_PARAMETER",
            Relationship::CanPopulate => "CAN_POPULATE",
        }
    }
}

impl Display for Relationship {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// A directed, weighted edge
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Edge {
    /// Source vertex
    pub from: Element,
    /// Edge kind
    pub relationship: Relationship,
    /// Target vertex
    pub to: Element,
    /// Search cost
    pub cost: u32,
    /// The operation behind `CAN_POPULATE`, `REQUIRES_PARAMETER` and
    /// `OPERATION_PARAMETER` edges
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operation: Option<OperationRef>,
    /// The attribute behind attribute edges
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attribute: Option<String>,
}

impl Edge {
    /// The deduplication key
    pub fn key(&self) -> (Element, Relationship, Element) {
        (self.from.clone(), self.relationship, self.to.clone())
    }

    /// A one-line description such as `CustomerId -[CAN_POPULATE]-> Customer`
    pub fn description(&self) -> String {
        format!("{} -[{}]-> {}", self.from, self.relationship, self.to)
    }
}

/// The graph searched by the discover strategy.
///
/// Vertices and edges live in a [StableDiGraph]. Edges are unique by
/// (from, relationship, to): the first inserted edge wins. A per-schema base
/// graph is built once and cloned for each query, which then adds the edges
/// derived from its facts.
#[derive(Debug, Clone, Default)]
pub struct SemanticGraph {
    graph: StableDiGraph<Element, Edge>,
    vertices: HashMap<Element, NodeIndex>,
    keys: HashMap<(Element, Relationship, Element), EdgeIndex>,
    instances: IndexMap<Element, TypedInstance>,
}

impl SemanticGraph {
    fn vertex_or_insert(&mut self, element: &Element) -> NodeIndex {
        if let Some(index) = self.vertices.get(element) {
            return *index;
        }
        let index = self.graph.add_node(element.clone());
        self.vertices.insert(element.clone(), index);
        index
    }

    /// Adds `edge` unless an edge with the same key is present
    pub fn insert(&mut self, edge: Edge) -> bool {
        let key = edge.key();
        if self.keys.contains_key(&key) {
            return false;
        }
        let from = self.vertex_or_insert(&edge.from);
        let to = self.vertex_or_insert(&edge.to);
        let index = self.graph.add_edge(from, to, edge);
        self.keys.insert(key, index);
        true
    }

    /// True if an edge with this key is present
    pub fn contains(&self, key: &(Element, Relationship, Element)) -> bool {
        self.keys.contains_key(key)
    }

    pub(crate) fn register_instance(&mut self, element: Element, instance: TypedInstance) {
        self.vertex_or_insert(&element);
        self.instances.insert(element, instance);
    }

    /// The fact behind an instance vertex
    pub fn instance(&self, element: &Element) -> Option<&TypedInstance> {
        self.instances.get(element)
    }

    pub(crate) fn vertex(&self, element: &Element) -> Option<NodeIndex> {
        self.vertices.get(element).copied()
    }

    pub(crate) fn inner(&self) -> &StableDiGraph<Element, Edge> {
        &self.graph
    }

    /// Edges leaving `element`, in insertion order
    pub fn outgoing<'a>(&'a self, element: &Element) -> impl Iterator<Item = &'a Edge> + use<'a> {
        let mut edges = self
            .vertex(element)
            .into_iter()
            .flat_map(|index| self.graph.edges(index))
            .collect::<Vec<_>>();
        edges.sort_by_key(|edge| edge.id());
        edges.into_iter().map(|edge| edge.weight())
    }

    /// All edges, in insertion order
    pub fn edges(&self) -> impl Iterator<Item = &Edge> {
        self.graph.edge_weights()
    }

    /// Number of edges
    pub fn len(&self) -> usize {
        self.graph.edge_count()
    }

    /// True if the graph has no edges
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
