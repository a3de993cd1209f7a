use serde::Serialize;

use super::{Edge, Element, Relationship};

/// One step of a [Path]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Link {
    /// Source vertex
    pub start: Element,
    /// Edge kind
    pub relationship: Relationship,
    /// Target vertex
    pub end: Element,
    /// Cost of the step
    pub cost: u32,
}

impl From<&Edge> for Link {
    fn from(edge: &Edge) -> Self {
        Self {
            start: edge.from.clone(),
            relationship: edge.relationship,
            end: edge.to.clone(),
            cost: edge.cost,
        }
    }
}

/// How a target was reached from a known fact's type
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Path {
    /// The vertex the search started from
    pub start: Element,
    /// The vertex the search reached
    pub target: Element,
    /// Steps in evaluation order
    pub links: Vec<Link>,
}

impl Path {
    /// Assembles a path from the edges returned by a search
    pub fn new(start: Element, target: Element, edges: &[Edge]) -> Self {
        Self {
            start,
            target,
            links: edges.iter().map(Link::from).collect(),
        }
    }

    /// Sum of the link costs
    pub fn cost(&self) -> u32 {
        self.links.iter().map(|link| link.cost).sum()
    }

    /// A one-line rendering such as
    /// `CustomerId -[CAN_POPULATE]-> Customer -[HAS_ATTRIBUTE]-> Email`
    pub fn description(&self) -> String {
        let mut description = self.start.to_string();
        for link in &self.links {
            description.push_str(&format!(" -[{}]-> {}", link.relationship, link.end));
        }
        description
    }
}
