//! Policies deciding whether, and how, facts already held by a query satisfy
//! a requested type.

use std::collections::VecDeque;
use std::sync::Arc;

use cartograph_schema::{DataSource, InstanceValue, Type, TypedInstance};
use serde::{Deserialize, Serialize};

/// How deep to look for a fact, and how many matches are acceptable
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FactDiscoveryStrategy {
    /// Only facts held directly by the context
    TopLevelOnly,
    /// Anywhere in the fact tree; exactly one match (by reference) is
    /// required, more is treated as not found
    AnyDepthExpectOne,
    /// Anywhere in the fact tree; exactly one match after collapsing
    /// value-equal matches
    AnyDepthExpectOneDistinct,
    /// Anywhere in the fact tree; every distinct match, as a collection
    AnyDepthAllowMany,
}

/// How a candidate's type is compared with the requested type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TypeMatchingStrategy {
    /// Equal names, or the requested type is one of the candidate's ancestors
    #[default]
    AllowInheritedTypes,
    /// Equal names only
    ExactMatch,
}

impl TypeMatchingStrategy {
    /// True if a fact of type `candidate` satisfies `requested`
    pub fn matches(&self, requested: &Type, candidate: &Type) -> bool {
        match self {
            TypeMatchingStrategy::AllowInheritedTypes => candidate.is_assignable_to(requested),
            TypeMatchingStrategy::ExactMatch => candidate == requested,
        }
    }
}

impl FactDiscoveryStrategy {
    /// Looks for `requested` among `facts` (the facts held directly by a
    /// context, in insertion order). Ambiguity is never an error: it yields
    /// `None`.
    pub fn discover(
        &self,
        facts: &[TypedInstance],
        requested: &Arc<Type>,
        matching: TypeMatchingStrategy,
    ) -> Option<TypedInstance> {
        let is_match = |fact: &TypedInstance| matching.matches(requested, fact.ty());

        match self {
            FactDiscoveryStrategy::TopLevelOnly => facts
                .iter()
                .find(|fact| !fact.is_null() && is_match(fact))
                .cloned(),
            FactDiscoveryStrategy::AnyDepthExpectOne => {
                let mut matches: Vec<TypedInstance> = Vec::new();
                for fact in ModelTree::new(facts).filter(|fact| is_match(fact)) {
                    if !matches.iter().any(|known| known.ptr_eq(&fact)) {
                        matches.push(fact);
                    }
                }
                single(matches)
            }
            FactDiscoveryStrategy::AnyDepthExpectOneDistinct => {
                single(distinct(ModelTree::new(facts).filter(|fact| is_match(fact))))
            }
            FactDiscoveryStrategy::AnyDepthAllowMany => {
                let matches = distinct(ModelTree::new(facts).filter(|fact| is_match(fact)));
                if matches.is_empty() {
                    return None;
                }
                let source = common_source(&matches);
                Some(TypedInstance::collection(requested.clone(), matches, source))
            }
        }
    }
}

fn single(mut matches: Vec<TypedInstance>) -> Option<TypedInstance> {
    if matches.len() == 1 { matches.pop() } else { None }
}

fn distinct(candidates: impl Iterator<Item = TypedInstance>) -> Vec<TypedInstance> {
    let mut matches: Vec<TypedInstance> = Vec::new();
    for candidate in candidates {
        if !matches.contains(&candidate) {
            matches.push(candidate);
        }
    }
    matches
}

fn common_source(members: &[TypedInstance]) -> DataSource {
    match members.split_first() {
        Some((first, rest)) if rest.iter().all(|member| member.source() == first.source()) => {
            first.source().clone()
        }
        _ => DataSource::Mixed,
    }
}

/// A breadth-first walk over a set of facts treated as a tree: objects expand
/// into their attribute values, collections into their members, and closed or
/// scalar values are leaves. Null values are skipped.
///
/// Facts are immutable, so the tree has no cycles and the walk always ends.
/// Creating a new walk over the same facts restarts it.
#[derive(Debug, Clone)]
pub struct ModelTree {
    queue: VecDeque<TypedInstance>,
}

impl ModelTree {
    /// Walks `roots` and everything beneath them
    pub fn new(roots: &[TypedInstance]) -> Self {
        Self {
            queue: roots.iter().cloned().collect(),
        }
    }
}

impl Iterator for ModelTree {
    type Item = TypedInstance;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let next = self.queue.pop_front()?;
            if next.is_null() {
                continue;
            }
            if !next.ty().is_closed() {
                match next.value() {
                    InstanceValue::Object(attributes) => {
                        self.queue.extend(attributes.values().cloned())
                    }
                    InstanceValue::Collection(members) => self.queue.extend(members.iter().cloned()),
                    InstanceValue::Scalar(_) | InstanceValue::Null => {}
                }
            }
            return Some(next);
        }
    }
}
