use async_trait::async_trait;
use cartograph_schema::TypedInstance;

use super::{InvocationConstraints, QueryStrategy, StrategyResult};
use crate::context::QueryContext;
use crate::discovery::{FactDiscoveryStrategy, TypeMatchingStrategy};
use crate::edge::{EvaluatableEdge, EvaluatedEdge};
use crate::error::{EngineResult, QueryError};
use crate::graph::{
    Edge, Element, Path, Relationship, SemanticGraph, ZeroHeuristic, find_path_where,
};
use crate::profiler::OperationType;
use crate::target::{QueryMode, QuerySpecTypeNode};

/// Resolves a target by searching the semantic graph for the cheapest path
/// from a known fact's type to the target type, then walking that path.
///
/// Facts are tried in insertion order. A fact with no path is skipped, but
/// the first path found is final: if one of its edges fails the search fails
/// with [QueryError::SearchFailed]. A walk that completes without producing
/// the target may still have added facts, in which case the graph is rebuilt
/// before the remaining facts are tried.
#[derive(Debug, Clone, Copy, Default)]
pub struct DiscoverStrategy;

impl DiscoverStrategy {
    fn build_graph(
        &self,
        facts: &[TypedInstance],
        context: &QueryContext,
        constraints: &InvocationConstraints,
    ) -> SemanticGraph {
        let scope = context.start_child(
            "DiscoverStrategy",
            "buildGraph",
            OperationType::GraphBuilding,
        );
        let graph = context.engine().graph_builder().build(
            context.schema(),
            facts,
            &constraints.excluded_operations,
        );
        scope.stop(Some(serde_json::json!({ "edges": graph.len() })));
        graph
    }

    /// The reverse attribute lookups `fact` can take from its type vertex:
    /// those where a held owner carries `fact` as that attribute
    fn reverse_lookups(
        &self,
        graph: &SemanticGraph,
        start: &Element,
        fact: &TypedInstance,
        context: &QueryContext,
    ) -> Vec<(Element, Option<String>)> {
        graph
            .outgoing(start)
            .filter(|edge| edge.relationship == Relationship::AttributeOf)
            .filter(|edge| {
                let (Some(attribute), Ok(owner_type)) = (
                    edge.attribute.as_deref(),
                    context.schema().type_by_name(&edge.to.value),
                ) else {
                    return false;
                };
                context
                    .model_tree()
                    .find(|candidate| {
                        TypeMatchingStrategy::AllowInheritedTypes.matches(&owner_type, candidate.ty())
                            && candidate
                                .attribute(attribute)
                                .is_some_and(|value| value == fact)
                    })
                    .is_some()
            })
            .map(|edge| (edge.to.clone(), edge.attribute.clone()))
            .collect()
    }

    async fn resolve(
        &self,
        target: &QuerySpecTypeNode,
        context: &QueryContext,
        constraints: &InvocationConstraints,
    ) -> EngineResult<Option<(TypedInstance, Path)>> {
        let mut facts = context.facts();
        if facts.is_empty() {
            return Ok(None);
        }
        let mut graph = self.build_graph(&facts, context, constraints);
        let mut tried: Vec<TypedInstance> = Vec::new();

        let target_element = Element::of_type(target.ty());
        loop {
            let mut grown = None;
            for (index, fact) in facts.iter().enumerate() {
                if fact.is_null()
                    || fact.ty().is_assignable_to(target.ty())
                    || tried.iter().any(|seen| seen.ptr_eq(fact))
                {
                    continue;
                }
                tried.push(fact.clone());

                let start = Element::of_type(fact.ty());
                let reverse_lookups = self.reverse_lookups(&graph, &start, fact, context);
                let traversable = |edge: &Edge| {
                    edge.relationship != Relationship::AttributeOf
                        || (edge.from == start
                            && reverse_lookups
                                .iter()
                                .any(|(owner, attribute)| {
                                    owner == &edge.to && attribute == &edge.attribute
                                }))
                };
                let Some(edges) =
                    find_path_where(&graph, &start, &target_element, &ZeroHeuristic, traversable)
                else {
                    continue;
                };

                let path = Path::new(start.clone(), target_element.clone(), &edges);
                tracing::debug!(target = %target, path = %path.description(), "Found path");

                let instance = Element::instance(fact.ty(), index);
                let Some(is_type_of) = graph
                    .outgoing(&instance)
                    .find(|edge| edge.relationship == Relationship::IsTypeOf)
                else {
                    return Err(QueryError::Inconsistent {
                        message: format!("Fact {fact} has no vertex in the semantic graph"),
                    });
                };
                let seed = EvaluatedEdge::success(is_type_of, fact.clone());
                if let Some(value) = self.walk(target, seed, &edges, context).await? {
                    return Ok(Some((value, path)));
                }

                let current = context.facts();
                if current.len() > facts.len() {
                    grown = Some(current);
                    break;
                }
            }

            let Some(current) = grown else {
                break;
            };
            tracing::debug!(
                added = current.len() - facts.len(),
                "Walk added facts, rebuilding graph"
            );
            graph = self.build_graph(&current, context, constraints);
            facts = current;
        }

        tracing::debug!(target = %target, "No path from any known fact");
        Ok(None)
    }

    async fn walk(
        &self,
        target: &QuerySpecTypeNode,
        seed: EvaluatedEdge,
        edges: &[Edge],
        context: &QueryContext,
    ) -> EngineResult<Option<TypedInstance>> {
        let seeded = seed.value().is_some_and(|fact| context.contains(fact));
        if !seeded {
            return Err(QueryError::Inconsistent {
                message: format!("Path seed {} is not a known fact", seed.description()),
            });
        }

        let navigator = context.engine().navigator();
        let mut trail = vec![seed.clone()];
        let mut previous = seed;
        for edge in edges {
            let evaluated = navigator
                .evaluate(
                    EvaluatableEdge {
                        previous,
                        edge: edge.clone(),
                    },
                    context,
                )
                .await?;

            if let Some(error) = evaluated.error() {
                return Err(QueryError::SearchFailed {
                    message: format!("{} failed: {}", edge.description(), error),
                    evaluated_path: trail,
                    profiler: context.profiler().clone(),
                });
            }
            trail.push(evaluated.clone());
            previous = evaluated;
        }

        let produced = previous.value().filter(|value| {
            !value.is_null()
                && TypeMatchingStrategy::AllowInheritedTypes.matches(target.ty(), value.ty())
        });
        Ok(produced.cloned().or_else(|| {
            context.find_fact(target.ty(), FactDiscoveryStrategy::AnyDepthExpectOneDistinct)
        }))
    }
}

#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
impl QueryStrategy for DiscoverStrategy {
    fn name(&self) -> &str {
        "discover"
    }

    async fn invoke(
        &self,
        targets: &[QuerySpecTypeNode],
        context: &QueryContext,
        constraints: &InvocationConstraints,
    ) -> EngineResult<StrategyResult> {
        let mut result = StrategyResult::empty();
        for target in constraints
            .unresolved(targets)
            .filter(|target| target.mode() == QueryMode::Discover)
        {
            let scope =
                context.start_child("DiscoverStrategy", target.to_string(), OperationType::Lookup);
            let scoped = context.scoped(scope.operation().clone());

            if let Some((value, path)) = self.resolve(target, &scoped, constraints).await? {
                scope
                    .operation()
                    .add_context("path", path.description());
                result.matched.insert(target.clone(), value);
                result.path.get_or_insert(path);
            }
            scope.stop(None);
        }
        Ok(result)
    }
}
