use petgraph::algo::astar;
use petgraph::visit::{EdgeFiltered, EdgeRef};

use super::{Edge, Element, SemanticGraph};

/// Estimates the remaining cost from a vertex to the target. Estimates must
/// never exceed the true cost.
pub trait Heuristic {
    /// The estimated cost of reaching `target` from `element`
    fn estimate(&self, element: &Element, target: &Element) -> u64;
}

/// The heuristic that always estimates zero, which turns A* into a uniform
/// cost search
#[derive(Debug, Clone, Copy, Default)]
pub struct ZeroHeuristic;

impl Heuristic for ZeroHeuristic {
    fn estimate(&self, _element: &Element, _target: &Element) -> u64 {
        0
    }
}

/// Finds the cheapest sequence of edges from `start` to `target`.
///
/// Returns an empty path when `start == target` and `None` when the target is
/// unreachable. The same graph always yields the same path.
pub fn find_path<H>(
    graph: &SemanticGraph,
    start: &Element,
    target: &Element,
    heuristic: &H,
) -> Option<Vec<Edge>>
where
    H: Heuristic,
{
    find_path_where(graph, start, target, heuristic, |_| true)
}

/// Like [find_path], but only traverses edges accepted by `traversable`
pub fn find_path_where<H, F>(
    graph: &SemanticGraph,
    start: &Element,
    target: &Element,
    heuristic: &H,
    traversable: F,
) -> Option<Vec<Edge>>
where
    H: Heuristic,
    F: Fn(&Edge) -> bool,
{
    let from = graph.vertex(start)?;
    let to = graph.vertex(target)?;
    let inner = graph.inner();
    let filtered = EdgeFiltered::from_fn(inner, |edge| traversable(edge.weight()));

    let (_, vertices) = astar(
        &filtered,
        from,
        |vertex| vertex == to,
        |edge| edge.weight().cost as u64,
        |vertex| heuristic.estimate(&inner[vertex], target),
    )?;

    // astar reports vertices; recover the cheapest accepted edge between
    // each consecutive pair, lowest index first on ties
    vertices
        .windows(2)
        .map(|pair| {
            inner
                .edges(pair[0])
                .filter(|edge| edge.target() == pair[1] && traversable(edge.weight()))
                .min_by_key(|edge| (edge.weight().cost, edge.id()))
                .map(|edge| edge.weight().clone())
        })
        .collect()
}
