//! Resolution strategies, tried in a fixed order by the engine

mod direct;
mod discover;
mod gather;
mod scan;

pub use direct::*;
pub use discover::*;
pub use gather::*;
pub use scan::*;

use std::collections::{BTreeSet, HashSet};

use async_trait::async_trait;
use cartograph_common::{ConditionalSend, ConditionalSync};
use cartograph_schema::{OperationRef, TypedInstance};
use indexmap::IndexMap;

use crate::context::QueryContext;
use crate::error::EngineResult;
use crate::graph::Path;
use crate::target::QuerySpecTypeNode;

/// Limits placed on a strategy invocation
#[derive(Debug, Clone, Default)]
pub struct InvocationConstraints {
    /// Operations that must not be invoked
    pub excluded_operations: BTreeSet<OperationRef>,
    /// Targets an earlier strategy already resolved
    pub resolved: HashSet<QuerySpecTypeNode>,
}

impl InvocationConstraints {
    /// The targets among `targets` that are still open
    pub fn unresolved<'a>(
        &self,
        targets: &'a [QuerySpecTypeNode],
    ) -> impl Iterator<Item = &'a QuerySpecTypeNode> {
        targets
            .iter()
            .filter(|target| !self.resolved.contains(*target))
    }
}

/// What a strategy resolved
#[derive(Debug, Clone, Default)]
pub struct StrategyResult {
    /// Targets resolved by this strategy
    pub matched: IndexMap<QuerySpecTypeNode, TypedInstance>,
    /// How the value was reached, for graph based strategies
    pub path: Option<Path>,
}

impl StrategyResult {
    /// Nothing resolved
    pub fn empty() -> Self {
        Self::default()
    }

    /// True if nothing was resolved
    pub fn is_empty(&self) -> bool {
        self.matched.is_empty()
    }
}

/// One way of resolving targets. A strategy receives every target of the
/// query and skips those it cannot handle or that are already resolved.
#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
pub trait QueryStrategy: ConditionalSend + ConditionalSync {
    /// A short name used for profiling and logs
    fn name(&self) -> &str;

    /// Attempts to resolve `targets`
    async fn invoke(
        &self,
        targets: &[QuerySpecTypeNode],
        context: &QueryContext,
        constraints: &InvocationConstraints,
    ) -> EngineResult<StrategyResult>;
}
