//! Engine configuration

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::discovery::FactDiscoveryStrategy;
use crate::error::EngineResult;
use crate::graph::Relationship;

/// Tunables for a [crate::QueryEngine].
///
/// Every field has a default, so partial documents are accepted:
///
/// ```
/// # use cartograph_query::EngineConfig;
/// let config = EngineConfig::from_json(r#"{ "invocationTimeoutMs": 250 }"#).unwrap();
/// assert_eq!(config.gather_concurrency, 4);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EngineConfig {
    /// Upper bound for a single remote call. `None` waits indefinitely.
    pub invocation_timeout_ms: Option<u64>,
    /// How many candidate operations the gather strategy resolves at once
    pub gather_concurrency: usize,
    /// How deeply nested finds (parameter discovery) may recurse
    pub max_query_depth: usize,
    /// How many per-schema base graphs are kept
    pub graph_cache_capacity: usize,
    /// Overrides for [Relationship::default_cost]
    pub relationship_costs: BTreeMap<Relationship, u32>,
    /// The policy the scan strategy uses to look for existing facts
    pub scan_policy: FactDiscoveryStrategy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            invocation_timeout_ms: None,
            gather_concurrency: 4,
            max_query_depth: 4,
            graph_cache_capacity: 16,
            relationship_costs: BTreeMap::new(),
            scan_policy: FactDiscoveryStrategy::TopLevelOnly,
        }
    }
}

impl EngineConfig {
    /// Parses a JSON document
    pub fn from_json(document: &str) -> EngineResult<Self> {
        Ok(serde_json::from_str(document)?)
    }

    /// The remote call timeout as a [Duration]
    pub fn invocation_timeout(&self) -> Option<Duration> {
        self.invocation_timeout_ms.map(Duration::from_millis)
    }

    /// The effective cost of traversing `relationship`
    pub fn cost_of(&self, relationship: Relationship) -> u32 {
        self.relationship_costs
            .get(&relationship)
            .copied()
            .unwrap_or_else(|| relationship.default_cost())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn it_fills_missing_fields_with_defaults() -> anyhow::Result<()> {
        let config = EngineConfig::from_json(
            r#"{ "gatherConcurrency": 2, "relationshipCosts": { "CAN_POPULATE": 10 } }"#,
        )?;

        assert_eq!(config.gather_concurrency, 2);
        assert_eq!(config.max_query_depth, 4);
        assert_eq!(config.cost_of(Relationship::CanPopulate), 10);
        assert_eq!(config.cost_of(Relationship::AttributeOf), 5);
        assert_eq!(config.cost_of(Relationship::HasAttribute), 1);
        Ok(())
    }

    #[test]
    fn it_rejects_malformed_documents() {
        assert!(EngineConfig::from_json(r#"{ "gatherConcurrency": "many" }"#).is_err());
    }
}
