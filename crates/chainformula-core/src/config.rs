//! Engine configuration.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Configuration for the computation engine.
///
/// Code ids are grouped under stable string keys so formulas can filter on
/// a family of contract versions ("cw20", "dao-core", ...) without naming
/// raw code ids.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ComputeConfig {
    /// Code-id key → code ids belonging to that family.
    /// A `BTreeMap` keeps "first matching key" deterministic.
    #[serde(default)]
    pub code_ids: BTreeMap<String, Vec<u64>>,
    /// Code-id keys whose contracts keep per-denom bank history, enabling
    /// the balance-history fallback when the snapshot is missing.
    #[serde(default)]
    pub bank_history_code_ids_keys: Vec<String>,
}

impl ComputeConfig {
    /// Resolve a set of code-id keys to the union of their code ids.
    pub fn code_ids_for_keys(&self, keys: &[String]) -> Vec<u64> {
        let mut ids: Vec<u64> = keys
            .iter()
            .filter_map(|key| self.code_ids.get(key))
            .flatten()
            .copied()
            .collect();
        ids.sort_unstable();
        ids.dedup();
        ids
    }

    /// The first code-id key (in key order) containing `code_id`.
    pub fn code_id_key_for(&self, code_id: u64) -> Option<&str> {
        self.code_ids
            .iter()
            .find(|(_, ids)| ids.contains(&code_id))
            .map(|(key, _)| key.as_str())
    }

    /// Whether contracts with this code id keep per-denom bank history.
    pub fn tracks_bank_history(&self, code_id: u64) -> bool {
        self.bank_history_code_ids_keys
            .iter()
            .any(|key| self.code_ids.get(key).is_some_and(|ids| ids.contains(&code_id)))
    }
}
