//! The Environment — the capability object handed to a formula.
//!
//! Construction is per evaluation: each Environment owns its dependency
//! recorder and a two-level memo (`events` by dependent key, `contracts`
//! by address). The memo is never shared across evaluations — durable
//! reuse is the computation cache's job.

mod chain;
mod wasm;

pub use chain::TxEventFilter;
pub use wasm::{PrefetchKey, PrefetchName, TransformationMatch, TransformationMatchOptions};

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde_json::Value;

use crate::config::ComputeConfig;
use crate::deps::{self, DependencyRecorder};
use crate::error::ComputeError;
use crate::store::EventStore;
use crate::types::{BlockInfo, ContractRow, DependentKey, Event};

/// Side-effect hook invoked with the row count of every positive read.
/// Must never influence the returned value.
pub type OnFetch = Arc<dyn Fn(u64) + Send + Sync>;

/// Inputs for building an [`Environment`].
pub struct EnvOptions {
    pub chain_id: String,
    /// The address the formula is evaluated for.
    pub target_address: String,
    /// The target block every read is pinned to.
    pub block: BlockInfo,
    /// If set, [`Environment::date`] is the target block's time;
    /// otherwise the wall clock captured at construction.
    pub use_block_date: bool,
    /// Opaque user arguments passed through to the formula.
    pub args: serde_json::Map<String, Value>,
    pub store: Arc<dyn EventStore>,
    pub config: Arc<ComputeConfig>,
    pub on_fetch: Option<OnFetch>,
}

/// One memoised read: the rows it produced (`None` = tried and empty).
struct MemoEntry {
    prefix: bool,
    rows: Option<Vec<Event>>,
}

#[derive(Default)]
struct EvalMemo {
    events: HashMap<String, MemoEntry>,
    contracts: HashMap<String, Option<ContractRow>>,
}

/// The capability object passed to a formula: typed, history-aware getters
/// pinned to one target block, with dependency recording and per-evaluation
/// memoisation.
pub struct Environment {
    chain_id: String,
    target_address: String,
    block: BlockInfo,
    use_block_date: bool,
    wall_clock_ms: u64,
    args: serde_json::Map<String, Value>,
    store: Arc<dyn EventStore>,
    config: Arc<ComputeConfig>,
    pub(crate) recorder: DependencyRecorder,
    memo: Mutex<EvalMemo>,
    on_fetch: Option<OnFetch>,
}

impl Environment {
    pub fn new(options: EnvOptions) -> Self {
        Self {
            chain_id: options.chain_id,
            target_address: options.target_address,
            block: options.block,
            use_block_date: options.use_block_date,
            wall_clock_ms: chrono::Utc::now().timestamp_millis().max(0) as u64,
            args: options.args,
            store: options.store,
            config: options.config,
            recorder: DependencyRecorder::new(),
            memo: Mutex::new(EvalMemo::default()),
            on_fetch: options.on_fetch,
        }
    }

    // ── Accessors ────────────────────────────────────────────────────────────

    pub fn chain_id(&self) -> &str {
        &self.chain_id
    }

    /// The address this evaluation targets.
    pub fn target_address(&self) -> &str {
        &self.target_address
    }

    /// The target block of this evaluation.
    pub fn block(&self) -> BlockInfo {
        self.block
    }

    /// Shortcut for the target height.
    pub fn height(&self) -> u64 {
        self.block.height
    }

    /// The evaluation date (milliseconds since epoch): the target block's
    /// time when `use_block_date` is set, the construction wall clock
    /// otherwise.
    pub fn date(&self) -> u64 {
        if self.use_block_date {
            self.block.time_unix_ms
        } else {
            self.wall_clock_ms
        }
    }

    /// The user arguments, verbatim.
    pub fn args(&self) -> &serde_json::Map<String, Value> {
        &self.args
    }

    pub fn arg(&self, name: &str) -> Option<&Value> {
        self.args.get(name)
    }

    /// A required string argument, or `BadInput`.
    pub fn require_arg_str(&self, name: &str) -> Result<String, ComputeError> {
        self.arg(name)
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
            .ok_or_else(|| ComputeError::BadInput(format!("missing string argument '{name}'")))
    }

    /// A required unsigned integer argument (number or numeric string),
    /// or `BadInput`.
    pub fn require_arg_u64(&self, name: &str) -> Result<u64, ComputeError> {
        let value = self
            .arg(name)
            .ok_or_else(|| ComputeError::BadInput(format!("missing argument '{name}'")))?;
        value
            .as_u64()
            .or_else(|| value.as_str().and_then(|s| s.parse().ok()))
            .ok_or_else(|| ComputeError::BadInput(format!("argument '{name}' is not an integer")))
    }

    pub(crate) fn store(&self) -> &Arc<dyn EventStore> {
        &self.store
    }

    pub(crate) fn config(&self) -> &ComputeConfig {
        &self.config
    }

    // ── Dependency recording ─────────────────────────────────────────────────

    /// Record a dependent key. Always called before the underlying fetch so
    /// a miss still produces a dependency.
    pub(crate) fn record(&self, key: DependentKey) {
        self.recorder.record(key);
    }

    // ── Memo ─────────────────────────────────────────────────────────────────

    /// Look up a memoised read. Outer `None` = untried; inner `None` =
    /// tried and empty. An exact request is also answered from any stored
    /// prefix entry that covers it, so prefetched prefixes satisfy later
    /// point reads without another store round-trip.
    pub(crate) fn memo_lookup(&self, key: &str, prefix: bool) -> Option<Option<Vec<Event>>> {
        let memo = self.memo.lock().unwrap();
        if let Some(entry) = memo.events.get(key) {
            if entry.prefix == prefix {
                return Some(entry.rows.clone());
            }
        }
        // Derive from a covering prefix entry.
        let want = DependentKey {
            key: key.to_string(),
            prefix,
        };
        for (stored_key, entry) in &memo.events {
            if !entry.prefix || !key.starts_with(stored_key.as_str()) {
                continue;
            }
            let derived: Vec<Event> = match &entry.rows {
                None => return Some(None),
                Some(rows) => rows
                    .iter()
                    .filter(|event| deps::matches(&want, &deps::event_key(event)))
                    .cloned()
                    .collect(),
            };
            return if derived.is_empty() {
                Some(None)
            } else {
                Some(Some(derived))
            };
        }
        None
    }

    pub(crate) fn memo_store(&self, key: String, prefix: bool, rows: Option<Vec<Event>>) {
        self.memo
            .lock()
            .unwrap()
            .events
            .insert(key, MemoEntry { prefix, rows });
    }

    /// Invoke the fetch hook for a positive read.
    pub(crate) fn notify_fetch(&self, count: usize) {
        if count > 0 {
            if let Some(hook) = &self.on_fetch {
                hook(count as u64);
            }
        }
    }

    /// Memoised read keyed on a dependent-key string: consult the memo,
    /// fetch on miss, store, and fire the fetch hook.
    pub(crate) async fn memoized<F, Fut>(
        &self,
        key: &str,
        prefix: bool,
        fetch: F,
    ) -> Result<Option<Vec<Event>>, ComputeError>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<Vec<Event>, ComputeError>>,
    {
        if let Some(rows) = self.memo_lookup(key, prefix) {
            return Ok(rows);
        }
        let fetched = fetch().await?;
        self.notify_fetch(fetched.len());
        let rows = if fetched.is_empty() {
            None
        } else {
            Some(fetched)
        };
        self.memo_store(key.to_string(), prefix, rows.clone());
        Ok(rows)
    }

    // ── Contracts ────────────────────────────────────────────────────────────

    /// The contract record for `address`, cached per evaluation. Contract
    /// rows are write-once, so no dependency is recorded.
    pub(crate) async fn contract_cached(
        &self,
        address: &str,
    ) -> Result<Option<ContractRow>, ComputeError> {
        if let Some(cached) = self.memo.lock().unwrap().contracts.get(address).cloned() {
            return Ok(cached);
        }
        let row = self.store.contract(address).await?;
        if row.is_some() {
            self.notify_fetch(1);
        }
        self.memo
            .lock()
            .unwrap()
            .contracts
            .insert(address.to_string(), row.clone());
        Ok(row)
    }

    /// The contract record iff its code id is in the set resolved from the
    /// supplied code-id keys (unfiltered when `code_ids_keys` is `None`).
    pub async fn get_contract(
        &self,
        address: &str,
        code_ids_keys: Option<&[String]>,
    ) -> Result<Option<ContractRow>, ComputeError> {
        let contract = match self.contract_cached(address).await? {
            Some(contract) => contract,
            None => return Ok(None),
        };
        match code_ids_keys {
            None => Ok(Some(contract)),
            Some(keys) => {
                let ids = self.config.code_ids_for_keys(keys);
                if ids.contains(&contract.code_id) {
                    Ok(Some(contract))
                } else {
                    Ok(None)
                }
            }
        }
    }

    /// Whether the contract at `address` has a code id under any of the
    /// given code-id keys.
    pub async fn contract_matches_code_id_keys(
        &self,
        address: &str,
        code_ids_keys: &[String],
    ) -> Result<bool, ComputeError> {
        Ok(self.get_contract(address, Some(code_ids_keys)).await?.is_some())
    }

    /// The first configured code-id key containing the contract's code id.
    pub async fn get_code_id_key_for_contract(
        &self,
        address: &str,
    ) -> Result<Option<String>, ComputeError> {
        Ok(self
            .contract_cached(address)
            .await?
            .and_then(|contract| self.config.code_id_key_for(contract.code_id))
            .map(|key| key.to_string()))
    }

    // ── Escape hatch ─────────────────────────────────────────────────────────

    /// Read-only raw query with bound parameters. No dependency tracking;
    /// the caller is responsible for any height filter.
    pub async fn query(&self, sql: &str, binds: &[Value]) -> Result<Vec<Value>, ComputeError> {
        self.store.raw_query(sql, binds).await
    }
}

/// Containment predicate over JSON values: an object predicate requires
/// every key to match recursively; anything else requires equality.
pub(crate) fn json_matches(value: &Value, predicate: &Value) -> bool {
    match predicate {
        Value::Object(fields) => match value {
            Value::Object(actual) => fields
                .iter()
                .all(|(key, expected)| actual.get(key).is_some_and(|v| json_matches(v, expected))),
            _ => false,
        },
        other => value == other,
    }
}
