//! End-to-end evaluator tests against the in-memory backend: environment
//! getters, single-block and range evaluation, the computation cache, and
//! query execution.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use chainformula_core::cache::{
    compute_cached, compute_range_cached, update_validity_up_to, ComputeRangeCachedRequest,
};
use chainformula_core::compute::{compute, ComputeRequest};
use chainformula_core::config::ComputeConfig;
use chainformula_core::env::Environment;
use chainformula_core::error::ComputeError;
use chainformula_core::keys::{encode_key, key_to_db, KeySegment, MapKeyType};
use chainformula_core::range::{compute_range, ComputeRangeRequest};
use chainformula_core::registry::{Formula, FormulaRegistry, FormulaType};
use chainformula_core::request::{execute_query, ComputeQuery, QueryResponse, QueryTarget};
use chainformula_core::store::{ComputationStore, EventStore};
use chainformula_core::types::{
    BankBalanceRow, BlockInfo, Computation, ContractRow, StateRow, WasmStateRow,
};
use chainformula_storage::InMemoryStore;

const CONTRACT: &str = "juno1contract";

fn block(height: u64) -> BlockInfo {
    BlockInfo::new(height, height * 100)
}

fn state_row(key: &str, height: u64, value: &str, deleted: bool) -> WasmStateRow {
    WasmStateRow {
        contract_address: CONTRACT.into(),
        key: key.into(),
        block: block(height),
        value: value.into(),
        deleted,
    }
}

fn db_key(segments: &[KeySegment]) -> String {
    key_to_db(&encode_key(segments))
}

/// Formula reading one state key; counts how often it actually runs.
struct ItemFormula {
    runs: AtomicU32,
}

impl ItemFormula {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            runs: AtomicU32::new(0),
        })
    }
}

#[async_trait]
impl Formula for ItemFormula {
    fn formula_type(&self) -> FormulaType {
        FormulaType::Contract
    }
    fn name(&self) -> &str {
        "item"
    }
    async fn compute(&self, env: &Environment) -> Result<Option<Value>, ComputeError> {
        self.runs.fetch_add(1, Ordering::Relaxed);
        env.get(CONTRACT, &["k".into()]).await
    }
}

/// Dynamic formula: result depends on the evaluation date.
struct NowFormula;

#[async_trait]
impl Formula for NowFormula {
    fn formula_type(&self) -> FormulaType {
        FormulaType::Generic
    }
    fn name(&self) -> &str {
        "now"
    }
    fn dynamic(&self) -> bool {
        true
    }
    async fn compute(&self, env: &Environment) -> Result<Option<Value>, ComputeError> {
        Ok(Some(json!(env.date())))
    }
}

/// Seed the standard scenario: values "1"/"2"/"3" at heights 10/20/30.
fn seeded_store() -> Arc<InMemoryStore> {
    let store = Arc::new(InMemoryStore::new());
    store.set_contract(ContractRow {
        address: CONTRACT.into(),
        code_id: 1,
        label: None,
    });
    store.set_state(StateRow {
        chain_id: "juno-1".into(),
        latest_block: block(30),
    });
    let key = db_key(&["k".into()]);
    store.add_wasm_state(state_row(&key, 10, "\"1\"", false));
    store.add_wasm_state(state_row(&key, 20, "\"2\"", false));
    store.add_wasm_state(state_row(&key, 30, "\"3\"", false));
    store
}

fn request(formula: Arc<dyn Formula>, at: u64) -> ComputeRequest {
    ComputeRequest {
        formula,
        chain_id: "juno-1".into(),
        target_address: CONTRACT.into(),
        args: serde_json::Map::new(),
        block: block(at),
        use_block_date: true,
        on_fetch: None,
    }
}

fn env_at(store: &Arc<InMemoryStore>, at: u64) -> Environment {
    Environment::new(chainformula_core::env::EnvOptions {
        chain_id: "juno-1".into(),
        target_address: CONTRACT.into(),
        block: block(at),
        use_block_date: true,
        args: serde_json::Map::new(),
        store: store.clone() as Arc<dyn EventStore>,
        config: Arc::new(ComputeConfig::default()),
        on_fetch: None,
    })
}

// ─── Environment semantics ───────────────────────────────────────────────────

#[tokio::test]
async fn point_read_most_recent_at_height() {
    let store = seeded_store();

    let env = env_at(&store, 25);
    assert_eq!(env.get(CONTRACT, &["k".into()]).await.unwrap(), Some(json!("2")));

    let env = env_at(&store, 30);
    assert_eq!(env.get(CONTRACT, &["k".into()]).await.unwrap(), Some(json!("3")));

    let env = env_at(&store, 9);
    assert_eq!(env.get(CONTRACT, &["k".into()]).await.unwrap(), None);
}

#[tokio::test]
async fn tombstone_shadows_key_and_still_dates_modification() {
    let store = seeded_store();
    let key = db_key(&["k".into()]);
    store.add_wasm_state(state_row(&key, 25, "", true));

    let env = env_at(&store, 27);
    assert_eq!(env.get(CONTRACT, &["k".into()]).await.unwrap(), None);
    // The tombstone is the most recent write.
    assert_eq!(
        env.get_date_key_modified(CONTRACT, &["k".into()]).await.unwrap(),
        Some(2500)
    );
}

#[tokio::test]
async fn map_read_decodes_trailing_keys_and_drops_tombstones() {
    let store = seeded_store();
    let alice = db_key(&["balance".into(), "alice".into()]);
    let bob = db_key(&["balance".into(), "bob".into()]);
    store.add_wasm_state(state_row(&alice, 12, "\"100\"", false));
    store.add_wasm_state(state_row(&bob, 14, "\"200\"", false));
    store.add_wasm_state(state_row(&bob, 16, "", true));

    let env = env_at(&store, 20);
    let map = env
        .get_map(CONTRACT, &["balance".into()], MapKeyType::Str)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(map.get("alice"), Some(&json!("100")));
    assert!(!map.contains_key("bob"));
}

#[tokio::test]
async fn first_set_ignores_tombstones_and_memo() {
    let store = Arc::new(InMemoryStore::new());
    store.set_state(StateRow {
        chain_id: "juno-1".into(),
        latest_block: block(30),
    });
    let key = db_key(&["k".into()]);
    store.add_wasm_state(state_row(&key, 10, "", true));
    store.add_wasm_state(state_row(&key, 20, "\"2\"", false));

    let env = env_at(&store, 30);
    // Prime the memo with the most-recent row, then confirm the
    // first-set getter still reads ascending.
    env.get(CONTRACT, &["k".into()]).await.unwrap();
    assert_eq!(
        env.get_date_key_first_set(CONTRACT, &["k".into()]).await.unwrap(),
        Some(2000)
    );
    assert_eq!(
        env.get_date_key_first_set_with_value_match(CONTRACT, &["k".into()], &json!("2"))
            .await
            .unwrap(),
        Some(2000)
    );
    assert_eq!(
        env.get_date_key_first_set_with_value_match(CONTRACT, &["k".into()], &json!("9"))
            .await
            .unwrap(),
        None
    );
}

#[tokio::test]
async fn memo_serves_repeated_and_prefetched_reads() {
    let store = seeded_store();
    let alice = db_key(&["balance".into(), "alice".into()]);
    store.add_wasm_state(state_row(&alice, 12, "\"100\"", false));

    let env = env_at(&store, 30);
    let before = store.read_count();

    // Same exact key twice: one read.
    env.get(CONTRACT, &["k".into()]).await.unwrap();
    env.get(CONTRACT, &["k".into()]).await.unwrap();
    assert_eq!(store.read_count(), before + 1);

    // A prefetched prefix satisfies later point reads inside it.
    env.prefetch(
        CONTRACT,
        &[chainformula_core::env::PrefetchKey {
            segments: vec!["balance".into()],
            prefix: true,
        }],
    )
    .await
    .unwrap();
    let after_prefetch = store.read_count();
    let value = env
        .get(CONTRACT, &["balance".into(), "alice".into()])
        .await
        .unwrap();
    assert_eq!(value, Some(json!("100")));
    // Also knows the absence of unseen keys under the prefix.
    let missing = env
        .get(CONTRACT, &["balance".into(), "carol".into()])
        .await
        .unwrap();
    assert_eq!(missing, None);
    assert_eq!(store.read_count(), after_prefetch);
}

#[tokio::test]
async fn balance_snapshot_preferred_over_history() {
    let store = seeded_store();
    store.set_bank_balance(BankBalanceRow {
        address: CONTRACT.into(),
        block: block(15),
        balances: "{\"ujuno\":\"500\"}".into(),
    });

    let env = env_at(&store, 20);
    assert_eq!(
        env.get_balance(CONTRACT, "ujuno").await.unwrap(),
        Some("500".into())
    );
    // Snapshot is newer than the target height and history is not
    // configured for this contract: absent.
    let env = env_at(&store, 12);
    assert_eq!(env.get_balance(CONTRACT, "ujuno").await.unwrap(), None);
}

// ─── Single-block evaluation ─────────────────────────────────────────────────

#[tokio::test]
async fn compute_is_deterministic_with_stable_dependencies() {
    let store = seeded_store();
    let events: Arc<dyn EventStore> = store.clone();
    let config = Arc::new(ComputeConfig::default());

    let first = compute(&events, &config, request(ItemFormula::new(), 25))
        .await
        .unwrap();
    let second = compute(&events, &config, request(ItemFormula::new(), 25))
        .await
        .unwrap();

    assert_eq!(first.value, Some(json!("2")));
    assert_eq!(first.value, second.value);
    assert_eq!(first.dependent_events, second.dependent_events);
    assert_eq!(first.dependent_events.len(), 1);
    assert!(first.dependent_transformations.is_empty());
    // Valid until the next write at height 30.
    assert_eq!(first.latest_block_height_valid, 29);
}

#[tokio::test]
async fn compute_validity_unbounded_uses_latest_height() {
    let store = seeded_store();
    store.add_block(block(50));
    let events: Arc<dyn EventStore> = store.clone();
    let config = Arc::new(ComputeConfig::default());

    let result = compute(&events, &config, request(ItemFormula::new(), 30))
        .await
        .unwrap();
    // No dependency changes above 30; the indexer head bounds validity.
    assert_eq!(result.latest_block_height_valid, 50);
}

#[tokio::test]
async fn code_id_filter_rejects_mismatched_contract() {
    struct Filtered {
        keys: Vec<String>,
    }
    #[async_trait]
    impl Formula for Filtered {
        fn formula_type(&self) -> FormulaType {
            FormulaType::Contract
        }
        fn name(&self) -> &str {
            "filtered"
        }
        fn code_id_keys(&self) -> Option<&[String]> {
            Some(&self.keys)
        }
        async fn compute(&self, _env: &Environment) -> Result<Option<Value>, ComputeError> {
            Ok(Some(json!(true)))
        }
    }

    let store = seeded_store();
    let events: Arc<dyn EventStore> = store.clone();
    let mut config = ComputeConfig::default();
    config.code_ids.insert("cw20".into(), vec![99]);
    let config = Arc::new(config);

    let err = compute(
        &events,
        &config,
        request(
            Arc::new(Filtered {
                keys: vec!["cw20".into()],
            }),
            20,
        ),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, ComputeError::NotApplicable(_)));

    let err = compute(
        &events,
        &config,
        ComputeRequest {
            target_address: "juno1unknown".into(),
            ..request(
                Arc::new(Filtered {
                    keys: vec!["cw20".into()],
                }),
                20,
            )
        },
    )
    .await
    .unwrap_err();
    assert!(matches!(err, ComputeError::NotFound(_)));
}

// ─── Range evaluation ────────────────────────────────────────────────────────

#[tokio::test]
async fn range_skips_ahead_between_dependency_changes() {
    let store = seeded_store();
    let key = db_key(&["k".into()]);
    store.add_wasm_state(state_row(&key, 25, "", true));
    let events: Arc<dyn EventStore> = store.clone();
    let config = Arc::new(ComputeConfig::default());

    let pieces = compute_range(
        &events,
        &config,
        ComputeRangeRequest {
            formula: ItemFormula::new(),
            chain_id: "juno-1".into(),
            target_address: CONTRACT.into(),
            args: serde_json::Map::new(),
            block_start: block(10),
            block_end: block(30),
            on_fetch: None,
        },
    )
    .await
    .unwrap();

    let summary: Vec<(u64, Option<Value>, u64)> = pieces
        .iter()
        .map(|p| (p.block.height, p.value.clone(), p.latest_block_height_valid))
        .collect();
    assert_eq!(
        summary,
        vec![
            (10, Some(json!("1")), 19),
            (20, Some(json!("2")), 24),
            (25, None, 29),
            (30, Some(json!("3")), 30),
        ]
    );
}

#[tokio::test]
async fn range_matches_pointwise_compute() {
    let store = seeded_store();
    let key = db_key(&["k".into()]);
    store.add_wasm_state(state_row(&key, 25, "", true));
    let events: Arc<dyn EventStore> = store.clone();
    let config = Arc::new(ComputeConfig::default());

    let pieces = compute_range(
        &events,
        &config,
        ComputeRangeRequest {
            formula: ItemFormula::new(),
            chain_id: "juno-1".into(),
            target_address: CONTRACT.into(),
            args: serde_json::Map::new(),
            block_start: block(10),
            block_end: block(30),
            on_fetch: None,
        },
    )
    .await
    .unwrap();

    for height in 10..=30 {
        let expected = compute(&events, &config, request(ItemFormula::new(), height))
            .await
            .unwrap()
            .value;
        let piece = pieces
            .iter()
            .find(|p| p.block.height <= height && height <= p.latest_block_height_valid)
            .unwrap_or_else(|| panic!("no piece covers height {height}"));
        assert_eq!(piece.value, expected, "mismatch at height {height}");
    }
}

#[tokio::test]
async fn dynamic_formula_rejected_over_range_and_persists_nothing() {
    let store = seeded_store();
    let events: Arc<dyn EventStore> = store.clone();
    let config = Arc::new(ComputeConfig::default());

    let err = compute_range_cached(
        &events,
        store.as_ref(),
        &config,
        ComputeRangeCachedRequest {
            formula: Arc::new(NowFormula),
            chain_id: "juno-1".into(),
            target_address: CONTRACT.into(),
            args: serde_json::Map::new(),
            block_start: block(10),
            block_end: block(20),
            on_fetch: None,
        },
    )
    .await
    .unwrap_err();
    assert!(matches!(err, ComputeError::NotApplicable(_)));
    assert!(store
        .computations_in_range(CONTRACT, "generic/now", "{}", 0, 100)
        .await
        .unwrap()
        .is_empty());
}

// ─── Computation cache ───────────────────────────────────────────────────────

#[tokio::test]
async fn validity_extension_is_monotone() {
    let store = seeded_store();
    store.add_block(block(50));
    let events: Arc<dyn EventStore> = store.clone();

    let mut stored = Computation {
        target_address: CONTRACT.into(),
        formula: "contract/item".into(),
        args: "{}".into(),
        block: block(30),
        value: Some(json!("3")),
        dependent_events: vec![chainformula_core::types::DependentKey {
            key: format!("wasm/state:{CONTRACT}:{}", db_key(&["k".into()])),
            prefix: false,
        }],
        dependent_transformations: vec![],
        latest_block_height_valid: 30,
    };
    store.upsert_computation(&stored).await.unwrap();

    // Extending to 50 holds: no writes above 30.
    assert!(update_validity_up_to(&events, store.as_ref(), &mut stored, 50)
        .await
        .unwrap());
    assert_eq!(stored.latest_block_height_valid, 50);

    // A smaller bound never decreases it.
    assert!(update_validity_up_to(&events, store.as_ref(), &mut stored, 40)
        .await
        .unwrap());
    assert_eq!(stored.latest_block_height_valid, 50);

    // A write at 60 blocks extension past it.
    let key = db_key(&["k".into()]);
    store.add_wasm_state(state_row(&key, 60, "\"4\"", false));
    assert!(!update_validity_up_to(&events, store.as_ref(), &mut stored, 70)
        .await
        .unwrap());
    assert_eq!(stored.latest_block_height_valid, 50);
}

#[tokio::test]
async fn cached_compute_extends_instead_of_rerunning() {
    let store = seeded_store();
    let events: Arc<dyn EventStore> = store.clone();
    let config = Arc::new(ComputeConfig::default());

    // First request at height 100 — computed fresh, persisted by the
    // caller the way range evaluation would. The head is at 100, so the
    // stored validity stops there.
    let formula = ItemFormula::new();
    let first = compute(&events, &config, request(formula.clone(), 100))
        .await
        .unwrap();
    assert_eq!(first.latest_block_height_valid, 100);
    store.add_block(block(150));
    store
        .upsert_computation(&Computation::from_result(
            CONTRACT,
            "contract/item",
            "{}",
            &first,
        ))
        .await
        .unwrap();
    assert_eq!(formula.runs.load(Ordering::Relaxed), 1);

    // Second request at 150: no dependency changed in (100, 150], so the
    // stored record extends and the formula does not run again.
    let second = compute_cached(&events, store.as_ref(), &config, request(formula.clone(), 150))
        .await
        .unwrap();
    assert_eq!(formula.runs.load(Ordering::Relaxed), 1);
    assert_eq!(second.value, Some(json!("3")));
    assert_eq!(second.latest_block_height_valid, 150);

    let stored = store
        .computation_at_or_below(CONTRACT, "contract/item", "{}", 150)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.latest_block_height_valid, 150);
}

#[tokio::test]
async fn range_reuse_serves_continuous_chain_without_rerunning() {
    let store = seeded_store();
    let events: Arc<dyn EventStore> = store.clone();
    let config = Arc::new(ComputeConfig::default());

    let formula = ItemFormula::new();
    let rangereq = |formula: Arc<dyn Formula>| ComputeRangeCachedRequest {
        formula,
        chain_id: "juno-1".into(),
        target_address: CONTRACT.into(),
        args: serde_json::Map::new(),
        block_start: block(10),
        block_end: block(30),
        on_fetch: None,
    };

    let first = compute_range_cached(&events, store.as_ref(), &config, rangereq(formula.clone()))
        .await
        .unwrap();
    assert_eq!(first.len(), 3);
    let runs_after_first = formula.runs.load(Ordering::Relaxed);
    assert_eq!(runs_after_first, 3);

    // Same range again: fully served from the stored chain.
    let second = compute_range_cached(&events, store.as_ref(), &config, rangereq(formula.clone()))
        .await
        .unwrap();
    assert_eq!(formula.runs.load(Ordering::Relaxed), runs_after_first);
    assert_eq!(
        first
            .iter()
            .map(|p| (p.block.height, p.value.clone()))
            .collect::<Vec<_>>(),
        second
            .iter()
            .map(|p| (p.block.height, p.value.clone()))
            .collect::<Vec<_>>()
    );
}

#[tokio::test]
async fn range_reuse_recomputes_only_uncovered_tail() {
    let store = seeded_store();
    let events: Arc<dyn EventStore> = store.clone();
    let config = Arc::new(ComputeConfig::default());

    let formula = ItemFormula::new();
    compute_range_cached(
        &events,
        store.as_ref(),
        &config,
        ComputeRangeCachedRequest {
            formula: formula.clone(),
            chain_id: "juno-1".into(),
            target_address: CONTRACT.into(),
            args: serde_json::Map::new(),
            block_start: block(10),
            block_end: block(30),
            on_fetch: None,
        },
    )
    .await
    .unwrap();
    let runs_seed = formula.runs.load(Ordering::Relaxed);

    // New data past the stored chain.
    let key = db_key(&["k".into()]);
    store.add_wasm_state(state_row(&key, 40, "\"4\"", false));

    let extended = compute_range_cached(
        &events,
        store.as_ref(),
        &config,
        ComputeRangeCachedRequest {
            formula: formula.clone(),
            chain_id: "juno-1".into(),
            target_address: CONTRACT.into(),
            args: serde_json::Map::new(),
            block_start: block(10),
            block_end: block(45),
            on_fetch: None,
        },
    )
    .await
    .unwrap();

    // Tail recompute runs at the stored tail block and at the new change
    // only — the earlier pieces are reused.
    assert_eq!(formula.runs.load(Ordering::Relaxed), runs_seed + 2);
    let summary: Vec<(u64, u64)> = extended
        .iter()
        .map(|p| (p.block.height, p.latest_block_height_valid))
        .collect();
    assert_eq!(summary, vec![(10, 19), (20, 29), (30, 39), (40, 45)]);

    // No coverage gaps across the whole series.
    for pair in extended.windows(2) {
        assert_eq!(pair[0].latest_block_height_valid + 1, pair[1].block.height);
    }
}

#[tokio::test]
async fn range_reuse_recomputes_all_when_chain_broken() {
    let store = seeded_store();
    let events: Arc<dyn EventStore> = store.clone();
    let config = Arc::new(ComputeConfig::default());

    // A stored anchor whose validity stops short of the next stored piece
    // breaks the chain.
    for (height, valid) in [(10u64, 15u64), (20, 24)] {
        store
            .upsert_computation(&Computation {
                target_address: CONTRACT.into(),
                formula: "contract/item".into(),
                args: "{}".into(),
                block: block(height),
                value: Some(json!("stale")),
                dependent_events: vec![],
                dependent_transformations: vec![],
                latest_block_height_valid: valid,
            })
            .await
            .unwrap();
    }

    let formula = ItemFormula::new();
    let pieces = compute_range_cached(
        &events,
        store.as_ref(),
        &config,
        ComputeRangeCachedRequest {
            formula: formula.clone(),
            chain_id: "juno-1".into(),
            target_address: CONTRACT.into(),
            args: serde_json::Map::new(),
            block_start: block(10),
            block_end: block(30),
            on_fetch: None,
        },
    )
    .await
    .unwrap();

    // Fresh values, not the stale stored ones.
    assert!(formula.runs.load(Ordering::Relaxed) >= 3);
    assert!(pieces.iter().all(|p| p.value != Some(json!("stale"))));
}

// ─── State tracker ───────────────────────────────────────────────────────────

#[tokio::test]
async fn state_tracker_serves_refreshed_snapshot() {
    let store = seeded_store();
    let events: Arc<dyn EventStore> = store.clone();
    let tracker = chainformula_core::StateTracker::new(events);

    assert!(tracker.latest().is_none());
    tracker.refresh().await.unwrap();
    assert_eq!(tracker.latest().unwrap().latest_block.height, 30);

    // The snapshot is stale until the next refresh tick.
    store.add_block(block(40));
    assert_eq!(tracker.latest().unwrap().latest_block.height, 30);
    tracker.refresh().await.unwrap();
    assert_eq!(tracker.latest().unwrap().latest_block.height, 40);
}

// ─── Query surface ───────────────────────────────────────────────────────────

#[tokio::test]
async fn block_step_query_emits_sampled_series() {
    let store = seeded_store();
    let events: Arc<dyn EventStore> = store.clone();
    let config = Arc::new(ComputeConfig::default());
    let mut registry = FormulaRegistry::new();
    registry.register(ItemFormula::new()).unwrap();

    let response = execute_query(
        &events,
        store.as_ref(),
        &config,
        &registry,
        "juno-1",
        ComputeQuery {
            formula_type: FormulaType::Contract,
            formula_name: "item".into(),
            address: CONTRACT.into(),
            args: serde_json::Map::new(),
            target: QueryTarget::Blocks(10, 30),
            block_step: Some(10),
            time_step: None,
            on_fetch: None,
        },
    )
    .await
    .unwrap();

    match response {
        QueryResponse::Series(samples) => {
            let values: Vec<_> = samples.iter().map(|s| s.value.clone().unwrap()).collect();
            assert_eq!(values, vec![json!("1"), json!("2"), json!("3")]);
            assert_eq!(
                samples.iter().map(|s| s.at.unwrap()).collect::<Vec<_>>(),
                vec![10, 20, 30]
            );
        }
        other => panic!("expected series, got {other:?}"),
    }
}

#[tokio::test]
async fn time_query_resolves_block_and_bad_ranges_fail() {
    let store = seeded_store();
    let events: Arc<dyn EventStore> = store.clone();
    let config = Arc::new(ComputeConfig::default());
    let mut registry = FormulaRegistry::new();
    registry.register(ItemFormula::new()).unwrap();

    let query = |target, block_step| ComputeQuery {
        formula_type: FormulaType::Contract,
        formula_name: "item".into(),
        address: CONTRACT.into(),
        args: serde_json::Map::new(),
        target,
        block_step,
        time_step: None,
        on_fetch: None,
    };

    // Time 2_500 ms resolves to the block at height 20.
    let response = execute_query(
        &events,
        store.as_ref(),
        &config,
        &registry,
        "juno-1",
        query(QueryTarget::Time(2_500), None),
    )
    .await
    .unwrap();
    match response {
        QueryResponse::Value { block, value } => {
            assert_eq!(block.height, 20);
            assert_eq!(value, Some(json!("2")));
        }
        other => panic!("expected value, got {other:?}"),
    }

    let err = execute_query(
        &events,
        store.as_ref(),
        &config,
        &registry,
        "juno-1",
        query(QueryTarget::Blocks(30, 10), None),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, ComputeError::BadInput(_)));

    let err = execute_query(
        &events,
        store.as_ref(),
        &config,
        &registry,
        "juno-1",
        query(QueryTarget::Blocks(10, 30), Some(0)),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, ComputeError::BadInput(_)));

    let err = execute_query(
        &events,
        store.as_ref(),
        &config,
        &registry,
        "juno-1",
        ComputeQuery {
            formula_name: "missing".into(),
            ..query(QueryTarget::Block(20), None)
        },
    )
    .await
    .unwrap_err();
    assert!(matches!(err, ComputeError::NotFound(_)));
}
