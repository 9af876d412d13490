//! Catalogue formulas evaluated end-to-end against the in-memory backend.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::json;

use chainformula_core::config::ComputeConfig;
use chainformula_core::error::ComputeError;
use chainformula_core::keys::{encode_key, key_to_db, KeySegment};
use chainformula_core::registry::FormulaType;
use chainformula_core::request::{execute_query, ComputeQuery, QueryResponse, QueryTarget};
use chainformula_core::store::EventStore;
use chainformula_core::types::{
    BlockInfo, ContractRow, ProposalRow, SlashRow, StateRow, TransformationRow, ValidatorRow,
    WasmStateRow,
};
use chainformula_formulas::default_registry;
use chainformula_storage::InMemoryStore;

const CW20: &str = "juno1cw20";
const DAO: &str = "juno1dao";
const VALIDATOR: &str = "junovaloper1v";

fn block(height: u64) -> BlockInfo {
    BlockInfo::new(height, height * 100)
}

fn seeded() -> (Arc<InMemoryStore>, Arc<ComputeConfig>) {
    let store = Arc::new(InMemoryStore::new());
    store.set_state(StateRow {
        chain_id: "juno-1".into(),
        latest_block: block(100),
    });
    store.set_contract(ContractRow {
        address: CW20.into(),
        code_id: 1,
        label: Some("cw20".into()),
    });
    store.set_contract(ContractRow {
        address: DAO.into(),
        code_id: 10,
        label: Some("dao".into()),
    });
    store.set_validator(ValidatorRow {
        operator_address: VALIDATOR.into(),
        moniker: None,
    });

    let balance_key = key_to_db(&encode_key(&[
        KeySegment::Str("balance".into()),
        KeySegment::Str("juno1alice".into()),
    ]));
    store.add_wasm_state(WasmStateRow {
        contract_address: CW20.into(),
        key: balance_key,
        block: block(10),
        value: "\"250\"".into(),
        deleted: false,
    });
    store.add_transformation(TransformationRow {
        contract_address: DAO.into(),
        name: "config".into(),
        block: block(12),
        value: Some("{\"name\":\"Test DAO\"}".into()),
    });
    store.add_slash(SlashRow {
        operator_address: VALIDATOR.into(),
        registered_block: block(14),
        infraction_block_height: 13,
        amount_slashed: "100".into(),
    });
    store.add_proposal(ProposalRow {
        proposal_id: 1,
        block: block(16),
        data: "{\"status\":\"open\"}".into(),
    });

    let mut config = ComputeConfig::default();
    config.code_ids = BTreeMap::from([("dao-core".to_string(), vec![10])]);
    (store, Arc::new(config))
}

fn query(formula_type: FormulaType, name: &str, address: &str, height: u64) -> ComputeQuery {
    ComputeQuery {
        formula_type,
        formula_name: name.into(),
        address: address.into(),
        args: serde_json::Map::new(),
        target: QueryTarget::Block(height),
        block_step: None,
        time_step: None,
        on_fetch: None,
    }
}

async fn run(
    store: &Arc<InMemoryStore>,
    config: &Arc<ComputeConfig>,
    q: ComputeQuery,
) -> Result<QueryResponse, ComputeError> {
    let events: Arc<dyn EventStore> = store.clone();
    let registry = default_registry().unwrap();
    execute_query(&events, store.as_ref(), config, &registry, "juno-1", q).await
}

#[tokio::test]
async fn cw20_balance_with_args() {
    let (store, config) = seeded();
    let mut q = query(FormulaType::Contract, "cw20/balance", CW20, 20);
    q.args.insert("address".into(), json!("juno1alice"));

    match run(&store, &config, q).await.unwrap() {
        QueryResponse::Value { value, .. } => assert_eq!(value, Some(json!("250"))),
        other => panic!("expected value, got {other:?}"),
    }

    // Unknown holders read as "0".
    let mut q = query(FormulaType::Contract, "cw20/balance", CW20, 20);
    q.args.insert("address".into(), json!("juno1bob"));
    match run(&store, &config, q).await.unwrap() {
        QueryResponse::Value { value, .. } => assert_eq!(value, Some(json!("0"))),
        other => panic!("expected value, got {other:?}"),
    }

    // Missing argument is the caller's fault.
    let err = run(&store, &config, query(FormulaType::Contract, "cw20/balance", CW20, 20))
        .await
        .unwrap_err();
    assert!(matches!(err, ComputeError::BadInput(_)));
}

#[tokio::test]
async fn dao_config_respects_code_id_filter() {
    let (store, config) = seeded();

    match run(&store, &config, query(FormulaType::Contract, "dao/config", DAO, 20))
        .await
        .unwrap()
    {
        QueryResponse::Value { value, .. } => {
            assert_eq!(value, Some(json!({"name": "Test DAO"})))
        }
        other => panic!("expected value, got {other:?}"),
    }

    // The cw20 contract's code id is not in the dao-core set.
    let err = run(&store, &config, query(FormulaType::Contract, "dao/config", CW20, 20))
        .await
        .unwrap_err();
    assert!(matches!(err, ComputeError::NotApplicable(_)));
}

#[tokio::test]
async fn validator_slashes_and_missing_validator() {
    let (store, config) = seeded();

    match run(
        &store,
        &config,
        query(FormulaType::Validator, "staking/wasSlashed", VALIDATOR, 20),
    )
    .await
    .unwrap()
    {
        QueryResponse::Value { value, .. } => assert_eq!(value, Some(json!(true))),
        other => panic!("expected value, got {other:?}"),
    }

    let err = run(
        &store,
        &config,
        query(FormulaType::Validator, "staking/wasSlashed", "junovaloper1unknown", 20),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, ComputeError::NotFound(_)));
}

#[tokio::test]
async fn proposal_formulas_read_gov_state() {
    let (store, config) = seeded();

    match run(
        &store,
        &config,
        query(FormulaType::Generic, "gov/proposalCount", "", 20),
    )
    .await
    .unwrap()
    {
        QueryResponse::Value { value, .. } => assert_eq!(value, Some(json!(1))),
        other => panic!("expected value, got {other:?}"),
    }

    // Before the proposal's block, it does not exist yet.
    match run(
        &store,
        &config,
        query(FormulaType::Generic, "gov/proposalCount", "", 15),
    )
    .await
    .unwrap()
    {
        QueryResponse::Value { value, .. } => assert_eq!(value, Some(json!(0))),
        other => panic!("expected value, got {other:?}"),
    }

    let mut q = query(FormulaType::Generic, "gov/proposal", "", 20);
    q.args.insert("id".into(), json!(1));
    match run(&store, &config, q).await.unwrap() {
        QueryResponse::Value { value, .. } => {
            let value = value.unwrap();
            assert_eq!(value["data"]["status"], json!("open"));
            assert_eq!(value["height"], json!(16));
        }
        other => panic!("expected value, got {other:?}"),
    }
}

#[tokio::test]
async fn dynamic_formula_fails_over_range() {
    let (store, config) = seeded();
    let mut q = query(FormulaType::Generic, "chain/now", "", 0);
    q.target = QueryTarget::Blocks(10, 20);

    let err = run(&store, &config, q).await.unwrap_err();
    assert!(matches!(err, ComputeError::NotApplicable(_)));
}
