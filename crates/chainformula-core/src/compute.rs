//! Single-block evaluator: one formula, one block, one result.

use std::sync::Arc;

use serde_json::Value;
use tracing::debug;

use crate::config::ComputeConfig;
use crate::env::{EnvOptions, Environment, OnFetch};
use crate::error::ComputeError;
use crate::registry::{Formula, FormulaType};
use crate::store::EventStore;
use crate::types::{BlockInfo, ComputationResult};

/// Inputs for one evaluation.
pub struct ComputeRequest {
    pub formula: Arc<dyn Formula>,
    pub chain_id: String,
    pub target_address: String,
    pub args: serde_json::Map<String, Value>,
    /// The block the formula is pinned to.
    pub block: BlockInfo,
    /// If set, the Environment's date is the target block's time rather
    /// than the wall clock.
    pub use_block_date: bool,
    pub on_fetch: Option<OnFetch>,
}

/// Evaluate a formula at one block.
///
/// Pre-flight checks resolve the typed address (missing contract/validator
/// is `NotFound`, a code-id filter mismatch is `NotApplicable`), then the
/// formula runs against a fresh [`Environment`] and the recorded
/// dependencies determine `latest_block_height_valid`: the largest height
/// at which no dependency has a newer row, or the indexer's latest height
/// when unbounded. The result is returned unpersisted — persistence is the
/// caller's decision.
pub async fn compute(
    store: &Arc<dyn EventStore>,
    config: &Arc<ComputeConfig>,
    request: ComputeRequest,
) -> Result<ComputationResult, ComputeError> {
    let env = check_and_build_env(store, config, &request).await?;

    let value = request.formula.compute(&env).await?;
    let (dependent_events, dependent_transformations) = env.recorder.split();

    let mut deps = dependent_events.clone();
    deps.extend(dependent_transformations.iter().cloned());
    let latest_block_height_valid =
        latest_valid_height(store, &deps, request.block.height, None).await?;

    debug!(
        formula = request.formula.name(),
        address = %request.target_address,
        height = request.block.height,
        valid_until = latest_block_height_valid,
        deps = deps.len(),
        "computed"
    );

    Ok(ComputationResult {
        block: request.block,
        value,
        dependent_events,
        dependent_transformations,
        latest_block_height_valid,
    })
}

/// Run pre-flight address checks and build the evaluation environment.
pub(crate) async fn check_and_build_env(
    store: &Arc<dyn EventStore>,
    config: &Arc<ComputeConfig>,
    request: &ComputeRequest,
) -> Result<Environment, ComputeError> {
    match request.formula.formula_type() {
        FormulaType::Contract => {
            if let Some(keys) = request.formula.code_id_keys() {
                let contract = store.contract(&request.target_address).await?.ok_or_else(
                    || ComputeError::NotFound(format!("contract '{}'", request.target_address)),
                )?;
                let ids = config.code_ids_for_keys(keys);
                if !ids.contains(&contract.code_id) {
                    return Err(ComputeError::NotApplicable(format!(
                        "contract '{}' (code id {}) does not match the formula's code-id filter",
                        request.target_address, contract.code_id
                    )));
                }
            }
        }
        FormulaType::Validator => {
            store.validator(&request.target_address).await?.ok_or_else(|| {
                ComputeError::NotFound(format!("validator '{}'", request.target_address))
            })?;
        }
        FormulaType::Account | FormulaType::Generic => {}
    }

    Ok(Environment::new(EnvOptions {
        chain_id: request.chain_id.clone(),
        target_address: request.target_address.clone(),
        block: request.block,
        use_block_date: request.use_block_date,
        args: request.args.clone(),
        store: store.clone(),
        config: config.clone(),
        on_fetch: request.on_fetch.clone(),
    }))
}

/// The largest height H ≥ `height` such that no dependency has a row in
/// `(height, H]`. Bounded by `ceiling` when given, otherwise by the
/// indexer's latest height.
pub(crate) async fn latest_valid_height(
    store: &Arc<dyn EventStore>,
    deps: &[crate::types::DependentKey],
    height: u64,
    ceiling: Option<u64>,
) -> Result<u64, ComputeError> {
    let next_change = store.next_dependency_change(deps, height).await?;
    let unbounded = match ceiling {
        Some(ceiling) => ceiling,
        None => store
            .state()
            .await?
            .map(|state| state.latest_block.height)
            .unwrap_or(height)
            .max(height),
    };
    Ok(match next_change {
        Some(change) if change.height <= unbounded => change.height - 1,
        _ => unbounded,
    })
}
