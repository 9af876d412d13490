//! Range evaluator: piecewise evaluation with dependency-driven skip-ahead.

use std::sync::Arc;

use serde_json::Value;
use tracing::debug;

use crate::compute::{check_and_build_env, ComputeRequest};
use crate::config::ComputeConfig;
use crate::env::OnFetch;
use crate::error::ComputeError;
use crate::registry::Formula;
use crate::store::EventStore;
use crate::types::{BlockInfo, ComputationResult};

/// Inputs for one range evaluation.
pub struct ComputeRangeRequest {
    pub formula: Arc<dyn Formula>,
    pub chain_id: String,
    pub target_address: String,
    pub args: serde_json::Map<String, Value>,
    pub block_start: BlockInfo,
    pub block_end: BlockInfo,
    pub on_fetch: Option<OnFetch>,
}

/// Evaluate a formula across `[block_start, block_end]`, yielding a
/// piecewise-constant series.
///
/// The cursor evaluates at the range start, derives the piece's validity
/// from the recorded dependencies, and jumps to the next block at which
/// any dependency changes. A formula error at any cursor aborts the whole
/// range. Dynamic formulas are rejected outright: their output may depend
/// on the wall clock, so a block range has no well-defined value.
pub async fn compute_range(
    store: &Arc<dyn EventStore>,
    config: &Arc<ComputeConfig>,
    request: ComputeRangeRequest,
) -> Result<Vec<ComputationResult>, ComputeError> {
    if request.formula.dynamic() {
        return Err(ComputeError::NotApplicable(format!(
            "dynamic formula '{}' cannot be evaluated over a block range",
            request.formula.name()
        )));
    }
    if request.block_start.height > request.block_end.height {
        return Err(ComputeError::BadInput(format!(
            "range start {} is after range end {}",
            request.block_start.height, request.block_end.height
        )));
    }

    let block_end = request.block_end.height;
    let mut cursor = request.block_start;
    let mut results = Vec::new();

    loop {
        let env = check_and_build_env(
            store,
            config,
            &ComputeRequest {
                formula: request.formula.clone(),
                chain_id: request.chain_id.clone(),
                target_address: request.target_address.clone(),
                args: request.args.clone(),
                block: cursor,
                use_block_date: true,
                on_fetch: request.on_fetch.clone(),
            },
        )
        .await?;

        let value = request.formula.compute(&env).await?;
        let (dependent_events, dependent_transformations) = env.recorder.split();
        let mut deps = dependent_events.clone();
        deps.extend(dependent_transformations.iter().cloned());

        // The first change strictly above the cursor bounds this piece and
        // positions the next one.
        let next_change = store.next_dependency_change(&deps, cursor.height).await?;
        let (latest_block_height_valid, next_cursor) = match next_change {
            Some(change) if change.height <= block_end => (change.height - 1, Some(change)),
            _ => (block_end, None),
        };

        results.push(ComputationResult {
            block: cursor,
            value,
            dependent_events,
            dependent_transformations,
            latest_block_height_valid,
        });

        match next_cursor {
            Some(change) => cursor = change,
            None => break,
        }
    }

    debug!(
        formula = request.formula.name(),
        address = %request.target_address,
        start = request.block_start.height,
        end = block_end,
        pieces = results.len(),
        "range computed"
    );
    Ok(results)
}
