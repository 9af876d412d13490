//! Computation cache: validity extension and range reuse.
//!
//! A stored computation is reusable as long as none of its recorded
//! dependencies changed. [`update_validity_up_to`] extends a record's
//! validity interval in place; [`compute_range_cached`] serves a range
//! from a continuous chain of stored pieces, recomputing only the
//! uncovered tail. Range reuse is all-or-nothing: a broken chain triggers
//! a full recompute rather than partial merging.
//!
//! Persistent single-block memoisation stays disabled: [`compute_cached`]
//! reads and extends stored records but never writes one — only range
//! evaluation persists pieces.

use std::sync::Arc;

use serde_json::Value;
use tracing::debug;

use crate::compute::{compute, ComputeRequest};
use crate::config::ComputeConfig;
use crate::env::OnFetch;
use crate::error::ComputeError;
use crate::range::{compute_range, ComputeRangeRequest};
use crate::registry::{formula_id, Formula};
use crate::store::{ComputationStore, EventStore};
use crate::types::{canonical_args, BlockInfo, Computation, ComputationResult};

/// Extend a stored computation's validity to `up_to` iff no recorded
/// dependency has a row in `(latest_block_height_valid, up_to]`.
///
/// Never decreases the stored bound. Returns whether the extension held.
pub async fn update_validity_up_to(
    events: &Arc<dyn EventStore>,
    computations: &dyn ComputationStore,
    computation: &mut Computation,
    up_to: u64,
) -> Result<bool, ComputeError> {
    if up_to <= computation.latest_block_height_valid {
        return Ok(true);
    }
    let deps = computation.dependencies();
    let changed = events
        .has_dependency_change(&deps, computation.latest_block_height_valid, up_to)
        .await?;
    if changed {
        return Ok(false);
    }
    computations
        .set_validity(
            &computation.target_address,
            &computation.formula,
            &computation.args,
            computation.block.height,
            up_to,
        )
        .await?;
    computation.latest_block_height_valid = up_to;
    Ok(true)
}

/// Evaluate a formula at one block, serving from the computation cache
/// when a stored record can be validated through the target height.
///
/// Dynamic formulas always evaluate fresh. Fresh results are **not**
/// persisted here.
pub async fn compute_cached(
    events: &Arc<dyn EventStore>,
    computations: &dyn ComputationStore,
    config: &Arc<ComputeConfig>,
    request: ComputeRequest,
) -> Result<ComputationResult, ComputeError> {
    if request.formula.dynamic() {
        return compute(events, config, request).await;
    }

    let formula = formula_id(request.formula.formula_type(), request.formula.name());
    let args = canonical_args(&request.args);
    let target_height = request.block.height;

    if let Some(mut stored) = computations
        .computation_at_or_below(&request.target_address, &formula, &args, target_height)
        .await?
    {
        if update_validity_up_to(events, computations, &mut stored, target_height).await? {
            debug!(
                formula = %formula,
                address = %request.target_address,
                height = target_height,
                cached_at = stored.block.height,
                "served from computation cache"
            );
            return Ok(stored.to_result());
        }
    }

    compute(events, config, request).await
}

/// Inputs for a cached range evaluation.
pub struct ComputeRangeCachedRequest {
    pub formula: Arc<dyn Formula>,
    pub chain_id: String,
    pub target_address: String,
    pub args: serde_json::Map<String, Value>,
    pub block_start: BlockInfo,
    pub block_end: BlockInfo,
    pub on_fetch: Option<OnFetch>,
}

/// Serve `[block_start, block_end]` from stored computations where a
/// continuous chain exists, recomputing and persisting only what is
/// missing.
///
/// The first returned piece may sit earlier than `block_start`: its
/// validity window is what makes it the correct answer at the range start.
pub async fn compute_range_cached(
    events: &Arc<dyn EventStore>,
    computations: &dyn ComputationStore,
    config: &Arc<ComputeConfig>,
    request: ComputeRangeCachedRequest,
) -> Result<Vec<ComputationResult>, ComputeError> {
    if request.formula.dynamic() {
        return Err(ComputeError::NotApplicable(format!(
            "dynamic formula '{}' cannot be evaluated over a block range",
            request.formula.name()
        )));
    }

    let formula = formula_id(request.formula.formula_type(), request.formula.name());
    let args = canonical_args(&request.args);
    let start = request.block_start.height;
    let end = request.block_end.height;

    // 1. The most recent stored piece at or below the range start anchors
    //    the chain. Without it, compute everything.
    let existing_start = computations
        .computation_at_or_below(&request.target_address, &formula, &args, start)
        .await?;
    let anchor = match existing_start {
        Some(anchor) => anchor,
        None => {
            let results = run_range(events, config, &request, request.block_start).await?;
            persist(computations, &request.target_address, &formula, &args, &results).await?;
            return Ok(results);
        }
    };

    // 2–3. The stored pieces inside the range must chain contiguously:
    //      each piece's validity ends exactly where the next one begins.
    let tail_pieces = computations
        .computations_in_range(&request.target_address, &formula, &args, start, end)
        .await?;
    let mut chain = Vec::with_capacity(tail_pieces.len() + 1);
    chain.push(anchor);
    chain.extend(tail_pieces);

    let continuous = chain
        .windows(2)
        .all(|pair| pair[0].latest_block_height_valid + 1 == pair[1].block.height);
    if !continuous {
        debug!(
            formula = %formula,
            address = %request.target_address,
            "stored chain not continuous; recomputing range"
        );
        let results = run_range(events, config, &request, request.block_start).await?;
        persist(computations, &request.target_address, &formula, &args, &results).await?;
        return Ok(results);
    }

    // 4. Covered through the end, or extendable to it, means no formula
    //    re-runs at all.
    let mut last = chain.pop().expect("chain has at least the anchor");
    if update_validity_up_to(events, computations, &mut last, end).await? {
        chain.push(last);
        return Ok(chain.iter().map(Computation::to_result).collect());
    }

    // A dependency changed past the stored tail: recompute from the tail's
    // block. The first fresh piece re-states the tail — take over its
    // (possibly wider) validity instead of emitting it twice.
    let fresh = run_range(events, config, &request, last.block).await?;
    let mut fresh = fresh.into_iter();
    if let Some(first) = fresh.next() {
        if first.latest_block_height_valid > last.latest_block_height_valid {
            computations
                .set_validity(
                    &request.target_address,
                    &formula,
                    &args,
                    last.block.height,
                    first.latest_block_height_valid,
                )
                .await?;
            last.latest_block_height_valid = first.latest_block_height_valid;
        }
    }
    chain.push(last);

    let fresh: Vec<ComputationResult> = fresh.collect();
    persist(computations, &request.target_address, &formula, &args, &fresh).await?;

    let mut results: Vec<ComputationResult> = chain.iter().map(Computation::to_result).collect();
    results.extend(fresh);
    Ok(results)
}

async fn run_range(
    events: &Arc<dyn EventStore>,
    config: &Arc<ComputeConfig>,
    request: &ComputeRangeCachedRequest,
    from: BlockInfo,
) -> Result<Vec<ComputationResult>, ComputeError> {
    compute_range(
        events,
        config,
        ComputeRangeRequest {
            formula: request.formula.clone(),
            chain_id: request.chain_id.clone(),
            target_address: request.target_address.clone(),
            args: request.args.clone(),
            block_start: from,
            block_end: request.block_end,
            on_fetch: request.on_fetch.clone(),
        },
    )
    .await
}

/// Persist freshly produced pieces. Upserts are idempotent on the
/// `(target, formula, args, height)` natural key, so a retried request
/// converges instead of duplicating rows.
async fn persist(
    computations: &dyn ComputationStore,
    target_address: &str,
    formula: &str,
    args: &str,
    results: &[ComputationResult],
) -> Result<(), ComputeError> {
    for result in results {
        computations
            .upsert_computation(&Computation::from_result(
                target_address,
                formula,
                args,
                result,
            ))
            .await?;
    }
    Ok(())
}
