//! Query surface: validate a compute request, resolve blocks/times, run
//! the right evaluator, and shape the response.
//!
//! This is the whole compute endpoint minus transport: HTTP framing,
//! authentication, and credit accounting live above this layer.

use std::sync::Arc;

use serde_json::Value;

use crate::assemble::{assemble_range, RangeSample, SampleGrid};
use crate::cache::{compute_cached, compute_range_cached, ComputeRangeCachedRequest};
use crate::compute::{compute, ComputeRequest};
use crate::config::ComputeConfig;
use crate::env::OnFetch;
use crate::error::ComputeError;
use crate::registry::{FormulaRegistry, FormulaType};
use crate::store::{ComputationStore, EventStore};
use crate::types::BlockInfo;

/// Where a query is evaluated: one block, one time, or a range of either.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryTarget {
    /// A single block height.
    Block(u64),
    /// An inclusive block-height range `[start, end]`.
    Blocks(u64, u64),
    /// A single wall-clock time (milliseconds since epoch).
    Time(u64),
    /// An inclusive time range `[start, end]` in milliseconds.
    Times(u64, u64),
}

/// A complete compute query.
pub struct ComputeQuery {
    pub formula_type: FormulaType,
    pub formula_name: String,
    pub address: String,
    pub args: serde_json::Map<String, Value>,
    pub target: QueryTarget,
    /// Sample every N blocks (block ranges only).
    pub block_step: Option<u64>,
    /// Sample every N milliseconds (time ranges only).
    pub time_step: Option<u64>,
    pub on_fetch: Option<OnFetch>,
}

/// The response: a single value, or an ordered sampled series.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryResponse {
    Value {
        block: BlockInfo,
        value: Option<Value>,
    },
    Series(Vec<RangeSample>),
}

/// Execute a query end to end.
pub async fn execute_query(
    events: &Arc<dyn EventStore>,
    computations: &dyn ComputationStore,
    config: &Arc<ComputeConfig>,
    registry: &FormulaRegistry,
    chain_id: &str,
    query: ComputeQuery,
) -> Result<QueryResponse, ComputeError> {
    let formula = registry.get(query.formula_type, &query.formula_name)?;
    validate_steps(&query)?;

    match query.target {
        QueryTarget::Block(height) => {
            let block = resolve_block(events, height).await?;
            single(events, computations, config, formula, chain_id, query, block).await
        }
        QueryTarget::Time(time_ms) => {
            let block = events.block_at_or_before_time(time_ms).await?.ok_or_else(|| {
                ComputeError::BadInput(format!("no block at or before time {time_ms}"))
            })?;
            single(events, computations, config, formula, chain_id, query, block).await
        }
        QueryTarget::Blocks(start, end) => {
            if start >= end {
                return Err(ComputeError::BadInput(format!(
                    "block range start {start} must be before end {end}"
                )));
            }
            let block_start = resolve_block(events, start).await?;
            let block_end = resolve_block(events, end).await?;
            let grid = match query.block_step {
                Some(step) => SampleGrid::BlockStep { start, end, step },
                None => SampleGrid::Raw,
            };
            series(
                events,
                computations,
                config,
                formula,
                chain_id,
                query,
                block_start,
                block_end,
                grid,
            )
            .await
        }
        QueryTarget::Times(start_ms, end_ms) => {
            if start_ms >= end_ms {
                return Err(ComputeError::BadInput(format!(
                    "time range start {start_ms} must be before end {end_ms}"
                )));
            }
            // A range may start before the first indexed block; clamp the
            // grid to where data begins.
            let block_start = match events.block_at_or_before_time(start_ms).await? {
                Some(block) => block,
                None => events
                    .first_block_at_or_after_time(start_ms)
                    .await?
                    .filter(|block| block.time_unix_ms <= end_ms)
                    .ok_or_else(|| {
                        ComputeError::BadInput(format!(
                            "no block inside time range {start_ms}..{end_ms}"
                        ))
                    })?,
            };
            let block_end = events.block_at_or_before_time(end_ms).await?.ok_or_else(|| {
                ComputeError::BadInput(format!("no block at or before time {end_ms}"))
            })?;
            let grid = match query.time_step {
                Some(step_ms) => SampleGrid::TimeStep {
                    start_ms: start_ms.max(block_start.time_unix_ms),
                    end_ms,
                    step_ms,
                },
                None => SampleGrid::Raw,
            };
            series(
                events,
                computations,
                config,
                formula,
                chain_id,
                query,
                block_start,
                block_end,
                grid,
            )
            .await
        }
    }
}

fn validate_steps(query: &ComputeQuery) -> Result<(), ComputeError> {
    if query.block_step == Some(0) || query.time_step == Some(0) {
        return Err(ComputeError::BadInput("step must be positive".into()));
    }
    match query.target {
        QueryTarget::Block(_) | QueryTarget::Time(_) => {
            if query.block_step.is_some() || query.time_step.is_some() {
                return Err(ComputeError::BadInput(
                    "steps only apply to range queries".into(),
                ));
            }
        }
        QueryTarget::Blocks(..) => {
            if query.time_step.is_some() {
                return Err(ComputeError::BadInput(
                    "time step does not apply to a block range".into(),
                ));
            }
        }
        QueryTarget::Times(..) => {
            if query.block_step.is_some() {
                return Err(ComputeError::BadInput(
                    "block step does not apply to a time range".into(),
                ));
            }
        }
    }
    Ok(())
}

async fn resolve_block(
    events: &Arc<dyn EventStore>,
    height: u64,
) -> Result<BlockInfo, ComputeError> {
    events
        .block_at_or_before(height)
        .await?
        .ok_or_else(|| ComputeError::BadInput(format!("no block at or before height {height}")))
}

async fn single(
    events: &Arc<dyn EventStore>,
    computations: &dyn ComputationStore,
    config: &Arc<ComputeConfig>,
    formula: Arc<dyn crate::registry::Formula>,
    chain_id: &str,
    query: ComputeQuery,
    block: BlockInfo,
) -> Result<QueryResponse, ComputeError> {
    let request = ComputeRequest {
        formula: formula.clone(),
        chain_id: chain_id.to_string(),
        target_address: query.address,
        args: query.args,
        block,
        use_block_date: true,
        on_fetch: query.on_fetch,
    };
    let result = if formula.dynamic() {
        compute(events, config, request).await?
    } else {
        compute_cached(events, computations, config, request).await?
    };
    Ok(QueryResponse::Value {
        block: result.block,
        value: result.value,
    })
}

#[allow(clippy::too_many_arguments)]
async fn series(
    events: &Arc<dyn EventStore>,
    computations: &dyn ComputationStore,
    config: &Arc<ComputeConfig>,
    formula: Arc<dyn crate::registry::Formula>,
    chain_id: &str,
    query: ComputeQuery,
    block_start: BlockInfo,
    block_end: BlockInfo,
    grid: SampleGrid,
) -> Result<QueryResponse, ComputeError> {
    let pieces = compute_range_cached(
        events,
        computations,
        config,
        ComputeRangeCachedRequest {
            formula,
            chain_id: chain_id.to_string(),
            target_address: query.address,
            args: query.args,
            block_start,
            block_end,
            on_fetch: query.on_fetch,
        },
    )
    .await?;
    Ok(QueryResponse::Series(assemble_range(&pieces, grid)?))
}
