//! Storage trait seams: the event-store adapter and the computation cache.
//!
//! Backends implement both traits over the same database. Every historical
//! read applies the `block_height <= target` filter and returns the row
//! with the greatest height (point reads) or a distinct-on projection with
//! the greatest height per key (map and prefix reads). Values are JSON
//! byte-strings handed back verbatim — interpretation is the Environment's
//! job. Backends fail only on transport errors, surfaced unchanged as
//! [`ComputeError::Storage`].

use async_trait::async_trait;
use serde_json::Value;

use crate::error::ComputeError;
use crate::types::{
    BankBalanceRow, BankStateRow, BlockInfo, CommunityPoolRow, Computation, ContractRow,
    DependentKey, ExtractionRow, FeegrantRow, ProposalRow, SlashRow, StateRow, TransformationRow,
    ValidatorRow, VoteRow, WasmStateRow, WasmTxRow,
};

/// Which side of a fee grant an address is on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeegrantSide {
    Granted,
    Received,
}

/// History-aware reads over the versioned event tables.
#[async_trait]
pub trait EventStore: Send + Sync {
    // ── Wasm state ───────────────────────────────────────────────────────────

    /// The row for `(contract, key)` with the greatest height ≤ `height`.
    /// Tombstones are returned, not filtered.
    async fn wasm_state_latest(
        &self,
        contract: &str,
        key: &str,
        height: u64,
    ) -> Result<Option<WasmStateRow>, ComputeError>;

    /// Distinct-on-key projection: for every key starting with `key_prefix`
    /// (byte-level, segment-boundary safe), the row with the greatest
    /// height ≤ `height`. Tombstones included.
    async fn wasm_state_prefix(
        &self,
        contract: &str,
        key_prefix: &str,
        height: u64,
    ) -> Result<Vec<WasmStateRow>, ComputeError>;

    /// The first (lowest-height) non-deleted row for `(contract, key)`.
    /// Ascending order — bypasses the evaluator memo by design.
    async fn wasm_state_first(
        &self,
        contract: &str,
        key: &str,
    ) -> Result<Option<WasmStateRow>, ComputeError>;

    /// All rows for `(contract, key)` with height ≤ `height`, ascending.
    async fn wasm_state_ascending(
        &self,
        contract: &str,
        key: &str,
        height: u64,
    ) -> Result<Vec<WasmStateRow>, ComputeError>;

    // ── Transformations ──────────────────────────────────────────────────────

    /// The transformation for `(contract, name)` with the greatest
    /// height ≤ `height`. Exact name, no glob.
    async fn transformation_latest(
        &self,
        contract: &str,
        name: &str,
        height: u64,
    ) -> Result<Option<TransformationRow>, ComputeError>;

    /// Distinct-on `(contract, name)`: the most recent transformation per
    /// pair whose name matches `name_glob` (`*` matches any run), optionally
    /// restricted to one contract.
    async fn transformation_matches(
        &self,
        contract: Option<&str>,
        name_glob: &str,
        height: u64,
        limit: Option<u64>,
    ) -> Result<Vec<TransformationRow>, ComputeError>;

    /// Distinct-on name: the most recent transformation per name starting
    /// with `name_prefix` for one contract.
    async fn transformation_prefix(
        &self,
        contract: &str,
        name_prefix: &str,
        height: u64,
    ) -> Result<Vec<TransformationRow>, ComputeError>;

    /// The first (lowest-height) transformation whose name matches
    /// `name_glob`. Ascending order — bypasses the evaluator memo.
    async fn transformation_first(
        &self,
        contract: &str,
        name_glob: &str,
    ) -> Result<Option<TransformationRow>, ComputeError>;

    // ── Wasm transactions ────────────────────────────────────────────────────

    /// Executed transactions against a contract at height ≤ `height`,
    /// descending by height.
    async fn wasm_txs(
        &self,
        contract: &str,
        height: u64,
        limit: Option<u64>,
    ) -> Result<Vec<WasmTxRow>, ComputeError>;

    // ── Bank ─────────────────────────────────────────────────────────────────

    /// The per-address aggregate snapshot, usable iff its height ≤ `height`.
    async fn bank_balance(
        &self,
        address: &str,
        height: u64,
    ) -> Result<Option<BankBalanceRow>, ComputeError>;

    /// The per-denom history row with the greatest height ≤ `height`.
    async fn bank_state_latest(
        &self,
        address: &str,
        denom: &str,
        height: u64,
    ) -> Result<Option<BankStateRow>, ComputeError>;

    /// Distinct-on-denom history projection at `height`.
    async fn bank_state_prefix(
        &self,
        address: &str,
        height: u64,
    ) -> Result<Vec<BankStateRow>, ComputeError>;

    // ── Staking ──────────────────────────────────────────────────────────────

    /// Slash events registered at height ≤ `height`, descending by
    /// registered height.
    async fn slash_events(
        &self,
        operator: &str,
        height: u64,
    ) -> Result<Vec<SlashRow>, ComputeError>;

    // ── Governance ───────────────────────────────────────────────────────────

    /// The proposal version with the greatest height ≤ `height`.
    async fn gov_proposal(
        &self,
        proposal_id: u64,
        height: u64,
    ) -> Result<Option<ProposalRow>, ComputeError>;

    /// Page projection: the distinct proposal ids visible at `height`,
    /// ordered by id, paginated. The caller re-fetches full rows for the
    /// selected page to bound memory.
    async fn gov_proposal_ids(
        &self,
        height: u64,
        ascending: bool,
        limit: Option<u64>,
        offset: u64,
    ) -> Result<Vec<u64>, ComputeError>;

    /// Full rows for a previously selected id page, each at its greatest
    /// height ≤ `height`.
    async fn gov_proposals_by_ids(
        &self,
        ids: &[u64],
        height: u64,
    ) -> Result<Vec<ProposalRow>, ComputeError>;

    /// Number of distinct proposals visible at `height`.
    async fn gov_proposal_count(&self, height: u64) -> Result<u64, ComputeError>;

    /// The vote version for `(proposal, voter)` with the greatest
    /// height ≤ `height`.
    async fn gov_vote(
        &self,
        proposal_id: u64,
        voter: &str,
        height: u64,
    ) -> Result<Option<VoteRow>, ComputeError>;

    /// Distinct-on `(voter, proposal)` votes for a proposal at `height`,
    /// ordered by height, ties broken by `(voter asc, proposal asc)`.
    async fn gov_votes(
        &self,
        proposal_id: u64,
        height: u64,
        ascending: bool,
        limit: Option<u64>,
        offset: u64,
    ) -> Result<Vec<VoteRow>, ComputeError>;

    /// Number of distinct voters on a proposal at `height`.
    async fn gov_vote_count(&self, proposal_id: u64, height: u64) -> Result<u64, ComputeError>;

    // ── Distribution / extraction / feegrant ─────────────────────────────────

    /// The community-pool snapshot with the greatest height ≤ `height`.
    async fn community_pool(&self, height: u64)
        -> Result<Option<CommunityPoolRow>, ComputeError>;

    /// The extraction for `(address, name)` with the greatest height ≤ `height`.
    async fn extraction(
        &self,
        address: &str,
        name: &str,
        height: u64,
    ) -> Result<Option<ExtractionRow>, ComputeError>;

    /// The allowance version for `(granter, grantee)` with the greatest
    /// height ≤ `height`.
    async fn feegrant_allowance(
        &self,
        granter: &str,
        grantee: &str,
        height: u64,
    ) -> Result<Option<FeegrantRow>, ComputeError>;

    /// Distinct-on `(granter, grantee)` allowances where `address` is on
    /// the given side, each at its greatest height ≤ `height`.
    async fn feegrant_allowances(
        &self,
        address: &str,
        side: FeegrantSide,
        height: u64,
    ) -> Result<Vec<FeegrantRow>, ComputeError>;

    // ── Reference tables ─────────────────────────────────────────────────────

    async fn contract(&self, address: &str) -> Result<Option<ContractRow>, ComputeError>;

    async fn validator(&self, operator: &str) -> Result<Option<ValidatorRow>, ComputeError>;

    /// The singleton indexer state row.
    async fn state(&self) -> Result<Option<StateRow>, ComputeError>;

    /// The block with the greatest height ≤ `height`.
    async fn block_at_or_before(&self, height: u64) -> Result<Option<BlockInfo>, ComputeError>;

    /// The block with the greatest time ≤ `time_unix_ms`.
    async fn block_at_or_before_time(
        &self,
        time_unix_ms: u64,
    ) -> Result<Option<BlockInfo>, ComputeError>;

    /// The first block with time ≥ `time_unix_ms`.
    async fn first_block_at_or_after_time(
        &self,
        time_unix_ms: u64,
    ) -> Result<Option<BlockInfo>, ComputeError>;

    // ── Invalidation primitives ──────────────────────────────────────────────

    /// Whether any row matching any dependency exists with
    /// `after < height ≤ up_to`.
    async fn has_dependency_change(
        &self,
        deps: &[DependentKey],
        after: u64,
        up_to: u64,
    ) -> Result<bool, ComputeError>;

    /// The earliest block strictly above `after` at which any dependency
    /// changes, with its time.
    async fn next_dependency_change(
        &self,
        deps: &[DependentKey],
        after: u64,
    ) -> Result<Option<BlockInfo>, ComputeError>;

    // ── Escape hatch ─────────────────────────────────────────────────────────

    /// Read-only raw query with bound parameters. No dependency tracking;
    /// callers are responsible for their own height filters. Backends
    /// without a SQL surface report this as a transport error.
    async fn raw_query(
        &self,
        sql: &str,
        binds: &[Value],
    ) -> Result<Vec<Value>, ComputeError>;
}

/// Persistence for computed results and their validity intervals.
#[async_trait]
pub trait ComputationStore: Send + Sync {
    /// The most recent stored computation at height ≤ `height` for the
    /// `(target, formula, args)` triple.
    async fn computation_at_or_below(
        &self,
        target_address: &str,
        formula: &str,
        args: &str,
        height: u64,
    ) -> Result<Option<Computation>, ComputeError>;

    /// All stored computations with `after < block.height ≤ up_to`,
    /// ascending by height.
    async fn computations_in_range(
        &self,
        target_address: &str,
        formula: &str,
        args: &str,
        after: u64,
        up_to: u64,
    ) -> Result<Vec<Computation>, ComputeError>;

    /// Idempotent upsert on the `(target, formula, args, block.height)`
    /// natural key.
    async fn upsert_computation(&self, computation: &Computation) -> Result<(), ComputeError>;

    /// Persist an advanced `latest_block_height_valid` for a stored record.
    async fn set_validity(
        &self,
        target_address: &str,
        formula: &str,
        args: &str,
        height: u64,
        latest_block_height_valid: u64,
    ) -> Result<(), ComputeError>;
}
