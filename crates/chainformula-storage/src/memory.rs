//! In-memory storage backend.
//!
//! Stores event rows, reference tables, and computations in RAM. Useful
//! for tests and short-lived embeddings that don't need persistence. The
//! store counts round-trips so callers can assert memoisation behaviour.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;

use chainformula_core::deps::{self, glob_matches};
use chainformula_core::error::ComputeError;
use chainformula_core::store::{ComputationStore, EventStore, FeegrantSide};
use chainformula_core::types::{
    BankBalanceRow, BankStateRow, BlockInfo, CommunityPoolRow, Computation, ContractRow,
    DependentKey, Event, ExtractionRow, FeegrantRow, ProposalRow, SlashRow, StateRow,
    TransformationRow, ValidatorRow, VoteRow, WasmStateRow, WasmTxRow,
};

#[derive(Default)]
struct Inner {
    wasm_state: Vec<WasmStateRow>,
    transformations: Vec<TransformationRow>,
    wasm_txs: Vec<WasmTxRow>,
    bank_state: Vec<BankStateRow>,
    bank_balances: HashMap<String, BankBalanceRow>,
    slashes: Vec<SlashRow>,
    proposals: Vec<ProposalRow>,
    votes: Vec<VoteRow>,
    community_pool: Vec<CommunityPoolRow>,
    extractions: Vec<ExtractionRow>,
    feegrants: Vec<FeegrantRow>,
    contracts: HashMap<String, ContractRow>,
    validators: HashMap<String, ValidatorRow>,
    state: Option<StateRow>,
    /// height → time; the block index is kept consistent with every
    /// inserted event row.
    blocks: BTreeMap<u64, u64>,
    computations: Vec<Computation>,
}

impl Inner {
    fn register_block(&mut self, block: BlockInfo) {
        self.blocks.insert(block.height, block.time_unix_ms);
        if let Some(state) = &mut self.state {
            if block.height > state.latest_block.height {
                state.latest_block = block;
            }
        }
    }

    /// All event rows as the tagged sum, for dependency matching.
    fn all_events(&self) -> Vec<Event> {
        let mut events = Vec::new();
        events.extend(self.wasm_state.iter().cloned().map(Event::WasmState));
        events.extend(
            self.transformations
                .iter()
                .cloned()
                .map(Event::Transformation),
        );
        events.extend(self.wasm_txs.iter().cloned().map(Event::WasmTx));
        events.extend(self.bank_state.iter().cloned().map(Event::BankState));
        events.extend(
            self.bank_balances
                .values()
                .cloned()
                .map(Event::BankBalance),
        );
        events.extend(self.slashes.iter().cloned().map(Event::StakingSlash));
        events.extend(self.proposals.iter().cloned().map(Event::GovProposal));
        events.extend(self.votes.iter().cloned().map(Event::GovVote));
        events.extend(self.community_pool.iter().cloned().map(Event::CommunityPool));
        events.extend(self.extractions.iter().cloned().map(Event::Extraction));
        events.extend(self.feegrants.iter().cloned().map(Event::Feegrant));
        events
    }
}

/// In-memory event + computation store.
///
/// All data is lost when the store is dropped.
#[derive(Default)]
pub struct InMemoryStore {
    inner: Mutex<Inner>,
    reads: AtomicU64,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of read round-trips served so far.
    pub fn read_count(&self) -> u64 {
        self.reads.load(Ordering::Relaxed)
    }

    fn count_read(&self) {
        self.reads.fetch_add(1, Ordering::Relaxed);
    }

    // ── Seeding ──────────────────────────────────────────────────────────────

    pub fn add_wasm_state(&self, row: WasmStateRow) {
        let mut inner = self.inner.lock().unwrap();
        inner.register_block(row.block);
        inner.wasm_state.push(row);
    }

    pub fn add_transformation(&self, row: TransformationRow) {
        let mut inner = self.inner.lock().unwrap();
        inner.register_block(row.block);
        inner.transformations.push(row);
    }

    pub fn add_wasm_tx(&self, row: WasmTxRow) {
        let mut inner = self.inner.lock().unwrap();
        inner.register_block(row.block);
        inner.wasm_txs.push(row);
    }

    pub fn add_bank_state(&self, row: BankStateRow) {
        let mut inner = self.inner.lock().unwrap();
        inner.register_block(row.block);
        inner.bank_state.push(row);
    }

    /// Replace the per-address aggregate snapshot.
    pub fn set_bank_balance(&self, row: BankBalanceRow) {
        let mut inner = self.inner.lock().unwrap();
        inner.register_block(row.block);
        inner.bank_balances.insert(row.address.clone(), row);
    }

    pub fn add_slash(&self, row: SlashRow) {
        let mut inner = self.inner.lock().unwrap();
        inner.register_block(row.registered_block);
        inner.slashes.push(row);
    }

    pub fn add_proposal(&self, row: ProposalRow) {
        let mut inner = self.inner.lock().unwrap();
        inner.register_block(row.block);
        inner.proposals.push(row);
    }

    pub fn add_vote(&self, row: VoteRow) {
        let mut inner = self.inner.lock().unwrap();
        inner.register_block(row.block);
        inner.votes.push(row);
    }

    pub fn add_community_pool(&self, row: CommunityPoolRow) {
        let mut inner = self.inner.lock().unwrap();
        inner.register_block(row.block);
        inner.community_pool.push(row);
    }

    pub fn add_extraction(&self, row: ExtractionRow) {
        let mut inner = self.inner.lock().unwrap();
        inner.register_block(row.block);
        inner.extractions.push(row);
    }

    pub fn add_feegrant(&self, row: FeegrantRow) {
        let mut inner = self.inner.lock().unwrap();
        inner.register_block(row.block);
        inner.feegrants.push(row);
    }

    pub fn set_contract(&self, row: ContractRow) {
        self.inner
            .lock()
            .unwrap()
            .contracts
            .insert(row.address.clone(), row);
    }

    pub fn set_validator(&self, row: ValidatorRow) {
        self.inner
            .lock()
            .unwrap()
            .validators
            .insert(row.operator_address.clone(), row);
    }

    pub fn set_state(&self, state: StateRow) {
        let mut inner = self.inner.lock().unwrap();
        inner.blocks.insert(
            state.latest_block.height,
            state.latest_block.time_unix_ms,
        );
        inner.state = Some(state);
    }

    pub fn add_block(&self, block: BlockInfo) {
        self.inner.lock().unwrap().register_block(block);
    }
}

/// The row of greatest height ≤ `height` among `rows`.
fn latest_at<'a, T>(
    rows: impl Iterator<Item = &'a T>,
    height: u64,
    row_height: impl Fn(&T) -> u64,
) -> Option<&'a T>
where
    T: 'a,
{
    rows.filter(|row| row_height(row) <= height)
        .max_by_key(|row| row_height(row))
}

#[async_trait]
impl EventStore for InMemoryStore {
    async fn wasm_state_latest(
        &self,
        contract: &str,
        key: &str,
        height: u64,
    ) -> Result<Option<WasmStateRow>, ComputeError> {
        self.count_read();
        let inner = self.inner.lock().unwrap();
        Ok(latest_at(
            inner
                .wasm_state
                .iter()
                .filter(|row| row.contract_address == contract && row.key == key),
            height,
            |row| row.block.height,
        )
        .cloned())
    }

    async fn wasm_state_prefix(
        &self,
        contract: &str,
        key_prefix: &str,
        height: u64,
    ) -> Result<Vec<WasmStateRow>, ComputeError> {
        self.count_read();
        let inner = self.inner.lock().unwrap();
        let mut by_key: BTreeMap<&str, &WasmStateRow> = BTreeMap::new();
        for row in inner.wasm_state.iter().filter(|row| {
            row.contract_address == contract
                && row.key.starts_with(key_prefix)
                && row.block.height <= height
        }) {
            match by_key.get(row.key.as_str()) {
                Some(existing) if existing.block.height >= row.block.height => {}
                _ => {
                    by_key.insert(&row.key, row);
                }
            }
        }
        Ok(by_key.into_values().cloned().collect())
    }

    async fn wasm_state_first(
        &self,
        contract: &str,
        key: &str,
    ) -> Result<Option<WasmStateRow>, ComputeError> {
        self.count_read();
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .wasm_state
            .iter()
            .filter(|row| row.contract_address == contract && row.key == key && !row.deleted)
            .min_by_key(|row| row.block.height)
            .cloned())
    }

    async fn wasm_state_ascending(
        &self,
        contract: &str,
        key: &str,
        height: u64,
    ) -> Result<Vec<WasmStateRow>, ComputeError> {
        self.count_read();
        let inner = self.inner.lock().unwrap();
        let mut rows: Vec<WasmStateRow> = inner
            .wasm_state
            .iter()
            .filter(|row| {
                row.contract_address == contract && row.key == key && row.block.height <= height
            })
            .cloned()
            .collect();
        rows.sort_by_key(|row| row.block.height);
        Ok(rows)
    }

    async fn transformation_latest(
        &self,
        contract: &str,
        name: &str,
        height: u64,
    ) -> Result<Option<TransformationRow>, ComputeError> {
        self.count_read();
        let inner = self.inner.lock().unwrap();
        Ok(latest_at(
            inner
                .transformations
                .iter()
                .filter(|row| row.contract_address == contract && row.name == name),
            height,
            |row| row.block.height,
        )
        .cloned())
    }

    async fn transformation_matches(
        &self,
        contract: Option<&str>,
        name_glob: &str,
        height: u64,
        limit: Option<u64>,
    ) -> Result<Vec<TransformationRow>, ComputeError> {
        self.count_read();
        let inner = self.inner.lock().unwrap();
        let mut by_pair: BTreeMap<(&str, &str), &TransformationRow> = BTreeMap::new();
        for row in inner.transformations.iter().filter(|row| {
            contract.is_none_or(|c| row.contract_address == c)
                && glob_matches(name_glob, &row.name)
                && row.block.height <= height
        }) {
            let key = (row.contract_address.as_str(), row.name.as_str());
            match by_pair.get(&key) {
                Some(existing) if existing.block.height >= row.block.height => {}
                _ => {
                    by_pair.insert(key, row);
                }
            }
        }
        let rows = by_pair.into_values().cloned();
        Ok(match limit {
            Some(limit) => rows.take(limit as usize).collect(),
            None => rows.collect(),
        })
    }

    async fn transformation_prefix(
        &self,
        contract: &str,
        name_prefix: &str,
        height: u64,
    ) -> Result<Vec<TransformationRow>, ComputeError> {
        self.count_read();
        let inner = self.inner.lock().unwrap();
        let mut by_name: BTreeMap<&str, &TransformationRow> = BTreeMap::new();
        for row in inner.transformations.iter().filter(|row| {
            row.contract_address == contract
                && row.name.starts_with(name_prefix)
                && row.block.height <= height
        }) {
            match by_name.get(row.name.as_str()) {
                Some(existing) if existing.block.height >= row.block.height => {}
                _ => {
                    by_name.insert(&row.name, row);
                }
            }
        }
        Ok(by_name.into_values().cloned().collect())
    }

    async fn transformation_first(
        &self,
        contract: &str,
        name_glob: &str,
    ) -> Result<Option<TransformationRow>, ComputeError> {
        self.count_read();
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .transformations
            .iter()
            .filter(|row| row.contract_address == contract && glob_matches(name_glob, &row.name))
            .min_by_key(|row| row.block.height)
            .cloned())
    }

    async fn wasm_txs(
        &self,
        contract: &str,
        height: u64,
        limit: Option<u64>,
    ) -> Result<Vec<WasmTxRow>, ComputeError> {
        self.count_read();
        let inner = self.inner.lock().unwrap();
        let mut rows: Vec<WasmTxRow> = inner
            .wasm_txs
            .iter()
            .filter(|row| row.contract_address == contract && row.block.height <= height)
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.block.height.cmp(&a.block.height));
        if let Some(limit) = limit {
            rows.truncate(limit as usize);
        }
        Ok(rows)
    }

    async fn bank_balance(
        &self,
        address: &str,
        height: u64,
    ) -> Result<Option<BankBalanceRow>, ComputeError> {
        self.count_read();
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .bank_balances
            .get(address)
            .filter(|row| row.block.height <= height)
            .cloned())
    }

    async fn bank_state_latest(
        &self,
        address: &str,
        denom: &str,
        height: u64,
    ) -> Result<Option<BankStateRow>, ComputeError> {
        self.count_read();
        let inner = self.inner.lock().unwrap();
        Ok(latest_at(
            inner
                .bank_state
                .iter()
                .filter(|row| row.address == address && row.denom == denom),
            height,
            |row| row.block.height,
        )
        .cloned())
    }

    async fn bank_state_prefix(
        &self,
        address: &str,
        height: u64,
    ) -> Result<Vec<BankStateRow>, ComputeError> {
        self.count_read();
        let inner = self.inner.lock().unwrap();
        let mut by_denom: BTreeMap<&str, &BankStateRow> = BTreeMap::new();
        for row in inner
            .bank_state
            .iter()
            .filter(|row| row.address == address && row.block.height <= height)
        {
            match by_denom.get(row.denom.as_str()) {
                Some(existing) if existing.block.height >= row.block.height => {}
                _ => {
                    by_denom.insert(&row.denom, row);
                }
            }
        }
        Ok(by_denom.into_values().cloned().collect())
    }

    async fn slash_events(
        &self,
        operator: &str,
        height: u64,
    ) -> Result<Vec<SlashRow>, ComputeError> {
        self.count_read();
        let inner = self.inner.lock().unwrap();
        let mut rows: Vec<SlashRow> = inner
            .slashes
            .iter()
            .filter(|row| {
                row.operator_address == operator && row.registered_block.height <= height
            })
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.registered_block.height.cmp(&a.registered_block.height));
        Ok(rows)
    }

    async fn gov_proposal(
        &self,
        proposal_id: u64,
        height: u64,
    ) -> Result<Option<ProposalRow>, ComputeError> {
        self.count_read();
        let inner = self.inner.lock().unwrap();
        Ok(latest_at(
            inner
                .proposals
                .iter()
                .filter(|row| row.proposal_id == proposal_id),
            height,
            |row| row.block.height,
        )
        .cloned())
    }

    async fn gov_proposal_ids(
        &self,
        height: u64,
        ascending: bool,
        limit: Option<u64>,
        offset: u64,
    ) -> Result<Vec<u64>, ComputeError> {
        self.count_read();
        let inner = self.inner.lock().unwrap();
        let mut ids: Vec<u64> = inner
            .proposals
            .iter()
            .filter(|row| row.block.height <= height)
            .map(|row| row.proposal_id)
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        ids.sort_unstable();
        if !ascending {
            ids.reverse();
        }
        let ids = ids.into_iter().skip(offset as usize);
        Ok(match limit {
            Some(limit) => ids.take(limit as usize).collect(),
            None => ids.collect(),
        })
    }

    async fn gov_proposals_by_ids(
        &self,
        ids: &[u64],
        height: u64,
    ) -> Result<Vec<ProposalRow>, ComputeError> {
        self.count_read();
        let inner = self.inner.lock().unwrap();
        let mut rows = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(row) = latest_at(
                inner.proposals.iter().filter(|row| row.proposal_id == *id),
                height,
                |row| row.block.height,
            ) {
                rows.push(row.clone());
            }
        }
        Ok(rows)
    }

    async fn gov_proposal_count(&self, height: u64) -> Result<u64, ComputeError> {
        self.count_read();
        let inner = self.inner.lock().unwrap();
        let ids: HashSet<u64> = inner
            .proposals
            .iter()
            .filter(|row| row.block.height <= height)
            .map(|row| row.proposal_id)
            .collect();
        Ok(ids.len() as u64)
    }

    async fn gov_vote(
        &self,
        proposal_id: u64,
        voter: &str,
        height: u64,
    ) -> Result<Option<VoteRow>, ComputeError> {
        self.count_read();
        let inner = self.inner.lock().unwrap();
        Ok(latest_at(
            inner
                .votes
                .iter()
                .filter(|row| row.proposal_id == proposal_id && row.voter == voter),
            height,
            |row| row.block.height,
        )
        .cloned())
    }

    async fn gov_votes(
        &self,
        proposal_id: u64,
        height: u64,
        ascending: bool,
        limit: Option<u64>,
        offset: u64,
    ) -> Result<Vec<VoteRow>, ComputeError> {
        self.count_read();
        let inner = self.inner.lock().unwrap();
        let mut by_voter: BTreeMap<&str, &VoteRow> = BTreeMap::new();
        for row in inner
            .votes
            .iter()
            .filter(|row| row.proposal_id == proposal_id && row.block.height <= height)
        {
            match by_voter.get(row.voter.as_str()) {
                Some(existing) if existing.block.height >= row.block.height => {}
                _ => {
                    by_voter.insert(&row.voter, row);
                }
            }
        }
        let mut rows: Vec<VoteRow> = by_voter.into_values().cloned().collect();
        // Height order with (voter asc, proposal asc) tie-break.
        rows.sort_by(|a, b| {
            let by_height = if ascending {
                a.block.height.cmp(&b.block.height)
            } else {
                b.block.height.cmp(&a.block.height)
            };
            by_height
                .then_with(|| a.voter.cmp(&b.voter))
                .then_with(|| a.proposal_id.cmp(&b.proposal_id))
        });
        let rows = rows.into_iter().skip(offset as usize);
        Ok(match limit {
            Some(limit) => rows.take(limit as usize).collect(),
            None => rows.collect(),
        })
    }

    async fn gov_vote_count(&self, proposal_id: u64, height: u64) -> Result<u64, ComputeError> {
        self.count_read();
        let inner = self.inner.lock().unwrap();
        let voters: HashSet<&str> = inner
            .votes
            .iter()
            .filter(|row| row.proposal_id == proposal_id && row.block.height <= height)
            .map(|row| row.voter.as_str())
            .collect();
        Ok(voters.len() as u64)
    }

    async fn community_pool(
        &self,
        height: u64,
    ) -> Result<Option<CommunityPoolRow>, ComputeError> {
        self.count_read();
        let inner = self.inner.lock().unwrap();
        Ok(latest_at(inner.community_pool.iter(), height, |row| {
            row.block.height
        })
        .cloned())
    }

    async fn extraction(
        &self,
        address: &str,
        name: &str,
        height: u64,
    ) -> Result<Option<ExtractionRow>, ComputeError> {
        self.count_read();
        let inner = self.inner.lock().unwrap();
        Ok(latest_at(
            inner
                .extractions
                .iter()
                .filter(|row| row.address == address && row.name == name),
            height,
            |row| row.block.height,
        )
        .cloned())
    }

    async fn feegrant_allowance(
        &self,
        granter: &str,
        grantee: &str,
        height: u64,
    ) -> Result<Option<FeegrantRow>, ComputeError> {
        self.count_read();
        let inner = self.inner.lock().unwrap();
        Ok(latest_at(
            inner
                .feegrants
                .iter()
                .filter(|row| row.granter == granter && row.grantee == grantee),
            height,
            |row| row.block.height,
        )
        .cloned())
    }

    async fn feegrant_allowances(
        &self,
        address: &str,
        side: FeegrantSide,
        height: u64,
    ) -> Result<Vec<FeegrantRow>, ComputeError> {
        self.count_read();
        let inner = self.inner.lock().unwrap();
        let mut by_pair: BTreeMap<(&str, &str), &FeegrantRow> = BTreeMap::new();
        for row in inner.feegrants.iter().filter(|row| {
            let on_side = match side {
                FeegrantSide::Granted => row.granter == address,
                FeegrantSide::Received => row.grantee == address,
            };
            on_side && row.block.height <= height
        }) {
            let key = (row.granter.as_str(), row.grantee.as_str());
            match by_pair.get(&key) {
                Some(existing) if existing.block.height >= row.block.height => {}
                _ => {
                    by_pair.insert(key, row);
                }
            }
        }
        Ok(by_pair.into_values().cloned().collect())
    }

    async fn contract(&self, address: &str) -> Result<Option<ContractRow>, ComputeError> {
        self.count_read();
        Ok(self.inner.lock().unwrap().contracts.get(address).cloned())
    }

    async fn validator(&self, operator: &str) -> Result<Option<ValidatorRow>, ComputeError> {
        self.count_read();
        Ok(self.inner.lock().unwrap().validators.get(operator).cloned())
    }

    async fn state(&self) -> Result<Option<StateRow>, ComputeError> {
        self.count_read();
        Ok(self.inner.lock().unwrap().state.clone())
    }

    async fn block_at_or_before(&self, height: u64) -> Result<Option<BlockInfo>, ComputeError> {
        self.count_read();
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .blocks
            .range(..=height)
            .next_back()
            .map(|(h, t)| BlockInfo::new(*h, *t)))
    }

    async fn block_at_or_before_time(
        &self,
        time_unix_ms: u64,
    ) -> Result<Option<BlockInfo>, ComputeError> {
        self.count_read();
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .blocks
            .iter()
            .filter(|(_, t)| **t <= time_unix_ms)
            .next_back()
            .map(|(h, t)| BlockInfo::new(*h, *t)))
    }

    async fn first_block_at_or_after_time(
        &self,
        time_unix_ms: u64,
    ) -> Result<Option<BlockInfo>, ComputeError> {
        self.count_read();
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .blocks
            .iter()
            .find(|(_, t)| **t >= time_unix_ms)
            .map(|(h, t)| BlockInfo::new(*h, *t)))
    }

    async fn has_dependency_change(
        &self,
        deps: &[DependentKey],
        after: u64,
        up_to: u64,
    ) -> Result<bool, ComputeError> {
        self.count_read();
        let inner = self.inner.lock().unwrap();
        Ok(inner.all_events().iter().any(|event| {
            let height = event.block().height;
            height > after
                && height <= up_to
                && deps
                    .iter()
                    .any(|dep| deps::matches(dep, &deps::event_key(event)))
        }))
    }

    async fn next_dependency_change(
        &self,
        deps: &[DependentKey],
        after: u64,
    ) -> Result<Option<BlockInfo>, ComputeError> {
        self.count_read();
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .all_events()
            .iter()
            .filter(|event| {
                event.block().height > after
                    && deps
                        .iter()
                        .any(|dep| deps::matches(dep, &deps::event_key(event)))
            })
            .map(|event| event.block())
            .min_by_key(|block| block.height))
    }

    async fn raw_query(
        &self,
        _sql: &str,
        _binds: &[Value],
    ) -> Result<Vec<Value>, ComputeError> {
        Err(ComputeError::Storage(
            "raw queries are not supported by the in-memory backend".into(),
        ))
    }
}

#[async_trait]
impl ComputationStore for InMemoryStore {
    async fn computation_at_or_below(
        &self,
        target_address: &str,
        formula: &str,
        args: &str,
        height: u64,
    ) -> Result<Option<Computation>, ComputeError> {
        self.count_read();
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .computations
            .iter()
            .filter(|c| {
                c.target_address == target_address
                    && c.formula == formula
                    && c.args == args
                    && c.block.height <= height
            })
            .max_by_key(|c| c.block.height)
            .cloned())
    }

    async fn computations_in_range(
        &self,
        target_address: &str,
        formula: &str,
        args: &str,
        after: u64,
        up_to: u64,
    ) -> Result<Vec<Computation>, ComputeError> {
        self.count_read();
        let inner = self.inner.lock().unwrap();
        let mut rows: Vec<Computation> = inner
            .computations
            .iter()
            .filter(|c| {
                c.target_address == target_address
                    && c.formula == formula
                    && c.args == args
                    && c.block.height > after
                    && c.block.height <= up_to
            })
            .cloned()
            .collect();
        rows.sort_by_key(|c| c.block.height);
        Ok(rows)
    }

    async fn upsert_computation(&self, computation: &Computation) -> Result<(), ComputeError> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(existing) = inner.computations.iter_mut().find(|c| {
            c.target_address == computation.target_address
                && c.formula == computation.formula
                && c.args == computation.args
                && c.block.height == computation.block.height
        }) {
            *existing = computation.clone();
        } else {
            inner.computations.push(computation.clone());
        }
        Ok(())
    }

    async fn set_validity(
        &self,
        target_address: &str,
        formula: &str,
        args: &str,
        height: u64,
        latest_block_height_valid: u64,
    ) -> Result<(), ComputeError> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(existing) = inner.computations.iter_mut().find(|c| {
            c.target_address == target_address
                && c.formula == formula
                && c.args == args
                && c.block.height == height
        }) {
            existing.latest_block_height_valid = latest_block_height_valid;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state_row(key: &str, height: u64, value: &str, deleted: bool) -> WasmStateRow {
        WasmStateRow {
            contract_address: "contractA".into(),
            key: key.into(),
            block: BlockInfo::new(height, height * 100),
            value: value.into(),
            deleted,
        }
    }

    #[tokio::test]
    async fn most_recent_wins_and_tombstones_surface() {
        let store = InMemoryStore::new();
        store.add_wasm_state(state_row("k", 10, "\"1\"", false));
        store.add_wasm_state(state_row("k", 20, "\"2\"", false));
        store.add_wasm_state(state_row("k", 30, "\"3\"", false));

        let at_25 = store.wasm_state_latest("contractA", "k", 25).await.unwrap();
        assert_eq!(at_25.unwrap().value, "\"2\"");

        let at_9 = store.wasm_state_latest("contractA", "k", 9).await.unwrap();
        assert!(at_9.is_none());

        store.add_wasm_state(state_row("k", 25, "", true));
        let at_27 = store.wasm_state_latest("contractA", "k", 27).await.unwrap();
        assert!(at_27.unwrap().deleted);
    }

    #[tokio::test]
    async fn prefix_read_is_distinct_on_key() {
        let store = InMemoryStore::new();
        store.add_wasm_state(state_row("1,2,3", 10, "\"a\"", false));
        store.add_wasm_state(state_row("1,2,3", 20, "\"b\"", false));
        store.add_wasm_state(state_row("1,2,4", 15, "\"c\"", false));
        store.add_wasm_state(state_row("9,9", 15, "\"x\"", false));

        let rows = store.wasm_state_prefix("contractA", "1,2,", 30).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].value, "\"b\"");
        assert_eq!(rows[1].value, "\"c\"");
    }

    #[tokio::test]
    async fn next_change_respects_prefix_deps() {
        let store = InMemoryStore::new();
        store.add_wasm_state(state_row("1,2,3", 10, "\"a\"", false));
        store.add_wasm_state(state_row("1,2,4", 25, "\"b\"", false));
        store.add_wasm_state(state_row("9,9", 18, "\"x\"", false));

        let dep = DependentKey {
            key: "wasm/state:contractA:1,2,".into(),
            prefix: true,
        };
        let next = store
            .next_dependency_change(&[dep.clone()], 10)
            .await
            .unwrap();
        assert_eq!(next.unwrap().height, 25);

        assert!(store.has_dependency_change(&[dep.clone()], 10, 30).await.unwrap());
        assert!(!store.has_dependency_change(&[dep], 10, 20).await.unwrap());
    }

    #[tokio::test]
    async fn vote_distinct_and_tiebreak() {
        let store = InMemoryStore::new();
        let vote = |voter: &str, height: u64| VoteRow {
            proposal_id: 1,
            voter: voter.into(),
            block: BlockInfo::new(height, height * 100),
            data: "{}".into(),
        };
        store.add_vote(vote("carol", 10));
        store.add_vote(vote("alice", 10));
        store.add_vote(vote("alice", 20)); // re-vote shadows the first
        store.add_vote(vote("bob", 15));

        let rows = store.gov_votes(1, 30, true, None, 0).await.unwrap();
        let order: Vec<&str> = rows.iter().map(|r| r.voter.as_str()).collect();
        // carol at 10, bob at 15, alice's latest at 20.
        assert_eq!(order, vec!["carol", "bob", "alice"]);
        assert_eq!(store.gov_vote_count(1, 30).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn computation_upsert_is_idempotent() {
        let store = InMemoryStore::new();
        let computation = Computation {
            target_address: "a".into(),
            formula: "contract/x".into(),
            args: "{}".into(),
            block: BlockInfo::new(10, 1000),
            value: Some(serde_json::json!(1)),
            dependent_events: vec![],
            dependent_transformations: vec![],
            latest_block_height_valid: 19,
        };
        store.upsert_computation(&computation).await.unwrap();
        store.upsert_computation(&computation).await.unwrap();

        let found = store
            .computation_at_or_below("a", "contract/x", "{}", 15)
            .await
            .unwrap();
        assert_eq!(found.unwrap().latest_block_height_valid, 19);
        assert_eq!(
            store
                .computations_in_range("a", "contract/x", "{}", 5, 15)
                .await
                .unwrap()
                .len(),
            1
        );
    }
}
