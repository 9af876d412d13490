//! Bank, staking, governance, extraction, and fee-grant getters.

use std::collections::BTreeMap;

use serde_json::Value;

use super::Environment;
use crate::error::ComputeError;
use crate::store::FeegrantSide;
use crate::types::{
    BankBalanceRow, BankStateRow, DependentKey, Event, ExtractionRow, FeegrantRow, Namespace,
    ProposalRow, SlashRow, VoteRow, WasmTxRow,
};

/// Post-query filter for transaction reads.
#[derive(Debug, Clone, Default)]
pub struct TxEventFilter {
    pub action: Option<String>,
    pub sender: Option<String>,
}

impl TxEventFilter {
    fn matches(&self, row: &WasmTxRow) -> bool {
        self.action.as_deref().is_none_or(|a| a == row.action)
            && self.sender.as_deref().is_none_or(|s| s == row.sender)
    }
}

fn parse_json(raw: &str) -> Option<Value> {
    serde_json::from_str(raw).ok()
}

/// Parse a `denom → amount` JSON object into a sorted map of amount strings.
fn parse_balances(raw: &str) -> Option<BTreeMap<String, String>> {
    let value: Value = serde_json::from_str(raw).ok()?;
    let object = value.as_object()?;
    Some(
        object
            .iter()
            .map(|(denom, amount)| {
                let amount = match amount {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                (denom.clone(), amount)
            })
            .collect(),
    )
}

impl Environment {
    // ── Bank ─────────────────────────────────────────────────────────────────

    /// Whether the balance-history fallback applies to this address: it
    /// must be a contract whose code id is in the configured history set.
    async fn bank_history_tracked(&self, address: &str) -> Result<bool, ComputeError> {
        Ok(self
            .contract_cached(address)
            .await?
            .is_some_and(|contract| self.config().tracks_bank_history(contract.code_id)))
    }

    async fn bank_snapshot(
        &self,
        address: &str,
        dep_key: &str,
        prefix: bool,
    ) -> Result<Option<BankBalanceRow>, ComputeError> {
        let height = self.height();
        let store = self.store().clone();
        let owner = address.to_string();
        let rows = self
            .memoized(dep_key, prefix, || async move {
                Ok(store
                    .bank_balance(&owner, height)
                    .await?
                    .map(Event::BankBalance)
                    .into_iter()
                    .collect())
            })
            .await?;
        match rows {
            None => Ok(None),
            Some(rows) => rows
                .into_iter()
                .map(|event| match event {
                    Event::BankBalance(row) => Ok(row),
                    _ => Err(ComputeError::TypeMismatch {
                        namespace: Namespace::Bank.as_str(),
                        expected: "BankBalance",
                    }),
                })
                .next()
                .transpose(),
        }
    }

    /// The balance of one denom for an address. Prefers the per-address
    /// aggregate snapshot; falls back to per-denom history only for
    /// contracts in the configured history set.
    pub async fn get_balance(
        &self,
        address: &str,
        denom: &str,
    ) -> Result<Option<String>, ComputeError> {
        let dep = DependentKey::exact(Namespace::Bank, &[address, denom]);
        let dep_key = dep.key.clone();
        self.record(dep);

        if let Some(snapshot) = self.bank_snapshot(address, &dep_key, false).await? {
            return Ok(parse_balances(&snapshot.balances)
                .and_then(|balances| balances.get(denom).cloned()));
        }
        if !self.bank_history_tracked(address).await? {
            return Ok(None);
        }
        let row = self
            .store()
            .bank_state_latest(address, denom, self.height())
            .await?;
        if row.is_some() {
            self.notify_fetch(1);
        }
        Ok(row.map(|row| row.balance))
    }

    /// All denom balances for an address, with the same snapshot-first,
    /// history-fallback rule as [`Environment::get_balance`].
    pub async fn get_balances(
        &self,
        address: &str,
    ) -> Result<Option<BTreeMap<String, String>>, ComputeError> {
        let dep = DependentKey::prefix(Namespace::Bank, &[address, ""]);
        let dep_key = dep.key.clone();
        self.record(dep);

        if let Some(snapshot) = self.bank_snapshot(address, &dep_key, true).await? {
            return Ok(parse_balances(&snapshot.balances));
        }
        if !self.bank_history_tracked(address).await? {
            return Ok(None);
        }
        let rows: Vec<BankStateRow> = self.store().bank_state_prefix(address, self.height()).await?;
        self.notify_fetch(rows.len());
        if rows.is_empty() {
            return Ok(None);
        }
        Ok(Some(
            rows.into_iter()
                .map(|row| (row.denom, row.balance))
                .collect(),
        ))
    }

    // ── Staking ──────────────────────────────────────────────────────────────

    /// Slash events registered against a validator, most recent first.
    pub async fn get_slash_events(
        &self,
        operator: &str,
    ) -> Result<Vec<SlashRow>, ComputeError> {
        let dep = DependentKey::prefix(Namespace::StakingSlash, &[operator, ""]);
        let dep_key = dep.key.clone();
        self.record(dep);

        let height = self.height();
        let store = self.store().clone();
        let owner = operator.to_string();
        let rows = self
            .memoized(&dep_key, true, || async move {
                Ok(store
                    .slash_events(&owner, height)
                    .await?
                    .into_iter()
                    .map(Event::StakingSlash)
                    .collect())
            })
            .await?;
        match rows {
            None => Ok(Vec::new()),
            Some(rows) => rows
                .into_iter()
                .map(|event| match event {
                    Event::StakingSlash(row) => Ok(row),
                    _ => Err(ComputeError::TypeMismatch {
                        namespace: Namespace::StakingSlash.as_str(),
                        expected: "StakingSlash",
                    }),
                })
                .collect(),
        }
    }

    // ── Wasm transactions ────────────────────────────────────────────────────

    /// Executed transactions against a contract, most recent first. Always
    /// records a prefix dependency: any new transaction for the address
    /// invalidates the computation.
    pub async fn get_tx_events(
        &self,
        address: &str,
        filter: Option<&TxEventFilter>,
        limit: Option<u64>,
    ) -> Result<Vec<WasmTxRow>, ComputeError> {
        let dep = DependentKey::prefix(Namespace::WasmTx, &[address, ""]);
        let dep_key = dep.key.clone();
        self.record(dep);

        let height = self.height();
        let store = self.store().clone();
        let owner = address.to_string();
        let rows = self
            .memoized(&dep_key, true, || async move {
                Ok(store
                    .wasm_txs(&owner, height, None)
                    .await?
                    .into_iter()
                    .map(Event::WasmTx)
                    .collect())
            })
            .await?;
        let rows: Vec<WasmTxRow> = match rows {
            None => Vec::new(),
            Some(rows) => rows
                .into_iter()
                .map(|event| match event {
                    Event::WasmTx(row) => Ok(row),
                    _ => Err(ComputeError::TypeMismatch {
                        namespace: Namespace::WasmTx.as_str(),
                        expected: "WasmTx",
                    }),
                })
                .collect::<Result<_, _>>()?,
        };
        let filtered = rows
            .into_iter()
            .filter(|row| filter.is_none_or(|f| f.matches(row)));
        Ok(match limit {
            Some(limit) => filtered.take(limit as usize).collect(),
            None => filtered.collect(),
        })
    }

    // ── Governance ───────────────────────────────────────────────────────────

    /// The proposal version visible at the target height.
    pub async fn get_proposal(
        &self,
        proposal_id: u64,
    ) -> Result<Option<ProposalRow>, ComputeError> {
        let id = proposal_id.to_string();
        let dep = DependentKey::exact(Namespace::GovProposal, &[&id]);
        let dep_key = dep.key.clone();
        self.record(dep);

        let height = self.height();
        let store = self.store().clone();
        let rows = self
            .memoized(&dep_key, false, || async move {
                Ok(store
                    .gov_proposal(proposal_id, height)
                    .await?
                    .map(Event::GovProposal)
                    .into_iter()
                    .collect())
            })
            .await?;
        match rows {
            None => Ok(None),
            Some(rows) => rows
                .into_iter()
                .map(|event| match event {
                    Event::GovProposal(row) => Ok(row),
                    _ => Err(ComputeError::TypeMismatch {
                        namespace: Namespace::GovProposal.as_str(),
                        expected: "GovProposal",
                    }),
                })
                .next()
                .transpose(),
        }
    }

    /// A page of proposals, each at its version visible at the target
    /// height. The id page is projected first, then full rows are
    /// re-fetched, to bound memory.
    pub async fn get_proposals(
        &self,
        ascending: bool,
        limit: Option<u64>,
        offset: u64,
    ) -> Result<Vec<ProposalRow>, ComputeError> {
        self.record(DependentKey::prefix(Namespace::GovProposal, &[]));
        let height = self.height();
        let ids = self
            .store()
            .gov_proposal_ids(height, ascending, limit, offset)
            .await?;
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let rows = self.store().gov_proposals_by_ids(&ids, height).await?;
        self.notify_fetch(rows.len());
        Ok(rows)
    }

    /// Number of distinct proposals visible at the target height.
    pub async fn get_proposal_count(&self) -> Result<u64, ComputeError> {
        self.record(DependentKey::prefix(Namespace::GovProposal, &[]));
        self.store().gov_proposal_count(self.height()).await
    }

    /// The vote version for `(proposal, voter)` at the target height.
    pub async fn get_proposal_vote(
        &self,
        proposal_id: u64,
        voter: &str,
    ) -> Result<Option<VoteRow>, ComputeError> {
        let id = proposal_id.to_string();
        let dep = DependentKey::exact(Namespace::GovVote, &[&id, voter]);
        let dep_key = dep.key.clone();
        self.record(dep);

        let height = self.height();
        let store = self.store().clone();
        let voter_owned = voter.to_string();
        let rows = self
            .memoized(&dep_key, false, || async move {
                Ok(store
                    .gov_vote(proposal_id, &voter_owned, height)
                    .await?
                    .map(Event::GovVote)
                    .into_iter()
                    .collect())
            })
            .await?;
        match rows {
            None => Ok(None),
            Some(rows) => rows
                .into_iter()
                .map(|event| match event {
                    Event::GovVote(row) => Ok(row),
                    _ => Err(ComputeError::TypeMismatch {
                        namespace: Namespace::GovVote.as_str(),
                        expected: "GovVote",
                    }),
                })
                .next()
                .transpose(),
        }
    }

    /// A page of distinct `(voter, proposal)` votes on a proposal.
    pub async fn get_proposal_votes(
        &self,
        proposal_id: u64,
        ascending: bool,
        limit: Option<u64>,
        offset: u64,
    ) -> Result<Vec<VoteRow>, ComputeError> {
        let id = proposal_id.to_string();
        self.record(DependentKey::prefix(Namespace::GovVote, &[&id, ""]));
        let rows = self
            .store()
            .gov_votes(proposal_id, self.height(), ascending, limit, offset)
            .await?;
        self.notify_fetch(rows.len());
        Ok(rows)
    }

    /// Number of distinct voters on a proposal at the target height.
    pub async fn get_proposal_vote_count(
        &self,
        proposal_id: u64,
    ) -> Result<u64, ComputeError> {
        let id = proposal_id.to_string();
        self.record(DependentKey::prefix(Namespace::GovVote, &[&id, ""]));
        self.store().gov_vote_count(proposal_id, self.height()).await
    }

    // ── Distribution / extraction / feegrant ─────────────────────────────────

    /// The community-pool balances visible at the target height.
    pub async fn get_community_pool_balances(
        &self,
    ) -> Result<Option<BTreeMap<String, String>>, ComputeError> {
        let dep = DependentKey::prefix(Namespace::CommunityPool, &[]);
        let dep_key = dep.key.clone();
        self.record(dep);

        let height = self.height();
        let store = self.store().clone();
        let rows = self
            .memoized(&dep_key, true, || async move {
                Ok(store
                    .community_pool(height)
                    .await?
                    .map(Event::CommunityPool)
                    .into_iter()
                    .collect())
            })
            .await?;
        match rows {
            None => Ok(None),
            Some(rows) => match rows.into_iter().next() {
                Some(Event::CommunityPool(row)) => Ok(parse_balances(&row.balances)),
                Some(_) => Err(ComputeError::TypeMismatch {
                    namespace: Namespace::CommunityPool.as_str(),
                    expected: "CommunityPool",
                }),
                None => Ok(None),
            },
        }
    }

    /// The extraction datum for `(address, name)` at the target height.
    pub async fn get_extraction(
        &self,
        address: &str,
        name: &str,
    ) -> Result<Option<ExtractionRow>, ComputeError> {
        let dep = DependentKey::exact(Namespace::Extraction, &[address, name]);
        let dep_key = dep.key.clone();
        self.record(dep);

        let height = self.height();
        let store = self.store().clone();
        let (owner, extraction_name) = (address.to_string(), name.to_string());
        let rows = self
            .memoized(&dep_key, false, || async move {
                Ok(store
                    .extraction(&owner, &extraction_name, height)
                    .await?
                    .map(Event::Extraction)
                    .into_iter()
                    .collect())
            })
            .await?;
        match rows {
            None => Ok(None),
            Some(rows) => rows
                .into_iter()
                .map(|event| match event {
                    Event::Extraction(row) => Ok(row),
                    _ => Err(ComputeError::TypeMismatch {
                        namespace: Namespace::Extraction.as_str(),
                        expected: "Extraction",
                    }),
                })
                .next()
                .transpose(),
        }
    }

    /// The allowance version for `(granter, grantee)` at the target height.
    pub async fn get_feegrant_allowance(
        &self,
        granter: &str,
        grantee: &str,
    ) -> Result<Option<FeegrantRow>, ComputeError> {
        let dep = DependentKey::exact(Namespace::Feegrant, &[granter, grantee]);
        let dep_key = dep.key.clone();
        self.record(dep);

        let height = self.height();
        let store = self.store().clone();
        let (from, to) = (granter.to_string(), grantee.to_string());
        let rows = self
            .memoized(&dep_key, false, || async move {
                Ok(store
                    .feegrant_allowance(&from, &to, height)
                    .await?
                    .map(Event::Feegrant)
                    .into_iter()
                    .collect())
            })
            .await?;
        match rows {
            None => Ok(None),
            Some(rows) => rows
                .into_iter()
                .map(|event| match event {
                    Event::Feegrant(row) => Ok(row),
                    _ => Err(ComputeError::TypeMismatch {
                        namespace: Namespace::Feegrant.as_str(),
                        expected: "Feegrant",
                    }),
                })
                .next()
                .transpose(),
        }
    }

    /// All allowances where `address` is on the given side. The dependent
    /// key uses `*` as the "either side" sentinel — an opaque token in
    /// this namespace, not a glob.
    pub async fn get_feegrant_allowances(
        &self,
        address: &str,
        side: FeegrantSide,
    ) -> Result<Vec<FeegrantRow>, ComputeError> {
        let dep = match side {
            FeegrantSide::Granted => DependentKey::exact(Namespace::Feegrant, &[address, "*"]),
            FeegrantSide::Received => DependentKey::exact(Namespace::Feegrant, &["*", address]),
        };
        let dep_key = dep.key.clone();
        self.record(dep);

        let height = self.height();
        let store = self.store().clone();
        let owner = address.to_string();
        let rows = self
            .memoized(&dep_key, false, || async move {
                Ok(store
                    .feegrant_allowances(&owner, side, height)
                    .await?
                    .into_iter()
                    .map(Event::Feegrant)
                    .collect())
            })
            .await?;
        match rows {
            None => Ok(Vec::new()),
            Some(rows) => rows
                .into_iter()
                .map(|event| match event {
                    Event::Feegrant(row) => Ok(row),
                    _ => Err(ComputeError::TypeMismatch {
                        namespace: Namespace::Feegrant.as_str(),
                        expected: "Feegrant",
                    }),
                })
                .collect(),
        }
    }

    /// Whether an active allowance exists from `granter` to `grantee`.
    pub async fn has_feegrant_allowance(
        &self,
        granter: &str,
        grantee: &str,
    ) -> Result<bool, ComputeError> {
        Ok(self
            .get_feegrant_allowance(granter, grantee)
            .await?
            .is_some_and(|row| row.active))
    }
}
