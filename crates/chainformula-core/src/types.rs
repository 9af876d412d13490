//! Shared types: blocks, event families, dependent keys, computations.

use serde::{Deserialize, Serialize};
use serde_json::Value;

// ─── BlockInfo ───────────────────────────────────────────────────────────────

/// A block position — monotonically increasing height plus its wall-clock time.
/// The pair is always consistent: two `BlockInfo`s with the same height carry
/// the same time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockInfo {
    /// Block height.
    pub height: u64,
    /// Block time (milliseconds since Unix epoch).
    pub time_unix_ms: u64,
}

impl BlockInfo {
    pub fn new(height: u64, time_unix_ms: u64) -> Self {
        Self {
            height,
            time_unix_ms,
        }
    }
}

// ─── Namespace ───────────────────────────────────────────────────────────────

/// Dependency namespaces. Every stored event row matches exactly one, and
/// every dependent key starts with one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Namespace {
    WasmState,
    WasmTransformation,
    WasmTx,
    /// Covers both the per-address balance snapshot and the per-denom
    /// balance history — a dependency on one must invalidate on the other.
    Bank,
    StakingSlash,
    GovProposal,
    GovVote,
    CommunityPool,
    Extraction,
    Feegrant,
}

impl Namespace {
    /// Canonical wire string, used as the leading segment of dependent keys.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::WasmState => "wasm/state",
            Self::WasmTransformation => "wasm/transformation",
            Self::WasmTx => "wasm/tx",
            Self::Bank => "bank/balance",
            Self::StakingSlash => "staking/slash",
            Self::GovProposal => "gov/proposal",
            Self::GovVote => "gov/vote",
            Self::CommunityPool => "distribution/communityPool",
            Self::Extraction => "extraction",
            Self::Feegrant => "feegrant/allowance",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        Some(match s {
            "wasm/state" => Self::WasmState,
            "wasm/transformation" => Self::WasmTransformation,
            "wasm/tx" => Self::WasmTx,
            "bank/balance" => Self::Bank,
            "staking/slash" => Self::StakingSlash,
            "gov/proposal" => Self::GovProposal,
            "gov/vote" => Self::GovVote,
            "distribution/communityPool" => Self::CommunityPool,
            "extraction" => Self::Extraction,
            "feegrant/allowance" => Self::Feegrant,
            _ => return None,
        })
    }
}

// ─── DependentKey ────────────────────────────────────────────────────────────

/// Canonical dependent key: `namespace:subject[:suffix]`.
///
/// `prefix = false` is an exact match; `prefix = true` matches any key that
/// begins with `key`. Two namespaces carry extra matching rules (see
/// [`crate::deps::matches`]): `*` is a glob in `wasm/transformation` names
/// and an "either side" sentinel in `feegrant/allowance` keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DependentKey {
    pub key: String,
    pub prefix: bool,
}

impl DependentKey {
    /// Exact-match key from namespace + parts.
    pub fn exact(ns: Namespace, parts: &[&str]) -> Self {
        Self {
            key: join_key(ns, parts),
            prefix: false,
        }
    }

    /// Prefix-match key from namespace + parts.
    pub fn prefix(ns: Namespace, parts: &[&str]) -> Self {
        Self {
            key: join_key(ns, parts),
            prefix: true,
        }
    }

    /// The namespace segment of the key, if recognised.
    pub fn namespace(&self) -> Option<Namespace> {
        let ns = self.key.split(':').next()?;
        Namespace::from_str(ns)
    }
}

fn join_key(ns: Namespace, parts: &[&str]) -> String {
    let mut key = ns.as_str().to_string();
    for part in parts {
        key.push(':');
        key.push_str(part);
    }
    key
}

// ─── Event rows ──────────────────────────────────────────────────────────────

/// A wasm contract state write (or deletion tombstone).
///
/// `key` is the comma-joined decimal byte string of the composed storage key;
/// `value` is the raw JSON text, handed back verbatim by the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WasmStateRow {
    pub contract_address: String,
    pub key: String,
    pub block: BlockInfo,
    pub value: String,
    pub deleted: bool,
}

/// A derived view of wasm state produced by an external transformer.
/// A `None` value means "absent from this height onward".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransformationRow {
    pub contract_address: String,
    pub name: String,
    pub block: BlockInfo,
    pub value: Option<String>,
}

/// An executed wasm transaction against a contract.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WasmTxRow {
    pub contract_address: String,
    pub block: BlockInfo,
    pub action: String,
    pub sender: String,
    pub msg: String,
}

/// A per-denom balance change for an address.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BankStateRow {
    pub address: String,
    pub denom: String,
    pub block: BlockInfo,
    pub balance: String,
}

/// The latest aggregate balance snapshot for an address — one row per
/// address; `balances` is a raw JSON object mapping denom to amount.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BankBalanceRow {
    pub address: String,
    pub block: BlockInfo,
    pub balances: String,
}

/// A slashing event registered against a validator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlashRow {
    pub operator_address: String,
    pub registered_block: BlockInfo,
    pub infraction_block_height: u64,
    pub amount_slashed: String,
}

/// A governance proposal version. `data` is the raw proposal JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProposalRow {
    pub proposal_id: u64,
    pub block: BlockInfo,
    pub data: String,
}

/// A governance vote version for `(proposal, voter)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoteRow {
    pub proposal_id: u64,
    pub voter: String,
    pub block: BlockInfo,
    pub data: String,
}

/// A community-pool balance snapshot. `balances` maps denom to amount.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommunityPoolRow {
    pub block: BlockInfo,
    pub balances: String,
}

/// A named extraction datum for an address.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionRow {
    pub address: String,
    pub name: String,
    pub block: BlockInfo,
    pub data: String,
}

/// A fee-grant allowance version between a granter and a grantee.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeegrantRow {
    pub granter: String,
    pub grantee: String,
    pub block: BlockInfo,
    pub data: Option<String>,
    pub active: bool,
}

// ─── Reference tables ────────────────────────────────────────────────────────

/// An instantiated contract. Write-once: contract rows never change, so
/// reads do not record dependencies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContractRow {
    pub address: String,
    pub code_id: u64,
    pub label: Option<String>,
}

/// A known validator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidatorRow {
    pub operator_address: String,
    pub moniker: Option<String>,
}

/// The singleton indexer state row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateRow {
    pub chain_id: String,
    pub latest_block: BlockInfo,
}

// ─── Event (tagged sum) ──────────────────────────────────────────────────────

/// A stored event row, tagged by family. Getters narrow with exhaustive
/// tag assertions; a wrong tag surfaces as [`crate::ComputeError::TypeMismatch`].
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    WasmState(WasmStateRow),
    Transformation(TransformationRow),
    WasmTx(WasmTxRow),
    BankState(BankStateRow),
    BankBalance(BankBalanceRow),
    StakingSlash(SlashRow),
    GovProposal(ProposalRow),
    GovVote(VoteRow),
    CommunityPool(CommunityPoolRow),
    Extraction(ExtractionRow),
    Feegrant(FeegrantRow),
}

impl Event {
    /// The dependency namespace this row lives in.
    pub fn namespace(&self) -> Namespace {
        match self {
            Self::WasmState(_) => Namespace::WasmState,
            Self::Transformation(_) => Namespace::WasmTransformation,
            Self::WasmTx(_) => Namespace::WasmTx,
            Self::BankState(_) | Self::BankBalance(_) => Namespace::Bank,
            Self::StakingSlash(_) => Namespace::StakingSlash,
            Self::GovProposal(_) => Namespace::GovProposal,
            Self::GovVote(_) => Namespace::GovVote,
            Self::CommunityPool(_) => Namespace::CommunityPool,
            Self::Extraction(_) => Namespace::Extraction,
            Self::Feegrant(_) => Namespace::Feegrant,
        }
    }

    /// The block this row was written at.
    pub fn block(&self) -> BlockInfo {
        match self {
            Self::WasmState(r) => r.block,
            Self::Transformation(r) => r.block,
            Self::WasmTx(r) => r.block,
            Self::BankState(r) => r.block,
            Self::BankBalance(r) => r.block,
            Self::StakingSlash(r) => r.registered_block,
            Self::GovProposal(r) => r.block,
            Self::GovVote(r) => r.block,
            Self::CommunityPool(r) => r.block,
            Self::Extraction(r) => r.block,
            Self::Feegrant(r) => r.block,
        }
    }
}

// ─── Computation ─────────────────────────────────────────────────────────────

/// The result of one formula evaluation at one block, before persistence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComputationResult {
    /// The block the formula was evaluated at.
    pub block: BlockInfo,
    /// The formula's output (`None` = absent).
    pub value: Option<Value>,
    /// Recorded non-transformation dependencies.
    pub dependent_events: Vec<DependentKey>,
    /// Recorded transformation dependencies.
    pub dependent_transformations: Vec<DependentKey>,
    /// The highest height at which the recorded dependencies are unchanged.
    pub latest_block_height_valid: u64,
}

/// A persisted computation record, keyed by
/// `(target_address, formula, args, block.height)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Computation {
    pub target_address: String,
    /// Full formula id, `type/name` (e.g. `"contract/cw20/balance"`).
    pub formula: String,
    /// Canonical (key-sorted) JSON encoding of the user arguments.
    pub args: String,
    pub block: BlockInfo,
    pub value: Option<Value>,
    pub dependent_events: Vec<DependentKey>,
    pub dependent_transformations: Vec<DependentKey>,
    pub latest_block_height_valid: u64,
}

impl Computation {
    /// Assemble a record from an evaluation result and its identifiers.
    pub fn from_result(
        target_address: &str,
        formula: &str,
        args: &str,
        result: &ComputationResult,
    ) -> Self {
        Self {
            target_address: target_address.to_string(),
            formula: formula.to_string(),
            args: args.to_string(),
            block: result.block,
            value: result.value.clone(),
            dependent_events: result.dependent_events.clone(),
            dependent_transformations: result.dependent_transformations.clone(),
            latest_block_height_valid: result.latest_block_height_valid,
        }
    }

    /// All recorded dependencies, events then transformations.
    pub fn dependencies(&self) -> Vec<DependentKey> {
        let mut deps = self.dependent_events.clone();
        deps.extend(self.dependent_transformations.iter().cloned());
        deps
    }

    /// The result view of this record.
    pub fn to_result(&self) -> ComputationResult {
        ComputationResult {
            block: self.block,
            value: self.value.clone(),
            dependent_events: self.dependent_events.clone(),
            dependent_transformations: self.dependent_transformations.clone(),
            latest_block_height_valid: self.latest_block_height_valid,
        }
    }
}

/// Canonical args encoding: the key-sorted JSON string. `serde_json`'s
/// object representation is a `BTreeMap`, so serialising a `Value` object
/// already yields sorted keys at every level.
pub fn canonical_args(args: &serde_json::Map<String, Value>) -> String {
    // Round-trip through Value to normalise nested object ordering.
    let value: Value = Value::Object(args.clone());
    let normalised: Value =
        serde_json::from_str(&value.to_string()).unwrap_or(Value::Object(Default::default()));
    normalised.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn namespace_roundtrip() {
        for ns in [
            Namespace::WasmState,
            Namespace::WasmTransformation,
            Namespace::WasmTx,
            Namespace::Bank,
            Namespace::StakingSlash,
            Namespace::GovProposal,
            Namespace::GovVote,
            Namespace::CommunityPool,
            Namespace::Extraction,
            Namespace::Feegrant,
        ] {
            assert_eq!(Namespace::from_str(ns.as_str()), Some(ns));
        }
        assert_eq!(Namespace::from_str("nope"), None);
    }

    #[test]
    fn dependent_key_format() {
        let key = DependentKey::exact(Namespace::WasmState, &["contractA", "1,2,3"]);
        assert_eq!(key.key, "wasm/state:contractA:1,2,3");
        assert!(!key.prefix);
        assert_eq!(key.namespace(), Some(Namespace::WasmState));

        let key = DependentKey::prefix(Namespace::GovProposal, &[]);
        assert_eq!(key.key, "gov/proposal");
        assert!(key.prefix);
    }

    #[test]
    fn canonical_args_sorted() {
        let mut args = serde_json::Map::new();
        args.insert("zeta".into(), json!(1));
        args.insert("alpha".into(), json!({"y": 2, "x": 1}));
        let canon = canonical_args(&args);
        assert_eq!(canon, r#"{"alpha":{"x":1,"y":2},"zeta":1}"#);
    }

    #[test]
    fn event_tag_and_block() {
        let ev = Event::WasmState(WasmStateRow {
            contract_address: "a".into(),
            key: "1".into(),
            block: BlockInfo::new(10, 1000),
            value: "\"v\"".into(),
            deleted: false,
        });
        assert_eq!(ev.namespace(), Namespace::WasmState);
        assert_eq!(ev.block().height, 10);
    }
}
