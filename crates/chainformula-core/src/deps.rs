//! Dependency recording and matching.
//!
//! Every Environment getter records the dependent key of what it is about
//! to read **before** the fetch, so a miss still produces a dependency and
//! the computation is invalidated when the missing key first appears.

use std::sync::Mutex;

use crate::types::{DependentKey, Event, Namespace};

// ─── DependencyRecorder ──────────────────────────────────────────────────────

/// Per-evaluation append-only list of dependent keys.
///
/// Duplicates are tolerated here and removed by [`DependencyRecorder::snapshot`].
#[derive(Debug, Default)]
pub struct DependencyRecorder {
    entries: Mutex<Vec<DependentKey>>,
}

impl DependencyRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one dependent key.
    pub fn record(&self, key: DependentKey) {
        self.entries.lock().unwrap().push(key);
    }

    /// Append several dependent keys.
    pub fn record_all<I: IntoIterator<Item = DependentKey>>(&self, keys: I) {
        self.entries.lock().unwrap().extend(keys);
    }

    /// The deduplicated dependency set, in first-recorded order.
    pub fn snapshot(&self) -> Vec<DependentKey> {
        let entries = self.entries.lock().unwrap();
        let mut seen = std::collections::HashSet::new();
        entries
            .iter()
            .filter(|key| seen.insert((*key).clone()))
            .cloned()
            .collect()
    }

    /// The deduplicated set split into (events, transformations) for
    /// persistence.
    pub fn split(&self) -> (Vec<DependentKey>, Vec<DependentKey>) {
        self.snapshot()
            .into_iter()
            .partition(|key| key.namespace() != Some(Namespace::WasmTransformation))
    }
}

// ─── Matching ────────────────────────────────────────────────────────────────

/// Returns `true` if `dep` matches a stored row's canonical key.
///
/// Baseline rule: byte-exact, or `starts_with` when `dep.prefix` is set.
/// Namespace-specific extensions:
/// - `wasm/transformation`: `*` in the dependency is a glob matching any
///   run of characters (the only namespace with glob semantics).
/// - `feegrant/allowance`: a `*` key segment is an opaque sentinel matching
///   any value in that position ("either side").
/// - `bank/balance`: a whole-address snapshot row (candidate without a
///   denom suffix) matches any dependency on that address, because the
///   snapshot supersedes every denom.
pub fn matches(dep: &DependentKey, candidate: &str) -> bool {
    match dep.namespace() {
        Some(Namespace::WasmTransformation) if dep.key.contains('*') => {
            glob_match(&dep.key, candidate, dep.prefix)
        }
        Some(Namespace::Feegrant) => sentinel_match(&dep.key, candidate),
        Some(Namespace::Bank) => {
            if baseline_match(dep, candidate) {
                return true;
            }
            // Snapshot rows carry `bank/balance:address` with no denom
            // suffix. Any dependency whose address segment agrees is
            // invalidated, because the snapshot supersedes every denom.
            let rest = match candidate.strip_prefix("bank/balance:") {
                Some(rest) => rest,
                None => return false,
            };
            if rest.contains(':') {
                // Per-denom candidate — the baseline rule already decided.
                return false;
            }
            dep_segment(&dep.key, 1) == Some(rest)
        }
        _ => baseline_match(dep, candidate),
    }
}

fn baseline_match(dep: &DependentKey, candidate: &str) -> bool {
    if dep.prefix {
        candidate.starts_with(&dep.key)
    } else {
        candidate == dep.key
    }
}

/// The `i`-th `:`-separated segment after the namespace (0 = subject).
fn dep_segment(key: &str, index: usize) -> Option<&str> {
    // The namespace itself may contain `/` but never `:`.
    key.split(':').nth(index)
}

/// Glob match for transformation names: `*` matches any (possibly empty)
/// run of characters. Backends use this to mirror their SQL `LIKE`
/// translation.
pub fn glob_matches(pattern: &str, candidate: &str) -> bool {
    glob_match(pattern, candidate, false)
}

/// Glob match where `*` matches any (possibly empty) run of characters.
fn glob_match(pattern: &str, candidate: &str, prefix: bool) -> bool {
    fn inner(p: &[u8], c: &[u8]) -> bool {
        match (p.first(), c.first()) {
            (None, None) => true,
            (Some(b'*'), _) => inner(&p[1..], c) || (!c.is_empty() && inner(p, &c[1..])),
            (Some(a), Some(b)) if a == b => inner(&p[1..], &c[1..]),
            _ => false,
        }
    }
    if prefix {
        let mut pattern = pattern.as_bytes().to_vec();
        pattern.push(b'*');
        inner(&pattern, candidate.as_bytes())
    } else {
        inner(pattern.as_bytes(), candidate.as_bytes())
    }
}

/// Segment-wise match where a `*` segment in the dependency matches any
/// candidate segment. Segment counts must agree.
fn sentinel_match(dep_key: &str, candidate: &str) -> bool {
    let dep_parts: Vec<&str> = dep_key.split(':').collect();
    let cand_parts: Vec<&str> = candidate.split(':').collect();
    if dep_parts.len() != cand_parts.len() {
        return false;
    }
    dep_parts
        .iter()
        .zip(cand_parts.iter())
        .all(|(d, c)| *d == "*" || d == c)
}

/// The canonical key of a stored row, used as the match candidate.
pub fn event_key(event: &Event) -> String {
    let ns = event.namespace().as_str();
    match event {
        Event::WasmState(r) => format!("{ns}:{}:{}", r.contract_address, r.key),
        Event::Transformation(r) => format!("{ns}:{}:{}", r.contract_address, r.name),
        Event::WasmTx(r) => format!("{ns}:{}:{}", r.contract_address, r.block.height),
        Event::BankState(r) => format!("{ns}:{}:{}", r.address, r.denom),
        // Snapshot rows are whole-address: no denom suffix.
        Event::BankBalance(r) => format!("{ns}:{}", r.address),
        Event::StakingSlash(r) => {
            format!("{ns}:{}:{}", r.operator_address, r.registered_block.height)
        }
        Event::GovProposal(r) => format!("{ns}:{}", r.proposal_id),
        Event::GovVote(r) => format!("{ns}:{}:{}", r.proposal_id, r.voter),
        Event::CommunityPool(r) => format!("{ns}:{}", r.block.height),
        Event::Extraction(r) => format!("{ns}:{}:{}", r.address, r.name),
        Event::Feegrant(r) => format!("{ns}:{}:{}", r.granter, r.grantee),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BankBalanceRow, BlockInfo, WasmStateRow};

    #[test]
    fn recorder_dedupes_on_snapshot() {
        let recorder = DependencyRecorder::new();
        let key = DependentKey::exact(Namespace::WasmState, &["a", "1,2"]);
        recorder.record(key.clone());
        recorder.record(key.clone());
        recorder.record(DependentKey::prefix(Namespace::WasmTx, &["a", ""]));
        assert_eq!(recorder.snapshot().len(), 2);
    }

    #[test]
    fn recorder_splits_transformations() {
        let recorder = DependencyRecorder::new();
        recorder.record(DependentKey::exact(Namespace::WasmState, &["a", "1"]));
        recorder.record(DependentKey::exact(
            Namespace::WasmTransformation,
            &["a", "config"],
        ));
        let (events, transformations) = recorder.split();
        assert_eq!(events.len(), 1);
        assert_eq!(transformations.len(), 1);
        assert_eq!(transformations[0].key, "wasm/transformation:a:config");
    }

    #[test]
    fn exact_and_prefix_match() {
        let exact = DependentKey::exact(Namespace::WasmState, &["a", "1,2,3"]);
        assert!(matches(&exact, "wasm/state:a:1,2,3"));
        assert!(!matches(&exact, "wasm/state:a:1,2,3,4"));

        let prefix = DependentKey::prefix(Namespace::WasmState, &["a", "1,2,"]);
        assert!(matches(&prefix, "wasm/state:a:1,2,3"));
        assert!(!matches(&prefix, "wasm/state:a:1,20"));
    }

    #[test]
    fn transformation_glob_match() {
        let dep = DependentKey::exact(Namespace::WasmTransformation, &["a", "proposal/*"]);
        assert!(matches(&dep, "wasm/transformation:a:proposal/7"));
        assert!(!matches(&dep, "wasm/transformation:a:vote/7"));

        // `*` outside the transformation namespace stays literal.
        let literal = DependentKey::exact(Namespace::Extraction, &["a", "x*y"]);
        assert!(matches(&literal, "extraction:a:x*y"));
        assert!(!matches(&literal, "extraction:a:xzy"));
    }

    #[test]
    fn feegrant_sentinel_match() {
        let granted = DependentKey::exact(Namespace::Feegrant, &["granterA", "*"]);
        assert!(matches(&granted, "feegrant/allowance:granterA:granteeB"));
        assert!(!matches(&granted, "feegrant/allowance:other:granteeB"));

        let received = DependentKey::exact(Namespace::Feegrant, &["*", "granteeB"]);
        assert!(matches(&received, "feegrant/allowance:granterA:granteeB"));
    }

    #[test]
    fn bank_snapshot_matches_denom_dependency() {
        let dep = DependentKey::exact(Namespace::Bank, &["addr1", "ujuno"]);
        let snapshot = Event::BankBalance(BankBalanceRow {
            address: "addr1".into(),
            block: BlockInfo::new(5, 50),
            balances: "{}".into(),
        });
        assert!(matches(&dep, &event_key(&snapshot)));

        let other = Event::BankBalance(BankBalanceRow {
            address: "addr2".into(),
            block: BlockInfo::new(5, 50),
            balances: "{}".into(),
        });
        assert!(!matches(&dep, &event_key(&other)));
    }

    #[test]
    fn event_key_shapes() {
        let ev = Event::WasmState(WasmStateRow {
            contract_address: "c1".into(),
            key: "1,2".into(),
            block: BlockInfo::new(1, 10),
            value: "{}".into(),
            deleted: false,
        });
        assert_eq!(event_key(&ev), "wasm/state:c1:1,2");
    }
}
