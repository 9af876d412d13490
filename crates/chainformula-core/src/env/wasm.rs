//! Wasm state and transformation getters.

use std::collections::BTreeMap;

use serde_json::Value;

use super::{json_matches, Environment};
use crate::error::ComputeError;
use crate::keys::{
    decode_trailing, encode_key, encode_key_prefix, key_to_db, prefix_to_db, KeySegment,
    MapKeyType,
};
use crate::types::{DependentKey, Event, Namespace, TransformationRow, WasmStateRow};

/// One entry of a mixed point/prefix prefetch batch.
pub struct PrefetchKey {
    pub segments: Vec<KeySegment>,
    pub prefix: bool,
}

/// One entry of a transformation prefetch batch.
pub struct PrefetchName {
    pub name: String,
    pub prefix: bool,
}

/// A resolved transformation match.
#[derive(Debug, Clone, PartialEq)]
pub struct TransformationMatch {
    pub contract_address: String,
    pub name: String,
    pub value: Value,
}

/// Optional filters for transformation matches.
#[derive(Default)]
pub struct TransformationMatchOptions {
    /// Containment predicate applied to the parsed value.
    pub where_value: Option<Value>,
    /// Restrict to contracts whose code id is under one of these keys.
    /// Applied post-query: the memo is keyed only on the name.
    pub code_ids_keys: Option<Vec<String>>,
    pub limit: Option<u64>,
}

fn narrow_wasm_state(rows: &[Event]) -> Result<Vec<WasmStateRow>, ComputeError> {
    rows.iter()
        .map(|event| match event {
            Event::WasmState(row) => Ok(row.clone()),
            _ => Err(ComputeError::TypeMismatch {
                namespace: Namespace::WasmState.as_str(),
                expected: "WasmState",
            }),
        })
        .collect()
}

fn narrow_transformation(rows: &[Event]) -> Result<Vec<TransformationRow>, ComputeError> {
    rows.iter()
        .map(|event| match event {
            Event::Transformation(row) => Ok(row.clone()),
            _ => Err(ComputeError::TypeMismatch {
                namespace: Namespace::WasmTransformation.as_str(),
                expected: "Transformation",
            }),
        })
        .collect()
}

fn parse_json(raw: &str) -> Option<Value> {
    serde_json::from_str(raw).ok()
}

impl Environment {
    // ── Wasm state ───────────────────────────────────────────────────────────

    /// The effective state row for a composed key: memoised most-recent
    /// read at the target height, tombstones included.
    async fn state_row(
        &self,
        address: &str,
        db_key: &str,
    ) -> Result<Option<WasmStateRow>, ComputeError> {
        let dep = DependentKey::exact(Namespace::WasmState, &[address, db_key]);
        let dep_key = dep.key.clone();
        self.record(dep);

        let height = self.height();
        let store = self.store().clone();
        let (address, db_key) = (address.to_string(), db_key.to_string());
        let rows = self
            .memoized(&dep_key, false, || async move {
                Ok(store
                    .wasm_state_latest(&address, &db_key, height)
                    .await?
                    .map(Event::WasmState)
                    .into_iter()
                    .collect())
            })
            .await?;
        match rows {
            None => Ok(None),
            Some(rows) => Ok(narrow_wasm_state(&rows)?.into_iter().next()),
        }
    }

    /// Point read of contract state by composed key, parsed as JSON.
    /// Tombstones and unparseable values read as absent.
    pub async fn get(
        &self,
        address: &str,
        key: &[KeySegment],
    ) -> Result<Option<Value>, ComputeError> {
        let db_key = key_to_db(&encode_key(key));
        Ok(self
            .state_row(address, &db_key)
            .await?
            .filter(|row| !row.deleted)
            .and_then(|row| parse_json(&row.value)))
    }

    /// Prefix read of contract state: a mapping from the decoded trailing
    /// key segment to the parsed value, tombstones filtered. Absent when
    /// no row exists under the prefix.
    pub async fn get_map(
        &self,
        address: &str,
        prefix: &[KeySegment],
        key_type: MapKeyType,
    ) -> Result<Option<BTreeMap<String, Value>>, ComputeError> {
        let db_prefix = prefix_to_db(&encode_key_prefix(prefix));
        let dep = DependentKey::prefix(Namespace::WasmState, &[address, &db_prefix]);
        let dep_key = dep.key.clone();
        self.record(dep);

        let height = self.height();
        let store = self.store().clone();
        let (owner, fetch_prefix) = (address.to_string(), db_prefix.clone());
        let rows = self
            .memoized(&dep_key, true, || async move {
                Ok(store
                    .wasm_state_prefix(&owner, &fetch_prefix, height)
                    .await?
                    .into_iter()
                    .map(Event::WasmState)
                    .collect())
            })
            .await?;

        let rows = match rows {
            None => return Ok(None),
            Some(rows) => narrow_wasm_state(&rows)?,
        };
        let mut map = BTreeMap::new();
        for row in rows.iter().filter(|row| !row.deleted) {
            if let (Some(key), Some(value)) = (
                decode_trailing(&row.key, &db_prefix, key_type),
                parse_json(&row.value),
            ) {
                map.insert(key, value);
            }
        }
        Ok(Some(map))
    }

    /// The time of the most recent write (including deletions) to a key.
    pub async fn get_date_key_modified(
        &self,
        address: &str,
        key: &[KeySegment],
    ) -> Result<Option<u64>, ComputeError> {
        let db_key = key_to_db(&encode_key(key));
        Ok(self
            .state_row(address, &db_key)
            .await?
            .map(|row| row.block.time_unix_ms))
    }

    /// The time of the first non-deleted write to a key. Reads ascending
    /// order and does not consult the memo: the first row is not cached by
    /// the most-recent memo shape.
    pub async fn get_date_key_first_set(
        &self,
        address: &str,
        key: &[KeySegment],
    ) -> Result<Option<u64>, ComputeError> {
        let db_key = key_to_db(&encode_key(key));
        self.record(DependentKey::exact(
            Namespace::WasmState,
            &[address, &db_key],
        ));
        let row = self.store().wasm_state_first(address, &db_key).await?;
        if row.is_some() {
            self.notify_fetch(1);
        }
        Ok(row.map(|row| row.block.time_unix_ms))
    }

    /// Like [`Environment::get_date_key_first_set`], restricted to writes
    /// whose parsed value matches a containment predicate.
    pub async fn get_date_key_first_set_with_value_match(
        &self,
        address: &str,
        key: &[KeySegment],
        predicate: &Value,
    ) -> Result<Option<u64>, ComputeError> {
        let db_key = key_to_db(&encode_key(key));
        self.record(DependentKey::exact(
            Namespace::WasmState,
            &[address, &db_key],
        ));
        let rows = self
            .store()
            .wasm_state_ascending(address, &db_key, u64::MAX)
            .await?;
        self.notify_fetch(rows.len());
        Ok(rows
            .iter()
            .filter(|row| !row.deleted)
            .find(|row| parse_json(&row.value).is_some_and(|v| json_matches(&v, predicate)))
            .map(|row| row.block.time_unix_ms))
    }

    // ── Transformations ──────────────────────────────────────────────────────

    async fn transformation_rows(
        &self,
        subject: Option<&str>,
        name_glob: &str,
        limit: Option<u64>,
    ) -> Result<Vec<TransformationRow>, ComputeError> {
        let dep = DependentKey::exact(
            Namespace::WasmTransformation,
            &[subject.unwrap_or("*"), name_glob],
        );
        let dep_key = dep.key.clone();
        self.record(dep);

        let height = self.height();
        let store = self.store().clone();
        let contract = subject.map(|s| s.to_string());
        let glob = name_glob.to_string();
        let rows = self
            .memoized(&dep_key, false, || async move {
                Ok(store
                    .transformation_matches(contract.as_deref(), &glob, height, limit)
                    .await?
                    .into_iter()
                    .map(Event::Transformation)
                    .collect())
            })
            .await?;
        match rows {
            None => Ok(Vec::new()),
            Some(rows) => narrow_transformation(&rows),
        }
    }

    /// Post-query filters shared by the match getters: drop null values,
    /// apply the value predicate, and the code-id filter via the joined
    /// contract record.
    async fn filter_matches(
        &self,
        rows: Vec<TransformationRow>,
        options: &TransformationMatchOptions,
    ) -> Result<Vec<TransformationMatch>, ComputeError> {
        let mut matches = Vec::new();
        for row in rows {
            let value = match row.value.as_deref().and_then(parse_json) {
                Some(value) => value,
                None => continue,
            };
            if let Some(predicate) = &options.where_value {
                if !json_matches(&value, predicate) {
                    continue;
                }
            }
            if let Some(keys) = &options.code_ids_keys {
                if !self
                    .contract_matches_code_id_keys(&row.contract_address, keys)
                    .await?
                {
                    continue;
                }
            }
            matches.push(TransformationMatch {
                contract_address: row.contract_address,
                name: row.name,
                value,
            });
        }
        Ok(matches)
    }

    /// The most recent transformations per `(contract, name)` whose name
    /// matches a glob (`*` matches any run), across all contracts unless
    /// one is given. Absent when nothing survives the filters.
    pub async fn get_transformation_matches(
        &self,
        address: Option<&str>,
        name_glob: &str,
        options: TransformationMatchOptions,
    ) -> Result<Option<Vec<TransformationMatch>>, ComputeError> {
        let rows = self
            .transformation_rows(address, name_glob, options.limit)
            .await?;
        let matches = self.filter_matches(rows, &options).await?;
        Ok(if matches.is_empty() {
            None
        } else {
            Some(matches)
        })
    }

    /// The first transformation match for one contract.
    pub async fn get_transformation_match(
        &self,
        address: &str,
        name_glob: &str,
        options: TransformationMatchOptions,
    ) -> Result<Option<TransformationMatch>, ComputeError> {
        Ok(self
            .get_transformation_matches(Some(address), name_glob, options)
            .await?
            .and_then(|matches| matches.into_iter().next()))
    }

    /// The most recent transformations whose name starts with
    /// `name_prefix + ":"`, as a mapping from the name suffix to the
    /// parsed value. Null-valued transformations are omitted.
    pub async fn get_transformation_map(
        &self,
        address: &str,
        name_prefix: &str,
    ) -> Result<Option<BTreeMap<String, Value>>, ComputeError> {
        let full_prefix = format!("{name_prefix}:");
        let dep = DependentKey::prefix(Namespace::WasmTransformation, &[address, &full_prefix]);
        let dep_key = dep.key.clone();
        self.record(dep);

        let height = self.height();
        let store = self.store().clone();
        let (owner, fetch_prefix) = (address.to_string(), full_prefix.clone());
        let rows = self
            .memoized(&dep_key, true, || async move {
                Ok(store
                    .transformation_prefix(&owner, &fetch_prefix, height)
                    .await?
                    .into_iter()
                    .map(Event::Transformation)
                    .collect())
            })
            .await?;

        let rows = match rows {
            None => return Ok(None),
            Some(rows) => narrow_transformation(&rows)?,
        };
        let mut map = BTreeMap::new();
        for row in rows {
            if let Some(value) = row.value.as_deref().and_then(parse_json) {
                if let Some(suffix) = row.name.strip_prefix(&full_prefix) {
                    map.insert(suffix.to_string(), value);
                }
            }
        }
        Ok(Some(map))
    }

    /// The time a contract was first transformed under a matching name.
    /// Ascending order; bypasses the memo.
    pub async fn get_date_first_transformed(
        &self,
        address: &str,
        name_glob: &str,
    ) -> Result<Option<u64>, ComputeError> {
        self.record(DependentKey::exact(
            Namespace::WasmTransformation,
            &[address, name_glob],
        ));
        let row = self.store().transformation_first(address, name_glob).await?;
        if row.is_some() {
            self.notify_fetch(1);
        }
        Ok(row.map(|row| row.block.time_unix_ms))
    }

    // ── Prefetch ─────────────────────────────────────────────────────────────

    /// Batch-load a mixed set of point and prefix state reads into the
    /// per-evaluation memo so subsequent getters hit memory.
    pub async fn prefetch(
        &self,
        address: &str,
        keys: &[PrefetchKey],
    ) -> Result<(), ComputeError> {
        for entry in keys {
            if entry.prefix {
                let db_prefix = prefix_to_db(&encode_key_prefix(&entry.segments));
                let dep = DependentKey::prefix(Namespace::WasmState, &[address, &db_prefix]);
                let dep_key = dep.key.clone();
                self.record(dep);
                let height = self.height();
                let store = self.store().clone();
                let (owner, fetch_prefix) = (address.to_string(), db_prefix);
                self.memoized(&dep_key, true, || async move {
                    Ok(store
                        .wasm_state_prefix(&owner, &fetch_prefix, height)
                        .await?
                        .into_iter()
                        .map(Event::WasmState)
                        .collect())
                })
                .await?;
            } else {
                let db_key = key_to_db(&encode_key(&entry.segments));
                self.state_row(address, &db_key).await?;
            }
        }
        Ok(())
    }

    /// Batch-load transformations (exact names and name prefixes) into the
    /// per-evaluation memo.
    pub async fn prefetch_transformations(
        &self,
        address: &str,
        names: &[PrefetchName],
    ) -> Result<(), ComputeError> {
        for entry in names {
            if entry.prefix {
                let full_prefix = format!("{}:", entry.name);
                let dep =
                    DependentKey::prefix(Namespace::WasmTransformation, &[address, &full_prefix]);
                let dep_key = dep.key.clone();
                self.record(dep);
                let height = self.height();
                let store = self.store().clone();
                let (owner, fetch_prefix) = (address.to_string(), full_prefix);
                self.memoized(&dep_key, true, || async move {
                    Ok(store
                        .transformation_prefix(&owner, &fetch_prefix, height)
                        .await?
                        .into_iter()
                        .map(Event::Transformation)
                        .collect())
                })
                .await?;
            } else {
                self.transformation_rows(Some(address), &entry.name, None)
                    .await?;
            }
        }
        Ok(())
    }
}
