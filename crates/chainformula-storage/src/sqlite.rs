//! SQLite storage backend for ChainFormula.
//!
//! Persists the versioned event tables, reference tables, and computations
//! to a single SQLite file. Uses `sqlx` with WAL mode for concurrent read
//! performance.
//!
//! # Usage
//! ```rust,no_run
//! use chainformula_storage::sqlite::SqliteStore;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! // File-backed (persistent)
//! let store = SqliteStore::open("./index.db").await?;
//!
//! // In-memory (tests / ephemeral)
//! let store = SqliteStore::in_memory().await?;
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use serde_json::Value;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Column, Row, SqlitePool};
use tracing::debug;

use chainformula_core::error::ComputeError;
use chainformula_core::store::{ComputationStore, EventStore, FeegrantSide};
use chainformula_core::types::{
    BankBalanceRow, BankStateRow, BlockInfo, CommunityPoolRow, Computation, ContractRow,
    DependentKey, ExtractionRow, FeegrantRow, Namespace, ProposalRow, SlashRow, StateRow,
    TransformationRow, ValidatorRow, VoteRow, WasmStateRow, WasmTxRow,
};

fn db_err(err: impl std::fmt::Display) -> ComputeError {
    ComputeError::Storage(err.to_string())
}

/// Escape `%`, `_`, and `\` for a `LIKE ... ESCAPE '\'` pattern.
fn escape_like(s: &str) -> String {
    s.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_")
}

/// Translate a `*`-glob into a `LIKE` pattern.
fn glob_to_like(glob: &str) -> String {
    escape_like(glob).replace('*', "%")
}

/// SQLite-backed event + computation store.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (or create) a SQLite database at `path`.
    ///
    /// The path may be a plain file path (`"./index.db"`) or a full
    /// SQLite URL (`"sqlite:./index.db?mode=rwc"`).
    pub async fn open(path: &str) -> Result<Self, ComputeError> {
        let url = if path.starts_with("sqlite:") {
            path.to_string()
        } else {
            format!("sqlite:{path}?mode=rwc")
        };
        let pool = SqlitePool::connect(&url).await.map_err(db_err)?;
        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    /// Open an in-memory SQLite database. Pinned to a single connection so
    /// every query sees the same database. Ideal for tests.
    pub async fn in_memory() -> Result<Self, ComputeError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .map_err(db_err)?;
        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    /// Create tables and enable WAL mode.
    async fn init_schema(&self) -> Result<(), ComputeError> {
        let statements = [
            "PRAGMA journal_mode=WAL;",
            "CREATE TABLE IF NOT EXISTS wasm_state_events (
                contract_address   TEXT    NOT NULL,
                key                TEXT    NOT NULL,
                block_height       INTEGER NOT NULL,
                block_time_unix_ms INTEGER NOT NULL,
                value              TEXT    NOT NULL,
                deleted            INTEGER NOT NULL DEFAULT 0,
                PRIMARY KEY (contract_address, key, block_height)
            );",
            "CREATE TABLE IF NOT EXISTS wasm_transformations (
                contract_address   TEXT    NOT NULL,
                name               TEXT    NOT NULL,
                block_height       INTEGER NOT NULL,
                block_time_unix_ms INTEGER NOT NULL,
                value              TEXT,
                PRIMARY KEY (contract_address, name, block_height)
            );",
            "CREATE TABLE IF NOT EXISTS wasm_tx_events (
                id                 INTEGER PRIMARY KEY AUTOINCREMENT,
                contract_address   TEXT    NOT NULL,
                block_height       INTEGER NOT NULL,
                block_time_unix_ms INTEGER NOT NULL,
                action             TEXT    NOT NULL,
                sender             TEXT    NOT NULL,
                msg                TEXT    NOT NULL
            );",
            "CREATE TABLE IF NOT EXISTS bank_balances (
                address            TEXT PRIMARY KEY,
                block_height       INTEGER NOT NULL,
                block_time_unix_ms INTEGER NOT NULL,
                balances           TEXT    NOT NULL
            );",
            "CREATE TABLE IF NOT EXISTS bank_state_events (
                address            TEXT    NOT NULL,
                denom              TEXT    NOT NULL,
                block_height       INTEGER NOT NULL,
                block_time_unix_ms INTEGER NOT NULL,
                balance            TEXT    NOT NULL,
                PRIMARY KEY (address, denom, block_height)
            );",
            "CREATE TABLE IF NOT EXISTS staking_slash_events (
                id                            INTEGER PRIMARY KEY AUTOINCREMENT,
                operator_address              TEXT    NOT NULL,
                registered_block_height       INTEGER NOT NULL,
                registered_block_time_unix_ms INTEGER NOT NULL,
                infraction_block_height       INTEGER NOT NULL,
                amount_slashed                TEXT    NOT NULL
            );",
            "CREATE TABLE IF NOT EXISTS gov_proposals (
                proposal_id        INTEGER NOT NULL,
                block_height       INTEGER NOT NULL,
                block_time_unix_ms INTEGER NOT NULL,
                data               TEXT    NOT NULL,
                PRIMARY KEY (proposal_id, block_height)
            );",
            "CREATE TABLE IF NOT EXISTS gov_votes (
                proposal_id        INTEGER NOT NULL,
                voter              TEXT    NOT NULL,
                block_height       INTEGER NOT NULL,
                block_time_unix_ms INTEGER NOT NULL,
                data               TEXT    NOT NULL,
                PRIMARY KEY (proposal_id, voter, block_height)
            );",
            "CREATE TABLE IF NOT EXISTS community_pool_events (
                block_height       INTEGER PRIMARY KEY,
                block_time_unix_ms INTEGER NOT NULL,
                balances           TEXT    NOT NULL
            );",
            "CREATE TABLE IF NOT EXISTS extractions (
                address            TEXT    NOT NULL,
                name               TEXT    NOT NULL,
                block_height       INTEGER NOT NULL,
                block_time_unix_ms INTEGER NOT NULL,
                data               TEXT    NOT NULL,
                PRIMARY KEY (address, name, block_height)
            );",
            "CREATE TABLE IF NOT EXISTS feegrant_allowances (
                granter            TEXT    NOT NULL,
                grantee            TEXT    NOT NULL,
                block_height       INTEGER NOT NULL,
                block_time_unix_ms INTEGER NOT NULL,
                data               TEXT,
                active             INTEGER NOT NULL DEFAULT 1,
                PRIMARY KEY (granter, grantee, block_height)
            );",
            "CREATE TABLE IF NOT EXISTS contracts (
                address TEXT PRIMARY KEY,
                code_id INTEGER NOT NULL,
                label   TEXT
            );",
            "CREATE TABLE IF NOT EXISTS validators (
                operator_address TEXT PRIMARY KEY,
                moniker          TEXT
            );",
            "CREATE TABLE IF NOT EXISTS chain_state (
                id                        INTEGER PRIMARY KEY CHECK (id = 1),
                chain_id                  TEXT    NOT NULL,
                latest_block_height       INTEGER NOT NULL,
                latest_block_time_unix_ms INTEGER NOT NULL
            );",
            "CREATE TABLE IF NOT EXISTS blocks (
                height       INTEGER PRIMARY KEY,
                time_unix_ms INTEGER NOT NULL
            );",
            "CREATE TABLE IF NOT EXISTS computations (
                id                        INTEGER PRIMARY KEY AUTOINCREMENT,
                target_address            TEXT    NOT NULL,
                formula                   TEXT    NOT NULL,
                args                      TEXT    NOT NULL,
                block_height              INTEGER NOT NULL,
                block_time_unix_ms        INTEGER NOT NULL,
                value                     TEXT,
                latest_block_height_valid INTEGER NOT NULL,
                UNIQUE (target_address, formula, args, block_height)
            );",
            "CREATE TABLE IF NOT EXISTS computation_event_deps (
                computation_id INTEGER NOT NULL REFERENCES computations(id) ON DELETE CASCADE,
                key            TEXT    NOT NULL,
                is_prefix      INTEGER NOT NULL DEFAULT 0
            );",
            "CREATE TABLE IF NOT EXISTS computation_transformation_deps (
                computation_id INTEGER NOT NULL REFERENCES computations(id) ON DELETE CASCADE,
                key            TEXT    NOT NULL,
                is_prefix      INTEGER NOT NULL DEFAULT 0
            );",
            // Indexes for common query patterns
            "CREATE INDEX IF NOT EXISTS idx_wasm_tx_contract
             ON wasm_tx_events (contract_address, block_height DESC);",
            "CREATE INDEX IF NOT EXISTS idx_transformations_name
             ON wasm_transformations (name, block_height DESC);",
            "CREATE INDEX IF NOT EXISTS idx_computations_lookup
             ON computations (target_address, formula, args, block_height DESC);",
        ];
        for statement in statements {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(db_err)?;
        }
        debug!("SqliteStore schema initialized");
        Ok(())
    }

    /// Get the underlying connection pool (for custom queries).
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Keep the block index and state head consistent with an inserted row.
    async fn register_block(&self, block: BlockInfo) -> Result<(), ComputeError> {
        sqlx::query("INSERT OR IGNORE INTO blocks (height, time_unix_ms) VALUES (?, ?)")
            .bind(block.height as i64)
            .bind(block.time_unix_ms as i64)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        sqlx::query(
            "UPDATE chain_state
             SET latest_block_height = ?1, latest_block_time_unix_ms = ?2
             WHERE id = 1 AND latest_block_height < ?1",
        )
        .bind(block.height as i64)
        .bind(block.time_unix_ms as i64)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    // ─── Exporter-facing inserts ─────────────────────────────────────────────

    pub async fn insert_wasm_state(&self, row: &WasmStateRow) -> Result<(), ComputeError> {
        self.register_block(row.block).await?;
        sqlx::query(
            "INSERT OR REPLACE INTO wasm_state_events
                (contract_address, key, block_height, block_time_unix_ms, value, deleted)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&row.contract_address)
        .bind(&row.key)
        .bind(row.block.height as i64)
        .bind(row.block.time_unix_ms as i64)
        .bind(&row.value)
        .bind(row.deleted)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    pub async fn insert_transformation(
        &self,
        row: &TransformationRow,
    ) -> Result<(), ComputeError> {
        self.register_block(row.block).await?;
        sqlx::query(
            "INSERT OR REPLACE INTO wasm_transformations
                (contract_address, name, block_height, block_time_unix_ms, value)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&row.contract_address)
        .bind(&row.name)
        .bind(row.block.height as i64)
        .bind(row.block.time_unix_ms as i64)
        .bind(&row.value)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    pub async fn insert_wasm_tx(&self, row: &WasmTxRow) -> Result<(), ComputeError> {
        self.register_block(row.block).await?;
        sqlx::query(
            "INSERT INTO wasm_tx_events
                (contract_address, block_height, block_time_unix_ms, action, sender, msg)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&row.contract_address)
        .bind(row.block.height as i64)
        .bind(row.block.time_unix_ms as i64)
        .bind(&row.action)
        .bind(&row.sender)
        .bind(&row.msg)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    pub async fn insert_bank_state(&self, row: &BankStateRow) -> Result<(), ComputeError> {
        self.register_block(row.block).await?;
        sqlx::query(
            "INSERT OR REPLACE INTO bank_state_events
                (address, denom, block_height, block_time_unix_ms, balance)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&row.address)
        .bind(&row.denom)
        .bind(row.block.height as i64)
        .bind(row.block.time_unix_ms as i64)
        .bind(&row.balance)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    /// Replace the per-address aggregate snapshot.
    pub async fn set_bank_balance(&self, row: &BankBalanceRow) -> Result<(), ComputeError> {
        self.register_block(row.block).await?;
        sqlx::query(
            "INSERT OR REPLACE INTO bank_balances
                (address, block_height, block_time_unix_ms, balances)
             VALUES (?, ?, ?, ?)",
        )
        .bind(&row.address)
        .bind(row.block.height as i64)
        .bind(row.block.time_unix_ms as i64)
        .bind(&row.balances)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    pub async fn insert_slash(&self, row: &SlashRow) -> Result<(), ComputeError> {
        self.register_block(row.registered_block).await?;
        sqlx::query(
            "INSERT INTO staking_slash_events
                (operator_address, registered_block_height, registered_block_time_unix_ms,
                 infraction_block_height, amount_slashed)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&row.operator_address)
        .bind(row.registered_block.height as i64)
        .bind(row.registered_block.time_unix_ms as i64)
        .bind(row.infraction_block_height as i64)
        .bind(&row.amount_slashed)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    pub async fn insert_proposal(&self, row: &ProposalRow) -> Result<(), ComputeError> {
        self.register_block(row.block).await?;
        sqlx::query(
            "INSERT OR REPLACE INTO gov_proposals
                (proposal_id, block_height, block_time_unix_ms, data)
             VALUES (?, ?, ?, ?)",
        )
        .bind(row.proposal_id as i64)
        .bind(row.block.height as i64)
        .bind(row.block.time_unix_ms as i64)
        .bind(&row.data)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    pub async fn insert_vote(&self, row: &VoteRow) -> Result<(), ComputeError> {
        self.register_block(row.block).await?;
        sqlx::query(
            "INSERT OR REPLACE INTO gov_votes
                (proposal_id, voter, block_height, block_time_unix_ms, data)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(row.proposal_id as i64)
        .bind(&row.voter)
        .bind(row.block.height as i64)
        .bind(row.block.time_unix_ms as i64)
        .bind(&row.data)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    pub async fn insert_community_pool(
        &self,
        row: &CommunityPoolRow,
    ) -> Result<(), ComputeError> {
        self.register_block(row.block).await?;
        sqlx::query(
            "INSERT OR REPLACE INTO community_pool_events
                (block_height, block_time_unix_ms, balances)
             VALUES (?, ?, ?)",
        )
        .bind(row.block.height as i64)
        .bind(row.block.time_unix_ms as i64)
        .bind(&row.balances)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    pub async fn insert_extraction(&self, row: &ExtractionRow) -> Result<(), ComputeError> {
        self.register_block(row.block).await?;
        sqlx::query(
            "INSERT OR REPLACE INTO extractions
                (address, name, block_height, block_time_unix_ms, data)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&row.address)
        .bind(&row.name)
        .bind(row.block.height as i64)
        .bind(row.block.time_unix_ms as i64)
        .bind(&row.data)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    pub async fn insert_feegrant(&self, row: &FeegrantRow) -> Result<(), ComputeError> {
        self.register_block(row.block).await?;
        sqlx::query(
            "INSERT OR REPLACE INTO feegrant_allowances
                (granter, grantee, block_height, block_time_unix_ms, data, active)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&row.granter)
        .bind(&row.grantee)
        .bind(row.block.height as i64)
        .bind(row.block.time_unix_ms as i64)
        .bind(&row.data)
        .bind(row.active)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    pub async fn set_contract(&self, row: &ContractRow) -> Result<(), ComputeError> {
        sqlx::query("INSERT OR REPLACE INTO contracts (address, code_id, label) VALUES (?, ?, ?)")
            .bind(&row.address)
            .bind(row.code_id as i64)
            .bind(&row.label)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    pub async fn set_validator(&self, row: &ValidatorRow) -> Result<(), ComputeError> {
        sqlx::query("INSERT OR REPLACE INTO validators (operator_address, moniker) VALUES (?, ?)")
            .bind(&row.operator_address)
            .bind(&row.moniker)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    pub async fn set_state(&self, state: &StateRow) -> Result<(), ComputeError> {
        sqlx::query(
            "INSERT OR REPLACE INTO chain_state
                (id, chain_id, latest_block_height, latest_block_time_unix_ms)
             VALUES (1, ?, ?, ?)",
        )
        .bind(&state.chain_id)
        .bind(state.latest_block.height as i64)
        .bind(state.latest_block.time_unix_ms as i64)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        self.register_block(state.latest_block).await
    }

    // ─── Dependency-change queries ───────────────────────────────────────────

    /// The earliest change for one dependency strictly above `after`,
    /// optionally bounded by `up_to`. Each namespace maps to its table.
    async fn dep_change(
        &self,
        dep: &DependentKey,
        after: u64,
        up_to: Option<u64>,
    ) -> Result<Option<BlockInfo>, ComputeError> {
        let namespace = match dep.namespace() {
            Some(ns) => ns,
            None => return Ok(None),
        };
        let rest = dep
            .key
            .strip_prefix(namespace.as_str())
            .map(|rest| rest.strip_prefix(':').unwrap_or(rest))
            .unwrap_or("");
        let after = after as i64;
        let up_to = up_to.map(|h| h as i64).unwrap_or(i64::MAX);

        let row = match namespace {
            Namespace::WasmState => {
                let (contract, key) = split_subject(rest);
                if dep.prefix {
                    sqlx::query(
                        "SELECT block_height, block_time_unix_ms FROM wasm_state_events
                         WHERE contract_address = ? AND key LIKE ? ESCAPE '\\'
                           AND block_height > ? AND block_height <= ?
                         ORDER BY block_height LIMIT 1",
                    )
                    .bind(contract)
                    .bind(format!("{}%", escape_like(key)))
                    .bind(after)
                    .bind(up_to)
                    .fetch_optional(&self.pool)
                    .await
                } else {
                    sqlx::query(
                        "SELECT block_height, block_time_unix_ms FROM wasm_state_events
                         WHERE contract_address = ? AND key = ?
                           AND block_height > ? AND block_height <= ?
                         ORDER BY block_height LIMIT 1",
                    )
                    .bind(contract)
                    .bind(key)
                    .bind(after)
                    .bind(up_to)
                    .fetch_optional(&self.pool)
                    .await
                }
            }
            Namespace::WasmTransformation => {
                let (contract, name) = split_subject(rest);
                let mut pattern = glob_to_like(name);
                if dep.prefix {
                    pattern.push('%');
                }
                if contract == "*" {
                    sqlx::query(
                        "SELECT block_height, block_time_unix_ms FROM wasm_transformations
                         WHERE name LIKE ? ESCAPE '\\'
                           AND block_height > ? AND block_height <= ?
                         ORDER BY block_height LIMIT 1",
                    )
                    .bind(pattern)
                    .bind(after)
                    .bind(up_to)
                    .fetch_optional(&self.pool)
                    .await
                } else {
                    sqlx::query(
                        "SELECT block_height, block_time_unix_ms FROM wasm_transformations
                         WHERE contract_address = ? AND name LIKE ? ESCAPE '\\'
                           AND block_height > ? AND block_height <= ?
                         ORDER BY block_height LIMIT 1",
                    )
                    .bind(contract)
                    .bind(pattern)
                    .bind(after)
                    .bind(up_to)
                    .fetch_optional(&self.pool)
                    .await
                }
            }
            Namespace::WasmTx => {
                let (contract, _) = split_subject(rest);
                sqlx::query(
                    "SELECT block_height, block_time_unix_ms FROM wasm_tx_events
                     WHERE contract_address = ? AND block_height > ? AND block_height <= ?
                     ORDER BY block_height LIMIT 1",
                )
                .bind(contract)
                .bind(after)
                .bind(up_to)
                .fetch_optional(&self.pool)
                .await
            }
            Namespace::Bank => {
                // A snapshot update for the address or a matching history
                // row both count; take the earlier.
                let (address, denom) = split_subject(rest);
                let snapshot = sqlx::query(
                    "SELECT block_height, block_time_unix_ms FROM bank_balances
                     WHERE address = ? AND block_height > ? AND block_height <= ?",
                )
                .bind(address)
                .bind(after)
                .bind(up_to)
                .fetch_optional(&self.pool)
                .await
                .map_err(db_err)?;

                let history = if dep.prefix || denom.is_empty() {
                    sqlx::query(
                        "SELECT block_height, block_time_unix_ms FROM bank_state_events
                         WHERE address = ? AND block_height > ? AND block_height <= ?
                         ORDER BY block_height LIMIT 1",
                    )
                    .bind(address)
                    .bind(after)
                    .bind(up_to)
                    .fetch_optional(&self.pool)
                    .await
                } else {
                    sqlx::query(
                        "SELECT block_height, block_time_unix_ms FROM bank_state_events
                         WHERE address = ? AND denom = ? AND block_height > ? AND block_height <= ?
                         ORDER BY block_height LIMIT 1",
                    )
                    .bind(address)
                    .bind(denom)
                    .bind(after)
                    .bind(up_to)
                    .fetch_optional(&self.pool)
                    .await
                }
                .map_err(db_err)?;

                let earliest = [snapshot, history]
                    .into_iter()
                    .flatten()
                    .map(|row| block_from_row(&row))
                    .min_by_key(|block| block.height);
                return Ok(earliest);
            }
            Namespace::StakingSlash => {
                let (operator, _) = split_subject(rest);
                sqlx::query(
                    "SELECT registered_block_height AS block_height,
                            registered_block_time_unix_ms AS block_time_unix_ms
                     FROM staking_slash_events
                     WHERE operator_address = ?
                       AND registered_block_height > ? AND registered_block_height <= ?
                     ORDER BY registered_block_height LIMIT 1",
                )
                .bind(operator)
                .bind(after)
                .bind(up_to)
                .fetch_optional(&self.pool)
                .await
            }
            Namespace::GovProposal => {
                if rest.is_empty() {
                    sqlx::query(
                        "SELECT block_height, block_time_unix_ms FROM gov_proposals
                         WHERE block_height > ? AND block_height <= ?
                         ORDER BY block_height LIMIT 1",
                    )
                    .bind(after)
                    .bind(up_to)
                    .fetch_optional(&self.pool)
                    .await
                } else {
                    let id: i64 = rest.parse().unwrap_or(-1);
                    sqlx::query(
                        "SELECT block_height, block_time_unix_ms FROM gov_proposals
                         WHERE proposal_id = ? AND block_height > ? AND block_height <= ?
                         ORDER BY block_height LIMIT 1",
                    )
                    .bind(id)
                    .bind(after)
                    .bind(up_to)
                    .fetch_optional(&self.pool)
                    .await
                }
            }
            Namespace::GovVote => {
                let (id, voter) = split_subject(rest);
                if id.is_empty() {
                    sqlx::query(
                        "SELECT block_height, block_time_unix_ms FROM gov_votes
                         WHERE block_height > ? AND block_height <= ?
                         ORDER BY block_height LIMIT 1",
                    )
                    .bind(after)
                    .bind(up_to)
                    .fetch_optional(&self.pool)
                    .await
                } else if dep.prefix || voter.is_empty() {
                    sqlx::query(
                        "SELECT block_height, block_time_unix_ms FROM gov_votes
                         WHERE proposal_id = ? AND block_height > ? AND block_height <= ?
                         ORDER BY block_height LIMIT 1",
                    )
                    .bind(id.parse::<i64>().unwrap_or(-1))
                    .bind(after)
                    .bind(up_to)
                    .fetch_optional(&self.pool)
                    .await
                } else {
                    sqlx::query(
                        "SELECT block_height, block_time_unix_ms FROM gov_votes
                         WHERE proposal_id = ? AND voter = ?
                           AND block_height > ? AND block_height <= ?
                         ORDER BY block_height LIMIT 1",
                    )
                    .bind(id.parse::<i64>().unwrap_or(-1))
                    .bind(voter)
                    .bind(after)
                    .bind(up_to)
                    .fetch_optional(&self.pool)
                    .await
                }
            }
            Namespace::CommunityPool => {
                sqlx::query(
                    "SELECT block_height, block_time_unix_ms FROM community_pool_events
                     WHERE block_height > ? AND block_height <= ?
                     ORDER BY block_height LIMIT 1",
                )
                .bind(after)
                .bind(up_to)
                .fetch_optional(&self.pool)
                .await
            }
            Namespace::Extraction => {
                let (address, name) = split_subject(rest);
                sqlx::query(
                    "SELECT block_height, block_time_unix_ms FROM extractions
                     WHERE address = ? AND name = ? AND block_height > ? AND block_height <= ?
                     ORDER BY block_height LIMIT 1",
                )
                .bind(address)
                .bind(name)
                .bind(after)
                .bind(up_to)
                .fetch_optional(&self.pool)
                .await
            }
            Namespace::Feegrant => {
                // `*` is the "either side" sentinel: drop that constraint.
                let (granter, grantee) = split_subject(rest);
                let sql = match (granter == "*", grantee == "*") {
                    (true, true) => {
                        "SELECT block_height, block_time_unix_ms FROM feegrant_allowances
                         WHERE block_height > ?3 AND block_height <= ?4
                         ORDER BY block_height LIMIT 1"
                    }
                    (true, false) => {
                        "SELECT block_height, block_time_unix_ms FROM feegrant_allowances
                         WHERE grantee = ?2 AND block_height > ?3 AND block_height <= ?4
                         ORDER BY block_height LIMIT 1"
                    }
                    (false, true) => {
                        "SELECT block_height, block_time_unix_ms FROM feegrant_allowances
                         WHERE granter = ?1 AND block_height > ?3 AND block_height <= ?4
                         ORDER BY block_height LIMIT 1"
                    }
                    (false, false) => {
                        "SELECT block_height, block_time_unix_ms FROM feegrant_allowances
                         WHERE granter = ?1 AND grantee = ?2
                           AND block_height > ?3 AND block_height <= ?4
                         ORDER BY block_height LIMIT 1"
                    }
                };
                sqlx::query(sql)
                    .bind(granter)
                    .bind(grantee)
                    .bind(after)
                    .bind(up_to)
                    .fetch_optional(&self.pool)
                    .await
            }
        }
        .map_err(db_err)?;

        Ok(row.map(|row| block_from_row(&row)))
    }
}

fn split_subject(rest: &str) -> (&str, &str) {
    match rest.split_once(':') {
        Some((subject, detail)) => (subject, detail),
        None => (rest, ""),
    }
}

fn block_from_row(row: &sqlx::sqlite::SqliteRow) -> BlockInfo {
    BlockInfo::new(
        row.get::<i64, _>("block_height") as u64,
        row.get::<i64, _>("block_time_unix_ms") as u64,
    )
}

fn wasm_state_from_row(row: &sqlx::sqlite::SqliteRow) -> WasmStateRow {
    WasmStateRow {
        contract_address: row.get("contract_address"),
        key: row.get("key"),
        block: block_from_row(row),
        value: row.get("value"),
        deleted: row.get::<bool, _>("deleted"),
    }
}

fn transformation_from_row(row: &sqlx::sqlite::SqliteRow) -> TransformationRow {
    TransformationRow {
        contract_address: row.get("contract_address"),
        name: row.get("name"),
        block: block_from_row(row),
        value: row.get("value"),
    }
}

#[async_trait]
impl EventStore for SqliteStore {
    async fn wasm_state_latest(
        &self,
        contract: &str,
        key: &str,
        height: u64,
    ) -> Result<Option<WasmStateRow>, ComputeError> {
        let row = sqlx::query(
            "SELECT contract_address, key, block_height, block_time_unix_ms, value, deleted
             FROM wasm_state_events
             WHERE contract_address = ? AND key = ? AND block_height <= ?
             ORDER BY block_height DESC LIMIT 1",
        )
        .bind(contract)
        .bind(key)
        .bind(height as i64)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(row.map(|row| wasm_state_from_row(&row)))
    }

    async fn wasm_state_prefix(
        &self,
        contract: &str,
        key_prefix: &str,
        height: u64,
    ) -> Result<Vec<WasmStateRow>, ComputeError> {
        let rows = sqlx::query(
            "SELECT e.contract_address, e.key, e.block_height, e.block_time_unix_ms,
                    e.value, e.deleted
             FROM wasm_state_events e
             JOIN (SELECT key, MAX(block_height) AS max_height
                   FROM wasm_state_events
                   WHERE contract_address = ?1 AND key LIKE ?2 ESCAPE '\\'
                     AND block_height <= ?3
                   GROUP BY key) latest
               ON e.key = latest.key AND e.block_height = latest.max_height
             WHERE e.contract_address = ?1
             ORDER BY e.key",
        )
        .bind(contract)
        .bind(format!("{}%", escape_like(key_prefix)))
        .bind(height as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(rows.iter().map(wasm_state_from_row).collect())
    }

    async fn wasm_state_first(
        &self,
        contract: &str,
        key: &str,
    ) -> Result<Option<WasmStateRow>, ComputeError> {
        let row = sqlx::query(
            "SELECT contract_address, key, block_height, block_time_unix_ms, value, deleted
             FROM wasm_state_events
             WHERE contract_address = ? AND key = ? AND deleted = 0
             ORDER BY block_height ASC LIMIT 1",
        )
        .bind(contract)
        .bind(key)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(row.map(|row| wasm_state_from_row(&row)))
    }

    async fn wasm_state_ascending(
        &self,
        contract: &str,
        key: &str,
        height: u64,
    ) -> Result<Vec<WasmStateRow>, ComputeError> {
        let rows = sqlx::query(
            "SELECT contract_address, key, block_height, block_time_unix_ms, value, deleted
             FROM wasm_state_events
             WHERE contract_address = ? AND key = ? AND block_height <= ?
             ORDER BY block_height ASC",
        )
        .bind(contract)
        .bind(key)
        .bind(height as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(rows.iter().map(wasm_state_from_row).collect())
    }

    async fn transformation_latest(
        &self,
        contract: &str,
        name: &str,
        height: u64,
    ) -> Result<Option<TransformationRow>, ComputeError> {
        let row = sqlx::query(
            "SELECT contract_address, name, block_height, block_time_unix_ms, value
             FROM wasm_transformations
             WHERE contract_address = ? AND name = ? AND block_height <= ?
             ORDER BY block_height DESC LIMIT 1",
        )
        .bind(contract)
        .bind(name)
        .bind(height as i64)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(row.map(|row| transformation_from_row(&row)))
    }

    async fn transformation_matches(
        &self,
        contract: Option<&str>,
        name_glob: &str,
        height: u64,
        limit: Option<u64>,
    ) -> Result<Vec<TransformationRow>, ComputeError> {
        let rows = sqlx::query(
            "SELECT t.contract_address, t.name, t.block_height, t.block_time_unix_ms, t.value
             FROM wasm_transformations t
             JOIN (SELECT contract_address, name, MAX(block_height) AS max_height
                   FROM wasm_transformations
                   WHERE (?1 IS NULL OR contract_address = ?1)
                     AND name LIKE ?2 ESCAPE '\\' AND block_height <= ?3
                   GROUP BY contract_address, name) latest
               ON t.contract_address = latest.contract_address
              AND t.name = latest.name AND t.block_height = latest.max_height
             ORDER BY t.contract_address, t.name
             LIMIT ?4",
        )
        .bind(contract)
        .bind(glob_to_like(name_glob))
        .bind(height as i64)
        .bind(limit.map(|l| l as i64).unwrap_or(-1))
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(rows.iter().map(transformation_from_row).collect())
    }

    async fn transformation_prefix(
        &self,
        contract: &str,
        name_prefix: &str,
        height: u64,
    ) -> Result<Vec<TransformationRow>, ComputeError> {
        let rows = sqlx::query(
            "SELECT t.contract_address, t.name, t.block_height, t.block_time_unix_ms, t.value
             FROM wasm_transformations t
             JOIN (SELECT name, MAX(block_height) AS max_height
                   FROM wasm_transformations
                   WHERE contract_address = ?1 AND name LIKE ?2 ESCAPE '\\'
                     AND block_height <= ?3
                   GROUP BY name) latest
               ON t.name = latest.name AND t.block_height = latest.max_height
             WHERE t.contract_address = ?1
             ORDER BY t.name",
        )
        .bind(contract)
        .bind(format!("{}%", escape_like(name_prefix)))
        .bind(height as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(rows.iter().map(transformation_from_row).collect())
    }

    async fn transformation_first(
        &self,
        contract: &str,
        name_glob: &str,
    ) -> Result<Option<TransformationRow>, ComputeError> {
        let row = sqlx::query(
            "SELECT contract_address, name, block_height, block_time_unix_ms, value
             FROM wasm_transformations
             WHERE contract_address = ? AND name LIKE ? ESCAPE '\\'
             ORDER BY block_height ASC LIMIT 1",
        )
        .bind(contract)
        .bind(glob_to_like(name_glob))
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(row.map(|row| transformation_from_row(&row)))
    }

    async fn wasm_txs(
        &self,
        contract: &str,
        height: u64,
        limit: Option<u64>,
    ) -> Result<Vec<WasmTxRow>, ComputeError> {
        let rows = sqlx::query(
            "SELECT contract_address, block_height, block_time_unix_ms, action, sender, msg
             FROM wasm_tx_events
             WHERE contract_address = ? AND block_height <= ?
             ORDER BY block_height DESC
             LIMIT ?",
        )
        .bind(contract)
        .bind(height as i64)
        .bind(limit.map(|l| l as i64).unwrap_or(-1))
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(rows
            .iter()
            .map(|row| WasmTxRow {
                contract_address: row.get("contract_address"),
                block: block_from_row(row),
                action: row.get("action"),
                sender: row.get("sender"),
                msg: row.get("msg"),
            })
            .collect())
    }

    async fn bank_balance(
        &self,
        address: &str,
        height: u64,
    ) -> Result<Option<BankBalanceRow>, ComputeError> {
        let row = sqlx::query(
            "SELECT address, block_height, block_time_unix_ms, balances
             FROM bank_balances WHERE address = ? AND block_height <= ?",
        )
        .bind(address)
        .bind(height as i64)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(row.map(|row| BankBalanceRow {
            address: row.get("address"),
            block: block_from_row(&row),
            balances: row.get("balances"),
        }))
    }

    async fn bank_state_latest(
        &self,
        address: &str,
        denom: &str,
        height: u64,
    ) -> Result<Option<BankStateRow>, ComputeError> {
        let row = sqlx::query(
            "SELECT address, denom, block_height, block_time_unix_ms, balance
             FROM bank_state_events
             WHERE address = ? AND denom = ? AND block_height <= ?
             ORDER BY block_height DESC LIMIT 1",
        )
        .bind(address)
        .bind(denom)
        .bind(height as i64)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(row.map(|row| BankStateRow {
            address: row.get("address"),
            denom: row.get("denom"),
            block: block_from_row(&row),
            balance: row.get("balance"),
        }))
    }

    async fn bank_state_prefix(
        &self,
        address: &str,
        height: u64,
    ) -> Result<Vec<BankStateRow>, ComputeError> {
        let rows = sqlx::query(
            "SELECT e.address, e.denom, e.block_height, e.block_time_unix_ms, e.balance
             FROM bank_state_events e
             JOIN (SELECT denom, MAX(block_height) AS max_height
                   FROM bank_state_events
                   WHERE address = ?1 AND block_height <= ?2
                   GROUP BY denom) latest
               ON e.denom = latest.denom AND e.block_height = latest.max_height
             WHERE e.address = ?1
             ORDER BY e.denom",
        )
        .bind(address)
        .bind(height as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(rows
            .iter()
            .map(|row| BankStateRow {
                address: row.get("address"),
                denom: row.get("denom"),
                block: block_from_row(row),
                balance: row.get("balance"),
            })
            .collect())
    }

    async fn slash_events(
        &self,
        operator: &str,
        height: u64,
    ) -> Result<Vec<SlashRow>, ComputeError> {
        let rows = sqlx::query(
            "SELECT operator_address, registered_block_height, registered_block_time_unix_ms,
                    infraction_block_height, amount_slashed
             FROM staking_slash_events
             WHERE operator_address = ? AND registered_block_height <= ?
             ORDER BY registered_block_height DESC",
        )
        .bind(operator)
        .bind(height as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(rows
            .iter()
            .map(|row| SlashRow {
                operator_address: row.get("operator_address"),
                registered_block: BlockInfo::new(
                    row.get::<i64, _>("registered_block_height") as u64,
                    row.get::<i64, _>("registered_block_time_unix_ms") as u64,
                ),
                infraction_block_height: row.get::<i64, _>("infraction_block_height") as u64,
                amount_slashed: row.get("amount_slashed"),
            })
            .collect())
    }

    async fn gov_proposal(
        &self,
        proposal_id: u64,
        height: u64,
    ) -> Result<Option<ProposalRow>, ComputeError> {
        let row = sqlx::query(
            "SELECT proposal_id, block_height, block_time_unix_ms, data
             FROM gov_proposals
             WHERE proposal_id = ? AND block_height <= ?
             ORDER BY block_height DESC LIMIT 1",
        )
        .bind(proposal_id as i64)
        .bind(height as i64)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(row.map(|row| ProposalRow {
            proposal_id: row.get::<i64, _>("proposal_id") as u64,
            block: block_from_row(&row),
            data: row.get("data"),
        }))
    }

    async fn gov_proposal_ids(
        &self,
        height: u64,
        ascending: bool,
        limit: Option<u64>,
        offset: u64,
    ) -> Result<Vec<u64>, ComputeError> {
        let sql = if ascending {
            "SELECT DISTINCT proposal_id FROM gov_proposals
             WHERE block_height <= ? ORDER BY proposal_id ASC LIMIT ? OFFSET ?"
        } else {
            "SELECT DISTINCT proposal_id FROM gov_proposals
             WHERE block_height <= ? ORDER BY proposal_id DESC LIMIT ? OFFSET ?"
        };
        let rows = sqlx::query(sql)
            .bind(height as i64)
            .bind(limit.map(|l| l as i64).unwrap_or(-1))
            .bind(offset as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(rows
            .iter()
            .map(|row| row.get::<i64, _>("proposal_id") as u64)
            .collect())
    }

    async fn gov_proposals_by_ids(
        &self,
        ids: &[u64],
        height: u64,
    ) -> Result<Vec<ProposalRow>, ComputeError> {
        let mut rows = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(row) = self.gov_proposal(*id, height).await? {
                rows.push(row);
            }
        }
        Ok(rows)
    }

    async fn gov_proposal_count(&self, height: u64) -> Result<u64, ComputeError> {
        let row = sqlx::query(
            "SELECT COUNT(DISTINCT proposal_id) AS cnt FROM gov_proposals
             WHERE block_height <= ?",
        )
        .bind(height as i64)
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(row.get::<i64, _>("cnt") as u64)
    }

    async fn gov_vote(
        &self,
        proposal_id: u64,
        voter: &str,
        height: u64,
    ) -> Result<Option<VoteRow>, ComputeError> {
        let row = sqlx::query(
            "SELECT proposal_id, voter, block_height, block_time_unix_ms, data
             FROM gov_votes
             WHERE proposal_id = ? AND voter = ? AND block_height <= ?
             ORDER BY block_height DESC LIMIT 1",
        )
        .bind(proposal_id as i64)
        .bind(voter)
        .bind(height as i64)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(row.map(|row| VoteRow {
            proposal_id: row.get::<i64, _>("proposal_id") as u64,
            voter: row.get("voter"),
            block: block_from_row(&row),
            data: row.get("data"),
        }))
    }

    async fn gov_votes(
        &self,
        proposal_id: u64,
        height: u64,
        ascending: bool,
        limit: Option<u64>,
        offset: u64,
    ) -> Result<Vec<VoteRow>, ComputeError> {
        // Distinct-on voter first, then height order with a stable
        // (voter, proposal) tie-break.
        let sql = if ascending {
            "SELECT v.proposal_id, v.voter, v.block_height, v.block_time_unix_ms, v.data
             FROM gov_votes v
             JOIN (SELECT voter, MAX(block_height) AS max_height
                   FROM gov_votes WHERE proposal_id = ?1 AND block_height <= ?2
                   GROUP BY voter) latest
               ON v.voter = latest.voter AND v.block_height = latest.max_height
             WHERE v.proposal_id = ?1
             ORDER BY v.block_height ASC, v.voter ASC, v.proposal_id ASC
             LIMIT ?3 OFFSET ?4"
        } else {
            "SELECT v.proposal_id, v.voter, v.block_height, v.block_time_unix_ms, v.data
             FROM gov_votes v
             JOIN (SELECT voter, MAX(block_height) AS max_height
                   FROM gov_votes WHERE proposal_id = ?1 AND block_height <= ?2
                   GROUP BY voter) latest
               ON v.voter = latest.voter AND v.block_height = latest.max_height
             WHERE v.proposal_id = ?1
             ORDER BY v.block_height DESC, v.voter ASC, v.proposal_id ASC
             LIMIT ?3 OFFSET ?4"
        };
        let rows = sqlx::query(sql)
            .bind(proposal_id as i64)
            .bind(height as i64)
            .bind(limit.map(|l| l as i64).unwrap_or(-1))
            .bind(offset as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(rows
            .iter()
            .map(|row| VoteRow {
                proposal_id: row.get::<i64, _>("proposal_id") as u64,
                voter: row.get("voter"),
                block: block_from_row(row),
                data: row.get("data"),
            })
            .collect())
    }

    async fn gov_vote_count(&self, proposal_id: u64, height: u64) -> Result<u64, ComputeError> {
        let row = sqlx::query(
            "SELECT COUNT(DISTINCT voter) AS cnt FROM gov_votes
             WHERE proposal_id = ? AND block_height <= ?",
        )
        .bind(proposal_id as i64)
        .bind(height as i64)
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(row.get::<i64, _>("cnt") as u64)
    }

    async fn community_pool(
        &self,
        height: u64,
    ) -> Result<Option<CommunityPoolRow>, ComputeError> {
        let row = sqlx::query(
            "SELECT block_height, block_time_unix_ms, balances FROM community_pool_events
             WHERE block_height <= ? ORDER BY block_height DESC LIMIT 1",
        )
        .bind(height as i64)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(row.map(|row| CommunityPoolRow {
            block: block_from_row(&row),
            balances: row.get("balances"),
        }))
    }

    async fn extraction(
        &self,
        address: &str,
        name: &str,
        height: u64,
    ) -> Result<Option<ExtractionRow>, ComputeError> {
        let row = sqlx::query(
            "SELECT address, name, block_height, block_time_unix_ms, data FROM extractions
             WHERE address = ? AND name = ? AND block_height <= ?
             ORDER BY block_height DESC LIMIT 1",
        )
        .bind(address)
        .bind(name)
        .bind(height as i64)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(row.map(|row| ExtractionRow {
            address: row.get("address"),
            name: row.get("name"),
            block: block_from_row(&row),
            data: row.get("data"),
        }))
    }

    async fn feegrant_allowance(
        &self,
        granter: &str,
        grantee: &str,
        height: u64,
    ) -> Result<Option<FeegrantRow>, ComputeError> {
        let row = sqlx::query(
            "SELECT granter, grantee, block_height, block_time_unix_ms, data, active
             FROM feegrant_allowances
             WHERE granter = ? AND grantee = ? AND block_height <= ?
             ORDER BY block_height DESC LIMIT 1",
        )
        .bind(granter)
        .bind(grantee)
        .bind(height as i64)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(row.map(|row| FeegrantRow {
            granter: row.get("granter"),
            grantee: row.get("grantee"),
            block: block_from_row(&row),
            data: row.get("data"),
            active: row.get::<bool, _>("active"),
        }))
    }

    async fn feegrant_allowances(
        &self,
        address: &str,
        side: FeegrantSide,
        height: u64,
    ) -> Result<Vec<FeegrantRow>, ComputeError> {
        let sql = match side {
            FeegrantSide::Granted => {
                "SELECT f.granter, f.grantee, f.block_height, f.block_time_unix_ms,
                        f.data, f.active
                 FROM feegrant_allowances f
                 JOIN (SELECT granter, grantee, MAX(block_height) AS max_height
                       FROM feegrant_allowances
                       WHERE granter = ?1 AND block_height <= ?2
                       GROUP BY granter, grantee) latest
                   ON f.granter = latest.granter AND f.grantee = latest.grantee
                  AND f.block_height = latest.max_height
                 ORDER BY f.granter, f.grantee"
            }
            FeegrantSide::Received => {
                "SELECT f.granter, f.grantee, f.block_height, f.block_time_unix_ms,
                        f.data, f.active
                 FROM feegrant_allowances f
                 JOIN (SELECT granter, grantee, MAX(block_height) AS max_height
                       FROM feegrant_allowances
                       WHERE grantee = ?1 AND block_height <= ?2
                       GROUP BY granter, grantee) latest
                   ON f.granter = latest.granter AND f.grantee = latest.grantee
                  AND f.block_height = latest.max_height
                 ORDER BY f.granter, f.grantee"
            }
        };
        let rows = sqlx::query(sql)
            .bind(address)
            .bind(height as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(rows
            .iter()
            .map(|row| FeegrantRow {
                granter: row.get("granter"),
                grantee: row.get("grantee"),
                block: block_from_row(row),
                data: row.get("data"),
                active: row.get::<bool, _>("active"),
            })
            .collect())
    }

    async fn contract(&self, address: &str) -> Result<Option<ContractRow>, ComputeError> {
        let row = sqlx::query("SELECT address, code_id, label FROM contracts WHERE address = ?")
            .bind(address)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(row.map(|row| ContractRow {
            address: row.get("address"),
            code_id: row.get::<i64, _>("code_id") as u64,
            label: row.get("label"),
        }))
    }

    async fn validator(&self, operator: &str) -> Result<Option<ValidatorRow>, ComputeError> {
        let row = sqlx::query(
            "SELECT operator_address, moniker FROM validators WHERE operator_address = ?",
        )
        .bind(operator)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(row.map(|row| ValidatorRow {
            operator_address: row.get("operator_address"),
            moniker: row.get("moniker"),
        }))
    }

    async fn state(&self) -> Result<Option<StateRow>, ComputeError> {
        let row = sqlx::query(
            "SELECT chain_id, latest_block_height, latest_block_time_unix_ms
             FROM chain_state WHERE id = 1",
        )
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(row.map(|row| StateRow {
            chain_id: row.get("chain_id"),
            latest_block: BlockInfo::new(
                row.get::<i64, _>("latest_block_height") as u64,
                row.get::<i64, _>("latest_block_time_unix_ms") as u64,
            ),
        }))
    }

    async fn block_at_or_before(&self, height: u64) -> Result<Option<BlockInfo>, ComputeError> {
        let row = sqlx::query(
            "SELECT height, time_unix_ms FROM blocks
             WHERE height <= ? ORDER BY height DESC LIMIT 1",
        )
        .bind(height as i64)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(row.map(|row| {
            BlockInfo::new(
                row.get::<i64, _>("height") as u64,
                row.get::<i64, _>("time_unix_ms") as u64,
            )
        }))
    }

    async fn block_at_or_before_time(
        &self,
        time_unix_ms: u64,
    ) -> Result<Option<BlockInfo>, ComputeError> {
        let row = sqlx::query(
            "SELECT height, time_unix_ms FROM blocks
             WHERE time_unix_ms <= ? ORDER BY time_unix_ms DESC LIMIT 1",
        )
        .bind(time_unix_ms as i64)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(row.map(|row| {
            BlockInfo::new(
                row.get::<i64, _>("height") as u64,
                row.get::<i64, _>("time_unix_ms") as u64,
            )
        }))
    }

    async fn first_block_at_or_after_time(
        &self,
        time_unix_ms: u64,
    ) -> Result<Option<BlockInfo>, ComputeError> {
        let row = sqlx::query(
            "SELECT height, time_unix_ms FROM blocks
             WHERE time_unix_ms >= ? ORDER BY time_unix_ms ASC LIMIT 1",
        )
        .bind(time_unix_ms as i64)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(row.map(|row| {
            BlockInfo::new(
                row.get::<i64, _>("height") as u64,
                row.get::<i64, _>("time_unix_ms") as u64,
            )
        }))
    }

    async fn has_dependency_change(
        &self,
        deps: &[DependentKey],
        after: u64,
        up_to: u64,
    ) -> Result<bool, ComputeError> {
        for dep in deps {
            if self.dep_change(dep, after, Some(up_to)).await?.is_some() {
                return Ok(true);
            }
        }
        Ok(false)
    }

    async fn next_dependency_change(
        &self,
        deps: &[DependentKey],
        after: u64,
    ) -> Result<Option<BlockInfo>, ComputeError> {
        let mut earliest: Option<BlockInfo> = None;
        for dep in deps {
            if let Some(change) = self.dep_change(dep, after, None).await? {
                if earliest.is_none_or(|block| change.height < block.height) {
                    earliest = Some(change);
                }
            }
        }
        Ok(earliest)
    }

    async fn raw_query(
        &self,
        sql: &str,
        binds: &[Value],
    ) -> Result<Vec<Value>, ComputeError> {
        let mut query = sqlx::query(sql);
        for bind in binds {
            query = match bind {
                Value::Null => query.bind(Option::<String>::None),
                Value::Bool(b) => query.bind(*b),
                Value::Number(n) => {
                    if let Some(i) = n.as_i64() {
                        query.bind(i)
                    } else {
                        query.bind(n.as_f64().unwrap_or(0.0))
                    }
                }
                Value::String(s) => query.bind(s.clone()),
                other => query.bind(other.to_string()),
            };
        }
        let rows = query.fetch_all(&self.pool).await.map_err(db_err)?;
        Ok(rows
            .iter()
            .map(|row| {
                let mut object = serde_json::Map::new();
                for (index, column) in row.columns().iter().enumerate() {
                    let value = if let Ok(v) = row.try_get::<Option<i64>, _>(index) {
                        v.map(Value::from).unwrap_or(Value::Null)
                    } else if let Ok(v) = row.try_get::<Option<f64>, _>(index) {
                        v.map(Value::from).unwrap_or(Value::Null)
                    } else if let Ok(v) = row.try_get::<Option<String>, _>(index) {
                        v.map(Value::from).unwrap_or(Value::Null)
                    } else {
                        Value::Null
                    };
                    object.insert(column.name().to_string(), value);
                }
                Value::Object(object)
            })
            .collect())
    }
}

#[async_trait]
impl ComputationStore for SqliteStore {
    async fn computation_at_or_below(
        &self,
        target_address: &str,
        formula: &str,
        args: &str,
        height: u64,
    ) -> Result<Option<Computation>, ComputeError> {
        let row = sqlx::query(
            "SELECT id, target_address, formula, args, block_height, block_time_unix_ms,
                    value, latest_block_height_valid
             FROM computations
             WHERE target_address = ? AND formula = ? AND args = ? AND block_height <= ?
             ORDER BY block_height DESC LIMIT 1",
        )
        .bind(target_address)
        .bind(formula)
        .bind(args)
        .bind(height as i64)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;
        match row {
            None => Ok(None),
            Some(row) => Ok(Some(self.computation_from_row(&row).await?)),
        }
    }

    async fn computations_in_range(
        &self,
        target_address: &str,
        formula: &str,
        args: &str,
        after: u64,
        up_to: u64,
    ) -> Result<Vec<Computation>, ComputeError> {
        let rows = sqlx::query(
            "SELECT id, target_address, formula, args, block_height, block_time_unix_ms,
                    value, latest_block_height_valid
             FROM computations
             WHERE target_address = ? AND formula = ? AND args = ?
               AND block_height > ? AND block_height <= ?
             ORDER BY block_height ASC",
        )
        .bind(target_address)
        .bind(formula)
        .bind(args)
        .bind(after as i64)
        .bind(up_to as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        let mut computations = Vec::with_capacity(rows.len());
        for row in &rows {
            computations.push(self.computation_from_row(row).await?);
        }
        Ok(computations)
    }

    async fn upsert_computation(&self, computation: &Computation) -> Result<(), ComputeError> {
        sqlx::query(
            "INSERT INTO computations
                (target_address, formula, args, block_height, block_time_unix_ms,
                 value, latest_block_height_valid)
             VALUES (?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT (target_address, formula, args, block_height)
             DO UPDATE SET
                value = excluded.value,
                block_time_unix_ms = excluded.block_time_unix_ms,
                latest_block_height_valid = excluded.latest_block_height_valid",
        )
        .bind(&computation.target_address)
        .bind(&computation.formula)
        .bind(&computation.args)
        .bind(computation.block.height as i64)
        .bind(computation.block.time_unix_ms as i64)
        .bind(computation.value.as_ref().map(|v| v.to_string()))
        .bind(computation.latest_block_height_valid as i64)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        let row = sqlx::query(
            "SELECT id FROM computations
             WHERE target_address = ? AND formula = ? AND args = ? AND block_height = ?",
        )
        .bind(&computation.target_address)
        .bind(&computation.formula)
        .bind(&computation.args)
        .bind(computation.block.height as i64)
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)?;
        let id: i64 = row.get("id");

        for table in ["computation_event_deps", "computation_transformation_deps"] {
            sqlx::query(&format!("DELETE FROM {table} WHERE computation_id = ?"))
                .bind(id)
                .execute(&self.pool)
                .await
                .map_err(db_err)?;
        }
        for (table, deps) in [
            ("computation_event_deps", &computation.dependent_events),
            (
                "computation_transformation_deps",
                &computation.dependent_transformations,
            ),
        ] {
            for dep in deps {
                sqlx::query(&format!(
                    "INSERT INTO {table} (computation_id, key, is_prefix) VALUES (?, ?, ?)"
                ))
                .bind(id)
                .bind(&dep.key)
                .bind(dep.prefix)
                .execute(&self.pool)
                .await
                .map_err(db_err)?;
            }
        }
        debug!(
            formula = %computation.formula,
            address = %computation.target_address,
            height = computation.block.height,
            "computation stored"
        );
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
        sqlx::query(
            "UPDATE computations SET latest_block_height_valid = ?
             WHERE target_address = ? AND formula = ? AND args = ? AND block_height = ?",
        )
        .bind(latest_block_height_valid as i64)
        .bind(target_address)
        .bind(formula)
        .bind(args)
        .bind(height as i64)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }
}

impl SqliteStore {
    async fn computation_from_row(
        &self,
        row: &sqlx::sqlite::SqliteRow,
    ) -> Result<Computation, ComputeError> {
        let id: i64 = row.get("id");
        let mut deps_by_table = Vec::with_capacity(2);
        for table in ["computation_event_deps", "computation_transformation_deps"] {
            let rows = sqlx::query(&format!(
                "SELECT key, is_prefix FROM {table} WHERE computation_id = ? ORDER BY key"
            ))
            .bind(id)
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
            deps_by_table.push(
                rows.iter()
                    .map(|row| DependentKey {
                        key: row.get("key"),
                        prefix: row.get::<bool, _>("is_prefix"),
                    })
                    .collect::<Vec<_>>(),
            );
        }
        let dependent_transformations = deps_by_table.pop().unwrap_or_default();
        let dependent_events = deps_by_table.pop().unwrap_or_default();

        let value: Option<String> = row.get("value");
        Ok(Computation {
            target_address: row.get("target_address"),
            formula: row.get("formula"),
            args: row.get("args"),
            block: block_from_row(row),
            value: match value {
                None => None,
                Some(text) => Some(serde_json::from_str(&text).map_err(db_err)?),
            },
            dependent_events,
            dependent_transformations,
            latest_block_height_valid: row.get::<i64, _>("latest_block_height_valid") as u64,
        })
    }
}
