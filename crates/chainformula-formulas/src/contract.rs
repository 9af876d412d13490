//! Contract formulas: cw20 token state, DAO views, and generic items.

use async_trait::async_trait;
use serde_json::{json, Value};

use chainformula_core::env::{Environment, TransformationMatchOptions};
use chainformula_core::error::ComputeError;
use chainformula_core::keys::MapKeyType;
use chainformula_core::registry::{Formula, FormulaType};

/// The parsed `token_info` item of a cw20 contract.
pub struct Cw20TokenInfo;

#[async_trait]
impl Formula for Cw20TokenInfo {
    fn formula_type(&self) -> FormulaType {
        FormulaType::Contract
    }
    fn name(&self) -> &str {
        "cw20/tokenInfo"
    }
    async fn compute(&self, env: &Environment) -> Result<Option<Value>, ComputeError> {
        env.get(env.target_address(), &["token_info".into()]).await
    }
}

/// The cw20 balance of one address (`address` argument). Missing balance
/// entries read as `"0"`, matching on-chain query behaviour.
pub struct Cw20Balance;

#[async_trait]
impl Formula for Cw20Balance {
    fn formula_type(&self) -> FormulaType {
        FormulaType::Contract
    }
    fn name(&self) -> &str {
        "cw20/balance"
    }
    async fn compute(&self, env: &Environment) -> Result<Option<Value>, ComputeError> {
        let address = env.require_arg_str("address")?;
        let balance = env
            .get(
                env.target_address(),
                &["balance".into(), address.as_str().into()],
            )
            .await?;
        Ok(Some(balance.unwrap_or_else(|| json!("0"))))
    }
}

/// Total supply from `token_info`. A cw20 contract without it is a
/// formula failure, not an absent value.
pub struct Cw20TotalSupply;

#[async_trait]
impl Formula for Cw20TotalSupply {
    fn formula_type(&self) -> FormulaType {
        FormulaType::Contract
    }
    fn name(&self) -> &str {
        "cw20/totalSupply"
    }
    async fn compute(&self, env: &Environment) -> Result<Option<Value>, ComputeError> {
        let info = env
            .get(env.target_address(), &["token_info".into()])
            .await?
            .ok_or_else(|| ComputeError::Formula("no token_info on contract".into()))?;
        Ok(info.get("total_supply").cloned())
    }
}

/// All cw20 balances keyed by holder address.
pub struct Cw20AllBalances;

#[async_trait]
impl Formula for Cw20AllBalances {
    fn formula_type(&self) -> FormulaType {
        FormulaType::Contract
    }
    fn name(&self) -> &str {
        "cw20/allBalances"
    }
    async fn compute(&self, env: &Environment) -> Result<Option<Value>, ComputeError> {
        let balances = env
            .get_map(env.target_address(), &["balance".into()], MapKeyType::Str)
            .await?;
        Ok(balances.map(|map| json!(map)))
    }
}

/// A raw state item by key (`key` argument).
pub struct StateItem;

#[async_trait]
impl Formula for StateItem {
    fn formula_type(&self) -> FormulaType {
        FormulaType::Contract
    }
    fn name(&self) -> &str {
        "item"
    }
    async fn compute(&self, env: &Environment) -> Result<Option<Value>, ComputeError> {
        let key = env.require_arg_str("key")?;
        env.get(env.target_address(), &[key.as_str().into()]).await
    }
}

const DAO_CODE_ID_KEYS: &[&str] = &["dao-core"];

fn dao_code_id_keys() -> Vec<String> {
    DAO_CODE_ID_KEYS.iter().map(|s| s.to_string()).collect()
}

/// DAO config via its transformation, restricted to dao-core contracts.
pub struct DaoConfig {
    code_id_keys: Vec<String>,
}

impl DaoConfig {
    pub fn new() -> Self {
        Self {
            code_id_keys: dao_code_id_keys(),
        }
    }
}

impl Default for DaoConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Formula for DaoConfig {
    fn formula_type(&self) -> FormulaType {
        FormulaType::Contract
    }
    fn name(&self) -> &str {
        "dao/config"
    }
    fn code_id_keys(&self) -> Option<&[String]> {
        Some(&self.code_id_keys)
    }
    async fn compute(&self, env: &Environment) -> Result<Option<Value>, ComputeError> {
        Ok(env
            .get_transformation_match(
                env.target_address(),
                "config",
                TransformationMatchOptions::default(),
            )
            .await?
            .map(|m| m.value))
    }
}

/// Member voting weights from the `member:` transformation family.
pub struct DaoMembers;

#[async_trait]
impl Formula for DaoMembers {
    fn formula_type(&self) -> FormulaType {
        FormulaType::Contract
    }
    fn name(&self) -> &str {
        "dao/members"
    }
    async fn compute(&self, env: &Environment) -> Result<Option<Value>, ComputeError> {
        let members = env
            .get_transformation_map(env.target_address(), "member")
            .await?;
        Ok(members.map(|map| json!(map)))
    }
}

/// Number of transactions ever executed against the contract.
pub struct TxCount;

#[async_trait]
impl Formula for TxCount {
    fn formula_type(&self) -> FormulaType {
        FormulaType::Contract
    }
    fn name(&self) -> &str {
        "txCount"
    }
    async fn compute(&self, env: &Environment) -> Result<Option<Value>, ComputeError> {
        let txs = env.get_tx_events(env.target_address(), None, None).await?;
        Ok(Some(json!(txs.len())))
    }
}

/// The time the contract was first picked up by a transformer.
pub struct FirstTransformedAt;

#[async_trait]
impl Formula for FirstTransformedAt {
    fn formula_type(&self) -> FormulaType {
        FormulaType::Contract
    }
    fn name(&self) -> &str {
        "firstTransformedAt"
    }
    async fn compute(&self, env: &Environment) -> Result<Option<Value>, ComputeError> {
        Ok(env
            .get_date_first_transformed(env.target_address(), "*")
            .await?
            .map(|ms| json!(ms)))
    }
}
