//! Account formulas: balances and fee grants.

use async_trait::async_trait;
use serde_json::{json, Value};

use chainformula_core::env::Environment;
use chainformula_core::error::ComputeError;
use chainformula_core::registry::{Formula, FormulaType};
use chainformula_core::store::FeegrantSide;

/// All denom balances of an account.
pub struct Balances;

#[async_trait]
impl Formula for Balances {
    fn formula_type(&self) -> FormulaType {
        FormulaType::Account
    }
    fn name(&self) -> &str {
        "bank/balances"
    }
    async fn compute(&self, env: &Environment) -> Result<Option<Value>, ComputeError> {
        let balances = env.get_balances(env.target_address()).await?;
        Ok(balances.map(|map| json!(map)))
    }
}

/// The balance of one denom (`denom` argument).
pub struct Balance;

#[async_trait]
impl Formula for Balance {
    fn formula_type(&self) -> FormulaType {
        FormulaType::Account
    }
    fn name(&self) -> &str {
        "bank/balance"
    }
    async fn compute(&self, env: &Environment) -> Result<Option<Value>, ComputeError> {
        let denom = env.require_arg_str("denom")?;
        Ok(env
            .get_balance(env.target_address(), &denom)
            .await?
            .map(|amount| json!(amount)))
    }
}

/// Fee grants where the account is the granter.
pub struct FeegrantsGranted;

#[async_trait]
impl Formula for FeegrantsGranted {
    fn formula_type(&self) -> FormulaType {
        FormulaType::Account
    }
    fn name(&self) -> &str {
        "feegrant/granted"
    }
    async fn compute(&self, env: &Environment) -> Result<Option<Value>, ComputeError> {
        let grants = env
            .get_feegrant_allowances(env.target_address(), FeegrantSide::Granted)
            .await?;
        Ok(Some(json!(grants)))
    }
}

/// Fee grants where the account is the grantee.
pub struct FeegrantsReceived;

#[async_trait]
impl Formula for FeegrantsReceived {
    fn formula_type(&self) -> FormulaType {
        FormulaType::Account
    }
    fn name(&self) -> &str {
        "feegrant/received"
    }
    async fn compute(&self, env: &Environment) -> Result<Option<Value>, ComputeError> {
        let grants = env
            .get_feegrant_allowances(env.target_address(), FeegrantSide::Received)
            .await?;
        Ok(Some(json!(grants)))
    }
}

/// Whether an active allowance exists toward a grantee (`grantee` argument).
pub struct HasFeegrant;

#[async_trait]
impl Formula for HasFeegrant {
    fn formula_type(&self) -> FormulaType {
        FormulaType::Account
    }
    fn name(&self) -> &str {
        "feegrant/has"
    }
    async fn compute(&self, env: &Environment) -> Result<Option<Value>, ComputeError> {
        let grantee = env.require_arg_str("grantee")?;
        let active = env
            .has_feegrant_allowance(env.target_address(), &grantee)
            .await?;
        Ok(Some(json!(active)))
    }
}
