//! Validator formulas.

use async_trait::async_trait;
use serde_json::{json, Value};

use chainformula_core::env::Environment;
use chainformula_core::error::ComputeError;
use chainformula_core::registry::{Formula, FormulaType};

/// Slash events registered against the validator, most recent first.
pub struct Slashes;

#[async_trait]
impl Formula for Slashes {
    fn formula_type(&self) -> FormulaType {
        FormulaType::Validator
    }
    fn name(&self) -> &str {
        "staking/slashes"
    }
    async fn compute(&self, env: &Environment) -> Result<Option<Value>, ComputeError> {
        let slashes = env.get_slash_events(env.target_address()).await?;
        Ok(Some(json!(slashes)))
    }
}

/// Whether the validator has ever been slashed.
pub struct WasSlashed;

#[async_trait]
impl Formula for WasSlashed {
    fn formula_type(&self) -> FormulaType {
        FormulaType::Validator
    }
    fn name(&self) -> &str {
        "staking/wasSlashed"
    }
    async fn compute(&self, env: &Environment) -> Result<Option<Value>, ComputeError> {
        let slashes = env.get_slash_events(env.target_address()).await?;
        Ok(Some(json!(!slashes.is_empty())))
    }
}
