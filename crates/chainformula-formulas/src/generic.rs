//! Chain-wide formulas.

use async_trait::async_trait;
use serde_json::{json, Value};

use chainformula_core::env::Environment;
use chainformula_core::error::ComputeError;
use chainformula_core::registry::{Formula, FormulaType};

/// The target block itself.
pub struct Height;

#[async_trait]
impl Formula for Height {
    fn formula_type(&self) -> FormulaType {
        FormulaType::Generic
    }
    fn name(&self) -> &str {
        "chain/height"
    }
    async fn compute(&self, env: &Environment) -> Result<Option<Value>, ComputeError> {
        let block = env.block();
        Ok(Some(json!({
            "height": block.height,
            "timeUnixMs": block.time_unix_ms,
        })))
    }
}

/// Community-pool balances at the target block.
pub struct CommunityPool;

#[async_trait]
impl Formula for CommunityPool {
    fn formula_type(&self) -> FormulaType {
        FormulaType::Generic
    }
    fn name(&self) -> &str {
        "distribution/communityPool"
    }
    async fn compute(&self, env: &Environment) -> Result<Option<Value>, ComputeError> {
        let balances = env.get_community_pool_balances().await?;
        Ok(balances.map(|map| json!(map)))
    }
}

/// One governance proposal (`id` argument), with its raw payload parsed.
pub struct Proposal;

#[async_trait]
impl Formula for Proposal {
    fn formula_type(&self) -> FormulaType {
        FormulaType::Generic
    }
    fn name(&self) -> &str {
        "gov/proposal"
    }
    async fn compute(&self, env: &Environment) -> Result<Option<Value>, ComputeError> {
        let id = env.require_arg_u64("id")?;
        Ok(env.get_proposal(id).await?.map(|row| {
            json!({
                "id": row.proposal_id,
                "height": row.block.height,
                "data": serde_json::from_str::<Value>(&row.data).unwrap_or(Value::Null),
            })
        }))
    }
}

/// Number of proposals visible at the target block.
pub struct ProposalCount;

#[async_trait]
impl Formula for ProposalCount {
    fn formula_type(&self) -> FormulaType {
        FormulaType::Generic
    }
    fn name(&self) -> &str {
        "gov/proposalCount"
    }
    async fn compute(&self, env: &Environment) -> Result<Option<Value>, ComputeError> {
        Ok(Some(json!(env.get_proposal_count().await?)))
    }
}

/// A page of votes on a proposal (`id`, optional `limit` and `offset`).
pub struct ProposalVotes;

#[async_trait]
impl Formula for ProposalVotes {
    fn formula_type(&self) -> FormulaType {
        FormulaType::Generic
    }
    fn name(&self) -> &str {
        "gov/proposalVotes"
    }
    async fn compute(&self, env: &Environment) -> Result<Option<Value>, ComputeError> {
        let id = env.require_arg_u64("id")?;
        let limit = match env.arg("limit") {
            Some(_) => Some(env.require_arg_u64("limit")?),
            None => None,
        };
        let offset = match env.arg("offset") {
            Some(_) => env.require_arg_u64("offset")?,
            None => 0,
        };
        let votes = env.get_proposal_votes(id, true, limit, offset).await?;
        Ok(Some(json!(votes
            .iter()
            .map(|row| {
                json!({
                    "voter": row.voter,
                    "height": row.block.height,
                    "vote": serde_json::from_str::<Value>(&row.data).unwrap_or(Value::Null),
                })
            })
            .collect::<Vec<_>>())))
    }
}

/// The evaluation date. Dynamic: depends on the wall clock, so it is never
/// cached and never evaluated over a range.
pub struct CurrentTime;

#[async_trait]
impl Formula for CurrentTime {
    fn formula_type(&self) -> FormulaType {
        FormulaType::Generic
    }
    fn name(&self) -> &str {
        "chain/now"
    }
    fn dynamic(&self) -> bool {
        true
    }
    async fn compute(&self, env: &Environment) -> Result<Option<Value>, ComputeError> {
        Ok(Some(json!(env.date())))
    }
}
