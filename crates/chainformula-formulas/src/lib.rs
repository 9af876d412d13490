//! chainformula-formulas — the compiled-in formula catalogue.
//!
//! Formulas are registered at startup via [`default_registry`] and looked
//! up by `(type, name)`. The catalogue is the only compatibility boundary
//! exposed to higher layers: adding a formula here makes it queryable.

pub mod account;
pub mod contract;
pub mod generic;
pub mod validator;

use std::sync::Arc;

use chainformula_core::error::ComputeError;
use chainformula_core::registry::FormulaRegistry;

/// Build the registry with every catalogued formula.
pub fn default_registry() -> Result<FormulaRegistry, ComputeError> {
    let mut registry = FormulaRegistry::new();

    // Contract
    registry.register(Arc::new(contract::Cw20TokenInfo))?;
    registry.register(Arc::new(contract::Cw20Balance))?;
    registry.register(Arc::new(contract::Cw20TotalSupply))?;
    registry.register(Arc::new(contract::Cw20AllBalances))?;
    registry.register(Arc::new(contract::StateItem))?;
    registry.register(Arc::new(contract::DaoConfig::new()))?;
    registry.register(Arc::new(contract::DaoMembers))?;
    registry.register(Arc::new(contract::TxCount))?;
    registry.register(Arc::new(contract::FirstTransformedAt))?;

    // Account
    registry.register(Arc::new(account::Balances))?;
    registry.register(Arc::new(account::Balance))?;
    registry.register(Arc::new(account::FeegrantsGranted))?;
    registry.register(Arc::new(account::FeegrantsReceived))?;
    registry.register(Arc::new(account::HasFeegrant))?;

    // Validator
    registry.register(Arc::new(validator::Slashes))?;
    registry.register(Arc::new(validator::WasSlashed))?;

    // Generic
    registry.register(Arc::new(generic::Height))?;
    registry.register(Arc::new(generic::CommunityPool))?;
    registry.register(Arc::new(generic::Proposal))?;
    registry.register(Arc::new(generic::ProposalCount))?;
    registry.register(Arc::new(generic::ProposalVotes))?;
    registry.register(Arc::new(generic::CurrentTime))?;

    Ok(registry)
}
