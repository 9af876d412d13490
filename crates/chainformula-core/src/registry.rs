//! Formula trait + registry.
//!
//! Formulas are a compiled-in, versioned catalogue: pure functions from an
//! [`Environment`] to a JSON value, looked up by `(type, name)`.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::env::Environment;
use crate::error::ComputeError;

/// What kind of address a formula targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FormulaType {
    Contract,
    Validator,
    Account,
    Generic,
}

impl FormulaType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Contract => "contract",
            Self::Validator => "validator",
            Self::Account => "account",
            Self::Generic => "generic",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        Some(match s {
            "contract" => Self::Contract,
            "validator" => Self::Validator,
            "account" => Self::Account,
            "generic" => Self::Generic,
            _ => return None,
        })
    }
}

impl std::fmt::Display for FormulaType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The full formula id, `type/name`.
pub fn formula_id(formula_type: FormulaType, name: &str) -> String {
    format!("{}/{}", formula_type.as_str(), name)
}

/// Trait for registered formulas.
///
/// A formula must be pure with respect to its inputs: all I/O goes through
/// the Environment, and for a fixed store the same `(address, args, block)`
/// always produces the same value.
#[async_trait]
pub trait Formula: Send + Sync {
    /// The address kind this formula targets.
    fn formula_type(&self) -> FormulaType;

    /// The lookup name (e.g. `"cw20/balance"`).
    fn name(&self) -> &str;

    /// `true` if the result may depend on the wall clock. Dynamic formulas
    /// are never cached and never evaluated over a block range.
    fn dynamic(&self) -> bool {
        false
    }

    /// Code-id keys this formula applies to (contract formulas only).
    fn code_id_keys(&self) -> Option<&[String]> {
        None
    }

    /// Evaluate against the environment's target block. `None` = absent.
    async fn compute(&self, env: &Environment) -> Result<Option<Value>, ComputeError>;
}

/// Name → formula resolution, keyed by `(type, name)`.
pub struct FormulaRegistry {
    formulas: HashMap<(FormulaType, String), Arc<dyn Formula>>,
}

impl FormulaRegistry {
    pub fn new() -> Self {
        Self {
            formulas: HashMap::new(),
        }
    }

    /// Register a formula. Duplicate `(type, name)` pairs are rejected.
    pub fn register(&mut self, formula: Arc<dyn Formula>) -> Result<(), ComputeError> {
        let key = (formula.formula_type(), formula.name().to_string());
        if self.formulas.contains_key(&key) {
            return Err(ComputeError::BadInput(format!(
                "formula '{}' already registered",
                formula_id(key.0, &key.1)
            )));
        }
        self.formulas.insert(key, formula);
        Ok(())
    }

    /// Resolve a formula, or fail with a dedicated not-found error.
    pub fn get(
        &self,
        formula_type: FormulaType,
        name: &str,
    ) -> Result<Arc<dyn Formula>, ComputeError> {
        self.formulas
            .get(&(formula_type, name.to_string()))
            .cloned()
            .ok_or_else(|| {
                ComputeError::NotFound(format!("formula '{}'", formula_id(formula_type, name)))
            })
    }

    /// All registered names for a type, sorted.
    pub fn names(&self, formula_type: FormulaType) -> Vec<String> {
        let mut names: Vec<String> = self
            .formulas
            .keys()
            .filter(|(t, _)| *t == formula_type)
            .map(|(_, name)| name.clone())
            .collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.formulas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.formulas.is_empty()
    }
}

impl Default for FormulaRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Nop(FormulaType, String);

    #[async_trait]
    impl Formula for Nop {
        fn formula_type(&self) -> FormulaType {
            self.0
        }
        fn name(&self) -> &str {
            &self.1
        }
        async fn compute(&self, _env: &Environment) -> Result<Option<Value>, ComputeError> {
            Ok(None)
        }
    }

    #[test]
    fn register_and_lookup() {
        let mut registry = FormulaRegistry::new();
        registry
            .register(Arc::new(Nop(FormulaType::Contract, "cw20/balance".into())))
            .unwrap();

        assert!(registry.get(FormulaType::Contract, "cw20/balance").is_ok());
        let err = match registry.get(FormulaType::Contract, "missing") {
            Err(e) => e,
            Ok(_) => panic!("expected error"),
        };
        assert!(matches!(err, ComputeError::NotFound(_)));
        // Same name under a different type is a different formula.
        assert!(registry.get(FormulaType::Account, "cw20/balance").is_err());
    }

    #[test]
    fn duplicate_rejected() {
        let mut registry = FormulaRegistry::new();
        registry
            .register(Arc::new(Nop(FormulaType::Generic, "height".into())))
            .unwrap();
        let err = registry.register(Arc::new(Nop(FormulaType::Generic, "height".into())));
        assert!(err.is_err());
    }

    #[test]
    fn names_sorted_per_type() {
        let mut registry = FormulaRegistry::new();
        registry
            .register(Arc::new(Nop(FormulaType::Generic, "b".into())))
            .unwrap();
        registry
            .register(Arc::new(Nop(FormulaType::Generic, "a".into())))
            .unwrap();
        registry
            .register(Arc::new(Nop(FormulaType::Account, "c".into())))
            .unwrap();
        assert_eq!(registry.names(FormulaType::Generic), vec!["a", "b"]);
        assert_eq!(registry.names(FormulaType::Account), vec!["c"]);
    }

    #[test]
    fn formula_id_format() {
        assert_eq!(
            formula_id(FormulaType::Contract, "cw20/balance"),
            "contract/cw20/balance"
        );
    }
}
