//! Error types for the formula computation engine.

use thiserror::Error;

/// Errors that can occur while resolving or evaluating a formula.
#[derive(Debug, Error)]
pub enum ComputeError {
    /// Missing formula, or missing contract/validator for a typed address.
    #[error("not found: {0}")]
    NotFound(String),

    /// The formula exists but does not apply to this request
    /// (code-id filter mismatch, or a dynamic formula over a range).
    #[error("formula does not apply: {0}")]
    NotApplicable(String),

    /// Malformed block/time range, non-positive step, or bad argument.
    #[error("bad input: {0}")]
    BadInput(String),

    /// A failure raised inside a formula. The message is passed through verbatim.
    #[error("{0}")]
    Formula(String),

    /// Database or cache unavailability. Never retried by the core.
    #[error("storage error: {0}")]
    Storage(String),

    /// A row surfaced under a namespace it does not belong to.
    /// Internal invariant violation — the evaluation aborts unpersisted.
    #[error("event type mismatch in namespace '{namespace}': expected {expected}")]
    TypeMismatch {
        namespace: &'static str,
        expected: &'static str,
    },
}

impl ComputeError {
    /// Returns `true` if the error is attributable to the caller
    /// (bad request or formula failure) rather than the engine.
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            Self::NotFound(_) | Self::NotApplicable(_) | Self::BadInput(_) | Self::Formula(_)
        )
    }

    /// Returns `true` if this is an internal failure (transport or invariant).
    pub fn is_internal(&self) -> bool {
        !self.is_user_error()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_vs_internal() {
        assert!(ComputeError::NotFound("x".into()).is_user_error());
        assert!(ComputeError::Formula("boom".into()).is_user_error());
        assert!(ComputeError::Storage("db down".into()).is_internal());
        assert!(ComputeError::TypeMismatch {
            namespace: "wasm/state",
            expected: "WasmState",
        }
        .is_internal());
    }

    #[test]
    fn formula_message_verbatim() {
        let err = ComputeError::Formula("missing token_info".into());
        assert_eq!(err.to_string(), "missing token_info");
    }
}
