//! Core error types.

use thiserror::Error;

/// Errors from the statechart core.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("invalid machine definition: {reason}")]
    InvalidDefinition { reason: String },

    #[error("invalid guard expression '{expression}': {reason}")]
    InvalidGuard { expression: String, reason: String },

    #[error("mismatched parentheses in '{expression}': unexpected ')' at position {position}")]
    UnexpectedCloseParen { expression: String, position: usize },

    #[error("mismatched parentheses in '{expression}': {unclosed} '(' left unclosed, missing ')'")]
    UnclosedParen { expression: String, unclosed: usize },

    #[error("invalid value expression '{expression}': {reason}")]
    InvalidExpression { expression: String, reason: String },

    #[error("invalid value: {reason}")]
    InvalidValue { reason: String },

    #[error("guard evaluation failed: {reason}")]
    GuardEvaluation { reason: String },

    #[error("unresolved reference: {reference}")]
    UnresolvedReference { reference: String },

    #[error("unknown state: {state}")]
    UnknownState { state: String },

    #[error("engine stopped")]
    EngineStopped,

    #[error("no tokio runtime to run the engine on: {reason}")]
    RuntimeUnavailable { reason: String },
}

impl CoreError {
    /// Returns true for errors that make a definition unusable.
    ///
    /// Everything else aborts a single event and leaves the machine as it was.
    pub fn is_definition_error(&self) -> bool {
        matches!(
            self,
            CoreError::InvalidDefinition { .. }
                | CoreError::InvalidGuard { .. }
                | CoreError::UnexpectedCloseParen { .. }
                | CoreError::UnclosedParen { .. }
                | CoreError::InvalidExpression { .. }
                | CoreError::InvalidValue { .. }
        )
    }

    /// Returns a stable error code for hosts that report errors by code.
    pub fn error_code(&self) -> &'static str {
        match self {
            CoreError::InvalidDefinition { .. } => "INVALID_DEFINITION",
            CoreError::InvalidGuard { .. } => "INVALID_GUARD",
            CoreError::UnexpectedCloseParen { .. } => "MISMATCHED_PARENTHESES",
            CoreError::UnclosedParen { .. } => "MISMATCHED_PARENTHESES",
            CoreError::InvalidExpression { .. } => "INVALID_EXPRESSION",
            CoreError::InvalidValue { .. } => "INVALID_VALUE",
            CoreError::GuardEvaluation { .. } => "GUARD_EVALUATION",
            CoreError::UnresolvedReference { .. } => "UNRESOLVED_REFERENCE",
            CoreError::UnknownState { .. } => "UNKNOWN_STATE",
            CoreError::EngineStopped => "ENGINE_STOPPED",
            CoreError::RuntimeUnavailable { .. } => "RUNTIME_UNAVAILABLE",
        }
    }
}
