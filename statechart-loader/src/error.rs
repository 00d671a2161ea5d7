//! Loader error types.

use statechart_core::CoreError;
use std::path::PathBuf;
use thiserror::Error;

/// Errors from decoding a statechart document.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("unknown action type '{action_type}'")]
    UnknownActionType { action_type: String },

    #[error("unknown guard type '{guard_type}'")]
    UnknownGuardType { guard_type: String },

    #[error("unknown invokable '{src}'")]
    UnknownInvokable { src: String },

    #[error("missing field '{field}' in {within}")]
    MissingField { field: String, within: String },

    #[error("invalid field '{field}': {reason}")]
    InvalidField { field: String, reason: String },

    #[error(transparent)]
    Definition(#[from] CoreError),
}

impl LoadError {
    pub(crate) fn missing(field: &str, within: impl Into<String>) -> Self {
        LoadError::MissingField {
            field: field.to_string(),
            within: within.into(),
        }
    }

    pub(crate) fn invalid(field: &str, reason: impl Into<String>) -> Self {
        LoadError::InvalidField {
            field: field.to_string(),
            reason: reason.into(),
        }
    }
}
