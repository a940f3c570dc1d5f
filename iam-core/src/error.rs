//! Error types for iam4apis operations

use crate::model::UserId;
use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required configuration field: {field}")]
    MissingRequired { field: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}

/// Master error type for store operations.
///
/// Every variant is surfaced to the caller as-is. The only failures that are
/// never surfaced are cache admission rejections and background refresh
/// errors, neither of which produce an `IamError`.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum IamError {
    #[error("User not found: {id}")]
    NotFound { id: UserId },

    #[error("Unauthorized: {action}")]
    Unauthorized { action: String },

    #[error("No authenticated caller")]
    Unauthenticated,

    #[error("Update failed for user {id}: {reason}")]
    UpdateFailed { id: UserId, reason: String },

    #[error("Backend unavailable: {reason}")]
    BackendUnavailable { reason: String },

    #[error("Invalid value for {field}: {reason}")]
    InvalidInput { field: String, reason: String },

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

impl IamError {
    pub fn not_found(id: &UserId) -> Self {
        Self::NotFound { id: id.clone() }
    }

    pub fn unauthorized(action: impl Into<String>) -> Self {
        Self::Unauthorized {
            action: action.into(),
        }
    }

    pub fn update_failed(id: &UserId, reason: impl Into<String>) -> Self {
        Self::UpdateFailed {
            id: id.clone(),
            reason: reason.into(),
        }
    }

    pub fn backend(reason: impl Into<String>) -> Self {
        Self::BackendUnavailable {
            reason: reason.into(),
        }
    }

    pub fn invalid_input(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidInput {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// Result type alias for store operations.
pub type IamResult<T> = Result<T, IamError>;

// =============================================================================
// TESTS
// =============================================================================
