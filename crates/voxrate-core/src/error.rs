//! Unified error handling for voxrate
//!
//! This module provides a single error type covering every failure the
//! rating and debiting core can surface, with a stable error code per variant
//! so that hosts can map them onto their own transport.

use thiserror::Error;

/// Main application error type
///
/// All errors in the workspace are converted to this type.
#[derive(Error, Debug)]
pub enum AppError {
    // ==================== Lookup Errors ====================
    #[error("Rating profile not found: {0}")]
    RatingProfileNotFound(String),

    #[error("Destination not found: {0}")]
    DestinationNotFound(String),

    #[error("Account not found: {0}")]
    AccountNotFound(String),

    #[error("Actions not found: {0}")]
    ActionsNotFound(String),

    #[error("No rate available for {key} to {destination}")]
    RateNotFound { key: String, destination: String },

    // ==================== Resolution Errors ====================
    #[error("Fallback recursion limit exceeded at {key} (depth {depth})")]
    RecursionLimitExceeded { key: String, depth: usize },

    // ==================== Balance Errors ====================
    #[error("Insufficient credit on account {account}")]
    InsufficientCredit { account: String },

    #[error("Balance not found: {0}")]
    BalanceNotFound(String),

    // ==================== Storage Errors ====================
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Storage connection failed: {0}")]
    StorageConnection(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    // ==================== Validation Errors ====================
    #[error("Malformed input: {0}")]
    MalformedInput(String),

    #[error("Validation error: {0}")]
    Validation(String),

    // ==================== Session Errors ====================
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Session already exists: {0}")]
    SessionExists(String),

    // ==================== Internal Errors ====================
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl AppError {
    /// Returns the error code for callers and logs
    pub fn error_code(&self) -> &'static str {
        match self {
            AppError::RatingProfileNotFound(_) => "rating_profile_not_found",
            AppError::DestinationNotFound(_) => "destination_not_found",
            AppError::AccountNotFound(_) => "account_not_found",
            AppError::ActionsNotFound(_) => "actions_not_found",
            AppError::RateNotFound { .. } => "rate_not_found",
            AppError::RecursionLimitExceeded { .. } => "recursion_limit_exceeded",
            AppError::InsufficientCredit { .. } => "insufficient_credit",
            AppError::BalanceNotFound(_) => "balance_not_found",
            AppError::Storage(_) => "storage_error",
            AppError::StorageConnection(_) => "storage_connection_error",
            AppError::Serialization(_) => "serialization_error",
            AppError::MalformedInput(_) => "malformed_input",
            AppError::Validation(_) => "validation_error",
            AppError::SessionNotFound(_) => "session_not_found",
            AppError::SessionExists(_) => "session_exists",
            AppError::Internal(_) => "internal_error",
            AppError::Config(_) => "config_error",
        }
    }

    /// True for the lookup failures that a fallback walk may absorb
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            AppError::RatingProfileNotFound(_)
                | AppError::DestinationNotFound(_)
                | AppError::AccountNotFound(_)
                | AppError::ActionsNotFound(_)
                | AppError::RateNotFound { .. }
                | AppError::BalanceNotFound(_)
        )
    }

    /// True when the error came from the storage layer
    pub fn is_storage(&self) -> bool {
        matches!(
            self,
            AppError::Storage(_) | AppError::StorageConnection(_) | AppError::Serialization(_)
        )
    }
}

// ==================== From implementations ====================

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Serialization(err.to_string())
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::Config(err.to_string())
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(err: validator::ValidationErrors) -> Self {
        AppError::MalformedInput(err.to_string())
    }
}
