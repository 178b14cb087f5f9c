//! Vendor list fetch errors
//!
//! `Clone` so one failure can be handed to every caller awaiting the same
//! coalesced request.

use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GvlError {
    /// Network or connection level failure
    #[error("Vendor list transport error for {endpoint}: {reason}")]
    Transport { endpoint: String, reason: String },

    #[error("Vendor list request to {endpoint} timed out")]
    Timeout { endpoint: String },

    /// Non-2xx status other than 204
    #[error("Vendor list request to {endpoint} returned HTTP {status}")]
    Status { endpoint: String, status: u16 },

    /// Body was not a usable vendor list
    #[error("Invalid vendor list payload: {0}")]
    InvalidPayload(String),

    #[error("Vendor list client configuration error: {0}")]
    Config(String),
}

impl GvlError {
    pub fn transport(endpoint: impl Into<String>, reason: impl ToString) -> Self {
        Self::Transport {
            endpoint: endpoint.into(),
            reason: reason.to_string(),
        }
    }

    pub fn status(endpoint: impl Into<String>, status: u16) -> Self {
        Self::Status {
            endpoint: endpoint.into(),
            status,
        }
    }

    /// Whether a later retry could plausibly succeed
    pub fn is_transient(&self) -> bool {
        match self {
            GvlError::Transport { .. } | GvlError::Timeout { .. } => true,
            GvlError::Status { status, .. } => *status >= 500,
            GvlError::InvalidPayload(_) | GvlError::Config(_) => false,
        }
    }
}

pub type GvlResult<T> = Result<T, GvlError>;
