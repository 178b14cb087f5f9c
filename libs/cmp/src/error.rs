//! CMP API errors
//!
//! Third-party callers never see these: protocol misuse is reported to them
//! as `callback(None, false)`. These surface to the host and to tests.

use frame_messaging::MessagingError;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CmpError {
    /// No `__tcfapi` function on the window
    #[error("No CMP command function installed on window '{window}'")]
    NotInstalled { window: String },

    /// No ancestor frame hosts a locator
    #[error("No CMP locator frame found from window '{window}'")]
    CmpNotFound { window: String },

    #[error("Unsupported TCF API version {0}")]
    UnsupportedVersion(u32),

    #[error("Unknown command '{0}'")]
    UnknownCommand(String),

    #[error("Invalid parameter for '{command}': {reason}")]
    InvalidParameter { command: String, reason: String },

    /// Lazy codec load failed
    #[error("TC string codec unavailable: {0}")]
    CodecUnavailable(String),

    #[error("Frame messaging error: {0}")]
    Messaging(#[from] MessagingError),
}

impl CmpError {
    pub fn invalid_parameter(command: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidParameter {
            command: command.into(),
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, CmpError>;
