//! Frame messaging errors

use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MessagingError {
    /// Delivery needs a tokio runtime to run the window's mailbox
    #[error("No tokio runtime available to deliver messages to window '{window}'")]
    NoRuntime { window: String },

    #[error("Window '{window}' has been closed")]
    Closed { window: String },

    #[error("Frame '{name}' already exists under window '{parent}'")]
    DuplicateFrame { parent: String, name: String },
}

pub type Result<T> = std::result::Result<T, MessagingError>;
