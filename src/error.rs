use thiserror::Error;

use crate::config::SettingsError;
use crate::imap::ImapError;

/// Failures that stop the server from starting.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Settings(#[from] SettingsError),

    #[error("Mailbox setup failed: {0}")]
    Imap(#[from] ImapError),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
