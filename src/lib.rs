//! Library core for alertmail.
//!
//! Camera motion-alert emails come in through the [`watcher`], pass the
//! [`dispatcher`]'s filter gates, are judged by the [`analysis`]
//! coordinator using keys from the [`credentials`] pool, and leave as
//! [`notify`] alerts.

// --- Modules ---
pub mod analysis;
pub mod app;
pub mod config;
pub mod credentials;
pub mod dashboard;
pub mod dispatcher;
pub mod error;
pub mod filter;
pub mod imap;
pub mod models;
pub mod notify;
pub mod watcher;

pub mod prelude {
    pub use crate::analysis::{AnalysisCoordinator, AnalysisRequest, Analyzer, ProviderStrategy};
    pub use crate::config::Settings;
    pub use crate::credentials::{Credential, CredentialPool, QuotaPolicy};
    pub use crate::dispatcher::{DispatchOutcome, Dispatcher};
    pub use crate::error::AppError;
    pub use crate::filter::{FilterConfig, SharedFilter};
    pub use crate::models::{AnalysisDecision, Event, ImagePayload};
    pub use crate::notify::{Alert, Notifier};
    pub use crate::watcher::{ConnectionState, MailWatcher, MessageHandler, WatcherConfig};
}
