// Copyright (c) 2025 TexasFortress.AI
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Mailbox transport used by the watcher.
//!
//! The watcher only talks to the [`MailConnector`] / [`MailSession`] pair,
//! so tests can drive it with an in-memory mailbox while production uses
//! [`client::ImapConnector`] over TLS.

use std::time::Duration;

use async_trait::async_trait;

pub mod client;
pub mod error;

pub use client::{ImapConnector, ImapEndpoint};
pub use error::ImapError;

/// How a bounded wait for mailbox activity ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// The server pushed something (new mail, flag change, expunge).
    Changed,
    /// Nothing happened within the allotted time.
    TimedOut,
}

/// One logged-in connection with the watched mailbox selected.
#[async_trait]
pub trait MailSession: Send {
    /// Blocks until the server reports a change or `max_wait` elapses.
    async fn wait_for_change(&mut self, max_wait: Duration) -> Result<WaitOutcome, ImapError>;

    /// UIDs of unread messages whose subject contains `subject`
    /// (case-insensitive). An empty `subject` matches every unread message.
    async fn search_unseen(&mut self, subject: &str) -> Result<Vec<u32>, ImapError>;

    /// Full RFC 822 source without setting `\Seen`. `None` when the message
    /// vanished between search and fetch.
    async fn fetch_raw(&mut self, uid: u32) -> Result<Option<Vec<u8>>, ImapError>;

    async fn mark_seen(&mut self, uid: u32) -> Result<(), ImapError>;

    async fn logout(&mut self) -> Result<(), ImapError>;
}

/// Opens fresh sessions; called on start, reconnect and refresh.
#[async_trait]
pub trait MailConnector: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn MailSession>, ImapError>;
}
