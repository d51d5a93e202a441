// Copyright (c) 2025 TexasFortress.AI
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Long-lived mailbox watcher.
//!
//! A single driver task owns the session and walks the connection state
//! machine in [`state`]. While connected it waits for server pushes, bounded
//! by the fallback poll interval, and tears the session down for a fresh
//! one once the refresh interval has passed. Every qualifying message is
//! marked read before the handler sees it, so a crash mid-handler loses the
//! alert rather than repeating it.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, error, info, warn};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{timeout, Instant};
use tokio_util::sync::CancellationToken;

use crate::imap::{ImapError, MailConnector, MailSession, WaitOutcome};
use crate::models::Event;

pub mod extract;
pub mod state;

pub use extract::{extract_event, parse_mail, Extraction, ParsedMail, DEFAULT_CLEARED_KEYWORDS};
pub use state::{transition, Action, ConnectionInput, ConnectionState};

/// Receives every event the watcher extracts, one at a time.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn on_event(&self, event: Event);
}

#[derive(Debug, Clone)]
pub struct WatcherConfig {
    /// Substring the subject must contain (case-insensitive). Empty matches all.
    pub subject_filter: String,
    pub cleared_keywords: Vec<String>,
    pub poll_interval: Duration,
    pub refresh_interval: Duration,
    pub reconnect_delay: Duration,
    /// Upper bound for connect, search, fetch and flag updates.
    pub operation_timeout: Duration,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            subject_filter: String::new(),
            cleared_keywords: DEFAULT_CLEARED_KEYWORDS.iter().map(|s| s.to_string()).collect(),
            poll_interval: Duration::from_secs(60),
            refresh_interval: Duration::from_secs(20 * 60),
            reconnect_delay: Duration::from_secs(10),
            operation_timeout: Duration::from_secs(30),
        }
    }
}

struct WatcherShared {
    connector: Arc<dyn MailConnector>,
    config: WatcherConfig,
    state_tx: watch::Sender<ConnectionState>,
}

struct RunningTask {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

pub struct MailWatcher {
    shared: Arc<WatcherShared>,
    running: Mutex<Option<RunningTask>>,
}

impl MailWatcher {
    pub fn new(connector: Arc<dyn MailConnector>, config: WatcherConfig) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            shared: Arc::new(WatcherShared {
                connector,
                config,
                state_tx,
            }),
            running: Mutex::new(None),
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.shared.state_tx.borrow()
    }

    /// Receiver that observes every state change.
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state_tx.subscribe()
    }

    /// Spawns the driver task. Calling `start` while running is ignored.
    pub async fn start(&self, handler: Arc<dyn MessageHandler>) {
        let mut running = self.running.lock().await;
        if let Some(task) = running.as_ref() {
            if !task.handle.is_finished() {
                warn!("Mail watcher already running, ignoring start");
                return;
            }
        }

        let cancel = CancellationToken::new();
        let shared = Arc::clone(&self.shared);
        let token = cancel.clone();
        let handle = tokio::spawn(async move {
            shared.run(handler, token).await;
        });
        *running = Some(RunningTask { cancel, handle });
    }

    /// Cancels timers and the connection and waits for the driver to exit.
    /// A handler call in progress is allowed to finish. Idempotent.
    pub async fn stop(&self) {
        let task = self.running.lock().await.take();
        if let Some(task) = task {
            task.cancel.cancel();
            if let Err(e) = task.handle.await {
                error!("Mail watcher task ended abnormally: {}", e);
            }
        }
        self.shared.apply(ConnectionInput::StopRequested);
    }
}

impl WatcherShared {
    fn apply(&self, input: ConnectionInput) -> Action {
        let current = *self.state_tx.borrow();
        let (next, action) = transition(current, input);
        if next != current {
            info!("Mail watcher {} -> {} ({:?})", current, next, input);
            self.state_tx.send_replace(next);
        } else {
            debug!("Mail watcher ignored {:?} in state {}", input, current);
        }
        action
    }

    async fn run(&self, handler: Arc<dyn MessageHandler>, cancel: CancellationToken) {
        let mut session: Option<Box<dyn MailSession>> = None;
        let mut action = self.apply(ConnectionInput::Start);

        loop {
            if cancel.is_cancelled() {
                break;
            }
            action = match action {
                Action::Connect | Action::Reconnect => {
                    if let Some(mut old) = session.take() {
                        self.close(old.as_mut()).await;
                    }
                    let connected = tokio::select! {
                        _ = cancel.cancelled() => break,
                        result = timeout(self.config.operation_timeout, self.connector.connect()) => {
                            result.map_err(ImapError::from).and_then(|r| r)
                        }
                    };
                    match connected {
                        Ok(new_session) => {
                            session = Some(new_session);
                            self.apply(ConnectionInput::ConnectSucceeded)
                        }
                        Err(e) => {
                            warn!("Mailbox connection failed: {}", e);
                            self.apply(ConnectionInput::ConnectFailed)
                        }
                    }
                }
                Action::BeginWatching => {
                    let input = match session.as_mut() {
                        Some(active) => self.watch(active.as_mut(), handler.as_ref(), &cancel).await,
                        None => ConnectionInput::ConnectionLost,
                    };
                    if input == ConnectionInput::StopRequested {
                        break;
                    }
                    self.apply(input)
                }
                Action::ScheduleReconnect => {
                    // The session is unusable; drop it without a logout round trip.
                    session = None;
                    info!("Reconnecting in {:?}", self.config.reconnect_delay);
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(self.config.reconnect_delay) => {
                            self.apply(ConnectionInput::ReconnectTimerFired)
                        }
                    }
                }
                Action::Shutdown | Action::Ignore => break,
            };
        }

        if let Some(mut active) = session.take() {
            self.close(active.as_mut()).await;
        }
        self.apply(ConnectionInput::StopRequested);
    }

    /// Watches one session until it is lost, due for refresh, or stopped.
    async fn watch(
        &self,
        session: &mut dyn MailSession,
        handler: &dyn MessageHandler,
        cancel: &CancellationToken,
    ) -> ConnectionInput {
        let refresh_at = Instant::now() + self.config.refresh_interval;

        self.scan_logged(session, handler, cancel).await;

        loop {
            if cancel.is_cancelled() {
                return ConnectionInput::StopRequested;
            }
            let now = Instant::now();
            if now >= refresh_at {
                info!("Refreshing mailbox connection");
                return ConnectionInput::RefreshDue;
            }
            let wait = self.config.poll_interval.min(refresh_at - now);

            let outcome = tokio::select! {
                _ = cancel.cancelled() => return ConnectionInput::StopRequested,
                result = timeout(wait + self.config.operation_timeout, session.wait_for_change(wait)) => {
                    result.map_err(ImapError::from).and_then(|r| r)
                }
            };

            match outcome {
                Ok(WaitOutcome::Changed) => debug!("Mailbox reported a change"),
                Ok(WaitOutcome::TimedOut) => {
                    if Instant::now() >= refresh_at {
                        continue;
                    }
                    debug!("Fallback poll");
                }
                Err(e) => {
                    warn!("Mailbox connection lost: {}", e);
                    return ConnectionInput::ConnectionLost;
                }
            }

            self.scan_logged(session, handler, cancel).await;
        }
    }

    async fn scan_logged(&self, session: &mut dyn MailSession, handler: &dyn MessageHandler, cancel: &CancellationToken) {
        match self.scan(session, handler, cancel).await {
            Ok(0) => {}
            Ok(n) => debug!("Scan delivered {} event(s)", n),
            Err(e) => warn!("Mailbox scan abandoned: {}", e),
        }
    }

    /// Searches for qualifying unread mail and hands each extracted event to
    /// the handler. Returns the number of events delivered.
    async fn scan(
        &self,
        session: &mut dyn MailSession,
        handler: &dyn MessageHandler,
        cancel: &CancellationToken,
    ) -> Result<usize, ImapError> {
        let op_timeout = self.config.operation_timeout;
        let uids = timeout(op_timeout, session.search_unseen(&self.config.subject_filter)).await??;
        if uids.is_empty() {
            return Ok(0);
        }
        debug!("Found {} unread candidate message(s)", uids.len());

        let mut delivered = 0;
        for uid in uids {
            if cancel.is_cancelled() {
                break;
            }

            let raw = match timeout(op_timeout, session.fetch_raw(uid)).await?? {
                Some(raw) => raw,
                None => {
                    debug!("Message {} disappeared before fetch", uid);
                    continue;
                }
            };

            if let Err(e) = timeout(op_timeout, session.mark_seen(uid))
                .await
                .map_err(ImapError::from)
                .and_then(|r| r)
            {
                warn!("Could not mark message {} as read, skipping it: {}", uid, e);
                continue;
            }

            let mail = match parse_mail(&raw) {
                Ok(mail) => mail,
                Err(e) => {
                    warn!("Skipping message {}: {}", uid, e);
                    continue;
                }
            };

            match extract_event(&mail, &self.config.cleared_keywords) {
                Extraction::Event(event) => {
                    info!(
                        "Alert email {} from '{}' with {} image(s)",
                        uid,
                        event.camera_name(),
                        event.images().len()
                    );
                    handler.on_event(event).await;
                    delivered += 1;
                }
                Extraction::Cleared => info!("Ignoring cleared notice {} ('{}')", uid, mail.subject),
                Extraction::NoImage => debug!("No image in message {} ('{}'), dropped", uid, mail.subject),
            }
        }
        Ok(delivered)
    }

    async fn close(&self, session: &mut dyn MailSession) {
        match timeout(self.config.operation_timeout, session.logout()).await {
            Ok(Ok(())) => debug!("Logged out of mailbox"),
            Ok(Err(e)) => debug!("Logout failed: {}", e),
            Err(_) => debug!("Logout timed out"),
        }
    }
}
