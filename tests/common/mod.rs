// Copyright (c) 2025 TexasFortress.AI
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Fakes shared by the unit and integration test targets.

#![allow(dead_code)]

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use alertmail::analysis::{AnalysisProvider, AnalysisRequest, Analyzer, ProviderError};
use alertmail::credentials::Clock;
use alertmail::imap::{ImapError, MailConnector, MailSession, WaitOutcome};
use alertmail::models::{AnalysisDecision, Event, ImagePayload};
use alertmail::notify::{Alert, Notifier, NotifyError};
use alertmail::watcher::MessageHandler;
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use chrono::{DateTime, Utc};
use tokio::sync::Notify;

pub const JPEG_BYTES: [u8; 6] = [0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10];

pub fn jpeg(name: &str) -> ImagePayload {
    ImagePayload::new(name, "image/jpeg", JPEG_BYTES.to_vec())
}

pub fn event_with(text: &str, subject: &str) -> Event {
    Event::new("cam@example.com", subject, text, vec![jpeg("a.jpg")]).unwrap()
}

/// RFC 822 alert email with one JPEG attachment per file name.
pub fn alert_email(subject: &str, body: &str, attachments: &[&str]) -> Vec<u8> {
    let mut raw = format!(
        "From: Camera <cam@example.com>\r\nTo: alerts@example.com\r\nSubject: {}\r\nMIME-Version: 1.0\r\nContent-Type: multipart/mixed; boundary=\"B\"\r\n\r\n--B\r\nContent-Type: text/plain; charset=utf-8\r\n\r\n{}\r\n",
        subject, body
    );
    for name in attachments {
        raw.push_str(&format!(
            "--B\r\nContent-Type: image/jpeg; name=\"{0}\"\r\nContent-Transfer-Encoding: base64\r\nContent-Disposition: attachment; filename=\"{0}\"\r\n\r\n{1}\r\n",
            name,
            BASE64.encode(JPEG_BYTES)
        ));
    }
    raw.push_str("--B--\r\n");
    raw.into_bytes()
}

// --- Notifier ---

/// Records everything sent through it.
#[derive(Default)]
pub struct RecordingNotifier {
    pub alerts: Mutex<Vec<Alert>>,
    pub admin_texts: Mutex<Vec<String>>,
    pub fail_alerts: bool,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            fail_alerts: true,
            ..Self::default()
        }
    }

    pub fn alerts(&self) -> Vec<Alert> {
        self.alerts.lock().unwrap().clone()
    }

    pub fn admin_texts(&self) -> Vec<String> {
        self.admin_texts.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send_alert(&self, alert: &Alert) -> Result<(), NotifyError> {
        if self.fail_alerts {
            return Err(NotifyError::Request("channel down".to_string()));
        }
        self.alerts.lock().unwrap().push(alert.clone());
        Ok(())
    }

    async fn send_admin_text(&self, text: &str) -> Result<(), NotifyError> {
        self.admin_texts.lock().unwrap().push(text.to_string());
        Ok(())
    }
}

// --- Analysis provider ---

/// Provider that replays scripted results and records the keys it saw.
pub struct ScriptedProvider {
    name: String,
    script: Mutex<VecDeque<Result<String, ProviderError>>>,
    pub keys_seen: Mutex<Vec<String>>,
    pub frames_seen: Mutex<Vec<usize>>,
}

impl ScriptedProvider {
    pub fn new(name: &str, script: Vec<Result<String, ProviderError>>) -> Self {
        Self {
            name: name.to_string(),
            script: Mutex::new(script.into()),
            keys_seen: Mutex::new(Vec::new()),
            frames_seen: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> usize {
        self.keys_seen.lock().unwrap().len()
    }
}

#[async_trait]
impl AnalysisProvider for ScriptedProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn attempt(&self, request: &AnalysisRequest<'_>, api_key: &str) -> Result<String, ProviderError> {
        self.keys_seen.lock().unwrap().push(api_key.to_string());
        self.frames_seen.lock().unwrap().push(request.images.len());
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(ProviderError::Unavailable("script exhausted".to_string())))
    }
}

// --- Message handler ---

/// Collects delivered events and wakes waiters.
#[derive(Default)]
pub struct CollectingHandler {
    pub events: Mutex<Vec<Event>>,
    pub delivered: Notify,
    /// Artificial processing time per event.
    pub delay: Option<Duration>,
}

impl CollectingHandler {
    pub fn subjects(&self) -> Vec<String> {
        self.events.lock().unwrap().iter().map(|e| e.subject().to_string()).collect()
    }

    pub fn count(&self) -> usize {
        self.events.lock().unwrap().len()
    }
}

#[async_trait]
impl MessageHandler for CollectingHandler {
    async fn on_event(&self, event: Event) {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.events.lock().unwrap().push(event);
        self.delivered.notify_waiters();
    }
}

// --- Mailbox ---

#[derive(Debug, Clone)]
pub struct StoredMessage {
    pub subject: String,
    pub raw: Vec<u8>,
    pub seen: bool,
}

#[derive(Default)]
struct MailboxState {
    messages: BTreeMap<u32, StoredMessage>,
    next_uid: u32,
    /// Remaining connect attempts that should fail.
    failing_connects: usize,
    /// Messages whose `\Seen` update fails.
    unmarkable: Vec<u32>,
    /// Live sessions are dropped when this generation changes.
    generation: usize,
}

/// In-memory mailbox standing in for an IMAP server.
#[derive(Clone, Default)]
pub struct FakeMailbox {
    state: Arc<Mutex<MailboxState>>,
    arrivals: Arc<Notify>,
    pub connects: Arc<AtomicUsize>,
    pub logouts: Arc<AtomicUsize>,
    pub seen_updates: Arc<AtomicUsize>,
}

impl FakeMailbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an unread message and pushes a change notification.
    pub fn deliver(&self, subject: &str, raw: Vec<u8>) -> u32 {
        let uid = {
            let mut state = self.state.lock().unwrap();
            state.next_uid += 1;
            let uid = state.next_uid;
            state.messages.insert(
                uid,
                StoredMessage {
                    subject: subject.to_string(),
                    raw,
                    seen: false,
                },
            );
            uid
        };
        self.arrivals.notify_waiters();
        uid
    }

    /// Adds a message without notifying idle sessions, so only a poll finds it.
    pub fn deliver_quietly(&self, subject: &str, raw: Vec<u8>) -> u32 {
        let mut state = self.state.lock().unwrap();
        state.next_uid += 1;
        let uid = state.next_uid;
        state.messages.insert(
            uid,
            StoredMessage {
                subject: subject.to_string(),
                raw,
                seen: false,
            },
        );
        uid
    }

    pub fn fail_next_connects(&self, count: usize) {
        self.state.lock().unwrap().failing_connects = count;
    }

    pub fn refuse_seen_for(&self, uid: u32) {
        self.state.lock().unwrap().unmarkable.push(uid);
    }

    /// Breaks every open session, as a server restart would.
    pub fn drop_connections(&self) {
        self.state.lock().unwrap().generation += 1;
        self.arrivals.notify_waiters();
    }

    pub fn is_seen(&self, uid: u32) -> bool {
        self.state.lock().unwrap().messages.get(&uid).map_or(false, |m| m.seen)
    }

    pub fn unseen_count(&self) -> usize {
        self.state.lock().unwrap().messages.values().filter(|m| !m.seen).count()
    }
}

pub struct FakeSession {
    mailbox: FakeMailbox,
    generation: usize,
}

impl FakeSession {
    fn check_alive(&self) -> Result<(), ImapError> {
        if self.mailbox.state.lock().unwrap().generation != self.generation {
            return Err(ImapError::SessionClosed);
        }
        Ok(())
    }
}

#[async_trait]
impl MailConnector for FakeMailbox {
    async fn connect(&self) -> Result<Box<dyn MailSession>, ImapError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state.lock().unwrap();
        if state.failing_connects > 0 {
            state.failing_connects -= 1;
            return Err(ImapError::Connection("connection refused".to_string()));
        }
        Ok(Box::new(FakeSession {
            mailbox: self.clone(),
            generation: state.generation,
        }))
    }
}

#[async_trait]
impl MailSession for FakeSession {
    async fn wait_for_change(&mut self, max_wait: Duration) -> Result<WaitOutcome, ImapError> {
        self.check_alive()?;
        let arrivals = self.mailbox.arrivals.clone();
        let notified = arrivals.notified();
        tokio::select! {
            _ = notified => {
                self.check_alive()?;
                Ok(WaitOutcome::Changed)
            }
            _ = tokio::time::sleep(max_wait) => Ok(WaitOutcome::TimedOut),
        }
    }

    async fn search_unseen(&mut self, subject: &str) -> Result<Vec<u32>, ImapError> {
        self.check_alive()?;
        let needle = subject.to_lowercase();
        let state = self.mailbox.state.lock().unwrap();
        Ok(state
            .messages
            .iter()
            .filter(|(_, m)| !m.seen && m.subject.to_lowercase().contains(&needle))
            .map(|(uid, _)| *uid)
            .collect())
    }

    async fn fetch_raw(&mut self, uid: u32) -> Result<Option<Vec<u8>>, ImapError> {
        self.check_alive()?;
        let state = self.mailbox.state.lock().unwrap();
        Ok(state.messages.get(&uid).map(|m| m.raw.clone()))
    }

    async fn mark_seen(&mut self, uid: u32) -> Result<(), ImapError> {
        self.check_alive()?;
        let mut state = self.mailbox.state.lock().unwrap();
        if state.unmarkable.contains(&uid) {
            return Err(ImapError::Command("STORE failed".to_string()));
        }
        if let Some(message) = state.messages.get_mut(&uid) {
            message.seen = true;
        }
        self.mailbox.seen_updates.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn logout(&mut self) -> Result<(), ImapError> {
        self.mailbox.logouts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

mockall::mock! {
    pub Notifier {}

    #[async_trait]
    impl Notifier for Notifier {
        async fn send_alert(&self, alert: &Alert) -> Result<(), NotifyError>;
        async fn send_admin_text(&self, text: &str) -> Result<(), NotifyError>;
    }
}

// --- Analyzer ---

/// Analyzer returning a fixed verdict and recording what it was asked.
pub struct FixedAnalyzer {
    decision: Option<AnalysisDecision>,
    pub contexts: Mutex<Vec<String>>,
    pub frame_counts: Mutex<Vec<usize>>,
}

impl FixedAnalyzer {
    pub fn new(decision: Option<AnalysisDecision>) -> Self {
        Self {
            decision,
            contexts: Mutex::new(Vec::new()),
            frame_counts: Mutex::new(Vec::new()),
        }
    }

    pub fn alerting(confidence: f64) -> Self {
        Self::new(Some(AnalysisDecision::new(true, "Person at the gate", confidence, vec!["person".into()])))
    }

    pub fn calls(&self) -> usize {
        self.contexts.lock().unwrap().len()
    }
}

#[async_trait]
impl Analyzer for FixedAnalyzer {
    async fn analyze(&self, request: &AnalysisRequest<'_>) -> Option<AnalysisDecision> {
        self.contexts.lock().unwrap().push(request.context.to_string());
        self.frame_counts.lock().unwrap().push(request.images.len());
        self.decision.clone()
    }
}

// --- Clock ---

/// Clock that only moves when told to.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<DateTime<Utc>>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Arc::new(Mutex::new(start)),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap();
        *now += chrono::Duration::from_std(by).unwrap();
    }

    pub fn set(&self, to: DateTime<Utc>) {
        *self.now.lock().unwrap() = to;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }
}
