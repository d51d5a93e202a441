// Copyright (c) 2025 TexasFortress.AI
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Rotating pool of rate-limited API keys.
//!
//! Three independent gates decide whether a key can be handed out:
//! the daily quota (shared bookkeeping, persisted per calendar date), a
//! per-key cooldown since the key was last issued, and round-robin order
//! starting after the previously issued key.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, FixedOffset, NaiveDate, Offset, Utc};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;

use super::store::{QuotaState, QuotaStore, QuotaStoreError, UsageRecord};
use crate::notify::Notifier;

/// Source of wall-clock time for quota dates and cooldowns.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Stable, non-reversible identifier for a secret.
pub fn fingerprint(secret: &str) -> String {
    let digest = Sha256::digest(secret.as_bytes());
    hex::encode(digest)[..16].to_string()
}

/// An API key together with its fingerprint.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    secret: String,
    fingerprint: String,
}

impl Credential {
    pub fn new(secret: impl Into<String>) -> Self {
        let secret = secret.into();
        let fingerprint = fingerprint(&secret);
        Self { secret, fingerprint }
    }

    pub fn secret(&self) -> &str {
        &self.secret
    }

    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("fingerprint", &self.fingerprint)
            .finish_non_exhaustive()
    }
}

/// Quota settings shared by every credential in the pool.
#[derive(Debug, Clone)]
pub struct QuotaPolicy {
    pub daily_quota: u32,
    pub cooldown: Duration,
    /// Offset used to decide where one calendar day ends.
    pub utc_offset: FixedOffset,
}

impl Default for QuotaPolicy {
    fn default() -> Self {
        Self {
            daily_quota: 1000,
            cooldown: Duration::from_secs(60),
            utc_offset: Utc.fix(),
        }
    }
}

/// Usage snapshot of one credential, for the admin surface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialUsage {
    pub fingerprint: String,
    pub usage_count: u32,
    pub daily_quota: u32,
    pub exhausted: bool,
    pub cooling_down: bool,
}

struct PoolInner {
    credentials: Vec<Credential>,
    policy: QuotaPolicy,
    state: QuotaState,
    cursor: usize,
    last_issued: HashMap<String, DateTime<Utc>>,
}

impl PoolInner {
    fn today(&self, now: DateTime<Utc>) -> NaiveDate {
        now.with_timezone(&self.policy.utc_offset).date_naive()
    }

    /// Starts a fresh day if the stored date is stale. Returns true when the
    /// state changed.
    fn roll_over(&mut self, now: DateTime<Utc>) -> bool {
        let today = self.today(now);
        if self.state.date == Some(today) {
            return false;
        }
        info!("Quota day rolled over to {}, resetting usage for all credentials", today);
        self.state = QuotaState::for_date(today);
        true
    }

    fn record_mut(&mut self, fingerprint: &str) -> &mut UsageRecord {
        self.state.credentials.entry(fingerprint.to_string()).or_default()
    }

    fn is_cooling(&self, fingerprint: &str, now: DateTime<Utc>) -> bool {
        let Some(issued_at) = self.last_issued.get(fingerprint) else {
            return false;
        };
        match (now - *issued_at).to_std() {
            Ok(elapsed) => elapsed < self.policy.cooldown,
            // Issued "in the future": clock went backwards, treat as cooling.
            Err(_) => !self.policy.cooldown.is_zero(),
        }
    }
}

/// Hands out API keys in rotation under a shared daily quota.
///
/// All state mutations go through a single async mutex and are written to
/// the [`QuotaStore`] before the lock is released. Administrative
/// notifications are sent after the lock is dropped.
pub struct CredentialPool {
    inner: Mutex<PoolInner>,
    store: Arc<dyn QuotaStore>,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
}

impl CredentialPool {
    pub fn new(
        secrets: Vec<String>,
        policy: QuotaPolicy,
        store: Arc<dyn QuotaStore>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            inner: Mutex::new(PoolInner {
                credentials: build_credentials(secrets),
                policy,
                state: QuotaState::default(),
                cursor: 0,
                last_issued: HashMap::new(),
            }),
            store,
            notifier,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Loads persisted usage. State from an earlier date is discarded.
    pub async fn initialize(&self) -> Result<(), QuotaStoreError> {
        let now = self.clock.now();
        let mut inner = self.inner.lock().await;
        let today = inner.today(now);

        match self.store.load().await? {
            Some(state) if state.date == Some(today) => {
                info!(
                    "Restored quota usage for {} ({} credentials tracked)",
                    today,
                    state.credentials.len()
                );
                inner.state = state;
            }
            Some(state) => {
                info!("Stored quota usage is from {:?}, starting fresh for {}", state.date, today);
                inner.state = QuotaState::for_date(today);
                self.store.save(&inner.state).await?;
            }
            None => {
                debug!("No stored quota usage, starting fresh for {}", today);
                inner.state = QuotaState::for_date(today);
                self.store.save(&inner.state).await?;
            }
        }

        info!(
            "Credential pool ready: {} credentials, daily quota {}, cooldown {:?}",
            inner.credentials.len(),
            inner.policy.daily_quota,
            inner.policy.cooldown
        );
        Ok(())
    }

    /// Issues the next usable credential, or `None` when every credential is
    /// exhausted or cooling down. `None` means "no capacity right now".
    pub async fn issue(&self) -> Option<Credential> {
        let now = self.clock.now();
        let mut notices = Vec::new();

        let issued = {
            let mut inner = self.inner.lock().await;
            let mut dirty = inner.roll_over(now);
            let count = inner.credentials.len();
            let quota = inner.policy.daily_quota;
            let mut issued = None;

            for step in 0..count {
                let index = (inner.cursor + step) % count;
                let credential = inner.credentials[index].clone();
                let fp = credential.fingerprint().to_string();

                let record = *inner.record_mut(&fp);
                if record.exhausted {
                    continue;
                }
                if record.usage_count >= quota {
                    // Self-heal: a count at quota must never be issued again today.
                    inner.record_mut(&fp).exhausted = true;
                    dirty = true;
                    notices.push(exhausted_notice(&fp, record.usage_count, quota));
                    continue;
                }
                if inner.is_cooling(&fp, now) {
                    continue;
                }

                inner.last_issued.insert(fp, now);
                inner.cursor = (index + 1) % count;
                issued = Some(credential);
                break;
            }

            if dirty {
                self.persist(&inner.state).await;
            }
            issued
        };

        match &issued {
            Some(credential) => debug!("Issued credential {}", credential.fingerprint()),
            None => debug!("No credential available (all exhausted or cooling down)"),
        }

        self.send_notices(notices).await;
        issued
    }

    /// Counts one successful use. Reaching the quota exhausts the credential
    /// and notifies the administrator once.
    pub async fn record_use(&self, credential: &Credential) {
        let now = self.clock.now();
        let mut notices = Vec::new();

        {
            let mut inner = self.inner.lock().await;
            inner.roll_over(now);
            let quota = inner.policy.daily_quota;
            let record = inner.record_mut(credential.fingerprint());
            record.usage_count = record.usage_count.saturating_add(1);
            let usage_count = record.usage_count;

            if usage_count >= quota && !record.exhausted {
                record.exhausted = true;
                notices.push(exhausted_notice(credential.fingerprint(), usage_count, quota));
            }
            debug!("Credential {} used {}/{} today", credential.fingerprint(), usage_count, quota);

            self.persist(&inner.state).await;
        }

        self.send_notices(notices).await;
    }

    /// Marks a credential exhausted outside the quota path, e.g. after the
    /// provider rate-limited or rejected it.
    pub async fn disable(&self, credential: &Credential, reason: &str) {
        let now = self.clock.now();

        let newly_disabled = {
            let mut inner = self.inner.lock().await;
            inner.roll_over(now);
            let record = inner.record_mut(credential.fingerprint());
            if record.exhausted {
                false
            } else {
                record.exhausted = true;
                self.persist(&inner.state).await;
                true
            }
        };

        if newly_disabled {
            warn!("Credential {} disabled: {}", credential.fingerprint(), reason);
            self.send_notices(vec![format!(
                "⛔ API key {} disabled for the rest of the day: {}",
                credential.fingerprint(),
                reason
            )])
            .await;
        } else {
            debug!("Credential {} already disabled, ignoring: {}", credential.fingerprint(), reason);
        }
    }

    /// Clears today's counts and exhausted flags.
    pub async fn reset_all(&self) {
        let now = self.clock.now();
        let mut inner = self.inner.lock().await;
        let today = inner.today(now);
        inner.state = QuotaState::for_date(today);
        self.persist(&inner.state).await;
        info!("Quota usage reset for {} credentials", inner.credentials.len());
    }

    /// Replaces the credential list and quota policy, keeping usage counts
    /// accumulated so far today.
    pub async fn reload(&self, secrets: Vec<String>, policy: QuotaPolicy) {
        let mut inner = self.inner.lock().await;
        let credentials = build_credentials(secrets);

        inner
            .last_issued
            .retain(|fp, _| credentials.iter().any(|c| c.fingerprint() == fp));
        inner.cursor = if credentials.is_empty() {
            0
        } else {
            inner.cursor % credentials.len()
        };
        inner.credentials = credentials;
        inner.policy = policy;

        info!(
            "Credential pool reloaded: {} credentials, daily quota {}, cooldown {:?}",
            inner.credentials.len(),
            inner.policy.daily_quota,
            inner.policy.cooldown
        );
    }

    /// Current usage of every configured credential, in configuration order.
    pub async fn usage(&self) -> Vec<CredentialUsage> {
        let now = self.clock.now();
        let mut inner = self.inner.lock().await;
        if inner.roll_over(now) {
            self.persist(&inner.state).await;
        }

        inner
            .credentials
            .iter()
            .map(|credential| {
                let fp = credential.fingerprint();
                let record = inner.state.credentials.get(fp).copied().unwrap_or_default();
                CredentialUsage {
                    fingerprint: fp.to_string(),
                    usage_count: record.usage_count,
                    daily_quota: inner.policy.daily_quota,
                    exhausted: record.exhausted,
                    cooling_down: inner.is_cooling(fp, now),
                }
            })
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.credentials.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    async fn persist(&self, state: &QuotaState) {
        if let Err(e) = self.store.save(state).await {
            warn!("Failed to persist quota state: {}", e);
        }
    }

    async fn send_notices(&self, notices: Vec<String>) {
        for notice in notices {
            if let Err(e) = self.notifier.send_admin_text(&notice).await {
                warn!("Failed to send admin notification: {}", e);
            }
        }
    }
}

fn exhausted_notice(fingerprint: &str, usage_count: u32, quota: u32) -> String {
    format!(
        "⚠️ API key {} reached its daily quota ({}/{}) and is disabled until tomorrow.",
        fingerprint, usage_count, quota
    )
}

fn build_credentials(secrets: Vec<String>) -> Vec<Credential> {
    let mut credentials: Vec<Credential> = Vec::new();
    for secret in secrets {
        let secret = secret.trim();
        if secret.is_empty() {
            continue;
        }
        let credential = Credential::new(secret);
        if credentials.iter().any(|c| c.fingerprint() == credential.fingerprint()) {
            warn!("Ignoring duplicate credential {}", credential.fingerprint());
            continue;
        }
        credentials.push(credential);
    }
    credentials
}
