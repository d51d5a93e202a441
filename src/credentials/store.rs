// Copyright (c) 2025 TexasFortress.AI
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::NaiveDate;
use log::debug;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::fs;
use tokio::sync::Mutex;

#[derive(Error, Debug)]
pub enum QuotaStoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Usage of one credential on the recorded date.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageRecord {
    #[serde(default)]
    pub usage_count: u32,
    #[serde(default)]
    pub exhausted: bool,
}

/// Per-day quota bookkeeping, keyed by credential fingerprint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaState {
    pub date: Option<NaiveDate>,
    #[serde(default)]
    pub credentials: BTreeMap<String, UsageRecord>,
}

impl QuotaState {
    pub fn for_date(date: NaiveDate) -> Self {
        Self {
            date: Some(date),
            credentials: BTreeMap::new(),
        }
    }
}

/// Durable storage for [`QuotaState`].
#[async_trait]
pub trait QuotaStore: Send + Sync {
    /// Returns `None` when nothing has been stored yet.
    async fn load(&self) -> Result<Option<QuotaState>, QuotaStoreError>;

    async fn save(&self, state: &QuotaState) -> Result<(), QuotaStoreError>;
}

/// Stores the quota state as a pretty-printed JSON file.
pub struct JsonFileQuotaStore {
    storage_path: PathBuf,
}

impl JsonFileQuotaStore {
    pub fn new(storage_path: impl AsRef<Path>) -> Self {
        Self {
            storage_path: storage_path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.storage_path
    }
}

#[async_trait]
impl QuotaStore for JsonFileQuotaStore {
    async fn load(&self) -> Result<Option<QuotaState>, QuotaStoreError> {
        match fs::read_to_string(&self.storage_path).await {
            Ok(contents) => {
                let state: QuotaState = serde_json::from_str(&contents)?;
                debug!(
                    "Loaded quota state for {:?} ({} credentials) from {}",
                    state.date,
                    state.credentials.len(),
                    self.storage_path.display()
                );
                Ok(Some(state))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn save(&self, state: &QuotaState) -> Result<(), QuotaStoreError> {
        if let Some(parent) = self.storage_path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await?;
            }
        }

        // Write then rename so a crash never leaves a truncated file behind.
        let json = serde_json::to_string_pretty(state)?;
        let tmp_path = self.storage_path.with_extension("json.tmp");
        fs::write(&tmp_path, json).await?;
        fs::rename(&tmp_path, &self.storage_path).await?;
        debug!("Saved quota state to {}", self.storage_path.display());
        Ok(())
    }
}

/// Non-durable store, for tests and for running without a state path.
#[derive(Default)]
pub struct MemoryQuotaStore {
    state: Mutex<Option<QuotaState>>,
}

impl MemoryQuotaStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Last saved state, if any.
    pub async fn snapshot(&self) -> Option<QuotaState> {
        self.state.lock().await.clone()
    }
}

#[async_trait]
impl QuotaStore for MemoryQuotaStore {
    async fn load(&self) -> Result<Option<QuotaState>, QuotaStoreError> {
        Ok(self.state.lock().await.clone())
    }

    async fn save(&self, state: &QuotaState) -> Result<(), QuotaStoreError> {
        *self.state.lock().await = Some(state.clone());
        Ok(())
    }
}
