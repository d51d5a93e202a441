// Copyright (c) 2025 TexasFortress.AI
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Outbound notification channel.
//!
//! The pipeline only needs two operations: an alert carrying an image and a
//! caption, and a plain text message to the administrator.

use async_trait::async_trait;
use thiserror::Error;

use crate::models::ImagePayload;

pub mod telegram;

pub use telegram::TelegramNotifier;

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("Notification request failed: {0}")]
    Request(String),

    #[error("Notification channel rejected the message ({status}): {body}")]
    Rejected { status: u16, body: String },

    #[error("Notification channel is not configured: {0}")]
    NotConfigured(String),
}

impl From<reqwest::Error> for NotifyError {
    fn from(err: reqwest::Error) -> Self {
        NotifyError::Request(err.to_string())
    }
}

/// An alert ready to be delivered to every recipient.
#[derive(Debug, Clone)]
pub struct Alert {
    pub camera: String,
    pub description: String,
    /// `None` when the alert was forwarded without analysis.
    pub confidence: Option<u8>,
    pub image: ImagePayload,
}

impl Alert {
    /// Caption text shown under the photo.
    pub fn caption(&self) -> String {
        match self.confidence {
            Some(confidence) => format!("🚨 {}\n{}\nConfidence: {}%", self.camera, self.description, confidence),
            None => format!("🚨 {}\n{}", self.camera, self.description),
        }
    }
}

/// Delivery interface used by the dispatcher and the credential pool.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Sends a photo with caption to every configured recipient.
    async fn send_alert(&self, alert: &Alert) -> Result<(), NotifyError>;

    /// Sends a text message to the administrative recipient only.
    async fn send_admin_text(&self, text: &str) -> Result<(), NotifyError>;
}

/// Notifier that only logs; used when no channel is configured.
#[derive(Debug, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send_alert(&self, alert: &Alert) -> Result<(), NotifyError> {
        log::info!("[alert] {} ({} bytes image)", alert.caption().replace('\n', " | "), alert.image.data.len());
        Ok(())
    }

    async fn send_admin_text(&self, text: &str) -> Result<(), NotifyError> {
        log::info!("[admin] {}", text);
        Ok(())
    }
}
