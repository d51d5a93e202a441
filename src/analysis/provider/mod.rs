// Copyright (c) 2025 TexasFortress.AI
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use async_trait::async_trait;
use reqwest::StatusCode;
use thiserror::Error;

use crate::filter::DetectionTuning;
use crate::models::ImagePayload;

pub mod chat;
pub mod detector;

pub use chat::ChatVisionProvider;
pub use detector::DetectorProvider;

/// Everything a provider needs to judge one event.
#[derive(Debug, Clone, Copy)]
pub struct AnalysisRequest<'a> {
    /// Ordered frames; the first one is the primary image.
    pub images: &'a [ImagePayload],
    /// Human-readable label, usually the camera name.
    pub context: &'a str,
    /// Free-text rules the model must honour when deciding to alert.
    pub rules: &'a str,
    pub tuning: &'a DetectionTuning,
}

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("Rate limited by provider: {0}")]
    RateLimited(String),

    #[error("Credential rejected ({status}): {body}")]
    Rejected { status: u16, body: String },

    #[error("Provider unavailable: {0}")]
    Unavailable(String),

    #[error("Request failed: {0}")]
    Request(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Nothing to analyze: {0}")]
    NoInput(String),
}

impl ProviderError {
    /// Whether the failure is the credential's fault and it should not be
    /// offered again today.
    pub fn downgrades_credential(&self) -> bool {
        matches!(self, ProviderError::RateLimited(_) | ProviderError::Rejected { .. })
    }

    /// Maps a non-success HTTP status onto the error taxonomy.
    pub fn from_status(status: StatusCode, body: String) -> Self {
        match status.as_u16() {
            429 => ProviderError::RateLimited(body),
            401 | 403 => ProviderError::Rejected {
                status: status.as_u16(),
                body,
            },
            500..=599 => ProviderError::Unavailable(format!("{}: {}", status, body)),
            _ => ProviderError::Request(format!("{}: {}", status, body)),
        }
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() || err.is_connect() {
            ProviderError::Unavailable(err.to_string())
        } else if err.is_decode() {
            ProviderError::InvalidResponse(err.to_string())
        } else {
            ProviderError::Request(err.to_string())
        }
    }
}

/// One inference backend behind the uniform "attempt" interface.
///
/// An attempt returns the provider's raw reply text; parsing into a
/// decision is the coordinator's job.
#[async_trait]
pub trait AnalysisProvider: Send + Sync {
    /// Short label for logs, e.g. `chat:gpt-4o-mini` or `detector`.
    fn name(&self) -> &str;

    async fn attempt(&self, request: &AnalysisRequest<'_>, api_key: &str) -> Result<String, ProviderError>;
}
