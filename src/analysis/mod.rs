// Copyright (c) 2025 TexasFortress.AI
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Image analysis with ordered provider failover.
//!
//! The coordinator walks a list of [`ProviderStrategy`]s. Each strategy
//! names a provider and where its credential comes from. Strategies backed
//! by the [`CredentialPool`] abort the whole analysis when the pool has no
//! capacity, since every later pooled strategy would hit the same wall.

use std::sync::Arc;

use async_trait::async_trait;
use log::{debug, info, warn};

use crate::credentials::{Credential, CredentialPool};
use crate::models::AnalysisDecision;

pub mod parser;
pub mod provider;

pub use parser::parse_decision;
pub use provider::{AnalysisProvider, AnalysisRequest, ChatVisionProvider, DetectorProvider, ProviderError};

/// Where a strategy gets the key it authenticates with.
#[derive(Debug, Clone)]
pub enum CredentialSource {
    /// Rotated through the shared pool, counted against the daily quota.
    Pool,
    /// Dedicated secret that is neither rotated nor counted.
    Fixed(Credential),
}

#[derive(Clone)]
pub struct ProviderStrategy {
    pub provider: Arc<dyn AnalysisProvider>,
    pub credentials: CredentialSource,
}

impl ProviderStrategy {
    pub fn pooled(provider: Arc<dyn AnalysisProvider>) -> Self {
        Self {
            provider,
            credentials: CredentialSource::Pool,
        }
    }

    pub fn fixed(provider: Arc<dyn AnalysisProvider>, secret: impl Into<String>) -> Self {
        Self {
            provider,
            credentials: CredentialSource::Fixed(Credential::new(secret)),
        }
    }
}

/// Anything that can turn images into a decision. `None` means no decision
/// could be produced; the caller drops the event.
#[async_trait]
pub trait Analyzer: Send + Sync {
    async fn analyze(&self, request: &AnalysisRequest<'_>) -> Option<AnalysisDecision>;
}

pub struct AnalysisCoordinator {
    strategies: Vec<ProviderStrategy>,
    pool: Arc<CredentialPool>,
}

impl AnalysisCoordinator {
    pub fn new(strategies: Vec<ProviderStrategy>, pool: Arc<CredentialPool>) -> Self {
        Self { strategies, pool }
    }

    pub fn strategies(&self) -> &[ProviderStrategy] {
        &self.strategies
    }
}

#[async_trait]
impl Analyzer for AnalysisCoordinator {
    async fn analyze(&self, request: &AnalysisRequest<'_>) -> Option<AnalysisDecision> {
        if request.images.is_empty() {
            warn!("Analysis requested without images");
            return None;
        }

        for strategy in &self.strategies {
            let provider = &strategy.provider;
            let (credential, pooled) = match &strategy.credentials {
                CredentialSource::Fixed(credential) => (credential.clone(), false),
                CredentialSource::Pool => match self.pool.issue().await {
                    Some(credential) => (credential, true),
                    None => {
                        warn!("No API credential available, abandoning analysis for '{}'", request.context);
                        return None;
                    }
                },
            };

            debug!(
                "Trying {} with credential {} for '{}'",
                provider.name(),
                credential.fingerprint(),
                request.context
            );

            match provider.attempt(request, credential.secret()).await {
                Ok(reply) => {
                    let decision = parse_decision(&reply);
                    if pooled {
                        self.pool.record_use(&credential).await;
                    }
                    info!(
                        "{} decided shouldAlert={} confidence={} for '{}'",
                        provider.name(),
                        decision.should_alert,
                        decision.confidence,
                        request.context
                    );
                    return Some(decision);
                }
                Err(err) if err.downgrades_credential() => {
                    warn!(
                        "{} rejected credential {}: {}; failing over",
                        provider.name(),
                        credential.fingerprint(),
                        err
                    );
                    if pooled {
                        self.pool.disable(&credential, &err.to_string()).await;
                    }
                }
                Err(err) => {
                    warn!("{} failed: {}; failing over", provider.name(), err);
                }
            }
        }

        warn!("All analysis strategies failed for '{}'", request.context);
        None
    }
}
