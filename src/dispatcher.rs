// Copyright (c) 2025 TexasFortress.AI
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use std::sync::Arc;

use async_trait::async_trait;
use log::{debug, error, info, warn};

use crate::analysis::{AnalysisRequest, Analyzer};
use crate::filter::SharedFilter;
use crate::models::Event;
use crate::notify::{Alert, Notifier};
use crate::watcher::MessageHandler;

/// Description used when a forwarded alert has neither body text nor subject.
pub const FALLBACK_DESCRIPTION: &str = "Motion detected";

/// Which gate an event stopped at, or how it left the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    FilterDisabled,
    Forwarded,
    AnalysisFailed,
    NoAlert,
    SuppressedLowConfidence,
    Notified,
    NotifyFailed,
}

/// Routes events through the filter, the analyzer and the notifier.
pub struct Dispatcher {
    filter: SharedFilter,
    analyzer: Arc<dyn Analyzer>,
    notifier: Arc<dyn Notifier>,
}

impl Dispatcher {
    pub fn new(filter: SharedFilter, analyzer: Arc<dyn Analyzer>, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            filter,
            analyzer,
            notifier,
        }
    }

    pub async fn handle(&self, event: &Event) -> DispatchOutcome {
        // One snapshot per event so an admin edit mid-flight cannot mix settings.
        let view = self.filter.view().await;
        let camera = event.camera_name().to_string();

        if !view.filter.enabled {
            debug!("Filtering disabled, dropping alert from '{}'", camera);
            return DispatchOutcome::FilterDisabled;
        }

        if !view.ai_enabled {
            let alert = Alert {
                camera,
                description: forward_description(event),
                confidence: None,
                image: event.primary_image().clone(),
            };
            return match self.notifier.send_alert(&alert).await {
                Ok(()) => {
                    info!("Forwarded alert from '{}' without analysis", alert.camera);
                    DispatchOutcome::Forwarded
                }
                Err(e) => {
                    error!("Failed to forward alert from '{}': {}", alert.camera, e);
                    DispatchOutcome::NotifyFailed
                }
            };
        }

        let request = AnalysisRequest {
            images: event.images(),
            context: &camera,
            rules: &view.filter.rules,
            tuning: &view.filter.tuning,
        };

        let decision = match self.analyzer.analyze(&request).await {
            Some(decision) => decision,
            None => {
                warn!("Analysis failed for alert from '{}', dropping it", camera);
                return DispatchOutcome::AnalysisFailed;
            }
        };

        if !decision.should_alert {
            info!("No alert for '{}': {}", camera, decision.description);
            return DispatchOutcome::NoAlert;
        }

        if decision.confidence < view.filter.min_confidence {
            info!(
                "Suppressed low-confidence alert for '{}' ({}% < {}%): {}",
                camera, decision.confidence, view.filter.min_confidence, decision.description
            );
            return DispatchOutcome::SuppressedLowConfidence;
        }

        let alert = Alert {
            camera,
            description: decision.description,
            confidence: Some(decision.confidence),
            image: event.primary_image().clone(),
        };
        match self.notifier.send_alert(&alert).await {
            Ok(()) => {
                info!("Alert sent for '{}' ({}%)", alert.camera, decision.confidence);
                DispatchOutcome::Notified
            }
            Err(e) => {
                error!("Failed to send alert for '{}': {}", alert.camera, e);
                DispatchOutcome::NotifyFailed
            }
        }
    }
}

#[async_trait]
impl MessageHandler for Dispatcher {
    async fn on_event(&self, event: Event) {
        self.handle(&event).await;
    }
}

/// Body text, else subject, else a fixed fallback.
pub fn forward_description(event: &Event) -> String {
    [event.text(), event.subject()]
        .iter()
        .map(|s| s.trim())
        .find(|s| !s.is_empty())
        .unwrap_or(FALLBACK_DESCRIPTION)
        .to_string()
}
