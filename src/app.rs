// Copyright (c) 2025 TexasFortress.AI
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Builds the runtime components from [`Settings`].

use std::sync::Arc;
use std::time::Duration;

use log::{info, warn};
use reqwest::Client;

use crate::analysis::{ChatVisionProvider, DetectorProvider, ProviderStrategy};
use crate::config::Settings;
use crate::notify::{LogNotifier, Notifier, TelegramNotifier};

/// Telegram when a bot token and at least one recipient are configured,
/// otherwise a notifier that only logs.
pub fn build_notifier(settings: &Settings, http_client: Client) -> Arc<dyn Notifier> {
    let telegram = &settings.notify.telegram;
    if telegram.bot_token.is_empty() || telegram.chat_ids.is_empty() {
        warn!("Telegram is not configured; alerts will only be logged");
        return Arc::new(LogNotifier);
    }
    info!(
        "Telegram notifications to {} chat(s){}",
        telegram.chat_ids.len(),
        if telegram.admin_chat_id.is_some() { " plus admin" } else { "" }
    );
    Arc::new(
        TelegramNotifier::new(
            http_client,
            telegram.bot_token.expose().to_string(),
            telegram.chat_ids.clone(),
            telegram.admin_chat_id.clone(),
        )
        .with_api_base(telegram.api_base.clone()),
    )
}

/// Detection service first (when configured), then one chat strategy per
/// model using pooled credentials.
pub fn build_strategies(settings: &Settings, http_client: Client) -> Vec<ProviderStrategy> {
    let analysis = &settings.analysis;
    let mut strategies = Vec::new();

    if let Some(url) = analysis.detector.url.as_deref().filter(|u| !u.trim().is_empty()) {
        let detector = DetectorProvider::new(http_client.clone(), url)
            .with_timeout(Duration::from_secs(analysis.detector.timeout_secs))
            .with_retry(
                analysis.detector.attempts,
                Duration::from_secs(analysis.detector.retry_delay_secs),
            );
        strategies.push(ProviderStrategy::fixed(
            Arc::new(detector),
            analysis.detector.secret.expose().to_string(),
        ));
    }

    for model in analysis.models.iter().filter(|m| !m.trim().is_empty()) {
        let chat = ChatVisionProvider::new(http_client.clone(), analysis.base_url.clone(), model.trim())
            .with_max_tokens(analysis.max_tokens)
            .with_temperature(analysis.temperature)
            .with_timeout(Duration::from_secs(analysis.request_timeout_secs));
        strategies.push(ProviderStrategy::pooled(Arc::new(chat)));
    }

    strategies
}
