// Copyright (c) 2025 TexasFortress.AI
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use std::time::Duration;

use async_trait::async_trait;
use log::{debug, error, warn};
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use serde::Serialize;

use super::{Alert, Notifier, NotifyError};

pub const DEFAULT_TELEGRAM_API: &str = "https://api.telegram.org";

// Telegram rejects captions longer than this.
const MAX_CAPTION_CHARS: usize = 1024;

#[derive(Serialize)]
struct SendMessageRequest<'a> {
    chat_id: &'a str,
    text: &'a str,
}

/// Telegram Bot API notifier.
///
/// Alerts go to every chat in `chat_ids` via `sendPhoto`; admin messages go
/// to `admin_chat_id` via `sendMessage`.
#[derive(Clone)]
pub struct TelegramNotifier {
    http_client: Client,
    api_base: String,
    bot_token: String,
    chat_ids: Vec<String>,
    admin_chat_id: Option<String>,
    timeout: Duration,
}

impl TelegramNotifier {
    pub fn new(
        http_client: Client,
        bot_token: String,
        chat_ids: Vec<String>,
        admin_chat_id: Option<String>,
    ) -> Self {
        Self {
            http_client,
            api_base: DEFAULT_TELEGRAM_API.to_string(),
            bot_token,
            chat_ids,
            admin_chat_id,
            timeout: Duration::from_secs(30),
        }
    }

    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", self.api_base, self.bot_token, method)
    }

    async fn send_photo(&self, chat_id: &str, alert: &Alert) -> Result<(), NotifyError> {
        let caption: String = alert.caption().chars().take(MAX_CAPTION_CHARS).collect();
        let photo = Part::bytes(alert.image.data.clone())
            .file_name(alert.image.filename.clone())
            .mime_str(&alert.image.content_type)?;
        let form = Form::new()
            .text("chat_id", chat_id.to_string())
            .text("caption", caption)
            .part("photo", photo);

        let response = self
            .http_client
            .post(self.method_url("sendPhoto"))
            .multipart(form)
            .timeout(self.timeout)
            .send()
            .await?;

        check_status(response).await
    }

    async fn send_message(&self, chat_id: &str, text: &str) -> Result<(), NotifyError> {
        let response = self
            .http_client
            .post(self.method_url("sendMessage"))
            .json(&SendMessageRequest { chat_id, text })
            .timeout(self.timeout)
            .send()
            .await?;

        check_status(response).await
    }
}

async fn check_status(response: reqwest::Response) -> Result<(), NotifyError> {
    let status = response.status();
    if status.is_success() {
        return Ok(());
    }
    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "<failed to read error body>".to_string());
    Err(NotifyError::Rejected {
        status: status.as_u16(),
        body,
    })
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn send_alert(&self, alert: &Alert) -> Result<(), NotifyError> {
        if self.chat_ids.is_empty() {
            return Err(NotifyError::NotConfigured("no recipient chat ids".to_string()));
        }

        let mut first_error = None;
        for chat_id in &self.chat_ids {
            match self.send_photo(chat_id, alert).await {
                Ok(()) => debug!("Alert photo delivered to chat {}", chat_id),
                Err(e) => {
                    error!("Failed to deliver alert to chat {}: {}", chat_id, e);
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    async fn send_admin_text(&self, text: &str) -> Result<(), NotifyError> {
        let Some(admin_chat_id) = self.admin_chat_id.as_deref() else {
            warn!("Admin chat id not configured, dropping admin message: {}", text);
            return Err(NotifyError::NotConfigured("no admin chat id".to_string()));
        };
        self.send_message(admin_chat_id, text).await
    }
}
