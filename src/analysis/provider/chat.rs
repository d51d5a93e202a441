// Copyright (c) 2025 TexasFortress.AI
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

// OpenAI-compatible chat completion endpoint with image input.

use std::time::Duration;

use async_trait::async_trait;
use log::{debug, error, warn};
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::{AnalysisProvider, AnalysisRequest, ProviderError};

pub const DEFAULT_CHAT_BASE_URL: &str = "https://api.openai.com/v1";

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Serialize)]
struct ChatMessage {
    role: &'static str,
    content: Vec<ContentPart>,
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Serialize)]
struct ImageUrl {
    url: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Vision-capable chat model reached through `/chat/completions`.
///
/// Only the primary image is sent; multi-frame sequences go to the
/// detection service.
#[derive(Clone)]
pub struct ChatVisionProvider {
    name: String,
    http_client: Client,
    base_url: String,
    model: String,
    max_tokens: u32,
    temperature: f32,
    timeout: Duration,
}

impl ChatVisionProvider {
    pub fn new(http_client: Client, base_url: impl Into<String>, model: impl Into<String>) -> Self {
        let model = model.into();
        Self {
            name: format!("chat:{}", model),
            http_client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model,
            max_tokens: 300,
            temperature: 0.2,
            timeout: Duration::from_secs(15),
        }
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

/// Instruction text sent alongside the image.
pub fn build_prompt(context: &str, rules: &str) -> String {
    let rules = if rules.trim().is_empty() {
        "Alert only when a person or vehicle is doing something a security guard would want to know about."
    } else {
        rules.trim()
    };
    format!(
        "You are a security camera analyst. The image was captured by the camera \"{}\" after it detected motion.\n\
         Security rules: {}\n\
         Decide whether this frame warrants an alert under those rules.\n\
         Respond ONLY with a JSON object of the form \
         {{\"shouldAlert\": true|false, \"description\": \"one short sentence\", \"confidence\": 0-100, \"detectedObjects\": [\"person\", ...]}}.",
        context, rules
    )
}

#[async_trait]
impl AnalysisProvider for ChatVisionProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn attempt(&self, request: &AnalysisRequest<'_>, api_key: &str) -> Result<String, ProviderError> {
        let image = request
            .images
            .first()
            .ok_or_else(|| ProviderError::NoInput("no image in request".to_string()))?;

        let payload = ChatRequest {
            model: &self.model,
            messages: vec![ChatMessage {
                role: "user",
                content: vec![
                    ContentPart::Text {
                        text: build_prompt(request.context, request.rules),
                    },
                    ContentPart::ImageUrl {
                        image_url: ImageUrl {
                            url: image.to_data_uri(),
                        },
                    },
                ],
            }],
            max_tokens: self.max_tokens,
            temperature: self.temperature,
        };

        let url = format!("{}/chat/completions", self.base_url);
        debug!("Sending image ({} bytes) to {} at {}", image.data.len(), self.name, url);

        let response = self
            .http_client
            .post(&url)
            .bearer_auth(api_key)
            .json(&payload)
            .timeout(self.timeout)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_body = response
                .text()
                .await
                .unwrap_or_else(|_| "<failed to read error body>".to_string());
            error!("{} request failed with status {}: {}", self.name, status, error_body);
            return Err(ProviderError::from_status(status, error_body));
        }

        let body = response
            .json::<ChatResponse>()
            .await
            .map_err(|e| ProviderError::InvalidResponse(format!("Failed to deserialize chat response: {}", e)))?;

        match body.choices.into_iter().next().and_then(|c| c.message.content) {
            Some(content) => Ok(content),
            None => {
                warn!("{} response did not contain any choices", self.name);
                Err(ProviderError::InvalidResponse("response was empty or missing choices".to_string()))
            }
        }
    }
}
