// Copyright (c) 2025 TexasFortress.AI
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use std::time::Duration;

use async_trait::async_trait;
use log::{debug, info, warn};
use reqwest::Client;
use serde::Serialize;

use super::{AnalysisProvider, AnalysisRequest, ProviderError};

#[derive(Serialize)]
struct DetectRequest<'a> {
    images: Vec<String>,
    camera_name: &'a str,
    zone_points: &'a [[f64; 2]],
    person_iou_threshold: f64,
    vehicle_iou_threshold: f64,
    ignore_moving_persons: bool,
}

/// Self-hosted object detection service (`POST {base}/detect`).
///
/// Receives every frame of the event. The service can be slow to warm up,
/// so 5xx replies and connection failures are retried a bounded number of
/// times. A request that runs into the timeout is not retried.
#[derive(Clone)]
pub struct DetectorProvider {
    http_client: Client,
    base_url: String,
    timeout: Duration,
    max_attempts: u32,
    retry_delay: Duration,
}

impl DetectorProvider {
    pub fn new(http_client: Client, base_url: impl Into<String>) -> Self {
        Self {
            http_client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            timeout: Duration::from_secs(120),
            max_attempts: 3,
            retry_delay: Duration::from_secs(2),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_retry(mut self, max_attempts: u32, retry_delay: Duration) -> Self {
        self.max_attempts = max_attempts.max(1);
        self.retry_delay = retry_delay;
        self
    }

    async fn send_once(&self, body: &DetectRequest<'_>, api_key: &str) -> Result<String, Attempt> {
        let url = format!("{}/detect", self.base_url);
        let response = match self
            .http_client
            .post(&url)
            .bearer_auth(api_key)
            .json(body)
            .timeout(self.timeout)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) if e.is_connect() => return Err(Attempt::Retry(ProviderError::from(e))),
            Err(e) => return Err(Attempt::Fatal(ProviderError::from(e))),
        };

        let status = response.status();
        if status.is_success() {
            return response.text().await.map_err(|e| Attempt::Fatal(e.into()));
        }

        let error_body = response
            .text()
            .await
            .unwrap_or_else(|_| "<failed to read error body>".to_string());
        let err = ProviderError::from_status(status, error_body);
        if status.is_server_error() {
            Err(Attempt::Retry(err))
        } else {
            Err(Attempt::Fatal(err))
        }
    }
}

enum Attempt {
    Retry(ProviderError),
    Fatal(ProviderError),
}

#[async_trait]
impl AnalysisProvider for DetectorProvider {
    fn name(&self) -> &str {
        "detector"
    }

    async fn attempt(&self, request: &AnalysisRequest<'_>, api_key: &str) -> Result<String, ProviderError> {
        if request.images.is_empty() {
            return Err(ProviderError::NoInput("no image in request".to_string()));
        }

        let body = DetectRequest {
            images: request.images.iter().map(|image| image.to_base64()).collect(),
            camera_name: request.context,
            zone_points: &request.tuning.zone_points,
            person_iou_threshold: request.tuning.person_iou_threshold,
            vehicle_iou_threshold: request.tuning.vehicle_iou_threshold,
            ignore_moving_persons: request.tuning.ignore_moving_persons,
        };

        let mut attempt = 1;
        loop {
            debug!(
                "Detector attempt {}/{} with {} frame(s) for '{}'",
                attempt,
                self.max_attempts,
                body.images.len(),
                body.camera_name
            );
            match self.send_once(&body, api_key).await {
                Ok(text) => return Ok(text),
                Err(Attempt::Fatal(err)) => return Err(err),
                Err(Attempt::Retry(err)) if attempt < self.max_attempts => {
                    warn!(
                        "Detector attempt {} failed ({}), retrying in {:?}",
                        attempt, err, self.retry_delay
                    );
                    tokio::time::sleep(self.retry_delay).await;
                    attempt += 1;
                }
                Err(Attempt::Retry(err)) => {
                    info!("Detector gave up after {} attempts", attempt);
                    return Err(err);
                }
            }
        }
    }
}
