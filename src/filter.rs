// Copyright (c) 2025 TexasFortress.AI
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

/// Parameters forwarded to the detection service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionTuning {
    /// Polygon of normalized `[x, y]` points; fewer than three means "whole frame".
    pub zone_points: Vec<[f64; 2]>,
    pub person_iou_threshold: f64,
    pub vehicle_iou_threshold: f64,
    pub ignore_moving_persons: bool,
}

impl Default for DetectionTuning {
    fn default() -> Self {
        Self {
            zone_points: Vec::new(),
            person_iou_threshold: 0.6,
            vehicle_iou_threshold: 0.9,
            ignore_moving_persons: true,
        }
    }
}

/// Runtime alert filtering rules.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    pub enabled: bool,
    /// Free-text security rules the model must honour.
    pub rules: String,
    pub min_confidence: u8,
    pub tuning: DetectionTuning,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            rules: String::new(),
            min_confidence: 60,
            tuning: DetectionTuning::default(),
        }
    }
}

impl FilterConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.min_confidence > 100 {
            return Err(format!("min_confidence must be 0-100, got {}", self.min_confidence));
        }
        for (name, value) in [
            ("person_iou_threshold", self.tuning.person_iou_threshold),
            ("vehicle_iou_threshold", self.tuning.vehicle_iou_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(format!("{} must be between 0 and 1, got {}", name, value));
            }
        }
        if self
            .tuning
            .zone_points
            .iter()
            .flatten()
            .any(|coord| !(0.0..=1.0).contains(coord))
        {
            return Err("zone_points must be normalized to 0-1".to_string());
        }
        Ok(())
    }
}

/// Filter rules plus the global AI switch, as one consistent view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterView {
    pub filter: FilterConfig,
    pub ai_enabled: bool,
}

/// Process-wide handle to the mutable filter settings.
///
/// The pipeline only reads through it; the admin surface writes.
#[derive(Debug, Clone)]
pub struct SharedFilter {
    inner: Arc<RwLock<FilterView>>,
}

impl SharedFilter {
    pub fn new(filter: FilterConfig, ai_enabled: bool) -> Self {
        Self {
            inner: Arc::new(RwLock::new(FilterView { filter, ai_enabled })),
        }
    }

    pub async fn view(&self) -> FilterView {
        self.inner.read().await.clone()
    }

    pub async fn filter(&self) -> FilterConfig {
        self.inner.read().await.filter.clone()
    }

    pub async fn ai_enabled(&self) -> bool {
        self.inner.read().await.ai_enabled
    }

    pub async fn update_filter(&self, filter: FilterConfig) {
        self.inner.write().await.filter = filter;
    }

    pub async fn set_ai_enabled(&self, enabled: bool) {
        self.inner.write().await.ai_enabled = enabled;
    }
}
