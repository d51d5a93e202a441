// Copyright (c) 2025 TexasFortress.AI
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use serde::{Deserialize, Serialize};

/// Normalized alert/no-alert verdict for one event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisDecision {
    pub should_alert: bool,
    pub description: String,
    /// Always within 0..=100.
    pub confidence: u8,
    #[serde(default)]
    pub detected_objects: Vec<String>,
}

impl AnalysisDecision {
    pub fn new(should_alert: bool, description: impl Into<String>, confidence: f64, detected_objects: Vec<String>) -> Self {
        Self {
            should_alert,
            description: description.into(),
            confidence: clamp_confidence(confidence),
            detected_objects,
        }
    }
}

/// Rounds and clamps a raw confidence into 0..=100. NaN maps to 0.
pub fn clamp_confidence(raw: f64) -> u8 {
    if raw.is_nan() {
        return 0;
    }
    raw.round().clamp(0.0, 100.0) as u8
}
