// Copyright (c) 2025 TexasFortress.AI
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Turns provider replies into [`AnalysisDecision`]s.
//!
//! Replies are expected to contain a JSON object, possibly wrapped in
//! markdown fences or prose. When no usable object can be found the reply
//! is classified with a keyword heuristic instead of being dropped.

use lazy_static::lazy_static;
use log::{debug, warn};
use regex::Regex;
use serde_json::{Map, Value};

use crate::models::AnalysisDecision;

/// Confidence assigned to an alert inferred by the keyword heuristic.
pub const HEURISTIC_CONFIDENCE: f64 = 60.0;

const MAX_HEURISTIC_DESCRIPTION: usize = 200;

lazy_static! {
    /// An explicit verdict, even inside truncated or loosely quoted JSON.
    static ref VERDICT_RE: Regex =
        Regex::new(r#"(?i)"?should_?alert"?\s*[:=]\s*"?(true|false|yes|no)\b"#).expect("valid verdict regex");
}

const NEGATIVE_MARKERS: [&str; 6] = [
    "no alert",
    "not alert",
    "no threat",
    "nothing suspicious",
    "no suspicious",
    "no person",
];

const POSITIVE_MARKERS: [&str; 6] = [
    "intruder",
    "suspicious",
    "trespass",
    "loitering",
    "person",
    "people",
];

const KNOWN_OBJECTS: [&str; 8] = ["person", "car", "motorcycle", "truck", "bus", "bicycle", "dog", "cat"];

/// Parses a provider reply, falling back to the keyword heuristic.
pub fn parse_decision(text: &str) -> AnalysisDecision {
    match parse_strict(text) {
        Some(decision) => decision,
        None => {
            warn!("Could not parse structured decision, falling back to keyword heuristic");
            debug!("Unparsed reply: {}", text);
            heuristic_decision(text)
        }
    }
}

/// Returns the outermost `{ ... }` span of `text`, ignoring code fences and
/// surrounding prose.
pub fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end <= start {
        return None;
    }
    Some(&text[start..=end])
}

/// Strict parse: requires `shouldAlert`, `description` and `confidence`.
pub fn parse_strict(text: &str) -> Option<AnalysisDecision> {
    let json = extract_json_object(text)?;
    let value: Value = serde_json::from_str(json).ok()?;
    let object = value.as_object()?;

    let should_alert = field(object, &["shouldAlert", "should_alert"]).and_then(coerce_bool)?;
    let description = field(object, &["description"]).and_then(Value::as_str)?.trim().to_string();
    let confidence = field(object, &["confidence"]).and_then(coerce_confidence)?;
    let detected_objects = field(object, &["detectedObjects", "detected_objects"])
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .map(|item| match item {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                })
                .collect()
        })
        .unwrap_or_default();

    Some(AnalysisDecision::new(should_alert, description, confidence, detected_objects))
}

/// Keyword classification of free text. An explicit `shouldAlert` verdict
/// is taken as is; otherwise negative phrasing wins over positive keywords.
pub fn heuristic_decision(text: &str) -> AnalysisDecision {
    let lower = text.to_lowercase();
    let should_alert = match explicit_verdict(text) {
        Some(verdict) => verdict,
        None => {
            let negative = NEGATIVE_MARKERS.iter().any(|marker| lower.contains(marker));
            let positive = POSITIVE_MARKERS.iter().any(|marker| lower.contains(marker));
            positive && !negative
        }
    };

    let detected_objects = if should_alert {
        KNOWN_OBJECTS
            .iter()
            .filter(|label| lower.contains(*label))
            .map(|label| label.to_string())
            .collect()
    } else {
        Vec::new()
    };

    let trimmed = text.trim();
    let description = if trimmed.is_empty() {
        "Unparseable analysis response".to_string()
    } else {
        trimmed.chars().take(MAX_HEURISTIC_DESCRIPTION).collect()
    };

    let confidence = if should_alert { HEURISTIC_CONFIDENCE } else { 0.0 };
    AnalysisDecision::new(should_alert, description, confidence, detected_objects)
}

fn explicit_verdict(text: &str) -> Option<bool> {
    let captures = VERDICT_RE.captures(text)?;
    let value = captures.get(1)?.as_str().to_lowercase();
    Some(value == "true" || value == "yes")
}

fn field<'a>(object: &'a Map<String, Value>, names: &[&str]) -> Option<&'a Value> {
    names.iter().find_map(|name| object.get(*name)).filter(|v| !v.is_null())
}

fn coerce_bool(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => n.as_f64().map(|f| f != 0.0),
        Value::String(s) => match s.trim().to_lowercase().as_str() {
            "true" | "yes" | "1" => Some(true),
            "false" | "no" | "0" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

/// Accepts numbers or numeric strings (optionally with `%`). Fractions in
/// (0, 1) are read as probabilities and scaled to percent.
fn coerce_confidence(value: &Value) -> Option<f64> {
    let raw = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().trim_end_matches('%').trim().parse::<f64>().ok()?,
        _ => return None,
    };
    if raw > 0.0 && raw < 1.0 {
        Some(raw * 100.0)
    } else {
        Some(raw)
    }
}
