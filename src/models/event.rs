// Copyright (c) 2025 TexasFortress.AI
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde::Serialize;

/// Line prefixes cameras use to name themselves in the alert body.
const CAMERA_NAME_PREFIXES: [&str; 4] = ["camera name:", "channel name:", "device name:", "camera:"];

/// A single image pulled out of an alert email.
#[derive(Clone, PartialEq, Eq, Serialize)]
pub struct ImagePayload {
    pub filename: String,
    pub content_type: String,
    #[serde(skip)]
    pub data: Vec<u8>,
}

impl ImagePayload {
    pub fn new(filename: impl Into<String>, content_type: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            filename: filename.into(),
            content_type: content_type.into(),
            data,
        }
    }

    /// Base64 encoding of the raw bytes, as sent to inference providers.
    pub fn to_base64(&self) -> String {
        BASE64.encode(&self.data)
    }

    /// `data:` URI suitable for an `image_url` content block.
    pub fn to_data_uri(&self) -> String {
        format!("data:{};base64,{}", self.content_type, self.to_base64())
    }
}

// Image bytes are noise in logs.
impl std::fmt::Debug for ImagePayload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImagePayload")
            .field("filename", &self.filename)
            .field("content_type", &self.content_type)
            .field("len", &self.data.len())
            .finish()
    }
}

/// Detects common image formats from their magic bytes.
pub fn sniff_image_type(data: &[u8]) -> Option<&'static str> {
    if data.starts_with(&[0xFF, 0xD8, 0xFF]) {
        Some("image/jpeg")
    } else if data.starts_with(&[0x89, b'P', b'N', b'G']) {
        Some("image/png")
    } else if data.starts_with(b"GIF8") {
        Some("image/gif")
    } else if data.len() >= 12 && &data[0..4] == b"RIFF" && &data[8..12] == b"WEBP" {
        Some("image/webp")
    } else {
        None
    }
}

/// Maps a filename extension to an image content type.
pub fn image_type_from_filename(filename: &str) -> Option<&'static str> {
    let ext = filename.rsplit_once('.')?.1.to_ascii_lowercase();
    match ext.as_str() {
        "jpg" | "jpeg" => Some("image/jpeg"),
        "png" => Some("image/png"),
        "gif" => Some("image/gif"),
        "webp" => Some("image/webp"),
        "bmp" => Some("image/bmp"),
        _ => None,
    }
}

/// One qualifying alert email, ready for dispatch.
///
/// An `Event` always carries at least one image; the first one is the
/// primary image used for notifications.
#[derive(Debug, Clone, Serialize)]
pub struct Event {
    sender: String,
    subject: String,
    text: String,
    images: Vec<ImagePayload>,
}

impl Event {
    /// Builds an event, refusing an empty image list.
    pub fn new(
        sender: impl Into<String>,
        subject: impl Into<String>,
        text: impl Into<String>,
        images: Vec<ImagePayload>,
    ) -> Option<Self> {
        if images.is_empty() {
            return None;
        }
        Some(Self {
            sender: sender.into(),
            subject: subject.into(),
            text: text.into(),
            images,
        })
    }

    pub fn sender(&self) -> &str {
        &self.sender
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn images(&self) -> &[ImagePayload] {
        &self.images
    }

    pub fn primary_image(&self) -> &ImagePayload {
        // Non-empty by construction.
        &self.images[0]
    }

    /// Human-readable camera label: a `Camera Name:` style line from the
    /// body if present, otherwise the subject, otherwise the sender.
    pub fn camera_name(&self) -> &str {
        for line in self.text.lines() {
            let trimmed = line.trim();
            let lower = trimmed.to_lowercase();
            for prefix in CAMERA_NAME_PREFIXES {
                if lower.starts_with(prefix) && trimmed.is_char_boundary(prefix.len()) {
                    let value = trimmed[prefix.len()..].trim();
                    if !value.is_empty() {
                        return value;
                    }
                }
            }
        }
        let subject = self.subject.trim();
        if !subject.is_empty() {
            return subject;
        }
        self.sender.trim()
    }
}
