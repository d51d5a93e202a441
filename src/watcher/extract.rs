// Copyright (c) 2025 TexasFortress.AI
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Turning raw alert emails into [`Event`]s.
//!
//! Images are looked for in this order:
//! 1. `image/*` attachments, sorted by filename;
//! 2. a `data:image/...;base64,` URI in the HTML body;
//! 3. a `cid:` reference in the HTML body that points at an attachment
//!    which is not typed as an image (some cameras send JPEGs as
//!    `application/octet-stream`).

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use lazy_static::lazy_static;
use log::debug;
use mail_parser::{HeaderValue, Message, MimeHeaders};
use regex::Regex;
use thiserror::Error;

use crate::models::{image_type_from_filename, sniff_image_type, Event, ImagePayload};

pub const DEFAULT_CLEARED_KEYWORDS: [&str; 3] = ["cleared", "resolved", "ended"];

lazy_static! {
    static ref DATA_URI_RE: Regex =
        Regex::new(r"data:(image/[A-Za-z0-9.+-]+);base64,([A-Za-z0-9+/=\s]+)").expect("valid data URI regex");
    static ref CID_RE: Regex = Regex::new(r#"cid:([^"'\s>)]+)"#).expect("valid cid regex");
}

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("Message could not be parsed as MIME")]
    Unparseable,
}

#[derive(Debug, Clone)]
pub struct RawAttachment {
    pub filename: Option<String>,
    pub content_type: String,
    pub content_id: Option<String>,
    pub data: Vec<u8>,
}

/// The parts of a message the watcher cares about, detached from the
/// parser's borrowed representation.
#[derive(Debug, Clone, Default)]
pub struct ParsedMail {
    pub sender: String,
    pub subject: String,
    pub text: String,
    pub html: Option<String>,
    pub attachments: Vec<RawAttachment>,
}

/// What became of one fetched message.
#[derive(Debug)]
pub enum Extraction {
    Event(Event),
    /// "Alarm cleared" style follow-up; not an alert.
    Cleared,
    NoImage,
}

pub fn parse_mail(raw: &[u8]) -> Result<ParsedMail, ExtractError> {
    let message = Message::parse(raw).ok_or(ExtractError::Unparseable)?;

    let sender = match message.from() {
        HeaderValue::Address(addr) => addr.address.as_deref().unwrap_or_default().to_string(),
        HeaderValue::AddressList(list) => list
            .iter()
            .find_map(|addr| addr.address.as_deref())
            .unwrap_or_default()
            .to_string(),
        _ => String::new(),
    };

    let attachments = message
        .attachments()
        .map(|part| RawAttachment {
            filename: part.attachment_name().map(str::to_string),
            content_type: part
                .content_type()
                .map(|ct| match ct.subtype() {
                    Some(subtype) => format!("{}/{}", ct.ctype(), subtype),
                    None => ct.ctype().to_string(),
                })
                .unwrap_or_else(|| "application/octet-stream".to_string())
                .to_ascii_lowercase(),
            content_id: part
                .content_id()
                .map(|id| id.trim().trim_start_matches('<').trim_end_matches('>').to_string()),
            data: part.contents().to_vec(),
        })
        .collect();

    Ok(ParsedMail {
        sender,
        subject: message.subject().unwrap_or_default().to_string(),
        text: message.body_text(0).map(|t| t.into_owned()).unwrap_or_default(),
        html: message.body_html(0).map(|h| h.into_owned()),
        attachments,
    })
}

/// True if subject or body mentions one of `keywords` (case-insensitive).
pub fn is_cleared(mail: &ParsedMail, keywords: &[String]) -> bool {
    let haystack = format!("{}\n{}", mail.subject, mail.text).to_lowercase();
    keywords
        .iter()
        .map(|k| k.trim().to_lowercase())
        .filter(|k| !k.is_empty())
        .any(|k| haystack.contains(&k))
}

pub fn extract_images(mail: &ParsedMail) -> Vec<ImagePayload> {
    let mut images: Vec<ImagePayload> = mail
        .attachments
        .iter()
        .enumerate()
        .filter(|(_, a)| a.content_type.starts_with("image/") && !a.data.is_empty())
        .map(|(idx, a)| {
            let filename = a.filename.clone().unwrap_or_else(|| format!("image-{}", idx));
            ImagePayload::new(filename, a.content_type.clone(), a.data.clone())
        })
        .collect();
    if !images.is_empty() {
        images.sort_by(|a, b| a.filename.cmp(&b.filename));
        return images;
    }

    let html = match mail.html.as_deref() {
        Some(html) => html,
        None => return Vec::new(),
    };

    for caps in DATA_URI_RE.captures_iter(html) {
        // Long URIs are often line-wrapped inside the attribute.
        let encoded: String = caps[2].chars().filter(|c| !c.is_ascii_whitespace()).collect();
        match BASE64.decode(&encoded) {
            Ok(data) if !data.is_empty() => {
                let content_type = caps[1].to_ascii_lowercase();
                let ext = content_type.trim_start_matches("image/").to_string();
                return vec![ImagePayload::new(format!("inline.{}", ext), content_type, data)];
            }
            Ok(_) => {}
            Err(e) => debug!("Skipping undecodable inline image: {}", e),
        }
    }

    for caps in CID_RE.captures_iter(html) {
        let cid = &caps[1];
        let found = mail.attachments.iter().find(|a| {
            !a.content_type.starts_with("image/")
                && !a.data.is_empty()
                && a.content_id.as_deref().map_or(false, |id| id.eq_ignore_ascii_case(cid))
        });
        if let Some(attachment) = found {
            let filename = attachment.filename.clone().unwrap_or_else(|| cid.to_string());
            let content_type = sniff_image_type(&attachment.data)
                .or_else(|| image_type_from_filename(&filename))
                .unwrap_or("image/jpeg");
            return vec![ImagePayload::new(filename, content_type, attachment.data.clone())];
        }
    }

    Vec::new()
}

/// Applies the cleared-keyword filter, then image extraction.
pub fn extract_event(mail: &ParsedMail, cleared_keywords: &[String]) -> Extraction {
    if is_cleared(mail, cleared_keywords) {
        return Extraction::Cleared;
    }
    let images = extract_images(mail);
    match Event::new(&mail.sender, &mail.subject, mail.text.trim(), images) {
        Some(event) => Extraction::Event(event),
        None => Extraction::NoImage,
    }
}
