//! Turns data URIs and attachment markers in html into inline MIME parts.

use std::collections::HashMap;
use std::path::Path;
use std::sync::LazyLock;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use percent_encoding::percent_decode_str;
use regex::{Captures, Regex};
use sha2::{Digest, Sha256};

use crate::db::attachment_repo::AttachmentRow;
use crate::transport::OutgoingMail;

static RE_DATA_URI: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?i)\s*data:([a-z]+/[a-z0-9\-+.]+(;[a-z\-]+=[a-z0-9\-]+)?)?(;base64)?,([^)"']*)\s*"#,
    )
    .unwrap()
});

const DEFAULT_DATA_MIME: &str = "text/plain";
const DEFAULT_FILE_MIME: &str = "application/octet-stream";

fn decode_payload(caps: &Captures<'_>) -> Option<Vec<u8>> {
    let payload = caps.get(4).map(|m| m.as_str().trim()).unwrap_or_default();
    if caps.get(3).is_none() {
        return Some(percent_decode_str(payload).collect());
    }

    match STANDARD.decode(payload.split_whitespace().collect::<String>()) {
        Ok(data) => Some(data),
        Err(e) => {
            log::warn!("Skipping data URI with invalid base64 payload: {}", e);
            None
        }
    }
}

pub struct EmbeddedResourceResolver;

impl EmbeddedResourceResolver {
    /// Inlines data URIs, then attachments, returning the rewritten html.
    pub fn resolve(html: &str, attachments: &[AttachmentRow], mail: &mut OutgoingMail) -> String {
        let html = Self::inline_data_uris(html, mail);
        Self::embed_attachments(&html, attachments, mail)
    }

    /// Replaces every data URI with a `cid:` reference in a single pass.
    /// Identical URIs share one part; a payload that cannot be decoded is
    /// left in place.
    pub fn inline_data_uris(html: &str, mail: &mut OutgoingMail) -> String {
        let mut embedded: HashMap<String, String> = HashMap::new();

        RE_DATA_URI
            .replace_all(html, |caps: &Captures<'_>| {
                let matched = caps.get(0).map(|m| m.as_str()).unwrap_or_default();
                let hash = format!("{:x}", Sha256::digest(matched.as_bytes()));
                if let Some(reference) = embedded.get(&hash) {
                    return reference.clone();
                }

                let Some(data) = decode_payload(caps) else {
                    return matched.to_string();
                };
                let mime = caps
                    .get(1)
                    .map(|m| m.as_str().to_string())
                    .unwrap_or_else(|| DEFAULT_DATA_MIME.to_string());

                let reference = mail.embed(data, mime, None);
                embedded.insert(hash, reference.clone());
                reference
            })
            .into_owned()
    }

    /// Adds attachments to the mail and substitutes `#embed[key]#` markers.
    ///
    /// Each embed key is resolved once. Attachments whose media is gone or
    /// unreadable are skipped.
    pub fn embed_attachments(
        html: &str,
        attachments: &[AttachmentRow],
        mail: &mut OutgoingMail,
    ) -> String {
        let mut html = html.to_string();
        let mut embedded: HashMap<&str, String> = HashMap::new();

        for attachment in attachments {
            if let Some(key) = attachment.embed.as_deref() {
                if embedded.contains_key(key) {
                    continue;
                }
            }

            let Some(media) = &attachment.media else {
                log::warn!(
                    "Attachment {} of message {} has no media, skipping",
                    attachment.id,
                    attachment.message_id
                );
                continue;
            };

            let data = match std::fs::read(&media.path) {
                Ok(data) => data,
                Err(e) => {
                    log::warn!("Cannot read media '{}': {}, skipping", media.path, e);
                    continue;
                }
            };

            let mime = media.mime_type.clone().unwrap_or_else(|| {
                mime_guess::from_path(Path::new(&media.path))
                    .first_raw()
                    .unwrap_or(DEFAULT_FILE_MIME)
                    .to_string()
            });

            match attachment.embed.as_deref() {
                None => mail.attach(data, mime, media.origin_name.clone()),
                Some(key) => {
                    let reference = mail.embed(data, mime, Some(media.origin_name.clone()));
                    html = html
                        .replace(&format!("#embed[{}]#", key), &reference)
                        .replace(&format!("#embed%5B{}%5D#", key), &reference);
                    embedded.insert(key, reference);
                }
            }
        }

        html
    }
}
