//! Raw provider message -> canonical `Mail` record
//!
//! Pure apart from logging. Messages labelled DRAFT, TRASH or SPAM are
//! rejected; everything else yields exactly one record whose directionality
//! (sent or received) is fixed here.

use super::models::{FullMessage, MessagePart};
use crate::db::Mail;
use base64::alphabet;
use base64::engine::{DecodePaddingMode, Engine, GeneralPurpose, GeneralPurposeConfig};
use chrono::{DateTime, Utc};
use regex_lite::Regex;
use std::sync::OnceLock;

/// Provider labels that keep a message out of the store
pub const REJECTED_LABELS: [&str; 3] = ["DRAFT", "TRASH", "SPAM"];

pub const SENT_LABEL: &str = "SENT";
pub const UNREAD_LABEL: &str = "UNREAD";
/// Local-only marker for received mail without UNREAD
pub const READ_LABEL: &str = "READ";

/// Gmail pads some bodies and not others
const BODY_ENGINE: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Normalize one message for `owner`. Returns `None` when rejected.
pub fn normalize(message: &FullMessage, owner: &str) -> Option<Mail> {
    if let Some(label) = REJECTED_LABELS.iter().find(|l| message.has_label(l)) {
        log::debug!("Rejecting message {} labelled {}", message.id, label);
        return None;
    }

    let payload = &message.payload;
    let internal_date = parse_internal_date(message);
    let mut labels = message.label_ids.clone();

    let (sent_at, received_at, sent_to, sent_cc, sent_bcc) = if message.has_label(SENT_LABEL) {
        let sent_at = payload
            .header("Date")
            .and_then(|value| match DateTime::parse_from_rfc2822(value.trim()) {
                Ok(dt) => Some(dt.with_timezone(&Utc)),
                Err(e) => {
                    log::warn!("Unparseable Date '{}' on {}: {}", value, message.id, e);
                    None
                }
            })
            .unwrap_or(internal_date);

        (
            Some(sent_at),
            None,
            address_header(payload, "To"),
            address_header(payload, "Cc"),
            address_header(payload, "Bcc"),
        )
    } else {
        if !message.has_label(UNREAD_LABEL) {
            labels.push(READ_LABEL.to_string());
        }
        (None, Some(internal_date), Vec::new(), Vec::new(), Vec::new())
    };

    let all_recipients = union_recipients(&[&sent_to, &sent_cc, &sent_bcc]);
    let from_email = payload
        .header("From")
        .and_then(bare_address)
        .map(|addr| addr.to_lowercase());

    Some(Mail {
        id: message.id.clone(),
        thread_id: message.thread_id.clone(),
        owner: owner.to_string(),
        subject: payload.header("Subject").unwrap_or_default().to_string(),
        body: extract_body(payload, &message.id),
        labels,
        sent_at,
        received_at,
        internal_date,
        sent_to,
        sent_cc,
        sent_bcc,
        all_recipients,
        from_email,
    })
}

fn parse_internal_date(message: &FullMessage) -> DateTime<Utc> {
    match message.internal_date_utc() {
        Some(date) => date,
        None => {
            log::warn!(
                "Invalid internalDate '{}' on {}, using epoch",
                message.internal_date,
                message.id
            );
            DateTime::<Utc>::UNIX_EPOCH
        }
    }
}

fn angle_address() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"<([^<>]+)>").ok()).as_ref()
}

/// Bare address from `Name <addr>` or a plain `addr (comment)`
fn bare_address(entry: &str) -> Option<String> {
    let address = match angle_address()
        .and_then(|re| re.captures(entry))
        .and_then(|caps| caps.get(1))
    {
        Some(m) => m.as_str().to_string(),
        None => strip_comments(entry),
    };
    let address = address.trim().trim_matches('"').trim();
    if address.is_empty() {
        None
    } else {
        Some(address.to_string())
    }
}

/// Drop RFC 5322 `(comments)`, nested ones included
fn strip_comments(entry: &str) -> String {
    let mut depth = 0usize;
    entry
        .chars()
        .filter(|c| match c {
            '(' => {
                depth += 1;
                false
            }
            ')' if depth > 0 => {
                depth -= 1;
                false
            }
            _ => depth == 0,
        })
        .collect()
}

/// Split an address list on commas outside quoted display names,
/// angle addresses and comments
fn split_addresses(value: &str) -> Vec<&str> {
    let mut entries = Vec::new();
    let mut in_quotes = false;
    let mut in_angle = false;
    let mut comment_depth = 0usize;
    let mut start = 0;

    for (i, c) in value.char_indices() {
        match c {
            '"' => in_quotes = !in_quotes,
            '<' if !in_quotes => in_angle = true,
            '>' if !in_quotes => in_angle = false,
            '(' if !in_quotes => comment_depth += 1,
            ')' if !in_quotes => comment_depth = comment_depth.saturating_sub(1),
            ',' if !in_quotes && !in_angle && comment_depth == 0 => {
                entries.push(&value[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    entries.push(&value[start..]);
    entries
}

fn address_header(part: &MessagePart, name: &str) -> Vec<String> {
    part.header(name)
        .map(|value| split_addresses(value).into_iter().filter_map(bare_address).collect())
        .unwrap_or_default()
}

fn union_recipients(lists: &[&Vec<String>]) -> Option<Vec<String>> {
    let mut all: Vec<String> = Vec::new();
    for address in lists.iter().flat_map(|l| l.iter()) {
        if !all.contains(address) {
            all.push(address.clone());
        }
    }
    if all.is_empty() {
        None
    } else {
        Some(all)
    }
}

/// MIME type check ignoring case and parameters such as `charset`
fn is_mime(part: &MessagePart, mime: &str) -> bool {
    part.mime_type
        .trim_start()
        .get(..mime.len())
        .is_some_and(|prefix| prefix.eq_ignore_ascii_case(mime))
}

fn extract_body(payload: &MessagePart, message_id: &str) -> String {
    let data = if is_mime(payload, "multipart/alternative") {
        find_plain_part(payload).and_then(|p| p.body.data())
    } else if is_mime(payload, "text/plain") || is_mime(payload, "text/html") {
        payload.body.data()
    } else {
        None
    };

    data.map(|d| decode_body(d, message_id)).unwrap_or_default()
}

/// First text/plain leaf, looking one level into a nested alternative
fn find_plain_part(part: &MessagePart) -> Option<&MessagePart> {
    part.parts
        .iter()
        .find(|p| is_mime(p, "text/plain"))
        .or_else(|| {
            part.parts
                .iter()
                .filter(|p| is_mime(p, "multipart/alternative"))
                .find_map(|nested| nested.parts.iter().find(|p| is_mime(p, "text/plain")))
        })
}

/// Decode a base64url body; falls back to the raw data
fn decode_body(data: &str, message_id: &str) -> String {
    match BODY_ENGINE.decode(data.trim()) {
        Ok(bytes) => match String::from_utf8(bytes) {
            Ok(text) => text,
            Err(e) => {
                log::warn!("Body of {} is not UTF-8, keeping raw data: {}", message_id, e);
                data.to_string()
            }
        },
        Err(e) => {
            log::warn!("Failed to decode body of {}, keeping raw data: {}", message_id, e);
            data.to_string()
        }
    }
}
