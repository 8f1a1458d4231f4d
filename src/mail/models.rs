//! Gmail REST wire models

use crate::db::from_millis;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct MessageIndex {
    pub id: String,
    #[serde(rename = "threadId", default)]
    pub thread_id: String,
}

/// One page of `users.messages.list`
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct MessageList {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub messages: Option<Vec<MessageIndex>>,
    #[serde(rename = "nextPageToken")]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_page_token: Option<String>,
    #[serde(rename = "resultSizeEstimate")]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_size_estimate: Option<i64>,
}

impl MessageList {
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.messages.iter().flatten().map(|m| m.id.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Header {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PartBody {
    Attachment {
        #[serde(rename = "attachmentId")]
        attachment_id: String,
        size: u32,
    },
    Body {
        data: String,
        size: u32,
    },
    Empty {
        size: u32,
    },
}

impl Default for PartBody {
    fn default() -> Self {
        PartBody::Empty { size: 0 }
    }
}

impl PartBody {
    /// Inline base64url payload, if any
    pub fn data(&self) -> Option<&str> {
        match self {
            PartBody::Body { data, .. } => Some(data),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct MessagePart {
    #[serde(default)]
    pub body: PartBody,
    #[serde(default)]
    pub filename: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub headers: Vec<Header>,
    #[serde(rename = "mimeType", default)]
    pub mime_type: String,
    #[serde(rename = "partId", default)]
    pub part_id: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub parts: Vec<MessagePart>,
}

impl MessagePart {
    /// Header lookup, case-insensitive on the name
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|h| h.name.eq_ignore_ascii_case(name))
            .map(|h| h.value.as_str())
    }
}

/// `users.messages.get` with `format=full`
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct FullMessage {
    pub id: String,
    #[serde(rename = "threadId", default)]
    pub thread_id: String,
    /// Epoch milliseconds as a decimal string
    #[serde(rename = "internalDate", default)]
    pub internal_date: String,
    #[serde(rename = "labelIds", default, skip_serializing_if = "Vec::is_empty")]
    pub label_ids: Vec<String>,
    #[serde(default)]
    pub payload: MessagePart,
    #[serde(default)]
    pub snippet: String,
}

impl FullMessage {
    pub fn has_label(&self, label: &str) -> bool {
        self.label_ids.iter().any(|l| l == label)
    }

    /// `internal_date` as a timestamp, if it parses
    pub fn internal_date_utc(&self) -> Option<DateTime<Utc>> {
        self.internal_date.trim().parse::<i64>().ok().and_then(from_millis)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct LabelList {
    #[serde(default)]
    pub labels: Vec<Label>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Label {
    pub id: String,
    pub name: String,
    /// "system" or "user"
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub label_type: Option<String>,
    #[serde(rename = "labelListVisibility", default, skip_serializing_if = "Option::is_none")]
    pub label_list_visibility: Option<String>,
    #[serde(rename = "messageListVisibility", default, skip_serializing_if = "Option::is_none")]
    pub message_list_visibility: Option<String>,
}

/// Body of `users.labels.create`
#[derive(Debug, Clone, Serialize)]
pub struct NewLabel<'a> {
    pub name: &'a str,
    #[serde(rename = "labelListVisibility")]
    pub label_list_visibility: &'a str,
    #[serde(rename = "messageListVisibility")]
    pub message_list_visibility: &'a str,
}

/// Body of `users.messages.modify`
#[derive(Debug, Clone, Serialize)]
pub struct ModifyRequest<'a> {
    #[serde(rename = "addLabelIds", skip_serializing_if = "no_ids")]
    pub add_label_ids: &'a [String],
    #[serde(rename = "removeLabelIds", skip_serializing_if = "no_ids")]
    pub remove_label_ids: &'a [String],
}

fn no_ids(ids: &&[String]) -> bool {
    ids.is_empty()
}
