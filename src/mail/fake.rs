//! In-memory `MailProvider` that records every call, for engine tests

use super::models::{FullMessage, Header, Label, MessageIndex, MessageList, MessagePart, PartBody};
use super::{MailError, MailProvider, MailResult};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use std::sync::Mutex;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    List {
        query: Option<String>,
        page_token: Option<String>,
    },
    Get(String),
    ListLabels,
    CreateLabel(String),
    Modify {
        message_id: String,
        add: Vec<String>,
        remove: Vec<String>,
    },
}

#[derive(Default)]
pub struct FakeProvider {
    /// Most recent first, as the provider lists them
    messages: Mutex<Vec<FullMessage>>,
    labels: Mutex<Vec<Label>>,
    calls: Mutex<Vec<Call>>,
    /// Fail `get_message` once this many fetches have succeeded
    fail_fetch_after: Mutex<Option<usize>>,
    fail_modify: Mutex<bool>,
}

impl FakeProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_messages(messages: Vec<FullMessage>) -> Self {
        let fake = Self::new();
        *fake.messages.lock().unwrap() = messages;
        fake
    }

    pub fn push_front(&self, message: FullMessage) {
        self.messages.lock().unwrap().insert(0, message);
    }

    pub fn add_label(&self, id: &str, name: &str) {
        self.labels.lock().unwrap().push(Label {
            id: id.to_string(),
            name: name.to_string(),
            label_type: Some("user".to_string()),
            ..Default::default()
        });
    }

    pub fn fail_fetch_after(&self, successes: usize) {
        *self.fail_fetch_after.lock().unwrap() = Some(successes);
    }

    /// Make `modify_labels` fail with a rate limit until switched off
    pub fn fail_modify(&self, fail: bool) {
        *self.fail_modify.lock().unwrap() = fail;
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().unwrap().clear();
    }

    pub fn modify_calls(&self) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(|c| matches!(c, Call::Modify { .. }))
            .collect()
    }

    pub fn created_labels(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::CreateLabel(name) => Some(name),
                _ => None,
            })
            .collect()
    }

    pub fn list_queries(&self) -> Vec<Option<String>> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::List { query, .. } => Some(query),
                _ => None,
            })
            .collect()
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }
}

/// `after:YYYY/MM/DD` as the start of that UTC day
fn parse_after(query: &str) -> Option<DateTime<Utc>> {
    let date = query.strip_prefix("after:")?;
    let day = NaiveDate::parse_from_str(date, "%Y/%m/%d").ok()?;
    Some(day.and_hms_opt(0, 0, 0)?.and_utc())
}

#[async_trait]
impl MailProvider for FakeProvider {
    async fn list_messages(
        &self,
        query: Option<&str>,
        page_token: Option<&str>,
        max_results: u32,
    ) -> MailResult<MessageList> {
        self.record(Call::List {
            query: query.map(str::to_string),
            page_token: page_token.map(str::to_string),
        });

        let after = query.and_then(parse_after);
        let matching: Vec<MessageIndex> = self
            .messages
            .lock()
            .unwrap()
            .iter()
            .filter(|m| match after {
                Some(after) => m.internal_date.parse::<i64>().unwrap_or(0) >= after.timestamp_millis(),
                None => true,
            })
            .map(|m| MessageIndex {
                id: m.id.clone(),
                thread_id: m.thread_id.clone(),
            })
            .collect();

        let start: usize = match page_token {
            Some(token) => token
                .parse()
                .map_err(|_| MailError::InvalidResponse(format!("bad page token {}", token)))?,
            None => 0,
        };
        let end = (start + max_results as usize).min(matching.len());
        let page = matching.get(start..end).unwrap_or_default().to_vec();

        Ok(MessageList {
            messages: if page.is_empty() { None } else { Some(page) },
            next_page_token: if end < matching.len() { Some(end.to_string()) } else { None },
            result_size_estimate: Some(matching.len() as i64),
        })
    }

    async fn get_message(&self, id: &str) -> MailResult<FullMessage> {
        let fetched = self
            .calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| matches!(c, Call::Get(_)))
            .count();
        self.record(Call::Get(id.to_string()));

        if let Some(limit) = *self.fail_fetch_after.lock().unwrap() {
            if fetched >= limit {
                return Err(MailError::Api {
                    status: 503,
                    message: "backend unavailable".to_string(),
                });
            }
        }

        self.messages
            .lock()
            .unwrap()
            .iter()
            .find(|m| m.id == id)
            .cloned()
            .ok_or_else(|| MailError::NotFound(format!("message {}", id)))
    }

    async fn list_labels(&self) -> MailResult<Vec<Label>> {
        self.record(Call::ListLabels);
        Ok(self.labels.lock().unwrap().clone())
    }

    async fn create_label(&self, name: &str) -> MailResult<Label> {
        self.record(Call::CreateLabel(name.to_string()));
        let mut labels = self.labels.lock().unwrap();
        let label = Label {
            id: format!("Label_{}", labels.len() + 1),
            name: name.to_string(),
            label_type: Some("user".to_string()),
            ..Default::default()
        };
        labels.push(label.clone());
        Ok(label)
    }

    async fn modify_labels(&self, message_id: &str, add: &[String], remove: &[String]) -> MailResult<()> {
        self.record(Call::Modify {
            message_id: message_id.to_string(),
            add: add.to_vec(),
            remove: remove.to_vec(),
        });
        if *self.fail_modify.lock().unwrap() {
            return Err(MailError::RateLimited);
        }
        Ok(())
    }
}

/// Build a provider message for tests
pub fn message(id: &str, internal_date: DateTime<Utc>, labels: &[&str], headers: &[(&str, &str)]) -> FullMessage {
    FullMessage {
        id: id.to_string(),
        thread_id: format!("t-{}", id),
        internal_date: internal_date.timestamp_millis().to_string(),
        label_ids: labels.iter().map(|l| l.to_string()).collect(),
        payload: MessagePart {
            mime_type: "text/plain".to_string(),
            headers: headers
                .iter()
                .map(|(name, value)| Header {
                    name: name.to_string(),
                    value: value.to_string(),
                })
                .collect(),
            // "Hello" in base64url
            body: PartBody::Body {
                data: "SGVsbG8".to_string(),
                size: 5,
            },
            ..Default::default()
        },
        snippet: String::new(),
    }
}
