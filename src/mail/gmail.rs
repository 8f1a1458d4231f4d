//! Gmail REST client
//!
//! Implements `MailProvider` against the `users/me` endpoints of the Gmail
//! API. The access token is acquired elsewhere and passed in as-is.

use super::models::{FullMessage, Label, LabelList, MessageList, ModifyRequest, NewLabel};
use super::{MailError, MailProvider, MailResult};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use std::time::Duration;
use url::Url;

pub const DEFAULT_API_BASE: &str = "https://gmail.googleapis.com/gmail/v1";

/// API client for one Gmail mailbox
pub struct GmailClient {
    client: Client,
    base: Url,
    access_token: String,
}

impl GmailClient {
    /// Create a client against `api_base` (normally `DEFAULT_API_BASE`)
    pub fn new(api_base: &str, access_token: impl Into<String>, timeout: Duration) -> MailResult<Self> {
        let access_token = access_token.into();
        if access_token.trim().is_empty() {
            return Err(MailError::Config("access token is empty".to_string()));
        }

        // Url::join drops the last path segment unless it ends with '/'
        let normalized = format!("{}/", api_base.trim_end_matches('/'));
        let base = Url::parse(&normalized)
            .map_err(|e| MailError::Config(format!("invalid API base '{}': {}", api_base, e)))?;

        let client = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            base,
            access_token,
        })
    }

    fn endpoint(&self, path: &str) -> MailResult<Url> {
        self.base
            .join(path)
            .map_err(|e| MailError::Config(format!("invalid endpoint '{}': {}", path, e)))
    }
}

#[async_trait]
impl MailProvider for GmailClient {
    async fn list_messages(
        &self,
        query: Option<&str>,
        page_token: Option<&str>,
        max_results: u32,
    ) -> MailResult<MessageList> {
        let mut url = self.endpoint("users/me/messages")?;
        {
            let mut pairs = url.query_pairs_mut();
            pairs.append_pair("maxResults", &max_results.to_string());
            if let Some(q) = query {
                pairs.append_pair("q", q);
            }
            if let Some(token) = page_token {
                pairs.append_pair("pageToken", token);
            }
        }

        log::debug!("Listing messages (query: {:?}, page: {:?})", query, page_token);

        let response = self
            .client
            .get(url)
            .bearer_auth(&self.access_token)
            .send()
            .await?;

        handle_response(response).await
    }

    async fn get_message(&self, id: &str) -> MailResult<FullMessage> {
        let mut url = self.endpoint(&format!("users/me/messages/{}", id))?;
        url.query_pairs_mut().append_pair("format", "full");

        let response = self
            .client
            .get(url)
            .bearer_auth(&self.access_token)
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(MailError::NotFound(format!("message {}", id)));
        }

        handle_response(response).await
    }

    async fn list_labels(&self) -> MailResult<Vec<Label>> {
        let response = self
            .client
            .get(self.endpoint("users/me/labels")?)
            .bearer_auth(&self.access_token)
            .send()
            .await?;

        let list: LabelList = handle_response(response).await?;
        Ok(list.labels)
    }

    async fn create_label(&self, name: &str) -> MailResult<Label> {
        let body = NewLabel {
            name,
            label_list_visibility: "labelShow",
            message_list_visibility: "show",
        };

        let response = self
            .client
            .post(self.endpoint("users/me/labels")?)
            .bearer_auth(&self.access_token)
            .json(&body)
            .send()
            .await?;

        let label: Label = handle_response(response).await?;
        log::info!("Created remote label '{}' ({})", label.name, label.id);
        Ok(label)
    }

    async fn modify_labels(&self, message_id: &str, add: &[String], remove: &[String]) -> MailResult<()> {
        let body = ModifyRequest {
            add_label_ids: add,
            remove_label_ids: remove,
        };

        let response = self
            .client
            .post(self.endpoint(&format!("users/me/messages/{}/modify", message_id))?)
            .bearer_auth(&self.access_token)
            .json(&body)
            .send()
            .await?;

        if response.status().is_success() {
            log::debug!("Modified labels on {} (+{:?} -{:?})", message_id, add, remove);
            Ok(())
        } else {
            Err(handle_error(response).await)
        }
    }
}

/// Handle successful JSON response
async fn handle_response<T: serde::de::DeserializeOwned>(response: reqwest::Response) -> MailResult<T> {
    let status = response.status();

    if status.is_success() {
        response
            .json::<T>()
            .await
            .map_err(|e| MailError::InvalidResponse(e.to_string()))
    } else {
        Err(handle_error(response).await)
    }
}

/// Convert error response to MailError
async fn handle_error(response: reqwest::Response) -> MailError {
    let status = response.status();

    match status {
        StatusCode::UNAUTHORIZED => MailError::Unauthorized,
        StatusCode::TOO_MANY_REQUESTS => MailError::RateLimited,
        _ => {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            MailError::Api {
                status: status.as_u16(),
                message,
            }
        }
    }
}
