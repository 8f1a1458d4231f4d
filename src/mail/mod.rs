//! # Mailsieve - Mail Module
//!
//! Remote mailbox access: the provider contract used by the sync and rule
//! engines, the Gmail REST client implementing it, and the normalizer that
//! turns raw provider messages into stored mail records.

#[cfg(test)]
pub(crate) mod fake;
pub mod gmail;
pub mod models;
pub mod normalize;

use async_trait::async_trait;

// Re-export commonly used types
pub use gmail::GmailClient;
pub use models::{FullMessage, Header, Label, LabelList, MessageIndex, MessageList, MessagePart, PartBody};
pub use normalize::normalize;

/// Result type alias for mail operations
pub type MailResult<T> = Result<T, MailError>;

/// Unified error type for provider operations
#[derive(Debug, thiserror::Error)]
pub enum MailError {
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Unauthorized - access token missing or expired")]
    Unauthorized,

    #[error("Rate limit exceeded")]
    RateLimited,

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Provider returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Invalid response from provider: {0}")]
    InvalidResponse(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

/// Remote mailbox operations.
///
/// Every call is a single round trip; no retries happen behind this trait.
#[async_trait]
pub trait MailProvider: Send + Sync {
    /// One page of message ids, most recent first
    async fn list_messages(
        &self,
        query: Option<&str>,
        page_token: Option<&str>,
        max_results: u32,
    ) -> MailResult<MessageList>;

    async fn get_message(&self, id: &str) -> MailResult<FullMessage>;

    async fn list_labels(&self) -> MailResult<Vec<Label>>;

    async fn create_label(&self, name: &str) -> MailResult<Label>;

    /// Add and remove label ids on one message
    async fn modify_labels(&self, message_id: &str, add: &[String], remove: &[String]) -> MailResult<()>;
}
