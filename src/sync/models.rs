//! Sync data models

use crate::db::User;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Gmail caps `maxResults` at 500
pub const MAX_PAGE_SIZE: u32 = 500;

/// Sync engine settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Listing page size
    pub page_size: u32,

    /// Move the cursor forward after incremental runs too.
    /// Off by default: only the backfill sets it.
    pub advance_cursor_on_incremental: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            page_size: MAX_PAGE_SIZE,
            advance_cursor_on_incremental: false,
        }
    }
}

impl SyncConfig {
    /// Page size clamped to 1..=MAX_PAGE_SIZE
    pub fn effective_page_size(&self) -> u32 {
        self.page_size.clamp(1, MAX_PAGE_SIZE)
    }
}

/// Per-owner sync state machine: NotStarted -> Backfilling -> Incremental
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncPhase {
    NotStarted,
    Backfilling,
    Incremental,
}

impl SyncPhase {
    /// Phase the next sync of `user` runs in
    pub fn for_user(user: &User) -> Self {
        if user.is_first_sync_done {
            SyncPhase::Incremental
        } else {
            SyncPhase::Backfilling
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SyncPhase::NotStarted => "not_started",
            SyncPhase::Backfilling => "backfilling",
            SyncPhase::Incremental => "incremental",
        }
    }
}

/// Outcome of one sync attempt
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncResult {
    pub owner: String,
    pub phase: SyncPhase,
    /// Message ids returned by the listing
    pub listed: usize,
    pub inserted: usize,
    /// Already stored
    pub duplicates: usize,
    /// Drafts, trash and spam
    pub rejected: usize,
    /// Stored cursor after the attempt
    pub cursor: Option<DateTime<Utc>>,
    /// Pagination ran to the end
    pub completed: bool,
    pub error: Option<String>,
}

impl SyncResult {
    pub fn new(owner: &str) -> Self {
        Self {
            owner: owner.to_string(),
            phase: SyncPhase::NotStarted,
            listed: 0,
            inserted: 0,
            duplicates: 0,
            rejected: 0,
            cursor: None,
            completed: false,
            error: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.completed && self.error.is_none()
    }
}
