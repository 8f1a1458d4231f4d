//! Sync Manager - mirrors a remote mailbox into the local store
//!
//! The first sync of an owner backfills the whole mailbox and records a
//! cursor; later syncs list only mail after the cursor's day. Ingestion is
//! insert-if-absent by provider id, so overlapping windows are harmless.
//! Errors end the attempt early but never reach the caller: whatever was
//! inserted before the failure stays.

use super::models::{SyncConfig, SyncPhase, SyncResult};
use crate::db::{DbError, MailStore};
use crate::mail::{normalize, FullMessage, MailError, MailProvider};
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// Sync manager - main orchestrator
#[derive(Clone)]
pub struct SyncManager {
    store: Arc<dyn MailStore>,
    provider: Arc<dyn MailProvider>,
    config: SyncConfig,
}

impl SyncManager {
    /// Create new sync manager with default config
    pub fn new(store: Arc<dyn MailStore>, provider: Arc<dyn MailProvider>) -> Self {
        Self::with_config(SyncConfig::default(), store, provider)
    }

    /// Initialize with existing config
    pub fn with_config(config: SyncConfig, store: Arc<dyn MailStore>, provider: Arc<dyn MailProvider>) -> Self {
        Self {
            store,
            provider,
            config,
        }
    }

    /// Sync one owner's mailbox. Never fails; see `SyncResult::error`.
    pub async fn sync(&self, owner: &str) -> SyncResult {
        let mut result = SyncResult::new(owner);

        if let Err(e) = self.run(owner, &mut result).await {
            log::error!(
                "Sync of {} stopped early ({}): {} ({} inserted so far)",
                owner,
                result.phase.as_str(),
                e,
                result.inserted
            );
            result.error = Some(e.to_string());
        }

        result
    }

    async fn run(&self, owner: &str, result: &mut SyncResult) -> Result<(), SyncManagerError> {
        let user = self.store.get_or_create_user(owner)?;
        result.phase = SyncPhase::for_user(&user);
        result.cursor = user.sync_cursor;

        match result.phase {
            SyncPhase::Backfilling => self.backfill(owner, result).await,
            _ => self.incremental(owner, user.sync_cursor, result).await,
        }
    }

    async fn backfill(&self, owner: &str, result: &mut SyncResult) -> Result<(), SyncManagerError> {
        log::info!("Starting full backfill for {}", owner);

        let newest = self.ingest_all(owner, None, result).await?;

        let cursor = match newest {
            Some(date) => Some(date),
            None => self.store.max_internal_date(owner)?,
        };
        self.store.save_sync_state(owner, true, cursor)?;

        result.cursor = cursor;
        result.completed = true;
        log::info!(
            "Backfill for {} done: {} listed, {} inserted; cursor {:?}",
            owner,
            result.listed,
            result.inserted,
            cursor
        );
        Ok(())
    }

    async fn incremental(
        &self,
        owner: &str,
        cursor: Option<DateTime<Utc>>,
        result: &mut SyncResult,
    ) -> Result<(), SyncManagerError> {
        // Day granularity: same-day mail is listed again and deduplicated on insert
        let query = cursor.map(|c| format!("after:{}", c.format("%Y/%m/%d")));
        log::info!("Incremental sync for {} (query: {:?})", owner, query);

        let newest = self.ingest_all(owner, query.as_deref(), result).await?;

        if self.config.advance_cursor_on_incremental {
            if let Some(date) = newest {
                self.store.save_sync_state(owner, true, Some(date))?;
                result.cursor = self.store.get_user(owner)?.and_then(|u| u.sync_cursor);
                log::info!("Cursor for {} now {:?}", owner, result.cursor);
            }
        }

        result.completed = true;
        log::info!(
            "Incremental sync for {} done: {} listed, {} inserted, {} duplicates",
            owner,
            result.listed,
            result.inserted,
            result.duplicates
        );
        Ok(())
    }

    /// Page through the listing, ingesting every message.
    /// Returns the internal date of the first (most recent) listed message.
    async fn ingest_all(
        &self,
        owner: &str,
        query: Option<&str>,
        result: &mut SyncResult,
    ) -> Result<Option<DateTime<Utc>>, SyncManagerError> {
        let page_size = self.config.effective_page_size();
        let mut newest: Option<DateTime<Utc>> = None;
        let mut page_token: Option<String> = None;
        let mut pages = 0usize;

        loop {
            let page = self
                .provider
                .list_messages(query, page_token.as_deref(), page_size)
                .await?;
            pages += 1;

            for id in page.ids() {
                result.listed += 1;
                let message = self.provider.get_message(id).await?;
                if result.listed == 1 {
                    newest = message.internal_date_utc();
                }
                self.ingest(owner, &message, result)?;
            }

            match page.next_page_token {
                Some(next) if page_token.as_deref() == Some(next.as_str()) => {
                    log::warn!("Provider repeated page token {}, stopping", next);
                    break;
                }
                Some(next) => page_token = Some(next),
                None => break,
            }
        }

        log::debug!("Listed {} messages in {} pages for {}", result.listed, pages, owner);
        Ok(newest)
    }

    fn ingest(&self, owner: &str, message: &FullMessage, result: &mut SyncResult) -> Result<(), SyncManagerError> {
        match normalize(message, owner) {
            None => result.rejected += 1,
            Some(mail) => {
                if self.store.insert_mail_if_absent(&mail)? {
                    result.inserted += 1;
                } else {
                    log::debug!("Mail {} already stored", mail.id);
                    result.duplicates += 1;
                }
            }
        }
        Ok(())
    }
}

/// Errors that end a sync attempt
#[derive(Debug, thiserror::Error)]
pub enum SyncManagerError {
    #[error("Provider error: {0}")]
    Provider(#[from] MailError),

    #[error("Database error: {0}")]
    Database(#[from] DbError),
}
