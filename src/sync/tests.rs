//! Sync flow tests
//!
//! Covers:
//! - Full backfill with pagination and cursor bookkeeping
//! - Incremental windows, deduplication and cursor policy
//! - Failure mid-run and recovery on the next attempt

#[cfg(test)]
mod sync_flow_tests {
    use super::super::*;
    use crate::db::{Database, MailStore};
    use crate::mail::fake::{message, FakeProvider};
    use crate::mail::normalize;
    use chrono::{DateTime, Duration, TimeZone, Utc};
    use std::sync::Arc;

    const OWNER: &str = "alice@example.com";

    struct Fixture {
        db: Arc<Database>,
        provider: Arc<FakeProvider>,
        manager: SyncManager,
    }

    fn day(d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 10, d, 12, 0, 0).unwrap()
    }

    fn inbox(id: &str, when: DateTime<Utc>) -> crate::mail::FullMessage {
        message(
            id,
            when,
            &["INBOX", "UNREAD"],
            &[("From", "Bob <bob@example.com>"), ("To", OWNER), ("Subject", id)],
        )
    }

    /// Five inbox messages, 2024-10-05 down to 2024-10-01, most recent first
    fn mailbox() -> Vec<crate::mail::FullMessage> {
        (1..=5).rev().map(|d| inbox(&format!("m{}", d), day(d))).collect()
    }

    fn fixture(messages: Vec<crate::mail::FullMessage>, config: SyncConfig) -> Fixture {
        let db = Arc::new(Database::in_memory().unwrap());
        let provider = Arc::new(FakeProvider::with_messages(messages));
        let manager = SyncManager::with_config(config, db.clone(), provider.clone());
        Fixture { db, provider, manager }
    }

    fn paged(page_size: u32) -> SyncConfig {
        SyncConfig {
            page_size,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_backfill_pages_through_everything() {
        let f = fixture(mailbox(), paged(2));

        let result = f.manager.sync(OWNER).await;

        assert!(result.is_success(), "{:?}", result.error);
        assert_eq!(result.phase, SyncPhase::Backfilling);
        assert_eq!(result.listed, 5);
        assert_eq!(result.inserted, 5);
        assert_eq!(f.provider.list_queries(), vec![None, None, None]);

        let user = f.db.get_user(OWNER).unwrap().unwrap();
        assert!(user.is_first_sync_done);
        assert_eq!(user.mail_count, 5);
        assert_eq!(user.sync_cursor, Some(day(5)));
        assert_eq!(result.cursor, Some(day(5)));
    }

    #[tokio::test]
    async fn test_backfill_of_empty_mailbox() {
        let f = fixture(vec![], SyncConfig::default());

        let result = f.manager.sync(OWNER).await;

        assert!(result.is_success());
        assert_eq!(result.listed, 0);
        let user = f.db.get_user(OWNER).unwrap().unwrap();
        assert!(user.is_first_sync_done);
        assert_eq!(user.sync_cursor, None);
    }

    #[tokio::test]
    async fn test_backfill_cursor_falls_back_to_stored_mail() {
        let f = fixture(vec![], SyncConfig::default());
        f.db.get_or_create_user(OWNER).unwrap();
        let stored = normalize(&inbox("old", day(3)), OWNER).unwrap();
        f.db.insert_mail_if_absent(&stored).unwrap();

        let result = f.manager.sync(OWNER).await;

        assert!(result.is_success());
        assert_eq!(result.cursor, Some(day(3)));
        let user = f.db.get_user(OWNER).unwrap().unwrap();
        assert_eq!(user.sync_cursor, Some(day(3)));
    }

    #[tokio::test]
    async fn test_rejected_messages_are_counted_not_stored() {
        let messages = vec![
            message("draft", day(5), &["DRAFT"], &[("Subject", "wip")]),
            inbox("kept", day(4)),
            message("junk", day(3), &["SPAM", "UNREAD"], &[("Subject", "win")]),
            message("bin", day(2), &["TRASH"], &[("Subject", "old")]),
        ];
        let f = fixture(messages, SyncConfig::default());

        let result = f.manager.sync(OWNER).await;

        assert!(result.is_success());
        assert_eq!(result.listed, 4);
        assert_eq!(result.inserted, 1);
        assert_eq!(result.rejected, 3);
        assert!(f.db.get_mail("draft").unwrap().is_none());
        assert!(f.db.get_mail("kept").unwrap().is_some());
        // Cursor comes from the first listed message even when it was rejected
        assert_eq!(result.cursor, Some(day(5)));
    }

    #[tokio::test]
    async fn test_failure_keeps_progress_and_retries_backfill() {
        let f = fixture(mailbox(), paged(2));
        f.provider.fail_fetch_after(3);

        let first = f.manager.sync(OWNER).await;

        assert!(!first.is_success());
        assert!(!first.completed);
        assert!(first.error.as_deref().unwrap_or_default().contains("503"));
        assert_eq!(first.inserted, 3);
        let user = f.db.get_user(OWNER).unwrap().unwrap();
        assert!(!user.is_first_sync_done);
        assert_eq!(user.sync_cursor, None);
        assert_eq!(user.mail_count, 3);

        f.provider.fail_fetch_after(usize::MAX);
        let second = f.manager.sync(OWNER).await;

        assert!(second.is_success(), "{:?}", second.error);
        assert_eq!(second.phase, SyncPhase::Backfilling);
        assert_eq!(second.inserted, 2);
        assert_eq!(second.duplicates, 3);
        let user = f.db.get_user(OWNER).unwrap().unwrap();
        assert!(user.is_first_sync_done);
        assert_eq!(user.mail_count, 5);
    }

    #[tokio::test]
    async fn test_incremental_passes_query_on_every_page() {
        let f = fixture(mailbox(), paged(1));
        assert!(f.manager.sync(OWNER).await.is_success());

        f.provider.push_front(inbox("n1", day(6)));
        f.provider.push_front(inbox("n2", day(7)));
        f.provider.clear_calls();

        let result = f.manager.sync(OWNER).await;

        assert!(result.is_success(), "{:?}", result.error);
        assert_eq!(result.phase, SyncPhase::Incremental);
        // n2, n1 and the cursor-day message m5
        assert_eq!(result.listed, 3);
        assert_eq!(result.inserted, 2);
        assert_eq!(result.duplicates, 1);

        let queries = f.provider.list_queries();
        assert_eq!(queries.len(), 3);
        assert!(queries
            .iter()
            .all(|q| q.as_deref() == Some("after:2024/10/05")));
    }

    #[tokio::test]
    async fn test_repeated_sync_inserts_nothing() {
        let f = fixture(mailbox(), SyncConfig::default());
        assert!(f.manager.sync(OWNER).await.is_success());

        let again = f.manager.sync(OWNER).await;

        assert!(again.is_success());
        assert_eq!(again.inserted, 0);
        let user = f.db.get_user(OWNER).unwrap().unwrap();
        assert_eq!(user.mail_count, 5);
    }

    #[tokio::test]
    async fn test_incremental_keeps_cursor_by_default() {
        let f = fixture(mailbox(), SyncConfig::default());
        assert!(f.manager.sync(OWNER).await.is_success());

        f.provider.push_front(inbox("n1", day(9)));
        let result = f.manager.sync(OWNER).await;

        assert!(result.is_success());
        assert_eq!(result.inserted, 1);
        assert_eq!(result.cursor, Some(day(5)));
        let user = f.db.get_user(OWNER).unwrap().unwrap();
        assert_eq!(user.sync_cursor, Some(day(5)));
    }

    #[tokio::test]
    async fn test_incremental_advances_cursor_when_configured() {
        let config = SyncConfig {
            advance_cursor_on_incremental: true,
            ..Default::default()
        };
        let f = fixture(mailbox(), config);
        assert!(f.manager.sync(OWNER).await.is_success());

        f.provider.push_front(inbox("n1", day(9)));
        let result = f.manager.sync(OWNER).await;

        assert!(result.is_success());
        assert_eq!(result.cursor, Some(day(9)));

        f.provider.clear_calls();
        f.manager.sync(OWNER).await;
        assert_eq!(f.provider.list_queries(), vec![Some("after:2024/10/09".to_string())]);
    }

    #[tokio::test]
    async fn test_incremental_without_cursor_lists_everything() {
        let f = fixture(vec![], SyncConfig::default());
        assert!(f.manager.sync(OWNER).await.is_success());

        f.provider.push_front(inbox("late", day(2) - Duration::days(30)));
        f.provider.clear_calls();
        let result = f.manager.sync(OWNER).await;

        assert_eq!(result.phase, SyncPhase::Incremental);
        assert_eq!(result.inserted, 1);
        assert_eq!(f.provider.list_queries(), vec![None]);
    }

    #[tokio::test]
    async fn test_owners_are_isolated() {
        let f = fixture(mailbox(), SyncConfig::default());
        assert!(f.manager.sync(OWNER).await.is_success());

        let other = f.db.get_or_create_user("carol@example.com").unwrap();
        assert!(!other.is_first_sync_done);
        assert_eq!(other.mail_count, 0);
        assert_eq!(SyncPhase::for_user(&other), SyncPhase::Backfilling);
    }

    #[test]
    fn test_page_size_is_clamped() {
        assert_eq!(paged(0).effective_page_size(), 1);
        assert_eq!(paged(10_000).effective_page_size(), MAX_PAGE_SIZE);
        assert_eq!(SyncConfig::default().effective_page_size(), 500);
    }
}
