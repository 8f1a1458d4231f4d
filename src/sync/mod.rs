//! Sync Module - incremental mailbox mirroring
//!
//! Architecture:
//! - Backfill: full paginated listing on the first run, then a cursor
//! - Incremental: day-granular listing after the cursor
//! - Idempotent ingestion keyed by provider message id

pub mod manager;
pub mod models;

#[cfg(test)]
mod tests;

// Re-export commonly used types
pub use manager::{SyncManager, SyncManagerError};
pub use models::{SyncConfig, SyncPhase, SyncResult, MAX_PAGE_SIZE};
