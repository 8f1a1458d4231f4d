//! # Mailsieve
//!
//! Mirrors a Gmail mailbox into a local SQLite store and applies
//! declarative labeling rules to it, locally and remotely.

pub mod cache;
pub mod config;
pub mod db;
pub mod filters;
pub mod labels;
pub mod mail;
pub mod sync;

use cache::LabelCache;
use config::{AppConfig, ConfigError};
use db::{Database, DbError, MailStore};
use filters::{ExecutionReport, FilterEngine, FilterError, RuleSet};
use labels::LabelRegistry;
use mail::{GmailClient, MailError, MailProvider};
use std::path::Path;
use std::sync::Arc;
use sync::{SyncManager, SyncResult};

/// Top-level error for the command line entry points
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Database(#[from] DbError),

    #[error(transparent)]
    Provider(#[from] MailError),

    #[error(transparent)]
    Filter(#[from] FilterError),

    #[error("Sync of {owner} failed: {message}")]
    Sync { owner: String, message: String },
}

pub type AppResult<T> = Result<T, AppError>;

/// Initialize logger; `debug` lowers the default filter. `RUST_LOG` wins.
pub fn init_logging(debug: bool) {
    let default = if debug { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default)).init();
}

/// Open (or create) the database at the configured path
pub fn open_database(config: &AppConfig) -> AppResult<Arc<Database>> {
    log::info!("Database path: {:?}", config.db_path);
    let db = Database::new(config.db_path.clone())?;
    log::info!("Database initialized successfully");
    Ok(Arc::new(db))
}

/// Wired engines sharing one store and one provider
pub struct AppState {
    store: Arc<dyn MailStore>,
    label_cache: LabelCache,
    sync_manager: SyncManager,
    filter_engine: FilterEngine,
}

impl AppState {
    pub fn new(config: &AppConfig, store: Arc<dyn MailStore>, provider: Arc<dyn MailProvider>) -> Self {
        let cache = LabelCache::with_config(config.label_cache.clone());
        let registry = LabelRegistry::with_cache(store.clone(), provider.clone(), cache.clone());

        Self {
            label_cache: cache,
            sync_manager: SyncManager::with_config(config.sync_config(), store.clone(), provider.clone()),
            filter_engine: FilterEngine::with_registry(store.clone(), provider, registry),
            store,
        }
    }

    /// Build against the Gmail REST API with the configured token
    pub fn connect(config: &AppConfig, store: Arc<dyn MailStore>) -> AppResult<Self> {
        let client = GmailClient::new(&config.api_base, config.require_access_token()?, config.http_timeout())?;
        Ok(Self::new(config, store, Arc::new(client)))
    }

    pub fn store(&self) -> &Arc<dyn MailStore> {
        &self.store
    }

    /// Sync `owner`; a partial run is reported as an error after logging
    pub async fn sync(&self, owner: &str) -> AppResult<SyncResult> {
        let result = self.sync_manager.sync(owner).await;
        log::info!(
            "Sync {} ({}): listed {}, inserted {}, duplicates {}, rejected {}",
            owner,
            result.phase.as_str(),
            result.listed,
            result.inserted,
            result.duplicates,
            result.rejected
        );

        match &result.error {
            Some(message) => Err(AppError::Sync {
                owner: owner.to_string(),
                message: message.clone(),
            }),
            None => Ok(result),
        }
    }

    /// Load rules from `rules_file` and apply them to `owner`'s mail
    pub async fn run_rules(&self, owner: &str, rules_file: &Path) -> AppResult<ExecutionReport> {
        let rule_set = RuleSet::load(rules_file)?;
        let report = self.filter_engine.execute(&rule_set.rules, owner).await?;

        for rule in &report.rules {
            log::info!(
                "Rule '{}': {} matched, {} local changes, {} remote calls, {} actions skipped",
                rule.name,
                rule.matched,
                rule.mutations,
                rule.remote_calls,
                rule.skipped_actions
            );
        }

        let stats = self.label_cache.stats().await;
        log::debug!(
            "Label cache: {} hits, {} misses ({:.1}% hit rate), {} entries",
            stats.hits,
            stats.misses,
            stats.hit_rate,
            stats.entry_count
        );
        Ok(report)
    }
}
