//! Runtime configuration from the environment (`.env` honoured)

use crate::cache::LabelCacheConfig;
use crate::mail::gmail::DEFAULT_API_BASE;
use crate::sync::{SyncConfig, MAX_PAGE_SIZE};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

pub const DB_PATH_VAR: &str = "MAILSIEVE_DB_PATH";
pub const ACCESS_TOKEN_VAR: &str = "GMAIL_ACCESS_TOKEN";
pub const API_BASE_VAR: &str = "GMAIL_API_BASE";
pub const PAGE_SIZE_VAR: &str = "GMAIL_PAGE_SIZE";
pub const TIMEOUT_VAR: &str = "GMAIL_HTTP_TIMEOUT_SECS";
pub const ADVANCE_CURSOR_VAR: &str = "MAILSIEVE_ADVANCE_CURSOR";

const DEFAULT_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for {var}: {value}")]
    Invalid { var: &'static str, value: String },

    #[error("{0} is not set")]
    Missing(&'static str),

    #[error("Failed to get app directories - set MAILSIEVE_DB_PATH explicitly")]
    NoDataDir,

    #[error("Failed to create data directory: {0}")]
    Io(#[from] std::io::Error),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub db_path: PathBuf,
    /// Bearer token; acquired outside this tool
    #[serde(skip_serializing)]
    pub access_token: Option<String>,
    pub api_base: String,
    pub page_size: u32,
    pub http_timeout_secs: u64,
    pub advance_cursor_on_incremental: bool,
    #[serde(default)]
    pub label_cache: LabelCacheConfig,
}

impl AppConfig {
    /// Load `.env` if present, then read the process environment
    pub fn from_env() -> ConfigResult<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Build from any variable source
    pub fn from_lookup<F>(lookup: F) -> ConfigResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |var: &str| lookup(var).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let db_path = match get(DB_PATH_VAR) {
            Some(path) => PathBuf::from(path),
            None => default_db_path()?,
        };

        let page_size = match get(PAGE_SIZE_VAR) {
            Some(raw) => match raw.parse::<u32>() {
                Ok(n) if (1..=MAX_PAGE_SIZE).contains(&n) => n,
                _ => return Err(ConfigError::Invalid { var: PAGE_SIZE_VAR, value: raw }),
            },
            None => MAX_PAGE_SIZE,
        };

        let http_timeout_secs = match get(TIMEOUT_VAR) {
            Some(raw) => match raw.parse::<u64>() {
                Ok(n) if n > 0 => n,
                _ => return Err(ConfigError::Invalid { var: TIMEOUT_VAR, value: raw }),
            },
            None => DEFAULT_TIMEOUT_SECS,
        };

        let advance_cursor_on_incremental = match get(ADVANCE_CURSOR_VAR) {
            Some(raw) => parse_bool(&raw).ok_or(ConfigError::Invalid {
                var: ADVANCE_CURSOR_VAR,
                value: raw,
            })?,
            None => false,
        };

        Ok(Self {
            db_path,
            access_token: get(ACCESS_TOKEN_VAR),
            api_base: get(API_BASE_VAR).unwrap_or_else(|| DEFAULT_API_BASE.to_string()),
            page_size,
            http_timeout_secs,
            advance_cursor_on_incremental,
            label_cache: LabelCacheConfig::default(),
        })
    }

    pub fn sync_config(&self) -> SyncConfig {
        SyncConfig {
            page_size: self.page_size,
            advance_cursor_on_incremental: self.advance_cursor_on_incremental,
        }
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    /// Token for provider commands
    pub fn require_access_token(&self) -> ConfigResult<&str> {
        self.access_token
            .as_deref()
            .ok_or(ConfigError::Missing(ACCESS_TOKEN_VAR))
    }
}

/// `<data dir>/mailsieve.db`, creating the directory
fn default_db_path() -> ConfigResult<PathBuf> {
    let dirs = directories::ProjectDirs::from("com", "mailsieve", "mailsieve").ok_or(ConfigError::NoDataDir)?;
    let data_dir = dirs.data_dir();
    std::fs::create_dir_all(data_dir)?;
    Ok(data_dir.join("mailsieve.db"))
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
