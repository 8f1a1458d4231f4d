//! Label registry
//!
//! Resolves symbolic label names used by rules to provider label ids, one
//! namespace per mailbox owner. Resolution order is cache, stored mapping,
//! existing remote label, then remote creation. Names are matched ignoring
//! letter case everywhere, and the first spelling stored for an owner is the
//! one rules write locally. An existing mapping always wins over a freshly
//! created one.
//!
//! Reserved names are screened by callers with [`is_reserved`]; the registry
//! itself resolves whatever it is given.

use crate::cache::LabelCache;
use crate::db::{DbError, LabelMapping, MailStore};
use crate::mail::{MailError, MailProvider};
use regex_lite::Regex;
use std::sync::{Arc, OnceLock};
use thiserror::Error;

/// System-managed names rules may never target
pub const RESERVED_LABELS: [&str; 7] = ["READ", "UNREAD", "SPAM", "TRASH", "DRAFTS", "SENT", "INBOX"];

pub const MAX_LABEL_LEN: usize = 255;

#[derive(Error, Debug)]
pub enum LabelError {
    #[error("Invalid label name '{name}': {reason}")]
    InvalidName { name: String, reason: String },

    #[error("Database error: {0}")]
    Db(#[from] DbError),

    #[error("Provider error: {0}")]
    Provider(#[from] MailError),
}

pub type LabelResult<T> = Result<T, LabelError>;

/// Case-insensitive check against `RESERVED_LABELS`
pub fn is_reserved(name: &str) -> bool {
    RESERVED_LABELS.iter().any(|r| r.eq_ignore_ascii_case(name))
}

fn label_charset() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z0-9_-]+$").ok()).as_ref()
}

/// Non-empty, at most `MAX_LABEL_LEN` characters, `[A-Za-z0-9_-]` only
pub fn validate_label_name(name: &str) -> LabelResult<()> {
    let invalid = |reason: &str| LabelError::InvalidName {
        name: name.to_string(),
        reason: reason.to_string(),
    };

    if name.is_empty() {
        return Err(invalid("must not be empty"));
    }
    if name.chars().count() > MAX_LABEL_LEN {
        return Err(invalid("longer than 255 characters"));
    }
    let allowed = match label_charset() {
        Some(re) => re.is_match(name),
        None => name.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'),
    };
    if !allowed {
        return Err(invalid("only letters, digits, '-' and '_' are allowed"));
    }
    Ok(())
}

/// Symbolic label name -> provider label id, per owner
pub struct LabelRegistry {
    store: Arc<dyn MailStore>,
    provider: Arc<dyn MailProvider>,
    cache: LabelCache,
}

impl LabelRegistry {
    pub fn new(store: Arc<dyn MailStore>, provider: Arc<dyn MailProvider>) -> Self {
        Self::with_cache(store, provider, LabelCache::new())
    }

    pub fn with_cache(store: Arc<dyn MailStore>, provider: Arc<dyn MailProvider>, cache: LabelCache) -> Self {
        Self {
            store,
            provider,
            cache,
        }
    }

    /// Resolve `name` for `owner`, creating the remote label if needed.
    /// The returned mapping carries the owner's canonical spelling.
    pub async fn resolve_or_create(&self, owner: &str, name: &str) -> LabelResult<LabelMapping> {
        if let Some(mapping) = self.cache.get(owner, name).await {
            return Ok(mapping);
        }

        if let Some(mapping) = self.store.get_label_mapping(owner, name)? {
            log::debug!("Label '{}' for {} resolved from store: {}", name, owner, mapping.label_id);
            self.cache.insert(mapping.clone()).await;
            return Ok(mapping);
        }

        let existing = self
            .provider
            .list_labels()
            .await?
            .into_iter()
            .find(|label| label.name.eq_ignore_ascii_case(name));

        let remote_id = match existing {
            Some(label) => {
                log::info!("Adopting existing remote label '{}' ({}) for {}", label.name, label.id, owner);
                label.id
            }
            None => {
                let label = self.provider.create_label(name).await?;
                log::info!("Created label '{}' ({}) for {}", name, label.id, owner);
                label.id
            }
        };

        // A concurrent run may have stored a mapping meanwhile; keep theirs.
        let mapping = self.store.insert_label_mapping(owner, name, &remote_id)?;
        if mapping.label_id != remote_id {
            log::warn!(
                "Label '{}' for {} already mapped to {}, ignoring {}",
                mapping.name,
                owner,
                mapping.label_id,
                remote_id
            );
        }

        self.cache.insert(mapping.clone()).await;
        Ok(mapping)
    }
}
