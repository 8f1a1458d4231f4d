//! Rule-based mail filtering
//!
//! A rule document lists rules that are applied in order. Each rule has
//! conditions combined with ALL or ANY logic and label actions that are
//! applied idempotently to the local store and the provider.

pub mod actions;
pub mod conditions;
pub mod engine;
pub mod predicate;

pub use actions::{FilterAction, FilterActionType};
pub use conditions::{ConditionCheck, ConditionField, FilterCondition};
pub use engine::{ExecutionReport, FilterEngine, RuleReport};
pub use predicate::{Comparison, MailField, Operand, Operator, Predicate};

use crate::db::DbError;
use crate::labels::LabelError;
use crate::mail::MailError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Errors that abort a whole rule run
#[derive(Error, Debug)]
pub enum FilterError {
    #[error("Invalid rule document: {0}")]
    InvalidRules(String),

    #[error("Failed to read rules: {0}")]
    Io(#[from] std::io::Error),

    #[error("Check '{check}' is not supported for condition '{field}'")]
    UnsupportedCheck { field: String, check: String },

    #[error("Invalid date '{0}', expected YYYY-MM-DDThh:mm:ss, YYYY-MM-DD hh:mm:ss or YYYY-MM-DD")]
    InvalidDate(String),

    #[error("Invalid interval '{0}', expected '<number> days' or '<number> months'")]
    InvalidDelta(String),

    #[error("Rule '{rule}' moves to a folder without naming one")]
    MissingLabel { rule: String },

    #[error(transparent)]
    Label(#[from] LabelError),

    #[error("Database error: {0}")]
    Db(#[from] DbError),

    #[error("Provider error: {0}")]
    Provider(#[from] MailError),
}

pub type FilterResult<T> = Result<T, FilterError>;

/// Match logic for multiple conditions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchLogic {
    All, // AND - all conditions must match
    Any, // OR - any condition must match
}

impl MatchLogic {
    pub fn combine(&self, predicates: Vec<Predicate>) -> Predicate {
        match self {
            MatchLogic::All => Predicate::All(predicates),
            MatchLogic::Any => Predicate::Any(predicates),
        }
    }
}

/// One named rule of the rule document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rule {
    pub name: String,
    pub match_type: MatchLogic,
    pub conditions: Vec<FilterCondition>,
    pub actions: Vec<FilterAction>,
}

impl Rule {
    /// Predicate selecting the owner's mail that satisfies this rule
    pub fn predicate(&self, owner: &str, now: DateTime<Utc>) -> FilterResult<Predicate> {
        let conditions = self
            .conditions
            .iter()
            .map(|c| c.to_predicate(now))
            .collect::<FilterResult<Vec<_>>>()?;

        Ok(Predicate::All(vec![
            Predicate::OwnedBy(owner.to_string()),
            self.match_type.combine(conditions),
        ]))
    }
}

/// `{"rules": [...]}`; a document without `rules` is empty
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuleSet {
    #[serde(default)]
    pub rules: Vec<Rule>,
}

impl RuleSet {
    pub fn from_json(json: &str) -> FilterResult<Self> {
        serde_json::from_str(json).map_err(|e| FilterError::InvalidRules(e.to_string()))
    }

    pub fn load(path: impl AsRef<Path>) -> FilterResult<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)?;
        let rule_set = Self::from_json(&json)?;
        log::info!("Loaded {} rules from {}", rule_set.rules.len(), path.display());
        Ok(rule_set)
    }
}
