//! Filter engine - applies rules to stored mail
//!
//! A run validates every rule before touching anything, then processes rules
//! strictly in order. Mutations are persisted as they happen, so later rules
//! see the labels written by earlier ones. Each local label change is a
//! conditional store update, and the provider is only called when that
//! update actually changed the mail.

use super::{FilterActionType, FilterError, FilterResult, Rule};
use crate::db::{DbResult, Mail, MailStore};
use crate::labels::{is_reserved, validate_label_name, LabelRegistry};
use crate::mail::normalize::{READ_LABEL, UNREAD_LABEL};
use crate::mail::MailProvider;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;

/// Action resolved against the owner's labels
#[derive(Debug, Clone)]
enum PlannedAction {
    AddLabel { name: String, label_id: String },
    MarkAsRead,
    MarkAsUnread,
}

/// Outcome of one rule
#[derive(Debug, Clone, Default, Serialize)]
pub struct RuleReport {
    pub name: String,
    pub matched: usize,
    /// Local label changes that took effect
    pub mutations: usize,
    pub remote_calls: usize,
    pub skipped_actions: usize,
}

/// Outcome of a full run
#[derive(Debug, Clone, Default, Serialize)]
pub struct ExecutionReport {
    pub rules: Vec<RuleReport>,
}

impl ExecutionReport {
    pub fn remote_calls(&self) -> usize {
        self.rules.iter().map(|r| r.remote_calls).sum()
    }

    pub fn mutations(&self) -> usize {
        self.rules.iter().map(|r| r.mutations).sum()
    }
}

/// Filter engine that applies rules to an owner's mail
pub struct FilterEngine {
    store: Arc<dyn MailStore>,
    provider: Arc<dyn MailProvider>,
    labels: LabelRegistry,
}

impl FilterEngine {
    /// Create a new filter engine
    pub fn new(store: Arc<dyn MailStore>, provider: Arc<dyn MailProvider>) -> Self {
        let labels = LabelRegistry::new(store.clone(), provider.clone());
        Self {
            store,
            provider,
            labels,
        }
    }

    pub fn with_registry(store: Arc<dyn MailStore>, provider: Arc<dyn MailProvider>, labels: LabelRegistry) -> Self {
        Self {
            store,
            provider,
            labels,
        }
    }

    /// Apply `rules` in order to the mail of `owner`
    pub async fn execute(&self, rules: &[Rule], owner: &str) -> FilterResult<ExecutionReport> {
        self.execute_at(rules, owner, Utc::now()).await
    }

    /// Like `execute`, with relative ages measured from `now`
    pub async fn execute_at(&self, rules: &[Rule], owner: &str, now: DateTime<Utc>) -> FilterResult<ExecutionReport> {
        // Fail fast: nothing is mutated if any rule is malformed
        let predicates = rules
            .iter()
            .map(|rule| {
                Self::validate_actions(rule)?;
                rule.predicate(owner, now)
            })
            .collect::<FilterResult<Vec<_>>>()?;

        let mut report = ExecutionReport::default();

        for (rule, predicate) in rules.iter().zip(predicates) {
            let mut rule_report = RuleReport {
                name: rule.name.clone(),
                ..Default::default()
            };

            let actions = self.plan_actions(rule, owner, &mut rule_report).await?;

            let mails = self.store.find_mails(&predicate)?;
            rule_report.matched = mails.len();
            log::info!("Found {} mails matching rule '{}'", mails.len(), rule.name);

            for mail in &mails {
                for action in &actions {
                    self.apply(mail, action, &mut rule_report).await?;
                }
            }

            log::info!(
                "Rule '{}' done: {} label changes, {} remote calls",
                rule.name,
                rule_report.mutations,
                rule_report.remote_calls
            );
            report.rules.push(rule_report);
        }

        Ok(report)
    }

    fn validate_actions(rule: &Rule) -> FilterResult<()> {
        for action in &rule.actions {
            if action.action == FilterActionType::MoveToFolder {
                let label = action.value.as_deref().ok_or_else(|| FilterError::MissingLabel {
                    rule: rule.name.clone(),
                })?;
                validate_label_name(label)?;
            }
        }
        Ok(())
    }

    /// Resolve label targets; reserved names are dropped with a warning
    async fn plan_actions(&self, rule: &Rule, owner: &str, report: &mut RuleReport) -> FilterResult<Vec<PlannedAction>> {
        let mut planned = Vec::with_capacity(rule.actions.len());

        for action in &rule.actions {
            match action.action {
                FilterActionType::MoveToFolder => {
                    let name = action.value.clone().unwrap_or_default();
                    if is_reserved(&name) {
                        log::warn!(
                            "Rule '{}': moving to reserved label '{}' is not supported, skipping",
                            rule.name,
                            name
                        );
                        report.skipped_actions += 1;
                        continue;
                    }
                    let mapping = self.labels.resolve_or_create(owner, &name).await?;
                    planned.push(PlannedAction::AddLabel {
                        name: mapping.name,
                        label_id: mapping.label_id,
                    });
                }
                FilterActionType::MarkAsRead => planned.push(PlannedAction::MarkAsRead),
                FilterActionType::MarkAsUnread => planned.push(PlannedAction::MarkAsUnread),
            }
        }

        Ok(planned)
    }

    async fn apply(&self, mail: &Mail, action: &PlannedAction, report: &mut RuleReport) -> FilterResult<()> {
        match action {
            PlannedAction::AddLabel { name, label_id } => {
                if self.store.add_label_if_absent(&mail.id, name)? {
                    log::info!("Label '{}' added to mail {}", name, mail.id);
                    report.mutations += 1;
                    self.modify_remote(&mail.id, &[label_id.clone()], &[], report, |store| {
                        store.remove_label_if_present(&mail.id, name)
                    })
                    .await?;
                }
            }
            PlannedAction::MarkAsRead => {
                if self.store.remove_label_if_present(&mail.id, UNREAD_LABEL)? {
                    log::info!("Mail {} marked as read", mail.id);
                    report.mutations += 1;
                    self.modify_remote(&mail.id, &[], &[UNREAD_LABEL.to_string()], report, |store| {
                        store.add_label_if_absent(&mail.id, UNREAD_LABEL)
                    })
                    .await?;
                }
                if self.store.add_label_if_absent(&mail.id, READ_LABEL)? {
                    report.mutations += 1;
                }
            }
            PlannedAction::MarkAsUnread => {
                if self.store.add_label_if_absent(&mail.id, UNREAD_LABEL)? {
                    log::info!("Mail {} marked as unread", mail.id);
                    report.mutations += 1;
                    self.modify_remote(&mail.id, &[UNREAD_LABEL.to_string()], &[], report, |store| {
                        store.remove_label_if_present(&mail.id, UNREAD_LABEL)
                    })
                    .await?;
                }
                if self.store.remove_label_if_present(&mail.id, READ_LABEL)? {
                    report.mutations += 1;
                }
            }
        }
        Ok(())
    }

    /// Push a local change to the provider. On failure `revert` undoes the
    /// local change so a rerun retries it.
    async fn modify_remote<F>(
        &self,
        message_id: &str,
        add: &[String],
        remove: &[String],
        report: &mut RuleReport,
        revert: F,
    ) -> FilterResult<()>
    where
        F: FnOnce(&dyn MailStore) -> DbResult<bool>,
    {
        log::debug!("Updating remote labels of {} (+{:?} -{:?})", message_id, add, remove);
        if let Err(e) = self.provider.modify_labels(message_id, add, remove).await {
            log::warn!("Remote update of {} failed, reverting local change: {}", message_id, e);
            match revert(self.store.as_ref()) {
                Ok(_) => report.mutations -= 1,
                Err(db_err) => log::error!("Failed to revert local change on {}: {}", message_id, db_err),
            }
            return Err(e.into());
        }
        report.remote_calls += 1;
        Ok(())
    }
}
