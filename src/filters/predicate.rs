//! Storage-agnostic predicate tree built from rule conditions
//!
//! The rule engine emits a `Predicate` and hands it to the mail store, which
//! decides how to execute it. `Predicate::matches` is the reference
//! in-memory evaluation; store adapters must agree with it.
//!
//! A comparison against a field the mail does not carry (no sender, no
//! recipient list, no received timestamp) never matches, whatever the
//! operator.

use crate::db::Mail;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Mail columns a comparison can target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MailField {
    FromEmail,
    Subject,
    Body,
    /// Union of to, cc and bcc
    Recipients,
    ReceivedAt,
}

/// Primitive comparison operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    /// Case-insensitive substring
    Contains,
    NotContains,
    /// Exact equality (set membership for list fields)
    Equals,
    NotEquals,
    Before,
    After,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operand {
    Text(String),
    Timestamp(DateTime<Utc>),
}

/// One primitive comparison over a mail field
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Comparison {
    pub field: MailField,
    pub operator: Operator,
    pub operand: Operand,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Predicate {
    Compare(Comparison),
    /// Conjunction; empty is true
    All(Vec<Predicate>),
    /// Disjunction; empty is false
    Any(Vec<Predicate>),
    OwnedBy(String),
}

impl Comparison {
    pub fn text(field: MailField, operator: Operator, value: impl Into<String>) -> Self {
        Self {
            field,
            operator,
            operand: Operand::Text(value.into()),
        }
    }

    pub fn timestamp(field: MailField, operator: Operator, at: DateTime<Utc>) -> Self {
        Self {
            field,
            operator,
            operand: Operand::Timestamp(at),
        }
    }

    /// Test this comparison against a mail
    pub fn matches(&self, mail: &Mail) -> bool {
        match (&self.operand, self.field) {
            (Operand::Text(value), MailField::FromEmail) => mail
                .from_email
                .as_deref()
                .map(|from| compare_text(self.operator, from, value))
                .unwrap_or(false),
            (Operand::Text(value), MailField::Subject) => {
                compare_text(self.operator, &mail.subject, value)
            }
            (Operand::Text(value), MailField::Body) => {
                compare_text(self.operator, &mail.body, value)
            }
            (Operand::Text(value), MailField::Recipients) => mail
                .all_recipients
                .as_deref()
                .map(|recipients| compare_members(self.operator, recipients, value))
                .unwrap_or(false),
            (Operand::Timestamp(at), MailField::ReceivedAt) => match (mail.received_at, self.operator) {
                (Some(received), Operator::Before) => received < *at,
                (Some(received), Operator::After) => received > *at,
                _ => false,
            },
            _ => false,
        }
    }
}

impl Predicate {
    pub fn matches(&self, mail: &Mail) -> bool {
        match self {
            Predicate::Compare(comparison) => comparison.matches(mail),
            Predicate::All(children) => children.iter().all(|p| p.matches(mail)),
            Predicate::Any(children) => children.iter().any(|p| p.matches(mail)),
            Predicate::OwnedBy(owner) => mail.owner == *owner,
        }
    }
}

fn contains_ignore_case(haystack: &str, needle: &str) -> bool {
    haystack.to_lowercase().contains(&needle.to_lowercase())
}

fn compare_text(operator: Operator, field: &str, value: &str) -> bool {
    match operator {
        Operator::Contains => contains_ignore_case(field, value),
        Operator::NotContains => !contains_ignore_case(field, value),
        Operator::Equals => field == value,
        Operator::NotEquals => field != value,
        Operator::Before | Operator::After => false,
    }
}

fn compare_members(operator: Operator, members: &[String], value: &str) -> bool {
    match operator {
        Operator::Contains => members.iter().any(|m| contains_ignore_case(m, value)),
        Operator::NotContains => !members.iter().any(|m| contains_ignore_case(m, value)),
        Operator::Equals => members.iter().any(|m| m == value),
        Operator::NotEquals => !members.iter().any(|m| m == value),
        Operator::Before | Operator::After => false,
    }
}
