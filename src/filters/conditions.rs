//! Rule conditions and their translation into predicates

use super::predicate::{Comparison, MailField, Operator, Predicate};
use super::{FilterError, FilterResult};
use chrono::{DateTime, Duration, Months, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

/// Rule condition, `{"type", "check", "value"}` in the rule document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterCondition {
    #[serde(rename = "type")]
    pub field: ConditionField,
    pub check: ConditionCheck,
    pub value: String,
}

/// Mail attributes a condition can test
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionField {
    From,
    /// Every recipient: to, cc and bcc
    To,
    Subject,
    Body,
    ReceivedAt,
    /// Relative age such as "30 days"
    ReceivedAtDelta,
}

/// Comparison checks for conditions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionCheck {
    Contains,
    NotContains,
    Equals,
    NotEquals,
    LessThan,
    GreaterThan,
}

impl ConditionField {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConditionField::From => "from",
            ConditionField::To => "to",
            ConditionField::Subject => "subject",
            ConditionField::Body => "body",
            ConditionField::ReceivedAt => "received_at",
            ConditionField::ReceivedAtDelta => "received_at_delta",
        }
    }
}

impl ConditionCheck {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConditionCheck::Contains => "contains",
            ConditionCheck::NotContains => "not_contains",
            ConditionCheck::Equals => "equals",
            ConditionCheck::NotEquals => "not_equals",
            ConditionCheck::LessThan => "less_than",
            ConditionCheck::GreaterThan => "greater_than",
        }
    }

    fn text_operator(&self) -> Option<Operator> {
        match self {
            ConditionCheck::Contains => Some(Operator::Contains),
            ConditionCheck::NotContains => Some(Operator::NotContains),
            ConditionCheck::Equals => Some(Operator::Equals),
            ConditionCheck::NotEquals => Some(Operator::NotEquals),
            ConditionCheck::LessThan | ConditionCheck::GreaterThan => None,
        }
    }
}

impl FilterCondition {
    pub fn new(field: ConditionField, check: ConditionCheck, value: impl Into<String>) -> Self {
        Self {
            field,
            check,
            value: value.into(),
        }
    }

    /// Compile into a primitive comparison; `now` anchors relative ages
    pub fn to_predicate(&self, now: DateTime<Utc>) -> FilterResult<Predicate> {
        let comparison = match self.field {
            ConditionField::From => self.text(MailField::FromEmail)?,
            ConditionField::To => self.text(MailField::Recipients)?,
            ConditionField::Subject => self.text(MailField::Subject)?,
            ConditionField::Body => self.text(MailField::Body)?,
            ConditionField::ReceivedAt => {
                let at = parse_date(&self.value)?;
                match self.check {
                    ConditionCheck::LessThan => Comparison::timestamp(MailField::ReceivedAt, Operator::Before, at),
                    ConditionCheck::GreaterThan => Comparison::timestamp(MailField::ReceivedAt, Operator::After, at),
                    _ => return Err(self.unsupported()),
                }
            }
            ConditionField::ReceivedAtDelta => {
                let threshold = parse_delta(&self.value, now)?;
                match self.check {
                    // older than the interval
                    ConditionCheck::GreaterThan => {
                        Comparison::timestamp(MailField::ReceivedAt, Operator::Before, threshold)
                    }
                    // newer than the interval
                    ConditionCheck::LessThan => {
                        Comparison::timestamp(MailField::ReceivedAt, Operator::After, threshold)
                    }
                    _ => return Err(self.unsupported()),
                }
            }
        };

        Ok(Predicate::Compare(comparison))
    }

    fn text(&self, field: MailField) -> FilterResult<Comparison> {
        self.check
            .text_operator()
            .map(|op| Comparison::text(field, op, self.value.clone()))
            .ok_or_else(|| self.unsupported())
    }

    fn unsupported(&self) -> FilterError {
        FilterError::UnsupportedCheck {
            field: self.field.as_str().to_string(),
            check: self.check.as_str().to_string(),
        }
    }
}

/// Absolute timestamp; naive values are taken as UTC
pub fn parse_date(value: &str) -> FilterResult<DateTime<Utc>> {
    let value = value.trim();
    for format in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(value, format) {
            return Ok(dt.and_utc());
        }
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
        .ok_or_else(|| FilterError::InvalidDate(value.to_string()))
}

/// `now` minus "<n> days" or "<n> months"
pub fn parse_delta(value: &str, now: DateTime<Utc>) -> FilterResult<DateTime<Utc>> {
    let invalid = || FilterError::InvalidDelta(value.to_string());

    let parts: Vec<&str> = value.split_whitespace().collect();
    let [amount, unit] = parts.as_slice() else {
        return Err(invalid());
    };
    let amount: u32 = amount.parse().map_err(|_| invalid())?;

    match *unit {
        "days" => now.checked_sub_signed(Duration::days(i64::from(amount))),
        "months" => now.checked_sub_months(Months::new(amount)),
        _ => None,
    }
    .ok_or_else(invalid)
}
