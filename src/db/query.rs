//! Compiles a `Predicate` into a parameterised SQLite `WHERE` clause
//!
//! Array columns are JSON, so membership tests go through `json_each`.
//! Missing values are excluded explicitly to line up with
//! `Predicate::matches`.

use crate::filters::{Comparison, MailField, Operand, Operator, Predicate};
use rusqlite::types::Value;

/// Escape LIKE wildcards so user text is matched literally
fn escape_like_pattern(query: &str) -> String {
    query
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}

fn contains_pattern(value: &str) -> Value {
    Value::Text(format!("%{}%", escape_like_pattern(&value.to_lowercase())))
}

/// Returns the clause and its positional parameters
pub(super) fn compile(predicate: &Predicate) -> (String, Vec<Value>) {
    let mut values = Vec::new();
    let clause = compile_into(predicate, &mut values);
    (clause, values)
}

fn compile_into(predicate: &Predicate, values: &mut Vec<Value>) -> String {
    match predicate {
        Predicate::Compare(comparison) => compile_comparison(comparison, values),
        Predicate::All(children) if children.is_empty() => "1".to_string(),
        Predicate::Any(children) if children.is_empty() => "0".to_string(),
        Predicate::All(children) => join(children, " AND ", values),
        Predicate::Any(children) => join(children, " OR ", values),
        Predicate::OwnedBy(owner) => {
            values.push(Value::Text(owner.clone()));
            "owner = ?".to_string()
        }
    }
}

fn join(children: &[Predicate], separator: &str, values: &mut Vec<Value>) -> String {
    let parts: Vec<String> = children.iter().map(|c| compile_into(c, values)).collect();
    format!("({})", parts.join(separator))
}

fn compile_comparison(comparison: &Comparison, values: &mut Vec<Value>) -> String {
    match (&comparison.operand, comparison.field) {
        (Operand::Text(value), MailField::FromEmail) => {
            text_clause("from_email", comparison.operator, value, values)
                .map(|clause| format!("(from_email IS NOT NULL AND {})", clause))
                .unwrap_or_else(|| "0".to_string())
        }
        (Operand::Text(value), MailField::Subject) => {
            text_clause("subject", comparison.operator, value, values).unwrap_or_else(|| "0".to_string())
        }
        (Operand::Text(value), MailField::Body) => {
            text_clause("body", comparison.operator, value, values).unwrap_or_else(|| "0".to_string())
        }
        (Operand::Text(value), MailField::Recipients) => {
            let (negate, condition, param) = match comparison.operator {
                Operator::Contains => (false, r"casefold(r.value) LIKE ? ESCAPE '\'", contains_pattern(value)),
                Operator::NotContains => (true, r"casefold(r.value) LIKE ? ESCAPE '\'", contains_pattern(value)),
                Operator::Equals => (false, "r.value = ?", Value::Text(value.clone())),
                Operator::NotEquals => (true, "r.value = ?", Value::Text(value.clone())),
                Operator::Before | Operator::After => return "0".to_string(),
            };
            values.push(param);
            format!(
                "(all_recipients IS NOT NULL AND {}EXISTS (SELECT 1 FROM json_each(mails.all_recipients) AS r WHERE {}))",
                if negate { "NOT " } else { "" },
                condition
            )
        }
        (Operand::Timestamp(at), MailField::ReceivedAt) => {
            let op = match comparison.operator {
                Operator::Before => "<",
                Operator::After => ">",
                _ => return "0".to_string(),
            };
            values.push(Value::Integer(at.timestamp_millis()));
            format!("(received_at IS NOT NULL AND received_at {} ?)", op)
        }
        _ => "0".to_string(),
    }
}

fn text_clause(column: &str, operator: Operator, value: &str, values: &mut Vec<Value>) -> Option<String> {
    let clause = match operator {
        Operator::Contains => {
            values.push(contains_pattern(value));
            format!(r"casefold({}) LIKE ? ESCAPE '\'", column)
        }
        Operator::NotContains => {
            values.push(contains_pattern(value));
            format!(r"casefold({}) NOT LIKE ? ESCAPE '\'", column)
        }
        Operator::Equals => {
            values.push(Value::Text(value.to_string()));
            format!("{} = ?", column)
        }
        Operator::NotEquals => {
            values.push(Value::Text(value.to_string()));
            format!("{} <> ?", column)
        }
        Operator::Before | Operator::After => return None,
    };
    Some(clause)
}
