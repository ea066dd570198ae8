//! Filter trees and their evaluation against stored records.
//!
//! Both the fluent builder and the wire parser produce [`FilterExpr`] trees.
//! The compiler turns them into [`Predicate`]s, which is the form the record
//! scan understands.

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;

use crate::record::Record;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Operator {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    In,
    NotIn,
    /// SQL-style pattern: `%` any run, `_` one character, case-insensitive
    Like,
    NotLike,
}

impl Operator {
    /// Wire prefix for this operator
    pub fn symbol(&self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::Ne => "!=",
            Self::Gt => ">",
            Self::Gte => ">=",
            Self::Lt => "<",
            Self::Lte => "<=",
            Self::In => "in:",
            Self::NotIn => "!in:",
            Self::Like => "~",
            Self::NotLike => "!~",
        }
    }

    pub fn is_set(&self) -> bool {
        matches!(self, Self::In | Self::NotIn)
    }

    pub fn is_pattern(&self) -> bool {
        matches!(self, Self::Like | Self::NotLike)
    }
}

/// Declared filter, as built or parsed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FilterExpr {
    Condition {
        field: String,
        op: Operator,
        value: Value,
    },
    And(Vec<FilterExpr>),
    Or(Vec<FilterExpr>),
}

impl FilterExpr {
    pub fn condition(field: impl Into<String>, op: Operator, value: impl Into<Value>) -> Self {
        Self::Condition {
            field: field.into(),
            op,
            value: value.into(),
        }
    }

    /// Every field referenced anywhere in the tree
    pub fn fields(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_fields(&mut out);
        out
    }

    fn collect_fields<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Self::Condition { field, .. } => out.push(field),
            Self::And(children) | Self::Or(children) => {
                for child in children {
                    child.collect_fields(out);
                }
            }
        }
    }
}

/// Compiled filter, ready to run against records.
#[derive(Debug, Clone)]
pub enum Predicate {
    Compare { field: String, op: Operator, value: Value },
    InSet { field: String, values: Vec<Value>, negate: bool },
    Matches { field: String, pattern: Regex, negate: bool },
    All(Vec<Predicate>),
    Any(Vec<Predicate>),
}

impl PartialEq for Predicate {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (
                Self::Compare { field: a, op: oa, value: va },
                Self::Compare { field: b, op: ob, value: vb },
            ) => a == b && oa == ob && va == vb,
            (
                Self::InSet { field: a, values: va, negate: na },
                Self::InSet { field: b, values: vb, negate: nb },
            ) => a == b && va == vb && na == nb,
            (
                Self::Matches { field: a, pattern: pa, negate: na },
                Self::Matches { field: b, pattern: pb, negate: nb },
            ) => a == b && pa.as_str() == pb.as_str() && na == nb,
            (Self::All(a), Self::All(b)) | (Self::Any(a), Self::Any(b)) => a == b,
            _ => false,
        }
    }
}

impl Predicate {
    pub fn always() -> Self {
        Self::All(Vec::new())
    }

    pub fn matches(&self, record: &Record) -> bool {
        match self {
            Self::Compare { field, op, value } => compare(&record.get(field), *op, value),
            Self::InSet { field, values, negate } => {
                let actual = record.get(field);
                values.iter().any(|v| equals(&actual, v)) != *negate
            }
            Self::Matches { field, pattern, negate } => {
                let hit = match record.get(field) {
                    Value::String(s) => pattern.is_match(&s),
                    Value::Array(items) => items
                        .iter()
                        .any(|item| item.as_str().map_or(false, |s| pattern.is_match(s))),
                    _ => false,
                };
                hit != *negate
            }
            Self::All(children) => children.iter().all(|c| c.matches(record)),
            Self::Any(children) => children.iter().any(|c| c.matches(record)),
        }
    }
}

/// Translate a like-pattern into an anchored, case-insensitive regex.
///
/// A pattern without wildcards matches as a substring.
pub fn like_to_regex(pattern: &str) -> Result<Regex, regex::Error> {
    let pattern = if pattern.contains('%') || pattern.contains('_') {
        pattern.to_string()
    } else {
        format!("%{}%", pattern)
    };
    let mut out = String::from("(?is)^");
    let mut literal = String::new();
    for ch in pattern.chars() {
        match ch {
            '%' | '_' => {
                out.push_str(&regex::escape(&literal));
                literal.clear();
                out.push_str(if ch == '%' { ".*" } else { "." });
            }
            other => literal.push(other),
        }
    }
    out.push_str(&regex::escape(&literal));
    out.push('$');
    Regex::new(&out)
}

/// Equality where an array field equals a scalar it contains.
fn equals(actual: &Value, expected: &Value) -> bool {
    match (actual, expected) {
        (Value::Array(items), scalar) if !scalar.is_array() => {
            items.iter().any(|item| compare_values(item, scalar) == Some(Ordering::Equal))
        }
        _ => compare_values(actual, expected) == Some(Ordering::Equal),
    }
}

fn compare(actual: &Value, op: Operator, expected: &Value) -> bool {
    match op {
        Operator::Eq => equals(actual, expected),
        Operator::Ne => !equals(actual, expected),
        Operator::Gt => compare_values(actual, expected) == Some(Ordering::Greater),
        Operator::Gte => matches!(compare_values(actual, expected), Some(Ordering::Greater | Ordering::Equal)),
        Operator::Lt => compare_values(actual, expected) == Some(Ordering::Less),
        Operator::Lte => matches!(compare_values(actual, expected), Some(Ordering::Less | Ordering::Equal)),
        // Set and pattern operators compile to their own predicates.
        Operator::In | Operator::NotIn | Operator::Like | Operator::NotLike => false,
    }
}

/// Compare two JSON values, returning an ordering if the types are comparable.
///
/// - Numbers: compared as f64
/// - Strings: compared lexicographically
/// - Booleans: false < true
/// - Null == Null
/// - Arrays: element-wise
/// - Mismatched types: `None`
pub fn compare_values(left: &Value, right: &Value) -> Option<Ordering> {
    match (left, right) {
        (Value::Null, Value::Null) => Some(Ordering::Equal),
        (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
        (Value::Number(a), Value::Number(b)) => a.as_f64()?.partial_cmp(&b.as_f64()?),
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        (Value::Array(a), Value::Array(b)) => {
            for (x, y) in a.iter().zip(b.iter()) {
                match compare_values(x, y)? {
                    Ordering::Equal => continue,
                    other => return Some(other),
                }
            }
            Some(a.len().cmp(&b.len()))
        }
        (Value::Object(a), Value::Object(b)) if a == b => Some(Ordering::Equal),
        _ => None,
    }
}

fn type_rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Number(_) => 2,
        Value::String(_) => 3,
        Value::Array(_) => 4,
        Value::Object(_) => 5,
    }
}

/// Total order for sorting: nulls first, then by type, then by value.
pub fn sort_order(left: &Value, right: &Value) -> Ordering {
    compare_values(left, right).unwrap_or_else(|| type_rank(left).cmp(&type_rank(right)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Map};

    fn record(values: Value) -> Record {
        Record::new(4, values.as_object().cloned().unwrap_or_else(Map::new))
    }

    #[test]
    fn test_compare_values() {
        assert_eq!(compare_values(&json!(5), &json!(5.0)), Some(Ordering::Equal));
        assert_eq!(compare_values(&json!("a"), &json!("b")), Some(Ordering::Less));
        assert_eq!(compare_values(&json!(1), &json!("1")), None);
        assert_eq!(sort_order(&Value::Null, &json!(0)), Ordering::Less);
    }

    #[test]
    fn test_predicates() {
        let r = record(json!({"views": 10, "tags": ["rust", "db"], "title": "Hello World"}));

        assert!(Predicate::Compare { field: "views".into(), op: Operator::Gte, value: json!(10) }.matches(&r));
        assert!(!Predicate::Compare { field: "views".into(), op: Operator::Gt, value: json!(10) }.matches(&r));
        assert!(Predicate::Compare { field: "tags".into(), op: Operator::Eq, value: json!("db") }.matches(&r));
        assert!(Predicate::Compare { field: "id".into(), op: Operator::Eq, value: json!(4) }.matches(&r));
        assert!(Predicate::InSet { field: "views".into(), values: vec![json!(1), json!(10)], negate: false }
            .matches(&r));
        assert!(Predicate::Matches { field: "title".into(), pattern: like_to_regex("world").unwrap(), negate: false }
            .matches(&r));
        assert!(Predicate::always().matches(&r));
        assert!(!Predicate::Any(vec![]).matches(&r));
    }

    #[test]
    fn test_like_patterns() {
        let re = like_to_regex("he_lo%").unwrap();
        assert!(re.is_match("Hello there"));
        assert!(!re.is_match("ahello"));
        assert!(like_to_regex("a.b").unwrap().is_match("xa.by"));
        assert!(!like_to_regex("a.b").unwrap().is_match("axb"));
    }
}
