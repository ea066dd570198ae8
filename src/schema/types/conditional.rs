//! Conditional logic: decides which fields of a record are active.
//!
//! Expressions are trees of `{"$some": [...]}` (OR), `{"$every": [...]}` (AND)
//! and leaves `{"field": expected}` compared by value equality against the
//! in-progress record. A leaf that points at an inactive field is false, so
//! fields are evaluated in dependency order.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::convert::TryFrom;

use super::errors::SchemaError;

const SOME: &str = "$some";
const EVERY: &str = "$every";

/// A conditional-logic expression.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Value", into = "Value")]
pub enum ConditionExpr {
    /// `$some`: true if any child is true; empty is false
    Any(Vec<ConditionExpr>),
    /// `$every`: true if all children are true; empty is true
    All(Vec<ConditionExpr>),
    /// `{field: expected}`
    Equals { field: String, expected: Value },
}

impl ConditionExpr {
    pub fn equals(field: impl Into<String>, expected: impl Into<Value>) -> Self {
        Self::Equals {
            field: field.into(),
            expected: expected.into(),
        }
    }

    pub fn any(children: Vec<ConditionExpr>) -> Self {
        Self::Any(children)
    }

    pub fn all(children: Vec<ConditionExpr>) -> Self {
        Self::All(children)
    }

    /// Sibling fields this expression reads.
    pub fn referenced_fields(&self) -> BTreeSet<&str> {
        let mut fields = BTreeSet::new();
        self.collect_fields(&mut fields);
        fields
    }

    fn collect_fields<'a>(&'a self, out: &mut BTreeSet<&'a str>) {
        match self {
            Self::Any(children) | Self::All(children) => {
                for child in children {
                    child.collect_fields(out);
                }
            }
            Self::Equals { field, .. } => {
                out.insert(field.as_str());
            }
        }
    }

    /// Evaluate against in-progress values, ignoring inactive fields.
    pub fn evaluate(&self, values: &Map<String, Value>, active: &BTreeSet<String>) -> bool {
        match self {
            Self::Any(children) => children.iter().any(|c| c.evaluate(values, active)),
            Self::All(children) => children.iter().all(|c| c.evaluate(values, active)),
            Self::Equals { field, expected } => {
                if !active.contains(field) {
                    return false;
                }
                let actual = values.get(field).unwrap_or(&Value::Null);
                loosely_equal(actual, expected)
            }
        }
    }
}

/// Value equality where `5` and `5.0` are the same number.
fn loosely_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        _ => a == b,
    }
}

impl TryFrom<Value> for ConditionExpr {
    type Error = String;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        let Value::Object(map) = value else {
            return Err("condition must be an object".to_string());
        };

        if map.len() == 1 {
            if let Some((key, inner)) = map.iter().next() {
                if key == SOME || key == EVERY {
                    let Value::Array(items) = inner else {
                        return Err(format!("{} expects a list of conditions", key));
                    };
                    let children = items
                        .iter()
                        .cloned()
                        .map(ConditionExpr::try_from)
                        .collect::<Result<Vec<_>, _>>()?;
                    return Ok(if key == SOME { Self::Any(children) } else { Self::All(children) });
                }
            }
        }

        let mut leaves = Vec::with_capacity(map.len());
        for (field, expected) in map {
            if field.starts_with('$') {
                return Err(format!("unknown operator '{}'", field));
            }
            leaves.push(Self::Equals { field, expected });
        }
        if leaves.len() == 1 {
            Ok(leaves.remove(0))
        } else {
            Ok(Self::All(leaves))
        }
    }
}

impl From<ConditionExpr> for Value {
    fn from(expr: ConditionExpr) -> Self {
        let mut map = Map::new();
        match expr {
            ConditionExpr::Any(children) => {
                map.insert(SOME.to_string(), Value::Array(children.into_iter().map(Value::from).collect()));
            }
            ConditionExpr::All(children) => {
                map.insert(EVERY.to_string(), Value::Array(children.into_iter().map(Value::from).collect()));
            }
            ConditionExpr::Equals { field, expected } => {
                map.insert(field, expected);
            }
        }
        Value::Object(map)
    }
}

/// Fields of one collection in dependency order, with their conditions.
///
/// Built once at schema load; evaluation is then a single pass.
#[derive(Debug, Clone, Default)]
pub struct ConditionGraph {
    order: Vec<String>,
    conditions: BTreeMap<String, ConditionExpr>,
}

impl ConditionGraph {
    /// Check references and order fields so dependencies come first.
    ///
    /// `fields` is in declaration order, which breaks ties between
    /// independent fields.
    pub fn build(
        collection: &str,
        fields: &[String],
        conditions: &BTreeMap<String, ConditionExpr>,
    ) -> Result<Self, Vec<SchemaError>> {
        let mut errors = Vec::new();
        let known: BTreeSet<&str> = fields.iter().map(String::as_str).collect();

        for (field, expr) in conditions {
            if !known.contains(field.as_str()) {
                errors.push(SchemaError::InvalidCondition {
                    collection: collection.to_string(),
                    field: field.clone(),
                    reason: "conditional logic is declared for an unknown field".to_string(),
                });
            }
            for dep in expr.referenced_fields() {
                if !known.contains(dep) {
                    errors.push(SchemaError::InvalidCondition {
                        collection: collection.to_string(),
                        field: field.clone(),
                        reason: format!("references '{}', which is not a field of this collection", dep),
                    });
                }
            }
        }
        if !errors.is_empty() {
            return Err(errors);
        }

        // Kahn's algorithm, always picking the earliest declared ready field.
        let mut pending: Vec<&String> = fields.iter().collect();
        let mut order = Vec::with_capacity(fields.len());
        let mut placed: BTreeSet<&str> = BTreeSet::new();
        while !pending.is_empty() {
            let ready = pending.iter().position(|field| {
                conditions.get(*field).map_or(true, |expr| {
                    expr.referenced_fields().iter().all(|dep| placed.contains(dep))
                })
            });
            match ready {
                Some(index) => {
                    let field = pending.remove(index);
                    placed.insert(field.as_str());
                    order.push(field.clone());
                }
                None => {
                    return Err(vec![SchemaError::ConditionCycle {
                        collection: collection.to_string(),
                        fields: pending.into_iter().cloned().collect(),
                    }]);
                }
            }
        }

        Ok(Self {
            order,
            conditions: conditions.clone(),
        })
    }

    /// Fields in evaluation order
    pub fn order(&self) -> &[String] {
        &self.order
    }

    pub fn condition(&self, field: &str) -> Option<&ConditionExpr> {
        self.conditions.get(field)
    }

    /// Fields whose condition holds, given in-progress values.
    ///
    /// Fields without a condition are always active.
    pub fn evaluate(&self, values: &Map<String, Value>) -> BTreeSet<String> {
        let mut active = BTreeSet::new();
        for field in &self.order {
            let is_active = match self.conditions.get(field) {
                Some(expr) => expr.evaluate(values, &active),
                None => true,
            };
            if is_active {
                active.insert(field.clone());
            }
        }
        active
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fields(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn values(v: Value) -> Map<String, Value> {
        v.as_object().cloned().unwrap()
    }

    #[test]
    fn test_parses_nested_expressions() {
        let expr: ConditionExpr =
            serde_json::from_value(json!({"$some": [{"bar": "bar"}, {"$every": [{"a": 1}, {"b": true}]}]})).unwrap();
        assert_eq!(
            expr,
            ConditionExpr::any(vec![
                ConditionExpr::equals("bar", "bar"),
                ConditionExpr::all(vec![ConditionExpr::equals("a", 1), ConditionExpr::equals("b", true)]),
            ])
        );
        assert_eq!(serde_json::to_value(&expr).unwrap()["$some"][0], json!({"bar": "bar"}));
    }

    #[test]
    fn test_rejects_unknown_operator() {
        assert!(serde_json::from_value::<ConditionExpr>(json!({"$none": []})).is_err());
        assert!(serde_json::from_value::<ConditionExpr>(json!([1])).is_err());
    }

    #[test]
    fn test_some_over_sibling_values() {
        let mut conditions = BTreeMap::new();
        conditions.insert(
            "foo".to_string(),
            ConditionExpr::any(vec![ConditionExpr::equals("bar", "bar"), ConditionExpr::equals("bar", "baz")]),
        );
        let graph = ConditionGraph::build("c", &fields(&["foo", "bar"]), &conditions).unwrap();

        assert!(graph.evaluate(&values(json!({"bar": "bar"}))).contains("foo"));
        assert!(!graph.evaluate(&values(json!({"bar": "qux"}))).contains("foo"));
    }

    #[test]
    fn test_empty_groups() {
        let active = BTreeSet::new();
        let empty = Map::new();
        assert!(!ConditionExpr::any(vec![]).evaluate(&empty, &active));
        assert!(ConditionExpr::all(vec![]).evaluate(&empty, &active));
    }

    #[test]
    fn test_inactive_dependency_deactivates_dependent() {
        let mut conditions = BTreeMap::new();
        conditions.insert("b".to_string(), ConditionExpr::equals("a", true));
        conditions.insert("c".to_string(), ConditionExpr::equals("b", "x"));
        // Declared in reverse to prove dependency order wins over declaration order.
        let graph = ConditionGraph::build("c", &fields(&["c", "b", "a"]), &conditions).unwrap();
        assert_eq!(graph.order(), &fields(&["a", "b", "c"])[..]);

        let active = graph.evaluate(&values(json!({"a": true, "b": "x"})));
        assert!(active.contains("c"));

        let active = graph.evaluate(&values(json!({"a": false, "b": "x"})));
        assert!(!active.contains("b"));
        assert!(!active.contains("c"));
    }

    #[test]
    fn test_detects_cycles() {
        let mut conditions = BTreeMap::new();
        conditions.insert("a".to_string(), ConditionExpr::equals("b", 1));
        conditions.insert("b".to_string(), ConditionExpr::equals("a", 1));
        let errors = ConditionGraph::build("c", &fields(&["a", "b", "z"]), &conditions).unwrap_err();
        assert!(matches!(&errors[0], SchemaError::ConditionCycle { fields, .. } if fields == &fields_vec(&["a", "b"])));
    }

    fn fields_vec(names: &[&str]) -> Vec<String> {
        fields(names)
    }

    #[test]
    fn test_rejects_unknown_references() {
        let mut conditions = BTreeMap::new();
        conditions.insert("a".to_string(), ConditionExpr::equals("missing", 1));
        let errors = ConditionGraph::build("c", &fields(&["a"]), &conditions).unwrap_err();
        assert!(matches!(&errors[0], SchemaError::InvalidCondition { field, .. } if field == "a"));
    }
}
