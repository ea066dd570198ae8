//! Field value validation
//!
//! Rules run in a fixed order per field: presence, type coercion, declared
//! constraints, then custom validators. The first failing rule stops that
//! field; callers validating a whole record keep going with the other fields.

use chrono::DateTime;
use serde_json::{Map, Value};
use std::collections::HashSet;

use super::common::{json_number, FieldContext, FieldDefinition};
use super::variant::FieldKind;
use crate::error::{FieldViolation, ViolationKind};

type RuleResult<T> = Result<T, (ViolationKind, String)>;

/// Validate and normalize one raw value, enforcing `required`.
pub fn validate(
    def: &FieldDefinition,
    raw: &Value,
    ctx: &FieldContext<'_>,
) -> Result<Value, FieldViolation> {
    validate_value(def, raw, ctx, def.required)
}

/// Validate and normalize one raw value.
///
/// `enforce_required` is false for fields switched off by conditional logic;
/// their non-blank values are still checked so stored data stays valid.
pub fn validate_value(
    def: &FieldDefinition,
    raw: &Value,
    ctx: &FieldContext<'_>,
    enforce_required: bool,
) -> Result<Value, FieldViolation> {
    let violation = |(kind, message): (ViolationKind, String)| FieldViolation::new(ctx.field, kind, message);

    if is_blank(&def.kind, raw) {
        if enforce_required {
            return Err(violation((ViolationKind::Required, "value is required".to_string())));
        }
        return Ok(blank_value(&def.kind));
    }

    let coerced = coerce(&def.kind, raw)
        .map_err(|message| violation((ViolationKind::Type, message)))?;
    let normalized = check_constraints(&def.kind, coerced).map_err(violation)?;

    for validator in &def.validators {
        validator
            .validate(&normalized, ctx)
            .map_err(|message| violation((ViolationKind::Custom, message)))?;
    }

    Ok(normalized)
}

/// Whether `raw` counts as "no value" for presence checks.
pub fn is_blank(kind: &FieldKind, raw: &Value) -> bool {
    match raw {
        Value::Null => true,
        Value::String(s) => match kind {
            FieldKind::Text { trim: true, .. } => s.trim().is_empty(),
            _ => s.is_empty(),
        },
        Value::Array(items) => items.is_empty(),
        _ => false,
    }
}

fn blank_value(kind: &FieldKind) -> Value {
    match kind {
        FieldKind::Text { .. } | FieldKind::Editor { .. } => Value::String(String::new()),
        FieldKind::Chips { .. } | FieldKind::Records { .. } => Value::Array(Vec::new()),
        _ => Value::Null,
    }
}

/// Convert a raw value into the representation stored for `kind`.
///
/// Also used by the query compiler to normalize filter literals.
pub fn coerce(kind: &FieldKind, raw: &Value) -> Result<Value, String> {
    match kind {
        FieldKind::Text { .. } | FieldKind::Editor { .. } | FieldKind::Select { .. } => {
            coerce_string(raw).map(Value::String)
        }
        FieldKind::Number { .. } | FieldKind::Slider { .. } => coerce_f64(raw).map(json_number),
        FieldKind::Switch => coerce_bool(raw).map(Value::Bool),
        FieldKind::Chips { .. } => coerce_array(raw)?
            .iter()
            .map(|item| coerce_string(item).map(Value::String))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        FieldKind::Range { .. } => {
            let items = coerce_array(raw)?;
            if items.len() != 2 {
                return Err("expected a [min, max] pair".to_string());
            }
            let lo = coerce_f64(&items[0])?;
            let hi = coerce_f64(&items[1])?;
            Ok(Value::Array(vec![json_number(lo), json_number(hi)]))
        }
        FieldKind::File | FieldKind::Record { .. } => coerce_id(raw).map(Value::from),
        FieldKind::Records { .. } => coerce_array(raw)?
            .iter()
            .map(|item| coerce_id(item).map(Value::from))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        FieldKind::Size { .. } => {
            let obj = raw
                .as_object()
                .ok_or_else(|| "expected an object with width and height".to_string())?;
            let side = |name: &str| {
                obj.get(name)
                    .ok_or_else(|| format!("missing {}", name))
                    .and_then(coerce_f64)
            };
            let mut size = Map::new();
            size.insert("width".to_string(), json_number(side("width")?));
            size.insert("height".to_string(), json_number(side("height")?));
            Ok(Value::Object(size))
        }
        FieldKind::DateTime { .. } => coerce_timestamp(raw).map(Value::from),
    }
}

fn coerce_string(raw: &Value) -> Result<String, String> {
    match raw {
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        Value::Bool(b) => Ok(b.to_string()),
        other => Err(format!("expected text, got {}", type_of(other))),
    }
}

fn coerce_f64(raw: &Value) -> Result<f64, String> {
    let value = match raw {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    match value {
        Some(v) if v.is_finite() => Ok(v),
        _ => Err(format!("expected a number, got {}", type_of(raw))),
    }
}

fn coerce_bool(raw: &Value) -> Result<bool, String> {
    match raw {
        Value::Bool(b) => Ok(*b),
        Value::String(s) if s == "true" => Ok(true),
        Value::String(s) if s == "false" => Ok(false),
        Value::Number(n) if n.as_u64() == Some(1) => Ok(true),
        Value::Number(n) if n.as_u64() == Some(0) => Ok(false),
        other => Err(format!("expected a boolean, got {}", type_of(other))),
    }
}

fn coerce_id(raw: &Value) -> Result<u64, String> {
    let id = match raw {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse::<u64>().ok(),
        _ => None,
    };
    match id {
        Some(id) if id > 0 => Ok(id),
        _ => Err(format!("expected a record id, got {}", type_of(raw))),
    }
}

fn coerce_timestamp(raw: &Value) -> Result<i64, String> {
    match raw {
        Value::Number(n) => n
            .as_i64()
            .ok_or_else(|| "expected epoch milliseconds".to_string()),
        Value::String(s) => {
            if let Ok(ms) = s.trim().parse::<i64>() {
                return Ok(ms);
            }
            DateTime::parse_from_rfc3339(s.trim())
                .map(|dt| dt.timestamp_millis())
                .map_err(|e| format!("invalid date-time '{}': {}", s, e))
        }
        other => Err(format!("expected a date-time, got {}", type_of(other))),
    }
}

fn coerce_array(raw: &Value) -> Result<&Vec<Value>, String> {
    raw.as_array()
        .ok_or_else(|| format!("expected a list, got {}", type_of(raw)))
}

fn type_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "text",
        Value::Array(_) => "list",
        Value::Object(_) => "object",
    }
}

/// Round half away from zero to `decimals` digits.
pub fn round_to(value: f64, decimals: u32) -> f64 {
    let factor = 10f64.powi(decimals as i32);
    (value * factor).round() / factor
}

fn check_bounds(value: f64, min: Option<f64>, max: Option<f64>) -> RuleResult<()> {
    if let Some(min) = min {
        if value < min {
            return Err((ViolationKind::Range, format!("must be at least {}", min)));
        }
    }
    if let Some(max) = max {
        if value > max {
            return Err((ViolationKind::Range, format!("must be at most {}", max)));
        }
    }
    Ok(())
}

fn check_membership(value: &str, choices: &[String]) -> RuleResult<()> {
    if choices.iter().any(|c| c == value) {
        Ok(())
    } else {
        Err((ViolationKind::Membership, format!("'{}' is not an allowed choice", value)))
    }
}

fn check_constraints(kind: &FieldKind, value: Value) -> RuleResult<Value> {
    match kind {
        FieldKind::Text { min_length, max_length, trim } => {
            let text = value.as_str().unwrap_or_default();
            let text = if *trim { text.trim() } else { text };
            let len = text.chars().count();
            if let Some(min) = min_length {
                if len < *min {
                    return Err((ViolationKind::Length, format!("must be at least {} characters", min)));
                }
            }
            if let Some(max) = max_length {
                if len > *max {
                    return Err((ViolationKind::Length, format!("must be at most {} characters", max)));
                }
            }
            Ok(Value::String(text.to_string()))
        }
        FieldKind::Number { min, max, decimals } => {
            let mut number = value.as_f64().unwrap_or_default();
            if let Some(decimals) = decimals {
                number = round_to(number, *decimals);
            }
            check_bounds(number, *min, *max)?;
            Ok(json_number(number))
        }
        FieldKind::Slider { min, max, step } => {
            let number = value.as_f64().unwrap_or_default();
            check_bounds(number, Some(*min), Some(*max))?;
            let steps = (number - min) / step;
            if (steps - steps.round()).abs() > 1e-9 {
                return Err((ViolationKind::Range, format!("must be a multiple of {} from {}", step, min)));
            }
            Ok(json_number(number))
        }
        FieldKind::Switch | FieldKind::File | FieldKind::Record { .. } => Ok(value),
        FieldKind::Select { choices } => {
            check_membership(value.as_str().unwrap_or_default(), choices)?;
            Ok(value)
        }
        FieldKind::Chips { choices, min_items, max_items } => {
            let items = value.as_array().cloned().unwrap_or_default();
            let mut seen = HashSet::new();
            for item in &items {
                let key = item.as_str().unwrap_or_default();
                if let Some(choices) = choices {
                    check_membership(key, choices)?;
                }
                if !seen.insert(key.to_string()) {
                    return Err((ViolationKind::Membership, format!("'{}' is listed more than once", key)));
                }
            }
            check_item_count(items.len(), *min_items, *max_items)?;
            Ok(Value::Array(items))
        }
        FieldKind::Range { min, max, decimals } => {
            let mut bounds = [0.0f64; 2];
            if let Some(items) = value.as_array() {
                for (slot, item) in bounds.iter_mut().zip(items) {
                    let n = item.as_f64().unwrap_or_default();
                    *slot = decimals.map_or(n, |d| round_to(n, d));
                }
            }
            let [lo, hi] = bounds;
            if lo > hi {
                return Err((ViolationKind::Range, "lower bound exceeds upper bound".to_string()));
            }
            check_bounds(lo, *min, *max)?;
            check_bounds(hi, *min, *max)?;
            Ok(Value::Array(vec![json_number(lo), json_number(hi)]))
        }
        FieldKind::Records { max_items, .. } => {
            let items = value.as_array().cloned().unwrap_or_default();
            let mut seen = HashSet::new();
            for item in &items {
                if !seen.insert(item.as_u64()) {
                    return Err((ViolationKind::Membership, format!("record {} is listed more than once", item)));
                }
            }
            check_item_count(items.len(), None, *max_items)?;
            Ok(Value::Array(items))
        }
        FieldKind::Editor { max_bytes } => {
            let len = value.as_str().map(str::len).unwrap_or_default();
            if let Some(max) = max_bytes {
                if len > *max {
                    return Err((ViolationKind::Size, format!("must be at most {} bytes", max)));
                }
            }
            Ok(value)
        }
        FieldKind::Size { min, max } => {
            for side in ["width", "height"] {
                let n = value.get(side).and_then(Value::as_f64).unwrap_or_default();
                check_bounds(n, *min, *max).map_err(|(kind, msg)| (kind, format!("{} {}", side, msg)))?;
            }
            Ok(value)
        }
        FieldKind::DateTime { min, max } => {
            let ms = value.as_i64().unwrap_or_default();
            if min.is_some_and(|m| ms < m) || max.is_some_and(|m| ms > m) {
                return Err((ViolationKind::Range, "date-time is outside the allowed range".to_string()));
            }
            Ok(value)
        }
    }
}

fn check_item_count(count: usize, min: Option<usize>, max: Option<usize>) -> RuleResult<()> {
    if min.is_some_and(|m| count < m) {
        return Err((ViolationKind::Length, format!("must contain at least {} items", min.unwrap_or_default())));
    }
    if max.is_some_and(|m| count > m) {
        return Err((ViolationKind::Length, format!("must contain at most {} items", max.unwrap_or_default())));
    }
    Ok(())
}
