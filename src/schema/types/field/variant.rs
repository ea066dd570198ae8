use serde::{Deserialize, Serialize};

/// Closed set of field types.
///
/// Each variant carries its own constraints; validation, default resolution
/// and population dispatch on the variant. New field types are added here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum FieldKind {
    /// Plain text
    Text {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        min_length: Option<usize>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max_length: Option<usize>,
        #[serde(default = "default_true")]
        trim: bool,
    },
    /// Number rounded to `decimals` digits
    Number {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        min: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        decimals: Option<u32>,
    },
    /// Boolean toggle
    Switch,
    /// One key out of `choices`
    Select { choices: Vec<String> },
    /// Any number of distinct keys, optionally restricted to `choices`
    Chips {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        choices: Option<Vec<String>>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        min_items: Option<usize>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max_items: Option<usize>,
    },
    /// `[lo, hi]` pair of numbers
    Range {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        min: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        decimals: Option<u32>,
    },
    /// Number on a `min + k * step` grid
    Slider {
        #[serde(default)]
        min: f64,
        #[serde(default = "default_slider_max")]
        max: f64,
        #[serde(default = "default_slider_step")]
        step: f64,
    },
    /// Reference to an uploaded file, resolved on population
    File,
    /// Reference to one record of `collection`
    Record { collection: String },
    /// References to several records of `collection`
    Records {
        collection: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max_items: Option<usize>,
    },
    /// Rich text markup
    Editor {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max_bytes: Option<usize>,
    },
    /// `{ width, height }` composite
    Size {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        min: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max: Option<f64>,
    },
    /// Point in time, stored as epoch milliseconds
    DateTime {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        min: Option<i64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max: Option<i64>,
    },
}

fn default_true() -> bool {
    true
}

fn default_slider_max() -> f64 {
    100.0
}

fn default_slider_step() -> f64 {
    1.0
}

impl FieldKind {
    /// Short type tag as used in definitions
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Text { .. } => "text",
            Self::Number { .. } => "number",
            Self::Switch => "switch",
            Self::Select { .. } => "select",
            Self::Chips { .. } => "chips",
            Self::Range { .. } => "range",
            Self::Slider { .. } => "slider",
            Self::File => "file",
            Self::Record { .. } => "record",
            Self::Records { .. } => "records",
            Self::Editor { .. } => "editor",
            Self::Size { .. } => "size",
            Self::DateTime { .. } => "dateTime",
        }
    }

    /// Target collection for relation fields
    pub fn relation_target(&self) -> Option<&str> {
        match self {
            Self::Record { collection } | Self::Records { collection, .. } => Some(collection),
            _ => None,
        }
    }

    pub fn is_relation(&self) -> bool {
        self.relation_target().is_some()
    }

    /// Fields whose stored identifier can be expanded on population
    pub fn is_populatable(&self) -> bool {
        self.is_relation() || matches!(self, Self::File)
    }

    /// Fields that store arrays
    pub fn is_multi_valued(&self) -> bool {
        matches!(self, Self::Chips { .. } | Self::Records { .. } | Self::Range { .. })
    }

    /// Static sanity checks on the declared constraints
    pub fn check_constraints(&self) -> Result<(), String> {
        fn ordered<T: PartialOrd + std::fmt::Display>(
            min: Option<T>,
            max: Option<T>,
        ) -> Result<(), String> {
            match (min, max) {
                (Some(lo), Some(hi)) if lo > hi => Err(format!("min {} is greater than max {}", lo, hi)),
                _ => Ok(()),
            }
        }

        match self {
            Self::Text { min_length, max_length, .. } => ordered(*min_length, *max_length),
            Self::Number { min, max, .. } | Self::Range { min, max, .. } | Self::Size { min, max } => {
                ordered(*min, *max)
            }
            Self::Slider { min, max, step } => {
                if !(*step > 0.0) {
                    return Err("slider step must be greater than zero".to_string());
                }
                ordered(Some(*min), Some(*max))
            }
            Self::Select { choices } => check_choices(choices),
            Self::Chips { choices, min_items, max_items } => {
                if let Some(choices) = choices {
                    check_choices(choices)?;
                }
                ordered(*min_items, *max_items)
            }
            Self::DateTime { min, max } => ordered(*min, *max),
            Self::Record { collection } | Self::Records { collection, .. } if collection.is_empty() => {
                Err("relation target collection must not be empty".to_string())
            }
            _ => Ok(()),
        }
    }
}

fn check_choices(choices: &[String]) -> Result<(), String> {
    if choices.is_empty() {
        return Err("choices must not be empty".to_string());
    }
    let mut seen = std::collections::HashSet::new();
    for choice in choices {
        if !seen.insert(choice.as_str()) {
            return Err(format!("duplicate choice '{}'", choice));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserializes_tagged_kinds() {
        let kind: FieldKind =
            serde_json::from_str(r#"{"type":"number","min":0,"max":10,"decimals":2}"#).unwrap();
        assert_eq!(
            kind,
            FieldKind::Number { min: Some(0.0), max: Some(10.0), decimals: Some(2) }
        );

        let kind: FieldKind = serde_json::from_str(r#"{"type":"text","maxLength":20}"#).unwrap();
        assert_eq!(kind, FieldKind::Text { min_length: None, max_length: Some(20), trim: true });

        let kind: FieldKind = serde_json::from_str(r#"{"type":"dateTime"}"#).unwrap();
        assert_eq!(kind, FieldKind::DateTime { min: None, max: None });
    }

    #[test]
    fn test_constraint_checks() {
        assert!(FieldKind::Number { min: Some(5.0), max: Some(1.0), decimals: None }
            .check_constraints()
            .is_err());
        assert!(FieldKind::Select { choices: vec!["a".into(), "a".into()] }
            .check_constraints()
            .is_err());
        assert!(FieldKind::Slider { min: 0.0, max: 1.0, step: 0.0 }.check_constraints().is_err());
        assert!(FieldKind::Switch.check_constraints().is_ok());
    }
}
