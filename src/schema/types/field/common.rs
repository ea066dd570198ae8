use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;

use super::variant::FieldKind;
use crate::context::UserContext;

/// What a validator, default or population transform may look at.
#[derive(Debug, Clone, Copy)]
pub struct FieldContext<'a> {
    pub collection: &'a str,
    pub field: &'a str,
    /// In-progress values of the whole record
    pub record: &'a Map<String, Value>,
    pub user: Option<&'a UserContext>,
    pub language: Option<&'a str>,
}

/// Extra validation run after the built-in rules of a field type pass.
pub trait FieldValidator: Send + Sync {
    /// Returns a message describing the violation, if any.
    fn validate(&self, value: &Value, ctx: &FieldContext<'_>) -> Result<(), String>;
}

impl<F> FieldValidator for F
where
    F: Fn(&Value, &FieldContext<'_>) -> Result<(), String> + Send + Sync,
{
    fn validate(&self, value: &Value, ctx: &FieldContext<'_>) -> Result<(), String> {
        self(value, ctx)
    }
}

/// Rewrites a stored value when it is populated for output.
pub trait PopulateTransform: Send + Sync {
    fn transform(&self, value: Value, ctx: &FieldContext<'_>) -> Value;
}

impl<F> PopulateTransform for F
where
    F: Fn(Value, &FieldContext<'_>) -> Value + Send + Sync,
{
    fn transform(&self, value: Value, ctx: &FieldContext<'_>) -> Value {
        self(value, ctx)
    }
}

/// Default computed per record at creation time.
pub type DynamicDefault = Arc<dyn Fn(&FieldContext<'_>) -> Value + Send + Sync>;

/// A typed attribute of a collection.
///
/// The serializable part comes from schema definitions; closures (dynamic
/// defaults, custom validators, population transforms) are attached in code.
#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldDefinition {
    #[serde(flatten)]
    pub kind: FieldKind,
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    #[serde(default = "default_translatable")]
    pub translatable: bool,
    #[serde(default)]
    pub immutable: bool,
    #[serde(skip)]
    pub(crate) dynamic_default: Option<DynamicDefault>,
    #[serde(skip)]
    pub(crate) validators: Vec<Arc<dyn FieldValidator>>,
    #[serde(skip)]
    pub(crate) transform: Option<Arc<dyn PopulateTransform>>,
}

fn default_translatable() -> bool {
    true
}

impl fmt::Debug for FieldDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldDefinition")
            .field("kind", &self.kind)
            .field("required", &self.required)
            .field("default", &self.default)
            .field("translatable", &self.translatable)
            .field("immutable", &self.immutable)
            .field("dynamic_default", &self.dynamic_default.is_some())
            .field("validators", &self.validators.len())
            .field("transform", &self.transform.is_some())
            .finish()
    }
}

impl FieldDefinition {
    pub fn new(kind: FieldKind) -> Self {
        Self {
            kind,
            required: false,
            default: None,
            translatable: true,
            immutable: false,
            dynamic_default: None,
            validators: Vec::new(),
            transform: None,
        }
    }

    pub fn text() -> Self {
        Self::new(FieldKind::Text { min_length: None, max_length: None, trim: true })
    }

    pub fn number(min: Option<f64>, max: Option<f64>) -> Self {
        Self::new(FieldKind::Number { min, max, decimals: None })
    }

    pub fn switch() -> Self {
        Self::new(FieldKind::Switch)
    }

    pub fn select<I, S>(choices: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(FieldKind::Select { choices: choices.into_iter().map(Into::into).collect() })
    }

    pub fn chips() -> Self {
        Self::new(FieldKind::Chips { choices: None, min_items: None, max_items: None })
    }

    pub fn slider(min: f64, max: f64, step: f64) -> Self {
        Self::new(FieldKind::Slider { min, max, step })
    }

    pub fn file() -> Self {
        Self::new(FieldKind::File)
    }

    pub fn record(collection: impl Into<String>) -> Self {
        Self::new(FieldKind::Record { collection: collection.into() })
    }

    pub fn records(collection: impl Into<String>) -> Self {
        Self::new(FieldKind::Records { collection: collection.into(), max_items: None })
    }

    pub fn editor() -> Self {
        Self::new(FieldKind::Editor { max_bytes: None })
    }

    pub fn date_time() -> Self {
        Self::new(FieldKind::DateTime { min: None, max: None })
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn immutable(mut self) -> Self {
        self.immutable = true;
        self
    }

    pub fn not_translatable(mut self) -> Self {
        self.translatable = false;
        self
    }

    pub fn with_default(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }

    pub fn with_dynamic_default<F>(mut self, f: F) -> Self
    where
        F: Fn(&FieldContext<'_>) -> Value + Send + Sync + 'static,
    {
        self.dynamic_default = Some(Arc::new(f));
        self
    }

    pub fn with_validator<V>(mut self, validator: V) -> Self
    where
        V: FieldValidator + 'static,
    {
        self.validators.push(Arc::new(validator));
        self
    }

    pub fn with_transform<T>(mut self, transform: T) -> Self
    where
        T: PopulateTransform + 'static,
    {
        self.transform = Some(Arc::new(transform));
        self
    }

    pub fn has_transform(&self) -> bool {
        self.transform.is_some()
    }

    /// Resolve the value a new record starts with.
    ///
    /// Evaluated for every record; nothing is cached between calls.
    pub fn resolve_default(&self, ctx: &FieldContext<'_>) -> Value {
        if let Some(dynamic) = &self.dynamic_default {
            return dynamic(ctx);
        }
        if let Some(value) = &self.default {
            return value.clone();
        }
        self.natural_default()
    }

    /// Type-specific default used when none is declared
    fn natural_default(&self) -> Value {
        match &self.kind {
            FieldKind::Text { .. } | FieldKind::Editor { .. } => Value::String(String::new()),
            FieldKind::Number { min, .. } => json_number(min.unwrap_or(0.0).max(0.0)),
            FieldKind::Slider { min, .. } => json_number(*min),
            FieldKind::Switch => Value::Bool(false),
            FieldKind::Chips { .. } | FieldKind::Records { .. } => Value::Array(Vec::new()),
            FieldKind::Range { min, .. } => {
                let lo = json_number(min.unwrap_or(0.0));
                Value::Array(vec![lo.clone(), lo])
            }
            FieldKind::Size { min, .. } => {
                let side = json_number(min.unwrap_or(0.0).max(0.0));
                serde_json::json!({ "width": side.clone(), "height": side })
            }
            FieldKind::Select { .. }
            | FieldKind::File
            | FieldKind::Record { .. }
            | FieldKind::DateTime { .. } => Value::Null,
        }
    }
}

/// Integral numbers are stored as JSON integers so equality against
/// integer literals holds.
pub fn json_number(value: f64) -> Value {
    if value.fract() == 0.0 && value.abs() < 9.0e15 {
        Value::from(value as i64)
    } else {
        serde_json::Number::from_f64(value)
            .map(Value::Number)
            .unwrap_or(Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ctx<'a>(record: &'a Map<String, Value>) -> FieldContext<'a> {
        FieldContext {
            collection: "posts",
            field: "f",
            record,
            user: None,
            language: None,
        }
    }

    #[test]
    fn test_defaults_resolve_lazily() {
        let counter = Arc::new(std::sync::atomic::AtomicU64::new(0));
        let c = Arc::clone(&counter);
        let field = FieldDefinition::number(None, None).with_dynamic_default(move |_| {
            json!(c.fetch_add(1, std::sync::atomic::Ordering::SeqCst))
        });
        let record = Map::new();

        assert_eq!(field.resolve_default(&ctx(&record)), json!(0));
        assert_eq!(field.resolve_default(&ctx(&record)), json!(1));
    }

    #[test]
    fn test_natural_defaults() {
        let record = Map::new();
        assert_eq!(FieldDefinition::text().resolve_default(&ctx(&record)), json!(""));
        assert_eq!(FieldDefinition::switch().resolve_default(&ctx(&record)), json!(false));
        assert_eq!(FieldDefinition::number(Some(3.0), None).resolve_default(&ctx(&record)), json!(3));
        assert_eq!(FieldDefinition::record("users").resolve_default(&ctx(&record)), Value::Null);
        assert_eq!(
            FieldDefinition::text().with_default("draft").resolve_default(&ctx(&record)),
            json!("draft")
        );
    }

    #[test]
    fn test_definition_from_json() {
        let field: FieldDefinition =
            serde_json::from_value(json!({"type": "select", "choices": ["a", "b"], "required": true}))
                .unwrap();
        assert!(field.required);
        assert!(field.translatable);
        assert_eq!(field.kind, FieldKind::Select { choices: vec!["a".into(), "b".into()] });
    }

    #[test]
    fn test_json_number_prefers_integers() {
        assert_eq!(json_number(5.0), json!(5));
        assert_eq!(json_number(2.5), json!(2.5));
    }
}
