use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fmt;

use super::conditional::{ConditionExpr, ConditionGraph};
use super::errors::SchemaError;
use super::field::{is_blank, validate_value, FieldContext, FieldDefinition};
use crate::context::UserContext;
use crate::error::{FieldViolation, ValidationErrors, ViolationKind};

/// Fields every record carries regardless of its collection.
pub const SYSTEM_FIELDS: &[&str] = &[
    "id",
    "createdAt",
    "updatedAt",
    "language",
    "translationOf",
    "createdBy",
    "updatedBy",
];

pub fn is_system_field(name: &str) -> bool {
    SYSTEM_FIELDS.contains(&name)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CollectionMode {
    /// Exactly one logical record, e.g. site settings
    Single,
    #[default]
    Multi,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexDefinition {
    pub fields: Vec<String>,
    #[serde(default)]
    pub unique: bool,
}

/// Field definitions in declaration order.
///
/// Deserializes from a JSON object while keeping key order and repeated keys,
/// so duplicates can be reported at load instead of silently overwritten.
#[derive(Debug, Clone, Default)]
pub struct FieldMap(Vec<(String, FieldDefinition)>);

impl FieldMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, name: impl Into<String>, def: FieldDefinition) {
        self.0.push((name.into(), def));
    }

    pub fn get(&self, name: &str) -> Option<&FieldDefinition> {
        self.0.iter().find(|(n, _)| n == name).map(|(_, def)| def)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FieldDefinition)> {
        self.0.iter().map(|(name, def)| (name.as_str(), def))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(|(name, _)| name.as_str())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Serialize for FieldMap {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (name, def) in &self.0 {
            map.serialize_entry(name, def)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for FieldMap {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct FieldMapVisitor;

        impl<'de> Visitor<'de> for FieldMapVisitor {
            type Value = FieldMap;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a map of field name to field definition")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<FieldMap, A::Error> {
                let mut fields = Vec::with_capacity(access.size_hint().unwrap_or(0));
                while let Some((name, def)) = access.next_entry::<String, FieldDefinition>()? {
                    fields.push((name, def));
                }
                Ok(FieldMap(fields))
            }
        }

        deserializer.deserialize_map(FieldMapVisitor)
    }
}

/// Declarative description of a collection, as written by an operator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionDefinition {
    pub name: String,
    #[serde(default)]
    pub mode: CollectionMode,
    #[serde(default)]
    pub translatable: bool,
    #[serde(default)]
    pub fields: FieldMap,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub indexes: Vec<IndexDefinition>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub synced_fields: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub conditional_logic: BTreeMap<String, ConditionExpr>,
}

impl CollectionDefinition {
    pub fn multi(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            mode: CollectionMode::Multi,
            translatable: false,
            fields: FieldMap::new(),
            indexes: Vec::new(),
            synced_fields: Vec::new(),
            conditional_logic: BTreeMap::new(),
        }
    }

    pub fn single(name: impl Into<String>) -> Self {
        Self {
            mode: CollectionMode::Single,
            ..Self::multi(name)
        }
    }

    pub fn translatable(mut self) -> Self {
        self.translatable = true;
        self
    }

    pub fn field(mut self, name: impl Into<String>, def: FieldDefinition) -> Self {
        self.fields.push(name, def);
        self
    }

    pub fn index<I, S>(mut self, fields: I, unique: bool) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.indexes.push(IndexDefinition {
            fields: fields.into_iter().map(Into::into).collect(),
            unique,
        });
        self
    }

    pub fn synced(mut self, field: impl Into<String>) -> Self {
        self.synced_fields.push(field.into());
        self
    }

    pub fn condition(mut self, field: impl Into<String>, expr: ConditionExpr) -> Self {
        self.conditional_logic.insert(field.into(), expr);
        self
    }
}

/// Which fields of a record a mutation touches.
#[derive(Debug, Clone, Copy)]
pub enum ValidationScope<'a> {
    All,
    Fields(&'a BTreeSet<String>),
}

impl ValidationScope<'_> {
    fn contains(&self, field: &str) -> bool {
        match self {
            Self::All => true,
            Self::Fields(fields) => fields.contains(field),
        }
    }
}

/// A collection that passed load-time checks. Read-only afterwards.
#[derive(Debug, Clone)]
pub struct Collection {
    definition: CollectionDefinition,
    conditions: ConditionGraph,
}

impl Collection {
    /// Check everything that can be checked without the other collections.
    pub(crate) fn from_definition(definition: CollectionDefinition) -> Result<Self, Vec<SchemaError>> {
        let name = definition.name.clone();
        let mut errors = Vec::new();

        if name.is_empty() || name.contains('/') {
            errors.push(SchemaError::Malformed(format!(
                "collection name '{}' must be non-empty and must not contain '/'",
                name
            )));
        }

        let mut seen = HashSet::new();
        for (field, def) in definition.fields.iter() {
            if !seen.insert(field) {
                errors.push(SchemaError::DuplicateField {
                    collection: name.clone(),
                    field: field.to_string(),
                });
                continue;
            }
            if field.is_empty() || is_system_field(field) {
                errors.push(SchemaError::InvalidField {
                    collection: name.clone(),
                    field: field.to_string(),
                    reason: "name is empty or reserved for a system field".to_string(),
                });
            }
            if let Err(reason) = def.kind.check_constraints() {
                errors.push(SchemaError::InvalidField {
                    collection: name.clone(),
                    field: field.to_string(),
                    reason,
                });
            }
        }

        for field in &definition.synced_fields {
            let reason = if !definition.translatable {
                Some("synced fields require a translatable collection")
            } else if definition.fields.get(field).is_none() {
                Some("not a field of this collection")
            } else {
                None
            };
            if let Some(reason) = reason {
                errors.push(SchemaError::InvalidSyncedField {
                    collection: name.clone(),
                    field: field.clone(),
                    reason: reason.to_string(),
                });
            }
        }

        for index in &definition.indexes {
            if index.fields.is_empty() {
                errors.push(SchemaError::InvalidIndex {
                    collection: name.clone(),
                    reason: "an index needs at least one field".to_string(),
                });
            }
            for field in &index.fields {
                if definition.fields.get(field).is_none() {
                    errors.push(SchemaError::InvalidIndex {
                        collection: name.clone(),
                        reason: format!("unknown field '{}'", field),
                    });
                }
            }
        }

        let field_names: Vec<String> = definition.fields.names().map(str::to_string).collect();
        let conditions = match ConditionGraph::build(&name, &field_names, &definition.conditional_logic) {
            Ok(graph) => Some(graph),
            Err(mut graph_errors) => {
                errors.append(&mut graph_errors);
                None
            }
        };

        match conditions {
            Some(conditions) if errors.is_empty() => Ok(Self { definition, conditions }),
            _ => Err(errors),
        }
    }

    pub fn name(&self) -> &str {
        &self.definition.name
    }

    pub fn definition(&self) -> &CollectionDefinition {
        &self.definition
    }

    pub fn mode(&self) -> CollectionMode {
        self.definition.mode
    }

    pub fn is_single(&self) -> bool {
        self.definition.mode == CollectionMode::Single
    }

    pub fn is_translatable(&self) -> bool {
        self.definition.translatable
    }

    pub fn field(&self, name: &str) -> Option<&FieldDefinition> {
        self.definition.fields.get(name)
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, &FieldDefinition)> {
        self.definition.fields.iter()
    }

    /// Data fields and system fields alike
    pub fn has_field(&self, name: &str) -> bool {
        is_system_field(name) || self.field(name).is_some()
    }

    pub fn synced_fields(&self) -> &[String] {
        &self.definition.synced_fields
    }

    pub fn is_synced(&self, field: &str) -> bool {
        self.definition.synced_fields.iter().any(|f| f == field)
    }

    pub fn unique_indexes(&self) -> impl Iterator<Item = &IndexDefinition> {
        self.definition.indexes.iter().filter(|index| index.unique)
    }

    /// Fields active for the given in-progress values.
    pub fn evaluate_conditions(&self, values: &Map<String, Value>) -> BTreeSet<String> {
        self.conditions.evaluate(values)
    }

    /// Fill fields missing from `input` with their defaults.
    ///
    /// Runs in declaration order, so a dynamic default sees the values
    /// (given or defaulted) of the fields declared before it.
    pub fn apply_defaults(
        &self,
        input: &Map<String, Value>,
        user: Option<&UserContext>,
        language: Option<&str>,
    ) -> Map<String, Value> {
        let mut values = input.clone();
        for (name, def) in self.fields() {
            if values.contains_key(name) {
                continue;
            }
            let default = {
                let ctx = FieldContext {
                    collection: self.name(),
                    field: name,
                    record: &values,
                    user,
                    language,
                };
                def.resolve_default(&ctx)
            };
            values.insert(name.to_string(), default);
        }
        values
    }

    /// Validate a full in-progress record and return its normalized values
    /// in declaration order.
    ///
    /// Fields in `scope` go through their whole rule chain; `required` only
    /// applies while conditional logic keeps the field active. Fields outside
    /// `scope` keep their value and only get a presence check, since a change
    /// elsewhere may have switched them on.
    pub fn validate_record(
        &self,
        values: &Map<String, Value>,
        scope: ValidationScope<'_>,
        user: Option<&UserContext>,
        language: Option<&str>,
    ) -> Result<Map<String, Value>, ValidationErrors> {
        let active = self.evaluate_conditions(values);
        let mut errors = ValidationErrors::new();
        let mut normalized = Map::new();

        for (name, def) in self.fields() {
            let raw = values.get(name).unwrap_or(&Value::Null);
            let enforce_required = def.required && active.contains(name);

            if !scope.contains(name) {
                if enforce_required && is_blank(&def.kind, raw) {
                    errors.push(FieldViolation::new(name, ViolationKind::Required, "value is required"));
                }
                normalized.insert(name.to_string(), raw.clone());
                continue;
            }

            let ctx = FieldContext {
                collection: self.name(),
                field: name,
                record: values,
                user,
                language,
            };
            match validate_value(def, raw, &ctx, enforce_required) {
                Ok(value) => {
                    normalized.insert(name.to_string(), value);
                }
                Err(violation) => errors.push(violation),
            }
        }

        errors.into_result(normalized)
    }

    /// Immutable fields whose normalized value differs from the stored one.
    pub fn immutable_violations(
        &self,
        stored: &Map<String, Value>,
        updated: &Map<String, Value>,
    ) -> ValidationErrors {
        let mut errors = ValidationErrors::new();
        for (name, def) in self.fields().filter(|(_, def)| def.immutable) {
            let before = stored.get(name).unwrap_or(&Value::Null);
            let after = updated.get(name).unwrap_or(&Value::Null);
            if before != after && !is_blank(&def.kind, before) {
                errors.push(FieldViolation::new(
                    name,
                    ViolationKind::Immutable,
                    "value cannot be changed once set",
                ));
            }
        }
        errors
    }
}
