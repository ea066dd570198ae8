use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A stored record of some collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Record {
    pub id: u64,
    pub values: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    /// Id of the record this one translates; `None` for the group's
    /// reference record.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub translation_of: Option<u64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_by: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_by: Option<u64>,
}

impl Record {
    pub fn new(id: u64, values: Map<String, Value>) -> Self {
        let now = Utc::now();
        Self {
            id,
            values,
            language: None,
            translation_of: None,
            created_at: now,
            updated_at: now,
            created_by: None,
            updated_by: None,
        }
    }

    /// Id shared by every translation of this record
    pub fn group_id(&self) -> u64 {
        self.translation_of.unwrap_or(self.id)
    }

    /// Value of a data or system field, as used by filters and sorting.
    ///
    /// Timestamps are exposed as epoch milliseconds.
    pub fn get(&self, field: &str) -> Value {
        match field {
            "id" => Value::from(self.id),
            "createdAt" => Value::from(self.created_at.timestamp_millis()),
            "updatedAt" => Value::from(self.updated_at.timestamp_millis()),
            "language" => self.language.clone().map(Value::String).unwrap_or(Value::Null),
            "translationOf" => self.translation_of.map(Value::from).unwrap_or(Value::Null),
            "createdBy" => self.created_by.map(Value::from).unwrap_or(Value::Null),
            "updatedBy" => self.updated_by.map(Value::from).unwrap_or(Value::Null),
            other => self.values.get(other).cloned().unwrap_or(Value::Null),
        }
    }

    /// Flat JSON view: system fields followed by data fields.
    pub fn to_json(&self) -> Map<String, Value> {
        let mut out = Map::new();
        out.insert("id".to_string(), Value::from(self.id));
        for (name, value) in &self.values {
            out.insert(name.clone(), value.clone());
        }
        if let Some(language) = &self.language {
            out.insert("language".to_string(), Value::String(language.clone()));
        }
        if let Some(group) = self.translation_of {
            out.insert("translationOf".to_string(), Value::from(group));
        }
        out.insert("createdAt".to_string(), Value::String(self.created_at.to_rfc3339()));
        out.insert("updatedAt".to_string(), Value::String(self.updated_at.to_rfc3339()));
        if let Some(user) = self.created_by {
            out.insert("createdBy".to_string(), Value::from(user));
        }
        if let Some(user) = self.updated_by {
            out.insert("updatedBy".to_string(), Value::from(user));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_system_fields_are_addressable() {
        let mut record = Record::new(7, json!({"title": "hi"}).as_object().cloned().unwrap());
        record.translation_of = Some(3);
        record.language = Some("de".into());

        assert_eq!(record.get("id"), json!(7));
        assert_eq!(record.get("title"), json!("hi"));
        assert_eq!(record.get("language"), json!("de"));
        assert_eq!(record.get("missing"), Value::Null);
        assert_eq!(record.group_id(), 3);

        let flat = record.to_json();
        assert_eq!(flat.keys().next().map(String::as_str), Some("id"));
        assert_eq!(flat["translationOf"], json!(3));
    }
}
