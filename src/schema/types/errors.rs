use thiserror::Error;

/// Errors found while loading collection definitions.
///
/// Any of these is fatal: the process must not serve requests with a schema
/// that failed to load.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SchemaError {
    #[error("Malformed schema definition: {0}")]
    Malformed(String),

    #[error("Duplicate collection: {0}")]
    DuplicateCollection(String),

    #[error("Duplicate field '{field}' in collection '{collection}'")]
    DuplicateField { collection: String, field: String },

    #[error("Invalid field '{field}' in collection '{collection}': {reason}")]
    InvalidField {
        collection: String,
        field: String,
        reason: String,
    },

    #[error("Field '{field}' in collection '{collection}' references unknown collection '{target}'")]
    UnknownRelation {
        collection: String,
        field: String,
        target: String,
    },

    #[error("Invalid synced field '{field}' in collection '{collection}': {reason}")]
    InvalidSyncedField {
        collection: String,
        field: String,
        reason: String,
    },

    #[error("Invalid index in collection '{collection}': {reason}")]
    InvalidIndex { collection: String, reason: String },

    #[error("Invalid conditional logic for '{field}' in collection '{collection}': {reason}")]
    InvalidCondition {
        collection: String,
        field: String,
        reason: String,
    },

    #[error("Cyclic conditional logic in collection '{collection}' between fields: {}", fields.join(", "))]
    ConditionCycle {
        collection: String,
        fields: Vec<String>,
    },

    #[error("{} schema errors: {}", .0.len(), .0.iter().map(|e| e.to_string()).collect::<Vec<_>>().join("; "))]
    Multiple(Vec<SchemaError>),
}

impl SchemaError {
    /// Collapse a list of load errors into one error value.
    pub fn from_errors(mut errors: Vec<SchemaError>) -> Option<SchemaError> {
        match errors.len() {
            0 => None,
            1 => errors.pop(),
            _ => Some(SchemaError::Multiple(errors)),
        }
    }

    /// Flattened view over a possibly grouped error.
    pub fn errors(&self) -> Vec<&SchemaError> {
        match self {
            SchemaError::Multiple(errors) => errors.iter().collect(),
            other => vec![other],
        }
    }
}
