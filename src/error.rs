//! Unified error type for the CMS data layer.
//!
//! `CmsError` centralizes every failure a caller can observe, grouped the way
//! callers need to react to them: validation and schema mismatches are caller
//! errors detected before storage is touched, conflicts roll back a whole
//! transaction, and job failures leave the failing job in the queue.

use serde::Serialize;
use sled::transaction::{ConflictableTransactionError, TransactionError};
use std::fmt;
use thiserror::Error;

use crate::config::ConfigError;
use crate::query::parser::ParseError;
use crate::queue::JobExecutionError;
use crate::schema::SchemaError;

/// Kind of rule a field value violated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ViolationKind {
    Required,
    Type,
    Range,
    Length,
    Membership,
    Size,
    Immutable,
    Custom,
}

impl fmt::Display for ViolationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Required => "required",
            Self::Type => "type",
            Self::Range => "range",
            Self::Length => "length",
            Self::Membership => "membership",
            Self::Size => "size",
            Self::Immutable => "immutable",
            Self::Custom => "custom",
        };
        f.write_str(name)
    }
}

/// A single field that failed validation.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldViolation {
    pub field: String,
    pub kind: ViolationKind,
    pub message: String,
    /// Set when a multi-record mutation rejected one of several records.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub record_id: Option<u64>,
}

impl FieldViolation {
    pub fn new(field: impl Into<String>, kind: ViolationKind, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            kind,
            message: message.into(),
            record_id: None,
        }
    }

    pub fn for_record(mut self, record_id: u64) -> Self {
        self.record_id = Some(record_id);
        self
    }
}

impl fmt::Display for FieldViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.record_id {
            Some(id) => write!(f, "{} (record {}): {} [{}]", self.field, id, self.message, self.kind),
            None => write!(f, "{}: {} [{}]", self.field, self.message, self.kind),
        }
    }
}

/// Every violation found in one submission, in field order.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct ValidationErrors {
    violations: Vec<FieldViolation>,
}

impl ValidationErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, violation: FieldViolation) {
        self.violations.push(violation);
    }

    pub fn extend(&mut self, other: ValidationErrors) {
        self.violations.extend(other.violations);
    }

    pub fn is_empty(&self) -> bool {
        self.violations.is_empty()
    }

    pub fn len(&self) -> usize {
        self.violations.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &FieldViolation> {
        self.violations.iter()
    }

    /// First violation reported for `field`, if any.
    pub fn for_field(&self, field: &str) -> Option<&FieldViolation> {
        self.violations.iter().find(|v| v.field == field)
    }

    /// Converts into `Err` when at least one violation was collected.
    pub fn into_result<T>(self, value: T) -> Result<T, ValidationErrors> {
        if self.is_empty() {
            Ok(value)
        } else {
            Err(self)
        }
    }
}

impl From<FieldViolation> for ValidationErrors {
    fn from(violation: FieldViolation) -> Self {
        Self {
            violations: vec![violation],
        }
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} field(s) failed validation", self.violations.len())?;
        for (i, violation) in self.violations.iter().enumerate() {
            let sep = if i == 0 { ": " } else { "; " };
            write!(f, "{}{}", sep, violation)?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationErrors {}

/// Crate-level error.
#[derive(Debug, Error)]
pub enum CmsError {
    /// One or more field values were rejected; always reported as a batch.
    #[error("Validation failed: {0}")]
    Validation(ValidationErrors),

    /// A query or mutation referenced a collection or field the schema does not know.
    #[error("Schema mismatch in '{collection}': {reason}")]
    SchemaMismatch { collection: String, reason: String },

    /// The schema definition itself is malformed. Fatal at startup.
    #[error(transparent)]
    Schema(#[from] SchemaError),

    /// The string-encoded query descriptor could not be decoded.
    #[error(transparent)]
    Parse(#[from] ParseError),

    /// A well-formed descriptor that cannot be executed as asked.
    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    /// Unique-index or translation conflict; the transaction was rolled back.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Queue trigger credential mismatch.
    #[error("Authorization error: {0}")]
    Authorization(String),

    /// A job handler failed; the job row was retained.
    #[error(transparent)]
    JobExecution(#[from] JobExecutionError),

    /// The caller's deadline passed or the operation was cancelled.
    #[error("Operation cancelled")]
    Cancelled,

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl CmsError {
    pub fn schema_mismatch(collection: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::SchemaMismatch {
            collection: collection.into(),
            reason: reason.into(),
        }
    }

    /// Whether a caller may recover from this error without restarting.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, Self::Schema(_) | Self::Config(_) | Self::Storage(_))
    }

    /// Validation violations carried by this error, if it is a validation error.
    pub fn violations(&self) -> Option<&ValidationErrors> {
        match self {
            Self::Validation(errors) => Some(errors),
            _ => None,
        }
    }
}

impl From<ValidationErrors> for CmsError {
    fn from(errors: ValidationErrors) -> Self {
        Self::Validation(errors)
    }
}

impl From<sled::Error> for CmsError {
    fn from(error: sled::Error) -> Self {
        Self::Storage(error.to_string())
    }
}

impl From<TransactionError<CmsError>> for CmsError {
    fn from(error: TransactionError<CmsError>) -> Self {
        match error {
            TransactionError::Abort(e) => e,
            TransactionError::Storage(e) => Self::Storage(e.to_string()),
        }
    }
}

/// Aborts the enclosing sled transaction with a `CmsError`.
impl From<CmsError> for ConflictableTransactionError<CmsError> {
    fn from(error: CmsError) -> Self {
        ConflictableTransactionError::Abort(error)
    }
}

pub type CmsResult<T> = Result<T, CmsError>;
