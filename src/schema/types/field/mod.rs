//! Field registry: the closed set of field types and their behavior.

pub mod common;
pub mod populate;
pub mod validate;
pub mod variant;

pub use common::{json_number, DynamicDefault, FieldContext, FieldDefinition, FieldValidator, PopulateTransform};
pub use populate::{populate, ReferenceResolver};
pub use validate::{coerce, is_blank, round_to, validate, validate_value};
pub use variant::FieldKind;
