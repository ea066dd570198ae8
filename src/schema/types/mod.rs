pub mod collection;
pub mod conditional;
pub mod errors;
pub mod field;

pub use collection::{
    is_system_field, Collection, CollectionDefinition, CollectionMode, FieldMap, IndexDefinition,
    ValidationScope, SYSTEM_FIELDS,
};
pub use conditional::{ConditionExpr, ConditionGraph};
pub use errors::SchemaError;
pub use field::{FieldContext, FieldDefinition, FieldKind};
