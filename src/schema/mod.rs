//! Collection schemas: field types, collections, conditional logic and the
//! registry that loads them.

pub mod registry;
pub mod types;

pub use registry::SchemaRegistry;
pub use types::{collection, conditional, field};

// Re-export the common types at the schema module level
pub use types::{
    Collection, CollectionDefinition, CollectionMode, ConditionExpr, FieldContext,
    FieldDefinition, FieldKind, IndexDefinition, SchemaError, ValidationScope,
};
