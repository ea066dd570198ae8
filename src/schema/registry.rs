use log::{debug, info};
use std::collections::HashMap;
use std::sync::Arc;

use super::types::{Collection, CollectionDefinition, SchemaError};
use crate::error::{CmsError, CmsResult};

/// Every loaded collection, keyed by name.
///
/// Built once at startup and shared read-only (behind an `Arc`) by the
/// query engine and the job queue.
#[derive(Debug, Clone, Default)]
pub struct SchemaRegistry {
    collections: HashMap<String, Arc<Collection>>,
    order: Vec<String>,
}

impl SchemaRegistry {
    /// Load and cross-check collection definitions.
    ///
    /// All problems are collected before failing, so an operator sees every
    /// mistake in one pass. Any error is fatal.
    pub fn load(definitions: Vec<CollectionDefinition>) -> Result<Self, SchemaError> {
        let mut errors = Vec::new();
        let mut collections = HashMap::new();
        let mut order = Vec::new();

        for definition in definitions {
            if collections.contains_key(&definition.name) {
                errors.push(SchemaError::DuplicateCollection(definition.name.clone()));
                continue;
            }
            let name = definition.name.clone();
            match Collection::from_definition(definition) {
                Ok(collection) => {
                    order.push(name.clone());
                    collections.insert(name, Arc::new(collection));
                }
                Err(mut collection_errors) => errors.append(&mut collection_errors),
            }
        }

        for name in &order {
            let collection = &collections[name];
            for (field, def) in collection.fields() {
                if let Some(target) = def.kind.relation_target() {
                    if !collections.contains_key(target) {
                        errors.push(SchemaError::UnknownRelation {
                            collection: name.clone(),
                            field: field.to_string(),
                            target: target.to_string(),
                        });
                    }
                }
            }
        }

        if let Some(error) = SchemaError::from_errors(errors) {
            return Err(error);
        }

        info!("Loaded {} collection(s): {}", order.len(), order.join(", "));
        Ok(Self { collections, order })
    }

    /// Load definitions from a JSON array.
    pub fn from_json(input: &str) -> Result<Self, SchemaError> {
        let definitions: Vec<CollectionDefinition> =
            serde_json::from_str(input).map_err(|e| SchemaError::Malformed(e.to_string()))?;
        debug!("Parsed {} collection definition(s) from JSON", definitions.len());
        Self::load(definitions)
    }

    pub fn get(&self, name: &str) -> Option<&Arc<Collection>> {
        self.collections.get(name)
    }

    /// Like [`get`](Self::get), but unknown names are a caller error.
    pub fn collection(&self, name: &str) -> CmsResult<Arc<Collection>> {
        self.collections
            .get(name)
            .cloned()
            .ok_or_else(|| CmsError::schema_mismatch(name, "unknown collection"))
    }

    /// Collection names in definition order
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}
