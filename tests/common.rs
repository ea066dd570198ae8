//! Shared fixture for the integration tests: a blog schema over a temporary
//! sled database.

#![allow(dead_code)]

use datafold_cms::config::{CmsConfig, QueueConfig};
use datafold_cms::schema::{CollectionDefinition, ConditionExpr, FieldDefinition, SchemaRegistry};
use datafold_cms::Cms;
use serde_json::{Map, Value};
use tempfile::TempDir;

pub struct CommonTestFixture {
    pub cms: Cms,
    pub _temp_dir: TempDir,
}

impl CommonTestFixture {
    pub fn new() -> Self {
        Self::with_config(|config| config)
    }

    /// Fixture whose configuration is adjusted by `adjust` before opening.
    pub fn with_config(adjust: impl FnOnce(CmsConfig) -> CmsConfig) -> Self {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp directory");
        let config = adjust(CmsConfig::temporary(temp_dir.path()));
        let cms = Cms::open(config, blog_schema()).expect("Failed to open CMS");
        Self {
            cms,
            _temp_dir: temp_dir,
        }
    }

    pub fn with_queue(queue: QueueConfig) -> Self {
        Self::with_config(|config| config.with_queue(queue))
    }
}

/// companies <- authors <- posts (translatable), plus a single-mode settings
/// collection.
pub fn blog_schema() -> SchemaRegistry {
    SchemaRegistry::load(vec![
        CollectionDefinition::multi("companies").field("title", FieldDefinition::text().required()),
        CollectionDefinition::multi("authors")
            .field("name", FieldDefinition::text().required())
            .field("email", FieldDefinition::text())
            .field("company", FieldDefinition::record("companies"))
            .index(["email"], true),
        CollectionDefinition::multi("posts")
            .translatable()
            .field("title", FieldDefinition::text().required())
            .field("slug", FieldDefinition::text().immutable())
            .field("kind", FieldDefinition::select(["news", "guide"]).with_default("news"))
            .field("level", FieldDefinition::text().required())
            .field("views", FieldDefinition::number(Some(0.0), None))
            .field("tags", FieldDefinition::chips())
            .field("author", FieldDefinition::record("authors"))
            .field("related", FieldDefinition::records("posts"))
            .field("cover", FieldDefinition::file())
            .field("featured", FieldDefinition::switch().not_translatable())
            .field("category", FieldDefinition::text())
            .synced("category")
            .condition("level", ConditionExpr::equals("kind", "guide"))
            .index(["slug"], true),
        CollectionDefinition::single("settings")
            .field("siteName", FieldDefinition::text().with_default("My site"))
            .field("perPage", FieldDefinition::number(Some(1.0), Some(50.0)).with_default(10)),
    ])
    .expect("blog schema is valid")
}

/// Object literal as a value map.
pub fn values(value: Value) -> Map<String, Value> {
    value.as_object().cloned().expect("expected a JSON object")
}

pub fn ids(documents: &[Map<String, Value>]) -> Vec<u64> {
    documents
        .iter()
        .map(|doc| doc["id"].as_u64().expect("document has an id"))
        .collect()
}
