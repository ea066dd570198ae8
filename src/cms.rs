use log::info;
use std::sync::Arc;

use crate::config::CmsConfig;
use crate::db_operations::DbOperations;
use crate::error::CmsResult;
use crate::query::{QueryBuilder, QueryEngine};
use crate::queue::{JobQueue, JobRegistry, QueueTrigger, TranslationJob, TRANSLATION_ACTION};
use crate::schema::field::ReferenceResolver;
use crate::schema::SchemaRegistry;

/// The data layer: schemas, storage, query engine and job queue wired
/// together over one sled database.
#[derive(Clone)]
pub struct Cms {
    schemas: Arc<SchemaRegistry>,
    engine: QueryEngine,
    queue: JobQueue,
}

impl Cms {
    /// Open storage from `config` with the built-in job handlers.
    pub fn open(config: CmsConfig, schemas: SchemaRegistry) -> CmsResult<Self> {
        Self::open_with(config, schemas, None, JobRegistry::new())
    }

    pub fn open_with_resolver(
        config: CmsConfig,
        schemas: SchemaRegistry,
        resolver: Arc<dyn ReferenceResolver>,
    ) -> CmsResult<Self> {
        Self::open_with(config, schemas, Some(resolver), JobRegistry::new())
    }

    /// Open with a file resolver and extra job handlers. A handler registered
    /// under a built-in action replaces the built-in one.
    pub fn open_with(
        config: CmsConfig,
        schemas: SchemaRegistry,
        resolver: Option<Arc<dyn ReferenceResolver>>,
        handlers: JobRegistry,
    ) -> CmsResult<Self> {
        config.validate()?;
        let db = DbOperations::open(&config)?;
        let schemas = Arc::new(schemas);
        let engine = QueryEngine::new(Arc::clone(&schemas), db.clone(), config.query.clone(), resolver);

        let mut registry = handlers;
        if !registry.contains(TRANSLATION_ACTION) {
            registry.register(TRANSLATION_ACTION, Arc::new(TranslationJob::new(engine.clone())));
        }
        let queue = JobQueue::new(db, Arc::clone(&schemas), registry, config.queue.clone());

        info!(
            "Opened CMS at {} with {} collection(s)",
            config.storage_path.display(),
            schemas.len()
        );
        Ok(Self { schemas, engine, queue })
    }

    pub fn schemas(&self) -> &SchemaRegistry {
        &self.schemas
    }

    pub fn engine(&self) -> &QueryEngine {
        &self.engine
    }

    /// Start a query against `collection`.
    pub fn query(&self, collection: impl Into<String>) -> QueryBuilder {
        self.engine.query(collection)
    }

    pub fn queue(&self) -> &JobQueue {
        &self.queue
    }

    pub fn trigger(&self) -> QueueTrigger {
        QueueTrigger::new(self.queue.clone())
    }
}
