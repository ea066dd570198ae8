use log::debug;
use serde_json::{Map, Value};
use std::cmp::Ordering;
use std::collections::HashSet;
use std::sync::Arc;

use super::builder::QueryBuilder;
use super::compiler::{compile, CompiledQuery};
use super::descriptor::{QueryDescriptor, SortDirection, SortKey};
use super::filter::sort_order;
use super::populate::PopulationEngine;
use crate::config::QueryConfig;
use crate::context::OperationContext;
use crate::db_operations::DbOperations;
use crate::error::CmsResult;
use crate::record::Record;
use crate::schema::field::ReferenceResolver;
use crate::schema::{Collection, SchemaRegistry};

/// A record as returned by reads: system fields and data fields, after
/// selection and population.
pub type Document = Map<String, Value>;

/// Id under which single-mode collections store their record
pub const SINGLE_RECORD_ID: u64 = 1;

/// Shared entry point for queries and mutations.
///
/// Cheap to clone. The schema registry is read-only; the only mutable
/// state lives in the database.
#[derive(Clone)]
pub struct QueryEngine {
    inner: Arc<EngineInner>,
}

struct EngineInner {
    registry: Arc<SchemaRegistry>,
    db: DbOperations,
    config: QueryConfig,
    resolver: Option<Arc<dyn ReferenceResolver>>,
}

impl QueryEngine {
    pub fn new(
        registry: Arc<SchemaRegistry>,
        db: DbOperations,
        config: QueryConfig,
        resolver: Option<Arc<dyn ReferenceResolver>>,
    ) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                registry,
                db,
                config,
                resolver,
            }),
        }
    }

    /// Start a query against `collection`.
    ///
    /// The collection is resolved when a terminal operation compiles the
    /// query, so an unknown name fails there with `SchemaMismatch`.
    pub fn query(&self, collection: impl Into<String>) -> QueryBuilder {
        QueryBuilder::new(self.clone(), QueryDescriptor::new(collection))
    }

    pub fn registry(&self) -> &SchemaRegistry {
        &self.inner.registry
    }

    pub fn db(&self) -> &DbOperations {
        &self.inner.db
    }

    pub fn config(&self) -> &QueryConfig {
        &self.inner.config
    }

    pub(crate) fn resolver(&self) -> Option<&dyn ReferenceResolver> {
        self.inner.resolver.as_deref()
    }

    pub(crate) fn compile(&self, descriptor: &QueryDescriptor) -> CmsResult<CompiledQuery> {
        compile(&self.inner.registry, descriptor, &self.inner.config)
    }

    /// Language stamped on new records of `collection`
    pub(crate) fn record_language(&self, collection: &Collection, requested: Option<&str>) -> Option<String> {
        if !collection.is_translatable() {
            return None;
        }
        Some(requested.unwrap_or(&self.inner.config.default_language).to_string())
    }

    /// The defaults-filled record a single-mode collection reads as before
    /// anything was stored.
    pub(crate) fn virtual_single(&self, collection: &Collection, ctx: &OperationContext) -> Record {
        let language = self.record_language(collection, None);
        let values = collection.apply_defaults(&Map::new(), ctx.user.as_ref(), language.as_deref());
        let mut record = Record::new(SINGLE_RECORD_ID, values);
        record.language = language;
        record
    }

    /// Matched records in result order, before windowing.
    pub(crate) fn fetch(&self, compiled: &CompiledQuery, ctx: &OperationContext) -> CmsResult<Vec<Record>> {
        ctx.check()?;
        let name = compiled.collection.name();

        let mut records = self.inner.db.record_transaction(|txn| match &compiled.targets {
            Some(ids) => {
                let mut seen = HashSet::new();
                let mut found = Vec::new();
                for id in ids.iter().filter(|id| seen.insert(**id)) {
                    if let Some(record) = txn.get(name, *id)? {
                        found.push(record);
                    }
                }
                Ok(found)
            }
            None => txn.all(name),
        })?;

        let wants_single = compiled
            .targets
            .as_ref()
            .map_or(true, |ids| ids.contains(&SINGLE_RECORD_ID));
        if compiled.collection.is_single() && records.is_empty() && wants_single {
            records.push(self.virtual_single(&compiled.collection, ctx));
        }

        records.retain(|record| compiled.predicate.matches(record));
        sort_records(&mut records, &compiled.sort);
        debug!("Query on '{}' matched {} record(s)", name, records.len());
        Ok(records)
    }

    /// Apply selection and population to fetched records.
    pub(crate) fn render(
        &self,
        compiled: &CompiledQuery,
        records: Vec<Record>,
        ctx: &OperationContext,
    ) -> CmsResult<Vec<Document>> {
        let mut documents: Vec<Document> = records
            .iter()
            .map(|record| {
                let mut doc = record.to_json();
                if let Some(selection) = &compiled.selection {
                    doc.retain(|field, _| selection.selects(field));
                }
                doc
            })
            .collect();

        PopulationEngine::new(self, ctx).populate(
            &compiled.collection,
            &mut documents,
            compiled.populate.as_ref(),
            compiled.selection.as_ref(),
            compiled.language.as_deref(),
        )?;
        Ok(documents)
    }
}

/// Stable multi-key sort; ties keep insertion order.
pub(crate) fn sort_records(records: &mut [Record], sort: &[SortKey]) {
    if sort.is_empty() {
        return;
    }
    records.sort_by(|a, b| {
        for key in sort {
            let ordering = sort_order(&a.get(&key.field), &b.get(&key.field));
            let ordering = match key.direction {
                SortDirection::Asc => ordering,
                SortDirection::Desc => ordering.reverse(),
            };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        Ordering::Equal
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_sort_records_by_multiple_keys() {
        let make = |id: u64, kind: &str, views: i64| {
            let mut record = Record::new(id, Map::new());
            record.values.insert("kind".into(), json!(kind));
            record.values.insert("views".into(), json!(views));
            record
        };
        let mut records = vec![make(1, "b", 5), make(2, "a", 1), make(3, "b", 9), make(4, "a", 1)];
        sort_records(&mut records, &[SortKey::asc("kind"), SortKey::desc("views")]);
        let ids: Vec<u64> = records.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![2, 4, 3, 1]);
    }
}
