use serde::Serialize;
use serde_json::{Map, Value};

use super::descriptor::{Pagination, PopulateSpec, QueryDescriptor, Selection, SortDirection, SortKey};
use super::engine::{Document, QueryEngine};
use super::filter::{FilterExpr, Operator};
use super::parser::parse_params;
use crate::context::OperationContext;
use crate::error::{CmsError, CmsResult};
use crate::record::Record;

/// Conditions collected inside an `or_where` / `and_where` group.
#[derive(Debug, Clone, Default)]
pub struct FilterGroup {
    filters: Vec<FilterExpr>,
}

impl FilterGroup {
    pub fn where_(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.where_op(field, Operator::Eq, value)
    }

    pub fn where_op(mut self, field: impl Into<String>, op: Operator, value: impl Into<Value>) -> Self {
        self.filters.push(FilterExpr::condition(field, op, value));
        self
    }

    pub fn where_in<I, V>(self, field: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.where_op(field, Operator::In, list(values))
    }

    pub fn where_not_in<I, V>(self, field: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.where_op(field, Operator::NotIn, list(values))
    }

    /// Nested OR group
    pub fn any(mut self, group: impl FnOnce(FilterGroup) -> FilterGroup) -> Self {
        self.filters.push(FilterExpr::Or(group(FilterGroup::default()).filters));
        self
    }

    /// Nested AND group
    pub fn all(mut self, group: impl FnOnce(FilterGroup) -> FilterGroup) -> Self {
        self.filters.push(FilterExpr::And(group(FilterGroup::default()).filters));
        self
    }
}

fn list<I, V>(values: I) -> Value
where
    I: IntoIterator<Item = V>,
    V: Into<Value>,
{
    Value::Array(values.into_iter().map(Into::into).collect())
}

/// One page of results.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Paginated {
    pub records: Vec<Document>,
    /// Matches across all pages
    pub total: usize,
    pub current_page: u64,
    pub last_page: u64,
    pub per_page: u64,
}

/// Fluent query construction.
///
/// Builder calls only accumulate into a [`QueryDescriptor`] and can come in
/// any order; terminal operations compile against the schema, then run.
#[derive(Clone)]
pub struct QueryBuilder {
    engine: QueryEngine,
    descriptor: QueryDescriptor,
    ctx: OperationContext,
}

impl QueryBuilder {
    pub(crate) fn new(engine: QueryEngine, descriptor: QueryDescriptor) -> Self {
        Self {
            engine,
            descriptor,
            ctx: OperationContext::default(),
        }
    }

    pub fn descriptor(&self) -> &QueryDescriptor {
        &self.descriptor
    }

    pub fn into_descriptor(self) -> QueryDescriptor {
        self.descriptor
    }

    pub fn context(&self) -> &OperationContext {
        &self.ctx
    }

    // ========== SELECTION ==========

    pub fn select<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let selection = self.descriptor.selection.get_or_insert_with(Selection::new);
        for field in fields {
            selection.include(field);
        }
        self
    }

    /// Select a relation field with a sub-selection for its populated records.
    pub fn select_nested(mut self, field: impl Into<String>, nested: Selection) -> Self {
        self.descriptor
            .selection
            .get_or_insert_with(Selection::new)
            .nest(field, nested);
        self
    }

    pub fn selection(mut self, selection: Selection) -> Self {
        self.descriptor.selection = Some(selection);
        self
    }

    pub fn select_all(mut self) -> Self {
        self.descriptor.selection = None;
        self
    }

    // ========== FILTERS ==========

    pub fn where_(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.where_op(field, Operator::Eq, value)
    }

    pub fn where_op(mut self, field: impl Into<String>, op: Operator, value: impl Into<Value>) -> Self {
        self.descriptor.filters.push(FilterExpr::condition(field, op, value));
        self
    }

    pub fn where_in<I, V>(self, field: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.where_op(field, Operator::In, list(values))
    }

    pub fn where_not_in<I, V>(self, field: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.where_op(field, Operator::NotIn, list(values))
    }

    /// Add a group whose conditions are OR-ed.
    pub fn or_where(mut self, group: impl FnOnce(FilterGroup) -> FilterGroup) -> Self {
        self.descriptor
            .filters
            .push(FilterExpr::Or(group(FilterGroup::default()).filters));
        self
    }

    /// Add a group whose conditions are AND-ed.
    pub fn and_where(mut self, group: impl FnOnce(FilterGroup) -> FilterGroup) -> Self {
        self.descriptor
            .filters
            .push(FilterExpr::And(group(FilterGroup::default()).filters));
        self
    }

    pub fn filter(mut self, filter: FilterExpr) -> Self {
        self.descriptor.filters.push(filter);
        self
    }

    // ========== ORDER / PAGINATION ==========

    pub fn order(mut self, field: impl Into<String>, direction: SortDirection) -> Self {
        self.descriptor.sort.push(SortKey {
            field: field.into(),
            direction,
        });
        self
    }

    pub fn paginate(mut self, page: u64, per_page: u64) -> Self {
        self.descriptor.pagination = Some(Pagination::Page {
            page,
            per_page: Some(per_page),
        });
        self
    }

    pub fn offset(mut self, offset: u64) -> Self {
        let limit = match self.descriptor.pagination {
            Some(Pagination::Offset { limit, .. }) => limit,
            _ => None,
        };
        self.descriptor.pagination = Some(Pagination::Offset { offset, limit });
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        let offset = match self.descriptor.pagination {
            Some(Pagination::Offset { offset, .. }) => offset,
            _ => 0,
        };
        self.descriptor.pagination = Some(Pagination::Offset {
            offset,
            limit: Some(limit),
        });
        self
    }

    // ========== POPULATION ==========

    /// Expand the named relation fields one level deep.
    pub fn populate<I, S>(self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.populate_spec(PopulateSpec::fields(fields))
    }

    pub fn populate_spec(mut self, spec: PopulateSpec) -> Self {
        self.descriptor.populate = Some(spec);
        self
    }

    pub fn populate_all(self) -> Self {
        self.populate_spec(PopulateSpec::All)
    }

    pub fn populate_depth(mut self, depth: u32) -> Self {
        self.descriptor.populate_depth = Some(depth);
        self
    }

    // ========== TARGETS / CONTEXT ==========

    pub fn record(mut self, id: u64) -> Self {
        self.descriptor.targets.push(id);
        self
    }

    pub fn records(mut self, ids: impl IntoIterator<Item = u64>) -> Self {
        self.descriptor.targets.extend(ids);
        self
    }

    pub fn language(mut self, language: impl Into<String>) -> Self {
        self.descriptor.language = Some(language.into());
        self
    }

    pub fn with_context(mut self, ctx: OperationContext) -> Self {
        self.ctx = ctx;
        self
    }

    /// Merge a string-encoded descriptor into this builder.
    ///
    /// Filters are AND-ed with the ones already present; any other key that
    /// appears replaces the builder's setting.
    pub fn apply_params<I, K, V>(mut self, params: I) -> CmsResult<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let parsed = parse_params(&self.descriptor.collection, params)?;
        self.descriptor.merge(parsed);
        Ok(self)
    }

    // ========== READ TERMINALS ==========

    pub fn first(&self) -> CmsResult<Option<Document>> {
        let mut compiled = self.engine.compile(&self.descriptor)?;
        compiled.window.limit = Some(1);
        let records = compiled.window.apply(self.engine.fetch(&compiled, &self.ctx)?);
        Ok(self.engine.render(&compiled, records, &self.ctx)?.into_iter().next())
    }

    pub fn all(&self) -> CmsResult<Vec<Document>> {
        let compiled = self.engine.compile(&self.descriptor)?;
        let records = compiled.window.apply(self.engine.fetch(&compiled, &self.ctx)?);
        self.engine.render(&compiled, records, &self.ctx)
    }

    /// Page of results plus totals. Defaults to the first page.
    pub fn paginated(&self) -> CmsResult<Paginated> {
        let mut descriptor = self.descriptor.clone();
        match descriptor.pagination {
            Some(Pagination::Page { .. }) => {}
            Some(Pagination::Offset { .. }) => {
                return Err(CmsError::InvalidQuery(
                    "paginated results need page-based pagination, not offset/limit".to_string(),
                ))
            }
            None => descriptor.pagination = Some(Pagination::Page { page: 1, per_page: None }),
        }

        let compiled = self.engine.compile(&descriptor)?;
        let (current_page, per_page) = compiled.window.page.unwrap_or((1, self.engine.config().default_per_page));
        let matched = self.engine.fetch(&compiled, &self.ctx)?;
        let total = matched.len();
        let last_page = (total as u64).div_ceil(per_page).max(1);
        let records = self.engine.render(&compiled, compiled.window.apply(matched), &self.ctx)?;

        Ok(Paginated {
            records,
            total,
            current_page,
            last_page,
            per_page,
        })
    }

    /// Number of matching records, ignoring pagination.
    pub fn count(&self) -> CmsResult<usize> {
        let mut descriptor = self.descriptor.clone();
        descriptor.pagination = None;
        let compiled = self.engine.compile(&descriptor)?;
        Ok(self.engine.fetch(&compiled, &self.ctx)?.len())
    }

    pub fn exists(&self) -> CmsResult<bool> {
        Ok(self.count()? > 0)
    }

    // ========== MUTATION TERMINALS ==========

    pub fn create(&self, values: Map<String, Value>) -> CmsResult<Record> {
        self.engine.create(&self.descriptor, values, &self.ctx)
    }

    /// Update the targeted records, or those matching the filters.
    pub fn update(&self, values: Map<String, Value>) -> CmsResult<Vec<Record>> {
        self.engine.update(&self.descriptor, values, &self.ctx, false)
    }

    /// Update every record matching the filters; no filter means all.
    pub fn update_many(&self, values: Map<String, Value>) -> CmsResult<Vec<Record>> {
        self.engine.update(&self.descriptor, values, &self.ctx, true)
    }

    pub fn delete(&self) -> CmsResult<Vec<Record>> {
        self.engine.delete(&self.descriptor, &self.ctx, false)
    }

    pub fn delete_many(&self) -> CmsResult<Vec<Record>> {
        self.engine.delete(&self.descriptor, &self.ctx, true)
    }

    /// Create a translation of `source_id` in `language`.
    pub fn create_translation(
        &self,
        source_id: u64,
        language: impl Into<String>,
        values: Map<String, Value>,
    ) -> CmsResult<Record> {
        self.engine
            .create_translation(&self.descriptor, source_id, &language.into(), values, &self.ctx)
    }
}
