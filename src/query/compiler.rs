//! Resolves a [`QueryDescriptor`] against the schema.
//!
//! Everything that can be wrong with a query is found here, before any
//! storage access: unknown collections and fields are `SchemaMismatch`,
//! literals that cannot be compared with their field and impossible
//! pagination are `InvalidQuery`.

use serde_json::Value;
use std::sync::Arc;

use super::descriptor::{Pagination, PopulateSpec, QueryDescriptor, Selection, Selector, SortKey};
use super::filter::{like_to_regex, FilterExpr, Operator, Predicate};
use crate::config::QueryConfig;
use crate::error::{CmsError, CmsResult};
use crate::schema::field::coerce;
use crate::schema::{Collection, FieldKind, SchemaRegistry};

/// Which slice of the matched records to return.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Window {
    pub offset: usize,
    pub limit: Option<usize>,
    /// Set when the query was paginated by page number
    pub page: Option<(u64, u64)>,
}

impl Window {
    pub fn apply<T>(&self, items: Vec<T>) -> Vec<T> {
        let iter = items.into_iter().skip(self.offset);
        match self.limit {
            Some(limit) => iter.take(limit).collect(),
            None => iter.collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PopulatePlan {
    pub spec: PopulateSpec,
    /// Levels left to expand; zero expands nothing
    pub depth: u32,
}

/// A query checked against its collection and ready to run.
#[derive(Debug, Clone)]
pub struct CompiledQuery {
    pub collection: Arc<Collection>,
    pub predicate: Predicate,
    pub sort: Vec<SortKey>,
    pub window: Window,
    pub selection: Option<Selection>,
    pub populate: Option<PopulatePlan>,
    /// `None` scans the whole collection
    pub targets: Option<Vec<u64>>,
    pub language: Option<String>,
}

impl CompiledQuery {
    pub fn has_filter(&self) -> bool {
        !matches!(&self.predicate, Predicate::All(children) if children.is_empty())
    }
}

pub fn compile(
    registry: &SchemaRegistry,
    descriptor: &QueryDescriptor,
    config: &QueryConfig,
) -> CmsResult<CompiledQuery> {
    let collection = registry.collection(&descriptor.collection)?;

    let mut predicates = descriptor
        .filters
        .iter()
        .map(|filter| compile_filter(&collection, filter))
        .collect::<CmsResult<Vec<_>>>()?;

    let language = match &descriptor.language {
        Some(language) if collection.is_translatable() => {
            predicates.push(Predicate::Compare {
                field: "language".to_string(),
                op: Operator::Eq,
                value: Value::String(language.clone()),
            });
            Some(language.clone())
        }
        _ => None,
    };

    for key in &descriptor.sort {
        require_field(&collection, &key.field, "sort")?;
    }

    if let Some(selection) = &descriptor.selection {
        check_selection(registry, &collection, selection)?;
    }

    let populate = match &descriptor.populate {
        Some(spec) if !spec.is_none() => {
            check_populate(registry, &collection, spec)?;
            let requested = descriptor
                .populate_depth
                .or_else(|| spec.depth())
                .unwrap_or(config.default_population_depth);
            Some(PopulatePlan {
                spec: spec.clone(),
                depth: requested.min(config.max_population_depth),
            })
        }
        _ => None,
    };

    let window = compile_window(descriptor.pagination, config)?;

    Ok(CompiledQuery {
        collection,
        predicate: Predicate::All(predicates),
        sort: descriptor.sort.clone(),
        window,
        selection: descriptor.selection.clone(),
        populate,
        targets: if descriptor.targets.is_empty() {
            None
        } else {
            Some(descriptor.targets.clone())
        },
        language,
    })
}

fn compile_window(pagination: Option<Pagination>, config: &QueryConfig) -> CmsResult<Window> {
    match pagination {
        None => Ok(Window::default()),
        Some(Pagination::Page { page, per_page }) => {
            if page == 0 {
                return Err(CmsError::InvalidQuery("page numbers start at 1".to_string()));
            }
            let per_page = per_page.unwrap_or(config.default_per_page).min(config.max_per_page);
            if per_page == 0 {
                return Err(CmsError::InvalidQuery("perPage must be at least 1".to_string()));
            }
            let offset = (page - 1).saturating_mul(per_page);
            Ok(Window {
                offset: usize::try_from(offset).unwrap_or(usize::MAX),
                limit: Some(per_page as usize),
                page: Some((page, per_page)),
            })
        }
        Some(Pagination::Offset { offset, limit }) => Ok(Window {
            offset: usize::try_from(offset).unwrap_or(usize::MAX),
            limit: limit.map(|l| l.min(config.max_per_page) as usize),
            page: None,
        }),
    }
}

fn require_field(collection: &Collection, field: &str, usage: &str) -> CmsResult<()> {
    if collection.has_field(field) {
        Ok(())
    } else {
        Err(CmsError::schema_mismatch(
            collection.name(),
            format!("unknown field '{}' in {}", field, usage),
        ))
    }
}

/// Kind used to normalize a literal compared against `field`.
fn comparison_kind(collection: &Collection, field: &str, literal: &Value) -> Option<FieldKind> {
    match field {
        "id" | "translationOf" | "createdBy" | "updatedBy" => Some(FieldKind::Record {
            collection: collection.name().to_string(),
        }),
        "createdAt" | "updatedAt" => Some(FieldKind::DateTime { min: None, max: None }),
        "language" => Some(FieldKind::Text { min_length: None, max_length: None, trim: true }),
        _ => {
            let kind = &collection.field(field)?.kind;
            if kind.is_multi_valued() && !literal.is_array() {
                element_kind(kind)
            } else {
                Some(kind.clone())
            }
        }
    }
}

/// Kind of a single element of a multi-valued field
fn element_kind(kind: &FieldKind) -> Option<FieldKind> {
    match kind {
        FieldKind::Chips { .. } => Some(FieldKind::Text { min_length: None, max_length: None, trim: true }),
        FieldKind::Records { collection, .. } => Some(FieldKind::Record { collection: collection.clone() }),
        FieldKind::Range { .. } => Some(FieldKind::Number { min: None, max: None, decimals: None }),
        _ => None,
    }
}

fn normalize_literal(collection: &Collection, field: &str, literal: &Value) -> CmsResult<Value> {
    if literal.is_null() {
        return Ok(Value::Null);
    }
    match comparison_kind(collection, field, literal) {
        Some(kind) => coerce(&kind, literal).map_err(|reason| {
            CmsError::InvalidQuery(format!("cannot compare '{}' with {}: {}", field, literal, reason))
        }),
        None => Ok(literal.clone()),
    }
}

fn compile_filter(collection: &Collection, filter: &FilterExpr) -> CmsResult<Predicate> {
    match filter {
        FilterExpr::And(children) => Ok(Predicate::All(
            children
                .iter()
                .map(|c| compile_filter(collection, c))
                .collect::<CmsResult<_>>()?,
        )),
        FilterExpr::Or(children) => Ok(Predicate::Any(
            children
                .iter()
                .map(|c| compile_filter(collection, c))
                .collect::<CmsResult<_>>()?,
        )),
        FilterExpr::Condition { field, op, value } => {
            require_field(collection, field, "filter")?;

            if op.is_set() {
                let items = match value {
                    Value::Array(items) => items.clone(),
                    scalar => vec![scalar.clone()],
                };
                let values = items
                    .iter()
                    .map(|item| normalize_literal(collection, field, item))
                    .collect::<CmsResult<Vec<_>>>()?;
                return Ok(Predicate::InSet {
                    field: field.clone(),
                    values,
                    negate: *op == Operator::NotIn,
                });
            }

            if op.is_pattern() {
                let pattern = match value {
                    Value::String(s) => s.clone(),
                    Value::Number(n) => n.to_string(),
                    other => {
                        return Err(CmsError::InvalidQuery(format!(
                            "pattern for '{}' must be text, got {}",
                            field, other
                        )))
                    }
                };
                let pattern = like_to_regex(&pattern)
                    .map_err(|e| CmsError::InvalidQuery(format!("bad pattern for '{}': {}", field, e)))?;
                return Ok(Predicate::Matches {
                    field: field.clone(),
                    pattern,
                    negate: *op == Operator::NotLike,
                });
            }

            Ok(Predicate::Compare {
                field: field.clone(),
                op: *op,
                value: normalize_literal(collection, field, value)?,
            })
        }
    }
}

fn relation_target<'a>(collection: &'a Collection, field: &str) -> Option<&'a str> {
    collection.field(field)?.kind.relation_target()
}

fn check_selection(registry: &SchemaRegistry, collection: &Collection, selection: &Selection) -> CmsResult<()> {
    for (field, selector) in &selection.0 {
        require_field(collection, field, "select")?;
        if let Selector::Nested(inner) = selector {
            let target = relation_target(collection, field).ok_or_else(|| {
                CmsError::InvalidQuery(format!("'{}' is not a relation and cannot take a sub-selection", field))
            })?;
            check_selection(registry, &*registry.collection(target)?, inner)?;
        }
    }
    Ok(())
}

fn check_populate(registry: &SchemaRegistry, collection: &Collection, spec: &PopulateSpec) -> CmsResult<()> {
    let PopulateSpec::Fields(fields) = spec else {
        return Ok(());
    };
    for (field, child) in fields {
        require_field(collection, field, "populate")?;
        let populatable = collection
            .field(field)
            .map_or(false, |def| def.kind.is_populatable());
        if !populatable {
            return Err(CmsError::InvalidQuery(format!("'{}' cannot be populated", field)));
        }
        match relation_target(collection, field) {
            Some(target) => check_populate(registry, &*registry.collection(target)?, child)?,
            None if !child.is_none() => {
                return Err(CmsError::InvalidQuery(format!(
                    "'{}' is not a relation and cannot populate nested fields",
                    field
                )))
            }
            None => {}
        }
    }
    Ok(())
}
