//! Relation population.
//!
//! Relation fields named in the populate spec are expanded with one
//! sub-query per field, issued through the query builder with the nested
//! selection and one less level of depth. At depth zero nothing expands, so
//! cyclic relation graphs terminate. Fields outside the populate spec keep their
//! stored identifiers.

use log::debug;
use serde_json::Value;
use std::collections::{HashMap, HashSet};

use super::compiler::PopulatePlan;
use super::descriptor::{PopulateSpec, Selection};
use super::engine::{Document, QueryEngine};
use crate::context::OperationContext;
use crate::error::CmsResult;
use crate::schema::field::{populate as populate_value, FieldContext, FieldDefinition, FieldKind};
use crate::schema::Collection;

pub struct PopulationEngine<'a> {
    engine: &'a QueryEngine,
    ctx: &'a OperationContext,
}

impl<'a> PopulationEngine<'a> {
    pub fn new(engine: &'a QueryEngine, ctx: &'a OperationContext) -> Self {
        Self { engine, ctx }
    }

    /// Expand flagged relations and run field population rules over
    /// `documents` in place.
    pub fn populate(
        &self,
        collection: &Collection,
        documents: &mut [Document],
        plan: Option<&PopulatePlan>,
        selection: Option<&Selection>,
        language: Option<&str>,
    ) -> CmsResult<()> {
        for (name, def) in collection.fields() {
            if !documents.iter().any(|doc| doc.contains_key(name)) {
                continue;
            }

            let expand = plan
                .filter(|plan| plan.depth > 0 && def.kind.is_populatable())
                .and_then(|plan| plan.spec.child(name).map(|child| (child, plan.depth)));

            if let (Some((child, depth)), Some(target)) = (expand, def.kind.relation_target()) {
                self.expand_relation(
                    name,
                    &def.kind,
                    target,
                    documents,
                    child,
                    depth - 1,
                    selection.and_then(|s| s.nested(name)),
                )?;
            }

            let resolve_files = expand.is_some() && matches!(def.kind, FieldKind::File);
            if resolve_files || def.has_transform() {
                self.apply_field_rules(collection, name, def, documents, resolve_files, language);
            }
        }
        Ok(())
    }

    fn apply_field_rules(
        &self,
        collection: &Collection,
        name: &str,
        def: &FieldDefinition,
        documents: &mut [Document],
        resolve_files: bool,
        language: Option<&str>,
    ) {
        let resolver = if resolve_files { self.engine.resolver() } else { None };
        for doc in documents.iter_mut() {
            let snapshot = doc.clone();
            let Some(slot) = doc.get_mut(name) else {
                continue;
            };
            let ctx = FieldContext {
                collection: collection.name(),
                field: name,
                record: &snapshot,
                user: self.ctx.user.as_ref(),
                language: language.or_else(|| snapshot.get("language").and_then(Value::as_str)),
            };
            let stored = std::mem::take(slot);
            *slot = populate_value(def, stored, &ctx, resolver);
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn expand_relation(
        &self,
        name: &str,
        kind: &FieldKind,
        target: &str,
        documents: &mut [Document],
        child: &PopulateSpec,
        remaining: u32,
        selection: Option<&Selection>,
    ) -> CmsResult<()> {
        let mut seen = HashSet::new();
        let ids: Vec<u64> = documents
            .iter()
            .filter_map(|doc| doc.get(name))
            .flat_map(|value| match value {
                Value::Array(items) => items.iter().filter_map(Value::as_u64).collect::<Vec<_>>(),
                other => other.as_u64().into_iter().collect(),
            })
            .filter(|id| seen.insert(*id))
            .collect();
        if ids.is_empty() {
            return Ok(());
        }

        self.ctx.check()?;
        let mut query = self
            .engine
            .query(target)
            .records(ids.iter().copied())
            .with_context(self.ctx.clone())
            .populate_spec(child.clone())
            .populate_depth(remaining);
        if let Some(selection) = selection {
            query = query.selection(selection.clone());
        }
        let related: HashMap<u64, Document> = query
            .all()?
            .into_iter()
            .filter_map(|doc| doc.get("id").and_then(Value::as_u64).map(|id| (id, doc)))
            .collect();
        debug!(
            "Populated '{}' from '{}': {} of {} record(s) found",
            name,
            target,
            related.len(),
            ids.len()
        );

        let lookup = |value: &Value| value.as_u64().and_then(|id| related.get(&id)).cloned();
        for doc in documents.iter_mut() {
            let Some(slot) = doc.get_mut(name) else {
                continue;
            };
            *slot = match (kind, &*slot) {
                (FieldKind::Records { .. }, Value::Array(items)) => {
                    Value::Array(items.iter().filter_map(lookup).map(Value::Object).collect())
                }
                (_, value) => lookup(value).map(Value::Object).unwrap_or(Value::Null),
            };
        }
        Ok(())
    }
}
