//! Create, update, delete and translate.
//!
//! Each call is one sled transaction: matched records are enumerated inside
//! it, every record is validated before anything is written, and any error
//! (validation, unique conflict, cancellation) rolls the whole call back.

use chrono::Utc;
use log::info;
use serde_json::{Map, Value};
use std::collections::{BTreeSet, HashSet};

use super::compiler::CompiledQuery;
use super::descriptor::QueryDescriptor;
use super::engine::{QueryEngine, SINGLE_RECORD_ID};
use crate::context::OperationContext;
use crate::db_operations::{RecordTxn, TxResult};
use crate::error::{CmsError, CmsResult, ValidationErrors};
use crate::record::Record;
use crate::schema::collection::is_system_field;
use crate::schema::{Collection, ValidationScope};

/// Reject input keys that are not writable data fields.
fn check_input(collection: &Collection, values: &Map<String, Value>) -> CmsResult<()> {
    for key in values.keys() {
        if is_system_field(key) {
            return Err(CmsError::schema_mismatch(
                collection.name(),
                format!("system field '{}' cannot be written", key),
            ));
        }
        if collection.field(key).is_none() {
            return Err(CmsError::schema_mismatch(
                collection.name(),
                format!("unknown field '{}'", key),
            ));
        }
    }
    Ok(())
}

fn is_unset(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        Value::Array(items) => items.is_empty(),
        _ => false,
    }
}

/// Unique-index entries `record` occupies. Unset values are not indexed;
/// translatable collections index per language.
fn unique_keys(collection: &Collection, record: &Record) -> Vec<String> {
    collection
        .unique_indexes()
        .filter_map(|index| {
            let mut parts: Vec<Value> = index.fields.iter().map(|f| record.get(f)).collect();
            if parts.iter().any(is_unset) {
                return None;
            }
            if collection.is_translatable() {
                parts.push(record.get("language"));
            }
            Some(format!(
                "{}/{}/{}",
                collection.name(),
                index.fields.join("+"),
                Value::Array(parts)
            ))
        })
        .collect()
}

fn reindex(
    txn: &RecordTxn<'_>,
    collection: &Collection,
    before: Option<&Record>,
    after: Option<&Record>,
) -> TxResult<()> {
    let old = before.map(|r| unique_keys(collection, r)).unwrap_or_default();
    let new = after.map(|r| unique_keys(collection, r)).unwrap_or_default();
    for key in old.iter().filter(|key| !new.contains(key)) {
        if let Some(record) = before {
            txn.release_unique(key, record.id)?;
        }
    }
    if let Some(record) = after {
        for key in &new {
            txn.claim_unique(key, record.id)?;
        }
    }
    Ok(())
}

/// Re-tag violations with the record they belong to.
fn for_record(errors: ValidationErrors, id: u64, tag: bool) -> ValidationErrors {
    if !tag {
        return errors;
    }
    let mut tagged = ValidationErrors::new();
    for violation in errors.iter() {
        tagged.push(violation.clone().for_record(id));
    }
    tagged
}

fn require_selector(compiled: &CompiledQuery, many: bool, operation: &str) -> CmsResult<()> {
    let selected = compiled.targets.is_some() || compiled.has_filter();
    if many || compiled.collection.is_single() || selected {
        Ok(())
    } else {
        Err(CmsError::InvalidQuery(format!(
            "{} needs record ids or a filter; use {}_many to affect every record",
            operation, operation
        )))
    }
}

/// Stored records the compiled query selects, in insertion order.
fn candidates(compiled: &CompiledQuery, all: &[Record]) -> Vec<Record> {
    let mut matched: Vec<Record> = match &compiled.targets {
        Some(ids) => all.iter().filter(|r| ids.contains(&r.id)).cloned().collect(),
        None => all.to_vec(),
    };
    matched.retain(|record| compiled.predicate.matches(record));
    matched
}

impl QueryEngine {
    pub(crate) fn create(
        &self,
        descriptor: &QueryDescriptor,
        values: Map<String, Value>,
        ctx: &OperationContext,
    ) -> CmsResult<Record> {
        let collection = self.registry().collection(&descriptor.collection)?;
        check_input(&collection, &values)?;
        ctx.check()?;

        let user = ctx.user.as_ref();
        let language = self.record_language(&collection, descriptor.language.as_deref());
        let prepared = collection.apply_defaults(&values, user, language.as_deref());
        let normalized =
            collection.validate_record(&prepared, ValidationScope::All, user, language.as_deref())?;

        let id = if collection.is_single() {
            SINGLE_RECORD_ID
        } else {
            self.db().generate_id()?
        };
        let mut record = Record::new(id, normalized);
        record.language = language;
        record.created_by = ctx.user_id();
        record.updated_by = ctx.user_id();

        let name = collection.name();
        self.db().record_transaction(|txn| {
            ctx.check()?;
            if collection.is_single() && txn.get(name, id)?.is_some() {
                return Err(CmsError::Conflict(format!(
                    "single collection '{}' already has its record; use update",
                    name
                ))
                .into());
            }
            reindex(txn, &collection, None, Some(&record))?;
            txn.put(name, &record)?;
            Ok(())
        })?;

        info!("Created record {} in '{}'", id, name);
        Ok(record)
    }

    pub(crate) fn update(
        &self,
        descriptor: &QueryDescriptor,
        values: Map<String, Value>,
        ctx: &OperationContext,
        many: bool,
    ) -> CmsResult<Vec<Record>> {
        let collection = self.registry().collection(&descriptor.collection)?;
        check_input(&collection, &values)?;
        if values.is_empty() {
            return Err(CmsError::InvalidQuery("update needs at least one field".to_string()));
        }
        let compiled = self.compile(descriptor)?;
        require_selector(&compiled, many, "update")?;
        ctx.check()?;

        let name = collection.name();
        let scope: BTreeSet<String> = values.keys().cloned().collect();
        let synced: Vec<&String> = collection
            .synced_fields()
            .iter()
            .filter(|field| scope.contains(*field))
            .collect();
        let user = ctx.user.as_ref();

        let updated = self.db().record_transaction(|txn| {
            ctx.check()?;
            let now = Utc::now();
            let all = txn.all(name)?;
            let mut matched: Vec<(Option<Record>, Record)> = candidates(&compiled, &all)
                .into_iter()
                .map(|record| (Some(record.clone()), record))
                .collect();

            // A single collection that was never written is upserted.
            if collection.is_single() && all.is_empty() {
                let virtual_record = self.virtual_single(&collection, ctx);
                if compiled.predicate.matches(&virtual_record) {
                    matched.push((None, virtual_record));
                }
            }

            let tag = matched.len() > 1;
            let mut errors = ValidationErrors::new();
            let mut writes = Vec::with_capacity(matched.len());
            for (before, current) in matched {
                let mut merged = current.values.clone();
                for (field, value) in &values {
                    merged.insert(field.clone(), value.clone());
                }
                // An upserted single record is checked in full.
                let checked = if before.is_some() {
                    ValidationScope::Fields(&scope)
                } else {
                    ValidationScope::All
                };
                let normalized = match collection.validate_record(&merged, checked, user, current.language.as_deref()) {
                    Ok(normalized) => normalized,
                    Err(e) => {
                        errors.extend(for_record(e, current.id, tag));
                        continue;
                    }
                };
                let immutable = collection.immutable_violations(&current.values, &normalized);
                if !immutable.is_empty() {
                    errors.extend(for_record(immutable, current.id, tag));
                    continue;
                }
                let mut record = current;
                record.values = normalized;
                record.updated_at = now;
                record.updated_by = ctx.user_id();
                writes.push((before, record));
            }
            if !errors.is_empty() {
                return Err(CmsError::Validation(errors).into());
            }

            for (before, record) in &writes {
                reindex(txn, &collection, before.as_ref(), Some(record))?;
                txn.put(name, record)?;
            }

            if collection.is_translatable() && !synced.is_empty() {
                let written: HashSet<u64> = writes.iter().map(|(_, r)| r.id).collect();
                for (_, record) in &writes {
                    for sibling in all
                        .iter()
                        .filter(|s| s.group_id() == record.group_id() && !written.contains(&s.id))
                    {
                        let before = txn.get(name, sibling.id)?.unwrap_or_else(|| sibling.clone());
                        let mut after = before.clone();
                        for field in &synced {
                            let value = record.values.get(*field).cloned().unwrap_or(Value::Null);
                            after.values.insert((*field).clone(), value);
                        }
                        after.updated_at = now;
                        after.updated_by = ctx.user_id();
                        reindex(txn, &collection, Some(&before), Some(&after))?;
                        txn.put(name, &after)?;
                    }
                }
            }

            ctx.check()?;
            Ok(writes.into_iter().map(|(_, record)| record).collect::<Vec<_>>())
        })?;

        info!("Updated {} record(s) in '{}'", updated.len(), name);
        Ok(updated)
    }

    pub(crate) fn delete(
        &self,
        descriptor: &QueryDescriptor,
        ctx: &OperationContext,
        many: bool,
    ) -> CmsResult<Vec<Record>> {
        let compiled = self.compile(descriptor)?;
        require_selector(&compiled, many, "delete")?;
        ctx.check()?;

        let collection = &compiled.collection;
        let name = collection.name();
        let deleted = self.db().record_transaction(|txn| {
            ctx.check()?;
            let all = txn.all(name)?;
            let matched = candidates(&compiled, &all);
            for record in &matched {
                reindex(txn, collection, Some(record), None)?;
                txn.delete(name, record.id)?;
            }
            ctx.check()?;
            Ok(matched)
        })?;

        info!("Deleted {} record(s) from '{}'", deleted.len(), name);
        Ok(deleted)
    }

    /// Add `language` to the translation group of `source_id`.
    ///
    /// Synced and non-translatable fields are copied from the group's
    /// reference record; the rest come from `values` or their defaults.
    pub(crate) fn create_translation(
        &self,
        descriptor: &QueryDescriptor,
        source_id: u64,
        language: &str,
        values: Map<String, Value>,
        ctx: &OperationContext,
    ) -> CmsResult<Record> {
        let collection = self.registry().collection(&descriptor.collection)?;
        if !collection.is_translatable() {
            return Err(CmsError::InvalidQuery(format!(
                "collection '{}' is not translatable",
                collection.name()
            )));
        }
        if language.trim().is_empty() {
            return Err(CmsError::InvalidQuery("translation language must not be empty".to_string()));
        }
        check_input(&collection, &values)?;
        ctx.check()?;

        let name = collection.name();
        let user = ctx.user.as_ref();
        let id = self.db().generate_id()?;

        let record = self.db().record_transaction(|txn| {
            ctx.check()?;
            let source = txn.get(name, source_id)?.ok_or_else(|| {
                CmsError::InvalidQuery(format!("record {} does not exist in '{}'", source_id, name))
            })?;
            let group = source.group_id();
            let reference = match txn.get(name, group)? {
                Some(reference) => reference,
                None => source.clone(),
            };

            let taken = txn
                .all(name)?
                .iter()
                .any(|r| r.group_id() == group && r.language.as_deref() == Some(language));
            if taken {
                return Err(CmsError::Conflict(format!(
                    "record {} already has a '{}' translation",
                    group, language
                ))
                .into());
            }

            let mut input = values.clone();
            for (field, def) in collection.fields() {
                if collection.is_synced(field) || !def.translatable {
                    let value = reference.values.get(field).cloned().unwrap_or(Value::Null);
                    input.insert(field.to_string(), value);
                }
            }
            let prepared = collection.apply_defaults(&input, user, Some(language));
            let normalized = collection
                .validate_record(&prepared, ValidationScope::All, user, Some(language))
                .map_err(CmsError::from)?;

            let mut record = Record::new(id, normalized);
            record.language = Some(language.to_string());
            record.translation_of = Some(group);
            record.created_by = ctx.user_id();
            record.updated_by = ctx.user_id();

            reindex(txn, &collection, None, Some(&record))?;
            txn.put(name, &record)?;
            ctx.check()?;
            Ok(record)
        })?;

        info!(
            "Created '{}' translation {} of record {} in '{}'",
            language, record.id, source_id, name
        );
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{CollectionDefinition, FieldDefinition};
    use serde_json::json;

    #[test]
    fn test_unique_keys_skip_unset_values() {
        let def = CollectionDefinition::multi("posts")
            .field("slug", FieldDefinition::text())
            .index(["slug"], true);
        let collection = Collection::from_definition(def).unwrap();

        let mut record = Record::new(1, Map::new());
        record.values.insert("slug".into(), json!(""));
        assert!(unique_keys(&collection, &record).is_empty());

        record.values.insert("slug".into(), json!("hello"));
        assert_eq!(unique_keys(&collection, &record), vec!["posts/slug/[\"hello\"]".to_string()]);
    }

    #[test]
    fn test_input_must_name_data_fields() {
        let def = CollectionDefinition::multi("posts").field("title", FieldDefinition::text());
        let collection = Collection::from_definition(def).unwrap();

        let mut values = Map::new();
        values.insert("id".into(), json!(3));
        assert!(matches!(check_input(&collection, &values), Err(CmsError::SchemaMismatch { .. })));

        let mut values = Map::new();
        values.insert("body".into(), json!("x"));
        assert!(matches!(check_input(&collection, &values), Err(CmsError::SchemaMismatch { .. })));
    }
}
