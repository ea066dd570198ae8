use serde_json::Value;

use super::common::{FieldContext, FieldDefinition};
use super::variant::FieldKind;

/// Resolves stored references into retrievable payloads (e.g. a file id into
/// its URL and metadata).
///
/// Injected by the host; population never performs storage or network I/O on
/// its own.
pub trait ReferenceResolver: Send + Sync {
    fn resolve_file(&self, id: u64) -> Option<Value>;
}

/// Apply a field's population rules to a stored value.
///
/// File references go through `resolver`; afterwards the field's transform,
/// if any, gets the final say. Relation expansion happens before this, in the
/// population engine, since it needs sub-queries.
pub fn populate(
    def: &FieldDefinition,
    stored: Value,
    ctx: &FieldContext<'_>,
    resolver: Option<&dyn ReferenceResolver>,
) -> Value {
    let resolved = match (&def.kind, resolver) {
        (FieldKind::File, Some(resolver)) => match stored.as_u64() {
            Some(id) => resolver.resolve_file(id).unwrap_or(stored),
            None => stored,
        },
        _ => stored,
    };

    match &def.transform {
        Some(transform) => transform.transform(resolved, ctx),
        None => resolved,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Map};

    struct Uploads;

    impl ReferenceResolver for Uploads {
        fn resolve_file(&self, id: u64) -> Option<Value> {
            (id == 3).then(|| json!({ "id": 3, "url": "/uploads/cover.png" }))
        }
    }

    fn ctx(record: &Map<String, Value>) -> FieldContext<'_> {
        FieldContext {
            collection: "posts",
            field: "cover",
            record,
            user: None,
            language: Some("en"),
        }
    }

    #[test]
    fn test_file_reference_resolves_through_resolver() {
        let record = Map::new();
        let def = FieldDefinition::file();

        let populated = populate(&def, json!(3), &ctx(&record), Some(&Uploads));
        assert_eq!(populated["url"], "/uploads/cover.png");

        // Unknown ids and missing resolvers leave the identifier in place.
        assert_eq!(populate(&def, json!(9), &ctx(&record), Some(&Uploads)), json!(9));
        assert_eq!(populate(&def, json!(3), &ctx(&record), None), json!(3));
    }

    #[test]
    fn test_transform_applies_after_resolution() {
        let record = Map::new();
        let def = FieldDefinition::text().with_transform(|value: Value, ctx: &FieldContext<'_>| {
            json!(format!("{}:{}", ctx.language.unwrap_or("-"), value.as_str().unwrap_or_default()))
        });
        assert_eq!(populate(&def, json!("hello"), &ctx(&record), None), json!("en:hello"));
    }
}
