use datafold_cms::schema::{CollectionMode, SchemaError, SchemaRegistry};
use serde_json::json;

mod common;

#[test]
fn test_load_from_json_keeps_declaration_order() {
    let registry = SchemaRegistry::from_json(
        &json!([
            {
                "name": "pages",
                "translatable": true,
                "fields": {
                    "title": { "type": "text", "required": true },
                    "layout": { "type": "select", "choices": ["full", "sidebar"], "default": "full" },
                    "sidebar": { "type": "editor" },
                    "parent": { "type": "record", "collection": "pages" }
                },
                "syncedFields": ["layout"],
                "conditionalLogic": { "sidebar": { "layout": "sidebar" } },
                "indexes": [{ "fields": ["title"], "unique": true }]
            },
            { "name": "settings", "mode": "single", "fields": { "siteName": { "type": "text" } } }
        ])
        .to_string(),
    )
    .unwrap();

    assert_eq!(registry.names().collect::<Vec<_>>(), vec!["pages", "settings"]);
    let pages = registry.collection("pages").unwrap();
    let names: Vec<&str> = pages.fields().map(|(name, _)| name).collect();
    assert_eq!(names, vec!["title", "layout", "sidebar", "parent"]);
    assert!(pages.is_synced("layout"));
    assert_eq!(pages.unique_indexes().count(), 1);
    assert_eq!(registry.collection("settings").unwrap().mode(), CollectionMode::Single);
}

#[test]
fn test_every_load_error_is_reported() {
    // Raw text: a JSON object literal cannot carry the repeated key.
    let input = r#"[
        {
            "name": "posts",
            "fields": {
                "title": { "type": "text" },
                "title": { "type": "number" },
                "createdAt": { "type": "text" }
            },
            "syncedFields": ["title"]
        },
        { "name": "comments", "fields": { "author": { "type": "record", "collection": "people" } } },
        { "name": "comments", "fields": {} }
    ]"#;
    let err = SchemaRegistry::from_json(input).unwrap_err();

    let errors = err.errors();
    assert_eq!(errors.len(), 5);
    assert!(errors.iter().any(|e| matches!(e, SchemaError::DuplicateField { field, .. } if field == "title")));
    assert!(errors.iter().any(|e| matches!(e, SchemaError::InvalidField { field, .. } if field == "createdAt")));
    assert!(errors.iter().any(|e| matches!(e, SchemaError::InvalidSyncedField { .. })));
    assert!(errors.iter().any(|e| matches!(e, SchemaError::DuplicateCollection(name) if name == "comments")));
    assert!(errors
        .iter()
        .any(|e| matches!(e, SchemaError::UnknownRelation { target, .. } if target == "people")));
}

#[test]
fn test_conditional_cycle_fails_at_load() {
    let err = SchemaRegistry::from_json(
        &json!([{
            "name": "forms",
            "fields": {
                "a": { "type": "switch" },
                "b": { "type": "switch" },
                "c": { "type": "text" }
            },
            "conditionalLogic": {
                "a": { "b": true },
                "b": { "$some": [{ "a": true }, { "c": "x" }] }
            }
        }])
        .to_string(),
    )
    .unwrap_err();

    match err {
        SchemaError::ConditionCycle { collection, fields } => {
            assert_eq!(collection, "forms");
            assert_eq!(fields, vec!["a".to_string(), "b".to_string()]);
        }
        other => panic!("expected a cycle, got {other}"),
    }
}

#[test]
fn test_unknown_condition_operator_is_malformed() {
    let err = SchemaRegistry::from_json(
        &json!([{
            "name": "forms",
            "fields": { "a": { "type": "switch" }, "b": { "type": "text" } },
            "conditionalLogic": { "b": { "$none": [] } }
        }])
        .to_string(),
    )
    .unwrap_err();
    assert!(matches!(err, SchemaError::Malformed(_)));
}

#[test]
fn test_fixture_schema_loads() {
    let registry = common::blog_schema();
    assert_eq!(registry.len(), 4);
    let posts = registry.collection("posts").unwrap();
    assert!(posts.is_translatable());
    assert!(posts.has_field("createdAt"));
    assert!(!posts.field("featured").unwrap().translatable);
}
