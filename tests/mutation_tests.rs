use datafold_cms::{CancellationFlag, CmsError, Operator, OperationContext, UserContext, ViolationKind};
use serde_json::json;

mod common;
use common::{values, CommonTestFixture};

fn post(fixture: &CommonTestFixture, title: &str, slug: &str) -> u64 {
    fixture
        .cms
        .query("posts")
        .create(values(json!({ "title": title, "slug": slug })))
        .unwrap()
        .id
}

#[test]
fn test_create_fills_defaults_and_system_fields() {
    let fixture = CommonTestFixture::new();
    let ctx = OperationContext::new().with_user(UserContext::new(42));
    let record = fixture
        .cms
        .query("posts")
        .with_context(ctx)
        .create(values(json!({ "title": "  Hello  " })))
        .unwrap();

    assert_eq!(record.values["title"], json!("Hello"));
    assert_eq!(record.values["kind"], json!("news"));
    assert_eq!(record.values["views"], json!(0));
    assert_eq!(record.values["featured"], json!(false));
    assert_eq!(record.values["tags"], json!([]));
    assert_eq!(record.language.as_deref(), Some("en"));
    assert_eq!(record.created_by, Some(42));
    assert_eq!(record.translation_of, None);

    let stored = fixture.cms.query("posts").record(record.id).first().unwrap().unwrap();
    assert_eq!(stored["title"], json!("Hello"));
    assert_eq!(stored["createdBy"], json!(42));
}

#[test]
fn test_validation_errors_are_batched() {
    let fixture = CommonTestFixture::new();
    let err = fixture
        .cms
        .query("posts")
        .create(values(json!({ "title": "", "views": -1, "kind": "essay" })))
        .unwrap_err();

    let violations = err.violations().expect("validation error");
    assert_eq!(violations.len(), 3);
    assert_eq!(violations.for_field("title").unwrap().kind, ViolationKind::Required);
    assert_eq!(violations.for_field("views").unwrap().kind, ViolationKind::Range);
    assert_eq!(violations.for_field("kind").unwrap().kind, ViolationKind::Membership);
    assert_eq!(fixture.cms.query("posts").count().unwrap(), 0);
}

#[test]
fn test_required_only_applies_to_active_fields() {
    let fixture = CommonTestFixture::new();
    let posts = || fixture.cms.query("posts");

    assert!(posts().create(values(json!({ "title": "News", "kind": "news" }))).is_ok());

    let err = posts()
        .create(values(json!({ "title": "Guide", "kind": "guide" })))
        .unwrap_err();
    assert_eq!(err.violations().unwrap().for_field("level").unwrap().kind, ViolationKind::Required);

    assert!(posts()
        .create(values(json!({ "title": "Guide", "kind": "guide", "level": "advanced" })))
        .is_ok());
}

#[test]
fn test_unknown_and_system_fields_are_rejected() {
    let fixture = CommonTestFixture::new();
    let posts = || fixture.cms.query("posts");

    assert!(matches!(
        posts().create(values(json!({ "title": "x", "body": "y" }))),
        Err(CmsError::SchemaMismatch { .. })
    ));
    assert!(matches!(
        posts().create(values(json!({ "title": "x", "createdAt": 0 }))),
        Err(CmsError::SchemaMismatch { .. })
    ));
}

#[test]
fn test_update_validates_only_changed_fields() {
    let fixture = CommonTestFixture::new();
    let id = post(&fixture, "Original", "original");

    let updated = fixture
        .cms
        .query("posts")
        .record(id)
        .update(values(json!({ "views": 12 })))
        .unwrap();
    assert_eq!(updated.len(), 1);
    assert_eq!(updated[0].values["views"], json!(12));
    assert_eq!(updated[0].values["title"], json!("Original"));
    assert!(updated[0].updated_at >= updated[0].created_at);

    // Switching a field on makes its requirement apply.
    let err = fixture
        .cms
        .query("posts")
        .record(id)
        .update(values(json!({ "kind": "guide" })))
        .unwrap_err();
    assert!(err.violations().unwrap().for_field("level").is_some());
}

#[test]
fn test_immutable_fields() {
    let fixture = CommonTestFixture::new();
    let unset = post(&fixture, "No slug yet", "");
    let set = post(&fixture, "Has slug", "has-slug");

    assert!(fixture
        .cms
        .query("posts")
        .record(unset)
        .update(values(json!({ "slug": "first-slug" })))
        .is_ok());

    let err = fixture
        .cms
        .query("posts")
        .record(set)
        .update(values(json!({ "slug": "changed" })))
        .unwrap_err();
    assert_eq!(err.violations().unwrap().for_field("slug").unwrap().kind, ViolationKind::Immutable);
}

#[test]
fn test_unique_index_conflicts_roll_back() {
    let fixture = CommonTestFixture::new();
    post(&fixture, "One", "same");

    let err = fixture
        .cms
        .query("posts")
        .create(values(json!({ "title": "Two", "slug": "same" })))
        .unwrap_err();
    assert!(matches!(err, CmsError::Conflict(_)));
    assert_eq!(fixture.cms.query("posts").count().unwrap(), 1);

    // Blank values are not indexed.
    post(&fixture, "Three", "");
    post(&fixture, "Four", "");
    assert_eq!(fixture.cms.query("posts").count().unwrap(), 3);

    // Deleting frees the key.
    fixture.cms.query("posts").where_("slug", "same").delete().unwrap();
    post(&fixture, "Five", "same");
}

#[test]
fn test_unique_index_on_update() {
    let fixture = CommonTestFixture::new();
    let authors = || fixture.cms.query("authors");
    authors().create(values(json!({ "name": "Ada", "email": "ada@example.com" }))).unwrap();
    let grace = authors()
        .create(values(json!({ "name": "Grace", "email": "grace@example.com" })))
        .unwrap();

    let err = authors()
        .record(grace.id)
        .update(values(json!({ "email": "ada@example.com" })))
        .unwrap_err();
    assert!(matches!(err, CmsError::Conflict(_)));

    // The old key is released when the value changes.
    authors()
        .record(grace.id)
        .update(values(json!({ "email": "hopper@example.com" })))
        .unwrap();
    authors()
        .create(values(json!({ "name": "Other Grace", "email": "grace@example.com" })))
        .unwrap();
}

#[test]
fn test_point_mutations_need_a_selector() {
    let fixture = CommonTestFixture::new();
    post(&fixture, "A", "a");
    post(&fixture, "B", "b");

    assert!(matches!(
        fixture.cms.query("posts").update(values(json!({ "views": 1 }))),
        Err(CmsError::InvalidQuery(_))
    ));
    assert!(matches!(fixture.cms.query("posts").delete(), Err(CmsError::InvalidQuery(_))));

    let updated = fixture
        .cms
        .query("posts")
        .update_many(values(json!({ "views": 5 })))
        .unwrap();
    assert_eq!(updated.len(), 2);
    assert_eq!(fixture.cms.query("posts").where_("views", 5).count().unwrap(), 2);

    let deleted = fixture.cms.query("posts").delete_many().unwrap();
    assert_eq!(deleted.len(), 2);
    assert_eq!(fixture.cms.query("posts").count().unwrap(), 0);
}

#[test]
fn test_multi_record_update_is_all_or_nothing() {
    let fixture = CommonTestFixture::new();
    let ready = fixture
        .cms
        .query("posts")
        .create(values(json!({ "title": "Ready", "level": "beginner" })))
        .unwrap();
    let missing = post(&fixture, "Missing level", "missing");

    let err = fixture
        .cms
        .query("posts")
        .update_many(values(json!({ "kind": "guide" })))
        .unwrap_err();
    let violations = err.violations().unwrap();
    assert_eq!(violations.len(), 1);
    let violation = violations.for_field("level").unwrap();
    assert_eq!(violation.record_id, Some(missing));

    let still_news = fixture.cms.query("posts").where_("kind", "news").count().unwrap();
    assert_eq!(still_news, 2);
    let ready_doc = fixture.cms.query("posts").record(ready.id).first().unwrap().unwrap();
    assert_eq!(ready_doc["kind"], json!("news"));
}

#[test]
fn test_filtered_update_and_delete() {
    let fixture = CommonTestFixture::new();
    for (n, title) in ["Alpha", "Beta", "Gamma"].iter().enumerate() {
        fixture
            .cms
            .query("posts")
            .create(values(json!({ "title": title, "views": n })))
            .unwrap();
    }

    let updated = fixture
        .cms
        .query("posts")
        .where_op("views", Operator::Gte, 1)
        .update(values(json!({ "category": "popular" })))
        .unwrap();
    assert_eq!(updated.len(), 2);

    let deleted = fixture
        .cms
        .query("posts")
        .where_("category", "popular")
        .delete()
        .unwrap();
    assert_eq!(deleted.len(), 2);
    let left = fixture.cms.query("posts").all().unwrap();
    assert_eq!(left.len(), 1);
    assert_eq!(left[0]["title"], json!("Alpha"));
}

#[test]
fn test_cancelled_mutation_changes_nothing() {
    let fixture = CommonTestFixture::new();
    let id = post(&fixture, "Stable", "stable");

    let flag = CancellationFlag::new();
    flag.cancel();
    let err = fixture
        .cms
        .query("posts")
        .record(id)
        .with_context(OperationContext::new().with_cancellation(flag))
        .update(values(json!({ "title": "Changed" })))
        .unwrap_err();
    assert!(matches!(err, CmsError::Cancelled));

    let doc = fixture.cms.query("posts").record(id).first().unwrap().unwrap();
    assert_eq!(doc["title"], json!("Stable"));
}

#[test]
fn test_translations_copy_shared_fields() {
    let fixture = CommonTestFixture::new();
    let source = fixture
        .cms
        .query("posts")
        .create(values(json!({
            "title": "Hello",
            "slug": "hello",
            "featured": true,
            "category": "tech",
        })))
        .unwrap();

    let french = fixture
        .cms
        .query("posts")
        .create_translation(source.id, "fr", values(json!({ "title": "Bonjour", "slug": "hello" })))
        .unwrap();
    assert_eq!(french.language.as_deref(), Some("fr"));
    assert_eq!(french.translation_of, Some(source.id));
    assert_eq!(french.values["title"], json!("Bonjour"));
    assert_eq!(french.values["featured"], json!(true));
    assert_eq!(french.values["category"], json!("tech"));

    // A translation of a translation joins the same group.
    let german = fixture
        .cms
        .query("posts")
        .create_translation(french.id, "de", values(json!({ "title": "Hallo" })))
        .unwrap();
    assert_eq!(german.translation_of, Some(source.id));

    assert!(matches!(
        fixture
            .cms
            .query("posts")
            .create_translation(source.id, "fr", values(json!({ "title": "Encore" }))),
        Err(CmsError::Conflict(_))
    ));
    assert!(matches!(
        fixture
            .cms
            .query("posts")
            .create_translation(9999, "it", values(json!({ "title": "Ciao" }))),
        Err(CmsError::InvalidQuery(_))
    ));
    assert!(matches!(
        fixture
            .cms
            .query("authors")
            .create_translation(1, "fr", values(json!({}))),
        Err(CmsError::InvalidQuery(_))
    ));
}

#[test]
fn test_synced_fields_propagate_across_translations() {
    let fixture = CommonTestFixture::new();
    let source = fixture
        .cms
        .query("posts")
        .create(values(json!({ "title": "Hello", "category": "tech" })))
        .unwrap();
    let french = fixture
        .cms
        .query("posts")
        .create_translation(source.id, "fr", values(json!({ "title": "Bonjour" })))
        .unwrap();
    let unrelated = post(&fixture, "Unrelated", "unrelated");

    fixture
        .cms
        .query("posts")
        .record(source.id)
        .update(values(json!({ "category": "science", "title": "Hello again" })))
        .unwrap();
    let fr = fixture.cms.query("posts").record(french.id).first().unwrap().unwrap();
    assert_eq!(fr["category"], json!("science"));
    assert_eq!(fr["title"], json!("Bonjour"));

    // Propagation also runs from a translation back to its source.
    fixture
        .cms
        .query("posts")
        .record(french.id)
        .update(values(json!({ "category": "art" })))
        .unwrap();
    let en = fixture.cms.query("posts").record(source.id).first().unwrap().unwrap();
    assert_eq!(en["category"], json!("art"));

    let other = fixture.cms.query("posts").record(unrelated).first().unwrap().unwrap();
    assert_eq!(other["category"], json!(""));
}
