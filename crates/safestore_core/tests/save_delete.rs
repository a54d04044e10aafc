mod common;

use common::{count_all, create_entity, memory_store, UnitTestChildEntity, UnitTestEntity};
use safestore_core::{
    Concurrency, CreateConfig, ErrorKind, FetchConfig, ManagedObject, SafeStore, SafeStoreError,
};

fn fetch_all(store: &SafeStore) -> safestore_core::Attached<Vec<ManagedObject<UnitTestEntity>>> {
    store
        .fetch::<UnitTestEntity>(&FetchConfig::default())
        .wait()
        .into_attached()
        .unwrap()
}

#[test]
fn save_is_idempotent() {
    let store = memory_store();
    let created = create_entity(&store, "same", 3);
    created.save().wait().into_result().unwrap();
    created.save().wait().into_result().unwrap();

    let fetched = fetch_all(&store);
    assert_eq!(fetched.len(), 1);
    assert_eq!(fetched[0].text("attributeOne").unwrap().as_deref(), Some("same"));
    assert_eq!(fetched[0].integer("attributeTwo").unwrap(), Some(3));
}

#[test]
fn save_persists_changes_of_fetched_object() {
    let store = memory_store();
    create_entity(&store, "before", 1);

    let fetched = fetch_all(&store);
    fetched[0].set("attributeOne", "after").unwrap();
    fetched[0].set("payload", vec![1_u8, 2, 3]).unwrap();
    assert!(fetched[0].has_changes().unwrap());
    fetched[0].save().wait().into_result().unwrap();
    assert!(!fetched[0].has_changes().unwrap());
    assert!(!store.shared_context().has_changes());

    let again = fetch_all(&store);
    assert_eq!(again[0].text("attributeOne").unwrap().as_deref(), Some("after"));
    assert_eq!(again[0].binary("payload").unwrap(), Some(vec![1, 2, 3]));
}

#[test]
fn save_with_invalid_value_fails_with_fail_save_and_keeps_store_intact() {
    let store = memory_store();
    let created = create_entity(&store, "valid", 1);
    created.set("attributeTwo", "text").unwrap();
    let err = created.save().wait().into_result().unwrap_err();
    assert!(matches!(err, SafeStoreError::FailSave(_)));

    let fetched = fetch_all(&store);
    assert_eq!(fetched[0].integer("attributeTwo").unwrap(), Some(1));
}

#[test]
fn delete_then_fetch_returns_nothing() {
    let store = memory_store();
    create_entity(&store, "doomed", 1);

    let fetched = fetch_all(&store);
    assert_eq!(fetched.len(), 1);
    fetched[0].delete().wait().into_result().unwrap();
    assert!(fetched[0].is_detached());

    assert_eq!(count_all::<UnitTestEntity>(&store), 0);
}

#[test]
fn deleted_object_no_longer_belongs_to_a_context() {
    let store = memory_store();
    let created = create_entity(&store, "gone", 1);
    created.delete().wait().into_result().unwrap();

    assert_eq!(
        created.save().wait().into_result().unwrap_err().kind(),
        ErrorKind::FailGetContext
    );
    assert_eq!(
        created.text("attributeOne").unwrap_err().kind(),
        ErrorKind::FailGetContext
    );
}

#[test]
fn deleting_a_child_clears_the_parent_reference() {
    let store = memory_store();
    let parent = store
        .create::<UnitTestEntity>(&CreateConfig::default(), |draft| {
            draft.create_related::<UnitTestChildEntity>("child", |_| {});
        })
        .wait()
        .into_attached()
        .unwrap();
    let child = parent.related::<UnitTestChildEntity>("child").unwrap().unwrap();
    child.delete().wait().into_result().unwrap();

    assert!(parent.related::<UnitTestChildEntity>("child").unwrap().is_none());
    assert!(!parent.has_changes().unwrap());
    assert_eq!(count_all::<UnitTestChildEntity>(&store), 0);

    let fetched = fetch_all(&store);
    assert!(fetched[0].related::<UnitTestChildEntity>("child").unwrap().is_none());
}

#[test]
fn stale_handles_fail_with_fail_get_context() {
    let store = memory_store();
    let detached = {
        let created = create_entity(&store, "stale", 1);
        (*created).clone()
    };
    assert!(detached.is_detached());

    for result in [
        detached.save().wait().into_result(),
        detached.delete().wait().into_result(),
    ] {
        assert_eq!(result.unwrap_err().kind(), ErrorKind::FailGetContext);
    }
    assert_eq!(
        detached.set("attributeOne", "x").unwrap_err().kind(),
        ErrorKind::FailGetContext
    );
    assert_eq!(count_all::<UnitTestEntity>(&store), 1);
}

#[test]
fn related_objects_must_share_a_context() {
    let store = memory_store();
    let parent = create_entity(&store, "parent", 1);
    let stranger = store
        .create::<UnitTestChildEntity>(&CreateConfig::default(), |_| {})
        .wait()
        .into_attached()
        .unwrap();
    let err = parent
        .set_related("child", Some(&*stranger))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::FailGetContext);

    let kid = parent
        .create_related::<UnitTestChildEntity>("child", |draft| {
            draft.set("name", "late");
        })
        .unwrap();
    assert!(parent.has_changes().unwrap());
    parent.save().concurrency(Concurrency::Sync).wait().into_result().unwrap();
    assert!(kid.object_id().unwrap().is_some());
    assert_eq!(count_all::<UnitTestChildEntity>(&store), 2);
}
