mod common;

use common::{
    count_all, create_entity, memory_store, GhostEntity, SpecialUnitTestEntity,
    UnitTestChildEntity, UnitTestEntity,
};
use safestore_core::{
    predicate, CreateConfig, ErrorKind, FetchConfig, Predicate, RemoveConfig,
};
use std::collections::HashSet;

#[test]
fn remove_without_filter_deletes_everything() {
    let store = memory_store();
    let created = store
        .create_list::<UnitTestEntity, usize>(&CreateConfig::default(), 0..300, |draft, index| {
            draft.set("attributeTwo", index as i64);
        })
        .wait()
        .into_attached()
        .unwrap();
    let created_ids: HashSet<_> = created
        .iter()
        .map(|object| object.object_id().unwrap().unwrap())
        .collect();

    let removed = store
        .remove::<UnitTestEntity>(&RemoveConfig::default())
        .wait()
        .into_result()
        .unwrap();
    assert_eq!(removed.len(), 300);
    assert_eq!(removed.into_iter().collect::<HashSet<_>>(), created_ids);
    assert_eq!(count_all::<UnitTestEntity>(&store), 0);
}

#[test]
fn bulk_create_and_remove_of_thirty_thousand_rows() {
    let store = memory_store();
    let created = store
        .create_list::<UnitTestEntity, usize>(&CreateConfig::default(), 0..30_000, |draft, index| {
            draft.set("attributeOne", "bulk");
            draft.set("attributeTwo", index as i64);
        })
        .wait()
        .into_result()
        .unwrap();
    assert_eq!(created.len(), 30_000);

    let fetched = count_all::<UnitTestEntity>(&store);
    assert_eq!(fetched, 30_000);

    let removed = store
        .remove::<UnitTestEntity>(&RemoveConfig::default())
        .wait()
        .into_result()
        .unwrap();
    assert_eq!(removed.len(), fetched);
    assert_eq!(count_all::<UnitTestEntity>(&store), 0);
}

#[test]
fn remove_not_equal_leaves_only_the_matching_row() {
    let store = memory_store();
    for index in 0..10 {
        create_entity(&store, "row", index);
    }
    store
        .remove::<UnitTestEntity>(&RemoveConfig::new().filter(predicate!("attributeTwo != %d", 7)))
        .wait()
        .into_result()
        .unwrap();

    let remaining = store
        .fetch::<UnitTestEntity>(&FetchConfig::default())
        .wait()
        .into_attached()
        .unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].integer("attributeTwo").unwrap(), Some(7));
}

#[test]
fn remove_honours_filter() {
    let store = memory_store();
    for index in 0..6 {
        create_entity(&store, "row", index);
    }
    let removed = store
        .remove::<UnitTestEntity>(&RemoveConfig::new().filter(predicate!("attributeTwo < %d", 2)))
        .wait()
        .into_result()
        .unwrap();
    assert_eq!(removed.len(), 2);

    let remaining = store
        .fetch::<UnitTestEntity>(&FetchConfig::default())
        .wait()
        .into_attached()
        .unwrap();
    let values: Vec<_> = remaining
        .iter()
        .map(|object| object.integer("attributeTwo").unwrap().unwrap())
        .collect();
    assert_eq!(values, vec![2, 3, 4, 5]);
}

#[test]
fn remove_of_parent_entity_includes_sub_entities() {
    let store = memory_store();
    create_entity(&store, "plain", 1);
    store
        .create::<SpecialUnitTestEntity>(&CreateConfig::default(), |draft| {
            draft.set("special", "x");
        })
        .wait()
        .into_result()
        .unwrap();

    let removed = store
        .remove::<SpecialUnitTestEntity>(&RemoveConfig::default())
        .wait()
        .into_result()
        .unwrap();
    assert_eq!(removed.len(), 1);
    assert_eq!(removed[0].entity(), "SpecialUnitTestEntity");
    assert_eq!(count_all::<UnitTestEntity>(&store), 1);

    let removed = store
        .remove_request::<UnitTestEntity>()
        .execute()
        .wait()
        .into_result()
        .unwrap();
    assert_eq!(removed.len(), 1);
}

#[test]
fn remove_nullifies_references_to_deleted_rows() {
    let store = memory_store();
    store
        .create::<UnitTestEntity>(&CreateConfig::default(), |draft| {
            draft.create_related::<UnitTestChildEntity>("child", |child| {
                child.set("name", "kid");
            });
        })
        .wait()
        .into_result()
        .unwrap();

    store
        .remove::<UnitTestChildEntity>(&RemoveConfig::default())
        .wait()
        .into_result()
        .unwrap();

    let parents = store
        .fetch::<UnitTestEntity>(&FetchConfig::default())
        .wait()
        .into_attached()
        .unwrap();
    assert!(parents[0]
        .related::<UnitTestChildEntity>("child")
        .unwrap()
        .is_none());
}

#[test]
fn remove_failures_map_to_fail_remove() {
    let store = memory_store();
    let err = store
        .remove::<UnitTestEntity>(&RemoveConfig::new().filter(Predicate::format("nope == 1")))
        .wait()
        .into_result()
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::FailRemove);

    let err = store
        .remove::<GhostEntity>(&RemoveConfig::default())
        .wait()
        .into_result()
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::FailRemove);
}
