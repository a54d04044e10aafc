mod common;

use common::{create_entity, memory_store, GhostEntity, SpecialUnitTestEntity, UnitTestEntity};
use safestore_core::{
    predicate, CreateConfig, ErrorKind, FetchConfig, ManagedObject, Predicate, SafeStore,
    SortDescriptor,
};

fn seed(store: &SafeStore) {
    store
        .create_list::<UnitTestEntity, i64>(&CreateConfig::default(), 1..=10, |draft, index| {
            draft
                .set("attributeOne", format!("name-{index:02}"))
                .set("attributeTwo", index % 4);
        })
        .wait()
        .into_result()
        .unwrap();
}

fn names(objects: &[ManagedObject<UnitTestEntity>]) -> Vec<String> {
    objects
        .iter()
        .map(|object| object.text("attributeOne").unwrap().unwrap())
        .collect()
}

#[test]
fn fetch_filters_by_predicate() {
    let store = memory_store();
    seed(&store);

    let matched = store
        .fetch::<UnitTestEntity>(&FetchConfig::new().filter(Predicate::format("attributeTwo == 3")))
        .wait()
        .into_attached()
        .unwrap();
    assert_eq!(names(&matched), vec!["name-03", "name-07"]);

    let matched = store
        .fetch::<UnitTestEntity>(
            &FetchConfig::new()
                .filter(predicate!("attributeTwo >= %d AND attributeOne ENDSWITH %@", 2, "9")),
        )
        .wait()
        .into_attached()
        .unwrap();
    assert!(matched.is_empty());

    let matched = store
        .fetch::<UnitTestEntity>(&FetchConfig::new().filter(Predicate::format(
            "attributeTwo IN {0, 2} AND NOT (attributeOne == 'name-10')",
        )))
        .wait()
        .into_attached()
        .unwrap();
    assert_eq!(names(&matched), vec!["name-02", "name-04", "name-06", "name-08"]);
}

#[test]
fn fetch_folds_case_and_diacritics_on_request() {
    let store = memory_store();
    create_entity(&store, "école", 1);
    create_entity(&store, "Ecole", 2);
    create_entity(&store, "lycée", 3);

    let fetch = |filter: Predicate| {
        let matched = store
            .fetch::<UnitTestEntity>(
                &FetchConfig::new()
                    .filter(filter)
                    .sort([SortDescriptor::ascending("attributeTwo")]),
            )
            .wait()
            .into_attached()
            .unwrap();
        names(&matched)
    };

    assert_eq!(fetch(predicate!("attributeOne BEGINSWITH[d] %@", "e")), vec!["école"]);
    assert_eq!(fetch(predicate!("attributeOne BEGINSWITH[c] %@", "É")), vec!["école"]);
    assert_eq!(
        fetch(predicate!("attributeOne ==[cd] %@", "ECOLE")),
        vec!["école", "Ecole"]
    );
    assert_eq!(fetch(predicate!("attributeOne ENDSWITH[d] %@", "ee")), vec!["lycée"]);
}

#[test]
fn fetch_sorts_by_descriptors() {
    let store = memory_store();
    seed(&store);

    let sorted = store
        .fetch::<UnitTestEntity>(&FetchConfig::new().sort([
            SortDescriptor::descending("attributeTwo"),
            SortDescriptor::ascending("attributeOne"),
        ]))
        .wait()
        .into_attached()
        .unwrap();
    assert_eq!(
        names(&sorted),
        vec![
            "name-03", "name-07", "name-02", "name-06", "name-10", "name-01", "name-05",
            "name-09", "name-04", "name-08",
        ]
    );
}

#[test]
fn fetch_applies_offset_limit_and_batches() {
    let store = memory_store();
    seed(&store);
    let base = FetchConfig::new().sort([SortDescriptor::ascending("attributeOne")]);

    let page = store
        .fetch::<UnitTestEntity>(&base.clone().fetch_offset(2).fetch_limit(3))
        .wait()
        .into_attached()
        .unwrap();
    assert_eq!(names(&page), vec!["name-03", "name-04", "name-05"]);

    let batched = store
        .fetch::<UnitTestEntity>(&base.clone().fetch_batch_size(3))
        .wait()
        .into_attached()
        .unwrap();
    let unbatched = store
        .fetch::<UnitTestEntity>(&base.clone())
        .wait()
        .into_attached()
        .unwrap();
    assert_eq!(names(&batched), names(&unbatched));
    assert_eq!(batched.len(), 10);

    let tail = store
        .fetch::<UnitTestEntity>(&base.fetch_offset(8).fetch_limit(5).fetch_batch_size(1))
        .wait()
        .into_attached()
        .unwrap();
    assert_eq!(names(&tail), vec!["name-09", "name-10"]);
}

#[test]
fn fetch_includes_subentities_by_default() {
    let store = memory_store();
    create_entity(&store, "plain", 1);
    store
        .create::<SpecialUnitTestEntity>(&CreateConfig::default(), |draft| {
            draft.set("attributeOne", "special").set("special", "yes");
        })
        .wait()
        .into_result()
        .unwrap();

    let all = store
        .fetch::<UnitTestEntity>(&FetchConfig::default())
        .wait()
        .into_attached()
        .unwrap();
    assert_eq!(all.len(), 2);

    let own = store
        .fetch::<UnitTestEntity>(&FetchConfig::new().includes_subentities(false))
        .wait()
        .into_attached()
        .unwrap();
    assert_eq!(names(&own), vec!["plain"]);

    let special = store
        .fetch::<SpecialUnitTestEntity>(&FetchConfig::default())
        .wait()
        .into_attached()
        .unwrap();
    assert_eq!(special[0].text("special").unwrap().as_deref(), Some("yes"));
}

#[test]
fn malformed_queries_fail_with_fail_fetch_component() {
    let store = memory_store();
    seed(&store);

    for config in [
        FetchConfig::new().filter(Predicate::format("attributeTwo ==")),
        FetchConfig::new().filter(Predicate::format("unknownKey == 1")),
        FetchConfig::new().sort([SortDescriptor::ascending("unknownKey")]),
    ] {
        let result = store.fetch::<UnitTestEntity>(&config).wait();
        let err = result.error().unwrap();
        assert_eq!(err.kind(), ErrorKind::FailFetchComponent);
        assert!(!err.to_string().is_empty());
    }

    let err = store
        .fetch::<GhostEntity>(&FetchConfig::default())
        .wait()
        .into_result()
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::FailFetchComponent);
}

#[test]
fn fetch_request_builder_matches_direct_fetch() {
    let store = memory_store();
    seed(&store);
    let fetched = store
        .fetch_request::<UnitTestEntity>()
        .filter(predicate!("attributeOne BEGINSWITH[c] %@", "NAME-0"))
        .sort([SortDescriptor::descending("attributeOne")])
        .fetch_limit(2)
        .execute()
        .wait()
        .into_attached()
        .unwrap();
    assert_eq!(names(&fetched), vec!["name-09", "name-08"]);
}

#[test]
fn same_row_fetched_twice_in_one_context_shares_state() {
    let store = memory_store();
    create_entity(&store, "shared", 1);
    let fetched = store
        .fetch::<UnitTestEntity>(&FetchConfig::default())
        .wait()
        .into_attached()
        .unwrap();
    fetched[0].set("attributeOne", "changed").unwrap();
    assert!(fetched[0].has_changes().unwrap());
    assert!(fetched.context().has_changes().unwrap());
    assert_eq!(
        fetched[0].text("attributeOne").unwrap().as_deref(),
        Some("changed")
    );
}
