#![allow(dead_code)]

use safestore_core::{
    Attached, AttributeDescription, AttributeType, Bundle, ContextRegistry, CreateConfig, DatabaseConfig,
    EntityDescription, EntityType, FetchConfig, ManagedObject, Model, SafeStore, StoreKind,
};
use std::sync::Arc;

pub const MODEL_NAME: &str = "UnitTestModel";

pub struct UnitTestEntity;

impl EntityType for UnitTestEntity {
    const ENTITY_NAME: &'static str = "UnitTestEntity";
}

pub struct UnitTestChildEntity;

impl EntityType for UnitTestChildEntity {
    const ENTITY_NAME: &'static str = "UnitTestChildEntity";
}

pub struct SpecialUnitTestEntity;

impl EntityType for SpecialUnitTestEntity {
    const ENTITY_NAME: &'static str = "SpecialUnitTestEntity";
}

pub struct StrictEntity;

impl EntityType for StrictEntity {
    const ENTITY_NAME: &'static str = "StrictEntity";
}

/// Not declared by the test model.
pub struct GhostEntity;

impl EntityType for GhostEntity {
    const ENTITY_NAME: &'static str = "GhostEntity";
}

pub fn unit_test_model() -> Model {
    Model::new(MODEL_NAME)
        .entity(
            EntityDescription::new("UnitTestEntity")
                .attribute("attributeOne", AttributeType::Text)
                .attribute("attributeTwo", AttributeType::Integer)
                .attribute("score", AttributeType::Double)
                .attribute_with(
                    AttributeDescription::new("active", AttributeType::Boolean).default_value(false),
                )
                .attribute("payload", AttributeType::Binary)
                .to_one_with_inverse("child", "UnitTestChildEntity", "parent"),
        )
        .entity(
            EntityDescription::new("SpecialUnitTestEntity")
                .parent("UnitTestEntity")
                .attribute("special", AttributeType::Text),
        )
        .entity(
            EntityDescription::new("UnitTestChildEntity")
                .attribute("name", AttributeType::Text)
                .to_one_with_inverse("parent", "UnitTestEntity", "child"),
        )
        .entity(
            EntityDescription::new("StrictEntity")
                .attribute_with(AttributeDescription::new("code", AttributeType::Text).required()),
        )
}

/// Private in-memory store; nothing is shared with other tests.
pub fn memory_store() -> SafeStore {
    let config = DatabaseConfig::new(MODEL_NAME, Bundle::model(unit_test_model()))
        .store_kind(StoreKind::Memory);
    SafeStore::open_with_registry(config, Arc::new(ContextRegistry::new())).unwrap()
}

pub fn create_entity(
    store: &SafeStore,
    attribute_one: &str,
    attribute_two: i64,
) -> Attached<ManagedObject<UnitTestEntity>> {
    let attribute_one = attribute_one.to_string();
    store
        .create::<UnitTestEntity>(&CreateConfig::default(), move |draft| {
            draft
                .set("attributeOne", attribute_one)
                .set("attributeTwo", attribute_two);
        })
        .wait()
        .into_attached()
        .unwrap()
}

pub fn count_all<T: EntityType>(store: &SafeStore) -> usize {
    store
        .fetch::<T>(&FetchConfig::default())
        .wait()
        .into_result()
        .unwrap()
        .len()
}
