//! CLI smoke entry point.
//!
//! # Responsibility
//! - Verify `safestore_core` linkage with one create and one fetch.
//! - Keep output deterministic for quick local sanity checks.

use safestore_core::{
    AttributeType, Bundle, CreateConfig, DatabaseConfig, EntityDescription, EntityType,
    FetchConfig, Model, SafeStore, SafeStoreError, StoreKind,
};

struct Probe;

impl EntityType for Probe {
    const ENTITY_NAME: &'static str = "Probe";
}

fn run() -> Result<usize, SafeStoreError> {
    let model = Model::new("SmokeModel")
        .entity(EntityDescription::new("Probe").attribute("label", AttributeType::Text));
    let config =
        DatabaseConfig::new("SmokeModel", Bundle::model(model)).store_kind(StoreKind::Memory);
    let store = SafeStore::open(config)?;

    store
        .create::<Probe>(&CreateConfig::default(), |draft| {
            draft.set("label", "smoke");
        })
        .wait()
        .into_result()?;
    let fetched = store
        .fetch::<Probe>(&FetchConfig::default())
        .wait()
        .into_result()?;
    Ok(fetched.len())
}

fn main() {
    println!("safestore_core version={}", safestore_core::core_version());
    match run() {
        Ok(count) => println!("safestore_core smoke status=ok fetched={count}"),
        Err(err) => {
            eprintln!("safestore_core smoke status=error error={err}");
            std::process::exit(1);
        }
    }
}
