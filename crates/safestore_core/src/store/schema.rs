//! Store schema bootstrap and additive migration.
//!
//! # Invariants
//! - The store remembers the model version that last wrote it.
//! - A store written by a newer model version is never opened.
//! - Tables and columns are only ever added, never dropped.

use super::sql::{quote_ident, ENTITY_COLUMN, METADATA_TABLE, PK_COLUMN};
use super::{StoreError, StoreResult};
use crate::model::Model;
use log::info;
use rusqlite::{params, Connection, OptionalExtension, Transaction};
use std::collections::HashSet;
use uuid::Uuid;

const KEY_STORE_UUID: &str = "store_uuid";
const KEY_MODEL_NAME: &str = "model_name";
const KEY_MODEL_VERSION: &str = "model_version";

/// Brings the store schema in line with `model` and returns the store id.
pub(crate) fn prepare_schema(
    conn: &mut Connection,
    model: &Model,
    migrate_automatically: bool,
) -> StoreResult<Uuid> {
    let tx = conn.transaction()?;
    tx.execute_batch(&format!(
        "CREATE TABLE IF NOT EXISTS {} (key TEXT PRIMARY KEY NOT NULL, value TEXT NOT NULL);",
        quote_ident(METADATA_TABLE)
    ))?;

    let stored_version = read_metadata(&tx, KEY_MODEL_VERSION)?
        .map(|raw| {
            raw.parse::<u32>().map_err(|err| {
                StoreError::InvalidData(format!("stored model version `{raw}`: {err}"))
            })
        })
        .transpose()?;
    if let Some(store_version) = stored_version {
        if store_version > model.version {
            return Err(StoreError::UnsupportedSchemaVersion {
                store_version,
                model_version: model.version,
            });
        }
    }
    let fresh = stored_version.is_none();

    let mut changes = Vec::new();
    for root in model.root_entities() {
        let existing = table_columns(&tx, &root.name)?;
        let wanted = model.table_columns(&root.name);
        if existing.is_empty() {
            changes.push(format!("create table `{}`", root.name));
            if fresh || migrate_automatically {
                create_table(&tx, model, &root.name)?;
            }
            continue;
        }
        for column in wanted {
            if existing.contains(&column.name) {
                continue;
            }
            changes.push(format!("add column `{}.{}`", root.name, column.name));
            if fresh || migrate_automatically {
                tx.execute_batch(&format!(
                    "ALTER TABLE {} ADD COLUMN {} {};",
                    quote_ident(&root.name),
                    quote_ident(&column.name),
                    column.sql_type()
                ))?;
            }
        }
    }
    if !fresh && !migrate_automatically && !changes.is_empty() {
        return Err(StoreError::MigrationRequired(changes.join(", ")));
    }

    let store_id = match read_metadata(&tx, KEY_STORE_UUID)? {
        Some(raw) => Uuid::parse_str(&raw)
            .map_err(|err| StoreError::InvalidData(format!("stored store uuid `{raw}`: {err}")))?,
        None => {
            let id = Uuid::new_v4();
            write_metadata(&tx, KEY_STORE_UUID, &id.to_string())?;
            id
        }
    };
    write_metadata(&tx, KEY_MODEL_NAME, &model.name)?;
    write_metadata(&tx, KEY_MODEL_VERSION, &model.version.to_string())?;
    tx.commit()?;

    if !changes.is_empty() {
        info!(
            "event=store_migrate module=store status=ok model={} version={} changes={}",
            model.name,
            model.version,
            changes.len()
        );
    }
    Ok(store_id)
}

fn create_table(tx: &Transaction<'_>, model: &Model, root: &str) -> StoreResult<()> {
    let mut columns = vec![
        format!("{} INTEGER PRIMARY KEY", quote_ident(PK_COLUMN)),
        format!("{} TEXT NOT NULL", quote_ident(ENTITY_COLUMN)),
    ];
    columns.extend(
        model
            .table_columns(root)
            .iter()
            .map(|column| format!("{} {}", quote_ident(&column.name), column.sql_type())),
    );
    tx.execute_batch(&format!(
        "CREATE TABLE {table} ({columns});
         CREATE INDEX IF NOT EXISTS {index} ON {table} ({ent});",
        table = quote_ident(root),
        columns = columns.join(", "),
        index = quote_ident(&format!("_idx_{root}_ent")),
        ent = quote_ident(ENTITY_COLUMN),
    ))?;
    Ok(())
}

fn table_columns(tx: &Transaction<'_>, table: &str) -> StoreResult<HashSet<String>> {
    let mut stmt = tx.prepare("SELECT name FROM pragma_table_info(?1);")?;
    let mut rows = stmt.query([table])?;
    let mut names = HashSet::new();
    while let Some(row) = rows.next()? {
        names.insert(row.get::<_, String>(0)?);
    }
    Ok(names)
}

fn read_metadata(tx: &Transaction<'_>, key: &str) -> StoreResult<Option<String>> {
    let sql = format!(
        "SELECT value FROM {} WHERE key = ?1;",
        quote_ident(METADATA_TABLE)
    );
    Ok(tx
        .query_row(&sql, [key], |row| row.get::<_, String>(0))
        .optional()?)
}

fn write_metadata(tx: &Transaction<'_>, key: &str, value: &str) -> StoreResult<()> {
    let sql = format!(
        "INSERT INTO {} (key, value) VALUES (?1, ?2)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value;",
        quote_ident(METADATA_TABLE)
    );
    tx.execute(&sql, params![key, value])?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::prepare_schema;
    use crate::model::{AttributeType, EntityDescription, Model};
    use crate::store::StoreError;
    use rusqlite::Connection;

    fn model(version: u32, with_extra: bool) -> Model {
        let mut item = EntityDescription::new("Item").attribute("title", AttributeType::Text);
        if with_extra {
            item = item.attribute("rank", AttributeType::Integer);
        }
        Model::new("M").version(version).entity(item)
    }

    #[test]
    fn fresh_store_gets_tables_and_stable_uuid() {
        let mut conn = Connection::open_in_memory().unwrap();
        let first = prepare_schema(&mut conn, &model(1, false), false).unwrap();
        let second = prepare_schema(&mut conn, &model(1, false), false).unwrap();
        assert_eq!(first, second);

        conn.execute(
            "INSERT INTO \"Item\" (\"_pk\", \"_ent\", \"title\") VALUES (1, 'Item', 'x');",
            [],
        )
        .unwrap();
    }

    #[test]
    fn new_columns_are_added_when_migration_is_enabled() {
        let mut conn = Connection::open_in_memory().unwrap();
        prepare_schema(&mut conn, &model(1, false), true).unwrap();
        prepare_schema(&mut conn, &model(2, true), true).unwrap();
        conn.execute(
            "INSERT INTO \"Item\" (\"_pk\", \"_ent\", \"rank\") VALUES (1, 'Item', 3);",
            [],
        )
        .unwrap();
    }

    #[test]
    fn missing_columns_require_migration_when_disabled() {
        let mut conn = Connection::open_in_memory().unwrap();
        prepare_schema(&mut conn, &model(1, false), false).unwrap();
        let err = prepare_schema(&mut conn, &model(2, true), false).unwrap_err();
        assert!(matches!(err, StoreError::MigrationRequired(_)));
    }

    #[test]
    fn newer_store_version_is_rejected() {
        let mut conn = Connection::open_in_memory().unwrap();
        prepare_schema(&mut conn, &model(3, false), true).unwrap();
        let err = prepare_schema(&mut conn, &model(2, false), true).unwrap_err();
        assert!(matches!(
            err,
            StoreError::UnsupportedSchemaVersion {
                store_version: 3,
                model_version: 2
            }
        ));
    }
}
