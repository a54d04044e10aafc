//! Store attach for each supported store kind.
//!
//! # Responsibility
//! - Open file, in-memory or snapshot-backed SQLite connections.
//! - Configure connection pragmas and bring the schema up to date.
//!
//! # Invariants
//! - A returned store has its schema prepared for the given model.
//! - Snapshot files are replaced atomically (write temp, then rename).

use super::predicate::register_functions;
use super::schema::prepare_schema;
use super::{StoreError, StoreResult};
use crate::config::{DatabaseConfig, PrintType, StoreKind};
use crate::model::Model;
use log::{error, info};
use rusqlite::backup::Progress;
use rusqlite::{Connection, DatabaseName};
use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Where a store's data lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreLocation {
    Memory,
    File(PathBuf),
    /// In-memory working copy persisted to a snapshot file.
    Snapshot(PathBuf),
}

impl StoreLocation {
    pub fn path(&self) -> Option<&Path> {
        match self {
            Self::Memory => None,
            Self::File(path) | Self::Snapshot(path) => Some(path.as_path()),
        }
    }
}

impl Display for StoreLocation {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Memory => f.write_str(":memory:"),
            Self::File(path) | Self::Snapshot(path) => write!(f, "{}", path.display()),
        }
    }
}

pub(crate) struct AttachedStore {
    pub conn: Connection,
    pub location: StoreLocation,
    pub store_id: Uuid,
}

impl AttachedStore {
    /// Persists the working copy of snapshot-backed stores.
    pub fn persist_snapshot(&self) -> StoreResult<()> {
        match &self.location {
            StoreLocation::Snapshot(path) => write_snapshot(&self.conn, path),
            StoreLocation::Memory | StoreLocation::File(_) => Ok(()),
        }
    }
}

/// Attaches the store described by `config` for `model`.
///
/// # Side effects
/// - Creates the store file or snapshot when missing.
/// - Emits `store_attach` logging events with duration and status.
pub(crate) fn attach(config: &DatabaseConfig, model: &Model) -> StoreResult<AttachedStore> {
    let started_at = Instant::now();
    let kind = config.kind().label().to_string();
    info!("event=store_attach module=store status=start kind={kind}");

    match attach_inner(config, model) {
        Ok(store) => {
            info!(
                "event=store_attach module=store status=ok kind={kind} store_id={} duration_ms={}",
                store.store_id,
                started_at.elapsed().as_millis()
            );
            for print in config.print_type_list() {
                match print {
                    PrintType::StorePath { prefix, postfix } => {
                        info!("{prefix}{}{postfix}", store.location);
                    }
                }
            }
            Ok(store)
        }
        Err(err) => {
            error!(
                "event=store_attach module=store status=error kind={kind} duration_ms={} error={}",
                started_at.elapsed().as_millis(),
                err
            );
            Err(err)
        }
    }
}

fn attach_inner(config: &DatabaseConfig, model: &Model) -> StoreResult<AttachedStore> {
    let (mut conn, location) = match config.kind() {
        StoreKind::Memory => (Connection::open_in_memory()?, StoreLocation::Memory),
        StoreKind::Sqlite => {
            let path = config.store_path();
            ensure_parent(&path)?;
            let conn = Connection::open(&path)?;
            conn.pragma_update_and_check(None, "journal_mode", config.journal_mode(), |row| {
                row.get::<_, String>(0)
            })?;
            (conn, StoreLocation::File(path))
        }
        StoreKind::Binary => {
            let path = config.store_path();
            ensure_parent(&path)?;
            let mut conn = Connection::open_in_memory()?;
            if path.is_file() {
                conn.restore(DatabaseName::Main, &path, None::<fn(Progress)>)?;
            }
            (conn, StoreLocation::Snapshot(path))
        }
        StoreKind::Custom(name) => return Err(StoreError::UnsupportedStoreKind(name.clone())),
    };

    conn.busy_timeout(Duration::from_millis(config.busy_timeout_ms()))?;
    register_functions(&conn)?;
    let store_id = prepare_schema(&mut conn, model, config.migrate_automatically())?;

    let store = AttachedStore {
        conn,
        location,
        store_id,
    };
    store.persist_snapshot()?;
    Ok(store)
}

fn ensure_parent(path: &Path) -> StoreResult<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}

fn write_snapshot(conn: &Connection, path: &Path) -> StoreResult<()> {
    let mut temp = path.as_os_str().to_owned();
    temp.push(".tmp");
    let temp = PathBuf::from(temp);
    if temp.exists() {
        std::fs::remove_file(&temp)?;
    }
    conn.backup(DatabaseName::Main, &temp, None)?;
    std::fs::rename(&temp, path)?;
    Ok(())
}
