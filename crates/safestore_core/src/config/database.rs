//! Logical database description and its cache fingerprint.

use crate::model::Bundle;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Add missing tables/columns when the model grew.
pub const OPTION_MIGRATE_AUTOMATICALLY: &str = "migrate_automatically";
/// Accepted for compatibility; column mapping is always inferred.
pub const OPTION_INFER_MAPPING_AUTOMATICALLY: &str = "infer_mapping_automatically";
/// SQLite journal mode for file stores.
pub const OPTION_JOURNAL_MODE: &str = "journal_mode";
/// Connection busy timeout in milliseconds.
pub const OPTION_BUSY_TIMEOUT_MS: &str = "busy_timeout_ms";

const DEFAULT_JOURNAL_MODE: &str = "WAL";
const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

/// Persistent store flavour.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub enum StoreKind {
    /// SQLite database file.
    #[default]
    Sqlite,
    /// Private in-memory database.
    Memory,
    /// Whole-store snapshot file, loaded on attach and rewritten on commit.
    Binary,
    /// Named store type that this crate cannot attach.
    Custom(String),
}

impl StoreKind {
    pub(crate) fn label(&self) -> &str {
        match self {
            Self::Sqlite => "sqlite",
            Self::Memory => "memory",
            Self::Binary => "binary",
            Self::Custom(name) => name.as_str(),
        }
    }
}

/// Directory the store file is placed in.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub enum SearchPathDirectory {
    /// Process working directory.
    #[default]
    Current,
    /// `std::env::temp_dir()`.
    Temporary,
    Custom(PathBuf),
}

impl SearchPathDirectory {
    pub fn resolve(&self) -> PathBuf {
        match self {
            Self::Current => PathBuf::from("."),
            Self::Temporary => std::env::temp_dir(),
            Self::Custom(path) => path.clone(),
        }
    }
}

/// Diagnostic output emitted when a store is attached.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PrintType {
    /// Logs the store location wrapped in `prefix` and `postfix`.
    StorePath { prefix: String, postfix: String },
}

impl PrintType {
    pub fn store_path() -> Self {
        Self::StorePath {
            prefix: String::new(),
            postfix: String::new(),
        }
    }
}

/// Identifies one logical database.
///
/// Two configurations with the same [`ConfigKey`] share one
/// [`SharedContext`](crate::SharedContext).
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    model_name: String,
    bundle: Bundle,
    model_version: Option<u32>,
    store_kind: StoreKind,
    file_name: Option<String>,
    directory: SearchPathDirectory,
    persistent_options: BTreeMap<String, String>,
    print_types: Vec<PrintType>,
}

impl DatabaseConfig {
    pub fn new(model_name: impl Into<String>, bundle: Bundle) -> Self {
        let mut persistent_options = BTreeMap::new();
        persistent_options.insert(OPTION_MIGRATE_AUTOMATICALLY.to_string(), "true".to_string());
        persistent_options.insert(
            OPTION_INFER_MAPPING_AUTOMATICALLY.to_string(),
            "true".to_string(),
        );
        Self {
            model_name: model_name.into(),
            bundle,
            model_version: None,
            store_kind: StoreKind::default(),
            file_name: None,
            directory: SearchPathDirectory::default(),
            persistent_options,
            print_types: Vec::new(),
        }
    }

    pub fn file_name(mut self, file_name: impl Into<String>) -> Self {
        self.file_name = Some(file_name.into());
        self
    }

    pub fn store_kind(mut self, kind: StoreKind) -> Self {
        self.store_kind = kind;
        self
    }

    /// Replaces the persistent store options.
    pub fn persistent_options<K, V>(mut self, options: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.persistent_options = options
            .into_iter()
            .map(|(key, value)| (key.into(), value.into()))
            .collect();
        self
    }

    /// Sets a single persistent store option.
    pub fn persistent_option(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.persistent_options.insert(key.into(), value.into());
        self
    }

    pub fn directory(mut self, directory: SearchPathDirectory) -> Self {
        self.directory = directory;
        self
    }

    /// Pins the model version to load.
    pub fn model_version(mut self, version: u32) -> Self {
        self.model_version = Some(version);
        self
    }

    pub fn print_types(mut self, print_types: impl IntoIterator<Item = PrintType>) -> Self {
        self.print_types = print_types.into_iter().collect();
        self
    }

    pub fn model_name(&self) -> &str {
        &self.model_name
    }

    pub fn bundle(&self) -> &Bundle {
        &self.bundle
    }

    pub fn version(&self) -> Option<u32> {
        self.model_version
    }

    pub fn kind(&self) -> &StoreKind {
        &self.store_kind
    }

    /// Store file name; `<model>.sqlite` unless overridden.
    pub fn resolved_file_name(&self) -> String {
        self.file_name
            .clone()
            .unwrap_or_else(|| format!("{}.sqlite", self.model_name))
    }

    pub fn search_path(&self) -> &SearchPathDirectory {
        &self.directory
    }

    /// Full path of the store file.
    pub fn store_path(&self) -> PathBuf {
        self.directory.resolve().join(self.resolved_file_name())
    }

    pub fn options(&self) -> &BTreeMap<String, String> {
        &self.persistent_options
    }

    pub fn print_type_list(&self) -> &[PrintType] {
        &self.print_types
    }

    pub(crate) fn migrate_automatically(&self) -> bool {
        self.flag(OPTION_MIGRATE_AUTOMATICALLY, true)
    }

    pub(crate) fn journal_mode(&self) -> &str {
        self.persistent_options
            .get(OPTION_JOURNAL_MODE)
            .map_or(DEFAULT_JOURNAL_MODE, String::as_str)
    }

    pub(crate) fn busy_timeout_ms(&self) -> u64 {
        self.persistent_options
            .get(OPTION_BUSY_TIMEOUT_MS)
            .and_then(|value| value.trim().parse().ok())
            .unwrap_or(DEFAULT_BUSY_TIMEOUT_MS)
    }

    fn flag(&self, key: &str, default: bool) -> bool {
        match self.persistent_options.get(key).map(|v| v.trim().to_ascii_lowercase()) {
            Some(value) => matches!(value.as_str(), "true" | "1" | "yes"),
            None => default,
        }
    }

    /// Fingerprint used to cache the shared context.
    pub fn key(&self) -> ConfigKey {
        ConfigKey {
            model_name: self.model_name.clone(),
            model_version: self.model_version,
            store_kind: self.store_kind.clone(),
            bundle: BundleKey::from(&self.bundle),
            file_name: self.resolved_file_name(),
            directory: self.directory.clone(),
            options: self.persistent_options.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum BundleKey {
    Directory(PathBuf),
    Model(usize),
}

impl From<&Bundle> for BundleKey {
    fn from(bundle: &Bundle) -> Self {
        match bundle {
            Bundle::Directory(path) => Self::Directory(normalize(path)),
            Bundle::Model(model) => Self::Model(Arc::as_ptr(model) as usize),
        }
    }
}

fn normalize(path: &Path) -> PathBuf {
    path.canonicalize().unwrap_or_else(|_| path.to_path_buf())
}

/// Hashable identity of a [`DatabaseConfig`].
///
/// Diagnostic print flags are not part of the identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConfigKey {
    model_name: String,
    model_version: Option<u32>,
    store_kind: StoreKind,
    bundle: BundleKey,
    file_name: String,
    directory: SearchPathDirectory,
    options: BTreeMap<String, String>,
}

impl ConfigKey {
    pub fn model_name(&self) -> &str {
        &self.model_name
    }
}

#[cfg(test)]
mod tests {
    use super::{DatabaseConfig, PrintType, SearchPathDirectory, StoreKind};
    use crate::model::{Bundle, Model};

    #[test]
    fn defaults_follow_model_name() {
        let config = DatabaseConfig::new("Notes", Bundle::model(Model::new("Notes")));
        assert_eq!(config.resolved_file_name(), "Notes.sqlite");
        assert_eq!(config.kind(), &StoreKind::Sqlite);
        assert!(config.migrate_automatically());
        assert_eq!(config.journal_mode(), "WAL");
        assert_eq!(config.busy_timeout_ms(), 5_000);
    }

    #[test]
    fn key_ignores_print_types_and_tracks_identity_fields() {
        let bundle = Bundle::model(Model::new("Notes"));
        let base = DatabaseConfig::new("Notes", bundle.clone());
        let printed = base.clone().print_types([PrintType::store_path()]);
        assert_eq!(base.key(), printed.key());

        let renamed = base.clone().file_name("Other.sqlite");
        assert_ne!(base.key(), renamed.key());

        let moved = base
            .clone()
            .directory(SearchPathDirectory::Custom("/tmp/elsewhere".into()));
        assert_ne!(base.key(), moved.key());

        let optioned = base.clone().persistent_option("journal_mode", "DELETE");
        assert_ne!(base.key(), optioned.key());
    }

    #[test]
    fn distinct_in_process_models_have_distinct_keys() {
        let first = DatabaseConfig::new("Notes", Bundle::model(Model::new("Notes")));
        let second = DatabaseConfig::new("Notes", Bundle::model(Model::new("Notes")));
        assert_ne!(first.key(), second.key());
    }

    #[test]
    fn migration_flag_parses_false() {
        let config = DatabaseConfig::new("Notes", Bundle::model(Model::new("Notes")))
            .persistent_option("migrate_automatically", "false");
        assert!(!config.migrate_automatically());
    }
}
