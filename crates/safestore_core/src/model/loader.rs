//! Model bundle lookup.
//!
//! A directory bundle holds either `<name>.model.json` (the current model) or
//! a `<name>.models/` directory with one `v<N>.json` file per version.

use super::{Model, ModelError};
use log::{info, warn};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Location a data model is resolved from.
#[derive(Debug, Clone)]
pub enum Bundle {
    /// Directory searched for model JSON files.
    Directory(PathBuf),
    /// Model supplied in-process.
    Model(Arc<Model>),
}

impl Bundle {
    pub fn directory(path: impl Into<PathBuf>) -> Self {
        Self::Directory(path.into())
    }

    pub fn model(model: Model) -> Self {
        Self::Model(Arc::new(model))
    }

    /// Resolves the model named `name`, optionally pinned to `version`.
    ///
    /// The returned model has been validated.
    pub fn load(&self, name: &str, version: Option<u32>) -> Result<Arc<Model>, ModelError> {
        let model = match self {
            Self::Model(model) => {
                if model.name != name {
                    return Err(ModelError::NotFound(format!(
                        "bundle provides model `{}`, not `{name}`",
                        model.name
                    )));
                }
                Arc::clone(model)
            }
            Self::Directory(dir) => Arc::new(load_from_directory(dir, name, version)?),
        };

        if let Some(version) = version {
            if model.version != version {
                return Err(ModelError::VersionMismatch {
                    requested: version,
                    found: model.version,
                });
            }
        }

        model.validate()?;
        info!(
            "event=model_load module=model status=ok name={} version={} entities={}",
            model.name,
            model.version,
            model.entities.len()
        );
        Ok(model)
    }
}

fn load_from_directory(dir: &Path, name: &str, version: Option<u32>) -> Result<Model, ModelError> {
    let versions_dir = dir.join(format!("{name}.models"));
    let path = match version {
        Some(version) => versions_dir.join(format!("v{version}.json")),
        None => {
            let current = dir.join(format!("{name}.model.json"));
            if current.is_file() {
                current
            } else {
                latest_version_file(&versions_dir)?.ok_or_else(|| {
                    ModelError::NotFound(format!(
                        "no model `{name}` under `{}`",
                        dir.display()
                    ))
                })?
            }
        }
    };

    if !path.is_file() {
        return Err(ModelError::NotFound(format!(
            "model file `{}` does not exist",
            path.display()
        )));
    }

    let raw = std::fs::read_to_string(&path)?;
    let model: Model = serde_json::from_str(&raw)?;
    if model.name != name {
        warn!(
            "event=model_load module=model status=error path={} expected={} found={}",
            path.display(),
            name,
            model.name
        );
        return Err(ModelError::NotFound(format!(
            "`{}` describes model `{}`, not `{name}`",
            path.display(),
            model.name
        )));
    }
    Ok(model)
}

fn latest_version_file(versions_dir: &Path) -> Result<Option<PathBuf>, ModelError> {
    if !versions_dir.is_dir() {
        return Ok(None);
    }

    let mut best: Option<(u32, PathBuf)> = None;
    for entry in std::fs::read_dir(versions_dir)? {
        let path = entry?.path();
        let Some(version) = path
            .file_name()
            .and_then(|name| name.to_str())
            .and_then(|name| name.strip_prefix('v'))
            .and_then(|name| name.strip_suffix(".json"))
            .and_then(|digits| digits.parse::<u32>().ok())
        else {
            continue;
        };
        if best.as_ref().map_or(true, |(current, _)| version > *current) {
            best = Some((version, path));
        }
    }
    Ok(best.map(|(_, path)| path))
}

#[cfg(test)]
mod tests {
    use super::Bundle;
    use crate::model::{AttributeType, EntityDescription, Model, ModelError};

    fn write_model(path: &std::path::Path, version: u32) {
        let model = Model::new("Notes")
            .version(version)
            .entity(EntityDescription::new("Note").attribute("body", AttributeType::Text));
        std::fs::write(path, serde_json::to_string(&model).unwrap()).unwrap();
    }

    #[test]
    fn directory_prefers_current_model_file() {
        let dir = tempfile::tempdir().unwrap();
        write_model(&dir.path().join("Notes.model.json"), 3);
        std::fs::create_dir(dir.path().join("Notes.models")).unwrap();
        write_model(&dir.path().join("Notes.models/v7.json"), 7);

        let bundle = Bundle::directory(dir.path());
        assert_eq!(bundle.load("Notes", None).unwrap().version, 3);
        assert_eq!(bundle.load("Notes", Some(7)).unwrap().version, 7);
    }

    #[test]
    fn directory_falls_back_to_highest_version() {
        let dir = tempfile::tempdir().unwrap();
        let versions = dir.path().join("Notes.models");
        std::fs::create_dir(&versions).unwrap();
        write_model(&versions.join("v2.json"), 2);
        write_model(&versions.join("v10.json"), 10);

        let model = Bundle::directory(dir.path()).load("Notes", None).unwrap();
        assert_eq!(model.version, 10);
    }

    #[test]
    fn missing_model_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let err = Bundle::directory(dir.path())
            .load("Notes", None)
            .unwrap_err();
        assert!(matches!(err, ModelError::NotFound(_)));
    }

    #[test]
    fn in_process_model_checks_name_and_version() {
        let bundle = Bundle::model(Model::new("Notes").version(2));
        assert!(bundle.load("Notes", Some(2)).is_ok());
        assert!(matches!(
            bundle.load("Notes", Some(1)),
            Err(ModelError::VersionMismatch { requested: 1, found: 2 })
        ));
        assert!(matches!(bundle.load("Other", None), Err(ModelError::NotFound(_))));
    }
}
