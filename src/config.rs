//! Configuration document for cloudmux.
//!
//! This module defines the structure of the `projects.json` registry and
//! provides functionality to locate, load and atomically persist it.

use std::env;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;

use crate::error::{CloudError, Result};

/// Environment variable that overrides the registry location.
pub const CONFIG_ENV: &str = "CLOUD_CONFIG";
const CONFIG_DIR: &str = "cloud";
const CONFIG_FILE: &str = "projects.json";

/// Root document: every registered project keyed by name.
///
/// Maps keep insertion order so panes come up in the order services were
/// added.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Registry {
    #[serde(default)]
    pub projects: IndexMap<String, Project>,
}

/// A named group of services sharing a default working directory.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    /// Advisory path; only checked when the project is created.
    pub path: String,
    #[serde(default)]
    pub services: IndexMap<String, Service>,
}

/// A shell command and the directory it runs in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Service {
    pub command: String,
    pub directory: String,
}

/// Resolves the registry path: explicit flag, then `CLOUD_CONFIG`, then the
/// user config directory.
pub fn config_path(explicit: Option<&Path>) -> Result<PathBuf> {
    if let Some(path) = explicit {
        return Ok(path.to_path_buf());
    }
    if let Some(path) = env::var_os(CONFIG_ENV).filter(|value| !value.is_empty()) {
        return Ok(PathBuf::from(path));
    }
    let base = dirs::config_dir()
        .or_else(|| dirs::home_dir().map(|home| home.join(".config")))
        .ok_or_else(|| CloudError::Environment {
            tool: "home directory".to_string(),
        })?;
    Ok(base.join(CONFIG_DIR).join(CONFIG_FILE))
}

/// Reads the registry, writing an empty one first if the file is absent.
pub fn load_registry(path: &Path) -> Result<Registry> {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == ErrorKind::NotFound => {
            tracing::info!(path = %path.display(), "initializing empty registry");
            let registry = Registry::default();
            save_registry(path, &registry)?;
            return Ok(registry);
        }
        Err(err) => return Err(CloudError::io("failed to read", path, err)),
    };
    if raw.trim().is_empty() {
        return Ok(Registry::default());
    }
    serde_json::from_str(&raw).map_err(|source| CloudError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Writes the whole registry through a temp file in the same directory and
/// renames it into place.
pub fn save_registry(path: &Path, registry: &Registry) -> Result<()> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent).map_err(|err| CloudError::io("failed to create", parent, err))?;

    let mut json = serde_json::to_string_pretty(registry).map_err(|source| CloudError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    json.push('\n');

    let mut tmp = NamedTempFile::new_in(parent)
        .map_err(|err| CloudError::io("failed to create temp file in", parent, err))?;
    tmp.write_all(json.as_bytes())
        .and_then(|_| tmp.as_file().sync_all())
        .map_err(|err| CloudError::io("failed to write", tmp.path().to_path_buf(), err))?;
    tmp.persist(path)
        .map_err(|err| CloudError::io("failed to replace", path, err.error))?;
    tracing::debug!(path = %path.display(), projects = registry.projects.len(), "registry saved");
    Ok(())
}
