//! Project and service registry operations.
//!
//! `ConfigStore` owns the in-memory `Registry` and the file backing it. Every
//! mutation is applied to a copy, saved, and only then swapped in, so a
//! rejected or failed mutation leaves both disk and memory untouched.

use std::path::{Path, PathBuf};

use crate::config::{self, Project, Registry, Service};
use crate::error::{CloudError, Result};

/// Loaded registry plus the path it persists to.
#[derive(Debug)]
pub struct ConfigStore {
    path: PathBuf,
    registry: Registry,
}

impl ConfigStore {
    /// Loads the registry at `path`, creating an empty one on first use.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let registry = config::load_registry(&path)?;
        Ok(Self { path, registry })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn project(&self, name: &str) -> Result<&Project> {
        self.registry
            .projects
            .get(name)
            .ok_or_else(|| CloudError::project_not_found(name))
    }

    /// Persists the current registry.
    pub fn save(&self) -> Result<()> {
        config::save_registry(&self.path, &self.registry)
    }

    /// Registers a new project with no services.
    pub fn create_project(&mut self, name: &str, path: &str) -> Result<Project> {
        require_non_empty("project name", name)?;
        require_non_empty("project path", path)?;
        if self.registry.projects.contains_key(name) {
            return Err(CloudError::Conflict {
                kind: "project",
                name: name.to_string(),
            });
        }
        let project = Project {
            path: path.to_string(),
            services: Default::default(),
        };
        self.commit(|registry| {
            registry.projects.insert(name.to_string(), project.clone());
            Ok(())
        })?;
        tracing::info!(project = name, path, "project created");
        Ok(project)
    }

    /// Deletes a project and all of its services.
    pub fn remove_project(&mut self, name: &str) -> Result<Project> {
        let removed = self.commit(|registry| {
            registry
                .projects
                .shift_remove(name)
                .ok_or_else(|| CloudError::project_not_found(name))
        })?;
        tracing::info!(project = name, "project removed");
        Ok(removed)
    }

    /// Adds a service; an empty or absent directory falls back to the
    /// project path.
    pub fn add_service(
        &mut self,
        project: &str,
        name: &str,
        command: &str,
        directory: Option<&str>,
    ) -> Result<Service> {
        require_non_empty("service name", name)?;
        require_non_empty("command", command)?;
        let service = self.commit(|registry| {
            let entry = registry
                .projects
                .get_mut(project)
                .ok_or_else(|| CloudError::project_not_found(project))?;
            if entry.services.contains_key(name) {
                return Err(CloudError::Conflict {
                    kind: "service",
                    name: format!("{}:{}", project, name),
                });
            }
            let service = Service {
                command: command.to_string(),
                directory: directory_or_default(directory, &entry.path),
            };
            entry.services.insert(name.to_string(), service.clone());
            Ok(service)
        })?;
        tracing::info!(project, service = name, "service added");
        Ok(service)
    }

    pub fn remove_service(&mut self, project: &str, name: &str) -> Result<Service> {
        let removed = self.commit(|registry| {
            let entry = registry
                .projects
                .get_mut(project)
                .ok_or_else(|| CloudError::project_not_found(project))?;
            entry
                .services
                .shift_remove(name)
                .ok_or_else(|| CloudError::service_not_found(project, name))
        })?;
        tracing::info!(project, service = name, "service removed");
        Ok(removed)
    }

    /// Replaces a service's fields wholesale, keeping its position.
    pub fn edit_service(
        &mut self,
        project: &str,
        name: &str,
        command: &str,
        directory: Option<&str>,
    ) -> Result<Service> {
        require_non_empty("command", command)?;
        let service = self.commit(|registry| {
            let entry = registry
                .projects
                .get_mut(project)
                .ok_or_else(|| CloudError::project_not_found(project))?;
            let fallback = entry.path.clone();
            let slot = entry
                .services
                .get_mut(name)
                .ok_or_else(|| CloudError::service_not_found(project, name))?;
            *slot = Service {
                command: command.to_string(),
                directory: directory_or_default(directory, &fallback),
            };
            Ok(slot.clone())
        })?;
        tracing::info!(project, service = name, "service edited");
        Ok(service)
    }

    /// Project names with their service counts, in insertion order.
    pub fn list_projects(&self) -> Vec<(String, usize)> {
        self.registry
            .projects
            .iter()
            .map(|(name, project)| (name.clone(), project.services.len()))
            .collect()
    }

    /// Services of a project, in insertion order.
    pub fn list_services(&self, project: &str) -> Result<Vec<(&str, &Service)>> {
        let entry = self.project(project)?;
        Ok(entry
            .services
            .iter()
            .map(|(name, service)| (name.as_str(), service))
            .collect())
    }

    // Apply `mutate` to a copy, persist it, then swap it in.
    fn commit<T>(&mut self, mutate: impl FnOnce(&mut Registry) -> Result<T>) -> Result<T> {
        let mut next = self.registry.clone();
        let value = mutate(&mut next)?;
        config::save_registry(&self.path, &next)?;
        self.registry = next;
        Ok(value)
    }
}

fn require_non_empty(label: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(CloudError::UserInput(format!("{} must not be empty", label)));
    }
    Ok(())
}

fn directory_or_default(directory: Option<&str>, project_path: &str) -> String {
    match directory.map(str::trim) {
        Some(dir) if !dir.is_empty() => dir.to_string(),
        _ => project_path.to_string(),
    }
}
