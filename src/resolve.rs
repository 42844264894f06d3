//! Turns a project plus optional `project:service` tokens into the ordered
//! list of services to launch.

use crate::config::{Project, Registry};
use crate::error::{CloudError, Result};

/// A service ready to be placed in a pane.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedService {
    pub name: String,
    pub command: String,
    pub directory: String,
}

/// Outcome of a resolution. Skipped tokens are reported, not fatal.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Resolution {
    pub services: Vec<ResolvedService>,
    pub warnings: Vec<String>,
}

/// A parsed `project:service` reference. `project` is empty when the token
/// targets the current project.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServiceRef<'a> {
    pub project: &'a str,
    pub service: &'a str,
}

impl<'a> ServiceRef<'a> {
    /// Lenient form used by `run`: a bare `name` means `:name`.
    pub fn parse_lenient(token: &'a str) -> Self {
        match token.split_once(':') {
            Some((project, service)) => Self { project, service },
            None => Self {
                project: "",
                service: token,
            },
        }
    }

    /// Strict form used by service-remove/service-edit: both halves required.
    pub fn parse_strict(token: &'a str) -> Result<Self> {
        match token.split_once(':') {
            Some((project, service)) if !project.is_empty() && !service.is_empty() => {
                Ok(Self { project, service })
            }
            _ => Err(CloudError::UserInput(format!(
                "expected <project>:<service>, got '{}'",
                token
            ))),
        }
    }
}

/// Resolves `tokens` against `project`. With no tokens every service is
/// returned in stored order.
pub fn resolve(registry: &Registry, project: &str, tokens: &[String]) -> Result<Resolution> {
    let entry = registry
        .projects
        .get(project)
        .ok_or_else(|| CloudError::project_not_found(project))?;

    if tokens.is_empty() {
        return Ok(Resolution {
            services: entry
                .services
                .keys()
                .filter_map(|name| lookup(entry, name))
                .collect(),
            warnings: Vec::new(),
        });
    }

    let mut resolution = Resolution::default();
    for token in tokens {
        let reference = ServiceRef::parse_lenient(token);
        if !reference.project.is_empty() && reference.project != project {
            let warning = format!(
                "skipping '{}': belongs to project '{}', not '{}'",
                token, reference.project, project
            );
            tracing::warn!(token = token.as_str(), project, "token names another project");
            resolution.warnings.push(warning);
            continue;
        }
        match lookup(entry, reference.service) {
            Some(service) => resolution.services.push(service),
            None => {
                tracing::warn!(token = token.as_str(), project, "service not found");
                resolution.warnings.push(format!(
                    "skipping '{}': no service '{}' in project '{}'",
                    token, reference.service, project
                ));
            }
        }
    }
    Ok(resolution)
}

fn lookup(project: &Project, name: &str) -> Option<ResolvedService> {
    project.services.get(name).map(|service| ResolvedService {
        name: name.to_string(),
        command: service.command.clone(),
        directory: service.directory.clone(),
    })
}
