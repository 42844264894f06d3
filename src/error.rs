//! Error taxonomy shared by the store, resolver and session modules.

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised by the core operations.
///
/// The dispatcher turns every variant into a message on stderr and exit
/// status 1. None of them are retried.
#[derive(Debug, Error)]
pub enum CloudError {
    /// A required argument was missing or malformed.
    #[error("{0}")]
    UserInput(String),
    /// A project or service name is already taken.
    #[error("{kind} '{name}' already exists")]
    Conflict { kind: &'static str, name: String },
    /// A project or service does not exist.
    #[error("{kind} '{name}' not found")]
    NotFound { kind: &'static str, name: String },
    /// A required external tool is missing.
    #[error("required tool '{tool}' not found on PATH")]
    Environment { tool: String },
    /// `run` resolved to zero services.
    #[error("no services to launch for project '{project}'")]
    EmptyResolution { project: String },
    /// The multiplexer exited unsuccessfully or could not be spawned.
    #[error("{program} {operation} failed: {detail}")]
    ExternalProcess {
        program: String,
        operation: String,
        detail: String,
    },
    /// Reading or writing the registry file failed.
    #[error("{action} {}: {source}", path.display())]
    Io {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// The registry file is not valid JSON for the expected shape.
    #[error("failed to parse {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

pub type Result<T, E = CloudError> = std::result::Result<T, E>;

impl CloudError {
    pub fn project_not_found(name: &str) -> Self {
        CloudError::NotFound {
            kind: "project",
            name: name.to_string(),
        }
    }

    pub fn service_not_found(project: &str, service: &str) -> Self {
        CloudError::NotFound {
            kind: "service",
            name: format!("{}:{}", project, service),
        }
    }

    pub fn io(action: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        CloudError::Io {
            action,
            path: path.into(),
            source,
        }
    }
}
