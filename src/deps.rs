//! Presence checks for the external programs `run` depends on.

use std::path::PathBuf;

use crate::error::{CloudError, Result};

/// Programs that must be on `PATH` before a session can be launched.
pub const RUN_DEPENDENCIES: &[&str] = &["tmux"];

/// Returns the resolved path of every tool, or the first one missing.
pub fn require(tools: &[&str]) -> Result<Vec<PathBuf>> {
    tools
        .iter()
        .map(|tool| {
            which::which(tool).map_err(|err| {
                tracing::debug!(tool, %err, "dependency lookup failed");
                CloudError::Environment {
                    tool: tool.to_string(),
                }
            })
        })
        .collect()
}
