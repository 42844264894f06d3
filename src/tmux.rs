//! Multiplexer driver.
//!
//! The orchestrator only talks to the `Multiplexer` trait. `Tmux` shells out
//! to the real binary; `DryRun` prints the equivalent commands instead.

use std::process::Stdio;

use tokio::process::Command;

use crate::error::{CloudError, Result};

/// Environment variable tmux sets inside a session.
pub const NESTED_ENV: &str = "TMUX";

/// Split orientation for a new pane, relative to the whole window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SplitDirection {
    /// New pane to the right (`split-window -h`).
    Horizontal,
    /// New pane below (`split-window -v`).
    Vertical,
}

impl SplitDirection {
    /// Odd pane indices split horizontally, even ones vertically.
    pub fn for_index(index: usize) -> Self {
        if index % 2 == 1 {
            SplitDirection::Horizontal
        } else {
            SplitDirection::Vertical
        }
    }

    fn flag(self) -> &'static str {
        match self {
            SplitDirection::Horizontal => "-h",
            SplitDirection::Vertical => "-v",
        }
    }
}

/// Identifiers of a freshly created window and its first pane.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowHandle {
    pub window: String,
    pub pane: String,
}

/// The operations the session orchestrator needs from a terminal multiplexer.
pub trait Multiplexer {
    async fn has_session(&mut self, session: &str) -> Result<bool>;
    /// Starts a detached session with a single pane in `directory`.
    async fn create_session(&mut self, session: &str, directory: &str) -> Result<WindowHandle>;
    async fn kill_session(&mut self, session: &str) -> Result<()>;
    async fn rename_window(&mut self, window: &str, name: &str) -> Result<()>;
    /// Splits `window` and returns the new pane id.
    async fn split_pane(
        &mut self,
        window: &str,
        direction: SplitDirection,
        directory: &str,
    ) -> Result<String>;
    /// Types `text` into `pane` and presses enter.
    async fn send_text(&mut self, pane: &str, text: &str) -> Result<()>;
    async fn select_tiled_layout(&mut self, window: &str) -> Result<()>;
    async fn new_window(&mut self, session: &str, name: &str) -> Result<WindowHandle>;
    async fn select_window(&mut self, window: &str) -> Result<()>;
    /// Attaches the current terminal; returns once the client detaches.
    async fn attach(&mut self, session: &str) -> Result<()>;
}

/// Returns true when running inside a tmux client.
pub fn inside_session() -> bool {
    std::env::var_os(NESTED_ENV)
        .map(|value| !value.is_empty())
        .unwrap_or(false)
}

const HANDLE_FORMAT: &str = "#{window_id} #{pane_id}";

/// Driver backed by the `tmux` binary.
#[derive(Debug, Clone)]
pub struct Tmux {
    program: String,
}

impl Default for Tmux {
    fn default() -> Self {
        Self {
            program: "tmux".to_string(),
        }
    }
}

impl Tmux {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    // Run a tmux subcommand and return its trimmed stdout.
    async fn run(&self, args: &[String]) -> Result<String> {
        let operation = args.first().map(String::as_str).unwrap_or_default();
        tracing::debug!(program = %self.program, ?args, "tmux");
        let output = Command::new(&self.program)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|err| self.failure(operation, err.to_string()))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let detail = stderr
                .lines()
                .next()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .map(str::to_string)
                .unwrap_or_else(|| format!("exited with {}", output.status));
            return Err(self.failure(operation, detail));
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    fn failure(&self, operation: &str, detail: String) -> CloudError {
        CloudError::ExternalProcess {
            program: self.program.clone(),
            operation: operation.to_string(),
            detail,
        }
    }

    fn parse_handle(&self, operation: &str, raw: &str) -> Result<WindowHandle> {
        parse_handle(raw)
            .ok_or_else(|| self.failure(operation, format!("unexpected output '{}'", raw)))
    }

    // Attach inherits the terminal; TMUX is cleared so a confirmed nested
    // launch is not refused.
    fn attach_command(&self, session: &str) -> Command {
        let mut command = Command::new(&self.program);
        command.args(attach_args(session)).env_remove(NESTED_ENV);
        command
    }
}

fn parse_handle(raw: &str) -> Option<WindowHandle> {
    let mut parts = raw.split_whitespace();
    let window = parts.next()?.to_string();
    let pane = parts.next()?.to_string();
    Some(WindowHandle { window, pane })
}

fn exact(session: &str) -> String {
    format!("={}", session)
}

fn to_args(args: &[&str]) -> Vec<String> {
    args.iter().map(|arg| arg.to_string()).collect()
}

fn has_session_args(session: &str) -> Vec<String> {
    to_args(&["has-session", "-t", &exact(session)])
}

fn new_session_args(session: &str, directory: &str) -> Vec<String> {
    to_args(&[
        "new-session",
        "-d",
        "-s",
        session,
        "-c",
        directory,
        "-P",
        "-F",
        HANDLE_FORMAT,
    ])
}

fn kill_session_args(session: &str) -> Vec<String> {
    to_args(&["kill-session", "-t", &exact(session)])
}

fn rename_window_args(window: &str, name: &str) -> Vec<String> {
    to_args(&["rename-window", "-t", window, name])
}

fn split_window_args(window: &str, direction: SplitDirection, directory: &str) -> Vec<String> {
    to_args(&[
        "split-window",
        direction.flag(),
        "-f",
        "-t",
        window,
        "-c",
        directory,
        "-P",
        "-F",
        "#{pane_id}",
    ])
}

/// Literal text first, then enter as a separate key so the text is never
/// parsed as key names.
fn send_text_args(pane: &str, text: &str) -> [Vec<String>; 2] {
    [
        to_args(&["send-keys", "-t", pane, "-l", text]),
        to_args(&["send-keys", "-t", pane, "C-m"]),
    ]
}

fn tiled_layout_args(window: &str) -> Vec<String> {
    to_args(&["select-layout", "-t", window, "tiled"])
}

fn new_window_args(session: &str, name: &str) -> Vec<String> {
    let target = format!("{}:", exact(session));
    to_args(&["new-window", "-d", "-t", &target, "-n", name, "-P", "-F", HANDLE_FORMAT])
}

fn select_window_args(window: &str) -> Vec<String> {
    to_args(&["select-window", "-t", window])
}

fn attach_args(session: &str) -> Vec<String> {
    to_args(&["attach-session", "-t", &exact(session)])
}

impl Multiplexer for Tmux {
    async fn has_session(&mut self, session: &str) -> Result<bool> {
        let status = Command::new(&self.program)
            .args(has_session_args(session))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map_err(|err| self.failure("has-session", err.to_string()))?;
        Ok(status.success())
    }

    async fn create_session(&mut self, session: &str, directory: &str) -> Result<WindowHandle> {
        let raw = self.run(&new_session_args(session, directory)).await?;
        self.parse_handle("new-session", &raw)
    }

    async fn kill_session(&mut self, session: &str) -> Result<()> {
        self.run(&kill_session_args(session)).await?;
        Ok(())
    }

    async fn rename_window(&mut self, window: &str, name: &str) -> Result<()> {
        self.run(&rename_window_args(window, name)).await?;
        Ok(())
    }

    async fn split_pane(
        &mut self,
        window: &str,
        direction: SplitDirection,
        directory: &str,
    ) -> Result<String> {
        self.run(&split_window_args(window, direction, directory))
            .await
    }

    async fn send_text(&mut self, pane: &str, text: &str) -> Result<()> {
        for args in send_text_args(pane, text) {
            self.run(&args).await?;
        }
        Ok(())
    }

    async fn select_tiled_layout(&mut self, window: &str) -> Result<()> {
        self.run(&tiled_layout_args(window)).await?;
        Ok(())
    }

    async fn new_window(&mut self, session: &str, name: &str) -> Result<WindowHandle> {
        let raw = self.run(&new_window_args(session, name)).await?;
        self.parse_handle("new-window", &raw)
    }

    async fn select_window(&mut self, window: &str) -> Result<()> {
        self.run(&select_window_args(window)).await?;
        Ok(())
    }

    async fn attach(&mut self, session: &str) -> Result<()> {
        tracing::debug!(session, "attaching");
        let status = self
            .attach_command(session)
            .status()
            .await
            .map_err(|err| self.failure("attach-session", err.to_string()))?;
        if !status.success() {
            return Err(self.failure("attach-session", format!("exited with {}", status)));
        }
        Ok(())
    }
}

/// Prints the tmux commands a launch would run without touching tmux.
#[derive(Debug, Default)]
pub struct DryRun {
    lines: Vec<String>,
    next_window: usize,
    next_pane: usize,
}

impl DryRun {
    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    fn record(&mut self, args: &[String]) {
        let line = format!("tmux {}", shell_words::join(args));
        println!("{}", line);
        self.lines.push(line);
    }

    fn window_handle(&mut self) -> WindowHandle {
        let handle = WindowHandle {
            window: format!("@{}", self.next_window),
            pane: format!("%{}", self.next_pane),
        };
        self.next_window += 1;
        self.next_pane += 1;
        handle
    }
}

impl Multiplexer for DryRun {
    async fn has_session(&mut self, session: &str) -> Result<bool> {
        self.record(&has_session_args(session));
        Ok(false)
    }

    async fn create_session(&mut self, session: &str, directory: &str) -> Result<WindowHandle> {
        self.record(&new_session_args(session, directory));
        Ok(self.window_handle())
    }

    async fn kill_session(&mut self, session: &str) -> Result<()> {
        self.record(&kill_session_args(session));
        Ok(())
    }

    async fn rename_window(&mut self, window: &str, name: &str) -> Result<()> {
        self.record(&rename_window_args(window, name));
        Ok(())
    }

    async fn split_pane(
        &mut self,
        window: &str,
        direction: SplitDirection,
        directory: &str,
    ) -> Result<String> {
        self.record(&split_window_args(window, direction, directory));
        let pane = format!("%{}", self.next_pane);
        self.next_pane += 1;
        Ok(pane)
    }

    async fn send_text(&mut self, pane: &str, text: &str) -> Result<()> {
        for args in send_text_args(pane, text) {
            self.record(&args);
        }
        Ok(())
    }

    async fn select_tiled_layout(&mut self, window: &str) -> Result<()> {
        self.record(&tiled_layout_args(window));
        Ok(())
    }

    async fn new_window(&mut self, session: &str, name: &str) -> Result<WindowHandle> {
        self.record(&new_window_args(session, name));
        Ok(self.window_handle())
    }

    async fn select_window(&mut self, window: &str) -> Result<()> {
        self.record(&select_window_args(window));
        Ok(())
    }

    async fn attach(&mut self, session: &str) -> Result<()> {
        self.record(&attach_args(session));
        Ok(())
    }
}
