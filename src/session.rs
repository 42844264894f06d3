//! Session orchestration.
//!
//! A launch is computed up front as a `SessionPlan` (pure data: pane order,
//! split directions, the exact text typed into every pane) and then replayed
//! against a `Multiplexer` by `Orchestrator`. Pane creation order only has to
//! produce N panes; the final tiled layout balances them.

use std::fmt;

use crate::error::{CloudError, Result};
use crate::resolve::ResolvedService;
use crate::tmux::{Multiplexer, SplitDirection};

pub const SESSION_PREFIX: &str = "cloud-";
pub const HELP_WINDOW: &str = "help";
const RULE: &str = "────────────────────────────────────────";

/// Deterministic session name for a project.
///
/// tmux rewrites `.` and `:` in session names to `_`, so they are replaced
/// here and every target refers to the name tmux actually keeps.
pub fn session_name(project: &str) -> String {
    let sanitized: String = project
        .chars()
        .map(|c| if matches!(c, '.' | ':') { '_' } else { c })
        .collect();
    format!("{}{}", SESSION_PREFIX, sanitized)
}

/// One pane of the service window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PanePlan {
    pub service: String,
    /// Directory with a leading `~` expanded.
    pub directory: String,
    /// `None` for the initial pane, which comes with the session.
    pub split: Option<SplitDirection>,
    /// Text typed into the pane: cd, clear, banner, then the command.
    pub command_line: String,
}

/// Everything a launch will do, computed before any multiplexer call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionPlan {
    pub project: String,
    pub session: String,
    pub panes: Vec<PanePlan>,
    pub help_lines: Vec<String>,
}

impl SessionPlan {
    /// Builds the plan. An empty service list is an error.
    pub fn build(project: &str, services: &[ResolvedService]) -> Result<Self> {
        if services.is_empty() {
            return Err(CloudError::EmptyResolution {
                project: project.to_string(),
            });
        }
        let session = session_name(project);
        let panes = services
            .iter()
            .enumerate()
            .map(|(index, service)| {
                let directory = expand_home(&service.directory);
                PanePlan {
                    service: service.name.clone(),
                    command_line: pane_command_line(service, &directory),
                    directory,
                    split: (index > 0).then(|| SplitDirection::for_index(index)),
                }
            })
            .collect();
        let help_lines = help_lines(project, &session, services);
        Ok(Self {
            project: project.to_string(),
            session,
            panes,
            help_lines,
        })
    }

    /// Text typed into the help window's pane.
    pub fn help_command_line(&self) -> String {
        format!("clear && {}", printf_lines(&self.help_lines))
    }
}

/// Lifecycle of the session the orchestrator is driving.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Absent,
    Created,
    PanesPopulated,
    Tiled,
    HelpPopulated,
    Attached,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            SessionState::Absent => "absent",
            SessionState::Created => "created",
            SessionState::PanesPopulated => "panes-populated",
            SessionState::Tiled => "tiled",
            SessionState::HelpPopulated => "help-populated",
            SessionState::Attached => "attached",
        };
        f.write_str(label)
    }
}

/// Caller-resolved answers for the pre-flight checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LaunchOptions {
    /// The invoking terminal is already inside a multiplexer session.
    pub nested: bool,
    /// The user agreed to start a session from inside another one.
    pub nested_confirmed: bool,
    /// Attach after building; false leaves the session running detached.
    pub attach: bool,
}

impl Default for LaunchOptions {
    fn default() -> Self {
        Self {
            nested: false,
            nested_confirmed: false,
            attach: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaunchOutcome {
    /// Nested session not confirmed; nothing was touched.
    Declined,
    /// Session built and left running without a client.
    Detached,
    /// The user attached and has since detached.
    Attached,
}

/// Replays a `SessionPlan` against a multiplexer driver.
pub struct Orchestrator<M> {
    driver: M,
    state: SessionState,
}

impl<M: Multiplexer> Orchestrator<M> {
    pub fn new(driver: M) -> Self {
        Self {
            driver,
            state: SessionState::Absent,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn driver(&self) -> &M {
        &self.driver
    }

    /// Builds the session described by `plan`, replacing any session with
    /// the same name, then attaches if requested.
    ///
    /// A failure after the session was created leaves it in place; the
    /// error is returned as is.
    pub async fn launch(
        &mut self,
        plan: &SessionPlan,
        options: LaunchOptions,
    ) -> Result<LaunchOutcome> {
        if options.nested && !options.nested_confirmed {
            tracing::info!(session = %plan.session, "nested launch declined");
            return Ok(LaunchOutcome::Declined);
        }
        if let Err(err) = self.build(plan).await {
            if self.state != SessionState::Absent {
                tracing::warn!(
                    session = %plan.session,
                    state = %self.state,
                    "launch failed; partially built session left running"
                );
            }
            return Err(err);
        }
        if !options.attach {
            return Ok(LaunchOutcome::Detached);
        }
        self.driver.attach(&plan.session).await?;
        self.transition(&plan.session, SessionState::Attached);
        tracing::info!(session = %plan.session, "client detached");
        Ok(LaunchOutcome::Attached)
    }

    async fn build(&mut self, plan: &SessionPlan) -> Result<()> {
        let Some(first) = plan.panes.first() else {
            return Err(CloudError::EmptyResolution {
                project: plan.project.clone(),
            });
        };

        if self.driver.has_session(&plan.session).await? {
            tracing::info!(session = %plan.session, "replacing existing session");
            self.driver.kill_session(&plan.session).await?;
        }
        self.state = SessionState::Absent;

        let handle = self
            .driver
            .create_session(&plan.session, &first.directory)
            .await?;
        self.transition(&plan.session, SessionState::Created);
        self.driver.rename_window(&handle.window, &first.service).await?;

        for pane in &plan.panes {
            let target = match pane.split {
                None => handle.pane.clone(),
                Some(direction) => {
                    self.driver
                        .split_pane(&handle.window, direction, &pane.directory)
                        .await?
                }
            };
            tracing::debug!(service = %pane.service, pane = %target, "starting service");
            self.driver.send_text(&target, &pane.command_line).await?;
        }
        self.transition(&plan.session, SessionState::PanesPopulated);

        self.driver.select_tiled_layout(&handle.window).await?;
        self.transition(&plan.session, SessionState::Tiled);

        let help = self.driver.new_window(&plan.session, HELP_WINDOW).await?;
        self.driver
            .send_text(&help.pane, &plan.help_command_line())
            .await?;
        self.transition(&plan.session, SessionState::HelpPopulated);

        self.driver.select_window(&handle.window).await?;
        Ok(())
    }

    fn transition(&mut self, session: &str, next: SessionState) {
        tracing::debug!(session, from = %self.state, to = %next, "session state");
        self.state = next;
    }
}

fn pane_command_line(service: &ResolvedService, directory: &str) -> String {
    let banner = [
        RULE.to_string(),
        format!("  service:   {}", service.name),
        format!("  directory: {}", directory),
        format!("  command:   {}", service.command),
        RULE.to_string(),
    ];
    format!(
        "cd {} && clear && {} && {}",
        shell_words::quote(directory),
        printf_lines(&banner),
        service.command
    )
}

fn help_lines(project: &str, session: &str, services: &[ResolvedService]) -> Vec<String> {
    let mut lines = vec![
        RULE.to_string(),
        format!("  cloud · {}", project),
        RULE.to_string(),
        String::new(),
        "services:".to_string(),
    ];
    lines.extend(
        services
            .iter()
            .enumerate()
            .map(|(index, service)| format!("  {}. {}: {}", index + 1, service.name, service.command)),
    );
    lines.extend(
        [
            "",
            "tmux keys (prefix is Ctrl-b):",
            "  prefix d          detach, services keep running",
            "  prefix arrow      move between panes",
            "  prefix z          zoom the current pane",
            "  prefix n / p      next / previous window",
            "  prefix [          scroll mode, q to leave",
            "",
        ]
        .into_iter()
        .map(str::to_string),
    );
    lines.push(format!("reattach: tmux attach -t {}", session));
    lines.push(format!("stop all: tmux kill-session -t {}", session));
    lines
}

fn printf_lines(lines: &[String]) -> String {
    let mut out = String::from("printf '%s\\n'");
    for line in lines {
        out.push(' ');
        out.push_str(&shell_words::quote(line));
    }
    out
}

// Expand a leading `~` so the quoted `cd` target still resolves.
fn expand_home(directory: &str) -> String {
    let rest = match directory.strip_prefix('~') {
        Some(rest) if rest.is_empty() || rest.starts_with('/') => rest,
        _ => return directory.to_string(),
    };
    match dirs::home_dir() {
        Some(home) => format!("{}{}", home.display(), rest),
        None => directory.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tmux::WindowHandle;

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Call {
        HasSession(String),
        Create { session: String, directory: String },
        Kill(String),
        Rename { window: String, name: String },
        Split { window: String, direction: SplitDirection },
        Send { pane: String, text: String },
        Tiled(String),
        NewWindow { session: String, name: String },
        SelectWindow(String),
        Attach(String),
    }

    #[derive(Debug, Default)]
    struct FakeTmux {
        live: Vec<String>,
        calls: Vec<Call>,
        windows: Vec<(String, Vec<String>)>,
        next_pane: usize,
        fail_split: bool,
    }

    impl FakeTmux {
        fn pane(&mut self) -> String {
            let id = format!("%{}", self.next_pane);
            self.next_pane += 1;
            id
        }

        fn window(&mut self, session: &str) -> WindowHandle {
            let pane = self.pane();
            let window = format!("@{}:{}", session, self.windows.len());
            self.windows.push((window.clone(), vec![pane.clone()]));
            WindowHandle { window, pane }
        }

        fn panes_in(&self, window: &str) -> usize {
            self.windows
                .iter()
                .find(|(id, _)| id == window)
                .map(|(_, panes)| panes.len())
                .unwrap_or(0)
        }

        fn splits(&self) -> Vec<SplitDirection> {
            self.calls
                .iter()
                .filter_map(|call| match call {
                    Call::Split { direction, .. } => Some(*direction),
                    _ => None,
                })
                .collect()
        }

        fn sent(&self) -> Vec<(String, String)> {
            self.calls
                .iter()
                .filter_map(|call| match call {
                    Call::Send { pane, text } => Some((pane.clone(), text.clone())),
                    _ => None,
                })
                .collect()
        }
    }

    impl Multiplexer for FakeTmux {
        async fn has_session(&mut self, session: &str) -> Result<bool> {
            self.calls.push(Call::HasSession(session.to_string()));
            Ok(self.live.iter().any(|s| s == session))
        }

        async fn create_session(&mut self, session: &str, directory: &str) -> Result<WindowHandle> {
            self.calls.push(Call::Create {
                session: session.to_string(),
                directory: directory.to_string(),
            });
            if self.live.iter().any(|s| s == session) {
                return Err(CloudError::ExternalProcess {
                    program: "tmux".into(),
                    operation: "new-session".into(),
                    detail: format!("duplicate session: {}", session),
                });
            }
            self.live.push(session.to_string());
            Ok(self.window(session))
        }

        async fn kill_session(&mut self, session: &str) -> Result<()> {
            self.calls.push(Call::Kill(session.to_string()));
            self.live.retain(|s| s != session);
            let prefix = format!("@{}:", session);
            self.windows.retain(|(id, _)| !id.starts_with(&prefix));
            Ok(())
        }

        async fn rename_window(&mut self, window: &str, name: &str) -> Result<()> {
            self.calls.push(Call::Rename {
                window: window.to_string(),
                name: name.to_string(),
            });
            Ok(())
        }

        async fn split_pane(
            &mut self,
            window: &str,
            direction: SplitDirection,
            _directory: &str,
        ) -> Result<String> {
            self.calls.push(Call::Split {
                window: window.to_string(),
                direction,
            });
            if self.fail_split {
                return Err(CloudError::ExternalProcess {
                    program: "tmux".into(),
                    operation: "split-window".into(),
                    detail: "no space for new pane".into(),
                });
            }
            let pane = self.pane();
            if let Some((_, panes)) = self.windows.iter_mut().find(|(id, _)| id == window) {
                panes.push(pane.clone());
            }
            Ok(pane)
        }

        async fn send_text(&mut self, pane: &str, text: &str) -> Result<()> {
            self.calls.push(Call::Send {
                pane: pane.to_string(),
                text: text.to_string(),
            });
            Ok(())
        }

        async fn select_tiled_layout(&mut self, window: &str) -> Result<()> {
            self.calls.push(Call::Tiled(window.to_string()));
            Ok(())
        }

        async fn new_window(&mut self, session: &str, name: &str) -> Result<WindowHandle> {
            self.calls.push(Call::NewWindow {
                session: session.to_string(),
                name: name.to_string(),
            });
            Ok(self.window(session))
        }

        async fn select_window(&mut self, window: &str) -> Result<()> {
            self.calls.push(Call::SelectWindow(window.to_string()));
            Ok(())
        }

        async fn attach(&mut self, session: &str) -> Result<()> {
            self.calls.push(Call::Attach(session.to_string()));
            Ok(())
        }
    }

    fn service(name: &str, command: &str, directory: &str) -> ResolvedService {
        ResolvedService {
            name: name.to_string(),
            command: command.to_string(),
            directory: directory.to_string(),
        }
    }

    fn shop() -> Vec<ResolvedService> {
        vec![
            service("api", "node api.js", "/srv/api"),
            service("web", "npm run dev", "/srv/web"),
        ]
    }

    fn numbered(count: usize) -> Vec<ResolvedService> {
        (0..count)
            .map(|i| service(&format!("svc{}", i), &format!("run {}", i), "/tmp"))
            .collect()
    }

    #[test]
    fn session_name_is_prefixed() {
        assert_eq!(session_name("shop"), "cloud-shop");
    }

    #[test]
    fn session_name_matches_what_tmux_keeps() {
        assert_eq!(session_name("my.app"), "cloud-my_app");
        assert_eq!(session_name("example.com:8080"), "cloud-example_com_8080");
        let plan = SessionPlan::build("my.app", &numbered(1)).unwrap();
        assert_eq!(plan.session, "cloud-my_app");
        assert!(plan
            .help_lines
            .contains(&"reattach: tmux attach -t cloud-my_app".to_string()));
    }

    #[tokio::test]
    async fn dotted_project_is_replaced_on_second_launch() {
        let plan = SessionPlan::build("my.app", &numbered(2)).unwrap();
        let mut orchestrator = Orchestrator::new(FakeTmux::default());
        let options = LaunchOptions {
            attach: false,
            ..LaunchOptions::default()
        };

        orchestrator.launch(&plan, options).await.unwrap();
        orchestrator.launch(&plan, options).await.unwrap();

        let fake = orchestrator.driver();
        assert_eq!(fake.live, vec!["cloud-my_app".to_string()]);
        assert!(fake.calls.contains(&Call::Kill("cloud-my_app".to_string())));
    }

    #[test]
    fn empty_service_list_is_rejected() {
        let err = SessionPlan::build("shop", &[]).unwrap_err();
        assert!(matches!(err, CloudError::EmptyResolution { .. }));
    }

    #[test]
    fn plan_alternates_split_direction_by_index() {
        let plan = SessionPlan::build("P", &numbered(5)).unwrap();
        let splits: Vec<Option<SplitDirection>> = plan.panes.iter().map(|p| p.split).collect();
        assert_eq!(
            splits,
            vec![
                None,
                Some(SplitDirection::Horizontal),
                Some(SplitDirection::Vertical),
                Some(SplitDirection::Horizontal),
                Some(SplitDirection::Vertical),
            ]
        );
    }

    #[test]
    fn pane_command_line_prints_banner_then_runs_command() {
        let plan = SessionPlan::build("shop", &[service("api", "node api.js", "/srv/my api")]).unwrap();
        let line = &plan.panes[0].command_line;
        assert!(line.starts_with("cd '/srv/my api' && clear && printf '%s\\n' "));
        assert!(line.contains("'  service:   api'"));
        assert!(line.contains("'  command:   node api.js'"));
        assert!(line.ends_with(" && node api.js"));
    }

    #[test]
    fn help_lists_every_resolved_service() {
        let plan = SessionPlan::build("shop", &shop()).unwrap();
        assert!(plan.help_lines.contains(&"  1. api: node api.js".to_string()));
        assert!(plan.help_lines.contains(&"  2. web: npm run dev".to_string()));
        assert!(plan
            .help_lines
            .contains(&"reattach: tmux attach -t cloud-shop".to_string()));
        assert!(plan.help_command_line().starts_with("clear && printf"));
    }

    #[test]
    fn home_prefix_is_expanded() {
        if let Some(home) = dirs::home_dir() {
            assert_eq!(expand_home("~/code"), format!("{}/code", home.display()));
            assert_eq!(expand_home("~"), home.display().to_string());
        }
        assert_eq!(expand_home("~other/code"), "~other/code");
        assert_eq!(expand_home("/srv/api"), "/srv/api");
    }

    #[tokio::test]
    async fn five_services_produce_five_tiled_panes() {
        let plan = SessionPlan::build("P", &numbered(5)).unwrap();
        let mut orchestrator = Orchestrator::new(FakeTmux::default());

        let outcome = orchestrator
            .launch(&plan, LaunchOptions::default())
            .await
            .unwrap();

        assert_eq!(outcome, LaunchOutcome::Attached);
        let fake = orchestrator.driver();
        assert_eq!(
            fake.splits(),
            vec![
                SplitDirection::Horizontal,
                SplitDirection::Vertical,
                SplitDirection::Horizontal,
                SplitDirection::Vertical,
            ]
        );
        let window = fake.windows[0].0.clone();
        assert_eq!(fake.panes_in(&window), 5);
        let tiled_at = fake
            .calls
            .iter()
            .position(|c| *c == Call::Tiled(window.clone()))
            .unwrap();
        let last_split = fake
            .calls
            .iter()
            .rposition(|c| matches!(c, Call::Split { .. }))
            .unwrap();
        assert!(tiled_at > last_split);
    }

    #[tokio::test]
    async fn shop_end_to_end() {
        let plan = SessionPlan::build("shop", &shop()).unwrap();
        let mut orchestrator = Orchestrator::new(FakeTmux::default());

        orchestrator
            .launch(&plan, LaunchOptions::default())
            .await
            .unwrap();

        let fake = orchestrator.driver();
        assert_eq!(fake.live, vec!["cloud-shop".to_string()]);
        assert_eq!(
            fake.calls[1],
            Call::Create {
                session: "cloud-shop".to_string(),
                directory: "/srv/api".to_string(),
            }
        );
        assert_eq!(
            fake.calls[2],
            Call::Rename {
                window: fake.windows[0].0.clone(),
                name: "api".to_string(),
            }
        );
        let sent = fake.sent();
        assert_eq!(sent.len(), 3);
        assert!(sent[0].1.contains("node api.js"));
        assert!(sent[1].1.contains("npm run dev"));
        assert_ne!(sent[0].0, sent[1].0);
        assert!(sent[2].1.contains("1. api: node api.js"));
        assert!(sent[2].1.contains("2. web: npm run dev"));
        assert_eq!(fake.panes_in(&fake.windows[0].0), 2);
        assert_eq!(
            fake.calls[fake.calls.len() - 2..],
            [
                Call::SelectWindow(fake.windows[0].0.clone()),
                Call::Attach("cloud-shop".to_string()),
            ]
        );
        assert!(fake.calls.contains(&Call::NewWindow {
            session: "cloud-shop".to_string(),
            name: HELP_WINDOW.to_string(),
        }));
    }

    #[tokio::test]
    async fn second_launch_replaces_the_first_session() {
        let plan = SessionPlan::build("P", &numbered(2)).unwrap();
        let mut orchestrator = Orchestrator::new(FakeTmux::default());
        let options = LaunchOptions {
            attach: false,
            ..LaunchOptions::default()
        };

        orchestrator.launch(&plan, options).await.unwrap();
        orchestrator.launch(&plan, options).await.unwrap();

        let fake = orchestrator.driver();
        assert_eq!(fake.live, vec!["cloud-P".to_string()]);
        let kills = fake
            .calls
            .iter()
            .filter(|c| matches!(c, Call::Kill(_)))
            .count();
        assert_eq!(kills, 1);
        assert_eq!(orchestrator.state(), SessionState::HelpPopulated);
    }

    #[tokio::test]
    async fn detached_launch_skips_attach() {
        let plan = SessionPlan::build("P", &numbered(2)).unwrap();
        let mut orchestrator = Orchestrator::new(FakeTmux::default());
        let options = LaunchOptions {
            attach: false,
            ..LaunchOptions::default()
        };

        let outcome = orchestrator.launch(&plan, options).await.unwrap();

        assert_eq!(outcome, LaunchOutcome::Detached);
        let fake = orchestrator.driver();
        assert!(!fake.calls.iter().any(|c| matches!(c, Call::Attach(_))));
        assert_eq!(fake.calls.last(), Some(&Call::SelectWindow(fake.windows[0].0.clone())));
    }

    #[tokio::test]
    async fn declined_nested_launch_touches_nothing() {
        let plan = SessionPlan::build("P", &numbered(1)).unwrap();
        let mut orchestrator = Orchestrator::new(FakeTmux::default());
        let options = LaunchOptions {
            nested: true,
            nested_confirmed: false,
            attach: true,
        };

        let outcome = orchestrator.launch(&plan, options).await.unwrap();

        assert_eq!(outcome, LaunchOutcome::Declined);
        assert!(orchestrator.driver().calls.is_empty());
        assert_eq!(orchestrator.state(), SessionState::Absent);
    }

    #[tokio::test]
    async fn confirmed_nested_launch_proceeds() {
        let plan = SessionPlan::build("P", &numbered(1)).unwrap();
        let mut orchestrator = Orchestrator::new(FakeTmux::default());
        let options = LaunchOptions {
            nested: true,
            nested_confirmed: true,
            attach: true,
        };

        let outcome = orchestrator.launch(&plan, options).await.unwrap();
        assert_eq!(outcome, LaunchOutcome::Attached);
        assert!(orchestrator.driver().splits().is_empty());
    }

    #[tokio::test]
    async fn failed_split_leaves_session_behind() {
        let plan = SessionPlan::build("P", &numbered(3)).unwrap();
        let mut orchestrator = Orchestrator::new(FakeTmux {
            fail_split: true,
            ..FakeTmux::default()
        });

        let err = orchestrator
            .launch(&plan, LaunchOptions::default())
            .await
            .unwrap_err();

        assert!(matches!(err, CloudError::ExternalProcess { .. }));
        assert_eq!(orchestrator.state(), SessionState::Created);
        let fake = orchestrator.driver();
        assert_eq!(fake.live, vec!["cloud-P".to_string()]);
        assert!(!fake.calls.iter().any(|c| matches!(c, Call::Attach(_))));
    }
}
