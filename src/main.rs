//! cloud: launch a project's services side by side in one tmux session.
//!
//! This is the entry point of the application. It parses command-line
//! arguments, collects any missing values interactively, and hands plain
//! values to the registry, resolver and session orchestrator.

mod config;
mod deps;
mod error;
mod prompt;
mod resolve;
mod session;
mod store;
mod tmux;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::builder::styling::{AnsiColor, Effects, Style};
use clap::builder::Styles;
use clap::{CommandFactory, Parser, Subcommand};
use crossterm::style::Stylize;
use tracing_subscriber::EnvFilter;

use crate::prompt::{Prompter, TerminalPrompter};
use crate::resolve::ServiceRef;
use crate::session::{LaunchOptions, LaunchOutcome, Orchestrator, SessionPlan};
use crate::store::ConfigStore;
use crate::tmux::{DryRun, Tmux};

/// Command-line interface definition.
#[derive(Debug, Parser)]
#[command(
    name = "cloud",
    version,
    about = "Run a project's services together in a tiled tmux session",
    styles = help_styles(),
    disable_help_subcommand = true
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
    /// Path to the projects registry (defaults to $CLOUD_CONFIG or the user config dir).
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Answer yes to every confirmation.
    #[arg(short, long, global = true)]
    yes: bool,
    /// Increase log verbosity (-v info, -vv debug).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// List projects and their service counts.
    List,
    /// Register a new project.
    New {
        project: String,
        /// Project directory (prompted for when omitted).
        #[arg(long)]
        path: Option<String>,
    },
    /// Remove a project and all of its services.
    Remove { project: String },
    /// List the services of a project.
    Services { project: String },
    /// Add a service to a project.
    ServiceAdd {
        project: String,
        /// Service name.
        #[arg(long)]
        name: Option<String>,
        /// Shell command to run.
        #[arg(long)]
        command: Option<String>,
        /// Working directory (defaults to the project path).
        #[arg(long)]
        directory: Option<String>,
    },
    /// Remove a service, given as <project>:<service>.
    ServiceRemove { target: String },
    /// Edit a service, given as <project>:<service>. Empty answers keep the current value.
    ServiceEdit {
        target: String,
        #[arg(long)]
        command: Option<String>,
        #[arg(long)]
        directory: Option<String>,
    },
    /// Launch services in the cloud-<project> tmux session.
    Run {
        project: String,
        /// Subset to launch, as <project>:<service> (default: all).
        services: Vec<String>,
        /// Print the tmux commands instead of running them.
        #[arg(long)]
        dry_run: bool,
        /// Build the session without attaching to it.
        #[arg(long)]
        detach: bool,
    },
    /// Show help information.
    Help,
    /// Show version information.
    Version,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let command = cli.command.unwrap_or(Commands::List);
    match command {
        Commands::Help => {
            Cli::command().print_help()?;
            println!();
            return Ok(());
        }
        Commands::Version => {
            println!("cloud {}", env!("CARGO_PKG_VERSION"));
            return Ok(());
        }
        _ => {}
    }

    let path = config::config_path(cli.config.as_deref())?;
    let mut store = ConfigStore::open(&path)
        .with_context(|| format!("failed to open registry {}", path.display()))?;
    let mut prompter = TerminalPrompter::stdio(cli.yes);

    match command {
        Commands::List => cmd_list(&store),
        Commands::New { project, path } => cmd_new(&mut store, &mut prompter, &project, path),
        Commands::Remove { project } => cmd_remove(&mut store, &mut prompter, &project),
        Commands::Services { project } => cmd_services(&store, &project),
        Commands::ServiceAdd {
            project,
            name,
            command,
            directory,
        } => cmd_service_add(
            &mut store,
            &mut prompter,
            &project,
            ServiceInput {
                name,
                command,
                directory,
            },
        ),
        Commands::ServiceRemove { target } => cmd_service_remove(&mut store, &mut prompter, &target),
        Commands::ServiceEdit {
            target,
            command,
            directory,
        } => cmd_service_edit(
            &mut store,
            &mut prompter,
            &target,
            ServiceInput {
                name: None,
                command,
                directory,
            },
        ),
        Commands::Run {
            project,
            services,
            dry_run,
            detach,
        } => {
            let request = RunRequest {
                project,
                tokens: services,
                dry_run,
                detach,
            };
            cmd_run(&store, &mut prompter, request).await
        }
        Commands::Help | Commands::Version => Ok(()),
    }
}

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| default.into());
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

/// Values given on the command line; missing ones are prompted for.
#[derive(Debug, Default)]
struct ServiceInput {
    name: Option<String>,
    command: Option<String>,
    directory: Option<String>,
}

#[derive(Debug)]
struct RunRequest {
    project: String,
    tokens: Vec<String>,
    dry_run: bool,
    detach: bool,
}

fn cmd_list(store: &ConfigStore) -> Result<()> {
    let projects = store.list_projects();
    if projects.is_empty() {
        println!("no projects yet; create one with `cloud new <project>`");
        return Ok(());
    }
    for (name, count) in projects {
        let noun = if count == 1 { "service" } else { "services" };
        println!("{}  {} {}", name.bold(), count, noun);
    }
    Ok(())
}

fn cmd_new(
    store: &mut ConfigStore,
    prompter: &mut dyn Prompter,
    project: &str,
    path: Option<String>,
) -> Result<()> {
    let path = match path {
        Some(path) => path,
        None => {
            let cwd = std::env::current_dir().context("failed to read current directory")?;
            prompter.ask("Project path", Some(&cwd.display().to_string()))?
        }
    };
    if !confirm_missing_dir(prompter, &path, "project path")? {
        return Ok(());
    }
    store.create_project(project, &path)?;
    println!("created project {} at {}", project.bold(), path);
    Ok(())
}

fn cmd_remove(store: &mut ConfigStore, prompter: &mut dyn Prompter, project: &str) -> Result<()> {
    let count = store.project(project)?.services.len();
    let question = format!("Remove project '{}' and its {} service(s)?", project, count);
    if !prompter.confirm(&question, false)? {
        println!("cancelled");
        return Ok(());
    }
    store.remove_project(project)?;
    println!("removed project {}", project.bold());
    Ok(())
}

fn cmd_services(store: &ConfigStore, project: &str) -> Result<()> {
    let services = store.list_services(project)?;
    if services.is_empty() {
        println!(
            "{} has no services; add one with `cloud service-add {}`",
            project, project
        );
        return Ok(());
    }
    for (name, service) in services {
        println!("{}", name.bold());
        println!("  command:   {}", service.command);
        println!("  directory: {}", service.directory);
    }
    Ok(())
}

fn cmd_service_add(
    store: &mut ConfigStore,
    prompter: &mut dyn Prompter,
    project: &str,
    input: ServiceInput,
) -> Result<()> {
    let project_path = store.project(project)?.path.clone();
    let name = value_or_ask(prompter, input.name, "Service name", None)?;
    let command = value_or_ask(prompter, input.command, "Command", None)?;
    let directory = value_or_ask(prompter, input.directory, "Directory", Some(&project_path))?;
    if !confirm_missing_dir(prompter, &directory, "directory")? {
        return Ok(());
    }
    let service = store.add_service(project, &name, &command, Some(&directory))?;
    println!(
        "added {}:{} ({} in {})",
        project,
        name.bold(),
        service.command,
        service.directory
    );
    Ok(())
}

fn cmd_service_remove(
    store: &mut ConfigStore,
    prompter: &mut dyn Prompter,
    target: &str,
) -> Result<()> {
    let reference = ServiceRef::parse_strict(target)?;
    if !store
        .project(reference.project)?
        .services
        .contains_key(reference.service)
    {
        return Err(
            error::CloudError::service_not_found(reference.project, reference.service).into(),
        );
    }
    let question = format!("Remove service '{}'?", target);
    if !prompter.confirm(&question, false)? {
        println!("cancelled");
        return Ok(());
    }
    store.remove_service(reference.project, reference.service)?;
    println!("removed {}", target.bold());
    Ok(())
}

fn cmd_service_edit(
    store: &mut ConfigStore,
    prompter: &mut dyn Prompter,
    target: &str,
    input: ServiceInput,
) -> Result<()> {
    let reference = ServiceRef::parse_strict(target)?;
    let current = store
        .project(reference.project)?
        .services
        .get(reference.service)
        .cloned()
        .ok_or_else(|| error::CloudError::service_not_found(reference.project, reference.service))?;

    let command = keep_if_empty(
        value_or_ask(prompter, input.command, "Command", Some(&current.command))?,
        &current.command,
    );
    let directory = keep_if_empty(
        value_or_ask(prompter, input.directory, "Directory", Some(&current.directory))?,
        &current.directory,
    );
    let service = store.edit_service(reference.project, reference.service, &command, Some(&directory))?;
    println!(
        "updated {} ({} in {})",
        target.bold(),
        service.command,
        service.directory
    );
    Ok(())
}

async fn cmd_run(
    store: &ConfigStore,
    prompter: &mut dyn Prompter,
    request: RunRequest,
) -> Result<()> {
    if !request.dry_run {
        deps::require(deps::RUN_DEPENDENCIES)?;
    }
    let resolution = resolve::resolve(store.registry(), &request.project, &request.tokens)?;
    for warning in &resolution.warnings {
        prompter.warn(warning)?;
    }
    let plan = SessionPlan::build(&request.project, &resolution.services)?;

    let nested = !request.dry_run && tmux::inside_session();
    let nested_confirmed = nested
        && prompter.confirm(
            &format!(
                "Already inside a tmux session. Start {} nested anyway?",
                plan.session
            ),
            false,
        )?;
    let options = LaunchOptions {
        nested,
        nested_confirmed,
        attach: !request.detach,
    };

    let outcome = if request.dry_run {
        Orchestrator::new(DryRun::default()).launch(&plan, options).await?
    } else {
        Orchestrator::new(Tmux::default()).launch(&plan, options).await?
    };
    match outcome {
        LaunchOutcome::Declined => println!("cancelled"),
        LaunchOutcome::Detached if !request.dry_run => println!(
            "{} running with {} pane(s); attach with `tmux attach -t {}`",
            plan.session.as_str().bold(),
            plan.panes.len(),
            plan.session
        ),
        LaunchOutcome::Detached | LaunchOutcome::Attached => {}
    }
    Ok(())
}

fn value_or_ask(
    prompter: &mut dyn Prompter,
    value: Option<String>,
    label: &str,
    default: Option<&str>,
) -> Result<String> {
    match value {
        Some(value) => Ok(value),
        None => prompter.ask(label, default),
    }
}

fn keep_if_empty(value: String, current: &str) -> String {
    if value.trim().is_empty() {
        current.to_string()
    } else {
        value
    }
}

// Returns false when the user declines to continue with a missing directory.
fn confirm_missing_dir(prompter: &mut dyn Prompter, dir: &str, label: &str) -> Result<bool> {
    if dir.trim().is_empty() || dir.starts_with('~') || Path::new(dir).exists() {
        return Ok(true);
    }
    prompter.warn(&format!("{} '{}' does not exist", label, dir))?;
    if prompter.confirm("Continue anyway?", false)? {
        return Ok(true);
    }
    println!("cancelled");
    Ok(false)
}

fn help_styles() -> Styles {
    Styles::styled()
        .header(
            Style::new()
                .fg_color(Some(AnsiColor::Cyan.into()))
                .effects(Effects::BOLD),
        )
        .usage(
            Style::new()
                .fg_color(Some(AnsiColor::Green.into()))
                .effects(Effects::BOLD),
        )
        .literal(Style::new().fg_color(Some(AnsiColor::Yellow.into())))
        .placeholder(Style::new().fg_color(Some(AnsiColor::Magenta.into())))
        .valid(Style::new().fg_color(Some(AnsiColor::Green.into())))
        .invalid(
            Style::new()
                .fg_color(Some(AnsiColor::Red.into()))
                .effects(Effects::BOLD),
        )
}
