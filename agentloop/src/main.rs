//! `agentloop` command-line entry point.
//!
//! Scaffolds `.agentloop/`, runs the agent loop against the configured
//! completion command, checks single commands against the validator and prints
//! the current run state.

use std::path::{Path, PathBuf};

use agentloop::core::types::RunStatus;
use agentloop::core::validator::{RuleSet, SecurityValidator};
use agentloop::exit_codes;
use agentloop::io::completion::CommandCompletionClient;
use agentloop::io::config::load_config;
use agentloop::io::init::{AgentPaths, InitOptions, init_agent};
use agentloop::io::process::CancelToken;
use agentloop::io::run_state::load_run_state;
use agentloop::io::sandbox::ConfinedExecutor;
use agentloop::logging;
use agentloop::orchestrator::{Orchestrator, RunSetup, TaskOverrides, generate_run_id};
use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use signal_hook::consts::{SIGINT, SIGTERM};

#[derive(Parser)]
#[command(
    name = "agentloop",
    version,
    about = "Language-model agent loop with a validated, confined command sandbox"
)]
struct Cli {
    /// Project root containing `.agentloop/`.
    #[arg(long, global = true, default_value = ".")]
    root: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create `.agentloop/` with a default config, task and system prompt.
    Init {
        /// Overwrite existing files.
        #[arg(short, long)]
        force: bool,
    },
    /// Run the agent loop until completion, budget exhaustion or failure.
    Run {
        /// Task description; overrides `task.json`.
        #[arg(long)]
        task: Option<String>,
        /// Iteration budget; overrides `task.json`.
        #[arg(long)]
        max_iterations: Option<u32>,
    },
    /// Print the validator's verdict for a command.
    Check {
        /// The command string, quoted as one argument.
        command: String,
    },
    /// Print the current run state.
    Status,
}

fn main() {
    logging::init();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{err:#}");
            std::process::exit(exit_codes::FAILED);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    let root = std::path::absolute(&cli.root)
        .with_context(|| format!("resolve root {}", cli.root.display()))?;
    match cli.command {
        Command::Init { force } => cmd_init(&root, force),
        Command::Run {
            task,
            max_iterations,
        } => cmd_run(
            &root,
            &TaskOverrides {
                task_description: task,
                max_iterations,
            },
        ),
        Command::Check { command } => cmd_check(&root, &command),
        Command::Status => cmd_status(&root),
    }
}

fn cmd_init(root: &Path, force: bool) -> Result<i32> {
    let paths = init_agent(root, &InitOptions { force })?;
    println!("initialized {}", paths.agent_dir.display());
    Ok(exit_codes::OK)
}

fn cmd_run(root: &Path, overrides: &TaskOverrides) -> Result<i32> {
    let setup = RunSetup::load(root, generate_run_id(), overrides)?;
    if setup.config.completion.command.trim().is_empty() {
        bail!(
            "completion.command is not set in {}",
            setup.paths.config_path.display()
        );
    }
    let client =
        CommandCompletionClient::new(&setup.config.completion.command, setup.config.retry_policy())?;
    let executor = ConfinedExecutor::new(setup.workspace.clone(), setup.config.executor_settings());

    let cancel = CancelToken::new();
    for signal in [SIGINT, SIGTERM] {
        signal_hook::flag::register(signal, cancel.flag())
            .with_context(|| format!("register handler for signal {signal}"))?;
    }

    let outcome = Orchestrator::new(&client, &executor, setup, cancel).run()?;
    println!("{} {}", outcome.run_id, outcome.status);
    if let Some(failure) = &outcome.failure {
        println!("failure: {failure}");
    }
    for path in &outcome.deliverables {
        println!("deliverable: {path}");
    }
    println!("report: {}", outcome.run_dir.join("REPORT.md").display());
    Ok(match outcome.status {
        RunStatus::Completed => exit_codes::OK,
        RunStatus::BudgetExhausted => exit_codes::BUDGET_EXHAUSTED,
        _ => exit_codes::FAILED,
    })
}

fn cmd_check(root: &Path, command: &str) -> Result<i32> {
    let config = load_config(&AgentPaths::new(root).config_path)?;
    let rules = RuleSet::new(config.workspace_root(root)).with_allowed_hosts(config.allowed_hosts);
    let verdict = SecurityValidator::new(rules).validate(command);
    println!("{verdict}");
    Ok(if verdict.is_approved() {
        exit_codes::OK
    } else {
        exit_codes::REJECTED
    })
}

fn cmd_status(root: &Path) -> Result<i32> {
    let path = AgentPaths::new(root).run_state_path;
    let state = load_run_state(&path)?;
    let mut payload = serde_json::to_string_pretty(&state).context("serialize run state")?;
    payload.push('\n');
    print!("{payload}");
    Ok(exit_codes::OK)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_init_force() {
        let cli = Cli::parse_from(["agentloop", "init", "--force"]);
        assert!(matches!(cli.command, Command::Init { force: true }));
        assert_eq!(cli.root, PathBuf::from("."));
    }

    #[test]
    fn parse_run_overrides() {
        let cli = Cli::parse_from([
            "agentloop",
            "run",
            "--root",
            "/tmp/project",
            "--task",
            "make a.txt",
            "--max-iterations",
            "4",
        ]);
        assert_eq!(cli.root, PathBuf::from("/tmp/project"));
        match cli.command {
            Command::Run {
                task,
                max_iterations,
            } => {
                assert_eq!(task.as_deref(), Some("make a.txt"));
                assert_eq!(max_iterations, Some(4));
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn parse_check_takes_one_argument() {
        let cli = Cli::parse_from(["agentloop", "check", "rm -rf /"]);
        assert!(matches!(cli.command, Command::Check { command } if command == "rm -rf /"));
    }
}
