//! CLI tests for the `agentloop` binary.
//!
//! Spawns the binary and verifies exit codes for `check`, `status` and `run`.

use std::process::Command;

use agentloop::exit_codes;
use agentloop::io::init::{InitOptions, init_agent};

fn agentloop(root: &std::path::Path) -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_agentloop"));
    cmd.arg("--root").arg(root);
    cmd
}

#[test]
fn check_rejects_destructive_command() {
    let temp = tempfile::tempdir().expect("tempdir");
    let output = agentloop(temp.path())
        .args(["check", "rm -rf /"])
        .output()
        .expect("agentloop check");

    assert_eq!(output.status.code(), Some(exit_codes::REJECTED));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.starts_with("rejected: destructive filesystem"));
}

#[test]
fn check_approves_listing() {
    let temp = tempfile::tempdir().expect("tempdir");
    let output = agentloop(temp.path())
        .args(["check", "ls -la"])
        .output()
        .expect("agentloop check");

    assert_eq!(output.status.code(), Some(exit_codes::OK));
    assert_eq!(String::from_utf8_lossy(&output.stdout).trim(), "approved");
}

#[test]
fn init_then_status_prints_idle_state() {
    let temp = tempfile::tempdir().expect("tempdir");
    let status = agentloop(temp.path())
        .arg("init")
        .status()
        .expect("agentloop init");
    assert_eq!(status.code(), Some(exit_codes::OK));

    let output = agentloop(temp.path())
        .arg("status")
        .output()
        .expect("agentloop status");
    assert_eq!(output.status.code(), Some(exit_codes::OK));
    let state: serde_json::Value = serde_json::from_slice(&output.stdout).expect("json");
    assert_eq!(state["task_completed"], false);
    assert_eq!(state["iteration"], 0);
}

/// Verifies `run` refuses to start when no completion command is configured.
#[test]
fn run_without_completion_command_fails() {
    let temp = tempfile::tempdir().expect("tempdir");
    init_agent(temp.path(), &InitOptions { force: false }).expect("init");

    let output = agentloop(temp.path())
        .args(["run", "--task", "make a.txt"])
        .output()
        .expect("agentloop run");

    assert_eq!(output.status.code(), Some(exit_codes::FAILED));
    assert!(String::from_utf8_lossy(&output.stderr).contains("completion.command is not set"));
}
