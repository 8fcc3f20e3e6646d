//! End-to-end runs driven by a scripted completion client.
//!
//! Each test initializes a temp project, scripts the model's replies and runs the
//! orchestrator against a real confined executor.

use std::fs;

use agentloop::core::types::{Action, RunStatus, ValidationVerdict};
use agentloop::io::completion::Role;
use agentloop::io::process::CancelToken;
use agentloop::io::run_state::load_run_state;
use agentloop::io::task::{TaskConfig, write_task};
use agentloop::orchestrator::{CONTINUE_PROMPT, Orchestrator};
use agentloop::test_support::{RecordingExecutor, ScriptedCompletionClient, TestProject, reply, truncated};

fn run_json(command: &str) -> String {
    Action::RunCommand {
        command: command.to_string(),
        reasoning: "next step".to_string(),
    }
    .to_json()
}

const COMPLETE: &str = r#"{"action":"complete","reasoning":"file is in place"}"#;

/// Scenario: create `a.txt` containing `hi`, then signal completion.
#[test]
fn create_file_then_complete() {
    let project = TestProject::new("Create a.txt containing hi", 5).expect("project");
    let setup = project.setup().expect("setup");
    let client = ScriptedCompletionClient::new(vec![reply(&run_json("printf hi > a.txt")), reply(COMPLETE)]);
    let executor = RecordingExecutor::confined(&setup);

    let outcome = Orchestrator::new(&client, &executor, setup, CancelToken::new())
        .run()
        .expect("run");

    assert_eq!(outcome.status, RunStatus::Completed);
    assert!(outcome.task_completed);
    assert_eq!(outcome.iterations, 2);
    assert_eq!(outcome.deliverables, vec!["a.txt".to_string()]);
    assert_eq!(
        fs::read_to_string(project.workspace_root().join("a.txt")).expect("a.txt"),
        "hi"
    );

    let state = load_run_state(&project.paths().run_state_path).expect("state");
    assert!(state.task_completed);
    assert_eq!(state.status, Some(RunStatus::Completed));
    assert_eq!(state.deliverables, vec!["a.txt".to_string()]);
    assert_eq!(state.iteration, 2);

    assert!(outcome.run_dir.join("REPORT.md").is_file());
    assert!(outcome.run_dir.join("session.json").is_file());
    assert!(outcome.run_dir.join("metrics.json").is_file());
    assert_eq!(
        fs::read_to_string(outcome.run_dir.join("deliverables/a.txt")).expect("copy"),
        "hi"
    );
}

/// Scenario: `rm -rf /` is rejected, recorded, nothing runs, and the model is prompted again.
#[test]
fn destructive_command_is_rejected_and_loop_continues() {
    let project = TestProject::new("Clean up", 3).expect("project");
    let setup = project.setup().expect("setup");
    let client = ScriptedCompletionClient::new(vec![reply(&run_json("rm -rf /")), reply(COMPLETE)]);
    let executor = RecordingExecutor::confined(&setup);

    let outcome = Orchestrator::new(&client, &executor, setup, CancelToken::new())
        .run()
        .expect("run");

    assert!(executor.executed().is_empty(), "nothing may reach the executor");
    assert_eq!(outcome.status, RunStatus::Completed);
    assert_eq!(outcome.metrics.rejected, 1);

    let requests = client.requests();
    assert_eq!(requests.len(), 2);
    let observation = requests[1].messages.last().expect("observation");
    assert_eq!(observation.role, Role::User);
    assert!(observation.content.contains("refused by the security validator"));
    assert!(observation.content.contains("destructive filesystem"));

    let meta: serde_json::Value = serde_json::from_str(
        &fs::read_to_string(outcome.run_dir.join("iterations/1/meta.json")).expect("meta"),
    )
    .expect("json");
    assert_eq!(meta["verdict"]["verdict"], "rejected");
    assert_eq!(meta["error"]["kind"], "validation_rejected");
}

/// Scenario: the reply is cut off twice, the third fragment finishes it.
#[test]
fn truncated_reply_is_reassembled_from_three_fragments() {
    let project = TestProject::new("Finish", 3).expect("project");
    let setup = project.setup().expect("setup");
    let (first, rest) = COMPLETE.split_at(15);
    let (second, third) = rest.split_at(20);
    let client = ScriptedCompletionClient::new(vec![truncated(first), truncated(second), reply(third)]);
    let executor = RecordingExecutor::confined(&setup);

    let outcome = Orchestrator::new(&client, &executor, setup, CancelToken::new())
        .run()
        .expect("run");

    assert_eq!(outcome.status, RunStatus::Completed);
    assert_eq!(outcome.iterations, 1);
    assert_eq!(outcome.metrics.completion_calls, 3);
    assert_eq!(outcome.metrics.continuation_calls, 2);
    assert_eq!(
        fs::read_to_string(outcome.run_dir.join("iterations/1/response.txt")).expect("response"),
        COMPLETE
    );

    let requests = client.requests();
    let last = &requests[2].messages;
    let n = last.len();
    assert_eq!(last[n - 4].content, first);
    assert_eq!(last[n - 3].content, CONTINUE_PROMPT);
    assert_eq!(last[n - 2].content, second);
    assert_eq!(last[n - 1].content, CONTINUE_PROMPT);
    assert_eq!(last[n - 2].role, Role::Assistant);
}

/// Verifies the run stops exactly at `max_iterations` without completing.
#[test]
fn budget_is_exhausted_at_max_iterations() {
    let project = TestProject::new("Keep going", 2).expect("project");
    let setup = project.setup().expect("setup");
    let client = ScriptedCompletionClient::new(vec![
        reply(&run_json("echo 1")),
        reply(&run_json("echo 2")),
        reply(COMPLETE),
    ]);
    let executor = RecordingExecutor::confined(&setup);

    let outcome = Orchestrator::new(&client, &executor, setup, CancelToken::new())
        .run()
        .expect("run");

    assert_eq!(outcome.status, RunStatus::BudgetExhausted);
    assert_eq!(outcome.iterations, 2);
    assert!(!outcome.task_completed);
    assert_eq!(client.requests().len(), 2);
    assert_eq!(executor.executed().len(), 2);
}

/// Verifies free text claiming completion is a malformed turn, not a completion.
#[test]
fn prose_completion_claim_does_not_complete() {
    let project = TestProject::new("Anything", 1).expect("project");
    let setup = project.setup().expect("setup");
    let client = ScriptedCompletionClient::new(vec![reply("TASK COMPLETE. All done!")]);
    let executor = RecordingExecutor::confined(&setup);

    let outcome = Orchestrator::new(&client, &executor, setup, CancelToken::new())
        .run()
        .expect("run");

    assert_eq!(outcome.status, RunStatus::BudgetExhausted);
    assert!(!outcome.task_completed);
    assert_eq!(outcome.metrics.malformed_responses, 1);
}

#[test]
fn fenced_reply_and_write_file_are_accepted() {
    let project = TestProject::new("Write a script", 3).expect("project");
    let setup = project.setup().expect("setup");
    let write = Action::WriteFile {
        path: "bin/run.sh".to_string(),
        content: "echo ok\n".to_string(),
        reasoning: String::new(),
    }
    .to_json();
    let client = ScriptedCompletionClient::new(vec![
        reply(&format!("```json\n{write}\n```")),
        reply(r#"{"action":"complete","deliverables":["bin/run.sh","../../etc/passwd"]}"#),
    ]);
    let executor = RecordingExecutor::confined(&setup);

    let outcome = Orchestrator::new(&client, &executor, setup, CancelToken::new())
        .run()
        .expect("run");

    assert_eq!(outcome.status, RunStatus::Completed);
    assert_eq!(outcome.deliverables, vec!["bin/run.sh".to_string()]);
    assert!(matches!(
        executor.executed().as_slice(),
        [Action::WriteFile { path, .. }] if path == "bin/run.sh"
    ));
}

/// Verifies context files reach the first prompt and a missing one is skipped.
#[test]
fn context_files_are_included_in_the_task_message() {
    let project = TestProject::new("Summarize notes", 1).expect("project");
    fs::write(project.workspace_root().join("notes.md"), "alpha beta").expect("notes");
    write_task(
        &project.paths().task_path,
        &TaskConfig {
            task_description: "Summarize notes".to_string(),
            max_iterations: 1,
            context_files: vec!["notes.md".to_string(), "missing.md".to_string()],
        },
    )
    .expect("task");
    let setup = project.setup().expect("setup");
    let client = ScriptedCompletionClient::new(vec![reply(COMPLETE)]);
    let executor = RecordingExecutor::confined(&setup);

    let outcome = Orchestrator::new(&client, &executor, setup, CancelToken::new())
        .run()
        .expect("run");

    assert_eq!(outcome.status, RunStatus::Completed);
    let requests = client.requests();
    let task_message = &requests[0].messages[1].content;
    assert!(task_message.contains("#### notes.md"));
    assert!(task_message.contains("alpha beta"));
    assert!(!task_message.contains("missing.md"));
}

#[test]
fn failed_command_is_an_observation_not_a_failure() {
    let project = TestProject::new("Probe", 2).expect("project");
    let setup = project.setup().expect("setup");
    let client = ScriptedCompletionClient::new(vec![
        reply(&run_json("ls does-not-exist")),
        reply(COMPLETE),
    ]);
    let executor = RecordingExecutor::confined(&setup);

    let outcome = Orchestrator::new(&client, &executor, setup, CancelToken::new())
        .run()
        .expect("run");

    assert_eq!(outcome.status, RunStatus::Completed);
    assert_eq!(outcome.metrics.commands_failed, 1);
    let requests = client.requests();
    let observation = &requests[1].messages.last().expect("observation").content;
    assert!(!observation.contains("Exit code: 0"));
    assert!(observation.contains("stderr:"));
    let meta: serde_json::Value = serde_json::from_str(
        &fs::read_to_string(outcome.run_dir.join("iterations/1/meta.json")).expect("meta"),
    )
    .expect("json");
    assert_eq!(
        serde_json::from_value::<ValidationVerdict>(meta["verdict"].clone()).expect("verdict"),
        ValidationVerdict::Approved
    );
}
