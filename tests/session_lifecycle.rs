//! End-to-end session lifecycle against scripted model and environment
//! doubles: focus progression, dispatch visibility, exit semantics, and
//! completion, with no real processes spawned.

use simuser::core::history::{Role, SessionHistory};
use simuser::core::task::{TaskNode, find};
use simuser::io::config::UserConfig;
use simuser::orchestrator::{Orchestrator, SessionOutcome};
use simuser::policy::{JudgedPolicy, SymbolicPolicy};
use simuser::test_support::{ScriptedEnv, ScriptedExec, ScriptedModel, task_leaf, task_node};
use simuser::user::User;

fn request(text: &str) -> String {
    format!("<think>I should ask</think><response>```request\n{text}\n```</response>")
}

fn execute(cmd: &str) -> String {
    format!("<think>I will try this</think><response>```bash\n{cmd}\n```</response>")
}

fn exit_reply() -> String {
    "<think>that should be everything</think><response>[USER END] thanks!</response>".to_string()
}

fn three_leaf_tree() -> TaskNode {
    task_node(
        "root",
        vec![task_leaf("1"), task_leaf("2"), task_leaf("3")],
    )
}

#[test]
fn symbolic_session_runs_to_completion() {
    // Focus pointer over [root, 1, 2, 3] with cadence 2: the first exit at
    // turn 5 is deferred (traversal not exhausted), the one at turn 7 ends
    // the session.
    let model = ScriptedModel::new([
        request("Where do I start?"),
        "Start by listing the files:\n```bash\nls\n```".to_string(),
        execute("ls"),
        execute("touch step_one"),
        execute("touch step_two"),
        exit_reply(),
        execute("echo done"),
        exit_reply(),
    ]);
    let env = ScriptedEnv::new([
        ScriptedExec::ok("step_one step_two\n"),
        ScriptedExec::ok("created\n"),
        ScriptedExec::ok("created\n"),
        ScriptedExec::ok("done\n"),
    ]);

    let mut orchestrator = Orchestrator::new(
        &model,
        &env,
        Box::new(SymbolicPolicy::new(2, 64)),
        User::new(UserConfig::default()),
        "set up the project scaffolding",
        20,
        Some(three_leaf_tree()),
    )
    .expect("construct");

    let report = orchestrator.run().expect("run");
    assert_eq!(report.outcome, SessionOutcome::Exited);
    assert_eq!(report.turns, 7);
    assert!(report.is_complete());
    for id in ["root", "1", "2", "3"] {
        assert!(find(&report.tree, id).expect(id).is_complete());
    }

    // Every scripted reply and outcome was consumed, in order.
    assert_eq!(model.remaining(), 0);
    assert_eq!(
        env.commands(),
        vec!["ls", "touch step_one", "touch step_two", "echo done"]
    );

    // The deferred exit stays in the record alongside the terminal one.
    let exits = report
        .messages
        .iter()
        .filter(|m| m.role == Role::User && m.response.contains("[USER END]"))
        .count();
    assert_eq!(exits, 2);

    // One focus note per turn, orchestrator-only.
    let focus_notes: Vec<_> = report
        .messages
        .iter()
        .filter(|m| m.response.starts_with("What is currently on user's mind:"))
        .collect();
    assert_eq!(focus_notes.len(), 7);
    assert!(focus_notes.iter().all(|m| m.visible_to == [Role::Orchestrator]));
}

#[test]
fn agent_never_sees_commands_or_reasoning() {
    let model = ScriptedModel::new([
        request("What does df do?"),
        "It reports disk usage.".to_string(),
        execute("df -h"),
        exit_reply(),
    ]);
    let env = ScriptedEnv::new([ScriptedExec::ok("Filesystem Size Used\n")]);

    let mut orchestrator = Orchestrator::new(
        &model,
        &env,
        Box::new(SymbolicPolicy::new(1, 64)),
        User::new(UserConfig::default()),
        "check disk usage",
        20,
        Some(task_node("root", vec![task_leaf("1")])),
    )
    .expect("construct");
    let report = orchestrator.run().expect("run");

    // No agent-visible message carries a raw command.
    assert!(
        report
            .messages
            .iter()
            .filter(|m| m.is_visible_to(Role::Agent))
            .all(|m| m.action.is_empty())
    );

    // Rebuild the agent's rendered view: reasoning must be absent.
    let mut history = SessionHistory::default();
    for message in &report.messages {
        history.append(message.clone());
    }
    let agent_view = history.get(Role::Agent).expect("agent view");
    assert!(!agent_view.is_empty());
    for chat in &agent_view {
        assert!(!chat.content.contains("I should ask"));
        assert!(!chat.content.contains("I will try this"));
        assert!(!chat.content.contains("df -h"));
    }
}

#[test]
fn judged_session_judges_focus_perception_and_progress() {
    let model = ScriptedModel::new([
        // Turn 1: focus judgment, user action, perception, progress.
        r#"<RETURN_NODES>["1"]</RETURN_NODES>"#.to_string(),
        execute("crontab -l"),
        r#"<PERCEPTION>my crontab is empty</PERCEPTION>
<EXTERNAL_MEMORY>{"0": {"summary": "crontab output", "content": "no crontab for user"}}</EXTERNAL_MEMORY>"#
            .to_string(),
        r#"<COMPLETED_NODES>["1"]</COMPLETED_NODES>"#.to_string(),
        // Turn 2: focus judgment, the user exits, and a final progress
        // judgment closes out the tree.
        r#"<RETURN_NODES>["1"]</RETURN_NODES>"#.to_string(),
        exit_reply(),
        "<COMPLETED_NODES>[]</COMPLETED_NODES>".to_string(),
    ]);
    let env = ScriptedEnv::new([ScriptedExec::ok("no crontab for user\n")]);

    let mut orchestrator = Orchestrator::new(
        &model,
        &env,
        Box::new(JudgedPolicy::new(false, 10)),
        User::new(UserConfig::default()),
        "set up a cron job",
        20,
        Some(task_node("root", vec![task_leaf("1")])),
    )
    .expect("construct");
    let report = orchestrator.run().expect("run");

    assert_eq!(report.outcome, SessionOutcome::Exited);
    assert!(report.is_complete());
    assert_eq!(model.remaining(), 0);

    // The user saw the judged perception, not the raw output.
    let perception = report
        .messages
        .iter()
        .find(|m| m.role == Role::System && m.is_visible_to(Role::User))
        .expect("perception message");
    assert_eq!(perception.response, "my crontab is empty");

    // The raw environment output stays orchestrator-only in judged mode.
    let raw = report
        .messages
        .iter()
        .find(|m| m.role == Role::Environment)
        .expect("raw output message");
    assert_eq!(raw.visible_to, [Role::Orchestrator]);
}

#[test]
fn step_limit_reports_incomplete_tree() {
    let model = ScriptedModel::new([execute("ls"), execute("ls")]);
    let env = ScriptedEnv::new([ScriptedExec::ok("a\n"), ScriptedExec::ok("a\n")]);

    let mut orchestrator = Orchestrator::new(
        &model,
        &env,
        Box::new(SymbolicPolicy::new(2, 64)),
        User::new(UserConfig::default()),
        "a task that needs more than two turns",
        2,
        Some(three_leaf_tree()),
    )
    .expect("construct");
    let report = orchestrator.run().expect("run");

    assert_eq!(report.outcome, SessionOutcome::StepLimit);
    assert_eq!(report.turns, 2);
    assert!(!report.is_complete());
    assert!(
        report
            .messages
            .last()
            .expect("messages")
            .response
            .contains("[StepLimit]")
    );
}
