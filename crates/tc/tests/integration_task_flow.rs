//! End-to-end assign/read/ack flow

use assert_cmd::Command;
use tempfile::TempDir;

fn tc(temp_dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("tc").unwrap();
    cmd.env("TEAM_CHAT_HOME", temp_dir.path());
    cmd
}

fn json_stdout(cmd: &mut Command) -> serde_json::Value {
    let output = cmd.assert().success().get_output().stdout.clone();
    serde_json::from_slice(&output).unwrap()
}

#[test]
fn test_assign_read_ack_happy_path() {
    let temp_dir = TempDir::new().unwrap();

    tc(&temp_dir)
        .args(["init", "demo", "--members", "lead,dev,qa"])
        .assert()
        .success();

    let assigned = json_stdout(tc(&temp_dir).args([
        "task-assign",
        "demo",
        "--from",
        "lead",
        "--to",
        "dev",
        "--task-id",
        "task_001",
        "--subject",
        "Impl",
        "--trace-id",
        "tr_001",
        "--json",
    ]));
    let message_id = assigned["data"]["message_id"].as_str().unwrap().to_string();

    // Exactly one unread envelope, carrying the task id
    let page = json_stdout(tc(&temp_dir).args([
        "read", "demo", "--agent", "dev", "--unread", "--json",
    ]));
    let envelopes = page["data"]["envelopes"].as_array().unwrap();
    assert_eq!(envelopes.len(), 1);
    assert_eq!(envelopes[0]["task_id"], "task_001");
    assert_eq!(envelopes[0]["id"], message_id.as_str());

    tc(&temp_dir)
        .args(["ack", "demo", "--agent", "dev", "--message-id", &message_id])
        .assert()
        .success();

    // Unread view drains after the ack
    let page = json_stdout(tc(&temp_dir).args([
        "read", "demo", "--agent", "dev", "--unread", "--json",
    ]));
    assert!(page["data"]["envelopes"].as_array().unwrap().is_empty());

    let status = json_stdout(tc(&temp_dir).args(["status", "demo", "--json"]));
    assert_eq!(status["data"]["unread_total"], 0);
    assert!(status["data"]["acked_total"].as_u64().unwrap() >= 1);

    // The snapshot was derived from the assign message
    let snapshot_path = temp_dir.path().join("teams/demo/tasks/task_001.json");
    let snapshot: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&snapshot_path).unwrap()).unwrap();
    assert_eq!(snapshot["subject"], "Impl");
    assert_eq!(snapshot["assignee"], "dev");
    assert_eq!(snapshot["status"], "assigned");

    // The trace stitches the flow together
    let trace = json_stdout(tc(&temp_dir).args([
        "trace", "demo", "--trace-id", "tr_001", "--json",
    ]));
    let kinds: Vec<String> = trace["data"]["events"]
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["kind"].as_str().unwrap().to_string())
        .collect();
    assert!(kinds.contains(&"sent".to_string()));
    assert!(kinds.contains(&"acked".to_string()));
}

#[test]
fn test_task_update_advances_snapshot() {
    let temp_dir = TempDir::new().unwrap();

    tc(&temp_dir)
        .args(["init", "demo", "--members", "lead,dev"])
        .assert()
        .success();

    tc(&temp_dir)
        .args([
            "task-assign",
            "demo",
            "--from",
            "lead",
            "--to",
            "dev",
            "--task-id",
            "task_7",
            "--subject",
            "Fix parser",
        ])
        .assert()
        .success();

    tc(&temp_dir)
        .args([
            "task-update",
            "demo",
            "--from",
            "dev",
            "--to",
            "lead",
            "--task-id",
            "task_7",
            "--status",
            "in_progress",
            "--note",
            "halfway",
        ])
        .assert()
        .success();

    let snapshot_path = temp_dir.path().join("teams/demo/tasks/task_7.json");
    let snapshot: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&snapshot_path).unwrap()).unwrap();
    assert_eq!(snapshot["status"], "in_progress");
    // Subject survives an update that does not carry one
    assert_eq!(snapshot["subject"], "Fix parser");
    assert_eq!(snapshot["details"], "halfway");
    assert_eq!(snapshot["snapshot_version"], 2);
}

#[test]
fn test_double_ack_is_idempotent() {
    let temp_dir = TempDir::new().unwrap();

    tc(&temp_dir)
        .args(["init", "demo", "--members", "lead,dev"])
        .assert()
        .success();
    tc(&temp_dir)
        .args([
            "send",
            "demo",
            "--from",
            "lead",
            "--to",
            "dev",
            "--type",
            "message",
            "--message-id",
            "msg_1",
            "--payload",
            "{}",
        ])
        .assert()
        .success();

    tc(&temp_dir)
        .args(["ack", "demo", "--agent", "dev", "--message-id", "msg_1"])
        .assert()
        .success();
    let second = json_stdout(tc(&temp_dir).args([
        "ack",
        "demo",
        "--agent",
        "dev",
        "--message-id",
        "msg_1",
        "--json",
    ]));
    assert_eq!(second["data"]["already_acked"], true);
    assert_eq!(second["data"]["acked_by"], "dev");
}
