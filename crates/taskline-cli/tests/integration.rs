#![allow(deprecated)]
use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

fn taskline(dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("taskline").unwrap();
    cmd.current_dir(dir.path())
        .env("TASKLINE_CONFIG", dir.path().join("taskline.yaml"))
        .env_remove("TASKLINE_STORE")
        .env_remove("RUST_LOG");
    cmd
}

fn json_out(cmd: &mut Command) -> serde_json::Value {
    let out = cmd.arg("--json").output().unwrap();
    assert!(
        out.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&out.stderr)
    );
    serde_json::from_slice(&out.stdout).unwrap()
}

/// Receiver `unit-app-0` alive and operation "1" with action "2" queued.
fn seed(dir: &TempDir) {
    taskline(dir)
        .args(["receivers", "set-life", "unit-app-0", "alive"])
        .assert()
        .success();
    taskline(dir)
        .args(["operations", "enqueue", "nightly", "backup"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Enqueued operation 1"));
    taskline(dir)
        .args([
            "actions", "enqueue", "1", "unit-app-0", "backup", "--param", "depth=2",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("Enqueued action 2 (backup) for app/0"));
}

// ---------------------------------------------------------------------------
// taskline config
// ---------------------------------------------------------------------------

#[test]
fn config_show_defaults_without_file() {
    let dir = TempDir::new().unwrap();
    let v = json_out(taskline(&dir).args(["config", "show"]));
    assert_eq!(v["model_uuid"], "local");
    assert_eq!(v["txn"]["max_attempts"], 3);
    assert_eq!(v["prune"]["max_age_hours"], 336);
}

#[test]
fn config_init_then_validate() {
    let dir = TempDir::new().unwrap();
    taskline(&dir).args(["config", "init"]).assert().success();
    assert!(dir.path().join("taskline.yaml").exists());
    taskline(&dir).args(["config", "init"]).assert().failure();
    taskline(&dir)
        .args(["config", "validate"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Config is valid"));
}

#[test]
fn config_validate_reports_errors() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("taskline.yaml"), "txn:\n  max_attempts: 0\n").unwrap();
    taskline(&dir)
        .args(["config", "validate"])
        .assert()
        .failure()
        .stdout(predicate::str::contains("txn.max_attempts"));
}

// ---------------------------------------------------------------------------
// taskline actions
// ---------------------------------------------------------------------------

#[test]
fn action_lifecycle() {
    let dir = TempDir::new().unwrap();
    seed(&dir);

    let v = json_out(taskline(&dir).args(["actions", "begin", "2"]));
    assert_eq!(v["status"], "running");

    taskline(&dir)
        .args(["actions", "log", "2", "halfway", "there"])
        .assert()
        .success();

    let v = json_out(taskline(&dir).args([
        "actions",
        "finish",
        "2",
        "--status",
        "completed",
        "--message",
        "done",
        "--result",
        "bytes=1024",
    ]));
    assert_eq!(v["status"], "completed");
    assert_eq!(v["results"]["bytes"], 1024);

    taskline(&dir)
        .args(["actions", "show", "2"])
        .assert()
        .success()
        .stdout(predicate::str::contains("halfway there"))
        .stdout(predicate::str::contains("Message:   done"));

    let op = json_out(taskline(&dir).args(["operations", "show", "1"]));
    assert_eq!(op["operation"]["status"], "completed");
    assert_eq!(op["operation"]["complete_task_count"], 1);
    assert_eq!(op["actions"].as_array().unwrap().len(), 1);
}

#[test]
fn finishing_twice_fails() {
    let dir = TempDir::new().unwrap();
    seed(&dir);
    taskline(&dir)
        .args(["actions", "cancel", "2"])
        .assert()
        .success()
        .stdout(predicate::str::contains("cancelled"));
    taskline(&dir)
        .args(["actions", "finish", "2", "--status", "failed"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid transition"));
}

#[test]
fn enqueue_for_dying_receiver_fails() {
    let dir = TempDir::new().unwrap();
    seed(&dir);
    taskline(&dir)
        .args(["receivers", "set-life", "unit-app-0", "dying"])
        .assert()
        .success();
    taskline(&dir)
        .args(["actions", "enqueue", "1", "unit-app-0", "backup"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("is not alive"));
}

#[test]
fn enqueue_under_unknown_operation_fails() {
    let dir = TempDir::new().unwrap();
    seed(&dir);
    taskline(&dir)
        .args(["actions", "enqueue", "99", "unit-app-0", "backup"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("not found"));
}

#[test]
fn list_filters_by_receiver_and_status() {
    let dir = TempDir::new().unwrap();
    seed(&dir);
    taskline(&dir)
        .args(["receivers", "set-life", "unit-app-1", "alive"])
        .assert()
        .success();
    taskline(&dir)
        .args(["actions", "enqueue", "1", "unit-app-1", "restart"])
        .assert()
        .success();
    taskline(&dir).args(["actions", "begin", "3"]).assert().success();

    let all = json_out(taskline(&dir).args(["actions", "list"]));
    assert_eq!(all.as_array().unwrap().len(), 2);

    let pending = json_out(taskline(&dir).args(["actions", "list", "--status", "pending"]));
    assert_eq!(pending.as_array().unwrap().len(), 1);
    assert_eq!(pending[0]["id"], "2");

    let running = json_out(taskline(&dir).args([
        "actions",
        "list",
        "--receiver",
        "unit-app-1",
        "--status",
        "running",
    ]));
    assert_eq!(running[0]["name"], "restart");

    taskline(&dir)
        .args(["actions", "list", "--name", "backup"])
        .assert()
        .success()
        .stdout(predicate::str::contains("backup"))
        .stdout(predicate::str::contains("restart").not());

    taskline(&dir)
        .args(["actions", "list", "--status", "bogus"])
        .assert()
        .failure();
}

#[test]
fn find_matches_short_ids_exactly() {
    let dir = TempDir::new().unwrap();
    seed(&dir);
    taskline(&dir)
        .args(["actions", "find", "2"])
        .assert()
        .success()
        .stdout(predicate::str::contains("action-2"));
    taskline(&dir)
        .args(["actions", "find", "20"])
        .assert()
        .success()
        .stdout(predicate::str::contains("No actions match"));
}

#[test]
fn receiver_show_lists_outstanding_actions() {
    let dir = TempDir::new().unwrap();
    seed(&dir);
    let v = json_out(taskline(&dir).args(["receivers", "show", "unit-app-0"]));
    assert_eq!(v["life"], "alive");
    assert_eq!(v["outstanding"], serde_json::json!(["2"]));
}

// ---------------------------------------------------------------------------
// taskline prune
// ---------------------------------------------------------------------------

#[test]
fn prune_keeps_recent_history() {
    let dir = TempDir::new().unwrap();
    seed(&dir);
    taskline(&dir)
        .args(["actions", "finish", "2", "--status", "completed"])
        .assert()
        .success();
    let v = json_out(taskline(&dir).args(["prune", "--max-age-hours", "1"]));
    assert_eq!(v["operations_deleted"], 0);
    assert_eq!(v["orphan_actions_deleted"], 0);
    taskline(&dir).args(["actions", "show", "2"]).assert().success();
}

#[test]
fn store_flag_overrides_config() {
    let dir = TempDir::new().unwrap();
    let store = dir.path().join("other/store.redb");
    taskline(&dir)
        .args(["operations", "enqueue", "elsewhere", "--store"])
        .arg(&store)
        .assert()
        .success();
    assert!(store.exists());
    assert!(!dir.path().join(".taskline/taskline.redb").exists());
}
