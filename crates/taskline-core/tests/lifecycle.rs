use std::sync::{Arc, Barrier};
use std::thread;

use serde_json::{json, Map};
use taskline_core::store::{Store, StoreOptions};
use taskline_core::{
    ActionResults, ActionStatus, ActionTag, Life, Model, ReceiverTag, TasklineError, Version,
    MAX_LOG_MESSAGES,
};
use tempfile::TempDir;

const CURRENT: Version = Version::new(2, 7, 0);
const LEGACY: Version = Version::new(2, 6, 0);

fn open(dir: &TempDir) -> Arc<Store> {
    Arc::new(Store::open(&dir.path().join("lifecycle.redb"), StoreOptions::default()).unwrap())
}

fn unit(model: &Model, id: &str) -> ReceiverTag {
    let tag = ReceiverTag::unit(id).unwrap();
    model.store_receivers().set_life(&tag, Life::Alive).unwrap();
    tag
}

fn outcome(status: ActionStatus) -> ActionResults {
    ActionResults {
        status,
        results: Map::new(),
        message: String::new(),
    }
}

#[test]
fn single_task_operation() {
    let dir = TempDir::new().unwrap();
    let model = Model::new(open(&dir), CURRENT);
    let u0 = unit(&model, "u/0");

    let op = model.enqueue_operation("restart u/0").unwrap();
    let action = model.enqueue_action(&op, &u0, "restart", Map::new()).unwrap();
    assert_eq!(model.operation(&op).unwrap().status(), ActionStatus::Pending);

    let action = action.begin().unwrap();
    assert!(action.started().is_some());
    assert_eq!(action.status(), ActionStatus::Running);
    assert_eq!(model.operation(&op).unwrap().status(), ActionStatus::Running);

    let action = action.finish(outcome(ActionStatus::Completed)).unwrap();
    assert_eq!(action.status(), ActionStatus::Completed);
    let op = model.operation(&op).unwrap();
    assert_eq!(op.complete_task_count(), 1);
    assert_eq!(op.status(), ActionStatus::Completed);
    assert!(action.enqueued() <= action.started().unwrap());
    assert!(action.started().unwrap() <= action.completed().unwrap());
}

#[test]
fn failure_outranks_success() {
    let dir = TempDir::new().unwrap();
    let model = Model::new(open(&dir), CURRENT);
    let u0 = unit(&model, "u/0");
    let u1 = unit(&model, "u/1");

    let op = model.enqueue_operation("upgrade").unwrap();
    let a = model.enqueue_action(&op, &u0, "upgrade", Map::new()).unwrap().begin().unwrap();
    let b = model.enqueue_action(&op, &u1, "upgrade", Map::new()).unwrap().begin().unwrap();

    a.finish(outcome(ActionStatus::Failed)).unwrap();
    let snapshot = model.operation(&op).unwrap();
    assert_eq!(snapshot.complete_task_count(), 1);
    assert_eq!(snapshot.status(), ActionStatus::Running);

    b.finish(outcome(ActionStatus::Completed)).unwrap();
    let done = model.operation(&op).unwrap();
    assert_eq!(done.complete_task_count(), 2);
    assert_eq!(done.status(), ActionStatus::Failed);
    assert!(done.completed().is_some());
}

#[test]
fn cancelled_outranks_success() {
    let dir = TempDir::new().unwrap();
    let model = Model::new(open(&dir), CURRENT);
    let u0 = unit(&model, "u/0");

    let op = model.enqueue_operation("mixed").unwrap();
    let a = model.enqueue_action(&op, &u0, "a", Map::new()).unwrap();
    let b = model.enqueue_action(&op, &u0, "b", Map::new()).unwrap();
    a.cancel().unwrap();
    b.begin().unwrap().finish(outcome(ActionStatus::Completed)).unwrap();
    assert_eq!(model.operation(&op).unwrap().status(), ActionStatus::Cancelled);
}

#[test]
fn second_finish_is_rejected() {
    let dir = TempDir::new().unwrap();
    let model = Model::new(open(&dir), CURRENT);
    let u0 = unit(&model, "u/0");
    let op = model.enqueue_operation("backup").unwrap();
    let running = model.enqueue_action(&op, &u0, "backup", Map::new()).unwrap().begin().unwrap();

    running
        .finish(ActionResults {
            status: ActionStatus::Completed,
            results: json!({"path": "/backups/1.tar"}).as_object().unwrap().clone(),
            message: "ok".into(),
        })
        .unwrap();
    let err = running.finish(outcome(ActionStatus::Failed)).unwrap_err();
    assert!(err.is_invalid_transition(), "{err}");

    let stored = model.action(running.id()).unwrap();
    assert_eq!(stored.status(), ActionStatus::Completed);
    assert_eq!(stored.results().1, "ok");
    assert_eq!(model.operation(&op).unwrap().complete_task_count(), 1);
}

#[test]
fn status_never_moves_backwards() {
    let dir = TempDir::new().unwrap();
    let model = Model::new(open(&dir), CURRENT);
    let u0 = unit(&model, "u/0");
    let op = model.enqueue_operation("x").unwrap();
    let pending = model.enqueue_action(&op, &u0, "x", Map::new()).unwrap();

    let finished = pending.finish(outcome(ActionStatus::Completed)).unwrap();
    assert!(pending.begin().unwrap_err().is_invalid_transition());
    assert!(finished.begin().unwrap_err().is_invalid_transition());
    assert!(finished.cancel().unwrap_err().is_invalid_transition());
    assert_eq!(
        model.action(finished.id()).unwrap().status(),
        ActionStatus::Completed
    );
}

#[test]
fn notification_exists_while_outstanding() {
    let dir = TempDir::new().unwrap();
    let model = Model::new(open(&dir), CURRENT);
    let u0 = unit(&model, "u/0");
    let u1 = unit(&model, "u/1");
    let op = model.enqueue_operation("x").unwrap();

    let a = model.enqueue_action(&op, &u0, "x", Map::new()).unwrap();
    model.enqueue_action(&op, &u1, "x", Map::new()).unwrap();
    assert_eq!(model.pending_notifications(&u0).unwrap(), vec![a.id().to_string()]);

    let a = a.begin().unwrap();
    assert_eq!(model.pending_notifications(&u0).unwrap().len(), 1);

    a.finish(outcome(ActionStatus::Completed)).unwrap();
    assert!(model.pending_notifications(&u0).unwrap().is_empty());
    assert_eq!(model.pending_notifications(&u1).unwrap().len(), 1);
}

#[test]
fn log_overflow_is_dropped_quietly() {
    let dir = TempDir::new().unwrap();
    let model = Model::new(open(&dir), CURRENT);
    let u0 = unit(&model, "u/0");
    let op = model.enqueue_operation("noisy").unwrap();
    let running = model.enqueue_action(&op, &u0, "noisy", Map::new()).unwrap().begin().unwrap();

    for i in 0..=MAX_LOG_MESSAGES {
        running.log(&format!("progress {i}")).unwrap();
    }
    let stored = model.action(running.id()).unwrap();
    assert_eq!(stored.messages().len(), MAX_LOG_MESSAGES);
    assert_eq!(stored.messages()[0].message(), "progress 0");
}

#[test]
fn enqueue_on_dead_receiver_fails() {
    let dir = TempDir::new().unwrap();
    let model = Model::new(open(&dir), CURRENT);
    let u0 = unit(&model, "u/0");
    model.store_receivers().set_life(&u0, Life::Dead).unwrap();
    let op = model.enqueue_operation("x").unwrap();

    let err = model.enqueue_action(&op, &u0, "x", Map::new()).unwrap_err();
    assert!(matches!(err, TasklineError::ReceiverNotAlive(_)), "{err}");
    assert_eq!(model.operation(&op).unwrap().spawned_task_count(), 0);
}

#[test]
fn concurrent_sibling_finishes_count_once_each() {
    let dir = TempDir::new().unwrap();
    let model = Model::new(open(&dir), CURRENT);
    let u0 = unit(&model, "u/0");
    let u1 = unit(&model, "u/1");

    for round in 0..10 {
        let op = model.enqueue_operation(&format!("round {round}")).unwrap();
        let a = model.enqueue_action(&op, &u0, "a", Map::new()).unwrap().begin().unwrap();
        let b = model.enqueue_action(&op, &u1, "b", Map::new()).unwrap().begin().unwrap();

        let barrier = Arc::new(Barrier::new(2));
        let handles: Vec<_> = [a, b]
            .into_iter()
            .map(|action| {
                let barrier = barrier.clone();
                thread::spawn(move || {
                    barrier.wait();
                    action.finish(outcome(ActionStatus::Completed))
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap().unwrap();
        }

        let done = model.operation(&op).unwrap();
        assert_eq!(done.complete_task_count(), 2, "round {round}");
        assert_eq!(done.status(), ActionStatus::Completed, "round {round}");
    }
}

#[test]
fn id_lookup_follows_agent_version() {
    let dir = TempDir::new().unwrap();
    let store = open(&dir);
    let current = Model::new(store.clone(), CURRENT);
    let legacy = Model::new(store, LEGACY);
    let u0 = unit(&current, "u/0");

    let op = current.enqueue_operation("x").unwrap();
    for _ in 0..11 {
        current.enqueue_action(&op, &u0, "x", Map::new()).unwrap();
    }

    // Action ids run 2..=12. Short ids match exactly on a current fleet, by
    // prefix on a legacy one.
    assert!(current.find_action_tags_by_id("1").unwrap().is_empty());
    let mut legacy_hits: Vec<String> = legacy
        .find_action_tags_by_id("1")
        .unwrap()
        .iter()
        .map(ActionTag::to_string)
        .collect();
    legacy_hits.sort();
    assert_eq!(legacy_hits, vec!["action-10", "action-11", "action-12"]);

    let uuid_action = legacy.enqueue_action(&op, &u0, "x", Map::new()).unwrap();
    let short = &uuid_action.id()[..9];
    assert!(short.ends_with('-'));
    assert_eq!(
        current.find_action_tags_by_id(short).unwrap(),
        vec![uuid_action.tag().unwrap()]
    );
}
