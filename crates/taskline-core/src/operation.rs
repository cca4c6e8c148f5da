//! Operations: groups of actions ("tasks") with a status derived from them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::action::{Action, ActionDoc};
use crate::error::{Result, TasklineError};
use crate::ids::TASK_SEQUENCE;
use crate::model::Model;
use crate::status::ActionStatus;
use crate::store::View;
use crate::txn::{Assert, Collection, TxnOp};

pub(crate) const F_STATUS: &str = "status";
pub(crate) const F_STARTED: &str = "started";
pub(crate) const F_COMPLETED: &str = "completed";
pub(crate) const F_COMPLETE_TASK_COUNT: &str = "complete-task-count";
pub(crate) const F_SPAWNED_TASK_COUNT: &str = "spawned-task-count";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub(crate) struct OperationDoc {
    #[serde(rename = "_id")]
    pub doc_id: String,
    pub model_uuid: String,
    #[serde(default)]
    pub summary: String,
    pub enqueued: DateTime<Utc>,
    #[serde(default)]
    pub started: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed: Option<DateTime<Utc>>,
    pub status: ActionStatus,
    #[serde(default)]
    pub complete_task_count: u64,
    #[serde(default)]
    pub spawned_task_count: u64,
}

/// Status of one task as seen when its operation was last read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct TaskSnapshot {
    pub id: String,
    pub status: ActionStatus,
}

/// An operation as of its last read, together with the statuses of its tasks
/// read in the same snapshot.
#[derive(Clone)]
pub struct Operation {
    model: Model,
    doc: OperationDoc,
    tasks: Vec<TaskSnapshot>,
}

impl std::fmt::Debug for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Operation")
            .field("doc", &self.doc)
            .field("tasks", &self.tasks)
            .finish()
    }
}

impl Operation {
    pub fn id(&self) -> &str {
        self.model.store().local_id(&self.doc.doc_id)
    }

    pub fn summary(&self) -> &str {
        &self.doc.summary
    }

    pub fn enqueued(&self) -> DateTime<Utc> {
        self.doc.enqueued
    }

    pub fn started(&self) -> Option<DateTime<Utc>> {
        self.doc.started
    }

    pub fn completed(&self) -> Option<DateTime<Utc>> {
        self.doc.completed
    }

    pub fn status(&self) -> ActionStatus {
        self.doc.status
    }

    /// Tasks that have reached a terminal status, as counted by the tasks
    /// themselves when they finished.
    pub fn complete_task_count(&self) -> u64 {
        self.doc.complete_task_count
    }

    /// Tasks enqueued under this operation.
    pub fn spawned_task_count(&self) -> u64 {
        self.doc.spawned_task_count
    }

    pub fn task_status(&self) -> Vec<ActionStatus> {
        self.tasks.iter().map(|t| t.status).collect()
    }

    pub(crate) fn tasks(&self) -> &[TaskSnapshot] {
        &self.tasks
    }

    /// Re-read the operation and its task statuses.
    pub fn refresh(&mut self) -> Result<()> {
        let id = self.id().to_string();
        let fresh = self.model.operation(&id)?;
        *self = fresh;
        Ok(())
    }

    /// The operation's tasks, in id order.
    pub fn actions(&self) -> Result<Vec<Action>> {
        self.model.operation_actions(self.id())
    }
}

#[derive(Serialize)]
struct OperationView<'a> {
    id: &'a str,
    summary: &'a str,
    status: ActionStatus,
    enqueued: DateTime<Utc>,
    started: Option<DateTime<Utc>>,
    completed: Option<DateTime<Utc>>,
    complete_task_count: u64,
    spawned_task_count: u64,
}

impl Serialize for Operation {
    fn serialize<S: serde::Serializer>(&self, s: S) -> std::result::Result<S::Ok, S::Error> {
        OperationView {
            id: self.id(),
            summary: self.summary(),
            status: self.status(),
            enqueued: self.enqueued(),
            started: self.started(),
            completed: self.completed(),
            complete_task_count: self.complete_task_count(),
            spawned_task_count: self.spawned_task_count(),
        }
        .serialize(s)
    }
}

/// Read an operation and its task statuses from one snapshot.
fn load_operation(
    view: &View<'_>,
    doc_id: &str,
    local_id: &str,
) -> Result<Option<(OperationDoc, Vec<TaskSnapshot>)>> {
    let Some(doc) = view.get::<OperationDoc>(Collection::Operations, doc_id)? else {
        return Ok(None);
    };
    let tasks = view
        .find::<ActionDoc>(Collection::Actions, |a| a.operation == local_id)?
        .into_iter()
        .map(|a| TaskSnapshot {
            id: a.doc_id,
            status: a.status,
        })
        .collect();
    Ok(Some((doc, tasks)))
}

impl Model {
    /// Create a new pending operation and return its id.
    pub fn enqueue_operation(&self, summary: &str) -> Result<String> {
        let id = self
            .ids()
            .next_sequence(TASK_SEQUENCE, 1)
            .map_err(|e| e.annotate("cannot allocate operation id"))?
            .to_string();
        let doc = OperationDoc {
            doc_id: self.store().doc_id(&id),
            model_uuid: self.store().model_uuid().to_string(),
            summary: summary.to_string(),
            enqueued: self.clock().now_to_the_second(),
            started: None,
            completed: None,
            status: ActionStatus::Pending,
            complete_task_count: 0,
            spawned_task_count: 0,
        };
        let value = serde_json::to_value(&doc)?;
        self.store()
            .run(|attempt| {
                if attempt > 0 {
                    return Err(TasklineError::Store(format!(
                        "operation {id:?} already exists"
                    )));
                }
                Ok(vec![TxnOp::new(Collection::Operations, doc.doc_id.clone())
                    .assert(Assert::DocMissing)
                    .insert(value.clone())])
            })
            .map_err(|e| e.annotate("cannot enqueue operation"))?;
        debug!(operation = %id, summary, "enqueued operation");
        Ok(id)
    }

    /// Look up an operation by id.
    pub fn operation(&self, id: &str) -> Result<Operation> {
        let doc_id = self.store().doc_id(id);
        let found = self
            .store()
            .view(|v| load_operation(v, &doc_id, id))
            .map_err(|e| e.annotate(format!("cannot get operation {id:?}")))?;
        match found {
            Some((doc, tasks)) => Ok(Operation {
                model: self.clone(),
                doc,
                tasks,
            }),
            None => Err(TasklineError::OperationNotFound(id.to_string())),
        }
    }

    /// The parent operation of a task, if it has one and it still exists.
    pub(crate) fn parent_operation(&self, id: &str) -> Result<Option<Operation>> {
        if id.is_empty() {
            return Ok(None);
        }
        match self.operation(id) {
            Ok(op) => Ok(Some(op)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// All operations of the model, in id order.
    pub fn all_operations(&self) -> Result<Vec<Operation>> {
        let store = self.store();
        let loaded = store
            .view(|v| {
                let docs = v.find::<OperationDoc>(Collection::Operations, |_| true)?;
                let mut out = Vec::with_capacity(docs.len());
                for doc in docs {
                    let local = store.local_id(&doc.doc_id).to_string();
                    let tasks = v
                        .find::<ActionDoc>(Collection::Actions, |a| a.operation == local)?
                        .into_iter()
                        .map(|a| TaskSnapshot {
                            id: a.doc_id,
                            status: a.status,
                        })
                        .collect();
                    out.push((doc, tasks));
                }
                Ok(out)
            })
            .map_err(|e| e.annotate("cannot get all operations"))?;
        Ok(loaded
            .into_iter()
            .map(|(doc, tasks)| Operation {
                model: self.clone(),
                doc,
                tasks,
            })
            .collect())
    }

    /// Tasks enqueued under operation `id`.
    pub fn operation_actions(&self, id: &str) -> Result<Vec<Action>> {
        let docs = self
            .store()
            .find::<ActionDoc>(Collection::Actions, |a| a.operation == id)?;
        Ok(docs.into_iter().map(|d| Action::new(self.clone(), d)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{Store, StoreOptions};
    use crate::version::Version;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn model() -> (TempDir, Model) {
        let dir = TempDir::new().unwrap();
        let store = Store::open(&dir.path().join("ops.redb"), StoreOptions::default()).unwrap();
        (dir, Model::new(Arc::new(store), Version::new(2, 7, 0)))
    }

    #[test]
    fn new_operation_is_pending_with_no_tasks() {
        let (_dir, m) = model();
        let id = m.enqueue_operation("restart all").unwrap();
        assert_eq!(id, "1");
        let op = m.operation(&id).unwrap();
        assert_eq!(op.status(), ActionStatus::Pending);
        assert_eq!(op.summary(), "restart all");
        assert_eq!(op.complete_task_count(), 0);
        assert_eq!(op.spawned_task_count(), 0);
        assert!(op.task_status().is_empty());
        assert!(op.started().is_none());
    }

    #[test]
    fn unknown_operation_is_not_found() {
        let (_dir, m) = model();
        let err = m.operation("99").unwrap_err();
        assert!(err.is_not_found());
        assert!(m.parent_operation("99").unwrap().is_none());
        assert!(m.parent_operation("").unwrap().is_none());
    }

    #[test]
    fn operations_share_the_task_sequence() {
        let (_dir, m) = model();
        let a = m.enqueue_operation("a").unwrap();
        let b = m.enqueue_operation("b").unwrap();
        assert_eq!((a.as_str(), b.as_str()), ("1", "2"));
        let all = m.all_operations().unwrap();
        assert_eq!(all.len(), 2);
    }
}
