//! Actions ("tasks"): units of work queued for a receiver.
//!
//! Every state change is a [`Store::run`](crate::store::Store::run)
//! transaction that asserts the status it expects to replace, so two callers
//! racing on the same action or on sibling actions of one operation can never
//! both win.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::{debug, trace, warn};

use crate::error::{Result, TasklineError};
use crate::ids::allocate_action_id;
use crate::model::Model;
use crate::operation::{
    Operation, F_COMPLETED as OP_COMPLETED, F_COMPLETE_TASK_COUNT, F_SPAWNED_TASK_COUNT,
    F_STARTED as OP_STARTED, F_STATUS as OP_STATUS,
};
use crate::receiver::Life;
use crate::status::{aggregate_status, ActionStatus, StatusFilter};
use crate::tag::{is_valid_action_id, ActionTag, ReceiverTag};
use crate::txn::{Assert, Collection, FieldAssert, TxnOp};
use crate::version::is_new_action_id_supported;

/// Separates the receiver name from the action id in notification ids.
pub const ACTION_MARKER: &str = "_a_";

/// Progress messages kept per action; further messages are dropped.
pub const MAX_LOG_MESSAGES: usize = 1000;

const F_STATUS: &str = "status";
const F_STARTED: &str = "started";
const F_COMPLETED: &str = "completed";
const F_MESSAGE: &str = "message";
const F_RESULTS: &str = "results";
const F_MESSAGES: &str = "messages";

/// `receiver` with [`ACTION_MARKER`] appended, unless it already ends with it.
pub fn ensure_action_marker(receiver: &str) -> String {
    if receiver.ends_with(ACTION_MARKER) {
        receiver.to_string()
    } else {
        format!("{receiver}{ACTION_MARKER}")
    }
}

// ---------------------------------------------------------------------------
// Documents
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub(crate) struct ActionDoc {
    #[serde(rename = "_id")]
    pub doc_id: String,
    pub model_uuid: String,
    pub receiver: String,
    pub name: String,
    #[serde(default)]
    pub parameters: Map<String, Value>,
    pub enqueued: DateTime<Utc>,
    #[serde(default)]
    pub started: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed: Option<DateTime<Utc>>,
    /// Local id of the parent operation; empty or absent for orphans.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub operation: String,
    pub status: ActionStatus,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub results: Map<String, Value>,
    #[serde(default, rename = "messages")]
    pub logs: Vec<ActionMessage>,
}

/// Marks an outstanding action so that a prefix scan on the receiver name
/// finds it without reading the actions collection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub(crate) struct NotificationDoc {
    #[serde(rename = "_id")]
    pub doc_id: String,
    pub model_uuid: String,
    pub receiver: String,
    pub action_id: String,
}

/// A progress message logged by a running action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionMessage {
    message: String,
    timestamp: DateTime<Utc>,
}

impl ActionMessage {
    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}

/// Outcome reported by the receiver when an action finishes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionResults {
    pub status: ActionStatus,
    #[serde(default)]
    pub results: Map<String, Value>,
    #[serde(default)]
    pub message: String,
}

// ---------------------------------------------------------------------------
// Action
// ---------------------------------------------------------------------------

/// An action as of its last read.
#[derive(Clone)]
pub struct Action {
    model: Model,
    doc: ActionDoc,
}

impl std::fmt::Debug for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Action").field("doc", &self.doc).finish()
    }
}

impl Action {
    pub(crate) fn new(model: Model, doc: ActionDoc) -> Self {
        Self { model, doc }
    }

    /// Model-local id: a sequence number or, for older actions, a UUID.
    pub fn id(&self) -> &str {
        self.model.store().local_id(&self.doc.doc_id)
    }

    pub fn tag(&self) -> Result<ActionTag> {
        ActionTag::new(self.id())
    }

    /// Id of the receiver the action is queued for, e.g. `mysql/0`.
    pub fn receiver(&self) -> &str {
        &self.doc.receiver
    }

    pub fn name(&self) -> &str {
        &self.doc.name
    }

    pub fn parameters(&self) -> &Map<String, Value> {
        &self.doc.parameters
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

    /// Parent operation id, if any.
    pub fn operation_id(&self) -> Option<&str> {
        Some(self.doc.operation.as_str()).filter(|s| !s.is_empty())
    }

    pub fn status(&self) -> ActionStatus {
        self.doc.status
    }

    /// Structured output and message recorded by [`finish`](Self::finish).
    pub fn results(&self) -> (&Map<String, Value>, &str) {
        (&self.doc.results, &self.doc.message)
    }

    /// Progress messages in the order they were logged.
    pub fn messages(&self) -> &[ActionMessage] {
        &self.doc.logs
    }

    fn notification_doc_id(&self) -> String {
        self.model
            .store()
            .doc_id(&format!("{}{}", ensure_action_marker(&self.doc.receiver), self.id()))
    }

    /// Re-read the action from the store.
    pub fn refresh(&mut self) -> Result<()> {
        self.doc = self.model.action_doc(self.id())?;
        Ok(())
    }

    /// Mark the action running. If it is the first of its operation's tasks
    /// to start, the operation is marked running too.
    pub fn begin(&self) -> Result<Action> {
        let model = &self.model;
        let id = self.id().to_string();
        let doc_id = self.doc.doc_id.clone();
        let mut parent = model
            .parent_operation(&self.doc.operation)
            .map_err(|e| e.annotate(format!("cannot begin task {id:?}")))?;
        let started = model.clock().now_to_the_second();
        let mut current = self.doc.clone();

        model
            .store()
            .run(|attempt| {
                if attempt > 0 {
                    current = model.action_doc(&id)?;
                    parent = refreshed(parent.take())?;
                }
                if current.status != ActionStatus::Pending {
                    return Err(TasklineError::InvalidTransition {
                        id: id.clone(),
                        from: current.status.to_string(),
                        to: ActionStatus::Running.to_string(),
                        reason: "task is not pending".into(),
                    });
                }
                let mut ops = vec![TxnOp::new(Collection::Actions, doc_id.clone())
                    .assert(Assert::field(FieldAssert::Eq(
                        F_STATUS,
                        json!(ActionStatus::Pending),
                    )))
                    .set(F_STATUS, json!(ActionStatus::Running))
                    .set(F_STARTED, json!(started))];
                if let Some(op) = parent
                    .as_ref()
                    .filter(|op| op.status() == ActionStatus::Pending)
                {
                    ops.push(
                        TxnOp::new(Collection::Operations, model.store().doc_id(op.id()))
                            .assert(Assert::field(FieldAssert::Eq(
                                OP_STATUS,
                                json!(ActionStatus::Pending),
                            )))
                            .set(OP_STATUS, json!(ActionStatus::Running))
                            .set(OP_STARTED, json!(started)),
                    );
                }
                Ok(ops)
            })
            .map_err(|e| e.annotate(format!("cannot begin task {id:?}")))?;
        model.action(&id)
    }

    /// Record the outcome of the action and take it off the receiver's
    /// queue. If it is the last outstanding task of its operation, the
    /// operation is completed with the status aggregated over all its tasks.
    pub fn finish(&self, results: ActionResults) -> Result<Action> {
        self.remove_and_log(results.status, results.results, results.message)
    }

    /// Finish the action as cancelled.
    pub fn cancel(&self) -> Result<Action> {
        self.remove_and_log(ActionStatus::Cancelled, Map::new(), String::new())
    }

    fn remove_and_log(
        &self,
        final_status: ActionStatus,
        results: Map<String, Value>,
        message: String,
    ) -> Result<Action> {
        let model = &self.model;
        let id = self.id().to_string();
        if !final_status.is_terminal() {
            return Err(TasklineError::InvalidArgument(format!(
                "cannot finish task {id:?} with non-terminal status {final_status}"
            )));
        }
        let doc_id = self.doc.doc_id.clone();
        let notification_id = self.notification_doc_id();
        let mut parent = model
            .parent_operation(&self.doc.operation)
            .map_err(|e| e.annotate(format!("cannot finish task {id:?}")))?;
        let completed = model.clock().now_to_the_second();
        let terminal: Vec<Value> = ActionStatus::terminal().iter().map(|s| json!(s)).collect();
        let results = Value::Object(results);
        let mut current = self.doc.clone();

        model
            .store()
            .run(|attempt| {
                if attempt > 0 {
                    current = model.action_doc(&id)?;
                    parent = refreshed(parent.take())?;
                }
                if current.status.is_terminal() {
                    return Err(TasklineError::InvalidTransition {
                        id: id.clone(),
                        from: current.status.to_string(),
                        to: final_status.to_string(),
                        reason: "task already finished".into(),
                    });
                }
                let assert_not_complete =
                    Assert::field(FieldAssert::NotIn(F_STATUS, terminal.clone()));
                let mut ops = vec![
                    TxnOp::new(Collection::Actions, doc_id.clone())
                        .assert(assert_not_complete.clone())
                        .set(F_STATUS, json!(final_status))
                        .set(F_MESSAGE, json!(message))
                        .set(F_RESULTS, results.clone())
                        .set(F_COMPLETED, json!(completed)),
                    TxnOp::new(Collection::ActionNotifications, notification_id.clone()).remove(),
                ];
                if let Some(op) = parent.as_ref() {
                    ops.push(operation_completion_op(
                        model,
                        op,
                        &doc_id,
                        final_status,
                        completed,
                        assert_not_complete,
                    ));
                }
                Ok(ops)
            })
            .map_err(|e| e.annotate(format!("cannot finish task {id:?}")))?;
        model.action(&id)
    }

    /// Append a progress message. Only running actions accept messages; once
    /// an action holds [`MAX_LOG_MESSAGES`] further messages are dropped with
    /// a warning.
    pub fn log(&self, message: &str) -> Result<()> {
        let model = &self.model;
        let id = self.id().to_string();
        let doc_id = self.doc.doc_id.clone();
        let mut current = self.doc.clone();
        let mut dropped = false;

        model
            .store()
            .run(|attempt| {
                if attempt > 0 {
                    current = model.action_doc(&id)?;
                }
                if current.status != ActionStatus::Running {
                    return Err(TasklineError::InvalidTransition {
                        id: id.clone(),
                        from: current.status.to_string(),
                        to: format!("{} (log)", ActionStatus::Running),
                        reason: "cannot log message to a task that is not running".into(),
                    });
                }
                if current.logs.len() >= MAX_LOG_MESSAGES {
                    dropped = true;
                    return Ok(Vec::new());
                }
                let entry = ActionMessage {
                    message: message.to_string(),
                    timestamp: model.clock().now_to_the_second(),
                };
                Ok(vec![TxnOp::new(Collection::Actions, doc_id.clone())
                    .assert(Assert::Fields(vec![
                        FieldAssert::Eq(F_STATUS, json!(ActionStatus::Running)),
                        FieldAssert::LenBelow(F_MESSAGES, MAX_LOG_MESSAGES),
                    ]))
                    .push(F_MESSAGES, serde_json::to_value(entry)?)])
            })
            .map_err(|e| e.annotate(format!("cannot log message to task {id:?}")))?;
        if dropped {
            warn!(
                task = %id,
                "exceeded {MAX_LOG_MESSAGES} log messages, task may be stuck"
            );
        }
        Ok(())
    }
}

/// Re-read a parent operation for a retry. A parent deleted in the meantime
/// is treated as absent.
fn refreshed(parent: Option<Operation>) -> Result<Option<Operation>> {
    match parent {
        None => Ok(None),
        Some(mut op) => match op.refresh() {
            Ok(()) => Ok(Some(op)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        },
    }
}

/// The update to apply to `op` as the task `task_doc_id` finishes with
/// `final_status`.
///
/// When every other task is already terminal, the operation itself becomes
/// terminal; the op then only asserts the operation is not yet terminal, so
/// exactly one finishing task can complete it. Otherwise only the counter
/// moves, guarded by its previous value so that sibling tasks finishing
/// concurrently serialise on it.
fn operation_completion_op(
    model: &Model,
    op: &Operation,
    task_doc_id: &str,
    final_status: ActionStatus,
    completed: DateTime<Utc>,
    assert_not_complete: Assert,
) -> TxnOp {
    let others: Vec<ActionStatus> = op
        .tasks()
        .iter()
        .filter(|t| t.id != task_doc_id)
        .map(|t| t.status)
        .collect();
    let others_complete = others.iter().filter(|s| s.is_terminal()).count() as u64;
    let new_count = others_complete + 1;
    let op_doc_id = model.store().doc_id(op.id());

    if others_complete == others.len() as u64 {
        let status = aggregate_status(&others, final_status);
        debug!(operation = op.id(), %status, "last task finished, completing operation");
        TxnOp::new(Collection::Operations, op_doc_id)
            .assert(assert_not_complete)
            .set(OP_STATUS, json!(status))
            .set(OP_COMPLETED, json!(completed))
            .set(F_COMPLETE_TASK_COUNT, json!(new_count))
    } else {
        TxnOp::new(Collection::Operations, op_doc_id)
            .assert(Assert::field(FieldAssert::Eq(
                F_COMPLETE_TASK_COUNT,
                json!(op.complete_task_count()),
            )))
            .set(F_COMPLETE_TASK_COUNT, json!(new_count))
    }
}

#[derive(Serialize)]
struct ActionView<'a> {
    id: &'a str,
    receiver: &'a str,
    name: &'a str,
    operation: Option<&'a str>,
    status: ActionStatus,
    parameters: &'a Map<String, Value>,
    enqueued: DateTime<Utc>,
    started: Option<DateTime<Utc>>,
    completed: Option<DateTime<Utc>>,
    message: &'a str,
    results: &'a Map<String, Value>,
    messages: &'a [ActionMessage],
}

impl Serialize for Action {
    fn serialize<S: serde::Serializer>(&self, s: S) -> std::result::Result<S::Ok, S::Error> {
        ActionView {
            id: self.id(),
            receiver: self.receiver(),
            name: self.name(),
            operation: self.operation_id(),
            status: self.status(),
            parameters: self.parameters(),
            enqueued: self.enqueued(),
            started: self.started(),
            completed: self.completed(),
            message: &self.doc.message,
            results: &self.doc.results,
            messages: &self.doc.logs,
        }
        .serialize(s)
    }
}

// ---------------------------------------------------------------------------
// Enqueue and queries
// ---------------------------------------------------------------------------

impl Model {
    /// Queue action `name` for `receiver` under the existing operation
    /// `operation_id`.
    pub fn enqueue_action(
        &self,
        operation_id: &str,
        receiver: &ReceiverTag,
        name: &str,
        parameters: Map<String, Value>,
    ) -> Result<Action> {
        if name.is_empty() {
            return Err(TasklineError::InvalidArgument("action name required".into()));
        }
        let (receiver_collection, receiver_doc_id) =
            self.receivers().collection_and_id(receiver)?;
        let action_id = allocate_action_id(self.ids(), receiver, self.agent_version())
            .map_err(|e| e.annotate(format!("cannot allocate id for action {name:?}")))?;
        debug!(
            action = name,
            receiver = %receiver,
            action_id = %action_id,
            "new action doc"
        );

        let store = self.store();
        let doc = ActionDoc {
            doc_id: store.doc_id(&action_id),
            model_uuid: store.model_uuid().to_string(),
            receiver: receiver.id().to_string(),
            name: name.to_string(),
            parameters,
            enqueued: self.clock().now_to_the_second(),
            started: None,
            completed: None,
            operation: operation_id.to_string(),
            status: ActionStatus::Pending,
            message: String::new(),
            results: Map::new(),
            logs: Vec::new(),
        };
        let notification = NotificationDoc {
            doc_id: store.doc_id(&format!(
                "{}{}",
                ensure_action_marker(receiver.id()),
                action_id
            )),
            model_uuid: store.model_uuid().to_string(),
            receiver: receiver.id().to_string(),
            action_id: action_id.clone(),
        };

        let terminal: Vec<Value> = ActionStatus::terminal().iter().map(|s| json!(s)).collect();
        let ops = vec![
            TxnOp::new(receiver_collection, receiver_doc_id.clone())
                .assert(self.receivers().alive_assert()),
            TxnOp::new(Collection::Operations, store.doc_id(operation_id))
                .assert(Assert::field(FieldAssert::NotIn(OP_STATUS, terminal)))
                .inc(F_SPAWNED_TASK_COUNT, 1),
            TxnOp::new(Collection::Actions, doc.doc_id.clone())
                .assert(Assert::DocMissing)
                .insert(serde_json::to_value(&doc)?),
            TxnOp::new(Collection::ActionNotifications, notification.doc_id.clone())
                .assert(Assert::DocMissing)
                .insert(serde_json::to_value(&notification)?),
        ];

        store.run(|attempt| {
            match self
                .receivers()
                .life_of(receiver_collection, &receiver_doc_id)?
            {
                Some(Life::Alive) => {}
                Some(_) => return Err(TasklineError::ReceiverNotAlive(receiver.to_string())),
                None => return Err(TasklineError::ReceiverNotFound(receiver.to_string())),
            }
            if attempt != 0 {
                let op = self.operation(operation_id)?;
                if op.status().is_terminal() {
                    return Err(TasklineError::OperationFinished {
                        id: operation_id.to_string(),
                        status: op.status().to_string(),
                    });
                }
                return Err(TasklineError::Store(format!(
                    "cannot enqueue action {action_id:?}: unexpected attempt number {attempt}"
                )));
            }
            Ok(ops.clone())
        })?;
        Ok(Action::new(self.clone(), doc))
    }

    pub(crate) fn action_doc(&self, id: &str) -> Result<ActionDoc> {
        let doc_id = self.store().doc_id(id);
        self.store()
            .get::<ActionDoc>(Collection::Actions, &doc_id)
            .map_err(|e| e.annotate(format!("cannot get action {id:?}")))?
            .ok_or_else(|| TasklineError::ActionNotFound(id.to_string()))
    }

    /// Look up an action by its local id.
    pub fn action(&self, id: &str) -> Result<Action> {
        trace!(id, "action lookup");
        Ok(Action::new(self.clone(), self.action_doc(id)?))
    }

    pub fn action_by_tag(&self, tag: &ActionTag) -> Result<Action> {
        self.action(tag.id())
    }

    pub fn all_actions(&self) -> Result<Vec<Action>> {
        self.find_actions(|_| true)
            .map_err(|e| e.annotate("cannot get all actions"))
    }

    pub fn find_actions_by_name(&self, name: &str) -> Result<Vec<Action>> {
        self.find_actions(|d| d.name == name)
    }

    /// Actions queued for the receiver with id `receiver_id` (`mysql/0`).
    pub fn actions_for_receiver(&self, receiver_id: &str) -> Result<Vec<Action>> {
        self.find_actions(|d| d.receiver == receiver_id)
    }

    pub fn actions_by_receiver_and_status(
        &self,
        receiver: &ReceiverTag,
        filter: StatusFilter,
    ) -> Result<Vec<Action>> {
        self.find_actions(|d| d.receiver == receiver.id() && filter.matches(d.status))
    }

    pub fn pending_actions(&self, receiver: &ReceiverTag) -> Result<Vec<Action>> {
        self.actions_by_receiver_and_status(receiver, StatusFilter::Pending)
    }

    pub fn running_actions(&self, receiver: &ReceiverTag) -> Result<Vec<Action>> {
        self.actions_by_receiver_and_status(receiver, StatusFilter::Running)
    }

    pub fn completed_actions(&self, receiver: &ReceiverTag) -> Result<Vec<Action>> {
        self.actions_by_receiver_and_status(receiver, StatusFilter::Terminal)
    }

    fn find_actions(&self, pred: impl FnMut(&ActionDoc) -> bool) -> Result<Vec<Action>> {
        let docs = self.store().find(Collection::Actions, pred)?;
        Ok(docs.into_iter().map(|d| Action::new(self.clone(), d)).collect())
    }

    /// Ids of the receiver's outstanding actions, found through their
    /// notification records.
    pub fn pending_notifications(&self, receiver: &ReceiverTag) -> Result<Vec<String>> {
        let prefix = self.store().doc_id(&ensure_action_marker(receiver.id()));
        let ids = self
            .store()
            .ids_with_prefix(Collection::ActionNotifications, &prefix)?;
        Ok(ids
            .iter()
            .filter_map(|id| id.strip_prefix(prefix.as_str()))
            .map(str::to_string)
            .collect())
    }

    /// Tags of actions matching `value`.
    ///
    /// Sequence ids match exactly. UUID ids, and any query that could be
    /// part of one (it contains `-` or a hex letter), match by prefix so that
    /// a shortened UUID still finds its action; a model whose agents predate
    /// sequence ids always matches by prefix.
    pub fn find_action_tags_by_id(&self, value: &str) -> Result<Vec<ActionTag>> {
        trace!(value, "find action tags by id");
        let store = self.store();
        let match_value = store.doc_id(value);
        let new_ids_supported = is_new_action_id_supported(self.agent_version());
        let maybe_old_id = value.contains(|c: char| "-abcdef".contains(c));

        let doc_ids = if !new_ids_supported || maybe_old_id {
            store.ids_with_prefix(Collection::Actions, &match_value)?
        } else {
            store
                .get::<Value>(Collection::Actions, &match_value)?
                .map(|_| vec![match_value.clone()])
                .unwrap_or_default()
        };
        let tags: Vec<ActionTag> = doc_ids
            .iter()
            .map(|d| store.local_id(d))
            .filter(|local| is_valid_action_id(local))
            .filter_map(|local| ActionTag::new(local).ok())
            .collect();
        trace!(value, found = tags.len(), "find action tags by id done");
        Ok(tags)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
