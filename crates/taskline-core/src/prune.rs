//! Retention for finished actions and operations.
//!
//! A pass runs in two phases:
//! 1. Orphan actions (no parent operation) completed before the age cutoff
//!    are deleted, then the oldest remaining orphans go until the actions
//!    collection fits the size budget.
//! 2. Operations completed before the cutoff are deleted together with their
//!    tasks, then the oldest remaining completed operations go until the
//!    actions collection fits. Since deleting one operation deletes on
//!    average `actions / operations` tasks, the number of operations to drop
//!    is the number of surplus actions divided by that ratio.
//!
//! Only records with a completion stamp are ever deleted. Deletions are
//! committed in batches as they go; a failure part way through leaves
//! earlier deletions in place.

use std::collections::HashSet;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info};

use crate::action::{ensure_action_marker, ActionDoc};
use crate::error::{Result, TasklineError};
use crate::model::Model;
use crate::operation::OperationDoc;
use crate::store::{CollectionStats, Store};
use crate::txn::Collection;

const BYTES_PER_MB: u64 = 1024 * 1024;

/// What a prune pass deleted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PruneStats {
    pub orphan_actions_deleted: usize,
    pub operations_deleted: usize,
    pub operation_actions_deleted: usize,
}

/// Delete finished history older than `max_age`, and more if the actions
/// collection is still larger than `max_size_mb`. A zero age or size turns
/// that limit off.
pub fn prune_operations(model: &Model, max_age: Duration, max_size_mb: u64) -> Result<PruneStats> {
    let cutoff = age_cutoff(model.clock().now(), max_age)?;
    let budget = (max_size_mb > 0).then(|| max_size_mb.saturating_mul(BYTES_PER_MB));
    let mut stats = PruneStats::default();

    stats.orphan_actions_deleted = prune_orphan_actions(model, cutoff, budget)?;

    let store = model.store();
    let operations = store
        .stats(Collection::Operations)
        .map_err(|e| e.annotate("retrieving operations collection count"))?;
    if operations.count == 0 {
        debug!("no operations to prune");
    } else {
        let actions = store
            .stats(Collection::Actions)
            .map_err(|e| e.annotate("retrieving actions collection count"))?;
        let size_factor = (actions.count as f64 / operations.count as f64).max(1.0);
        let (ops, children) = prune_operations_and_tasks(model, cutoff, budget, size_factor)?;
        stats.operations_deleted = ops;
        stats.operation_actions_deleted = children;
    }

    info!(
        orphan_actions = stats.orphan_actions_deleted,
        operations = stats.operations_deleted,
        operation_actions = stats.operation_actions_deleted,
        "prune complete"
    );
    Ok(stats)
}

impl Model {
    /// See [`prune_operations`].
    pub fn prune(&self, max_age: Duration, max_size_mb: u64) -> Result<PruneStats> {
        prune_operations(self, max_age, max_size_mb)
    }
}

fn age_cutoff(now: DateTime<Utc>, max_age: Duration) -> Result<Option<DateTime<Utc>>> {
    if max_age.is_zero() {
        return Ok(None);
    }
    let age = chrono::Duration::from_std(max_age)
        .map_err(|e| TasklineError::InvalidArgument(format!("invalid max age: {e}")))?;
    Ok(Some(now - age))
}

/// Documents to drop, at the collection's average size, to get `stats`
/// under `budget`.
fn surplus_docs(stats: CollectionStats, budget: Option<u64>) -> u64 {
    match budget {
        Some(budget) if stats.size_bytes > budget => {
            (stats.size_bytes - budget).div_ceil(stats.avg_doc_size().max(1))
        }
        _ => 0,
    }
}

fn is_older(completed: Option<DateTime<Utc>>, cutoff: Option<DateTime<Utc>>) -> bool {
    matches!((completed, cutoff), (Some(done), Some(cutoff)) if done < cutoff)
}

// ---------------------------------------------------------------------------
// Phase 1: orphan actions
// ---------------------------------------------------------------------------

fn prune_orphan_actions(
    model: &Model,
    cutoff: Option<DateTime<Utc>>,
    budget: Option<u64>,
) -> Result<usize> {
    let store = model.store();
    let mut orphans = store.find::<ActionDoc>(Collection::Actions, |a| {
        a.operation.is_empty() && a.completed.is_some()
    })?;
    orphans.sort_by_key(|a| a.completed);

    let split = orphans.partition_point(|a| is_older(a.completed, cutoff));
    let mut deleted = remove_actions(store, &orphans[..split])?;
    if deleted > 0 {
        debug!(deleted, "deleted orphan actions past max age");
    }

    let actions = store
        .stats(Collection::Actions)
        .map_err(|e| e.annotate("retrieving actions collection size"))?;
    let surplus = surplus_docs(actions, budget) as usize;
    if surplus > 0 {
        let rest = &orphans[split..];
        let by_size = remove_actions(store, &rest[..surplus.min(rest.len())])?;
        debug!(deleted = by_size, "deleted orphan actions over size budget");
        deleted += by_size;
    }
    Ok(deleted)
}

/// Delete actions and any notifications still pointing at them.
fn remove_actions(store: &Store, actions: &[ActionDoc]) -> Result<usize> {
    if actions.is_empty() {
        return Ok(0);
    }
    let notifications: Vec<String> = actions
        .iter()
        .map(|a| {
            store.doc_id(&format!(
                "{}{}",
                ensure_action_marker(&a.receiver),
                store.local_id(&a.doc_id)
            ))
        })
        .collect();
    let ids: Vec<String> = actions.iter().map(|a| a.doc_id.clone()).collect();
    store.remove_ids(Collection::ActionNotifications, &notifications)?;
    store.remove_ids(Collection::Actions, &ids)
}

// ---------------------------------------------------------------------------
// Phase 2: operations and their tasks
// ---------------------------------------------------------------------------

fn prune_operations_and_tasks(
    model: &Model,
    cutoff: Option<DateTime<Utc>>,
    budget: Option<u64>,
    size_factor: f64,
) -> Result<(usize, usize)> {
    let store = model.store();
    let mut finished =
        store.find::<OperationDoc>(Collection::Operations, |o| o.completed.is_some())?;
    finished.sort_by_key(|o| o.completed);

    let split = finished.partition_point(|o| is_older(o.completed, cutoff));
    let (mut ops, mut children) = remove_operations(store, &finished[..split])?;
    if ops > 0 {
        debug!(operations = ops, tasks = children, "deleted operations past max age");
    }

    let actions = store
        .stats(Collection::Actions)
        .map_err(|e| e.annotate("retrieving actions collection size"))?;
    let surplus = surplus_docs(actions, budget);
    if surplus > 0 {
        let to_remove = ((surplus as f64 / size_factor).ceil() as usize).max(1);
        let rest = &finished[split..];
        let (o, c) = remove_operations(store, &rest[..to_remove.min(rest.len())])?;
        debug!(operations = o, tasks = c, "deleted operations over size budget");
        ops += o;
        children += c;
    }
    Ok((ops, children))
}

/// Delete operations and every task that names one of them as parent.
/// Returns `(operations, tasks)` deleted.
fn remove_operations(store: &Store, operations: &[OperationDoc]) -> Result<(usize, usize)> {
    if operations.is_empty() {
        return Ok((0, 0));
    }
    let local_ids: HashSet<&str> = operations
        .iter()
        .map(|o| store.local_id(&o.doc_id))
        .collect();
    let tasks = store.find::<ActionDoc>(Collection::Actions, |a| {
        local_ids.contains(a.operation.as_str())
    })?;
    let children = remove_actions(store, &tasks)?;
    let ids: Vec<String> = operations.iter().map(|o| o.doc_id.clone()).collect();
    let ops = store.remove_ids(Collection::Operations, &ids)?;
    Ok((ops, children))
}
