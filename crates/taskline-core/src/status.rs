use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

// ---------------------------------------------------------------------------
// ActionStatus
// ---------------------------------------------------------------------------

/// Lifecycle state shared by actions and operations.
///
/// Transitions: `Pending → Running → Completed | Cancelled | Failed`.
/// A pending action may also be finished directly (e.g. cancelled before it
/// ever ran).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionStatus {
    /// Queued, not yet picked up by the receiver.
    Pending,
    /// The receiver has begun executing it.
    Running,
    /// Ran to completion as intended.
    Completed,
    /// Cancelled before being run.
    Cancelled,
    /// Did not complete successfully.
    Failed,
}

impl ActionStatus {
    pub fn all() -> &'static [ActionStatus] {
        &[
            ActionStatus::Pending,
            ActionStatus::Running,
            ActionStatus::Completed,
            ActionStatus::Cancelled,
            ActionStatus::Failed,
        ]
    }

    pub fn terminal() -> &'static [ActionStatus] {
        &[
            ActionStatus::Completed,
            ActionStatus::Cancelled,
            ActionStatus::Failed,
        ]
    }

    pub fn is_terminal(self) -> bool {
        !matches!(self, ActionStatus::Pending | ActionStatus::Running)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ActionStatus::Pending => "pending",
            ActionStatus::Running => "running",
            ActionStatus::Completed => "completed",
            ActionStatus::Cancelled => "cancelled",
            ActionStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for ActionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ActionStatus {
    type Err = crate::error::TasklineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ActionStatus::Pending),
            "running" => Ok(ActionStatus::Running),
            "completed" => Ok(ActionStatus::Completed),
            "cancelled" => Ok(ActionStatus::Cancelled),
            "failed" => Ok(ActionStatus::Failed),
            _ => Err(crate::error::TasklineError::InvalidStatus(s.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// StatusFilter
// ---------------------------------------------------------------------------

/// Status predicate used when listing a receiver's actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusFilter {
    Pending,
    Running,
    /// Any of the terminal statuses.
    Terminal,
}

impl StatusFilter {
    pub fn matches(self, status: ActionStatus) -> bool {
        match self {
            StatusFilter::Pending => status == ActionStatus::Pending,
            StatusFilter::Running => status == ActionStatus::Running,
            StatusFilter::Terminal => status.is_terminal(),
        }
    }
}

impl std::str::FromStr for StatusFilter {
    type Err = crate::error::TasklineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(StatusFilter::Pending),
            "running" => Ok(StatusFilter::Running),
            "terminal" | "completed" => Ok(StatusFilter::Terminal),
            _ => Err(crate::error::TasklineError::InvalidStatus(s.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// Operation status aggregation
// ---------------------------------------------------------------------------

/// Order in which final task statuses are considered when deciding the status
/// of their operation. The first entry present among the tasks wins, so a
/// single failed task fails the whole operation.
pub const STATUS_COMPLETED_ORDER: [ActionStatus; 3] = [
    ActionStatus::Failed,
    ActionStatus::Cancelled,
    ActionStatus::Completed,
];

/// Final status of an operation whose last outstanding task is finishing with
/// `finishing`. `siblings` are the statuses of every task of the operation as
/// last read, which may include the finishing task's stale status.
pub fn aggregate_status(siblings: &[ActionStatus], finishing: ActionStatus) -> ActionStatus {
    let mut present: HashSet<ActionStatus> = siblings.iter().copied().collect();
    present.insert(finishing);
    STATUS_COMPLETED_ORDER
        .iter()
        .copied()
        .find(|s| present.contains(s))
        .unwrap_or(finishing)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn precedence_table_is_abnormal_first() {
        assert_eq!(
            STATUS_COMPLETED_ORDER,
            [
                ActionStatus::Failed,
                ActionStatus::Cancelled,
                ActionStatus::Completed
            ]
        );
    }

    #[test]
    fn failed_sibling_outranks_completed() {
        let siblings = [ActionStatus::Failed, ActionStatus::Running];
        assert_eq!(
            aggregate_status(&siblings, ActionStatus::Completed),
            ActionStatus::Failed
        );
    }

    #[test]
    fn cancelled_outranks_completed_but_not_failed() {
        let siblings = [ActionStatus::Cancelled, ActionStatus::Completed];
        assert_eq!(
            aggregate_status(&siblings, ActionStatus::Completed),
            ActionStatus::Cancelled
        );
        assert_eq!(
            aggregate_status(&siblings, ActionStatus::Failed),
            ActionStatus::Failed
        );
    }

    #[test]
    fn stale_running_entry_is_ignored() {
        // The finishing task still reads as running in the snapshot.
        let siblings = [ActionStatus::Completed, ActionStatus::Running];
        assert_eq!(
            aggregate_status(&siblings, ActionStatus::Completed),
            ActionStatus::Completed
        );
    }

    #[test]
    fn single_task_takes_its_own_status() {
        for s in ActionStatus::terminal() {
            assert_eq!(aggregate_status(&[ActionStatus::Running], *s), *s);
        }
    }

    #[test]
    fn status_round_trips_through_str() {
        for s in ActionStatus::all() {
            assert_eq!(s.as_str().parse::<ActionStatus>().unwrap(), *s);
        }
        assert!("aborted".parse::<ActionStatus>().is_err());
    }

    #[test]
    fn terminal_filter_matches_all_end_states() {
        assert!(StatusFilter::Terminal.matches(ActionStatus::Cancelled));
        assert!(StatusFilter::Terminal.matches(ActionStatus::Failed));
        assert!(!StatusFilter::Terminal.matches(ActionStatus::Running));
        assert!(StatusFilter::Pending.matches(ActionStatus::Pending));
        assert!(!StatusFilter::Running.matches(ActionStatus::Pending));
    }
}
