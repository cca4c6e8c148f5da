//! Action id allocation.
//!
//! Units on a model whose agents understand short ids get the next value of
//! the `task` sequence ("1", "2", ...). Everything else gets a UUID, which
//! older agents expect.

use uuid::Uuid;

use crate::error::Result;
use crate::store::Store;
use crate::tag::{ReceiverKind, ReceiverTag};
use crate::version::{is_new_action_id_supported, Version};

/// Sequence shared by action and operation ids.
pub const TASK_SEQUENCE: &str = "task";

/// Where fresh ids come from.
pub trait IdSource: Send + Sync {
    fn next_sequence(&self, name: &str, minimum: u64) -> Result<u64>;
    fn new_uuid(&self) -> Result<Uuid>;
}

impl IdSource for Store {
    fn next_sequence(&self, name: &str, minimum: u64) -> Result<u64> {
        Store::next_sequence(self, name, minimum)
    }

    fn new_uuid(&self) -> Result<Uuid> {
        Ok(Uuid::new_v4())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdScheme {
    /// Decimal value of [`TASK_SEQUENCE`].
    Sequence,
    /// Canonical hyphenated UUID.
    Uuid,
}

impl IdScheme {
    pub fn select(kind: ReceiverKind, agent_version: Version) -> Self {
        if kind == ReceiverKind::Unit && is_new_action_id_supported(agent_version) {
            IdScheme::Sequence
        } else {
            IdScheme::Uuid
        }
    }

    pub fn allocate(self, source: &dyn IdSource) -> Result<String> {
        match self {
            IdScheme::Sequence => Ok(source.next_sequence(TASK_SEQUENCE, 1)?.to_string()),
            IdScheme::Uuid => Ok(source.new_uuid()?.hyphenated().to_string()),
        }
    }
}

/// Allocate the local id for a new action addressed to `receiver`.
pub fn allocate_action_id(
    source: &dyn IdSource,
    receiver: &ReceiverTag,
    agent_version: Version,
) -> Result<String> {
    IdScheme::select(receiver.kind(), agent_version).allocate(source)
}
