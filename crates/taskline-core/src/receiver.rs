//! Receiver resolution and liveness.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::error::{Result, TasklineError};
use crate::store::Store;
use crate::tag::{ReceiverKind, ReceiverTag};
use crate::txn::{Assert, Collection, FieldAssert, TxnOp};

const F_LIFE: &str = "life";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Life {
    Alive,
    Dying,
    Dead,
}

impl Life {
    pub fn as_str(self) -> &'static str {
        match self {
            Life::Alive => "alive",
            Life::Dying => "dying",
            Life::Dead => "dead",
        }
    }
}

impl fmt::Display for Life {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Life {
    type Err = TasklineError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "alive" => Ok(Life::Alive),
            "dying" => Ok(Life::Dying),
            "dead" => Ok(Life::Dead),
            _ => Err(TasklineError::InvalidArgument(format!("unknown life '{s}'"))),
        }
    }
}

/// Maps receiver tags to the documents that back them.
pub trait ReceiverResolver: Send + Sync {
    /// Collection and document id of the receiver's own document.
    fn collection_and_id(&self, tag: &ReceiverTag) -> Result<(Collection, String)>;

    /// Life of the receiver's document, or `None` if there is no such
    /// receiver.
    fn life_of(&self, collection: Collection, doc_id: &str) -> Result<Option<Life>>;

    /// Assertion that holds on the receiver's document while it is alive.
    fn alive_assert(&self) -> Assert {
        Assert::field(FieldAssert::Eq(F_LIFE, json!(Life::Alive)))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ReceiverDoc {
    id: String,
    life: Life,
}

/// Receivers kept in the `units` and `machines` collections of the same store.
#[derive(Debug, Clone)]
pub struct StoreReceivers {
    store: Arc<Store>,
}

impl StoreReceivers {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    /// Register a receiver or change its life.
    pub fn set_life(&self, tag: &ReceiverTag, life: Life) -> Result<()> {
        let (collection, doc_id) = self.collection_and_id(tag)?;
        self.store.run(|_| {
            let existing: Option<ReceiverDoc> = self.store.get(collection, &doc_id)?;
            let op = TxnOp::new(collection, doc_id.clone());
            let op = match existing {
                None => op.assert(Assert::DocMissing).insert(serde_json::to_value(
                    ReceiverDoc {
                        id: tag.id().to_string(),
                        life,
                    },
                )?),
                Some(_) => op
                    .assert(Assert::DocExists)
                    .set(F_LIFE, serde_json::to_value(life)?),
            };
            Ok(vec![op])
        })
    }

    pub fn life(&self, tag: &ReceiverTag) -> Result<Option<Life>> {
        let (collection, doc_id) = self.collection_and_id(tag)?;
        self.life_of(collection, &doc_id)
    }
}

impl ReceiverResolver for StoreReceivers {
    fn collection_and_id(&self, tag: &ReceiverTag) -> Result<(Collection, String)> {
        let collection = match tag.kind() {
            ReceiverKind::Unit => Collection::Units,
            ReceiverKind::Machine => Collection::Machines,
        };
        Ok((collection, self.store.doc_id(tag.id())))
    }

    fn life_of(&self, collection: Collection, doc_id: &str) -> Result<Option<Life>> {
        let doc: Option<ReceiverDoc> = self.store.get(collection, doc_id)?;
        Ok(doc.map(|d| d.life))
    }
}
