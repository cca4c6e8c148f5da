//! Assertion-guarded document operations.
//!
//! A transaction is a list of [`TxnOp`]s. Every op names one document and
//! carries an [`Assert`] on that document's current state. The store applies
//! the whole list atomically only if every assertion holds; otherwise nothing
//! is written and the caller's builder is asked for a fresh list (see
//! [`Store::run`](crate::store::Store::run)).

use serde_json::Value;

use crate::error::{Result, TasklineError};

// ---------------------------------------------------------------------------
// Collection
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Collection {
    Actions,
    ActionNotifications,
    Operations,
    Units,
    Machines,
}

impl Collection {
    pub fn all() -> &'static [Collection] {
        &[
            Collection::Actions,
            Collection::ActionNotifications,
            Collection::Operations,
            Collection::Units,
            Collection::Machines,
        ]
    }

    pub fn name(self) -> &'static str {
        match self {
            Collection::Actions => "actions",
            Collection::ActionNotifications => "actionnotifications",
            Collection::Operations => "operations",
            Collection::Units => "units",
            Collection::Machines => "machines",
        }
    }
}

// ---------------------------------------------------------------------------
// Assertions
// ---------------------------------------------------------------------------

/// Condition on a single top-level field. A missing field reads as `null`.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldAssert {
    Eq(&'static str, Value),
    NotIn(&'static str, Vec<Value>),
    /// The field is an array (or missing) with fewer than `n` elements.
    LenBelow(&'static str, usize),
}

impl FieldAssert {
    fn holds(&self, doc: &Value) -> bool {
        match self {
            FieldAssert::Eq(field, want) => field_of(doc, field) == want,
            FieldAssert::NotIn(field, values) => !values.contains(field_of(doc, field)),
            FieldAssert::LenBelow(field, n) => match field_of(doc, field) {
                Value::Array(items) => items.len() < *n,
                Value::Null => *n > 0,
                _ => false,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub enum Assert {
    #[default]
    Any,
    DocExists,
    DocMissing,
    /// The document exists and every field condition holds.
    Fields(Vec<FieldAssert>),
}

impl Assert {
    pub fn field(cond: FieldAssert) -> Self {
        Assert::Fields(vec![cond])
    }

    pub(crate) fn holds(&self, doc: Option<&Value>) -> bool {
        match (self, doc) {
            (Assert::Any, _) => true,
            (Assert::DocExists, d) => d.is_some(),
            (Assert::DocMissing, d) => d.is_none(),
            (Assert::Fields(_), None) => false,
            (Assert::Fields(conds), Some(doc)) => conds.iter().all(|c| c.holds(doc)),
        }
    }
}

// ---------------------------------------------------------------------------
// Changes
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum Update {
    Set(&'static str, Value),
    Inc(&'static str, i64),
    Push(&'static str, Value),
}

/// What to do with the document once every assertion in the transaction has
/// held. Updates and removals of a missing document are no-ops, as is an
/// insert over an existing one; guard with `DocExists`/`DocMissing` when that
/// matters.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Change {
    #[default]
    AssertOnly,
    Insert(Value),
    Update(Vec<Update>),
    Remove,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TxnOp {
    pub collection: Collection,
    pub id: String,
    pub assert: Assert,
    pub change: Change,
}

impl TxnOp {
    pub fn new(collection: Collection, id: impl Into<String>) -> Self {
        Self {
            collection,
            id: id.into(),
            assert: Assert::Any,
            change: Change::AssertOnly,
        }
    }

    pub fn assert(mut self, assert: Assert) -> Self {
        self.assert = assert;
        self
    }

    pub fn insert(mut self, doc: Value) -> Self {
        self.change = Change::Insert(doc);
        self
    }

    pub fn remove(mut self) -> Self {
        self.change = Change::Remove;
        self
    }

    pub fn set(self, field: &'static str, value: Value) -> Self {
        self.push_update(Update::Set(field, value))
    }

    pub fn inc(self, field: &'static str, by: i64) -> Self {
        self.push_update(Update::Inc(field, by))
    }

    pub fn push(self, field: &'static str, value: Value) -> Self {
        self.push_update(Update::Push(field, value))
    }

    fn push_update(mut self, update: Update) -> Self {
        match &mut self.change {
            Change::Update(updates) => updates.push(update),
            _ => self.change = Change::Update(vec![update]),
        }
        self
    }
}

fn field_of<'a>(doc: &'a Value, field: &str) -> &'a Value {
    doc.get(field).unwrap_or(&Value::Null)
}

/// Apply `updates` to `doc` in order.
pub(crate) fn apply_updates(doc: &mut Value, updates: &[Update]) -> Result<()> {
    let obj = doc
        .as_object_mut()
        .ok_or_else(|| TasklineError::Store("document is not an object".into()))?;
    for update in updates {
        match update {
            Update::Set(field, value) => {
                obj.insert((*field).to_string(), value.clone());
            }
            Update::Inc(field, by) => {
                let current = obj.get(*field).and_then(Value::as_i64).unwrap_or(0);
                obj.insert((*field).to_string(), Value::from(current + by));
            }
            Update::Push(field, value) => {
                let slot = obj
                    .entry((*field).to_string())
                    .or_insert_with(|| Value::Array(Vec::new()));
                if slot.is_null() {
                    *slot = Value::Array(Vec::new());
                }
                match slot {
                    Value::Array(items) => items.push(value.clone()),
                    _ => {
                        return Err(TasklineError::Store(format!(
                            "cannot push to non-array field {field:?}"
                        )))
                    }
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn field_assertions() {
        let doc = json!({"status": "running", "messages": [1, 2]});
        assert!(Assert::field(FieldAssert::Eq("status", json!("running"))).holds(Some(&doc)));
        assert!(!Assert::field(FieldAssert::Eq("status", json!("pending"))).holds(Some(&doc)));
        assert!(Assert::field(FieldAssert::NotIn(
            "status",
            vec![json!("completed"), json!("failed")]
        ))
        .holds(Some(&doc)));
        assert!(Assert::field(FieldAssert::LenBelow("messages", 3)).holds(Some(&doc)));
        assert!(!Assert::field(FieldAssert::LenBelow("messages", 2)).holds(Some(&doc)));
        assert!(Assert::field(FieldAssert::LenBelow("absent", 1)).holds(Some(&doc)));
    }

    #[test]
    fn missing_field_reads_as_null() {
        let doc = json!({});
        assert!(Assert::field(FieldAssert::Eq("operation", Value::Null)).holds(Some(&doc)));
    }

    #[test]
    fn existence_assertions() {
        let doc = json!({});
        assert!(Assert::DocExists.holds(Some(&doc)));
        assert!(!Assert::DocExists.holds(None));
        assert!(Assert::DocMissing.holds(None));
        assert!(!Assert::Fields(vec![]).holds(None));
        assert!(Assert::Any.holds(None));
    }

    #[test]
    fn updates_apply_in_order() {
        let mut doc = json!({"count": 1});
        apply_updates(
            &mut doc,
            &[
                Update::Inc("count", 2),
                Update::Set("status", json!("running")),
                Update::Push("messages", json!("a")),
                Update::Push("messages", json!("b")),
            ],
        )
        .unwrap();
        assert_eq!(
            doc,
            json!({"count": 3, "status": "running", "messages": ["a", "b"]})
        );
    }

    #[test]
    fn builder_accumulates_updates() {
        let op = TxnOp::new(Collection::Operations, "m:1")
            .assert(Assert::DocExists)
            .set("status", json!("running"))
            .inc("complete-task-count", 1);
        match op.change {
            Change::Update(u) => assert_eq!(u.len(), 2),
            other => panic!("expected update, got {other:?}"),
        }
    }
}
