//! Document store on redb.
//!
//! # Table design
//!
//! One table per [`Collection`], keyed by document id, valued by the JSON
//! encoding of the document:
//! ```text
//! "<model-uuid>:<local-id>"  ->  {"status": "pending", ...}
//! ```
//! Prefixing every id with the model uuid keeps each model's documents in a
//! contiguous key range, so "all documents of this model" and "all
//! notifications for this receiver" are both single range scans.
//!
//! Named sequences live in a separate `sequences` table keyed by
//! `"<model-uuid>:<name>"`.
//!
//! All mutation goes through [`Store::run`], which applies a list of
//! assertion-guarded [`TxnOp`]s inside one redb write transaction and asks the
//! caller to rebuild the list whenever an assertion fails.

use std::path::Path;

use redb::{
    Database, ReadTransaction, ReadableTable, ReadableTableMetadata, TableDefinition,
    WriteTransaction,
};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, trace};

use crate::error::{Result, TasklineError};
use crate::txn::{apply_updates, Change, Collection, TxnOp};

// ---------------------------------------------------------------------------
// Table definitions
// ---------------------------------------------------------------------------

const ACTIONS: TableDefinition<&str, &[u8]> = TableDefinition::new("actions");
const ACTION_NOTIFICATIONS: TableDefinition<&str, &[u8]> =
    TableDefinition::new("actionnotifications");
const OPERATIONS: TableDefinition<&str, &[u8]> = TableDefinition::new("operations");
const UNITS: TableDefinition<&str, &[u8]> = TableDefinition::new("units");
const MACHINES: TableDefinition<&str, &[u8]> = TableDefinition::new("machines");

/// Key: `"<model-uuid>:<sequence name>"`, value: last value handed out.
const SEQUENCES: TableDefinition<&str, u64> = TableDefinition::new("sequences");

fn table_for(c: Collection) -> TableDefinition<'static, &'static str, &'static [u8]> {
    match c {
        Collection::Actions => ACTIONS,
        Collection::ActionNotifications => ACTION_NOTIFICATIONS,
        Collection::Operations => OPERATIONS,
        Collection::Units => UNITS,
        Collection::Machines => MACHINES,
    }
}

fn db_err(e: impl std::fmt::Display) -> TasklineError {
    TasklineError::Store(e.to_string())
}

/// Rows deleted per write transaction by [`Store::remove_ids`].
const REMOVE_BATCH: usize = 1000;

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct StoreOptions {
    /// Scopes every document id; one store file may hold several models.
    pub model_uuid: String,
    /// How many times [`Store::run`] rebuilds a transaction whose
    /// assertions failed before giving up.
    pub max_txn_attempts: u32,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            model_uuid: "local".to_string(),
            max_txn_attempts: 3,
        }
    }
}

/// Count and approximate on-disk footprint of one collection of one model.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CollectionStats {
    pub count: u64,
    /// Sum of key and value lengths.
    pub size_bytes: u64,
}

impl CollectionStats {
    pub fn avg_doc_size(&self) -> u64 {
        if self.count == 0 {
            0
        } else {
            self.size_bytes.div_ceil(self.count)
        }
    }
}

pub struct Store {
    db: Database,
    model_uuid: String,
    max_txn_attempts: u32,
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("model_uuid", &self.model_uuid)
            .field("max_txn_attempts", &self.max_txn_attempts)
            .finish()
    }
}

impl Store {
    /// Open or create the redb database at `path`.
    ///
    /// Creates every table if it doesn't already exist.
    pub fn open(path: &Path, options: StoreOptions) -> Result<Self> {
        if options.max_txn_attempts == 0 {
            return Err(TasklineError::InvalidArgument(
                "max_txn_attempts must be at least 1".into(),
            ));
        }
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let db = Database::create(path).map_err(db_err)?;
        // Ensure the tables exist before any reads
        let wt = db.begin_write().map_err(db_err)?;
        for c in Collection::all() {
            wt.open_table(table_for(*c)).map_err(db_err)?;
        }
        wt.open_table(SEQUENCES).map_err(db_err)?;
        wt.commit().map_err(db_err)?;
        Ok(Self {
            db,
            model_uuid: options.model_uuid,
            max_txn_attempts: options.max_txn_attempts,
        })
    }

    pub fn model_uuid(&self) -> &str {
        &self.model_uuid
    }

    /// Global document id for a model-local id.
    pub fn doc_id(&self, local_id: &str) -> String {
        format!("{}:{}", self.model_uuid, local_id)
    }

    /// Strip the model prefix from a document id.
    pub fn local_id<'a>(&self, doc_id: &'a str) -> &'a str {
        doc_id
            .strip_prefix(self.model_uuid.as_str())
            .and_then(|rest| rest.strip_prefix(':'))
            .unwrap_or(doc_id)
    }

    fn model_prefix(&self) -> String {
        self.doc_id("")
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    /// Run `f` against a consistent snapshot of the store.
    pub fn view<T>(&self, f: impl FnOnce(&View<'_>) -> Result<T>) -> Result<T> {
        let rt = self.db.begin_read().map_err(db_err)?;
        let view = View { store: self, rt };
        f(&view)
    }

    pub fn get<T: DeserializeOwned>(&self, c: Collection, doc_id: &str) -> Result<Option<T>> {
        self.view(|v| v.get(c, doc_id))
    }

    pub fn find<T: DeserializeOwned>(
        &self,
        c: Collection,
        pred: impl FnMut(&T) -> bool,
    ) -> Result<Vec<T>> {
        self.view(|v| v.find(c, pred))
    }

    pub fn ids_with_prefix(&self, c: Collection, prefix: &str) -> Result<Vec<String>> {
        self.view(|v| v.ids_with_prefix(c, prefix))
    }

    pub fn stats(&self, c: Collection) -> Result<CollectionStats> {
        self.view(|v| v.stats(c))
    }

    // -----------------------------------------------------------------------
    // Sequences
    // -----------------------------------------------------------------------

    /// Atomically advance the named counter and return its new value, which
    /// is never below `minimum`.
    pub fn next_sequence(&self, name: &str, minimum: u64) -> Result<u64> {
        let key = self.doc_id(name);
        let wt = self.db.begin_write().map_err(db_err)?;
        let next = {
            let mut table = wt.open_table(SEQUENCES).map_err(db_err)?;
            let last = table
                .get(key.as_str())
                .map_err(db_err)?
                .map(|g| g.value())
                .unwrap_or(0);
            let next = (last + 1).max(minimum);
            table.insert(key.as_str(), next).map_err(db_err)?;
            next
        };
        wt.commit().map_err(db_err)?;
        trace!(sequence = name, value = next, "allocated sequence value");
        Ok(next)
    }

    // -----------------------------------------------------------------------
    // Transactions
    // -----------------------------------------------------------------------

    /// Build and apply a transaction, rebuilding it while assertions fail.
    ///
    /// `build` receives the zero-based attempt number; on attempts after the
    /// first it is expected to re-read whatever state it based its ops on. An
    /// error from `build` aborts immediately. An empty op list succeeds
    /// without writing. When every attempt hits a failed assertion the result
    /// is [`TasklineError::ExcessiveContention`].
    pub fn run<F>(&self, mut build: F) -> Result<()>
    where
        F: FnMut(u32) -> Result<Vec<TxnOp>>,
    {
        for attempt in 0..self.max_txn_attempts {
            let ops = build(attempt)?;
            if ops.is_empty() {
                return Ok(());
            }
            if self.apply(&ops)? {
                return Ok(());
            }
            debug!(attempt, ops = ops.len(), "transaction assertion failed");
        }
        Err(TasklineError::ExcessiveContention)
    }

    /// Apply `ops` in one write transaction. Returns `false`, having written
    /// nothing, if any assertion does not hold.
    fn apply(&self, ops: &[TxnOp]) -> Result<bool> {
        let wt = self.db.begin_write().map_err(db_err)?;
        if !assertions_hold(&wt, ops)? {
            wt.abort().map_err(db_err)?;
            return Ok(false);
        }
        for op in ops {
            let mut table = wt.open_table(table_for(op.collection)).map_err(db_err)?;
            let current: Option<Value> = match table.get(op.id.as_str()).map_err(db_err)? {
                Some(g) => Some(serde_json::from_slice(g.value())?),
                None => None,
            };
            match (&op.change, current) {
                (Change::AssertOnly, _) => {}
                (Change::Insert(doc), None) => {
                    let bytes = serde_json::to_vec(doc)?;
                    table
                        .insert(op.id.as_str(), bytes.as_slice())
                        .map_err(db_err)?;
                }
                (Change::Insert(_), Some(_)) => {}
                (Change::Update(updates), Some(mut doc)) => {
                    apply_updates(&mut doc, updates)?;
                    let bytes = serde_json::to_vec(&doc)?;
                    table
                        .insert(op.id.as_str(), bytes.as_slice())
                        .map_err(db_err)?;
                }
                (Change::Update(_), None) => {}
                (Change::Remove, _) => {
                    table.remove(op.id.as_str()).map_err(db_err)?;
                }
            }
        }
        wt.commit().map_err(db_err)?;
        Ok(true)
    }

    /// Delete documents outside of any assertion, in batches. Returns how
    /// many existed.
    pub fn remove_ids(&self, c: Collection, ids: &[String]) -> Result<usize> {
        let mut removed = 0;
        for chunk in ids.chunks(REMOVE_BATCH) {
            let wt = self.db.begin_write().map_err(db_err)?;
            {
                let mut table = wt.open_table(table_for(c)).map_err(db_err)?;
                for id in chunk {
                    if table.remove(id.as_str()).map_err(db_err)?.is_some() {
                        removed += 1;
                    }
                }
            }
            wt.commit().map_err(db_err)?;
        }
        Ok(removed)
    }
}

fn assertions_hold(wt: &WriteTransaction, ops: &[TxnOp]) -> Result<bool> {
    for op in ops {
        let table = wt.open_table(table_for(op.collection)).map_err(db_err)?;
        let current: Option<Value> = match table.get(op.id.as_str()).map_err(db_err)? {
            Some(g) => Some(serde_json::from_slice(g.value())?),
            None => None,
        };
        if !op.assert.holds(current.as_ref()) {
            trace!(
                collection = op.collection.name(),
                id = %op.id,
                "assertion does not hold"
            );
            return Ok(false);
        }
    }
    Ok(true)
}

// ---------------------------------------------------------------------------
// View
// ---------------------------------------------------------------------------

/// A read snapshot. Everything read through one `View` is mutually
/// consistent.
pub struct View<'s> {
    store: &'s Store,
    rt: ReadTransaction,
}

impl View<'_> {
    pub fn get<T: DeserializeOwned>(&self, c: Collection, doc_id: &str) -> Result<Option<T>> {
        let table = self.rt.open_table(table_for(c)).map_err(db_err)?;
        match table.get(doc_id).map_err(db_err)? {
            Some(g) => Ok(Some(serde_json::from_slice(g.value())?)),
            None => Ok(None),
        }
    }

    /// Visit every document of this model in `c` whose id starts with
    /// `prefix`, in id order.
    fn scan_raw(
        &self,
        c: Collection,
        prefix: &str,
        mut f: impl FnMut(&str, &[u8]) -> Result<()>,
    ) -> Result<()> {
        let table = self.rt.open_table(table_for(c)).map_err(db_err)?;
        for entry in table.range(prefix..).map_err(db_err)? {
            let (k, v) = entry.map_err(db_err)?;
            let key = k.value();
            if !key.starts_with(prefix) {
                break;
            }
            f(key, v.value())?;
        }
        Ok(())
    }

    /// All documents of this model in `c` accepted by `pred`, in id order.
    pub fn find<T: DeserializeOwned>(
        &self,
        c: Collection,
        mut pred: impl FnMut(&T) -> bool,
    ) -> Result<Vec<T>> {
        let mut out = Vec::new();
        self.scan_raw(c, &self.store.model_prefix(), |_, bytes| {
            let doc: T = serde_json::from_slice(bytes)?;
            if pred(&doc) {
                out.push(doc);
            }
            Ok(())
        })?;
        Ok(out)
    }

    /// Ids of documents in `c` starting with `prefix`. The prefix is a full
    /// document id prefix, model uuid included.
    pub fn ids_with_prefix(&self, c: Collection, prefix: &str) -> Result<Vec<String>> {
        let mut out = Vec::new();
        self.scan_raw(c, prefix, |key, _| {
            out.push(key.to_string());
            Ok(())
        })?;
        Ok(out)
    }

    pub fn stats(&self, c: Collection) -> Result<CollectionStats> {
        let mut stats = CollectionStats::default();
        self.scan_raw(c, &self.store.model_prefix(), |key, bytes| {
            stats.count += 1;
            stats.size_bytes += (key.len() + bytes.len()) as u64;
            Ok(())
        })?;
        Ok(stats)
    }

    /// Number of rows in `c` across every model sharing the file.
    pub fn raw_len(&self, c: Collection) -> Result<u64> {
        let table = self.rt.open_table(table_for(c)).map_err(db_err)?;
        table.len().map_err(db_err)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
