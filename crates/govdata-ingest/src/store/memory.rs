//! In-memory record store
//!
//! Same contract as the Postgres store: writes go through page transactions
//! and only become visible on commit. Also counts commits and rollbacks, and
//! can be told to reject writes for specific keys.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::{finished_transaction, NaturalKey, PageTransaction, RecordStore, Row, TableSchema, UpsertOutcome, Value};
use crate::error::{IngestError, Result};

/// A committed row
#[derive(Debug, Clone, PartialEq)]
pub struct StoredRow {
    pub values: Vec<Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct State {
    tables: HashMap<String, BTreeMap<NaturalKey, StoredRow>>,
    rejected: HashSet<(String, NaturalKey)>,
    commits: usize,
    rollbacks: usize,
}

#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<State>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        lock_state(&self.state)
    }

    /// Make every upsert of `key` into `table` fail with a persistence error.
    pub fn reject_key(&self, table: &str, key: impl Into<NaturalKey>) {
        self.lock().rejected.insert((table.to_string(), key.into()));
    }

    pub fn has_table(&self, table: &str) -> bool {
        self.lock().tables.contains_key(table)
    }

    pub fn row_count(&self, table: &str) -> usize {
        self.lock().tables.get(table).map_or(0, BTreeMap::len)
    }

    pub fn row(&self, table: &str, key: &NaturalKey) -> Option<StoredRow> {
        self.lock().tables.get(table).and_then(|rows| rows.get(key)).cloned()
    }

    /// Committed keys of `table`, in key order.
    pub fn keys(&self, table: &str) -> Vec<NaturalKey> {
        self.lock()
            .tables
            .get(table)
            .map(|rows| rows.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn commits(&self) -> usize {
        self.lock().commits
    }

    pub fn rollbacks(&self) -> usize {
        self.lock().rollbacks
    }
}

fn lock_state(state: &Mutex<State>) -> MutexGuard<'_, State> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn ensure_schema(&self, schema: &TableSchema) -> Result<()> {
        self.lock().tables.entry(schema.table.to_string()).or_default();
        Ok(())
    }

    async fn begin(&self) -> Result<Box<dyn PageTransaction>> {
        Ok(Box::new(MemoryTransaction {
            state: Arc::clone(&self.state),
            pending: Vec::new(),
            finished: false,
        }))
    }
}

struct MemoryTransaction {
    state: Arc<Mutex<State>>,
    pending: Vec<Row>,
    finished: bool,
}

#[async_trait]
impl PageTransaction for MemoryTransaction {
    async fn upsert(&mut self, row: &Row) -> Result<UpsertOutcome> {
        if self.finished {
            return Err(finished_transaction());
        }
        row.validate()?;

        let table = row.schema.table;
        let state = lock_state(&self.state);

        let Some(rows) = state.tables.get(table) else {
            return Err(IngestError::Persistence(format!(
                "relation \"{}\" does not exist",
                table
            )));
        };

        if state.rejected.contains(&(table.to_string(), row.key.clone())) {
            return Err(IngestError::Persistence(format!(
                "write rejected for {} key {}",
                table, row.key
            )));
        }

        let seen = rows.contains_key(&row.key)
            || self
                .pending
                .iter()
                .any(|pending| pending.schema.table == table && pending.key == row.key);
        drop(state);

        self.pending.push(row.clone());
        Ok(if seen {
            UpsertOutcome::Updated
        } else {
            UpsertOutcome::Inserted
        })
    }

    async fn commit(&mut self) -> Result<()> {
        if self.finished {
            return Err(finished_transaction());
        }
        self.finished = true;

        let now = Utc::now();
        let mut state = lock_state(&self.state);
        for row in self.pending.drain(..) {
            let rows = state.tables.entry(row.schema.table.to_string()).or_default();
            match rows.get_mut(&row.key) {
                Some(existing) => {
                    existing.values = row.values;
                    existing.updated_at = now;
                },
                None => {
                    rows.insert(
                        row.key,
                        StoredRow { values: row.values, created_at: now, updated_at: now },
                    );
                },
            }
        }
        state.commits += 1;
        Ok(())
    }

    async fn rollback(&mut self) -> Result<()> {
        if self.finished {
            return Err(finished_transaction());
        }
        self.finished = true;
        self.pending.clear();
        lock_state(&self.state).rollbacks += 1;
        Ok(())
    }
}
