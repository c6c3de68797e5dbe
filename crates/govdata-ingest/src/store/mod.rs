//! Upsert persistence
//!
//! Record sources describe what they write as [`Row`]s against static
//! [`TableSchema`]s; a [`RecordStore`] turns those into tables and
//! page-scoped transactions. Two stores exist:
//!
//! - [`PgRecordStore`]: Postgres via sqlx, used for real loads
//! - [`MemoryStore`]: in-process, used by `--dry-run` and tests
//!
//! Every write is keyed by a natural key taken verbatim from upstream data.
//! Upserting an existing key overwrites the mutable columns and never touches
//! the key itself.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::NaiveDate;
use std::fmt;

use crate::error::{IngestError, Result};

pub use memory::MemoryStore;
pub use postgres::{create_pool, health_check, PgRecordStore};

// ============================================================================
// Schema description
// ============================================================================

/// SQL type of a table's natural key column (`id`)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyType {
    Text,
    Int,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Text,
    Int,
    Float,
    Date,
}

/// One mutable column of an entity table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnDef {
    pub name: &'static str,
    pub column_type: ColumnType,
    /// Parent references and common lookup columns get a secondary index
    pub indexed: bool,
}

impl ColumnDef {
    pub const fn text(name: &'static str) -> Self {
        Self { name, column_type: ColumnType::Text, indexed: false }
    }

    pub const fn int(name: &'static str) -> Self {
        Self { name, column_type: ColumnType::Int, indexed: false }
    }

    pub const fn float(name: &'static str) -> Self {
        Self { name, column_type: ColumnType::Float, indexed: false }
    }

    pub const fn date(name: &'static str) -> Self {
        Self { name, column_type: ColumnType::Date, indexed: false }
    }

    pub const fn indexed(self) -> Self {
        Self { indexed: true, ..self }
    }
}

/// Table layout of one entity type.
///
/// Besides `id` and `columns`, every table carries `created_at`,
/// `updated_at` and `deleted_at` audit timestamps managed by the store.
#[derive(Debug, PartialEq, Eq)]
pub struct TableSchema {
    pub table: &'static str,
    pub key_type: KeyType,
    pub columns: &'static [ColumnDef],
}

// ============================================================================
// Rows
// ============================================================================

/// Stable upstream identifier, used as the primary key
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum NaturalKey {
    Text(String),
    Int(i64),
}

impl NaturalKey {
    pub fn key_type(&self) -> KeyType {
        match self {
            NaturalKey::Text(_) => KeyType::Text,
            NaturalKey::Int(_) => KeyType::Int,
        }
    }
}

impl fmt::Display for NaturalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NaturalKey::Text(key) => f.write_str(key),
            NaturalKey::Int(key) => write!(f, "{}", key),
        }
    }
}

impl From<&str> for NaturalKey {
    fn from(key: &str) -> Self {
        NaturalKey::Text(key.to_string())
    }
}

impl From<String> for NaturalKey {
    fn from(key: String) -> Self {
        NaturalKey::Text(key)
    }
}

impl From<i64> for NaturalKey {
    fn from(key: i64) -> Self {
        NaturalKey::Int(key)
    }
}

/// A column value. Text columns are `NOT NULL` (empty string when upstream
/// has nothing); the other types are nullable.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Text(String),
    Int(Option<i64>),
    Float(Option<f64>),
    Date(Option<NaiveDate>),
}

impl Value {
    pub fn column_type(&self) -> ColumnType {
        match self {
            Value::Text(_) => ColumnType::Text,
            Value::Int(_) => ColumnType::Int,
            Value::Float(_) => ColumnType::Float,
            Value::Date(_) => ColumnType::Date,
        }
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Text(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Text(value.to_string())
    }
}

impl From<Option<i64>> for Value {
    fn from(value: Option<i64>) -> Self {
        Value::Int(value)
    }
}

impl From<Option<f64>> for Value {
    fn from(value: Option<f64>) -> Self {
        Value::Float(value)
    }
}

impl From<Option<NaiveDate>> for Value {
    fn from(value: Option<NaiveDate>) -> Self {
        Value::Date(value)
    }
}

/// One entity ready to be upserted: key plus values in `schema.columns` order
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    pub schema: &'static TableSchema,
    pub key: NaturalKey,
    pub values: Vec<Value>,
}

impl Row {
    pub fn new(schema: &'static TableSchema, key: NaturalKey, values: Vec<Value>) -> Self {
        Self { schema, key, values }
    }

    /// Value of the named column, if the schema has it.
    pub fn get(&self, column: &str) -> Option<&Value> {
        self.schema
            .columns
            .iter()
            .position(|def| def.name == column)
            .and_then(|index| self.values.get(index))
    }

    /// Check the row matches its schema's shape before it reaches a store.
    pub fn validate(&self) -> Result<()> {
        if self.key.key_type() != self.schema.key_type {
            return Err(IngestError::Persistence(format!(
                "{}: key {} has type {:?}, table expects {:?}",
                self.schema.table,
                self.key,
                self.key.key_type(),
                self.schema.key_type
            )));
        }

        if self.values.len() != self.schema.columns.len() {
            return Err(IngestError::Persistence(format!(
                "{}: row {} has {} values for {} columns",
                self.schema.table,
                self.key,
                self.values.len(),
                self.schema.columns.len()
            )));
        }

        for (def, value) in self.schema.columns.iter().zip(&self.values) {
            if def.column_type != value.column_type() {
                return Err(IngestError::Persistence(format!(
                    "{}.{}: expected {:?}, got {:?}",
                    self.schema.table,
                    def.name,
                    def.column_type,
                    value.column_type()
                )));
            }
        }

        Ok(())
    }
}

/// What an upsert did with a record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Updated,
    /// The record was deliberately not written (e.g. it has no usable key)
    Skipped,
}

/// A persistable dataset entity
pub trait Entity {
    fn schema() -> &'static TableSchema;

    fn natural_key(&self) -> NaturalKey;

    fn to_row(&self) -> Row;
}

// ============================================================================
// Store traits
// ============================================================================

/// Where rows go
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Create the table and its indexes if they do not exist yet.
    async fn ensure_schema(&self, schema: &TableSchema) -> Result<()>;

    /// Open a transaction for one page of one record source.
    async fn begin(&self) -> Result<Box<dyn PageTransaction>>;
}

/// A page-scoped transaction. Dropping it without `commit` discards every
/// write made through it.
#[async_trait]
pub trait PageTransaction: Send {
    /// Insert the row, or overwrite the mutable columns of the existing row
    /// with the same key.
    async fn upsert(&mut self, row: &Row) -> Result<UpsertOutcome>;

    async fn commit(&mut self) -> Result<()>;

    async fn rollback(&mut self) -> Result<()>;
}

/// Upsert an entity through a page transaction.
pub async fn upsert_entity<E: Entity + Sync>(
    tx: &mut dyn PageTransaction,
    entity: &E,
) -> Result<UpsertOutcome> {
    tx.upsert(&entity.to_row()).await
}

pub(crate) fn finished_transaction() -> IngestError {
    IngestError::Persistence("transaction already committed or rolled back".to_string())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    static WIDGETS: TableSchema = TableSchema {
        table: "widgets",
        key_type: KeyType::Int,
        columns: &[
            ColumnDef::text("name"),
            ColumnDef::int("parent_id").indexed(),
            ColumnDef::date("opened"),
        ],
    };

    #[test]
    fn test_valid_row() {
        let row = Row::new(
            &WIDGETS,
            NaturalKey::Int(7),
            vec!["seven".into(), Value::Int(Some(1)), Value::Date(None)],
        );
        assert!(row.validate().is_ok());
        assert_eq!(row.get("name"), Some(&Value::Text("seven".to_string())));
        assert_eq!(row.get("missing"), None);
    }

    #[test]
    fn test_key_type_mismatch() {
        let row = Row::new(
            &WIDGETS,
            NaturalKey::from("seven"),
            vec!["seven".into(), Value::Int(None), Value::Date(None)],
        );
        assert!(matches!(row.validate(), Err(IngestError::Persistence(_))));
    }

    #[test]
    fn test_value_shape_mismatch() {
        let short = Row::new(&WIDGETS, NaturalKey::Int(1), vec!["one".into()]);
        assert!(short.validate().is_err());

        let mistyped = Row::new(
            &WIDGETS,
            NaturalKey::Int(1),
            vec!["one".into(), Value::Text("2".into()), Value::Date(None)],
        );
        let err = mistyped.validate().unwrap_err().to_string();
        assert!(err.contains("widgets.parent_id"));
    }

    #[test]
    fn test_indexed_builder() {
        assert!(WIDGETS.columns[1].indexed);
        assert!(!WIDGETS.columns[0].indexed);
    }

    #[test]
    fn test_natural_key_display() {
        assert_eq!(NaturalKey::Int(100000).to_string(), "100000");
        assert_eq!(NaturalKey::from("http://x/postcodeunit/SW1A1AA").to_string(), "http://x/postcodeunit/SW1A1AA");
    }
}
