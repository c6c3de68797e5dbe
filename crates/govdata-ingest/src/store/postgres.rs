//! Postgres record store

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{Postgres, QueryBuilder, Transaction};
use tracing::{debug, info};

use super::{
    finished_transaction, ColumnType, KeyType, NaturalKey, PageTransaction, RecordStore, Row,
    TableSchema, UpsertOutcome, Value,
};
use crate::config::DatabaseSettings;
use crate::error::Result;

pub async fn create_pool(settings: &DatabaseSettings) -> Result<PgPool> {
    let url = settings.connection_url()?;

    let pool = PgPoolOptions::new()
        .max_connections(settings.max_connections)
        .acquire_timeout(settings.connect_timeout())
        .connect(&url)
        .await?;

    info!(
        url = %settings.redacted_url(),
        max_connections = settings.max_connections,
        "Database connection pool created"
    );

    Ok(pool)
}

pub async fn health_check(pool: &PgPool) -> Result<()> {
    sqlx::query("SELECT 1").execute(pool).await?;
    Ok(())
}

fn key_sql_type(key_type: KeyType) -> &'static str {
    match key_type {
        KeyType::Text => "TEXT",
        KeyType::Int => "BIGINT",
    }
}

fn column_sql_type(column_type: ColumnType) -> &'static str {
    match column_type {
        ColumnType::Text => "TEXT NOT NULL DEFAULT ''",
        ColumnType::Int => "BIGINT",
        ColumnType::Float => "DOUBLE PRECISION",
        ColumnType::Date => "DATE",
    }
}

/// `CREATE TABLE IF NOT EXISTS` for an entity table.
pub fn create_table_sql(schema: &TableSchema) -> String {
    let mut sql = format!(
        "CREATE TABLE IF NOT EXISTS {} (\n    id {} PRIMARY KEY",
        schema.table,
        key_sql_type(schema.key_type)
    );
    for column in schema.columns {
        sql.push_str(&format!(",\n    {} {}", column.name, column_sql_type(column.column_type)));
    }
    sql.push_str(
        ",\n    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),\n    updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),\n    deleted_at TIMESTAMPTZ\n)",
    );
    sql
}

/// Columns added to an entity after its table was first created.
pub fn add_column_sql(schema: &TableSchema) -> Vec<String> {
    schema
        .columns
        .iter()
        .map(|column| {
            format!(
                "ALTER TABLE {} ADD COLUMN IF NOT EXISTS {} {}",
                schema.table,
                column.name,
                column_sql_type(column.column_type)
            )
        })
        .collect()
}

pub fn create_index_sql(schema: &TableSchema) -> Vec<String> {
    schema
        .columns
        .iter()
        .filter(|column| column.indexed)
        .map(|column| {
            format!(
                "CREATE INDEX IF NOT EXISTS idx_{table}_{column} ON {table} ({column})",
                table = schema.table,
                column = column.name
            )
        })
        .collect()
}

fn push_key(query: &mut QueryBuilder<'_, Postgres>, key: &NaturalKey) {
    match key {
        NaturalKey::Text(key) => query.push_bind(key.clone()),
        NaturalKey::Int(key) => query.push_bind(*key),
    };
}

fn push_value(query: &mut QueryBuilder<'_, Postgres>, value: &Value) {
    match value {
        Value::Text(value) => query.push_bind(value.clone()),
        Value::Int(value) => query.push_bind(*value),
        Value::Float(value) => query.push_bind(*value),
        Value::Date(value) => query.push_bind(*value),
    };
}

/// Record store backed by a Postgres pool
#[derive(Debug, Clone)]
pub struct PgRecordStore {
    pool: PgPool,
}

impl PgRecordStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(settings: &DatabaseSettings) -> Result<Self> {
        Ok(Self::new(create_pool(settings).await?))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl RecordStore for PgRecordStore {
    async fn ensure_schema(&self, schema: &TableSchema) -> Result<()> {
        sqlx::query(&create_table_sql(schema)).execute(&self.pool).await?;

        for statement in add_column_sql(schema).iter().chain(&create_index_sql(schema)) {
            sqlx::query(statement).execute(&self.pool).await?;
        }

        debug!(table = schema.table, "Schema ensured");
        Ok(())
    }

    async fn begin(&self) -> Result<Box<dyn PageTransaction>> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgPageTransaction { tx: Some(tx) }))
    }
}

/// One page's transaction. `None` once committed or rolled back.
pub struct PgPageTransaction {
    tx: Option<Transaction<'static, Postgres>>,
}

#[async_trait]
impl PageTransaction for PgPageTransaction {
    async fn upsert(&mut self, row: &Row) -> Result<UpsertOutcome> {
        row.validate()?;
        let tx = self.tx.as_mut().ok_or_else(finished_transaction)?;
        let schema = row.schema;

        let mut exists = QueryBuilder::<Postgres>::new(format!(
            "SELECT EXISTS (SELECT 1 FROM {} WHERE id = ",
            schema.table
        ));
        push_key(&mut exists, &row.key);
        exists.push(")");
        let found: bool = exists.build_query_scalar().fetch_one(&mut **tx).await?;

        if found {
            let mut update = QueryBuilder::<Postgres>::new(format!("UPDATE {} SET ", schema.table));
            for (column, value) in schema.columns.iter().zip(&row.values) {
                update.push(column.name).push(" = ");
                push_value(&mut update, value);
                update.push(", ");
            }
            update.push("updated_at = NOW() WHERE id = ");
            push_key(&mut update, &row.key);
            update.build().execute(&mut **tx).await?;

            Ok(UpsertOutcome::Updated)
        } else {
            let mut insert = QueryBuilder::<Postgres>::new(format!("INSERT INTO {} (id", schema.table));
            for column in schema.columns {
                insert.push(", ").push(column.name);
            }
            insert.push(", created_at, updated_at) VALUES (");
            push_key(&mut insert, &row.key);
            for value in &row.values {
                insert.push(", ");
                push_value(&mut insert, value);
            }
            insert.push(", NOW(), NOW())");
            insert.build().execute(&mut **tx).await?;

            Ok(UpsertOutcome::Inserted)
        }
    }

    async fn commit(&mut self) -> Result<()> {
        let tx = self.tx.take().ok_or_else(finished_transaction)?;
        tx.commit().await?;
        Ok(())
    }

    async fn rollback(&mut self) -> Result<()> {
        let tx = self.tx.take().ok_or_else(finished_transaction)?;
        tx.rollback().await?;
        Ok(())
    }
}
