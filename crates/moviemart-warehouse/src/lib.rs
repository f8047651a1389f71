//! Postgres warehouse writer: replace and incremental table loads, bulk
//! parameterized inserts, and per-table constraint application.

pub mod sql;

use std::collections::HashSet;

use polars::prelude::{DataFrame, PolarsError};
use sqlx::postgres::{PgArguments, PgPoolOptions};
use sqlx::query::Query;
use sqlx::{PgPool, Postgres, Row};
use thiserror::Error;

use sql::SqlValue;

const INSERT_CHUNK_ROWS: usize = 500;

#[derive(Debug, Error)]
pub enum WarehouseError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("polars error: {0}")]
    Polars(#[from] PolarsError),

    #[error("table {table}: column {column} has unsupported type {dtype}")]
    UnsupportedType {
        table: String,
        column: String,
        dtype: String,
    },

    #[error("table {table}: key column {key} not present in batch")]
    MissingKey { table: String, key: String },
}

pub async fn connect(database_url: &str) -> Result<PgPool, WarehouseError> {
    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(database_url)
        .await?;
    Ok(pool)
}

#[derive(Clone)]
pub struct WarehouseWriter {
    pool: PgPool,
}

impl WarehouseWriter {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Drops and recreates `table` from the frame's schema, bulk-inserts the
    /// rows, then applies the key statements (retype + NOT NULL + primary
    /// key) in their own all-or-nothing transaction.
    pub async fn replace_table(
        &self,
        table: &str,
        frame: &DataFrame,
        keys: &[String],
    ) -> Result<(), WarehouseError> {
        let rows = sql::frame_rows(table, frame)?;
        let columns: Vec<String> = frame
            .get_column_names()
            .iter()
            .map(|name| name.to_string())
            .collect();

        let mut tx = self.pool.begin().await?;
        sqlx::query(&sql::drop_table_sql(table))
            .execute(&mut *tx)
            .await?;
        sqlx::query(&sql::create_table_sql(table, frame)?)
            .execute(&mut *tx)
            .await?;

        for chunk in rows.chunks(INSERT_CHUNK_ROWS) {
            let statement = sql::insert_sql(table, &columns, chunk.len());
            let mut query = sqlx::query(&statement);
            for row in chunk {
                for value in row {
                    query = bind_value(query, value.clone());
                }
            }
            query.execute(&mut *tx).await?;
        }
        tx.commit().await?;

        let statements = sql::primary_key_statements(table, frame, keys)?;
        self.apply_constraints(table, &statements).await?;

        tracing::info!(table, rows = rows.len(), "replaced warehouse table");
        Ok(())
    }

    /// Inserts only the rows whose key is not already present, comparing keys
    /// case-normalized. Returns the number of rows inserted.
    pub async fn insert_missing(
        &self,
        table: &str,
        frame: &DataFrame,
        key: &str,
    ) -> Result<usize, WarehouseError> {
        let rows = sql::frame_rows(table, frame)?;
        let columns: Vec<String> = frame
            .get_column_names()
            .iter()
            .map(|name| name.to_string())
            .collect();
        let key_idx =
            columns
                .iter()
                .position(|c| c == key)
                .ok_or_else(|| WarehouseError::MissingKey {
                    table: table.to_string(),
                    key: key.to_string(),
                })?;

        let existing = self.existing_keys(table, key).await?;
        let fresh = sql::filter_new_rows(&rows, key_idx, &existing);
        if fresh.is_empty() {
            tracing::info!(table, "no new rows to insert");
            return Ok(0);
        }

        let mut tx = self.pool.begin().await?;
        for chunk in fresh.chunks(INSERT_CHUNK_ROWS) {
            let statement = sql::insert_sql(table, &columns, chunk.len());
            let mut query = sqlx::query(&statement);
            for row in chunk {
                for value in row {
                    query = bind_value(query, value.clone());
                }
            }
            query.execute(&mut *tx).await?;
        }
        tx.commit().await?;

        tracing::info!(
            table,
            inserted = fresh.len(),
            skipped = rows.len() - fresh.len(),
            "incremental load complete"
        );
        Ok(fresh.len())
    }

    /// Appends every row of the batch to an existing table, no key filtering.
    /// Used for fact-table batches whose dedup happened upstream.
    pub async fn append_rows(
        &self,
        table: &str,
        frame: &DataFrame,
    ) -> Result<usize, WarehouseError> {
        let rows = sql::frame_rows(table, frame)?;
        let columns: Vec<String> = frame
            .get_column_names()
            .iter()
            .map(|name| name.to_string())
            .collect();

        let mut tx = self.pool.begin().await?;
        for chunk in rows.chunks(INSERT_CHUNK_ROWS) {
            let statement = sql::insert_sql(table, &columns, chunk.len());
            let mut query = sqlx::query(&statement);
            for row in chunk {
                for value in row {
                    query = bind_value(query, value.clone());
                }
            }
            query.execute(&mut *tx).await?;
        }
        tx.commit().await?;

        tracing::info!(table, appended = rows.len(), "append complete");
        Ok(rows.len())
    }

    /// Runs every statement inside one transaction: either all constraints
    /// for the table stick or none do.
    pub async fn apply_constraints(
        &self,
        table: &str,
        statements: &[String],
    ) -> Result<(), WarehouseError> {
        let mut tx = self.pool.begin().await?;
        for statement in statements {
            sqlx::query(statement).execute(&mut *tx).await?;
        }
        tx.commit().await?;
        tracing::info!(table, count = statements.len(), "applied constraints");
        Ok(())
    }

    async fn existing_keys(&self, table: &str, key: &str) -> Result<HashSet<String>, WarehouseError> {
        let statement = format!(
            "SELECT {} FROM {}",
            sql::quote_ident(key),
            sql::quote_ident(table)
        );
        let rows = sqlx::query(&statement).fetch_all(&self.pool).await?;

        let mut keys = HashSet::with_capacity(rows.len());
        for row in rows {
            if let Ok(value) = row.try_get::<Option<String>, _>(0) {
                if let Some(value) = value {
                    keys.insert(value.to_lowercase());
                }
            } else if let Ok(Some(value)) = row.try_get::<Option<i64>, _>(0) {
                keys.insert(value.to_string());
            }
        }
        Ok(keys)
    }
}

fn bind_value<'q>(
    query: Query<'q, Postgres, PgArguments>,
    value: SqlValue,
) -> Query<'q, Postgres, PgArguments> {
    match value {
        SqlValue::Int(v) => query.bind(v),
        SqlValue::Float(v) => query.bind(v),
        SqlValue::Text(v) => query.bind(v),
        SqlValue::Bool(v) => query.bind(v),
    }
}
