//! Relational sink
//!
//! Loads normalized records into one destination table keyed by `video_id`.
//! Every batch is staged in a temporary table and merged in a single
//! transaction through the [`LoadStrategy`] chosen at connect time.
//!
//! Any sqlx `Any` URL is accepted (`postgres://…`, `sqlite://…`). SQL is
//! written with `$N` placeholders, which both built-in backends bind by
//! position.

pub mod strategy;

pub use strategy::{select_strategy, AppendOnly, LoadMode, LoadStrategy, NativeUpsert};

use std::fmt;
use std::path::Path;

use chrono::Utc;
use sqlx::any::{AnyPoolOptions, AnyQueryResult};
use sqlx::{Any, AnyPool, Transaction};
use thiserror::Error;
use tracing::{debug, info, instrument};
use ytetl_common::types::{format_timestamp, RECORD_COLUMNS};
use ytetl_common::Record;

use crate::artifacts::{ArtifactError, ArtifactStore};
use crate::config::LoadModePreference;

/// Rows per staging INSERT. 100 × 7 parameters stays under SQLite's limit.
const STAGE_CHUNK_SIZE: usize = 100;

const STAGE_COLUMNS: usize = RECORD_COLUMNS.len() + 1;

const MAX_CONNECTIONS: u32 = 5;

/// Error types for the sink
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("Failed to connect to database '{url}': {source}")]
    Connect {
        url: String,
        #[source]
        source: sqlx::Error,
    },

    #[error("Failed to create table '{table}': {source}")]
    Schema {
        table: String,
        #[source]
        source: sqlx::Error,
    },

    #[error("Failed to merge batch into '{table}' (rolled back): {source}")]
    Merge {
        table: String,
        #[source]
        source: sqlx::Error,
    },

    #[error(
        "{dialect} has no native upsert; --load-mode {mode} (YTETL_LOAD_MODE) is not supported, use auto or append"
    )]
    UnsupportedMode { dialect: String, mode: LoadMode },

    #[error(transparent)]
    Artifact(#[from] ArtifactError),
}

/// SQL dialect, taken from the connection's backend name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dialect {
    Postgres,
    Sqlite,
    Other(String),
}

impl Dialect {
    pub fn from_backend_name(name: &str) -> Self {
        match name.to_ascii_lowercase().as_str() {
            "postgresql" | "postgres" => Dialect::Postgres,
            "sqlite" => Dialect::Sqlite,
            _ => Dialect::Other(name.to_string()),
        }
    }

    pub fn supports_native_upsert(&self) -> bool {
        matches!(self, Dialect::Postgres | Dialect::Sqlite)
    }

    /// Column type for timestamps. SQLite keeps RFC 3339 text.
    fn timestamp_type(&self) -> &'static str {
        match self {
            Dialect::Postgres => "TIMESTAMPTZ",
            Dialect::Sqlite => "TEXT",
            Dialect::Other(_) => "TIMESTAMP",
        }
    }

    /// Convert a text expression into the timestamp column type.
    fn timestamp_expr(&self, expr: &str) -> String {
        match self {
            Dialect::Sqlite => expr.to_string(),
            _ => format!("CAST({} AS {})", expr, self.timestamp_type()),
        }
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dialect::Postgres => f.write_str("PostgreSQL"),
            Dialect::Sqlite => f.write_str("SQLite"),
            Dialect::Other(name) => f.write_str(name),
        }
    }
}

/// Mask the password of a connection URL for logs and errors.
pub fn redact_url(raw: &str) -> String {
    match url::Url::parse(raw) {
        Ok(mut parsed) if parsed.password().is_some() => {
            // Only fails for cannot-be-a-base URLs, which carry no password.
            let _ = parsed.set_password(Some("***"));
            parsed.to_string()
        },
        _ => raw.to_string(),
    }
}

/// Connection to the destination plus its load strategy
pub struct SinkWriter {
    pool: AnyPool,
    dialect: Dialect,
    strategy: Box<dyn LoadStrategy>,
    table: String,
}

impl SinkWriter {
    /// Open a pool, ping it, and pick the load strategy for its dialect.
    pub async fn connect(
        url: &str,
        preference: LoadModePreference,
        table: impl Into<String>,
    ) -> Result<Self, SinkError> {
        sqlx::any::install_default_drivers();

        let connect_err = |source| SinkError::Connect {
            url: redact_url(url),
            source,
        };

        let pool = AnyPoolOptions::new()
            .max_connections(MAX_CONNECTIONS)
            .connect(url)
            .await
            .map_err(connect_err)?;

        let dialect = {
            let mut conn = pool.acquire().await.map_err(connect_err)?;
            sqlx::query("SELECT 1")
                .execute(&mut *conn)
                .await
                .map_err(connect_err)?;
            Dialect::from_backend_name(conn.backend_name())
        };

        let strategy = select_strategy(&dialect, preference)?;
        let table = table.into();

        info!(
            url = %redact_url(url),
            dialect = %dialect,
            mode = %strategy.mode(),
            table = %table,
            "Connected to destination"
        );

        Ok(Self {
            pool,
            dialect,
            strategy,
            table,
        })
    }

    pub fn mode(&self) -> LoadMode {
        self.strategy.mode()
    }

    pub fn dialect(&self) -> &Dialect {
        &self.dialect
    }

    pub fn pool(&self) -> &AnyPool {
        &self.pool
    }

    fn stage_name(&self) -> String {
        format!("_ytetl_stage_{}", self.table)
    }

    /// Create the destination table if it does not exist. Never drops it.
    pub async fn ensure_schema(&self) -> Result<(), SinkError> {
        sqlx::query(&self.strategy.create_table_sql(&self.table))
            .execute(&self.pool)
            .await
            .map_err(|source| SinkError::Schema {
                table: self.table.clone(),
                source,
            })?;

        debug!(table = %self.table, "Ensured destination table exists");
        Ok(())
    }

    /// Merge one batch atomically. Returns the input row count, duplicates
    /// included.
    #[instrument(skip(self, records), fields(rows = records.len(), table = %self.table))]
    pub async fn ingest(&self, records: &[Record]) -> Result<u64, SinkError> {
        if records.is_empty() {
            return Ok(0);
        }

        let merge_err = |source| SinkError::Merge {
            table: self.table.clone(),
            source,
        };

        let loaded_at = format_timestamp(&Utc::now());
        let stage = self.stage_name();

        // Dropping the transaction without commit rolls it back.
        let mut tx = self.pool.begin().await.map_err(merge_err)?;

        sqlx::query(&format!("DROP TABLE IF EXISTS {}", stage))
            .execute(&mut *tx)
            .await
            .map_err(merge_err)?;
        sqlx::query(&format!(
            "CREATE TEMPORARY TABLE {} (seq BIGINT NOT NULL, video_id TEXT NOT NULL, title TEXT, \
             channel_title TEXT, published_at TEXT, description TEXT, query_tag TEXT)",
            stage
        ))
        .execute(&mut *tx)
        .await
        .map_err(merge_err)?;

        for (chunk_idx, chunk) in records.chunks(STAGE_CHUNK_SIZE).enumerate() {
            let offset = chunk_idx * STAGE_CHUNK_SIZE;
            stage_chunk(&mut tx, &stage, offset, chunk)
                .await
                .map_err(merge_err)?;
        }

        let merged: AnyQueryResult = sqlx::query(&self.strategy.merge_sql(&self.table, &stage))
            .bind(loaded_at)
            .execute(&mut *tx)
            .await
            .map_err(merge_err)?;

        sqlx::query(&format!("DROP TABLE {}", stage))
            .execute(&mut *tx)
            .await
            .map_err(merge_err)?;

        tx.commit().await.map_err(merge_err)?;

        info!(
            rows = records.len(),
            affected = merged.rows_affected(),
            mode = %self.strategy.mode(),
            "Loaded {} rows into {}",
            records.len(),
            self.table
        );

        Ok(records.len() as u64)
    }

    /// Read a tabular artifact and ingest it as one batch.
    pub async fn load_table(&self, store: &ArtifactStore, path: &Path) -> Result<u64, SinkError> {
        let records = store.read_table(path)?;
        debug!(path = %path.display(), rows = records.len(), "Read tabular artifact");
        self.ingest(&records).await
    }

    pub async fn close(self) {
        self.pool.close().await;
    }
}

impl fmt::Debug for SinkWriter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SinkWriter")
            .field("dialect", &self.dialect)
            .field("strategy", &self.strategy)
            .field("table", &self.table)
            .finish()
    }
}

/// One multi-row INSERT into the staging table. `seq` continues from `offset`.
async fn stage_chunk(
    tx: &mut Transaction<'_, Any>,
    stage: &str,
    offset: usize,
    chunk: &[Record],
) -> Result<(), sqlx::Error> {
    let sql = stage_insert_sql(stage, chunk.len());

    let mut query = sqlx::query(&sql);
    for (i, record) in chunk.iter().enumerate() {
        query = query
            .bind((offset + i) as i64)
            .bind(record.video_id.clone())
            .bind(record.title.clone())
            .bind(record.channel_title.clone())
            .bind(record.published_at.as_ref().map(format_timestamp))
            .bind(record.description.clone())
            .bind(record.query_tag.clone());
    }

    query.execute(&mut **tx).await?;
    Ok(())
}

fn stage_insert_sql(stage: &str, rows: usize) -> String {
    let values: Vec<String> = (0..rows)
        .map(|row| {
            let params: Vec<String> = (1..=STAGE_COLUMNS)
                .map(|col| format!("${}", row * STAGE_COLUMNS + col))
                .collect();
            format!("({})", params.join(", "))
        })
        .collect();

    format!(
        "INSERT INTO {} (seq, {}) VALUES {}",
        stage,
        RECORD_COLUMNS.join(", "),
        values.join(", ")
    )
}
