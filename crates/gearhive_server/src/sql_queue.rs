//! SQL-backed job queue.

use crate::job::{Job, Priority};
use crate::queue::{Queue, QueueError};
use async_trait::async_trait;
use chrono::Utc;
use gearhive_protocol::Id;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::str::FromStr;
use tracing::debug;

/// Durable queue on SQLite via sqlx.
///
/// Dequeue is select-then-delete inside one transaction, serialized
/// broker-side so two workers never race on the same row.
pub struct SqlQueue {
    pool: SqlitePool,
    table: String,
    dequeue_lock: tokio::sync::Mutex<()>,
}

impl SqlQueue {
    /// Open `datasource`, creating the database file and queue table when
    /// missing. `datasource` is a path or a full `sqlite:` URL.
    pub async fn connect(datasource: &str, table: &str) -> Result<Self, QueueError> {
        let url = if datasource.starts_with("sqlite:") {
            datasource.to_string()
        } else {
            format!("sqlite://{datasource}")
        };
        let options = SqliteConnectOptions::from_str(&url)?.create_if_missing(true);
        // SQLite allows one writer; a single pooled connection keeps
        // in-memory databases coherent as well.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        let queue = Self {
            pool,
            table: table.to_string(),
            dequeue_lock: tokio::sync::Mutex::new(()),
        };
        queue.create_table().await?;
        Ok(queue)
    }

    async fn create_table(&self) -> Result<(), QueueError> {
        let create = format!(
            r#"
            CREATE TABLE IF NOT EXISTS {table} (
                function TEXT NOT NULL,
                handle TEXT PRIMARY KEY,
                unique_id TEXT NOT NULL,
                priority INTEGER NOT NULL,
                data TEXT NOT NULL,
                reducer TEXT NOT NULL,
                created_at TEXT NOT NULL
            )
            "#,
            table = self.table,
        );
        sqlx::query(&create).execute(&self.pool).await?;

        for column in ["priority", "function", "unique_id"] {
            let index = format!(
                "CREATE INDEX IF NOT EXISTS idx_{table}_{column} ON {table} ({column})",
                table = self.table,
            );
            sqlx::query(&index).execute(&self.pool).await?;
        }
        Ok(())
    }

    fn job_from_row(&self, row: &sqlx::sqlite::SqliteRow) -> Result<Job, QueueError> {
        let handle_str: String = row.try_get("handle")?;
        let handle = Id::parse(&handle_str)
            .map_err(|err| QueueError::Corrupt(format!("handle: {err}")))?;
        let priority_raw: i64 = row.try_get("priority")?;
        let priority = Priority::from_i64(priority_raw)
            .ok_or_else(|| QueueError::Corrupt(format!("priority: {priority_raw}")))?;
        Ok(Job {
            function: row.try_get("function")?,
            data: row.try_get("data")?,
            handle,
            unique_id: row.try_get("unique_id")?,
            priority,
            reducer: row.try_get("reducer")?,
        })
    }
}

#[async_trait]
impl Queue for SqlQueue {
    async fn enqueue(&self, job: &Job) -> Result<(), QueueError> {
        let insert = format!(
            r#"
            INSERT INTO {table}
            (function, handle, unique_id, priority, data, reducer, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
            table = self.table,
        );
        let mut tx = self.pool.begin().await?;
        sqlx::query(&insert)
            .bind(&job.function)
            .bind(job.handle.to_string())
            .bind(&job.unique_id)
            .bind(job.priority.as_i64())
            .bind(&job.data)
            .bind(&job.reducer)
            .bind(Utc::now().to_rfc3339())
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        debug!(handle = %job.handle, function = %job.function, "job enqueued");
        Ok(())
    }

    async fn dequeue(&self, functions: &[String]) -> Result<Option<Job>, QueueError> {
        if functions.is_empty() {
            return Ok(None);
        }
        let _guard = self.dequeue_lock.lock().await;

        let placeholders = vec!["?"; functions.len()].join(", ");
        let select = format!(
            r#"
            SELECT function, handle, unique_id, priority, data, reducer
            FROM {table}
            WHERE function IN ({placeholders})
            ORDER BY priority, created_at, rowid
            LIMIT 1
            "#,
            table = self.table,
        );

        let mut tx = self.pool.begin().await?;
        let mut query = sqlx::query(&select);
        for function in functions {
            query = query.bind(function);
        }
        let Some(row) = query.fetch_optional(&mut *tx).await? else {
            tx.commit().await?;
            return Ok(None);
        };
        let job = self.job_from_row(&row)?;

        let delete = format!("DELETE FROM {table} WHERE handle = ?", table = self.table);
        sqlx::query(&delete)
            .bind(job.handle.to_string())
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(Some(job))
    }

    async fn size(&self) -> Result<u64, QueueError> {
        let count = format!("SELECT COUNT(1) FROM {table}", table = self.table);
        let size: i64 = sqlx::query_scalar(&count).fetch_one(&self.pool).await?;
        Ok(size as u64)
    }

    async fn dispose(&self) -> Result<(), QueueError> {
        self.pool.close().await;
        Ok(())
    }
}
