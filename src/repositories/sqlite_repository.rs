use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use sqlx::Row;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use tracing::info;

use super::error::{RepositoryError, RepositoryResult};
use super::failure_repository::{BoxFuture, FailureRecord, FailureRepository};
use crate::models::message::Message;

/// Migrations applied in order. Each entry is (version, sql).
/// To add a new migration: append a tuple with the next version number and its SQL.
/// Never edit or remove existing entries — existing databases depend on them.
const MIGRATIONS: &[(i64, &str)] = &[(
    1,
    "CREATE TABLE IF NOT EXISTS failed_messages (
        message_id      TEXT PRIMARY KEY,
        conversation_id TEXT NOT NULL,
        payload         TEXT NOT NULL,
        inserted_at     TEXT NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_failed_messages_conversation
        ON failed_messages (conversation_id, inserted_at);",
)];

/// SQLite-backed failure store.
///
/// Uses WAL journal mode for concurrent reads during background saves.
/// `SqlitePool` is internally reference-counted and cheap to clone.
pub struct SqliteFailureRepository {
    pool: SqlitePool,
}

impl SqliteFailureRepository {
    /// Open (or create) the SQLite database at the platform-specific config path.
    pub async fn new() -> RepositoryResult<Self> {
        Self::with_path(&Self::db_path()?).await
    }

    /// Open (or create) the database at an explicit path. Tests point this at
    /// a temp directory.
    pub async fn with_path(db_path: &Path) -> RepositoryResult<Self> {
        if let Some(parent) = db_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        Self::run_migrations(&pool).await?;

        info!(path = %db_path.display(), "Opened SQLite failure database");

        Ok(Self { pool })
    }

    /// Create the schema_version table if absent, then apply any pending migrations.
    async fn run_migrations(pool: &SqlitePool) -> RepositoryResult<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS schema_version (
                version INTEGER NOT NULL
            )",
        )
        .execute(pool)
        .await?;

        // Seed version 0 if the table is empty (fresh database).
        sqlx::query("INSERT INTO schema_version (version) SELECT 0 WHERE NOT EXISTS (SELECT 1 FROM schema_version)")
            .execute(pool)
            .await?;

        let current: i64 = sqlx::query_scalar("SELECT version FROM schema_version")
            .fetch_one(pool)
            .await?;

        for (version, sql) in MIGRATIONS {
            if *version > current {
                info!(version, "Applying schema migration");
                // sqlx doesn't support multiple statements in a single query call,
                // so split on ';' and execute each statement individually.
                for statement in sql.split(';') {
                    let trimmed = statement.trim();
                    if !trimmed.is_empty() {
                        sqlx::query(trimmed).execute(pool).await?;
                    }
                }
                sqlx::query("UPDATE schema_version SET version = ?")
                    .bind(version)
                    .execute(pool)
                    .await?;
            }
        }

        Ok(())
    }

    fn db_path() -> RepositoryResult<PathBuf> {
        dirs::config_dir()
            .ok_or_else(|| RepositoryError::InitializationError {
                message: "Cannot find config directory".into(),
            })
            .map(|p| p.join("threadline").join("failures.db"))
    }
}

impl Clone for SqliteFailureRepository {
    fn clone(&self) -> Self {
        Self {
            pool: self.pool.clone(),
        }
    }
}

fn record_from_row(row: &sqlx::sqlite::SqliteRow) -> RepositoryResult<FailureRecord> {
    let payload: String = row.get("payload");
    let inserted_at: String = row.get("inserted_at");
    let message: Message = serde_json::from_str(&payload)?;
    let inserted_at = DateTime::parse_from_rfc3339(&inserted_at)
        .map_err(|e| RepositoryError::InvalidData {
            message: format!("Bad inserted_at timestamp: {e}"),
        })?
        .with_timezone(&Utc);
    Ok(FailureRecord {
        message,
        inserted_at,
    })
}

impl FailureRepository for SqliteFailureRepository {
    fn add(&self, record: FailureRecord) -> BoxFuture<'static, RepositoryResult<()>> {
        let pool = self.pool.clone();
        Box::pin(async move {
            let payload = serde_json::to_string(&record.message)?;
            sqlx::query(
                "INSERT INTO failed_messages (message_id, conversation_id, payload, inserted_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(message_id) DO UPDATE SET
                    payload     = excluded.payload,
                    inserted_at = excluded.inserted_at",
            )
            .bind(&record.message.id)
            .bind(&record.message.conversation_id)
            .bind(&payload)
            .bind(record.inserted_at.to_rfc3339())
            .execute(&pool)
            .await?;
            Ok(())
        })
    }

    fn remove(&self, message_id: &str) -> BoxFuture<'static, RepositoryResult<()>> {
        let pool = self.pool.clone();
        let message_id = message_id.to_string();
        Box::pin(async move {
            sqlx::query("DELETE FROM failed_messages WHERE message_id = ?")
                .bind(&message_id)
                .execute(&pool)
                .await?;
            Ok(())
        })
    }

    fn list_for(
        &self,
        conversation_id: &str,
    ) -> BoxFuture<'static, RepositoryResult<Vec<FailureRecord>>> {
        let pool = self.pool.clone();
        let conversation_id = conversation_id.to_string();
        Box::pin(async move {
            let rows = sqlx::query(
                "SELECT payload, inserted_at
                 FROM failed_messages
                 WHERE conversation_id = ?
                 ORDER BY inserted_at ASC",
            )
            .bind(&conversation_id)
            .fetch_all(&pool)
            .await?;

            rows.iter().map(record_from_row).collect()
        })
    }

    fn list_all(&self) -> BoxFuture<'static, RepositoryResult<Vec<FailureRecord>>> {
        let pool = self.pool.clone();
        Box::pin(async move {
            let rows = sqlx::query(
                "SELECT payload, inserted_at
                 FROM failed_messages
                 ORDER BY inserted_at ASC",
            )
            .fetch_all(&pool)
            .await?;

            rows.iter().map(record_from_row).collect()
        })
    }

    fn clear_for(&self, conversation_id: &str) -> BoxFuture<'static, RepositoryResult<()>> {
        let pool = self.pool.clone();
        let conversation_id = conversation_id.to_string();
        Box::pin(async move {
            sqlx::query("DELETE FROM failed_messages WHERE conversation_id = ?")
                .bind(&conversation_id)
                .execute(&pool)
                .await?;
            Ok(())
        })
    }

    fn clear_all(&self) -> BoxFuture<'static, RepositoryResult<()>> {
        let pool = self.pool.clone();
        Box::pin(async move {
            sqlx::query("DELETE FROM failed_messages").execute(&pool).await?;
            Ok(())
        })
    }
}
