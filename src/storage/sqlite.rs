use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::migrate::Migrator;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{ResultStore, SessionRecord, StoredResult};
use crate::agents::ResearchResult;
use crate::config::DatabaseConfig;
use crate::error::{StorageError, StorageResult};
use crate::orchestrator::SessionStatus;

/// Static migrator that embeds migrations at compile time
static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

fn timestamp(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(raw: &str) -> StorageResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StorageError::Query {
            message: format!("Invalid stored timestamp '{}': {}", raw, e),
        })
}

/// SQLite-backed result store
#[derive(Clone)]
pub struct SqliteResultStore {
    pool: SqlitePool,
}

impl SqliteResultStore {
    /// Open (creating if needed) the database at the configured path
    pub async fn new(config: &DatabaseConfig) -> StorageResult<Self> {
        if let Some(parent) = config.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| StorageError::Connection {
                message: format!("Failed to create database directory: {}", e),
            })?;
        }

        let database_url = format!("sqlite://{}?mode=rwc", config.path.display());

        let options = SqliteConnectOptions::from_str(&database_url)
            .map_err(|e| StorageError::Connection {
                message: format!("Invalid database URL: {}", e),
            })?
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .connect_with(options)
            .await
            .map_err(|e| StorageError::Connection {
                message: format!("Failed to connect to database: {}", e),
            })?;

        let store = Self { pool };
        store.run_migrations().await?;

        Ok(store)
    }

    /// In-memory database; a single connection so every query sees the same data
    pub async fn new_in_memory() -> StorageResult<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:").map_err(|e| {
            StorageError::Connection {
                message: format!("Invalid database URL: {}", e),
            }
        })?;

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(|e| StorageError::Connection {
                message: format!("Failed to open in-memory database: {}", e),
            })?;

        let store = Self { pool };
        store.run_migrations().await?;

        Ok(store)
    }

    async fn run_migrations(&self) -> StorageResult<()> {
        info!("Running database migrations...");

        MIGRATOR.run(&self.pool).await.map_err(|e| StorageError::Migration {
            message: format!("Failed to run migrations: {}", e),
        })?;

        info!("Database migrations completed successfully");
        Ok(())
    }

    /// Get the underlying pool for advanced queries
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl ResultStore for SqliteResultStore {
    async fn create_session(&self, record: &SessionRecord) -> StorageResult<()> {
        sqlx::query(
            r#"
            INSERT INTO research_sessions
                (id, topic, status, created_at, updated_at, completed_at, result_count, errors, metadata)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&record.id)
        .bind(&record.topic)
        .bind(record.status.as_str())
        .bind(timestamp(&record.created_at))
        .bind(timestamp(&record.updated_at))
        .bind(record.completed_at.as_ref().map(timestamp))
        .bind(record.result_count as i64)
        .bind(serde_json::to_string(&record.errors)?)
        .bind(record.metadata.as_ref().map(|m| m.to_string()))
        .execute(&self.pool)
        .await?;

        debug!(session_id = %record.id, "Session record created");
        Ok(())
    }

    async fn get_session(&self, id: &str) -> StorageResult<Option<SessionRecord>> {
        let row: Option<SessionRow> = sqlx::query_as(
            r#"
            SELECT id, topic, status, created_at, updated_at, completed_at, result_count, errors, metadata
            FROM research_sessions
            WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(SessionRecord::try_from).transpose()
    }

    async fn update_session(&self, record: &SessionRecord) -> StorageResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE research_sessions
            SET status = ?, updated_at = ?, completed_at = ?, result_count = ?, errors = ?, metadata = ?
            WHERE id = ?
            "#,
        )
        .bind(record.status.as_str())
        .bind(timestamp(&record.updated_at))
        .bind(record.completed_at.as_ref().map(timestamp))
        .bind(record.result_count as i64)
        .bind(serde_json::to_string(&record.errors)?)
        .bind(record.metadata.as_ref().map(|m| m.to_string()))
        .bind(&record.id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StorageError::SessionNotFound {
                session_id: record.id.clone(),
            });
        }

        Ok(())
    }

    async fn save_result(&self, session_id: &str, result: &ResearchResult) -> StorageResult<()> {
        sqlx::query(
            r#"
            INSERT INTO research_results (id, session_id, agent, topic, status, payload, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(session_id)
        .bind(&result.agent)
        .bind(&result.topic)
        .bind(result.status.as_str())
        .bind(serde_json::to_string(result)?)
        .bind(timestamp(&Utc::now()))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn recent_results(&self, agent: &str, limit: usize) -> StorageResult<Vec<StoredResult>> {
        let rows: Vec<ResultRow> = sqlx::query_as(
            r#"
            SELECT id, session_id, payload, created_at
            FROM research_results
            WHERE agent = ?
            ORDER BY created_at DESC, rowid DESC
            LIMIT ?
            "#,
        )
        .bind(agent)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        // Unreadable rows are skipped so one corrupt entry cannot pose as a fresh result.
        Ok(rows
            .into_iter()
            .filter_map(|row| {
                let id = row.id.clone();
                StoredResult::try_from(row)
                    .map_err(|e| warn!(result_id = %id, error = %e, "Skipping unreadable stored result"))
                    .ok()
            })
            .collect())
    }
}

#[derive(sqlx::FromRow)]
struct SessionRow {
    id: String,
    topic: String,
    status: String,
    created_at: String,
    updated_at: String,
    completed_at: Option<String>,
    result_count: i64,
    errors: String,
    metadata: Option<String>,
}

impl TryFrom<SessionRow> for SessionRecord {
    type Error = StorageError;

    fn try_from(row: SessionRow) -> Result<Self, Self::Error> {
        let status = SessionStatus::from_str(&row.status)
            .map_err(|message| StorageError::Query { message })?;

        Ok(Self {
            id: row.id,
            topic: row.topic,
            status,
            created_at: parse_timestamp(&row.created_at)?,
            updated_at: parse_timestamp(&row.updated_at)?,
            completed_at: row.completed_at.as_deref().map(parse_timestamp).transpose()?,
            result_count: row.result_count.max(0) as usize,
            errors: serde_json::from_str(&row.errors)?,
            metadata: row.metadata.and_then(|s| serde_json::from_str(&s).ok()),
        })
    }
}

#[derive(sqlx::FromRow)]
struct ResultRow {
    id: String,
    session_id: String,
    payload: String,
    created_at: String,
}

impl TryFrom<ResultRow> for StoredResult {
    type Error = StorageError;

    fn try_from(row: ResultRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            session_id: row.session_id,
            result: serde_json::from_str(&row.payload)?,
            created_at: parse_timestamp(&row.created_at)?,
        })
    }
}
