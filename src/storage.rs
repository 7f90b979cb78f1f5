// src/storage.rs

use std::collections::HashMap;

use async_trait::async_trait;
use sqlx::{SqlitePool, sqlite::SqlitePoolOptions};
use tokio::sync::Mutex;

use crate::{error::AppError, models::log_event::LogEvent};

/// Durable key-value home of the audit journal.
///
/// Each key holds an append-only list of events. `clear` is only called
/// after a successful submission.
#[async_trait]
pub trait JournalStore: Send + Sync {
    async fn load(&self, key: &str) -> Result<Vec<LogEvent>, AppError>;

    async fn append(&self, key: &str, event: &LogEvent) -> Result<(), AppError>;

    async fn clear(&self, key: &str) -> Result<(), AppError>;
}

/// Journal kept in process memory. Lost on restart.
#[derive(Debug, Default)]
pub struct MemoryJournal {
    entries: Mutex<HashMap<String, Vec<LogEvent>>>,
}

impl MemoryJournal {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JournalStore for MemoryJournal {
    async fn load(&self, key: &str) -> Result<Vec<LogEvent>, AppError> {
        Ok(self
            .entries
            .lock()
            .await
            .get(key)
            .cloned()
            .unwrap_or_default())
    }

    async fn append(&self, key: &str, event: &LogEvent) -> Result<(), AppError> {
        self.entries
            .lock()
            .await
            .entry(key.to_string())
            .or_default()
            .push(event.clone());
        Ok(())
    }

    async fn clear(&self, key: &str) -> Result<(), AppError> {
        self.entries.lock().await.remove(key);
        Ok(())
    }
}

/// Journal persisted in SQLite through `sqlx`.
#[derive(Debug, Clone)]
pub struct SqliteJournal {
    pool: SqlitePool,
}

impl SqliteJournal {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Opens the pool and applies the embedded migrations.
    pub async fn connect(database_url: &str) -> Result<Self, AppError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;

        sqlx::migrate!("./migrations").run(&pool).await?;

        Ok(Self::new(pool))
    }
}

#[async_trait]
impl JournalStore for SqliteJournal {
    async fn load(&self, key: &str) -> Result<Vec<LogEvent>, AppError> {
        let rows: Vec<(String,)> =
            sqlx::query_as("SELECT event FROM audit_journal WHERE journal_key = ? ORDER BY seq")
                .bind(key)
                .fetch_all(&self.pool)
                .await?;

        rows.into_iter()
            .map(|(raw,)| {
                serde_json::from_str(&raw).map_err(|e| {
                    AppError::InternalServerError(format!("Corrupt journal entry: {}", e))
                })
            })
            .collect()
    }

    async fn append(&self, key: &str, event: &LogEvent) -> Result<(), AppError> {
        let raw = serde_json::to_string(event)
            .map_err(|e| AppError::InternalServerError(e.to_string()))?;

        sqlx::query(
            r#"
            INSERT INTO audit_journal (journal_key, seq, event)
            VALUES (
                ?1,
                (SELECT COALESCE(MAX(seq), 0) + 1 FROM audit_journal WHERE journal_key = ?1),
                ?2
            )
            "#,
        )
        .bind(key)
        .bind(raw)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn clear(&self, key: &str) -> Result<(), AppError> {
        sqlx::query("DELETE FROM audit_journal WHERE journal_key = ?")
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
