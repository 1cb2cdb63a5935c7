use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions},
    SqlitePool,
};
use tracing::info;

use crate::{
    configuration::HandleStoreSettings,
    ports::handle_store::{FileHandlePayload, FileHandleRecord, HandleStore, HandleStoreError},
};

const CREATE_FILE_HANDLES_TABLE: &str = r#"
    CREATE TABLE IF NOT EXISTS file_handles (
        id TEXT PRIMARY KEY NOT NULL,
        handle TEXT,
        vector TEXT,
        position TEXT,
        updated_at INTEGER NOT NULL,
        CHECK (position IS NULL OR vector IS NOT NULL)
    )
"#;

/// Durable store of ingested file handles, persisted in a SQLite database file
///
/// Vectors and positions are stored as JSON arrays.
pub struct FileHandleSqliteRepository {
    pool: SqlitePool,
}

impl FileHandleSqliteRepository {
    /// Opens (or creates) the database file and its `file_handles` table
    ///
    /// Fails with `StoreUnavailable` if the database cannot be opened: there is no
    /// in-memory fallback.
    #[tracing::instrument(name = "Opening file handles SQLite store")]
    pub async fn try_new(settings: &HandleStoreSettings) -> Result<Self, HandleStoreError> {
        let options = SqliteConnectOptions::new()
            .filename(&settings.database_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(settings.max_connections)
            .connect_with(options)
            .await
            .map_err(|e| HandleStoreError::StoreUnavailable(e.to_string()))?;

        // Idempotent
        sqlx::query(CREATE_FILE_HANDLES_TABLE)
            .execute(&pool)
            .await
            .map_err(|e| HandleStoreError::StoreUnavailable(e.to_string()))?;

        info!("File handles store ready at {}", settings.database_path);

        Ok(Self { pool })
    }

    /// Closes every connection of the pool, ex: before re-opening the same file
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl HandleStore for FileHandleSqliteRepository {
    #[tracing::instrument(name = "Saving file handle", skip(self, payload))]
    async fn put(&self, id: &str, payload: &FileHandlePayload) -> Result<(), HandleStoreError> {
        let vector = payload
            .vector
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(|e| HandleStoreError::InvalidRecord(id.to_string(), e))?;
        let position = payload
            .position
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(|e| HandleStoreError::InvalidRecord(id.to_string(), e))?;

        // A single statement: the upsert is atomic for this record
        sqlx::query(
            r#"
    INSERT INTO file_handles (id, handle, vector, position, updated_at)
    VALUES (?, ?, ?, ?, ?)
    ON CONFLICT (id) DO UPDATE SET
        handle = COALESCE(excluded.handle, file_handles.handle),
        vector = COALESCE(excluded.vector, file_handles.vector),
        position = COALESCE(excluded.position, file_handles.position),
        updated_at = excluded.updated_at
            "#,
        )
        .bind(id)
        .bind(payload.handle.as_deref())
        .bind(vector)
        .bind(position)
        .bind(Utc::now().timestamp_millis())
        .execute(&self.pool)
        .await
        .map_err(backend_error)?;

        Ok(())
    }

    #[tracing::instrument(name = "Getting file handle", skip(self))]
    async fn get(&self, id: &str) -> Result<FileHandleRecord, HandleStoreError> {
        let row = sqlx::query_as::<_, FileHandleRow>(
            r#"
    SELECT id, handle, vector, position FROM file_handles
    WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend_error)?
        .ok_or_else(|| HandleStoreError::NotFound(id.to_string()))?;

        row.try_into()
    }

    #[tracing::instrument(name = "Getting all file handles", skip(self))]
    async fn get_all(&self) -> Result<Vec<FileHandleRecord>, HandleStoreError> {
        // rowid follows the first insert of each record, upserts keep it
        let rows = sqlx::query_as::<_, FileHandleRow>(
            r#"
    SELECT id, handle, vector, position FROM file_handles
    ORDER BY rowid
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(backend_error)?;

        rows.into_iter().map(FileHandleRecord::try_from).collect()
    }

    #[tracing::instrument(name = "Clearing file handles", skip(self))]
    async fn clear(&self) -> Result<(), HandleStoreError> {
        let result = sqlx::query("DELETE FROM file_handles")
            .execute(&self.pool)
            .await
            .map_err(backend_error)?;

        info!("Deleted {} file handles", result.rows_affected());
        Ok(())
    }
}

#[derive(sqlx::FromRow)]
struct FileHandleRow {
    id: String,
    handle: Option<String>,
    vector: Option<String>,
    position: Option<String>,
}

impl TryFrom<FileHandleRow> for FileHandleRecord {
    type Error = HandleStoreError;

    fn try_from(row: FileHandleRow) -> Result<Self, Self::Error> {
        let FileHandleRow {
            id,
            handle,
            vector,
            position,
        } = row;

        let vector = vector
            .as_deref()
            .map(serde_json::from_str)
            .transpose()
            .map_err(|e| HandleStoreError::InvalidRecord(id.clone(), e))?;
        let position = position
            .as_deref()
            .map(serde_json::from_str)
            .transpose()
            .map_err(|e| HandleStoreError::InvalidRecord(id.clone(), e))?;

        Ok(Self {
            id,
            handle,
            vector,
            position,
        })
    }
}

fn backend_error(error: sqlx::Error) -> HandleStoreError {
    HandleStoreError::Backend(error.to_string())
}
