// src/prefs.rs

use rusqlite::{params, OptionalExtension};
use serde::{de::DeserializeOwned, Serialize};
use std::path::Path;
use thiserror::Error;
use tokio_rusqlite::Connection;

/// Preference holding the user-chosen download folder.
pub const DOWNLOAD_FOLDER_KEY: &str = "downloadFolder";

#[derive(Debug, Error)]
pub enum PrefsError {
    #[error("database error: {0}")]
    Database(#[from] tokio_rusqlite::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Small key/value store for user preferences, kept in SQLite.
/// Values are stored as JSON text.
pub struct PreferenceStore {
    conn: Connection,
}

impl PreferenceStore {
    /// Opens (or creates) the preference database at `db_path`.
    pub async fn open(db_path: &Path) -> Result<Self, PrefsError> {
        if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            if let Err(e) = tokio::fs::create_dir_all(parent).await {
                tracing::warn!(dir = %parent.display(), error = %e, "could not create preference directory");
            }
        }
        let conn = Connection::open(db_path).await?;
        let store = Self { conn };
        store.setup_database().await?;
        Ok(store)
    }

    pub async fn open_in_memory() -> Result<Self, PrefsError> {
        let conn = Connection::open_in_memory().await?;
        let store = Self { conn };
        store.setup_database().await?;
        Ok(store)
    }

    async fn setup_database(&self) -> Result<(), PrefsError> {
        self.conn
            .call(|conn| {
                conn.execute(
                    "CREATE TABLE IF NOT EXISTS preferences (
                        key             TEXT PRIMARY KEY,
                        value           TEXT NOT NULL
                    )",
                    [],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, PrefsError> {
        let key = key.to_string();
        let raw: Option<String> = self
            .conn
            .call(move |conn| {
                let value = conn
                    .query_row(
                        "SELECT value FROM preferences WHERE key = ?1",
                        params![key],
                        |row| row.get(0),
                    )
                    .optional()?;
                Ok(value)
            })
            .await?;

        match raw {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    /// Inserts or replaces `key`.
    pub async fn set<T: Serialize>(&self, key: &str, value: &T) -> Result<(), PrefsError> {
        let key = key.to_string();
        let value = serde_json::to_string(value)?;
        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT OR REPLACE INTO preferences (key, value) VALUES (?1, ?2)",
                    params![key, value],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    /// Removes `key`. Returns whether it was present.
    pub async fn remove(&self, key: &str) -> Result<bool, PrefsError> {
        let key = key.to_string();
        let removed = self
            .conn
            .call(move |conn| {
                let n = conn.execute("DELETE FROM preferences WHERE key = ?1", params![key])?;
                Ok(n)
            })
            .await?;
        Ok(removed > 0)
    }
}
