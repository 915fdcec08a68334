//! `SQLite`-backed [`StoreClient`].
//!
//! One table keyed by object id, with the whole object kept as a JSON
//! content blob and the service key broken out for lookup. A single
//! `Mutex<Connection>` serializes access, and every statement issued
//! through [`StoreClient`] runs on the blocking thread pool.

use super::{StoreClient, StoreReceipt, StoredObject};
use crate::errors::StoreError;
use async_trait::async_trait;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

const CREATE_TABLES: &str = r"
CREATE TABLE IF NOT EXISTS store (
    id TEXT PRIMARY KEY,
    app_service_key TEXT NOT NULL,
    created INTEGER NOT NULL,
    content TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_store_app_service_key ON store (app_service_key);
";

type SharedConnection = Arc<Mutex<Option<Connection>>>;

/// Durable store backed by a local `SQLite` database.
///
/// Create with [`SqliteStoreClient::open`] for file-backed persistence or
/// [`SqliteStoreClient::in_memory`] for tests.
pub struct SqliteStoreClient {
    conn: SharedConnection,
}

impl SqliteStoreClient {
    /// Opens or creates the database at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Io`] if the directory can't be created, or
    /// [`StoreError::Sqlite`] if the database can't be opened.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.execute_batch(CREATE_TABLES)?;
        debug!(path = %path.display(), "opened store-and-forward database");
        Ok(Self::from_connection(conn))
    }

    /// Creates an in-memory database.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Sqlite`] if the schema can't be created.
    pub fn in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(CREATE_TABLES)?;
        Ok(Self::from_connection(conn))
    }

    fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Arc::new(Mutex::new(Some(conn))),
        }
    }

    fn lock_sync<T>(
        conn: &SharedConnection,
        f: impl FnOnce(&Connection) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let guard = conn.lock();
        let conn = guard.as_ref().ok_or(StoreError::Disconnected)?;
        f(conn)
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, StoreError> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || Self::lock_sync(&conn, f))
            .await
            .map_err(|e| StoreError::Internal(e.to_string()))?
    }

    /// Returns the number of stored rows.
    ///
    /// Runs on the calling thread.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Sqlite`] on query failure.
    pub fn count(&self) -> Result<usize, StoreError> {
        Self::lock_sync(&self.conn, |conn| {
            let count: i64 = conn.query_row("SELECT COUNT(*) FROM store", [], |row| row.get(0))?;
            Ok(usize::try_from(count).unwrap_or_default())
        })
    }

    /// Returns true if a row with `id` exists.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Sqlite`] on query failure.
    pub fn contains(&self, id: &str) -> Result<bool, StoreError> {
        Self::lock_sync(&self.conn, |conn| {
            Ok(conn
                .query_row("SELECT 1 FROM store WHERE id = ?1", [id], |_| Ok(()))
                .optional()?
                .is_some())
        })
    }
}

impl std::fmt::Debug for SqliteStoreClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStoreClient")
            .field("connected", &self.conn.lock().is_some())
            .finish()
    }
}

#[async_trait]
impl StoreClient for SqliteStoreClient {
    async fn store(&self, mut object: StoredObject) -> Result<StoreReceipt, StoreError> {
        object.validate_contract(false)?;
        let content = serde_json::to_string(&object)?;
        self.with_conn(move |conn| {
            let inserted = conn.execute(
                "INSERT OR IGNORE INTO store (id, app_service_key, created, content) VALUES (?1, ?2, ?3, ?4)",
                params![object.id, object.app_service_key, object.created, content],
            )? > 0;
            if !inserted {
                debug!(object_id = %object.id, "object already stored");
            }
            Ok(StoreReceipt {
                id: object.id,
                inserted,
            })
        })
        .await
    }

    async fn retrieve_from_store(
        &self,
        app_service_key: &str,
    ) -> Result<Vec<StoredObject>, StoreError> {
        if app_service_key.is_empty() {
            return Err(StoreError::Contract("no app service key provided".into()));
        }
        let key = app_service_key.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT content FROM store WHERE app_service_key = ?1 ORDER BY created, id",
            )?;
            let rows = stmt.query_map([&key], |row| row.get::<_, String>(0))?;
            let mut objects: Vec<StoredObject> = Vec::new();
            for content in rows {
                objects.push(serde_json::from_str(&content?)?);
            }
            Ok(objects)
        })
        .await
    }

    async fn update(&self, mut object: StoredObject) -> Result<(), StoreError> {
        object.validate_contract(true)?;
        let content = serde_json::to_string(&object)?;
        self.with_conn(move |conn| {
            let updated = conn.execute(
                "UPDATE store SET app_service_key = ?2, content = ?3 WHERE id = ?1",
                params![object.id, object.app_service_key, content],
            )?;
            if updated == 0 {
                return Err(StoreError::NotFound(object.id));
            }
            Ok(())
        })
        .await
    }

    async fn remove_from_store(&self, object: &StoredObject) -> Result<(), StoreError> {
        if object.id.is_empty() {
            return Err(StoreError::Contract("ID cannot be empty".into()));
        }
        let id = object.id.clone();
        self.with_conn(move |conn| {
            let removed = conn.execute("DELETE FROM store WHERE id = ?1", [&id])?;
            if removed == 0 {
                return Err(StoreError::NotFound(id));
            }
            Ok(())
        })
        .await
    }

    async fn disconnect(&self) -> Result<(), StoreError> {
        let conn = self.conn.lock().take();
        if let Some(conn) = conn {
            conn.close().map_err(|(_, e)| StoreError::Sqlite(e))?;
        }
        Ok(())
    }
}
