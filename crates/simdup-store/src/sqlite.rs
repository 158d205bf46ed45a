use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use rusqlite::{Connection, params};

use crate::backend::{BackendConnection, VectorBackend, rank_matches};
use crate::{Metadata, MetadataFilter, SimilarityMatch, StoreError, VectorRecord};

pub const SQLITE_FILE_NAME: &str = "vectors.sqlite";

/// On-disk backend storing one row per vector, keyed by `(collection, id)`.
#[derive(Debug, Clone)]
pub struct SqliteBackend {
    path: PathBuf,
    collection: String,
}

impl SqliteBackend {
    /// Creates the database file and schema. Fails if the file cannot be opened.
    pub fn open(path: impl AsRef<Path>, collection: &str) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let backend = Self {
            path,
            collection: collection.to_owned(),
        };
        let conn = backend
            .open_connection()
            .map_err(|err| StoreError::Unavailable {
                backend: "sqlite",
                message: format!("{}: {err}", backend.path.display()),
            })?;
        run_migrations(&conn)?;
        Ok(backend)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn open_connection(&self) -> Result<Connection, StoreError> {
        let conn = Connection::open(&self.path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.busy_timeout(Duration::from_secs(5))?;
        Ok(conn)
    }
}

impl VectorBackend for SqliteBackend {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn connect(&self) -> Result<Box<dyn BackendConnection>, StoreError> {
        Ok(Box::new(SqliteConnection {
            conn: self.open_connection()?,
            collection: self.collection.clone(),
        }))
    }
}

struct SqliteConnection {
    conn: Connection,
    collection: String,
}

impl BackendConnection for SqliteConnection {
    fn upsert(&mut self, records: &[VectorRecord]) -> Result<(), StoreError> {
        let updated_at = unix_timestamp_secs();
        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                r#"
                INSERT INTO vectors (
                    collection, id, embedding_json, metadata_json, updated_at
                ) VALUES (?1, ?2, ?3, ?4, ?5)
                ON CONFLICT(collection, id) DO UPDATE SET
                    embedding_json = excluded.embedding_json,
                    metadata_json = excluded.metadata_json,
                    updated_at = excluded.updated_at
                "#,
            )?;
            for record in records {
                stmt.execute(params![
                    self.collection,
                    record.id,
                    serde_json::to_string(&record.vector)?,
                    serde_json::to_string(&record.metadata)?,
                    updated_at,
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn query(
        &mut self,
        vector: &[f32],
        k: usize,
        threshold: f32,
        filter: &MetadataFilter,
    ) -> Result<Vec<SimilarityMatch>, StoreError> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT id, embedding_json, metadata_json
            FROM vectors
            WHERE collection = ?1
            "#,
        )?;
        let rows = stmt.query_map(params![self.collection], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
            ))
        })?;

        let mut stored = Vec::new();
        for row in rows {
            let (id, embedding_json, metadata_json) = row?;
            let embedding = serde_json::from_str::<Vec<f32>>(&embedding_json)?;
            let metadata = serde_json::from_str::<Metadata>(&metadata_json)?;
            stored.push((id, embedding, metadata));
        }

        let candidates = stored
            .iter()
            .map(|(id, embedding, metadata)| (id.as_str(), embedding.as_slice(), metadata));
        Ok(rank_matches(candidates, vector, k, threshold, filter))
    }

    fn delete(&mut self, ids: &[String]) -> Result<usize, StoreError> {
        let tx = self.conn.transaction()?;
        let mut removed = 0;
        {
            let mut stmt = tx.prepare("DELETE FROM vectors WHERE collection = ?1 AND id = ?2")?;
            for id in ids {
                removed += stmt.execute(params![self.collection, id])?;
            }
        }
        tx.commit()?;
        Ok(removed)
    }

    fn count(&mut self) -> Result<usize, StoreError> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM vectors WHERE collection = ?1",
            params![self.collection],
            |row| row.get(0),
        )?;
        Ok(usize::try_from(count).unwrap_or_default())
    }

    fn clear(&mut self) -> Result<(), StoreError> {
        self.conn.execute(
            "DELETE FROM vectors WHERE collection = ?1",
            params![self.collection],
        )?;
        Ok(())
    }
}

fn run_migrations(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS vectors (
            collection TEXT NOT NULL,
            id TEXT NOT NULL,
            embedding_json TEXT NOT NULL,
            metadata_json TEXT NOT NULL,
            updated_at INTEGER NOT NULL,
            PRIMARY KEY (collection, id)
        );
        "#,
    )?;
    Ok(())
}

fn unix_timestamp_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_secs() as i64)
        .unwrap_or_default()
}
