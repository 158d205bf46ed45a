use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use rusqlite::{Connection, OptionalExtension, params};
use simdup_config::simdup_dir;
use thiserror::Error;

const FILE_STATE_DB: &str = "file_state.sqlite";

#[derive(Debug, Error)]
pub enum FileStateError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileStateRecord {
    pub file_path: String,
    pub content_hash: String,
    pub symbol_ids: Vec<String>,
}

/// Files whose content differs from the last recorded run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeSet {
    pub changed: Vec<String>,
    pub deleted: Vec<String>,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.changed.is_empty() && self.deleted.is_empty()
    }
}

/// Content hash and emitted symbol ids per file, persisted between runs.
pub struct FileStateStore {
    conn: Connection,
}

impl FileStateStore {
    pub fn open(workspace_root: impl AsRef<Path>) -> Result<Self, FileStateError> {
        let dir = simdup_dir(workspace_root);
        fs::create_dir_all(&dir)?;

        let conn = Connection::open(dir.join(FILE_STATE_DB))?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS file_state (
                file_path TEXT PRIMARY KEY,
                content_hash TEXT NOT NULL,
                symbol_ids_json TEXT NOT NULL
            );
            "#,
        )?;
        Ok(Self { conn })
    }

    pub fn get(&self, file_path: &str) -> Result<Option<FileStateRecord>, FileStateError> {
        let row = self
            .conn
            .query_row(
                "SELECT content_hash, symbol_ids_json FROM file_state WHERE file_path = ?1",
                params![file_path],
                |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)),
            )
            .optional()?;

        let Some((content_hash, symbol_ids_json)) = row else {
            return Ok(None);
        };
        Ok(Some(FileStateRecord {
            file_path: file_path.to_owned(),
            content_hash,
            symbol_ids: serde_json::from_str(&symbol_ids_json)?,
        }))
    }

    pub fn record(&self, record: &FileStateRecord) -> Result<(), FileStateError> {
        self.conn.execute(
            r#"
            INSERT INTO file_state (file_path, content_hash, symbol_ids_json)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(file_path) DO UPDATE SET
                content_hash = excluded.content_hash,
                symbol_ids_json = excluded.symbol_ids_json
            "#,
            params![
                record.file_path,
                record.content_hash,
                serde_json::to_string(&record.symbol_ids)?,
            ],
        )?;
        Ok(())
    }

    pub fn remove(&self, file_path: &str) -> Result<(), FileStateError> {
        self.conn.execute(
            "DELETE FROM file_state WHERE file_path = ?1",
            params![file_path],
        )?;
        Ok(())
    }

    pub fn clear(&self) -> Result<(), FileStateError> {
        self.conn.execute("DELETE FROM file_state", [])?;
        Ok(())
    }

    pub fn tracked_paths(&self) -> Result<BTreeSet<String>, FileStateError> {
        let mut stmt = self
            .conn
            .prepare("SELECT file_path FROM file_state ORDER BY file_path")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut paths = BTreeSet::new();
        for row in rows {
            paths.insert(row?);
        }
        Ok(paths)
    }

    /// Compares `current` (relative path to content hash) against the recorded state.
    pub fn detect_changes(
        &self,
        current: &BTreeMap<String, String>,
    ) -> Result<ChangeSet, FileStateError> {
        let mut changes = ChangeSet::default();
        for (path, hash) in current {
            let unchanged = self
                .get(path)?
                .is_some_and(|record| &record.content_hash == hash);
            if !unchanged {
                changes.changed.push(path.clone());
            }
        }
        for tracked in self.tracked_paths()? {
            if !current.contains_key(&tracked) {
                changes.deleted.push(tracked);
            }
        }
        Ok(changes)
    }
}

/// blake3 of the file bytes, or `None` when the file cannot be read.
pub fn hash_file(path: &Path) -> Option<String> {
    fs::read(path)
        .ok()
        .map(|bytes| blake3::hash(&bytes).to_hex().to_string())
}

/// Hashes every readable file in `files`, keyed by workspace-relative path.
pub fn hash_files(workspace_root: &Path, files: &[PathBuf]) -> BTreeMap<String, String> {
    files
        .iter()
        .filter_map(|path| {
            let hash = hash_file(path)?;
            Some((crate::discovery::relative_path(workspace_root, path), hash))
        })
        .collect()
}
