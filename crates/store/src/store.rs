use std::env;
use std::path::{Path, PathBuf};

use anyhow::Result;
use rusqlite::Connection;

/// SQLite-backed document, tag, and group store.
///
/// Holds only the database path; every operation opens its own
/// connection and performs one unit of work against it. Consistency of
/// multi-statement operations comes from explicit transactions, not
/// application-level locking.
#[derive(Clone)]
pub struct KbStore {
    path: PathBuf,
}

impl KbStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let store = Self {
            path: path.as_ref().to_path_buf(),
        };
        store.init()?;
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub(crate) fn connection(&self) -> Result<Connection> {
        let conn = Connection::open(&self.path)?;
        conn.pragma_update(None, "foreign_keys", true)?;
        Ok(conn)
    }

    pub fn init(&self) -> Result<()> {
        let conn = self.connection()?;
        conn.execute_batch(
            r#"
            PRAGMA journal_mode = WAL;
            CREATE TABLE IF NOT EXISTS documents (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                title TEXT NOT NULL,
                content TEXT NOT NULL,
                project TEXT,
                access_count INTEGER NOT NULL DEFAULT 0,
                accessed_at TEXT,
                is_deleted INTEGER NOT NULL DEFAULT 0,
                is_archived INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
                updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
            );
            CREATE TABLE IF NOT EXISTS document_tags (
                document_id INTEGER NOT NULL,
                tag TEXT NOT NULL,
                UNIQUE(document_id, tag),
                FOREIGN KEY(document_id) REFERENCES documents(id)
            );
            CREATE TABLE IF NOT EXISTS document_groups (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                group_type TEXT NOT NULL DEFAULT 'batch',
                parent_group_id INTEGER,
                project TEXT,
                description TEXT,
                is_active INTEGER NOT NULL DEFAULT 1,
                doc_count INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
                updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
                created_by TEXT,
                FOREIGN KEY(parent_group_id) REFERENCES document_groups(id)
            );
            CREATE TABLE IF NOT EXISTS group_memberships (
                group_id INTEGER NOT NULL,
                document_id INTEGER NOT NULL,
                role TEXT NOT NULL DEFAULT 'member',
                added_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
                added_by TEXT,
                UNIQUE(group_id, document_id),
                FOREIGN KEY(group_id) REFERENCES document_groups(id),
                FOREIGN KEY(document_id) REFERENCES documents(id)
            );
            CREATE TABLE IF NOT EXISTS workflow_runs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                tokens_used INTEGER NOT NULL DEFAULT 0,
                cost_usd REAL NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
            );
            CREATE TABLE IF NOT EXISTS document_sources (
                document_id INTEGER NOT NULL,
                workflow_id INTEGER NOT NULL,
                UNIQUE(document_id, workflow_id),
                FOREIGN KEY(document_id) REFERENCES documents(id),
                FOREIGN KEY(workflow_id) REFERENCES workflow_runs(id)
            );
            CREATE INDEX IF NOT EXISTS idx_documents_project ON documents(project);
            CREATE INDEX IF NOT EXISTS idx_tags_document ON document_tags(document_id);
            CREATE INDEX IF NOT EXISTS idx_groups_parent ON document_groups(parent_group_id);
            CREATE INDEX IF NOT EXISTS idx_memberships_group ON group_memberships(group_id);
            CREATE INDEX IF NOT EXISTS idx_memberships_document ON group_memberships(document_id);
            CREATE INDEX IF NOT EXISTS idx_sources_document ON document_sources(document_id);
            "#,
        )?;
        Ok(())
    }
}

/// Audit-field default when the caller does not name an actor.
pub(crate) fn default_user() -> String {
    env::var("USER")
        .or_else(|_| env::var("USERNAME"))
        .unwrap_or_else(|_| "unknown".to_string())
}
