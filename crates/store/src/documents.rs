use std::collections::BTreeSet;

use anyhow::Result;
use chrono::Utc;
use rusqlite::{params, OptionalExtension, Row};
use tracing::debug;

use kbx_core::{Document, DocumentStore, DocumentSummary, TagStore};

use crate::store::KbStore;

fn document_from_row(row: &Row<'_>) -> rusqlite::Result<Document> {
    Ok(Document {
        id: row.get(0)?,
        title: row.get(1)?,
        content: row.get(2)?,
        project: row.get(3)?,
        access_count: row.get(4)?,
        accessed_at: row.get(5)?,
        created_at: row.get(6)?,
        updated_at: row.get(7)?,
    })
}

const DOCUMENT_COLUMNS: &str =
    "id, title, content, project, access_count, accessed_at, created_at, updated_at";

impl KbStore {
    pub fn add_document(
        &self,
        title: &str,
        content: &str,
        project: Option<&str>,
    ) -> Result<i64> {
        let conn = self.connection()?;
        let now = Utc::now();
        conn.execute(
            "INSERT INTO documents (title, content, project, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![title, content, project, now, now],
        )?;
        let id = conn.last_insert_rowid();
        debug!(id, title, "document added");
        Ok(id)
    }

    /// Bumps the view counter and stamps the access time.
    pub fn touch_document(&self, id: i64) -> Result<bool> {
        let conn = self.connection()?;
        let changed = conn.execute(
            "UPDATE documents SET access_count = access_count + 1, accessed_at = ?2
             WHERE id = ?1 AND is_deleted = 0",
            params![id, Utc::now()],
        )?;
        Ok(changed > 0)
    }

    pub fn archive_document(&self, id: i64, archived: bool) -> Result<bool> {
        let conn = self.connection()?;
        let changed = conn.execute(
            "UPDATE documents SET is_archived = ?2, updated_at = ?3
             WHERE id = ?1 AND is_deleted = 0",
            params![id, archived, Utc::now()],
        )?;
        Ok(changed > 0)
    }

    /// Records one workflow run's token/cost usage; returns its id.
    pub fn record_workflow_run(&self, tokens_used: i64, cost_usd: f64) -> Result<i64> {
        let conn = self.connection()?;
        conn.execute(
            "INSERT INTO workflow_runs (tokens_used, cost_usd, created_at) VALUES (?1, ?2, ?3)",
            params![tokens_used, cost_usd, Utc::now()],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Links a document to the workflow run that produced it. Documents
    /// without such a link contribute zero to group token/cost totals.
    pub fn attribute_document(&self, document_id: i64, workflow_id: i64) -> Result<()> {
        let conn = self.connection()?;
        conn.execute(
            "INSERT OR IGNORE INTO document_sources (document_id, workflow_id) VALUES (?1, ?2)",
            params![document_id, workflow_id],
        )?;
        Ok(())
    }
}

impl DocumentStore for KbStore {
    fn get_document(&self, id: i64) -> Result<Option<Document>> {
        let conn = self.connection()?;
        let doc = conn
            .query_row(
                &format!("SELECT {DOCUMENT_COLUMNS} FROM documents WHERE id = ?1 AND is_deleted = 0"),
                [id],
                document_from_row,
            )
            .optional()?;
        Ok(doc)
    }

    fn update_document(&self, id: i64, title: &str, content: &str) -> Result<bool> {
        let conn = self.connection()?;
        let changed = conn.execute(
            "UPDATE documents SET title = ?2, content = ?3, updated_at = ?4
             WHERE id = ?1 AND is_deleted = 0",
            params![id, title, content, Utc::now()],
        )?;
        Ok(changed > 0)
    }

    fn delete_document(&self, id: i64) -> Result<bool> {
        let conn = self.connection()?;
        let changed = conn.execute(
            "UPDATE documents SET is_deleted = 1, updated_at = ?2
             WHERE id = ?1 AND is_deleted = 0",
            params![id, Utc::now()],
        )?;
        debug!(id, deleted = changed > 0, "document soft-deleted");
        Ok(changed > 0)
    }

    fn active_documents(&self, project: Option<&str>) -> Result<Vec<DocumentSummary>> {
        let conn = self.connection()?;
        let mut sql = String::from(
            "SELECT id, title, content, project, access_count FROM documents
             WHERE is_deleted = 0 AND is_archived = 0",
        );
        if project.is_some() {
            sql.push_str(" AND project = ?1");
        }
        sql.push_str(" ORDER BY id");
        let mut stmt = conn.prepare(&sql)?;
        let map = |row: &Row<'_>| {
            Ok(DocumentSummary {
                id: row.get(0)?,
                title: row.get(1)?,
                content: row.get(2)?,
                project: row.get(3)?,
                access_count: row.get(4)?,
            })
        };
        let rows = match project {
            Some(p) => stmt.query_map([p], map)?,
            None => stmt.query_map([], map)?,
        };
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    fn apply_merge(
        &self,
        keep_id: i64,
        title: &str,
        content: &str,
        tags: &BTreeSet<String>,
        retire_id: Option<i64>,
    ) -> Result<()> {
        let mut conn = self.connection()?;
        let tx = conn.transaction()?;
        let now = Utc::now();
        let changed = tx.execute(
            "UPDATE documents SET title = ?2, content = ?3, updated_at = ?4
             WHERE id = ?1 AND is_deleted = 0",
            params![keep_id, title, content, now],
        )?;
        if changed == 0 {
            anyhow::bail!("document #{keep_id} not found");
        }
        for tag in tags {
            tx.execute(
                "INSERT OR IGNORE INTO document_tags (document_id, tag) VALUES (?1, ?2)",
                params![keep_id, tag],
            )?;
        }
        if let Some(retire) = retire_id {
            tx.execute(
                "UPDATE documents SET is_deleted = 1, updated_at = ?2 WHERE id = ?1",
                params![retire, now],
            )?;
        }
        tx.commit()?;
        debug!(keep_id, ?retire_id, "merge transaction committed");
        Ok(())
    }
}

impl TagStore for KbStore {
    fn document_tags(&self, document_id: i64) -> Result<BTreeSet<String>> {
        let conn = self.connection()?;
        let mut stmt = conn.prepare("SELECT tag FROM document_tags WHERE document_id = ?1")?;
        let rows = stmt.query_map([document_id], |row| row.get::<_, String>(0))?;
        Ok(rows.collect::<rusqlite::Result<BTreeSet<_>>>()?)
    }

    fn add_tags(&self, document_id: i64, tags: &BTreeSet<String>) -> Result<Vec<String>> {
        let conn = self.connection()?;
        let mut added = Vec::new();
        for tag in tags {
            let inserted = conn.execute(
                "INSERT OR IGNORE INTO document_tags (document_id, tag) VALUES (?1, ?2)",
                params![document_id, tag],
            )?;
            if inserted > 0 {
                added.push(tag.clone());
            }
        }
        Ok(added)
    }
}
