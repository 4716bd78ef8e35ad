use std::collections::BTreeSet;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;

/// A full document record as the merge engine sees it.
#[derive(Debug, Clone, Serialize)]
pub struct Document {
    pub id: i64,
    pub title: String,
    pub content: String,
    pub project: Option<String>,
    pub access_count: i64,
    pub accessed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// The bulk-query row used to build the lexical pre-filter index.
#[derive(Debug, Clone, Serialize)]
pub struct DocumentSummary {
    pub id: i64,
    pub title: String,
    pub content: String,
    pub project: Option<String>,
    pub access_count: i64,
}

/// Read/update access to the document table.
pub trait DocumentStore {
    fn get_document(&self, id: i64) -> Result<Option<Document>>;

    fn update_document(&self, id: i64, title: &str, content: &str) -> Result<bool>;

    /// Soft delete; the row stays behind an `is_deleted` flag.
    fn delete_document(&self, id: i64) -> Result<bool>;

    /// All non-deleted, non-archived documents, optionally scoped to a project.
    fn active_documents(&self, project: Option<&str>) -> Result<Vec<DocumentSummary>>;

    /// Applies a merge as one unit of work: rewrite the kept document,
    /// attach `tags`, and (when `retire_id` is set) soft-delete the source.
    /// Either every step lands or none does.
    fn apply_merge(
        &self,
        keep_id: i64,
        title: &str,
        content: &str,
        tags: &BTreeSet<String>,
        retire_id: Option<i64>,
    ) -> Result<()>;
}

/// Read/append access to document tags.
pub trait TagStore {
    fn document_tags(&self, document_id: i64) -> Result<BTreeSet<String>>;

    /// Attaches `tags` to the document, skipping ones already present.
    /// Returns only the newly added tags.
    fn add_tags(&self, document_id: i64, tags: &BTreeSet<String>) -> Result<Vec<String>>;
}

impl<T: DocumentStore + ?Sized> DocumentStore for &T {
    fn get_document(&self, id: i64) -> Result<Option<Document>> {
        (**self).get_document(id)
    }

    fn update_document(&self, id: i64, title: &str, content: &str) -> Result<bool> {
        (**self).update_document(id, title, content)
    }

    fn delete_document(&self, id: i64) -> Result<bool> {
        (**self).delete_document(id)
    }

    fn active_documents(&self, project: Option<&str>) -> Result<Vec<DocumentSummary>> {
        (**self).active_documents(project)
    }

    fn apply_merge(
        &self,
        keep_id: i64,
        title: &str,
        content: &str,
        tags: &BTreeSet<String>,
        retire_id: Option<i64>,
    ) -> Result<()> {
        (**self).apply_merge(keep_id, title, content, tags, retire_id)
    }
}

impl<T: TagStore + ?Sized> TagStore for &T {
    fn document_tags(&self, document_id: i64) -> Result<BTreeSet<String>> {
        (**self).document_tags(document_id)
    }

    fn add_tags(&self, document_id: i64, tags: &BTreeSet<String>) -> Result<Vec<String>> {
        (**self).add_tags(document_id, tags)
    }
}
