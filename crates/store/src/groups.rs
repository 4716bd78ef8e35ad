use std::collections::{BTreeSet, VecDeque};

use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use serde::Serialize;
use tracing::debug;

use kbx_core::{Document, KbError};

use crate::store::{default_user, KbStore};

/// Controlled vocabulary for `group_type`; stored as a free string.
pub const GROUP_TYPES: [&str; 5] = ["batch", "initiative", "round", "session", "custom"];

/// Controlled vocabulary for membership roles.
pub const MEMBER_ROLES: [&str; 5] = ["primary", "exploration", "synthesis", "variant", "member"];

/// A node in the group forest. `doc_count` is the cached direct-membership
/// count; `total_tokens` / `total_cost_usd` are computed on read from
/// workflow attribution and are zero for hand-written documents.
#[derive(Debug, Clone, Serialize)]
pub struct Group {
    pub id: i64,
    pub name: String,
    pub group_type: String,
    pub parent_group_id: Option<i64>,
    pub project: Option<String>,
    pub description: Option<String>,
    pub is_active: bool,
    pub doc_count: i64,
    pub total_tokens: i64,
    pub total_cost_usd: f64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub created_by: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct NewGroup {
    pub group_type: Option<String>,
    pub parent_group_id: Option<i64>,
    pub project: Option<String>,
    pub description: Option<String>,
    pub created_by: Option<String>,
}

/// Parent-side filter for listings. `TopLevel` covers both the
/// "top level only" flag and the reserved no-parent sentinel of callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ParentFilter {
    #[default]
    Any,
    TopLevel,
    ChildrenOf(i64),
}

#[derive(Debug, Clone, Default)]
pub struct GroupFilter {
    pub parent: ParentFilter,
    pub project: Option<String>,
    pub group_type: Option<String>,
    pub include_inactive: bool,
}

/// Field patch for `update_group`. `None` leaves a field alone; the
/// double-`Option` fields distinguish "clear" from "keep".
#[derive(Debug, Clone, Default)]
pub struct GroupUpdate {
    pub name: Option<String>,
    pub description: Option<Option<String>>,
    pub parent_group_id: Option<Option<i64>>,
    pub group_type: Option<String>,
    pub project: Option<Option<String>>,
    pub is_active: Option<bool>,
}

impl GroupUpdate {
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.description.is_none()
            && self.parent_group_id.is_none()
            && self.group_type.is_none()
            && self.project.is_none()
            && self.is_active.is_none()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct GroupMember {
    pub document: Document,
    pub role: String,
    pub added_at: DateTime<Utc>,
    pub added_by: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DocumentGroupRef {
    pub group: Group,
    pub role: String,
    pub member_added_at: DateTime<Utc>,
}

/// One top-level group with live (not cached) direct counts; the batched
/// shape dashboards read instead of issuing one query per group.
#[derive(Debug, Clone, Serialize)]
pub struct TopGroupSummary {
    pub group: Group,
    pub child_group_count: i64,
    pub live_doc_count: i64,
}

const GROUP_COLUMNS: &str = "g.id, g.name, g.group_type, g.parent_group_id, g.project, \
     g.description, g.is_active, g.doc_count, g.created_at, g.updated_at, g.created_by, \
     COALESCE((SELECT SUM(w.tokens_used) FROM group_memberships m \
               JOIN document_sources s ON s.document_id = m.document_id \
               JOIN workflow_runs w ON w.id = s.workflow_id \
               WHERE m.group_id = g.id), 0), \
     COALESCE((SELECT SUM(w.cost_usd) FROM group_memberships m \
               JOIN document_sources s ON s.document_id = m.document_id \
               JOIN workflow_runs w ON w.id = s.workflow_id \
               WHERE m.group_id = g.id), 0.0)";

fn group_from_row(row: &Row<'_>) -> rusqlite::Result<Group> {
    Ok(Group {
        id: row.get(0)?,
        name: row.get(1)?,
        group_type: row.get(2)?,
        parent_group_id: row.get(3)?,
        project: row.get(4)?,
        description: row.get(5)?,
        is_active: row.get(6)?,
        doc_count: row.get(7)?,
        created_at: row.get(8)?,
        updated_at: row.get(9)?,
        created_by: row.get(10)?,
        total_tokens: row.get(11)?,
        total_cost_usd: row.get(12)?,
    })
}

impl KbStore {
    pub fn create_group(&self, name: &str, new: NewGroup) -> Result<i64> {
        let conn = self.connection()?;
        if let Some(parent) = new.parent_group_id {
            ensure_group_exists(&conn, parent)?;
            // Trivially false for a brand-new node; applied uniformly so
            // create and re-parent share one code path.
            if would_create_cycle(&conn, parent, None)? {
                return Err(KbError::Cycle {
                    group: parent,
                    parent,
                }
                .into());
            }
        }
        let now = Utc::now();
        let group_type = new.group_type.as_deref().unwrap_or("batch");
        let created_by = new.created_by.unwrap_or_else(default_user);
        conn.execute(
            "INSERT INTO document_groups
               (name, group_type, parent_group_id, project, description, created_at, updated_at, created_by)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                name,
                group_type,
                new.parent_group_id,
                new.project,
                new.description,
                now,
                now,
                created_by
            ],
        )?;
        let id = conn.last_insert_rowid();
        debug!(id, name, group_type, "group created");
        Ok(id)
    }

    pub fn get_group(&self, id: i64) -> Result<Option<Group>> {
        let conn = self.connection()?;
        let group = conn
            .query_row(
                &format!("SELECT {GROUP_COLUMNS} FROM document_groups g WHERE g.id = ?1"),
                [id],
                group_from_row,
            )
            .optional()?;
        Ok(group)
    }

    /// Newest-created first.
    pub fn list_groups(&self, filter: &GroupFilter) -> Result<Vec<Group>> {
        let conn = self.connection()?;
        let mut clauses: Vec<String> = Vec::new();
        let mut values: Vec<Value> = Vec::new();
        if !filter.include_inactive {
            clauses.push("g.is_active = 1".to_string());
        }
        match filter.parent {
            ParentFilter::Any => {}
            ParentFilter::TopLevel => clauses.push("g.parent_group_id IS NULL".to_string()),
            ParentFilter::ChildrenOf(parent) => {
                clauses.push("g.parent_group_id = ?".to_string());
                values.push(Value::Integer(parent));
            }
        }
        if let Some(project) = &filter.project {
            clauses.push("g.project = ?".to_string());
            values.push(Value::Text(project.clone()));
        }
        if let Some(group_type) = &filter.group_type {
            clauses.push("g.group_type = ?".to_string());
            values.push(Value::Text(group_type.clone()));
        }
        let mut sql = format!("SELECT {GROUP_COLUMNS} FROM document_groups g");
        if !clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }
        sql.push_str(" ORDER BY g.created_at DESC, g.id DESC");
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(values), group_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Applies a whitelisted field patch. Returns `Ok(false)` when the
    /// patch is empty or the group does not exist. Re-parenting is cycle
    /// checked before anything is written.
    pub fn update_group(&self, id: i64, update: &GroupUpdate) -> Result<bool> {
        if update.is_empty() {
            return Ok(false);
        }
        let conn = self.connection()?;
        if let Some(Some(parent)) = update.parent_group_id {
            ensure_group_exists(&conn, parent)?;
            if would_create_cycle(&conn, parent, Some(id))? {
                return Err(KbError::Cycle { group: id, parent }.into());
            }
        }

        let mut sets: Vec<&str> = Vec::new();
        let mut values: Vec<Value> = Vec::new();
        if let Some(name) = &update.name {
            sets.push("name = ?");
            values.push(Value::Text(name.clone()));
        }
        if let Some(description) = &update.description {
            sets.push("description = ?");
            values.push(opt_text(description));
        }
        if let Some(parent) = &update.parent_group_id {
            sets.push("parent_group_id = ?");
            values.push(match parent {
                Some(p) => Value::Integer(*p),
                None => Value::Null,
            });
        }
        if let Some(group_type) = &update.group_type {
            sets.push("group_type = ?");
            values.push(Value::Text(group_type.clone()));
        }
        if let Some(project) = &update.project {
            sets.push("project = ?");
            values.push(opt_text(project));
        }
        if let Some(is_active) = update.is_active {
            sets.push("is_active = ?");
            values.push(Value::Integer(is_active as i64));
        }
        sets.push("updated_at = ?");
        values.push(Value::Text(Utc::now().to_rfc3339()));
        values.push(Value::Integer(id));

        let sql = format!(
            "UPDATE document_groups SET {} WHERE id = ?",
            sets.join(", ")
        );
        let changed = conn.execute(&sql, params_from_iter(values))?;
        debug!(id, changed, "group updated");
        Ok(changed > 0)
    }

    /// Soft delete hides the group from default listings; children and
    /// membership edges stay untouched. Hard delete is explicit: children
    /// are spliced onto this group's own parent, edges removed, then the
    /// row goes, all in one transaction.
    pub fn delete_group(&self, id: i64, hard: bool) -> Result<bool> {
        let mut conn = self.connection()?;
        if !hard {
            let changed = conn.execute(
                "UPDATE document_groups SET is_active = 0, updated_at = ?2 WHERE id = ?1",
                params![id, Utc::now()],
            )?;
            return Ok(changed > 0);
        }

        let tx = conn.transaction()?;
        let parent: Option<Option<i64>> = tx
            .query_row(
                "SELECT parent_group_id FROM document_groups WHERE id = ?1",
                [id],
                |row| row.get(0),
            )
            .optional()?;
        let Some(parent) = parent else {
            return Ok(false);
        };
        tx.execute(
            "UPDATE document_groups SET parent_group_id = ?2, updated_at = ?3
             WHERE parent_group_id = ?1",
            params![id, parent, Utc::now()],
        )?;
        tx.execute("DELETE FROM group_memberships WHERE group_id = ?1", [id])?;
        tx.execute("DELETE FROM document_groups WHERE id = ?1", [id])?;
        tx.commit()?;
        debug!(id, "group hard-deleted");
        Ok(true)
    }

    /// Idempotent: a duplicate `(group, document)` edge is a soft no-op
    /// reported as `Ok(false)`. On success the cached `doc_count` is
    /// recomputed within the same transaction.
    pub fn add_document_to_group(
        &self,
        group_id: i64,
        document_id: i64,
        role: Option<&str>,
        added_by: Option<&str>,
    ) -> Result<bool> {
        let mut conn = self.connection()?;
        let tx = conn.transaction()?;
        let exists: Option<i64> = tx
            .query_row(
                "SELECT 1 FROM group_memberships WHERE group_id = ?1 AND document_id = ?2",
                params![group_id, document_id],
                |row| row.get(0),
            )
            .optional()?;
        if exists.is_some() {
            return Ok(false);
        }
        let added_by = added_by.map(str::to_string).unwrap_or_else(default_user);
        tx.execute(
            "INSERT INTO group_memberships (group_id, document_id, role, added_at, added_by)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                group_id,
                document_id,
                role.unwrap_or("member"),
                Utc::now(),
                added_by
            ],
        )?;
        refresh_doc_count(&tx, group_id)?;
        tx.commit()?;
        debug!(group_id, document_id, "membership added");
        Ok(true)
    }

    pub fn remove_document_from_group(&self, group_id: i64, document_id: i64) -> Result<bool> {
        let mut conn = self.connection()?;
        let tx = conn.transaction()?;
        let removed = tx.execute(
            "DELETE FROM group_memberships WHERE group_id = ?1 AND document_id = ?2",
            params![group_id, document_id],
        )?;
        if removed == 0 {
            return Ok(false);
        }
        refresh_doc_count(&tx, group_id)?;
        tx.commit()?;
        debug!(group_id, document_id, "membership removed");
        Ok(true)
    }

    /// Direct members, newest membership first. Stale edges pointing at
    /// deleted or archived documents are filtered out, not cleaned up.
    pub fn get_group_members(&self, group_id: i64) -> Result<Vec<GroupMember>> {
        let conn = self.connection()?;
        let mut stmt = conn.prepare(
            "SELECT d.id, d.title, d.content, d.project, d.access_count, d.accessed_at,
                    d.created_at, d.updated_at, m.role, m.added_at, m.added_by
             FROM group_memberships m
             JOIN documents d ON d.id = m.document_id
             WHERE m.group_id = ?1 AND d.is_deleted = 0 AND d.is_archived = 0
             ORDER BY m.added_at DESC, m.rowid DESC",
        )?;
        let rows = stmt.query_map([group_id], |row| {
            Ok(GroupMember {
                document: Document {
                    id: row.get(0)?,
                    title: row.get(1)?,
                    content: row.get(2)?,
                    project: row.get(3)?,
                    access_count: row.get(4)?,
                    accessed_at: row.get(5)?,
                    created_at: row.get(6)?,
                    updated_at: row.get(7)?,
                },
                role: row.get(8)?,
                added_at: row.get(9)?,
                added_by: row.get(10)?,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Active groups the document belongs to; memberships in soft-deleted
    /// groups are hidden.
    pub fn get_document_groups(&self, document_id: i64) -> Result<Vec<DocumentGroupRef>> {
        let conn = self.connection()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {GROUP_COLUMNS}, m.role, m.added_at
             FROM group_memberships m
             JOIN document_groups g ON g.id = m.group_id
             WHERE m.document_id = ?1 AND g.is_active = 1
             ORDER BY m.added_at DESC, m.rowid DESC"
        ))?;
        let rows = stmt.query_map([document_id], |row| {
            Ok(DocumentGroupRef {
                group: group_from_row(row)?,
                role: row.get(13)?,
                member_added_at: row.get(14)?,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Direct children only; no recursion.
    pub fn get_child_groups(&self, parent_id: i64) -> Result<Vec<Group>> {
        self.list_groups(&GroupFilter {
            parent: ParentFilter::ChildrenOf(parent_id),
            ..GroupFilter::default()
        })
    }

    /// Every document id that belongs to at least one group, deduplicated.
    pub fn get_all_grouped_document_ids(&self) -> Result<BTreeSet<i64>> {
        let conn = self.connection()?;
        let mut stmt = conn.prepare("SELECT DISTINCT document_id FROM group_memberships")?;
        let rows = stmt.query_map([], |row| row.get::<_, i64>(0))?;
        Ok(rows.collect::<rusqlite::Result<BTreeSet<_>>>()?)
    }

    /// Distinct non-deleted documents across the group and all transitive
    /// descendants. Differs from the cached `doc_count`, which is
    /// direct-membership only.
    pub fn get_recursive_doc_count(&self, group_id: i64) -> Result<i64> {
        let conn = self.connection()?;
        // Worklist traversal; the visited set guarantees termination even
        // on a corrupted parent chain.
        let mut visited: BTreeSet<i64> = BTreeSet::new();
        let mut queue: VecDeque<i64> = VecDeque::from([group_id]);
        let mut children_stmt =
            conn.prepare("SELECT id FROM document_groups WHERE parent_group_id = ?1")?;
        while let Some(gid) = queue.pop_front() {
            if !visited.insert(gid) {
                continue;
            }
            let children = children_stmt.query_map([gid], |row| row.get::<_, i64>(0))?;
            for child in children {
                queue.push_back(child?);
            }
        }

        let placeholders = vec!["?"; visited.len()].join(", ");
        let sql = format!(
            "SELECT COUNT(DISTINCT m.document_id)
             FROM group_memberships m
             JOIN documents d ON d.id = m.document_id
             WHERE d.is_deleted = 0 AND m.group_id IN ({placeholders})"
        );
        let count = conn.query_row(
            &sql,
            params_from_iter(visited.iter().map(|id| Value::Integer(*id))),
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// All top-level active groups with live direct counts, computed in
    /// one statement instead of one round trip per group.
    pub fn list_top_groups_with_counts(&self) -> Result<Vec<TopGroupSummary>> {
        let conn = self.connection()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {GROUP_COLUMNS},
                    (SELECT COUNT(*) FROM document_groups c
                     WHERE c.parent_group_id = g.id AND c.is_active = 1),
                    (SELECT COUNT(*) FROM group_memberships m
                     JOIN documents d ON d.id = m.document_id
                     WHERE m.group_id = g.id AND d.is_deleted = 0)
             FROM document_groups g
             WHERE g.parent_group_id IS NULL AND g.is_active = 1
             ORDER BY g.created_at DESC, g.id DESC"
        ))?;
        let rows = stmt.query_map([], |row| {
            Ok(TopGroupSummary {
                group: group_from_row(row)?,
                child_group_count: row.get(13)?,
                live_doc_count: row.get(14)?,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }
}

/// Walks the parent chain upward from `candidate_parent`. Hitting
/// `subject` anywhere closes a loop; revisiting any id means the chain is
/// already cyclic and is treated the same way.
fn would_create_cycle(
    conn: &Connection,
    candidate_parent: i64,
    subject: Option<i64>,
) -> Result<bool> {
    let Some(subject) = subject else {
        return Ok(false);
    };
    let mut visited: BTreeSet<i64> = BTreeSet::new();
    let mut current = Some(candidate_parent);
    while let Some(gid) = current {
        if gid == subject {
            return Ok(true);
        }
        if !visited.insert(gid) {
            return Ok(true);
        }
        current = conn
            .query_row(
                "SELECT parent_group_id FROM document_groups WHERE id = ?1",
                [gid],
                |row| row.get::<_, Option<i64>>(0),
            )
            .optional()?
            .flatten();
    }
    Ok(false)
}

fn ensure_group_exists(conn: &Connection, id: i64) -> Result<()> {
    let found: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM document_groups WHERE id = ?1",
            [id],
            |row| row.get(0),
        )
        .optional()?;
    if found.is_none() {
        return Err(KbError::GroupNotFound(id).into());
    }
    Ok(())
}

/// Full recount of direct membership rows; a materialized aggregate with
/// no staleness tolerance, robust against out-of-band edits.
fn refresh_doc_count(conn: &Connection, group_id: i64) -> Result<()> {
    conn.execute(
        "UPDATE document_groups
         SET doc_count = (SELECT COUNT(*) FROM group_memberships WHERE group_id = ?1),
             updated_at = ?2
         WHERE id = ?1",
        params![group_id, Utc::now()],
    )?;
    Ok(())
}

fn opt_text(value: &Option<String>) -> Value {
    match value {
        Some(text) => Value::Text(text.clone()),
        None => Value::Null,
    }
}
