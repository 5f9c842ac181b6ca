//! Resource repository: CRUD operations for the `resources` table.

use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

use super::{get_parsed, now_timestamp, Database, DatabaseError};
use crate::resources::{ResourcePriority, ResourceStatus};

/// A resource row with status and priority decoded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceRow {
    pub id: i64,
    pub script_id: i64,
    pub scene_number: Option<u32>,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub description: Option<String>,
    pub status: ResourceStatus,
    pub priority: ResourcePriority,
    pub estimated_budget: Option<f64>,
    pub actual_budget: Option<f64>,
    pub responsible_person: Option<String>,
    pub notes: Option<String>,
    /// `YYYY-MM-DD`.
    pub needed_by: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl ResourceRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            script_id: row.get("script_id")?,
            scene_number: row.get("scene_number")?,
            name: row.get("name")?,
            kind: row.get("type")?,
            description: row.get("description")?,
            status: get_parsed(row, "status")?,
            priority: get_parsed(row, "priority")?,
            estimated_budget: row.get("estimated_budget")?,
            actual_budget: row.get("actual_budget")?,
            responsible_person: row.get("responsible_person")?,
            notes: row.get("notes")?,
            needed_by: row.get("needed_by")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NewResource {
    pub script_id: i64,
    #[serde(default)]
    pub scene_number: Option<u32>,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub status: ResourceStatus,
    #[serde(default)]
    pub priority: ResourcePriority,
    #[serde(default)]
    pub estimated_budget: Option<f64>,
    #[serde(default)]
    pub actual_budget: Option<f64>,
    #[serde(default)]
    pub responsible_person: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub needed_by: Option<String>,
}

/// Query filter parameters for resource listing.
#[derive(Debug, Default, Clone)]
pub struct ResourceFilter {
    pub script_id: Option<i64>,
    pub status: Option<ResourceStatus>,
    pub priority: Option<ResourcePriority>,
    pub kind: Option<String>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

fn insert_on(conn: &Connection, resource: &NewResource) -> Result<ResourceRow, DatabaseError> {
    let now = now_timestamp();
    conn.execute(
        "INSERT INTO resources (script_id, scene_number, name, type, description, status,
         priority, estimated_budget, actual_budget, responsible_person, notes, needed_by,
         created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?13)",
        params![
            resource.script_id,
            resource.scene_number,
            resource.name,
            resource.kind,
            resource.description,
            resource.status.as_str(),
            resource.priority.as_str(),
            resource.estimated_budget,
            resource.actual_budget,
            resource.responsible_person,
            resource.notes,
            resource.needed_by,
            now,
        ],
    )?;
    Ok(ResourceRow {
        id: conn.last_insert_rowid(),
        script_id: resource.script_id,
        scene_number: resource.scene_number,
        name: resource.name.clone(),
        kind: resource.kind.clone(),
        description: resource.description.clone(),
        status: resource.status,
        priority: resource.priority,
        estimated_budget: resource.estimated_budget,
        actual_budget: resource.actual_budget,
        responsible_person: resource.responsible_person.clone(),
        notes: resource.notes.clone(),
        needed_by: resource.needed_by.clone(),
        created_at: now.clone(),
        updated_at: now,
    })
}

fn exists_on(
    conn: &Connection,
    script_id: i64,
    name: &str,
    kind: &str,
) -> Result<bool, DatabaseError> {
    let found: Option<i64> = conn
        .query_row(
            "SELECT id FROM resources WHERE script_id = ?1 AND name = ?2 AND type = ?3 LIMIT 1",
            params![script_id, name, kind],
            |r| r.get(0),
        )
        .optional()?;
    Ok(found.is_some())
}

pub fn insert(db: &Database, resource: &NewResource) -> Result<ResourceRow, DatabaseError> {
    db.with_conn(|conn| insert_on(conn, resource))
}

/// Inserts unless a resource with the same (script_id, name, type) exists.
/// Check and insert happen under one lock, so concurrent callers cannot
/// both create the same resource.
pub fn insert_if_absent(
    db: &Database,
    resource: &NewResource,
) -> Result<Option<ResourceRow>, DatabaseError> {
    db.with_conn(|conn| insert_if_absent_on(conn, resource))
}

/// [`insert_if_absent`] on a connection the caller already holds, e.g.
/// inside a transaction.
pub(crate) fn insert_if_absent_on(
    conn: &Connection,
    resource: &NewResource,
) -> Result<Option<ResourceRow>, DatabaseError> {
    if exists_on(conn, resource.script_id, &resource.name, &resource.kind)? {
        return Ok(None);
    }
    insert_on(conn, resource).map(Some)
}

/// Exact, case-sensitive match on (script_id, name, type).
pub fn exists(
    db: &Database,
    script_id: i64,
    name: &str,
    kind: &str,
) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| exists_on(conn, script_id, name, kind))
}

pub fn find_by_id(db: &Database, id: i64) -> Result<Option<ResourceRow>, DatabaseError> {
    db.with_conn(|conn| {
        let row = conn
            .query_row(
                "SELECT * FROM resources WHERE id = ?1",
                params![id],
                ResourceRow::from_row,
            )
            .optional()?;
        Ok(row)
    })
}

/// Queries resources with filters, returning (rows, total_count).
pub fn query(
    db: &Database,
    filter: &ResourceFilter,
) -> Result<(Vec<ResourceRow>, u64), DatabaseError> {
    db.with_conn(|conn| {
        let mut conditions = Vec::new();
        let mut param_values: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();

        if let Some(script_id) = filter.script_id {
            conditions.push(format!("script_id = ?{}", param_values.len() + 1));
            param_values.push(Box::new(script_id));
        }
        if let Some(status) = filter.status {
            conditions.push(format!("status = ?{}", param_values.len() + 1));
            param_values.push(Box::new(status.as_str()));
        }
        if let Some(priority) = filter.priority {
            conditions.push(format!("priority = ?{}", param_values.len() + 1));
            param_values.push(Box::new(priority.as_str()));
        }
        if let Some(ref kind) = filter.kind {
            conditions.push(format!("type = ?{}", param_values.len() + 1));
            param_values.push(Box::new(kind.clone()));
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };

        let count_sql = format!("SELECT COUNT(*) FROM resources {}", where_clause);
        let params_ref: Vec<&dyn rusqlite::types::ToSql> =
            param_values.iter().map(|p| p.as_ref()).collect();
        let total: u64 = conn.query_row(&count_sql, params_ref.as_slice(), |r| r.get(0))?;

        let limit = filter.limit.unwrap_or(100) as i64;
        let offset = filter.offset.unwrap_or(0) as i64;
        param_values.push(Box::new(limit));
        param_values.push(Box::new(offset));
        let query_sql = format!(
            "SELECT * FROM resources {} ORDER BY created_at DESC, id DESC LIMIT ?{} OFFSET ?{}",
            where_clause,
            param_values.len() - 1,
            param_values.len()
        );

        let params_ref: Vec<&dyn rusqlite::types::ToSql> =
            param_values.iter().map(|p| p.as_ref()).collect();
        let mut stmt = conn.prepare(&query_sql)?;
        let rows: Vec<ResourceRow> = stmt
            .query_map(params_ref.as_slice(), ResourceRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok((rows, total))
    })
}

/// Every resource of a script, oldest first.
pub fn list_for_script(db: &Database, script_id: i64) -> Result<Vec<ResourceRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare("SELECT * FROM resources WHERE script_id = ?1 ORDER BY id")?;
        let rows = stmt
            .query_map(params![script_id], ResourceRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

/// Resources of every script in a project, ordered by type.
pub fn list_for_project(
    db: &Database,
    project_id: i64,
) -> Result<Vec<ResourceRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT r.* FROM resources r JOIN scripts s ON s.id = r.script_id
             WHERE s.project_id = ?1 ORDER BY r.type, r.id",
        )?;
        let rows = stmt
            .query_map(params![project_id], ResourceRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

/// Overwrites every field except `id`, `script_id` and `created_at`.
pub fn update(db: &Database, resource: &ResourceRow) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE resources SET scene_number=?2, name=?3, type=?4, description=?5, status=?6,
             priority=?7, estimated_budget=?8, actual_budget=?9, responsible_person=?10,
             notes=?11, needed_by=?12, updated_at=?13
             WHERE id=?1",
            params![
                resource.id,
                resource.scene_number,
                resource.name,
                resource.kind,
                resource.description,
                resource.status.as_str(),
                resource.priority.as_str(),
                resource.estimated_budget,
                resource.actual_budget,
                resource.responsible_person,
                resource.notes,
                resource.needed_by,
                resource.updated_at,
            ],
        )?;
        Ok(changed > 0)
    })
}

pub fn update_status(
    db: &Database,
    id: i64,
    status: ResourceStatus,
) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE resources SET status = ?2, updated_at = ?3 WHERE id = ?1",
            params![id, status.as_str(), now_timestamp()],
        )?;
        Ok(changed > 0)
    })
}

pub fn update_scene_number(
    db: &Database,
    id: i64,
    scene_number: Option<u32>,
) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE resources SET scene_number = ?2, updated_at = ?3 WHERE id = ?1",
            params![id, scene_number, now_timestamp()],
        )?;
        Ok(changed > 0)
    })
}

pub fn delete(db: &Database, id: i64) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute("DELETE FROM resources WHERE id = ?1", params![id])?;
        Ok(changed > 0)
    })
}
