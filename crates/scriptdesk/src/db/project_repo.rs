//! Project repository: CRUD for the `projects` table.

use rusqlite::{params, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

use super::{get_json, now_timestamp, Database, DatabaseError};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectRow {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
    /// `YYYY-MM-DD`.
    pub start_date: Option<String>,
    /// `YYYY-MM-DD`.
    pub end_date: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl ProjectRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            name: row.get("name")?,
            description: row.get("description")?,
            start_date: row.get("start_date")?,
            end_date: row.get("end_date")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
        })
    }
}

#[derive(Debug, Clone, Default)]
pub struct NewProject {
    pub name: String,
    pub description: Option<String>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
}

pub fn insert(db: &Database, project: &NewProject) -> Result<ProjectRow, DatabaseError> {
    let now = now_timestamp();
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO projects (name, description, start_date, end_date, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
            params![
                project.name,
                project.description,
                project.start_date,
                project.end_date,
                now
            ],
        )?;
        Ok(ProjectRow {
            id: conn.last_insert_rowid(),
            name: project.name.clone(),
            description: project.description.clone(),
            start_date: project.start_date.clone(),
            end_date: project.end_date.clone(),
            created_at: now.clone(),
            updated_at: now.clone(),
        })
    })
}

pub fn find_by_id(db: &Database, id: i64) -> Result<Option<ProjectRow>, DatabaseError> {
    db.with_conn(|conn| {
        let row = conn
            .query_row(
                "SELECT * FROM projects WHERE id = ?1",
                params![id],
                ProjectRow::from_row,
            )
            .optional()?;
        Ok(row)
    })
}

/// All projects, newest first.
pub fn list(db: &Database) -> Result<Vec<ProjectRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare("SELECT * FROM projects ORDER BY created_at DESC, id DESC")?;
        let rows = stmt
            .query_map([], ProjectRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

/// Overwrites every field except `id` and `created_at`. Returns false if the
/// row does not exist.
pub fn update(db: &Database, project: &ProjectRow) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE projects SET name = ?2, description = ?3, start_date = ?4, end_date = ?5,
             updated_at = ?6 WHERE id = ?1",
            params![
                project.id,
                project.name,
                project.description,
                project.start_date,
                project.end_date,
                project.updated_at,
            ],
        )?;
        Ok(changed > 0)
    })
}

/// Stored progress document. `None` when never set or the project is missing.
pub fn progress(db: &Database, id: i64) -> Result<Option<serde_json::Value>, DatabaseError> {
    db.with_conn(|conn| {
        let value = conn
            .query_row(
                "SELECT progress FROM projects WHERE id = ?1",
                params![id],
                |row| get_json(row, "progress"),
            )
            .optional()?;
        Ok(value.flatten())
    })
}

/// Replaces the progress document. Returns false if the row does not exist.
pub fn set_progress(
    db: &Database,
    id: i64,
    progress: &serde_json::Value,
) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE projects SET progress = ?2, updated_at = ?3 WHERE id = ?1",
            params![id, progress.to_string(), now_timestamp()],
        )?;
        Ok(changed > 0)
    })
}

pub fn delete(db: &Database, id: i64) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute("DELETE FROM projects WHERE id = ?1", params![id])?;
        Ok(changed > 0)
    })
}
