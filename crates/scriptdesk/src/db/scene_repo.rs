//! Scene repository. Scene rows mirror the latest parse of a script.

use rusqlite::{params, Connection, Row};
use serde::Serialize;

use super::{Database, DatabaseError};
use crate::extractor::Scene;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SceneRow {
    pub id: i64,
    pub script_id: i64,
    pub number: u32,
    pub name: String,
    pub content: String,
}

impl SceneRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            script_id: row.get("script_id")?,
            number: row.get("number")?,
            name: row.get("name")?,
            content: row.get("content")?,
        })
    }
}

/// Replaces all scene rows of a script in one transaction.
pub fn replace_for_script(
    db: &Database,
    script_id: i64,
    scenes: &[Scene],
) -> Result<usize, DatabaseError> {
    db.with_conn(|conn| {
        let tx = conn.unchecked_transaction()?;
        let stored = replace_on(&tx, script_id, scenes)?;
        tx.commit()?;
        Ok(stored)
    })
}

/// Replaces the scene rows without opening a transaction of its own.
pub(crate) fn replace_on(
    conn: &Connection,
    script_id: i64,
    scenes: &[Scene],
) -> Result<usize, DatabaseError> {
    conn.execute("DELETE FROM scenes WHERE script_id = ?1", params![script_id])?;
    let mut stmt = conn.prepare(
        "INSERT INTO scenes (script_id, number, name, content) VALUES (?1, ?2, ?3, ?4)",
    )?;
    for scene in scenes {
        stmt.execute(params![script_id, scene.number, scene.name, scene.content])?;
    }
    Ok(scenes.len())
}

/// Scenes of a script in document order.
pub fn list_for_script(db: &Database, script_id: i64) -> Result<Vec<SceneRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt =
            conn.prepare("SELECT * FROM scenes WHERE script_id = ?1 ORDER BY number")?;
        let rows = stmt
            .query_map(params![script_id], SceneRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

/// Scenes of every script in a project, grouped by script.
pub fn list_for_project(db: &Database, project_id: i64) -> Result<Vec<SceneRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT sc.* FROM scenes sc JOIN scripts s ON s.id = sc.script_id
             WHERE s.project_id = ?1 ORDER BY sc.script_id, sc.number",
        )?;
        let rows = stmt
            .query_map(params![project_id], SceneRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}
