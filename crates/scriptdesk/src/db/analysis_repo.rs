//! Analysis repository. Every analyze request gets its own row; rows are
//! written once (documents or error) and then kept as history.

use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Serialize;
use serde_json::Value;

use super::{get_json, now_timestamp, Database, DatabaseError};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalysisRow {
    pub id: i64,
    pub script_id: i64,
    pub character_analysis: Option<Value>,
    pub resource_analysis: Option<Value>,
    pub scene_analysis: Option<Value>,
    pub error: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl AnalysisRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            script_id: row.get("script_id")?,
            character_analysis: get_json(row, "character_analysis")?,
            resource_analysis: get_json(row, "resource_analysis")?,
            scene_analysis: get_json(row, "scene_analysis")?,
            error: row.get("error")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
        })
    }

    /// Neither documents nor an error have been written yet.
    pub fn is_pending(&self) -> bool {
        self.character_analysis.is_none() && self.error.is_none()
    }
}

fn encode(column: &'static str, value: &Value) -> Result<String, DatabaseError> {
    serde_json::to_string(value).map_err(|source| DatabaseError::EncodeJson { column, source })
}

/// Creates an empty analysis row for a script and returns its id.
pub fn insert_pending(db: &Database, script_id: i64) -> Result<i64, DatabaseError> {
    let now = now_timestamp();
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO script_analyses (script_id, created_at, updated_at) VALUES (?1, ?2, ?2)",
            params![script_id, now],
        )?;
        Ok(conn.last_insert_rowid())
    })
}

/// Writes the three analysis documents. Returns false if the row is
/// missing or was already completed or failed.
pub fn complete(
    db: &Database,
    id: i64,
    character_analysis: &Value,
    resource_analysis: &Value,
    scene_analysis: &Value,
) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        complete_on(conn, id, character_analysis, resource_analysis, scene_analysis)
    })
}

/// [`complete`] on a connection the caller already holds.
pub(crate) fn complete_on(
    conn: &Connection,
    id: i64,
    character_analysis: &Value,
    resource_analysis: &Value,
    scene_analysis: &Value,
) -> Result<bool, DatabaseError> {
    let characters = encode("character_analysis", character_analysis)?;
    let resources = encode("resource_analysis", resource_analysis)?;
    let scenes = encode("scene_analysis", scene_analysis)?;
    let changed = conn.execute(
        "UPDATE script_analyses
         SET character_analysis = ?2, resource_analysis = ?3, scene_analysis = ?4,
             updated_at = ?5
         WHERE id = ?1 AND character_analysis IS NULL AND error IS NULL",
        params![id, characters, resources, scenes, now_timestamp()],
    )?;
    Ok(changed > 0)
}

/// Writes only the error text. Returns false if the row is missing or
/// already settled.
pub fn fail(db: &Database, id: i64, error: &str) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE script_analyses SET error = ?2, updated_at = ?3
             WHERE id = ?1 AND character_analysis IS NULL AND error IS NULL",
            params![id, error, now_timestamp()],
        )?;
        Ok(changed > 0)
    })
}

pub fn find_by_id(db: &Database, id: i64) -> Result<Option<AnalysisRow>, DatabaseError> {
    db.with_conn(|conn| {
        let row = conn
            .query_row(
                "SELECT * FROM script_analyses WHERE id = ?1",
                params![id],
                AnalysisRow::from_row,
            )
            .optional()?;
        Ok(row)
    })
}

/// All analyses for a script, newest first.
pub fn list_for_script(db: &Database, script_id: i64) -> Result<Vec<AnalysisRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT * FROM script_analyses WHERE script_id = ?1
             ORDER BY created_at DESC, id DESC",
        )?;
        let rows = stmt
            .query_map(params![script_id], AnalysisRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

pub fn latest_for_script(
    db: &Database,
    script_id: i64,
) -> Result<Option<AnalysisRow>, DatabaseError> {
    db.with_conn(|conn| {
        let row = conn
            .query_row(
                "SELECT * FROM script_analyses WHERE script_id = ?1
                 ORDER BY created_at DESC, id DESC LIMIT 1",
                params![script_id],
                AnalysisRow::from_row,
            )
            .optional()?;
        Ok(row)
    })
}
