//! Script repository: CRUD operations for the `scripts` table.

use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Serialize;

use super::{get_parsed, now_timestamp, scene_repo, Database, DatabaseError};
use crate::extractor::Scene;
use crate::status::{ScriptMetadata, ScriptStatus};

/// A script row with its status and metadata decoded.
#[derive(Debug, Clone, Serialize)]
pub struct ScriptRow {
    pub id: i64,
    pub project_id: Option<i64>,
    pub title: String,
    pub filename: String,
    pub file_path: String,
    pub content: Option<String>,
    pub status: ScriptStatus,
    pub metadata: ScriptMetadata,
    pub mime_type: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl ScriptRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        let metadata: Option<String> = row.get("metadata")?;
        Ok(Self {
            id: row.get("id")?,
            project_id: row.get("project_id")?,
            title: row.get("title")?,
            filename: row.get("filename")?,
            file_path: row.get("file_path")?,
            content: row.get("content")?,
            status: get_parsed(row, "status")?,
            metadata: ScriptMetadata::from_json(metadata.as_deref()),
            mime_type: row.get("mime_type")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
        })
    }
}

/// Fields supplied when a script is first stored.
#[derive(Debug, Clone)]
pub struct NewScript {
    pub project_id: Option<i64>,
    pub title: String,
    pub filename: String,
    pub file_path: String,
    pub mime_type: Option<String>,
}

/// Query filter parameters for script listing.
#[derive(Debug, Default, Clone)]
pub struct ScriptFilter {
    pub project_id: Option<i64>,
    pub status: Option<ScriptStatus>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

fn encode_metadata(metadata: &ScriptMetadata) -> Result<String, DatabaseError> {
    metadata
        .to_json()
        .map_err(|source| DatabaseError::EncodeJson {
            column: "metadata",
            source,
        })
}

/// Inserts a new script in `uploading` state and returns the stored row.
pub fn insert(db: &Database, script: &NewScript) -> Result<ScriptRow, DatabaseError> {
    let now = now_timestamp();
    let metadata = ScriptMetadata::default();
    let encoded = encode_metadata(&metadata)?;
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO scripts (project_id, title, filename, file_path, status, metadata,
             mime_type, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)",
            params![
                script.project_id,
                script.title,
                script.filename,
                script.file_path,
                ScriptStatus::Uploading.as_str(),
                encoded,
                script.mime_type,
                now,
            ],
        )?;
        Ok(ScriptRow {
            id: conn.last_insert_rowid(),
            project_id: script.project_id,
            title: script.title.clone(),
            filename: script.filename.clone(),
            file_path: script.file_path.clone(),
            content: None,
            status: ScriptStatus::Uploading,
            metadata,
            mime_type: script.mime_type.clone(),
            created_at: now.clone(),
            updated_at: now.clone(),
        })
    })
}

/// Finds a script by its ID.
pub fn find_by_id(db: &Database, id: i64) -> Result<Option<ScriptRow>, DatabaseError> {
    db.with_conn(|conn| {
        let row = conn
            .query_row(
                "SELECT * FROM scripts WHERE id = ?1",
                params![id],
                ScriptRow::from_row,
            )
            .optional()?;
        Ok(row)
    })
}

/// Queries scripts with filters, returning (rows, total_count).
pub fn query(
    db: &Database,
    filter: &ScriptFilter,
) -> Result<(Vec<ScriptRow>, u64), DatabaseError> {
    db.with_conn(|conn| {
        let mut conditions = Vec::new();
        let mut param_values: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();

        if let Some(project_id) = filter.project_id {
            conditions.push(format!("project_id = ?{}", param_values.len() + 1));
            param_values.push(Box::new(project_id));
        }
        if let Some(status) = filter.status {
            conditions.push(format!("status = ?{}", param_values.len() + 1));
            param_values.push(Box::new(status.as_str()));
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };

        let count_sql = format!("SELECT COUNT(*) FROM scripts {}", where_clause);
        let params_ref: Vec<&dyn rusqlite::types::ToSql> =
            param_values.iter().map(|p| p.as_ref()).collect();
        let total: u64 = conn.query_row(&count_sql, params_ref.as_slice(), |r| r.get(0))?;

        let limit = filter.limit.unwrap_or(100) as i64;
        let offset = filter.offset.unwrap_or(0) as i64;
        param_values.push(Box::new(limit));
        param_values.push(Box::new(offset));
        let query_sql = format!(
            "SELECT * FROM scripts {} ORDER BY created_at DESC, id DESC LIMIT ?{} OFFSET ?{}",
            where_clause,
            param_values.len() - 1,
            param_values.len()
        );

        let params_ref: Vec<&dyn rusqlite::types::ToSql> =
            param_values.iter().map(|p| p.as_ref()).collect();
        let mut stmt = conn.prepare(&query_sql)?;
        let rows: Vec<ScriptRow> = stmt
            .query_map(params_ref.as_slice(), ScriptRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok((rows, total))
    })
}

/// Scripts of one project, oldest first.
pub fn list_for_project(db: &Database, project_id: i64) -> Result<Vec<ScriptRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt =
            conn.prepare("SELECT * FROM scripts WHERE project_id = ?1 ORDER BY id")?;
        let rows = stmt
            .query_map(params![project_id], ScriptRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

/// Moves a script into a project, or out of any with `None`.
pub fn set_project(
    db: &Database,
    id: i64,
    project_id: Option<i64>,
) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE scripts SET project_id = ?2, updated_at = ?3 WHERE id = ?1",
            params![id, project_id, now_timestamp()],
        )?;
        Ok(changed > 0)
    })
}

/// Sets the status only. Returns false if the script does not exist.
pub fn update_status(db: &Database, id: i64, status: ScriptStatus) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| update_status_on(conn, id, status))
}

pub(crate) fn update_status_on(
    conn: &Connection,
    id: i64,
    status: ScriptStatus,
) -> Result<bool, DatabaseError> {
    let changed = conn.execute(
        "UPDATE scripts SET status = ?2, updated_at = ?3 WHERE id = ?1",
        params![id, status.as_str(), now_timestamp()],
    )?;
    Ok(changed > 0)
}

/// Moves the script from `from` to `to`. Returns false, changing nothing,
/// when the script is in any other status.
pub fn transition_status(
    db: &Database,
    id: i64,
    from: ScriptStatus,
    to: ScriptStatus,
) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE scripts SET status = ?3, updated_at = ?4 WHERE id = ?1 AND status = ?2",
            params![id, from.as_str(), to.as_str(), now_timestamp()],
        )?;
        Ok(changed > 0)
    })
}

/// Sets status and metadata together, e.g. when a parse fails.
pub fn update_status_and_metadata(
    db: &Database,
    id: i64,
    status: ScriptStatus,
    metadata: &ScriptMetadata,
) -> Result<bool, DatabaseError> {
    let encoded = encode_metadata(metadata)?;
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE scripts SET status = ?2, metadata = ?3, updated_at = ?4 WHERE id = ?1",
            params![id, status.as_str(), encoded, now_timestamp()],
        )?;
        Ok(changed > 0)
    })
}

/// Records a successful parse in one transaction: the scene rows are
/// replaced and the script gets status `parsed`, summary metadata, its text
/// and, when the document names one, its title. Nothing is written if any
/// statement fails.
pub fn record_parse(
    db: &Database,
    id: i64,
    title: Option<&str>,
    content: &str,
    metadata: &ScriptMetadata,
    scenes: &[Scene],
) -> Result<bool, DatabaseError> {
    let encoded = encode_metadata(metadata)?;
    db.with_conn(|conn| {
        let tx = conn.unchecked_transaction()?;
        let changed = tx.execute(
            "UPDATE scripts SET status = ?2, metadata = ?3, content = ?4,
             title = COALESCE(?5, title), updated_at = ?6 WHERE id = ?1",
            params![
                id,
                ScriptStatus::Parsed.as_str(),
                encoded,
                content,
                title,
                now_timestamp()
            ],
        )?;
        if changed == 0 {
            return Ok(false);
        }
        scene_repo::replace_on(&tx, id, scenes)?;
        tx.commit()?;
        Ok(true)
    })
}

/// Deletes a script. Scenes, resources and analyses go with it.
pub fn delete(db: &Database, id: i64) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute("DELETE FROM scripts WHERE id = ?1", params![id])?;
        Ok(changed > 0)
    })
}

/// Script counts per status, optionally restricted to one project.
/// Statuses without scripts are omitted.
pub fn count_by_status(
    db: &Database,
    project_id: Option<i64>,
) -> Result<Vec<(ScriptStatus, u64)>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT status, COUNT(*) AS total FROM scripts
             WHERE ?1 IS NULL OR project_id = ?1
             GROUP BY status ORDER BY status",
        )?;
        let rows = stmt
            .query_map(params![project_id], |row| {
                Ok((get_parsed::<ScriptStatus>(row, "status")?, row.get("total")?))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}
