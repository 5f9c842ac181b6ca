//! Resource statistics repository: aggregate queries over `resources`.
//!
//! Everything here is a plain SQL aggregate. Rates, variances and other
//! derived figures are computed by `resources::stats`.

use rusqlite::{params, Connection, Row};
use serde::Serialize;

use super::{Database, DatabaseError};

/// Restricts an aggregate to one script and/or one project.
#[derive(Debug, Default, Clone, Copy)]
pub struct ResourceScope {
    pub script_id: Option<i64>,
    pub project_id: Option<i64>,
}

impl ResourceScope {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn script(script_id: i64) -> Self {
        Self {
            script_id: Some(script_id),
            project_id: None,
        }
    }

    pub fn project(project_id: i64) -> Self {
        Self {
            script_id: None,
            project_id: Some(project_id),
        }
    }
}

/// Column a distribution is grouped by.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dimension {
    Type,
    Status,
    Priority,
}

impl Dimension {
    fn column(&self) -> &'static str {
        match self {
            Dimension::Type => "r.type",
            Dimension::Status => "r.status",
            Dimension::Priority => "r.priority",
        }
    }
}

// ?1 = script_id, ?2 = project_id
const SCOPED_FROM: &str = "FROM resources r JOIN scripts s ON s.id = r.script_id
     WHERE (?1 IS NULL OR r.script_id = ?1) AND (?2 IS NULL OR s.project_id = ?2)";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CountRow {
    pub key: String,
    pub count: u64,
}

/// Totals and averages across the scope. Sums and averages are `None`
/// when no resource in scope has the budget set.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BudgetTotals {
    pub total_count: u64,
    pub completed_count: u64,
    pub total_estimated: Option<f64>,
    pub total_actual: Option<f64>,
    pub avg_estimated: Option<f64>,
    pub avg_actual: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CostGroup {
    pub key: String,
    pub estimated: f64,
    pub actual: f64,
    pub count: u64,
}

/// Resources bucketed by the month of `needed_by` (`YYYY-MM`).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MonthlyBucket {
    pub month: String,
    pub count: u64,
    pub estimated: f64,
    pub actual: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OverBudgetRow {
    pub id: i64,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub estimated: f64,
    pub actual: f64,
}

fn query_scoped<T, F>(
    conn: &Connection,
    sql: &str,
    scope: ResourceScope,
    map: F,
) -> Result<Vec<T>, DatabaseError>
where
    F: FnMut(&Row<'_>) -> Result<T, rusqlite::Error>,
{
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map(params![scope.script_id, scope.project_id], map)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Resource counts grouped by one column, largest group first.
pub fn counts_by(
    db: &Database,
    dimension: Dimension,
    scope: ResourceScope,
) -> Result<Vec<CountRow>, DatabaseError> {
    let sql = format!(
        "SELECT {col} AS key, COUNT(*) AS count {from} GROUP BY {col} ORDER BY count DESC, key",
        col = dimension.column(),
        from = SCOPED_FROM
    );
    db.with_conn(|conn| {
        query_scoped(conn, &sql, scope, |row| {
            Ok(CountRow {
                key: row.get("key")?,
                count: row.get("count")?,
            })
        })
    })
}

pub fn budget_totals(db: &Database, scope: ResourceScope) -> Result<BudgetTotals, DatabaseError> {
    let sql = format!(
        "SELECT COUNT(*), COALESCE(SUM(CASE WHEN r.status = 'completed' THEN 1 ELSE 0 END), 0),
         SUM(r.estimated_budget), SUM(r.actual_budget),
         AVG(r.estimated_budget), AVG(r.actual_budget) {}",
        SCOPED_FROM
    );
    db.with_conn(|conn| {
        let totals = conn.query_row(&sql, params![scope.script_id, scope.project_id], |row| {
            Ok(BudgetTotals {
                total_count: row.get(0)?,
                completed_count: row.get(1)?,
                total_estimated: row.get(2)?,
                total_actual: row.get(3)?,
                avg_estimated: row.get(4)?,
                avg_actual: row.get(5)?,
            })
        })?;
        Ok(totals)
    })
}

/// Budget sums grouped by one column, ordered by key.
pub fn costs_by(
    db: &Database,
    dimension: Dimension,
    scope: ResourceScope,
) -> Result<Vec<CostGroup>, DatabaseError> {
    let sql = format!(
        "SELECT {col} AS key, COALESCE(SUM(r.estimated_budget), 0.0) AS estimated,
         COALESCE(SUM(r.actual_budget), 0.0) AS actual, COUNT(*) AS count
         {from} GROUP BY {col} ORDER BY key",
        col = dimension.column(),
        from = SCOPED_FROM
    );
    db.with_conn(|conn| {
        query_scoped(conn, &sql, scope, |row| {
            Ok(CostGroup {
                key: row.get("key")?,
                estimated: row.get("estimated")?,
                actual: row.get("actual")?,
                count: row.get("count")?,
            })
        })
    })
}

/// Resources with a `needed_by` date, grouped by month in ascending order.
pub fn monthly(db: &Database, scope: ResourceScope) -> Result<Vec<MonthlyBucket>, DatabaseError> {
    let sql = format!(
        "SELECT substr(r.needed_by, 1, 7) AS month, COUNT(*) AS count,
         COALESCE(SUM(r.estimated_budget), 0.0) AS estimated,
         COALESCE(SUM(r.actual_budget), 0.0) AS actual
         {} AND r.needed_by IS NOT NULL
         GROUP BY month ORDER BY month",
        SCOPED_FROM
    );
    db.with_conn(|conn| {
        query_scoped(conn, &sql, scope, |row| {
            Ok(MonthlyBucket {
                month: row.get("month")?,
                count: row.get("count")?,
                estimated: row.get("estimated")?,
                actual: row.get("actual")?,
            })
        })
    })
}

/// Resources whose actual budget exceeds the estimate, largest overrun first.
pub fn over_budget(
    db: &Database,
    scope: ResourceScope,
    limit: u32,
) -> Result<Vec<OverBudgetRow>, DatabaseError> {
    let sql = format!(
        "SELECT r.id, r.name, r.type, r.estimated_budget, r.actual_budget
         {} AND r.actual_budget > r.estimated_budget
         ORDER BY (r.actual_budget - r.estimated_budget) DESC, r.id
         LIMIT {}",
        SCOPED_FROM, limit
    );
    db.with_conn(|conn| {
        query_scoped(conn, &sql, scope, |row| {
            Ok(OverBudgetRow {
                id: row.get("id")?,
                name: row.get("name")?,
                kind: row.get("type")?,
                estimated: row.get("estimated_budget")?,
                actual: row.get("actual_budget")?,
            })
        })
    })
}
