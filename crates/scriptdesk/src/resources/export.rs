//! Resource and statistics exports in a fixed set of text formats.

use std::fmt;
use std::str::FromStr;

use serde::Serialize;
use serde_json::Value;

use super::stats::{CostAnalysis, ResourceStatistics};
use crate::db::resource_repo::ResourceRow;
use crate::error::{Result, ValidationError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExportFormat {
    #[default]
    Csv,
    Json,
    Jsonl,
}

impl ExportFormat {
    pub const ALL: [ExportFormat; 3] = [ExportFormat::Csv, ExportFormat::Json, ExportFormat::Jsonl];

    pub fn as_str(&self) -> &'static str {
        match self {
            ExportFormat::Csv => "csv",
            ExportFormat::Json => "json",
            ExportFormat::Jsonl => "jsonl",
        }
    }

    pub fn extension(&self) -> &'static str {
        self.as_str()
    }

    pub fn mime_type(&self) -> &'static str {
        match self {
            ExportFormat::Csv => "text/csv",
            ExportFormat::Json => "application/json",
            ExportFormat::Jsonl => "application/x-ndjson",
        }
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExportFormat {
    type Err = ValidationError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        ExportFormat::ALL
            .into_iter()
            .find(|format| format.as_str() == wanted)
            .ok_or_else(|| ValidationError::UnknownValue {
                kind: "export format",
                value: s.to_string(),
            })
    }
}

const RESOURCE_COLUMNS: [&str; 15] = [
    "id",
    "script_id",
    "scene_number",
    "name",
    "type",
    "description",
    "status",
    "priority",
    "estimated_budget",
    "actual_budget",
    "responsible_person",
    "notes",
    "needed_by",
    "created_at",
    "updated_at",
];

/// Quotes a CSV field when it contains a delimiter, quote or line break.
fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

fn csv_line<I, S>(fields: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut line = fields
        .into_iter()
        .map(|f| csv_field(f.as_ref()))
        .collect::<Vec<_>>()
        .join(",");
    line.push('\n');
    line
}

fn opt<T: ToString>(value: &Option<T>) -> String {
    value.as_ref().map(ToString::to_string).unwrap_or_default()
}

fn resource_csv(rows: &[ResourceRow]) -> String {
    let mut csv = csv_line(RESOURCE_COLUMNS);
    for r in rows {
        csv.push_str(&csv_line([
            r.id.to_string(),
            r.script_id.to_string(),
            opt(&r.scene_number),
            r.name.clone(),
            r.kind.clone(),
            opt(&r.description),
            r.status.to_string(),
            r.priority.to_string(),
            opt(&r.estimated_budget),
            opt(&r.actual_budget),
            opt(&r.responsible_person),
            opt(&r.notes),
            opt(&r.needed_by),
            r.created_at.clone(),
            r.updated_at.clone(),
        ]));
    }
    csv
}

fn scalar(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

// Flattens nested objects into dotted keys; arrays are indexed.
fn flatten(prefix: &str, value: &Value, out: &mut Vec<(String, String)>) {
    let join = |key: &str| {
        if prefix.is_empty() {
            key.to_string()
        } else {
            format!("{}.{}", prefix, key)
        }
    };
    match value {
        Value::Object(map) => {
            for (key, value) in map {
                flatten(&join(key), value, out);
            }
        }
        Value::Array(items) => {
            for (i, value) in items.iter().enumerate() {
                flatten(&join(&i.to_string()), value, out);
            }
        }
        other => out.push((prefix.to_string(), scalar(other))),
    }
}

/// Report as two-column `metric,value` CSV, one line per leaf value.
fn report_csv<T: Serialize>(report: &T) -> Result<String> {
    let mut pairs = Vec::new();
    flatten("", &serde_json::to_value(report)?, &mut pairs);

    let mut csv = csv_line(["metric", "value"]);
    for (metric, value) in pairs {
        csv.push_str(&csv_line([metric, value]));
    }
    Ok(csv)
}

/// Report as JSON lines, one line per top-level section:
/// `{"section": ..., "data": ...}`.
fn report_jsonl<T: Serialize>(report: &T) -> Result<String> {
    let Value::Object(sections) = serde_json::to_value(report)? else {
        return Ok(String::new());
    };
    let mut out = String::new();
    for (section, data) in sections {
        out.push_str(&serde_json::to_string(
            &serde_json::json!({ "section": section, "data": data }),
        )?);
        out.push('\n');
    }
    Ok(out)
}

fn report<T: Serialize>(report: &T, format: ExportFormat) -> Result<String> {
    match format {
        ExportFormat::Csv => report_csv(report),
        ExportFormat::Json => Ok(serde_json::to_string_pretty(report)?),
        ExportFormat::Jsonl => report_jsonl(report),
    }
}

pub fn export_resources(rows: &[ResourceRow], format: ExportFormat) -> Result<String> {
    match format {
        ExportFormat::Csv => Ok(resource_csv(rows)),
        ExportFormat::Json => Ok(serde_json::to_string_pretty(rows)?),
        ExportFormat::Jsonl => {
            let mut out = String::new();
            for row in rows {
                out.push_str(&serde_json::to_string(row)?);
                out.push('\n');
            }
            Ok(out)
        }
    }
}

pub fn export_statistics(stats: &ResourceStatistics, format: ExportFormat) -> Result<String> {
    report(stats, format)
}

pub fn export_cost_analysis(costs: &CostAnalysis, format: ExportFormat) -> Result<String> {
    report(costs, format)
}
