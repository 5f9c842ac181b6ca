//! Script lifecycle status and the versioned metadata stored alongside it.

use std::collections::BTreeMap;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Processing state of a script.
///
/// `Uploading → Parsing → Parsed → Generating → Completed`, with `Error`
/// reachable from `Parsing` when extraction fails.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ScriptStatus {
    Uploading,
    Parsing,
    Parsed,
    Generating,
    Completed,
    Error,
}

impl ScriptStatus {
    pub const ALL: [ScriptStatus; 6] = [
        ScriptStatus::Uploading,
        ScriptStatus::Parsing,
        ScriptStatus::Parsed,
        ScriptStatus::Generating,
        ScriptStatus::Completed,
        ScriptStatus::Error,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ScriptStatus::Uploading => "uploading",
            ScriptStatus::Parsing => "parsing",
            ScriptStatus::Parsed => "parsed",
            ScriptStatus::Generating => "generating",
            ScriptStatus::Completed => "completed",
            ScriptStatus::Error => "error",
        }
    }

    /// True while a background step owns the script.
    pub fn is_busy(&self) -> bool {
        matches!(self, ScriptStatus::Parsing | ScriptStatus::Generating)
    }
}

impl std::fmt::Display for ScriptStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ScriptStatus {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ScriptStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| ValidationError::UnknownValue {
                kind: "script status",
                value: s.to_string(),
            })
    }
}

pub const METADATA_VERSION: u32 = 1;

/// Typed metadata for a script row.
///
/// Known fields live in `details`; anything a newer writer adds that this
/// version does not know about is kept in `extra` so it survives a
/// read-modify-write cycle.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScriptMetadata {
    pub version: u32,
    #[serde(flatten)]
    pub details: MetadataDetails,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MetadataDetails {
    Empty,
    Parsed(ParseSummary),
    Failed { error: String, failed_at: DateTime<Utc> },
}

/// Summary counts written after a successful parse.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ParseSummary {
    pub parsed_at: DateTime<Utc>,
    pub title: String,
    #[serde(default)]
    pub author: Option<String>,
    pub total_scenes: usize,
    pub total_characters: usize,
    pub total_resources: usize,
}

impl Default for ScriptMetadata {
    fn default() -> Self {
        Self {
            version: METADATA_VERSION,
            details: MetadataDetails::Empty,
            extra: BTreeMap::new(),
        }
    }
}

impl ScriptMetadata {
    pub fn parsed(summary: ParseSummary) -> Self {
        Self {
            details: MetadataDetails::Parsed(summary),
            ..Self::default()
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            details: MetadataDetails::Failed {
                error: error.into(),
                failed_at: Utc::now(),
            },
            ..Self::default()
        }
    }

    /// Replaces the details while keeping unknown fields.
    pub fn with_details(mut self, details: MetadataDetails) -> Self {
        self.details = details;
        self
    }

    pub fn summary(&self) -> Option<&ParseSummary> {
        match &self.details {
            MetadataDetails::Parsed(summary) => Some(summary),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match &self.details {
            MetadataDetails::Failed { error, .. } => Some(error),
            _ => None,
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Reads stored metadata. Rows written before metadata existed, or with
    /// an unreadable document, come back as `Empty` with the raw text kept
    /// under `extra["unparsed"]`.
    pub fn from_json(raw: Option<&str>) -> Self {
        let Some(raw) = raw.filter(|r| !r.trim().is_empty()) else {
            return Self::default();
        };
        match serde_json::from_str::<ScriptMetadata>(raw) {
            Ok(metadata) => metadata,
            Err(e) => {
                log::warn!("Unreadable script metadata, keeping raw value: {}", e);
                let mut metadata = Self::default();
                metadata.extra.insert(
                    "unparsed".to_string(),
                    serde_json::Value::String(raw.to_string()),
                );
                metadata
            }
        }
    }
}
