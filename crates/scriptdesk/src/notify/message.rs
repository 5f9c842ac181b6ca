//! Notification payloads.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::status::ScriptStatus;

/// Progress of one analysis run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisState {
    Started,
    Completed,
    Failed,
}

/// What happened to a resource.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ResourceAction {
    Created,
    Updated,
    Deleted,
    /// Resources derived from an analysis.
    Synthesized,
}

impl ResourceAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceAction::Created => "created",
            ResourceAction::Updated => "updated",
            ResourceAction::Deleted => "deleted",
            ResourceAction::Synthesized => "synthesized",
        }
    }
}

/// Type-specific part of a notification. Serializes with a `type` tag.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NotificationKind {
    ScriptUpload {
        script_id: i64,
        status: ScriptStatus,
        message: String,
    },
    ScriptParse {
        script_id: i64,
        status: ScriptStatus,
        progress: f32,
        message: String,
    },
    ScriptAnalysis {
        script_id: i64,
        analysis_id: i64,
        status: AnalysisState,
        progress: f32,
        message: String,
    },
    ProjectUpdate {
        project_id: i64,
        update_type: String,
        message: String,
    },
    ResourceUpdate {
        script_id: i64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        resource_id: Option<i64>,
        action: ResourceAction,
        count: usize,
        message: String,
    },
    Error {
        error_type: String,
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        details: Option<serde_json::Value>,
    },
}

/// A message delivered to topic subscribers:
/// `{"id": .., "timestamp": .., "type": .., ...fields}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Notification {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub kind: NotificationKind,
}

impl Notification {
    pub fn new(kind: NotificationKind) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            kind,
        }
    }

    /// The `type` tag value.
    pub fn type_name(&self) -> &'static str {
        match self.kind {
            NotificationKind::ScriptUpload { .. } => "script_upload",
            NotificationKind::ScriptParse { .. } => "script_parse",
            NotificationKind::ScriptAnalysis { .. } => "script_analysis",
            NotificationKind::ProjectUpdate { .. } => "project_update",
            NotificationKind::ResourceUpdate { .. } => "resource_update",
            NotificationKind::Error { .. } => "error",
        }
    }

    pub fn error(
        error_type: impl Into<String>,
        message: impl Into<String>,
        details: Option<serde_json::Value>,
    ) -> Self {
        Self::new(NotificationKind::Error {
            error_type: error_type.into(),
            message: message.into(),
            details,
        })
    }
}
