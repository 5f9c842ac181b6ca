//! Drives a script from upload through parsing and analysis.
//!
//! Request-time calls (`upload`, `analyze`, the queries) run synchronously
//! and return errors directly. `trigger_parse` / `trigger_analyze` hand the
//! heavy work to the Tokio runtime and return at once; failures in that
//! background work are recorded on the script or analysis row, logged, and
//! published on the `errors` topic.

mod steps;

use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;

use crate::analysis::{AnalysisClient, FullAnalysis, LlmBackend};
use crate::config::Settings;
use crate::db::analysis_repo::{self, AnalysisRow};
use crate::db::scene_repo::{self, SceneRow};
use crate::db::script_repo::{self, NewScript, ScriptFilter, ScriptRow};
use crate::db::{project_repo, Database};
use crate::error::{Result, ScriptDeskError};
use crate::extractor::{ParsedScript, PatternExtractor, ScriptExtractor};
use crate::notify::{topics, Notification, NotificationHub, NotificationKind};
use crate::storage::{ArtifactKind, ArtifactStore, UploadStore};
use crate::synthesizer;

/// Acknowledgement returned by the trigger calls.
///
/// Dropping `task` detaches the background work; awaiting it waits for the
/// outcome to be recorded.
#[derive(Debug)]
pub struct Accepted {
    pub script_id: i64,
    pub analysis_id: Option<i64>,
    pub task: JoinHandle<()>,
}

/// Document written to `analysis_results/script_{id}_analysis.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisArtifact {
    pub script_id: i64,
    pub analysis_id: i64,
    pub analyzed_at: DateTime<Utc>,
    #[serde(flatten)]
    pub analysis: FullAnalysis,
}

#[derive(Clone)]
pub struct Orchestrator {
    db: Database,
    extractor: Arc<dyn ScriptExtractor>,
    analysis: AnalysisClient,
    uploads: Arc<UploadStore>,
    artifacts: ArtifactStore,
    hub: NotificationHub,
}

impl Orchestrator {
    pub fn new(
        db: Database,
        extractor: Arc<dyn ScriptExtractor>,
        analysis: AnalysisClient,
        uploads: UploadStore,
        artifacts: ArtifactStore,
        hub: NotificationHub,
    ) -> Self {
        Self {
            db,
            extractor,
            analysis,
            uploads: Arc::new(uploads),
            artifacts,
            hub,
        }
    }

    /// Production wiring: pattern extractor, stores under the configured
    /// storage root, retry policy from settings.
    pub fn from_settings(
        settings: &Settings,
        db: Database,
        backend: Arc<dyn LlmBackend>,
        hub: NotificationHub,
    ) -> Self {
        let root = settings.storage.root_path();
        Self::new(
            db,
            Arc::new(PatternExtractor::new()),
            AnalysisClient::new(backend, settings.retry.to_policy()),
            UploadStore::under_root(&root, &settings.upload),
            ArtifactStore::new(&root),
            hub,
        )
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn hub(&self) -> &NotificationHub {
        &self.hub
    }

    pub fn artifacts(&self) -> &ArtifactStore {
        &self.artifacts
    }

    /// Validates and stores an uploaded file and creates its script row in
    /// `uploading` state. Parsing is a separate step.
    pub fn upload(
        &self,
        filename: &str,
        content: &[u8],
        project_id: Option<i64>,
    ) -> Result<ScriptRow> {
        if let Some(project_id) = project_id {
            project_repo::find_by_id(&self.db, project_id)?
                .ok_or_else(|| ScriptDeskError::not_found("project", project_id))?;
        }

        let stored = self.uploads.store(filename, content)?;
        let new = NewScript {
            project_id,
            title: stored.filename.clone(),
            filename: stored.filename.clone(),
            file_path: stored.path.to_string_lossy().into_owned(),
            mime_type: stored.mime_type.clone(),
        };
        let script = match script_repo::insert(&self.db, &new) {
            Ok(script) => script,
            Err(e) => {
                if let Err(cleanup) = self.uploads.remove(&stored.path) {
                    log::warn!("Failed to remove orphaned upload: {}", cleanup);
                }
                return Err(e.into());
            }
        };

        log::info!("Script {} uploaded ({} bytes)", script.id, stored.size);
        self.notify(
            topics::SCRIPTS,
            &script,
            NotificationKind::ScriptUpload {
                script_id: script.id,
                status: script.status,
                message: format!("Uploaded {}", script.filename),
            },
        );
        Ok(script)
    }

    /// Creates a new, empty analysis row and returns its id. Each call gets
    /// its own row; concurrent calls for one script are independent.
    pub fn analyze(&self, script_id: i64) -> Result<i64> {
        self.script(script_id)?;
        let analysis_id = analysis_repo::insert_pending(&self.db, script_id)?;
        log::info!("Analysis {} created for script {}", analysis_id, script_id);
        Ok(analysis_id)
    }

    /// Runs `parse` on the blocking pool. Must be called within a Tokio runtime.
    pub fn trigger_parse(&self, script_id: i64) -> Result<Accepted> {
        self.script(script_id)?;
        let this = self.clone();
        let task = tokio::task::spawn_blocking(move || {
            if let Err(e) = this.parse(script_id) {
                log::warn!("Background parse of script {} failed: {}", script_id, e);
            }
        });
        Ok(Accepted {
            script_id,
            analysis_id: None,
            task,
        })
    }

    /// Creates the analysis row now and runs the analysis in the background.
    /// Must be called within a Tokio runtime.
    pub fn trigger_analyze(&self, script_id: i64) -> Result<Accepted> {
        let analysis_id = self.analyze(script_id)?;
        let this = self.clone();
        let task = tokio::spawn(async move {
            if let Err(e) = this.run_analysis(script_id, analysis_id).await {
                log::warn!(
                    "Background analysis {} of script {} failed: {}",
                    analysis_id,
                    script_id,
                    e
                );
            }
        });
        Ok(Accepted {
            script_id,
            analysis_id: Some(analysis_id),
            task,
        })
    }

    /// Deletes the script row (scenes, resources and analyses cascade) and
    /// its upload and artifact files.
    pub fn delete_script(&self, script_id: i64) -> Result<()> {
        let script = self.script(script_id)?;
        script_repo::delete(&self.db, script_id)?;

        if let Err(e) = self.uploads.remove(Path::new(&script.file_path)) {
            log::warn!("Failed to remove upload of script {}: {}", script_id, e);
        }
        if let Err(e) = self.artifacts.remove_all(script_id) {
            log::warn!("Failed to remove artifacts of script {}: {}", script_id, e);
        }

        log::info!("Script {} deleted", script_id);
        Ok(())
    }

    pub fn script(&self, script_id: i64) -> Result<ScriptRow> {
        script_repo::find_by_id(&self.db, script_id)?
            .ok_or_else(|| ScriptDeskError::not_found("script", script_id))
    }

    pub fn scripts(&self, filter: &ScriptFilter) -> Result<(Vec<ScriptRow>, u64)> {
        Ok(script_repo::query(&self.db, filter)?)
    }

    pub fn scenes(&self, script_id: i64) -> Result<Vec<SceneRow>> {
        self.script(script_id)?;
        Ok(scene_repo::list_for_script(&self.db, script_id)?)
    }

    /// The stored parse output. `NotFound` if the script was never parsed.
    pub fn parsed_script(&self, script_id: i64) -> Result<ParsedScript> {
        self.artifacts
            .read::<ParsedScript>(ArtifactKind::Parse, script_id)?
            .ok_or_else(|| ScriptDeskError::not_found("parse result", script_id))
    }

    /// All analyses of a script, newest first. `NotFound` if there are none.
    pub fn analyses(&self, script_id: i64) -> Result<Vec<AnalysisRow>> {
        let rows = analysis_repo::list_for_script(&self.db, script_id)?;
        if rows.is_empty() {
            return Err(ScriptDeskError::not_found("analysis for script", script_id));
        }
        Ok(rows)
    }

    pub fn latest_analysis(&self, script_id: i64) -> Result<AnalysisRow> {
        analysis_repo::latest_for_script(&self.db, script_id)?
            .ok_or_else(|| ScriptDeskError::not_found("analysis for script", script_id))
    }

    /// Moves existing resources to the first appearances reported by the
    /// newest successful analysis. Returns the number of resources changed.
    pub fn refresh_scene_numbers(&self, script_id: i64) -> Result<usize> {
        let latest = analysis_repo::list_for_script(&self.db, script_id)?
            .into_iter()
            .find_map(|row| row.resource_analysis)
            .ok_or_else(|| {
                ScriptDeskError::not_found("completed analysis for script", script_id)
            })?;
        let updated = synthesizer::refresh_scene_numbers(&self.db, script_id, &latest)?;
        log::info!(
            "Refreshed scene numbers of {} resources for script {}",
            updated,
            script_id
        );
        Ok(updated)
    }

    /// Publishes on `base`, `script_{id}` and, for scripts in a project,
    /// `project_{id}`.
    fn notify(&self, base: &str, script: &ScriptRow, kind: NotificationKind) {
        let mut targets = vec![base.to_string(), topics::script(script.id)];
        if let Some(project_id) = script.project_id {
            targets.push(topics::project(project_id));
        }
        self.hub.publish_to(&targets, kind);
    }

    fn notify_error(&self, error_type: &str, script: &ScriptRow, message: &str) {
        let notification = Notification::error(
            error_type,
            message,
            Some(serde_json::json!({ "script_id": script.id })),
        );
        self.hub.publish(topics::ERRORS, notification.clone());
        self.hub.publish(&topics::script(script.id), notification);
    }
}
