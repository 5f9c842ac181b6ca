use std::path::Path;

use chrono::Utc;
use tracing::{info_span, Instrument};

use super::{AnalysisArtifact, Orchestrator};
use crate::analysis::FullAnalysis;
use crate::db::script_repo::ScriptRow;
use crate::db::{analysis_repo, script_repo};
use crate::error::{Result, ScriptDeskError};
use crate::extractor::{read_script_text, ParsedScript};
use crate::notify::{topics, AnalysisState, NotificationKind, ResourceAction};
use crate::sanitize;
use crate::status::{MetadataDetails, ParseSummary, ScriptStatus};
use crate::storage::ArtifactKind;
use crate::synthesizer;

impl Orchestrator {
    /// Extracts structure from the stored file, replaces the scene rows and
    /// marks the script `parsed` in one transaction, then publishes the parse
    /// artifact. On failure the script goes to `error` with the message in
    /// its metadata and neither scenes nor artifact change.
    pub fn parse(&self, script_id: i64) -> Result<ParsedScript> {
        let script = self.script(script_id)?;
        let _span = info_span!(
            "parse",
            script_id,
            file = %sanitize::redact_path(Path::new(&script.file_path)),
        )
        .entered();

        script_repo::update_status(&self.db, script_id, ScriptStatus::Parsing)?;
        self.notify(
            topics::SCRIPTS,
            &script,
            NotificationKind::ScriptParse {
                script_id,
                status: ScriptStatus::Parsing,
                progress: 0.0,
                message: "Parsing started".to_string(),
            },
        );

        match self.parse_steps(&script) {
            Ok(parsed) => {
                log::info!(
                    "Parsed script {}: {} scenes, {} characters, {} resources",
                    script_id,
                    parsed.total_scenes(),
                    parsed.total_characters(),
                    parsed.total_resources()
                );
                self.notify(
                    topics::SCRIPTS,
                    &script,
                    NotificationKind::ScriptParse {
                        script_id,
                        status: ScriptStatus::Parsed,
                        progress: 1.0,
                        message: "Parsing completed".to_string(),
                    },
                );
                Ok(parsed)
            }
            Err(e) => {
                let message = e.to_string();
                log::error!("Parsing script {} failed: {}", script_id, message);

                let metadata = script.metadata.clone().with_details(MetadataDetails::Failed {
                    error: message.clone(),
                    failed_at: Utc::now(),
                });
                if let Err(db_err) = script_repo::update_status_and_metadata(
                    &self.db,
                    script_id,
                    ScriptStatus::Error,
                    &metadata,
                ) {
                    log::error!("Failed to record parse error for script {}: {}", script_id, db_err);
                }

                self.notify(
                    topics::SCRIPTS,
                    &script,
                    NotificationKind::ScriptParse {
                        script_id,
                        status: ScriptStatus::Error,
                        progress: 0.0,
                        message: message.clone(),
                    },
                );
                self.notify_error("parse", &script, &message);
                Err(e)
            }
        }
    }

    fn parse_steps(&self, script: &ScriptRow) -> Result<ParsedScript> {
        let (text, parsed) = {
            let _step = info_span!("extract").entered();
            let text = read_script_text(Path::new(&script.file_path))?;
            let parsed = self.extractor.extract(&text);
            (text, parsed)
        };

        let staged = {
            let _step = info_span!("stage_artifact").entered();
            self.artifacts.stage(ArtifactKind::Parse, script.id, &parsed)?
        };

        {
            let _step = info_span!("store_parse").entered();
            let summary = ParseSummary {
                parsed_at: parsed.parsed_at,
                title: parsed.metadata.title.clone(),
                author: parsed.metadata.author.clone(),
                total_scenes: parsed.total_scenes(),
                total_characters: parsed.total_characters(),
                total_resources: parsed.total_resources(),
            };
            let metadata = script
                .metadata
                .clone()
                .with_details(MetadataDetails::Parsed(summary));
            let title = Some(parsed.metadata.title.as_str()).filter(|t| !t.is_empty());
            let stored = script_repo::record_parse(
                &self.db,
                script.id,
                title,
                &text,
                &metadata,
                &parsed.scenes,
            )?;
            if !stored {
                return Err(ScriptDeskError::not_found("script", script.id));
            }
        }

        {
            let _step = info_span!("publish_artifact").entered();
            if let Err(e) = staged.commit() {
                log::error!("Parse result of script {} not written: {}", script.id, e);
                // An older artifact must not stand in for this parse.
                if let Err(e) = self.artifacts.remove(ArtifactKind::Parse, script.id) {
                    log::warn!("Failed to drop stale parse result of script {}: {}", script.id, e);
                }
            }
        }

        Ok(parsed)
    }

    /// Runs a full analysis for an existing analysis row.
    ///
    /// Parses first when no parse artifact exists. On success the row gets
    /// the three documents, resources are synthesized and the script becomes
    /// `completed` in one transaction, after which the analysis artifact is
    /// written. On failure only the row's `error` is written, and a script
    /// this run left in `generating` returns to the status it had before.
    pub async fn run_analysis(&self, script_id: i64, analysis_id: i64) -> Result<FullAnalysis> {
        let span = info_span!("analysis", script_id, analysis_id);
        self.run_analysis_inner(script_id, analysis_id)
            .instrument(span)
            .await
    }

    async fn run_analysis_inner(&self, script_id: i64, analysis_id: i64) -> Result<FullAnalysis> {
        let script = self.script(script_id)?;

        let parsed = match self.load_or_parse(&script) {
            Ok(parsed) => parsed,
            Err(e) => {
                self.fail_analysis(&script, analysis_id, &e.to_string(), None);
                return Err(e);
            }
        };

        // A concurrent run may already have the script in `generating`.
        let before = self.current_status(&script);
        let restore_to = if before.is_busy() {
            ScriptStatus::Parsed
        } else {
            before
        };

        if let Err(e) = script_repo::update_status(&self.db, script_id, ScriptStatus::Generating) {
            let e = ScriptDeskError::from(e);
            self.fail_analysis(&script, analysis_id, &e.to_string(), None);
            return Err(e);
        }
        self.notify(
            topics::ANALYSIS,
            &script,
            NotificationKind::ScriptAnalysis {
                script_id,
                analysis_id,
                status: AnalysisState::Started,
                progress: 0.0,
                message: "Analysis started".to_string(),
            },
        );

        let full = match self.analysis.full(&parsed).await {
            Ok(full) => full,
            Err(e) => {
                if let Some(raw) = e.raw_response() {
                    log::debug!("Unusable reply for analysis {}: {}", analysis_id, raw);
                }
                self.fail_analysis(&script, analysis_id, &e.to_string(), Some(restore_to));
                return Err(e.into());
            }
        };

        if let Err(e) = self.finish_analysis(&script, analysis_id, &full) {
            self.fail_analysis(&script, analysis_id, &e.to_string(), Some(restore_to));
            return Err(e);
        }

        Ok(full)
    }

    fn finish_analysis(
        &self,
        script: &ScriptRow,
        analysis_id: i64,
        full: &FullAnalysis,
    ) -> Result<()> {
        let staged = self.artifacts.stage(
            ArtifactKind::Analysis,
            script.id,
            &AnalysisArtifact {
                script_id: script.id,
                analysis_id,
                analyzed_at: Utc::now(),
                analysis: full.clone(),
            },
        )?;

        let created = self.db.with_conn(|conn| {
            let tx = conn.unchecked_transaction()?;
            let written = analysis_repo::complete_on(
                &tx,
                analysis_id,
                &full.character_analysis,
                &full.resource_analysis,
                &full.scene_analysis,
            )?;
            if !written {
                return Ok(None);
            }
            let created = synthesizer::synthesize_on(&tx, script.id, &full.resource_analysis)?;
            script_repo::update_status_on(&tx, script.id, ScriptStatus::Completed)?;
            tx.commit()?;
            Ok(Some(created))
        })?;
        let Some(created) = created else {
            return Err(ScriptDeskError::AlreadySettled {
                entity: "analysis",
                id: analysis_id,
            });
        };

        if let Err(e) = staged.commit() {
            log::error!("Analysis {} stored but its result file was not written: {}", analysis_id, e);
            self.notify_error("analysis_artifact", script, &e.to_string());
        }

        log::info!(
            "Analysis {} of script {} completed, {} new resources",
            analysis_id,
            script.id,
            created.len()
        );
        self.notify(
            topics::ANALYSIS,
            script,
            NotificationKind::ScriptAnalysis {
                script_id: script.id,
                analysis_id,
                status: AnalysisState::Completed,
                progress: 1.0,
                message: "Analysis completed".to_string(),
            },
        );
        if !created.is_empty() {
            self.notify(
                topics::SCRIPTS,
                script,
                NotificationKind::ResourceUpdate {
                    script_id: script.id,
                    resource_id: None,
                    action: ResourceAction::Synthesized,
                    count: created.len(),
                    message: format!("{} resources created from analysis", created.len()),
                },
            );
        }
        Ok(())
    }

    /// Records `message` on the analysis row. With `restore_to`, a script
    /// still in `generating` goes back to that status; any status another
    /// run has settled in the meantime is left alone.
    fn fail_analysis(
        &self,
        script: &ScriptRow,
        analysis_id: i64,
        message: &str,
        restore_to: Option<ScriptStatus>,
    ) {
        log::error!("Analysis {} of script {} failed: {}", analysis_id, script.id, message);

        match analysis_repo::fail(&self.db, analysis_id, message) {
            Ok(false) => log::warn!("Analysis {} was already settled", analysis_id),
            Ok(true) => {}
            Err(e) => log::error!("Failed to record error on analysis {}: {}", analysis_id, e),
        }
        if let Some(restore_to) = restore_to {
            match script_repo::transition_status(
                &self.db,
                script.id,
                ScriptStatus::Generating,
                restore_to,
            ) {
                Ok(true) => {}
                Ok(false) => log::debug!("Script {} status already settled", script.id),
                Err(e) => log::error!("Failed to restore status of script {}: {}", script.id, e),
            }
        }

        self.notify(
            topics::ANALYSIS,
            script,
            NotificationKind::ScriptAnalysis {
                script_id: script.id,
                analysis_id,
                status: AnalysisState::Failed,
                progress: 0.0,
                message: message.to_string(),
            },
        );
        self.notify_error("analysis", script, message);
    }

    /// Uses the stored parse artifact, parsing again when it is missing or
    /// unreadable.
    fn load_or_parse(&self, script: &ScriptRow) -> Result<ParsedScript> {
        match self.artifacts.read::<ParsedScript>(ArtifactKind::Parse, script.id) {
            Ok(Some(parsed)) => Ok(parsed),
            Ok(None) => {
                log::info!("No parse result for script {}, parsing first", script.id);
                self.parse(script.id)
            }
            Err(e) => {
                log::warn!("Unreadable parse result for script {}, re-parsing: {}", script.id, e);
                self.parse(script.id)
            }
        }
    }

    fn current_status(&self, script: &ScriptRow) -> ScriptStatus {
        script_repo::find_by_id(&self.db, script.id)
            .ok()
            .flatten()
            .map(|s| s.status)
            .unwrap_or(script.status)
    }
}
