//! Projects group scripts for reporting.
//!
//! Besides CRUD a project carries a free-form progress note and rolls up
//! the scenes and resources of its scripts.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::db::project_repo::{self, NewProject, ProjectRow};
use crate::db::stats_repo::{self, Dimension, ResourceScope};
use crate::db::script_repo::ScriptRow;
use crate::db::{now_timestamp, resource_repo, scene_repo, script_repo, Database};
use crate::error::{Result, ScriptDeskError, ValidationError};
use crate::notify::{topics, NotificationHub, NotificationKind};
use crate::resources::service::{check_date, explicit};

/// Partial project update; `Some(None)` clears a nullable field.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ProjectPatch {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default, deserialize_with = "explicit")]
    pub description: Option<Option<String>>,
    #[serde(default, deserialize_with = "explicit")]
    pub start_date: Option<Option<String>>,
    #[serde(default, deserialize_with = "explicit")]
    pub end_date: Option<Option<String>>,
}

/// Where production stands. Every field is optional free text.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProjectProgress {
    #[serde(default)]
    pub current_scene: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

/// Scene counts read from `INT.`/`EXT.` headings such as `INT. BANK - NIGHT`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SceneBreakdown {
    pub interior: u64,
    pub exterior: u64,
    pub day: u64,
    pub night: u64,
    /// Distinct, sorted.
    pub locations: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SceneTotals {
    pub total: u64,
    pub breakdown: SceneBreakdown,
}

const DAY_WORDS: &[&str] = &["DAY", "MORNING", "AFTERNOON"];
const NIGHT_WORDS: &[&str] = &["NIGHT", "EVENING"];

impl SceneTotals {
    fn tally<'a>(headings: impl IntoIterator<Item = &'a str>) -> Self {
        let mut totals = Self::default();
        let mut locations = BTreeSet::new();

        for heading in headings {
            totals.total += 1;
            let heading = heading.trim();
            let Some(prefix) = heading.get(..4) else {
                continue;
            };
            let breakdown = &mut totals.breakdown;
            if prefix.eq_ignore_ascii_case("INT.") {
                breakdown.interior += 1;
            } else if prefix.eq_ignore_ascii_case("EXT.") {
                breakdown.exterior += 1;
            } else {
                continue;
            }

            let rest = &heading[4..];
            let (place, time) = rest.rsplit_once(" - ").unwrap_or((rest, ""));
            let time = time.to_ascii_uppercase();
            if DAY_WORDS.iter().any(|w| time.contains(w)) {
                breakdown.day += 1;
            } else if NIGHT_WORDS.iter().any(|w| time.contains(w)) {
                breakdown.night += 1;
            }
            let place = place.trim();
            if !place.is_empty() {
                locations.insert(place.to_string());
            }
        }

        totals.breakdown.locations = locations.into_iter().collect();
        totals
    }
}

/// Script progress and resource mix of one project.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProjectOverview {
    pub project: ProjectRow,
    pub progress: ProjectProgress,
    pub total_scripts: u64,
    pub scripts_by_status: BTreeMap<String, u64>,
    pub scenes: SceneTotals,
    pub total_resources: u64,
    pub resources_by_type: BTreeMap<String, u64>,
}

/// One entry of [`ResourceRequirements`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RequiredResource {
    pub script_id: i64,
    pub scene_number: Option<u32>,
    pub name: String,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RequirementStatistics {
    pub total: u64,
    pub by_type: BTreeMap<String, u64>,
}

/// Resources a project needs, grouped by resource type.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ResourceRequirements {
    pub resources: BTreeMap<String, Vec<RequiredResource>>,
    pub statistics: RequirementStatistics,
}

fn check_project(
    name: &str,
    start_date: Option<&str>,
    end_date: Option<&str>,
) -> std::result::Result<(), ValidationError> {
    if name.trim().is_empty() {
        return Err(ValidationError::EmptyField { field: "name" });
    }
    check_date("start_date", start_date)?;
    check_date("end_date", end_date)?;
    // ISO dates compare correctly as strings
    if let (Some(start), Some(end)) = (start_date, end_date) {
        if end < start {
            return Err(ValidationError::InvalidField {
                field: "end_date",
                reason: format!("{} is before start date {}", end, start),
            });
        }
    }
    Ok(())
}

#[derive(Clone)]
pub struct ProjectService {
    db: Database,
    hub: NotificationHub,
}

impl ProjectService {
    pub fn new(db: Database, hub: NotificationHub) -> Self {
        Self { db, hub }
    }

    pub fn create(&self, new: NewProject) -> Result<ProjectRow> {
        let new = NewProject {
            name: new.name.trim().to_string(),
            ..new
        };
        check_project(&new.name, new.start_date.as_deref(), new.end_date.as_deref())?;

        let project = project_repo::insert(&self.db, &new)?;
        log::info!("Created project {} '{}'", project.id, project.name);
        self.notify(project.id, "created", format!("Project '{}' created", project.name));
        Ok(project)
    }

    pub fn get(&self, id: i64) -> Result<ProjectRow> {
        project_repo::find_by_id(&self.db, id)?
            .ok_or_else(|| ScriptDeskError::not_found("project", id))
    }

    /// Newest first.
    pub fn list(&self) -> Result<Vec<ProjectRow>> {
        Ok(project_repo::list(&self.db)?)
    }

    pub fn update(&self, id: i64, patch: ProjectPatch) -> Result<ProjectRow> {
        let mut project = self.get(id)?;
        if patch == ProjectPatch::default() {
            return Ok(project);
        }
        if let Some(name) = patch.name {
            project.name = name.trim().to_string();
        }
        if let Some(description) = patch.description {
            project.description = description;
        }
        if let Some(start_date) = patch.start_date {
            project.start_date = start_date;
        }
        if let Some(end_date) = patch.end_date {
            project.end_date = end_date;
        }
        check_project(
            &project.name,
            project.start_date.as_deref(),
            project.end_date.as_deref(),
        )?;
        project.updated_at = now_timestamp();

        if !project_repo::update(&self.db, &project)? {
            return Err(ScriptDeskError::not_found("project", id));
        }
        self.notify(id, "updated", format!("Project '{}' updated", project.name));
        Ok(project)
    }

    /// Scripts of a deleted project stay, detached from it.
    pub fn delete(&self, id: i64) -> Result<()> {
        let project = self.get(id)?;
        if !project_repo::delete(&self.db, id)? {
            return Err(ScriptDeskError::not_found("project", id));
        }
        log::info!("Deleted project {} '{}'", id, project.name);
        self.notify(id, "deleted", format!("Project '{}' deleted", project.name));
        Ok(())
    }

    /// Moves a script into this project, detaching it from any other.
    pub fn assign_script(&self, project_id: i64, script_id: i64) -> Result<ScriptRow> {
        let project = self.get(project_id)?;
        if !script_repo::set_project(&self.db, script_id, Some(project_id))? {
            return Err(ScriptDeskError::not_found("script", script_id));
        }
        let script = script_repo::find_by_id(&self.db, script_id)?
            .ok_or_else(|| ScriptDeskError::not_found("script", script_id))?;

        log::info!("Assigned script {} to project {}", script_id, project_id);
        self.notify(
            project_id,
            "script_assigned",
            format!("Script '{}' added to '{}'", script.filename, project.name),
        );
        Ok(script)
    }

    /// Scripts of a project, oldest first.
    pub fn scripts(&self, project_id: i64) -> Result<Vec<ScriptRow>> {
        self.get(project_id)?;
        Ok(script_repo::list_for_project(&self.db, project_id)?)
    }

    /// Empty progress when none was ever recorded.
    pub fn progress(&self, project_id: i64) -> Result<ProjectProgress> {
        self.get(project_id)?;
        match project_repo::progress(&self.db, project_id)? {
            Some(value) => Ok(serde_json::from_value(value)?),
            None => Ok(ProjectProgress::default()),
        }
    }

    /// Replaces the stored progress as a whole.
    pub fn update_progress(
        &self,
        project_id: i64,
        progress: ProjectProgress,
    ) -> Result<ProjectProgress> {
        let project = self.get(project_id)?;
        let value = serde_json::to_value(&progress)?;
        if !project_repo::set_progress(&self.db, project_id, &value)? {
            return Err(ScriptDeskError::not_found("project", project_id));
        }
        self.notify(
            project_id,
            "progress_updated",
            format!("Progress of '{}' updated", project.name),
        );
        Ok(progress)
    }

    pub fn resource_requirements(&self, project_id: i64) -> Result<ResourceRequirements> {
        self.get(project_id)?;

        let mut requirements = ResourceRequirements::default();
        for resource in resource_repo::list_for_project(&self.db, project_id)? {
            *requirements
                .statistics
                .by_type
                .entry(resource.kind.clone())
                .or_default() += 1;
            requirements.statistics.total += 1;
            requirements
                .resources
                .entry(resource.kind)
                .or_default()
                .push(RequiredResource {
                    script_id: resource.script_id,
                    scene_number: resource.scene_number,
                    name: resource.name,
                    description: resource.description,
                });
        }
        Ok(requirements)
    }

    pub fn overview(&self, id: i64) -> Result<ProjectOverview> {
        let project = self.get(id)?;
        let progress = self.progress(id)?;
        let scenes = scene_repo::list_for_project(&self.db, id)?;

        let scripts_by_status: BTreeMap<String, u64> =
            script_repo::count_by_status(&self.db, Some(id))?
                .into_iter()
                .map(|(status, count)| (status.to_string(), count))
                .collect();
        let resources_by_type: BTreeMap<String, u64> =
            stats_repo::counts_by(&self.db, Dimension::Type, ResourceScope::project(id))?
                .into_iter()
                .map(|row| (row.key, row.count))
                .collect();

        Ok(ProjectOverview {
            project,
            progress,
            total_scripts: scripts_by_status.values().sum(),
            scripts_by_status,
            scenes: SceneTotals::tally(scenes.iter().map(|s| s.name.as_str())),
            total_resources: resources_by_type.values().sum(),
            resources_by_type,
        })
    }

    fn notify(&self, project_id: i64, update_type: &str, message: String) {
        self.hub.publish_to(
            &[topics::PROJECTS.to_string(), topics::project(project_id)],
            NotificationKind::ProjectUpdate {
                project_id,
                update_type: update_type.to_string(),
                message,
            },
        );
    }
}
