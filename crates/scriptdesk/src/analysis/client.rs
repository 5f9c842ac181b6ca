use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::backend::{LlmBackend, LlmError};
use super::retry::{with_retry, RetryPolicy};
use crate::extractor::ParsedScript;
use crate::sanitize::sanitize_for_prompt;

const CHARACTER_INSTRUCTIONS: &str = "You are a professional screenplay analyst. \
Analyse the characters of the parsed script you are given. For every character report \
how many scenes they appear in, how many lines of dialogue they have and the number of \
the scene where they first appear. Reply with a single JSON object only, shaped as \
{\"characters\": {\"NAME\": {\"appearances\": int, \"dialogue_count\": int, \"first_scene\": int}}}.";

const RESOURCE_INSTRUCTIONS: &str = "You are a professional screenplay analyst. \
Analyse the production resources required by the parsed script you are given: count the \
resources of each type, list the resources of each type by name and record where each \
resource is used. Reply with a single JSON object only, shaped as \
{\"resource_counts\": {\"TYPE\": int}, \"resources_by_type\": {\"TYPE\": [\"NAME\"]}, \
\"scene_distribution\": {\"NAME\": {\"first_appearance\": int, \"scenes\": [int]}}}.";

const SCENE_INSTRUCTIONS: &str = "You are a professional screenplay analyst. \
Analyse the scenes of the parsed script you are given: the number of scenes, a short \
summary of each scene and how often and in what pattern the story moves between \
locations. Reply with a single JSON object only, shaped as \
{\"scene_count\": int, \"summaries\": [{\"number\": int, \"summary\": string}], \
\"transitions\": {\"count\": int, \"pattern\": string}}.";

/// What to ask the model about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnalysisTask {
    Characters,
    Resources,
    Scenes,
    Full,
}

impl AnalysisTask {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnalysisTask::Characters => "characters",
            AnalysisTask::Resources => "resources",
            AnalysisTask::Scenes => "scenes",
            AnalysisTask::Full => "full",
        }
    }

    /// System instruction for a single task. `Full` has none of its own.
    pub fn instructions(&self) -> Option<&'static str> {
        match self {
            AnalysisTask::Characters => Some(CHARACTER_INSTRUCTIONS),
            AnalysisTask::Resources => Some(RESOURCE_INSTRUCTIONS),
            AnalysisTask::Scenes => Some(SCENE_INSTRUCTIONS),
            AnalysisTask::Full => None,
        }
    }
}

impl std::fmt::Display for AnalysisTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("{task} analysis failed after {attempts} attempt(s): {source}")]
    Backend {
        task: AnalysisTask,
        attempts: u32,
        #[source]
        source: LlmError,
    },

    #[error("{task} analysis returned malformed output: {reason}")]
    MalformedResponse {
        task: AnalysisTask,
        reason: String,
        raw: String,
    },

    #[error("Failed to serialize parsed script: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl AnalysisError {
    pub fn task(&self) -> Option<AnalysisTask> {
        match self {
            AnalysisError::Backend { task, .. } | AnalysisError::MalformedResponse { task, .. } => {
                Some(*task)
            }
            AnalysisError::Serialize(_) => None,
        }
    }

    /// The model's reply, when it was received but could not be used.
    pub fn raw_response(&self) -> Option<&str> {
        match self {
            AnalysisError::MalformedResponse { raw, .. } => Some(raw),
            _ => None,
        }
    }
}

/// The three documents produced by a full analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FullAnalysis {
    pub character_analysis: serde_json::Value,
    pub resource_analysis: serde_json::Value,
    pub scene_analysis: serde_json::Value,
}

/// Sends parsed scripts to a language model and turns the replies into JSON.
#[derive(Clone)]
pub struct AnalysisClient {
    backend: Arc<dyn LlmBackend>,
    policy: RetryPolicy,
}

impl AnalysisClient {
    pub fn new(backend: Arc<dyn LlmBackend>, policy: RetryPolicy) -> Self {
        Self { backend, policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Runs one task. `Full` returns an object with `character_analysis`,
    /// `resource_analysis` and `scene_analysis`.
    pub async fn analyze(
        &self,
        task: AnalysisTask,
        parsed: &ParsedScript,
    ) -> Result<serde_json::Value, AnalysisError> {
        if task == AnalysisTask::Full {
            let full = self.full(parsed).await?;
            return Ok(serde_json::to_value(full)?);
        }
        let user = build_user_content(parsed)?;
        self.run_task(task, &user).await
    }

    pub async fn analyze_characters(
        &self,
        parsed: &ParsedScript,
    ) -> Result<serde_json::Value, AnalysisError> {
        self.analyze(AnalysisTask::Characters, parsed).await
    }

    pub async fn analyze_resources(
        &self,
        parsed: &ParsedScript,
    ) -> Result<serde_json::Value, AnalysisError> {
        self.analyze(AnalysisTask::Resources, parsed).await
    }

    pub async fn analyze_scenes(
        &self,
        parsed: &ParsedScript,
    ) -> Result<serde_json::Value, AnalysisError> {
        self.analyze(AnalysisTask::Scenes, parsed).await
    }

    /// Characters, then resources, then scenes. The first failure aborts and
    /// nothing computed so far is returned.
    pub async fn full(&self, parsed: &ParsedScript) -> Result<FullAnalysis, AnalysisError> {
        let user = build_user_content(parsed)?;

        let character_analysis = self.run_task(AnalysisTask::Characters, &user).await?;
        let resource_analysis = self.run_task(AnalysisTask::Resources, &user).await?;
        let scene_analysis = self.run_task(AnalysisTask::Scenes, &user).await?;

        Ok(FullAnalysis {
            character_analysis,
            resource_analysis,
            scene_analysis,
        })
    }

    async fn run_task(
        &self,
        task: AnalysisTask,
        user: &str,
    ) -> Result<serde_json::Value, AnalysisError> {
        let Some(system) = task.instructions() else {
            return Err(AnalysisError::MalformedResponse {
                task,
                reason: "task has no instructions of its own".to_string(),
                raw: String::new(),
            });
        };

        log::debug!("Requesting {} analysis from {}", task, self.backend.name());
        let label = format!("{} analysis", task);
        let raw = with_retry(&self.policy, &label, |_| self.backend.complete(system, user))
            .await
            .map_err(|exhausted| AnalysisError::Backend {
                task,
                attempts: exhausted.attempts,
                source: exhausted.error,
            })?;

        parse_reply(task, raw)
    }
}

fn build_user_content(parsed: &ParsedScript) -> Result<String, serde_json::Error> {
    let json = serde_json::to_string(parsed)?;
    Ok(sanitize_for_prompt(&json))
}

fn parse_reply(task: AnalysisTask, raw: String) -> Result<serde_json::Value, AnalysisError> {
    let direct = serde_json::from_str::<serde_json::Value>(raw.trim());
    let value = match direct {
        Ok(value) => value,
        Err(direct_err) => match extract_json(&raw)
            .and_then(|candidate| serde_json::from_str::<serde_json::Value>(candidate).ok())
        {
            Some(value) => value,
            None => {
                log::error!("{} analysis reply is not valid JSON: {}", task, direct_err);
                return Err(AnalysisError::MalformedResponse {
                    task,
                    reason: direct_err.to_string(),
                    raw,
                });
            }
        },
    };

    if !value.is_object() {
        return Err(AnalysisError::MalformedResponse {
            task,
            reason: "expected a JSON object".to_string(),
            raw,
        });
    }

    Ok(value)
}

/// Finds the first balanced `{...}` in a reply, skipping braces inside
/// string literals. Returns `None` when no object is closed.
pub fn extract_json(response: &str) -> Option<&str> {
    let start = response.find('{')?;

    let mut depth = 0usize;
    let mut in_string = false;
    let mut escape_next = false;

    for (i, c) in response[start..].char_indices() {
        if escape_next {
            escape_next = false;
            continue;
        }

        match c {
            '\\' if in_string => escape_next = true,
            '"' => in_string = !in_string,
            '{' if !in_string => depth += 1,
            '}' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    return Some(&response[start..start + i + 1]);
                }
            }
            _ => {}
        }
    }

    None
}
