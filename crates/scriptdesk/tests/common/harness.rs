//! Test harness for isolated orchestrator runs.
//!
//! The `TestHarness` struct provides:
//! - A temporary storage root for uploads and JSON artifacts
//! - An in-memory database
//! - A `ScriptedBackend` answering each analysis task with a canned reply
//! - A started notification hub shared by every service

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;
use tempfile::TempDir;

use scriptdesk::analysis::{AnalysisTask, LlmBackend, LlmError};
use scriptdesk::config::Settings;
use scriptdesk::db::script_repo::ScriptRow;
use scriptdesk::{
    Database, NotificationHub, Orchestrator, ProjectService, ResourceService, ScriptStatus,
};

use super::builders::{heist_characters, heist_resources, heist_scenes, SettingsBuilder};
use super::HEIST;

/// How the backend answers one task.
#[derive(Debug, Clone)]
pub enum Reply {
    Json(Value),
    /// Returned verbatim, e.g. prose instead of JSON.
    Text(String),
    Auth,
    /// Times out this many times, then answers with the JSON.
    FlakyThen(u32, Value),
}

const TASKS: [AnalysisTask; 3] = [
    AnalysisTask::Characters,
    AnalysisTask::Resources,
    AnalysisTask::Scenes,
];

fn task_for(system: &str) -> Option<AnalysisTask> {
    TASKS
        .into_iter()
        .find(|task| task.instructions() == Some(system))
}

type CallHook = Box<dyn Fn(AnalysisTask) + Send + Sync>;

/// Language-model fake keyed on the system instruction of each task.
#[derive(Default)]
pub struct ScriptedBackend {
    replies: Mutex<HashMap<&'static str, Reply>>,
    calls: Mutex<HashMap<&'static str, u32>>,
    on_call: Mutex<Option<CallHook>>,
}

impl ScriptedBackend {
    pub fn heist() -> Self {
        let backend = Self::default();
        backend.set(AnalysisTask::Characters, Reply::Json(heist_characters()));
        backend.set(AnalysisTask::Resources, Reply::Json(heist_resources()));
        backend.set(AnalysisTask::Scenes, Reply::Json(heist_scenes()));
        backend
    }

    pub fn set(&self, task: AnalysisTask, reply: Reply) {
        self.replies.lock().unwrap().insert(task.as_str(), reply);
    }

    /// Runs `hook` before every reply, e.g. to change the database while a
    /// run is in flight.
    pub fn on_call(&self, hook: impl Fn(AnalysisTask) + Send + Sync + 'static) {
        *self.on_call.lock().unwrap() = Some(Box::new(hook));
    }

    pub fn calls(&self, task: AnalysisTask) -> u32 {
        self.calls
            .lock()
            .unwrap()
            .get(task.as_str())
            .copied()
            .unwrap_or(0)
    }
}

#[async_trait]
impl LlmBackend for ScriptedBackend {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, system: &str, _user: &str) -> Result<String, LlmError> {
        let task = task_for(system).expect("unknown task instructions");
        let call = {
            let mut calls = self.calls.lock().unwrap();
            let count = calls.entry(task.as_str()).or_insert(0);
            *count += 1;
            *count
        };
        if let Some(hook) = self.on_call.lock().unwrap().as_ref() {
            hook(task);
        }
        let reply = self.replies.lock().unwrap().get(task.as_str()).cloned();

        match reply {
            Some(Reply::Json(value)) => Ok(value.to_string()),
            Some(Reply::Text(text)) => Ok(text),
            Some(Reply::Auth) => Err(LlmError::Auth("invalid api key".to_string())),
            Some(Reply::FlakyThen(failures, _)) if call <= failures => Err(LlmError::Timeout),
            Some(Reply::FlakyThen(_, value)) => Ok(value.to_string()),
            None => Err(LlmError::InvalidReply("no reply configured".to_string())),
        }
    }
}

/// Isolated environment for orchestrator integration tests.
pub struct TestHarness {
    temp_dir: TempDir,
    pub settings: Settings,
    pub backend: Arc<ScriptedBackend>,
    pub hub: NotificationHub,
    pub orchestrator: Orchestrator,
    pub resources: ResourceService,
    pub projects: ProjectService,
}

impl TestHarness {
    /// Harness whose backend answers every task for the `HEIST` script.
    pub fn new() -> Self {
        Self::with_backend(ScriptedBackend::heist())
    }

    pub fn with_backend(backend: ScriptedBackend) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let settings = SettingsBuilder::new(temp_dir.path()).build();
        Self::with_settings(temp_dir, settings, backend)
    }

    pub fn with_settings(temp_dir: TempDir, settings: Settings, backend: ScriptedBackend) -> Self {
        let db = Database::open_in_memory().expect("Failed to create test database");
        let hub = NotificationHub::new(settings.notifications.channel_capacity);
        hub.start();

        let backend = Arc::new(backend);
        let orchestrator =
            Orchestrator::from_settings(&settings, db.clone(), backend.clone(), hub.clone());

        Self {
            resources: ResourceService::new(db.clone(), hub.clone()),
            projects: ProjectService::new(db, hub.clone()),
            temp_dir,
            settings,
            backend,
            hub,
            orchestrator,
        }
    }

    pub fn root(&self) -> &std::path::Path {
        self.temp_dir.path()
    }

    pub fn database(&self) -> &Database {
        self.orchestrator.database()
    }

    /// Uploads `HEIST` as `heist.txt`.
    pub fn upload_heist(&self) -> ScriptRow {
        self.orchestrator
            .upload("heist.txt", HEIST.as_bytes(), None)
            .expect("upload failed")
    }

    /// Installs a trigger that aborts any update moving a script to `status`.
    pub fn block_status(&self, status: ScriptStatus) {
        let sql = format!(
            "CREATE TRIGGER block_{status} BEFORE UPDATE OF status ON scripts
             WHEN NEW.status = '{status}'
             BEGIN SELECT RAISE(ABORT, 'status {status} blocked'); END;",
            status = status.as_str()
        );
        self.database()
            .with_conn(|conn| Ok(conn.execute_batch(&sql)?))
            .expect("Failed to install trigger");
    }

    /// Uploads and parses `HEIST`.
    pub fn parsed_heist(&self) -> ScriptRow {
        let script = self.upload_heist();
        self.orchestrator.parse(script.id).expect("parse failed");
        self.orchestrator.script(script.id).unwrap()
    }
}
