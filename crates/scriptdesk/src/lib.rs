pub mod analysis;
pub mod config;
pub mod db;
pub mod error;
pub mod extractor;
pub mod notify;
pub mod orchestrator;
pub mod projects;
pub mod resources;
pub mod sanitize;
pub mod secrets;
pub mod status;
pub mod storage;
pub mod synthesizer;
pub mod telemetry;

pub use analysis::{AnalysisClient, AnalysisError, FullAnalysis, LlmBackend, OpenAiBackend, RetryPolicy};
pub use config::{load_settings, Settings};
pub use db::Database;
pub use error::{
    ConfigError, ParsingError, Result, ScriptDeskError, StorageError, ValidationError,
};
pub use extractor::{ParsedScript, PatternExtractor, ScriptExtractor};
pub use notify::{Notification, NotificationHub, NotificationKind};
pub use orchestrator::{Accepted, Orchestrator};
pub use projects::ProjectService;
pub use resources::{ExportFormat, ResourceService};
pub use secrets::{resolve_secret, resolve_secret_optional, SecretError};
pub use status::{ScriptMetadata, ScriptStatus};
