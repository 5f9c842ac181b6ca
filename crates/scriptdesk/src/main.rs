use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use secrecy::SecretString;

use scriptdesk::db::resource_repo::ResourceFilter;
use scriptdesk::db::stats_repo::ResourceScope;
use scriptdesk::resources::{self, ExportFormat, ResourceService};
use scriptdesk::{
    config, secrets, telemetry, Database, LlmBackend, NotificationHub, OpenAiBackend,
    Orchestrator, PatternExtractor, ScriptExtractor, Settings,
};

#[derive(Parser)]
#[command(name = "scriptdesk", version, about = "Screenplay production backend")]
struct Cli {
    /// Settings file (JSON or YAML). Defaults apply when omitted.
    #[arg(short, long, global = true, env = "SCRIPTDESK_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Extract structure from a script file and print it as JSON
    Parse { file: PathBuf },
    /// Upload and parse a script file
    Ingest {
        file: PathBuf,
        #[arg(long)]
        project_id: Option<i64>,
    },
    /// Run a full analysis of an ingested script
    Analyze { script_id: i64 },
    /// Export the resources of a script
    Resources {
        script_id: i64,
        #[arg(long, default_value = "csv")]
        format: ExportFormat,
    },
    /// Print resource statistics or cost analysis
    Stats {
        #[arg(long)]
        script_id: Option<i64>,
        #[arg(long)]
        project_id: Option<i64>,
        #[arg(long, default_value = "json")]
        format: ExportFormat,
        /// Cost analysis instead of the overview
        #[arg(long)]
        costs: bool,
    },
}

fn load(path: Option<&Path>) -> Result<Settings> {
    match path {
        Some(path) => config::load_settings(path)
            .with_context(|| format!("failed to load settings from {}", path.display())),
        None => Ok(Settings::default()),
    }
}

/// The API key is only required for commands that call the model.
fn backend(settings: &Settings, required: bool) -> Result<Arc<dyn LlmBackend>> {
    let key = match secrets::resolve_api_key(&settings.llm) {
        Ok(key) => key,
        Err(e) if !required => {
            log::debug!("No API key configured: {}", e);
            SecretString::from(String::new())
        }
        Err(e) => return Err(e).context("no API key for the analysis backend"),
    };
    Ok(Arc::new(OpenAiBackend::from_settings(&settings.llm, key)?))
}

fn open_orchestrator(settings: &Settings, requires_llm: bool) -> Result<Orchestrator> {
    let db = Database::open(&settings.storage.database_path())?;
    let hub = NotificationHub::new(settings.notifications.channel_capacity);
    hub.start();
    Ok(Orchestrator::from_settings(
        settings,
        db,
        backend(settings, requires_llm)?,
        hub,
    ))
}

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        eprintln!("scriptdesk error: {error:#}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();
    let settings = load(cli.config.as_deref())?;
    telemetry::init_tracing(&settings.logging)?;

    match cli.command {
        Command::Parse { file } => {
            let parsed = PatternExtractor::new().extract_file(&file)?;
            println!("{}", serde_json::to_string_pretty(&parsed)?);
        }
        Command::Ingest { file, project_id } => {
            let orchestrator = open_orchestrator(&settings, false)?;
            let content = std::fs::read(&file)
                .with_context(|| format!("failed to read {}", file.display()))?;
            let filename = file
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .context("path has no file name")?;

            let script = orchestrator.upload(&filename, &content, project_id)?;
            let parsed = orchestrator.parse(script.id)?;
            println!(
                "script {}: {} scenes, {} characters, {} resources",
                script.id,
                parsed.total_scenes(),
                parsed.total_characters(),
                parsed.total_resources()
            );
        }
        Command::Analyze { script_id } => {
            let orchestrator = open_orchestrator(&settings, true)?;
            let analysis_id = orchestrator.analyze(script_id)?;
            let outcome = orchestrator.run_analysis(script_id, analysis_id).await;
            let script = orchestrator.script(script_id)?;
            match outcome {
                Ok(_) => println!("analysis {}: completed (script {})", analysis_id, script.status),
                Err(e) => {
                    println!("analysis {}: failed (script {})", analysis_id, script.status);
                    return Err(e.into());
                }
            }
        }
        Command::Resources { script_id, format } => {
            let db = Database::open(&settings.storage.database_path())?;
            let service = ResourceService::new(db, NotificationHub::default());
            let page = service.list(&ResourceFilter {
                script_id: Some(script_id),
                limit: Some(u64::from(u32::MAX)),
                ..Default::default()
            })?;
            print!("{}", resources::export_resources(&page.items, format)?);
        }
        Command::Stats {
            script_id,
            project_id,
            format,
            costs,
        } => {
            let db = Database::open(&settings.storage.database_path())?;
            let scope = ResourceScope {
                script_id,
                project_id,
            };
            let out = if costs {
                resources::export_cost_analysis(&resources::cost_analysis(&db, scope)?, format)?
            } else {
                resources::export_statistics(&resources::resource_statistics(&db, scope)?, format)?
            };
            print!("{}", out);
        }
    }
    Ok(())
}
