//! Minimal CLI front-end. The HTTP/RPC frontend is out of scope for this
//! crate; this binary is the one concrete caller of the operations in
//! `grillmaster_core::commands`, driving them synchronously so the crate
//! is runnable end-to-end without a server.

use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};

use grillmaster_core::config::Config;
use grillmaster_core::pipeline::steps::Providers;
use grillmaster_core::pipeline::PipelineRunner;
use grillmaster_core::providers::{
    AsrProvider, LiveAsrProvider, LiveTranslationProvider, MockAsrProvider, MockTranslationProvider,
    TranslationProvider,
};
use grillmaster_core::store::Store;
use grillmaster_core::{commands, logging, submission};

#[derive(Parser)]
#[command(name = "grillmaster", about = "Durable, resumable media pipeline runtime")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Submit a new project from a source reference or URL, wait for the
    /// pipeline to reach a terminal state, and print the final project.
    Submit {
        source_or_url: String,
        #[arg(long)]
        translation_hint: Option<String>,
    },
    /// List recent projects (newest first), each with its latest task.
    ListProjects,
    /// List recent tasks (newest-updated first).
    ListTasks {
        #[arg(long, default_value_t = 100)]
        limit: i64,
    },
    /// Show one project plus its recent tasks.
    Project { project_id: String },
    /// Show one task plus its recent events.
    Task { task_id: String },
    /// Retry a failed or canceled task from its last incomplete step.
    Retry { task_id: String },
    /// Request cancellation of a task.
    Cancel { task_id: String },
    /// Record a viewer's watch position for a project.
    WatchProgress {
        project_id: String,
        viewer_id: String,
        position_sec: f64,
        duration_sec: f64,
    },
    /// Delete a project and cascade its tasks/events/steps/watch rows.
    Delete { project_id: String },
}

fn build_providers(config: &Config) -> anyhow::Result<Providers> {
    if config.pipeline_mode.is_live() {
        let missing = config.missing_live_requirements();
        if !missing.is_empty() {
            anyhow::bail!(
                "PIPELINE_MODE=live requires the following unset configuration: {}",
                missing.join(", ")
            );
        }
        Ok(Providers {
            asr: Box::new(LiveAsrProvider::from_config(config)?) as Box<dyn AsrProvider>,
            translation: Box::new(LiveTranslationProvider::from_config(config)?)
                as Box<dyn TranslationProvider>,
        })
    } else {
        Ok(Providers {
            asr: Box::new(MockAsrProvider),
            translation: Box::new(MockTranslationProvider),
        })
    }
}

fn wait_for_terminal_status(store: &Store, task_id: &str) -> anyhow::Result<()> {
    loop {
        let Some((task, _events)) = store.get_task_by_id(task_id)? else {
            anyhow::bail!("task {task_id} disappeared while waiting");
        };
        if task.status.is_terminal() {
            return Ok(());
        }
        std::thread::sleep(Duration::from_millis(200));
    }
}

fn main() -> anyhow::Result<()> {
    let config = Arc::new(Config::from_env());
    let _log_guard = logging::init(&config);

    let store = Arc::new(Store::open(&config.sqlite_db_path)?);
    let providers = Arc::new(build_providers(&config)?);
    let runner = PipelineRunner::new(Arc::clone(&store), Arc::clone(&config), providers);

    let cli = Cli::parse();
    let result = run(&cli.command, &store, &config, &runner);

    runner.shutdown();
    result
}

fn run(
    command: &Command,
    store: &Store,
    config: &Config,
    runner: &Arc<PipelineRunner>,
) -> anyhow::Result<()> {
    match command {
        Command::Submit {
            source_or_url,
            translation_hint,
        } => {
            let output = submission::submit_project(
                store,
                runner,
                submission::SubmitInput {
                    source_or_url,
                    translation_hint: translation_hint.as_deref(),
                },
            )?;
            wait_for_terminal_status(store, &output.task_id)?;
            let (project, _tasks) = store
                .get_project_by_id(&output.project_id)?
                .ok_or_else(|| anyhow::anyhow!("project disappeared after submission"))?;
            println!("{}", serde_json::to_string_pretty(&project)?);
        }
        Command::ListProjects => {
            let projects = commands::list_projects(store)?;
            println!("{}", serde_json::to_string_pretty(&projects)?);
        }
        Command::ListTasks { limit } => {
            let tasks = commands::list_tasks(store, *limit)?;
            println!("{}", serde_json::to_string_pretty(&tasks)?);
        }
        Command::Project { project_id } => {
            let found = commands::project_by_id(store, project_id)?;
            println!("{}", serde_json::to_string_pretty(&found)?);
        }
        Command::Task { task_id } => {
            let found = commands::task_by_id(store, task_id)?;
            println!("{}", serde_json::to_string_pretty(&found)?);
        }
        Command::Retry { task_id } => {
            let (task_id, project_id) = commands::retry_task(store, runner, task_id)?;
            wait_for_terminal_status(store, &task_id)?;
            let (project, _) = store
                .get_project_by_id(&project_id)?
                .ok_or_else(|| anyhow::anyhow!("project disappeared after retry"))?;
            println!("{}", serde_json::to_string_pretty(&project)?);
        }
        Command::Cancel { task_id } => {
            let status = commands::cancel_task(store, task_id)?;
            println!("{status:?}");
        }
        Command::WatchProgress {
            project_id,
            viewer_id,
            position_sec,
            duration_sec,
        } => {
            commands::upsert_watch_progress(store, project_id, viewer_id, *position_sec, *duration_sec)?;
        }
        Command::Delete { project_id } => {
            commands::delete_project(store, config, project_id)?;
        }
    }
    Ok(())
}
