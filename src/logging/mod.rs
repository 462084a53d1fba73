//! Process-wide structured logging.
//!
//! Two layers live in this module tree: [`init`] sets up the global
//! `tracing` subscriber once at startup (console output, pretty by default
//! or JSON when configured, plus a daily-rolling file under
//! [`Config::log_dir`]); [`task_logger`] provides the per-task event logger
//! that both emits `tracing` events and appends durable rows to the
//! `task_events` table.

pub mod task_logger;

pub use task_logger::TaskLogger;

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::Layer;

use crate::config::Config;

/// Initialize the global tracing subscriber. Call once, at process startup.
///
/// Falls back to the `info` filter (with a console warning) when
/// [`Config::log_level`] is not a valid `tracing_subscriber::EnvFilter`
/// expression, and always prefers `RUST_LOG` when it is set.
///
/// Returns the non-blocking file writer's guard; the caller must keep it
/// alive for the process lifetime or buffered lines are dropped on exit.
pub fn init(cfg: &Config) -> tracing_appender::non_blocking::WorkerGuard {
    let env_filter = || match tracing_subscriber::EnvFilter::try_from_default_env() {
        Ok(f) => f,
        Err(_) => match cfg.log_level.parse::<tracing_subscriber::EnvFilter>() {
            Ok(f) => f,
            Err(e) => {
                eprintln!(
                    "WARN: GRILLMASTER_LOG='{}' is not a valid tracing filter ({}); \
                     falling back to 'info'",
                    cfg.log_level, e
                );
                tracing_subscriber::EnvFilter::new("info")
            }
        },
    };

    let file_appender = tracing_appender::rolling::daily(&cfg.log_dir, "grillmaster.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    if cfg.log_json {
        let console_layer = tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_thread_ids(true)
            .json()
            .with_filter(env_filter());
        let file_layer = tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_thread_ids(true)
            .with_ansi(false)
            .with_writer(non_blocking)
            .json()
            .with_filter(env_filter());
        tracing_subscriber::registry().with(console_layer).with(file_layer).init();
    } else {
        let console_layer = tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_thread_ids(true)
            .with_filter(env_filter());
        let file_layer = tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_thread_ids(true)
            .with_ansi(false)
            .with_writer(non_blocking)
            .with_filter(env_filter());
        tracing_subscriber::registry().with(console_layer).with(file_layer).init();
    }

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        mode = ?cfg.pipeline_mode,
        log_dir = %cfg.log_dir.display(),
        "grillmaster starting"
    );

    guard
}
