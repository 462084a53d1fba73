//! Per-task structured event logger.
//!
//! A `TaskLogger` is cheap and stateless beyond the four fields below; the
//! pipeline runner recreates one at the top of every step rather than
//! threading a single long-lived instance through the whole task.

use std::sync::Arc;

use chrono::Utc;

use crate::store::models::{EventLevel, EventType};
use crate::store::Store;

const MAX_MESSAGE_CHARS: usize = 1600;

/// ANSI color codes matching the level, for the human-readable console line.
fn level_color(level: EventLevel) -> &'static str {
    match level {
        EventLevel::Trace => "\x1b[90m",
        EventLevel::Debug => "\x1b[36m",
        EventLevel::Info => "\x1b[32m",
        EventLevel::Warn => "\x1b[33m",
        EventLevel::Error => "\x1b[31m",
    }
}

fn truncate_message(message: &str) -> String {
    if message.chars().count() <= MAX_MESSAGE_CHARS {
        return message.to_owned();
    }
    let truncated: String = message.chars().take(MAX_MESSAGE_CHARS).collect();
    let omitted = message.chars().count() - MAX_MESSAGE_CHARS;
    format!("{truncated}...[truncated {omitted} chars]")
}

pub struct TaskLogger {
    store: Arc<Store>,
    task_id: String,
    project_id: String,
    step: String,
    percent: i64,
}

impl TaskLogger {
    pub fn new(
        store: Arc<Store>,
        task_id: impl Into<String>,
        project_id: impl Into<String>,
        step: impl Into<String>,
        percent: i64,
    ) -> Self {
        Self {
            store,
            task_id: task_id.into(),
            project_id: project_id.into(),
            step: step.into(),
            percent,
        }
    }

    pub fn trace(&self, message: impl AsRef<str>) {
        self.emit(EventLevel::Trace, message.as_ref(), None);
    }

    pub fn debug(&self, message: impl AsRef<str>) {
        self.emit(EventLevel::Debug, message.as_ref(), None);
    }

    pub fn info(&self, message: impl AsRef<str>) {
        self.emit(EventLevel::Info, message.as_ref(), None);
    }

    pub fn warn(&self, message: impl AsRef<str>) {
        self.emit(EventLevel::Warn, message.as_ref(), None);
    }

    pub fn error(&self, message: impl AsRef<str>, error_message: Option<&str>) {
        self.emit(EventLevel::Error, message.as_ref(), error_message);
    }

    fn emit(&self, level: EventLevel, message: &str, error_message: Option<&str>) {
        let message = truncate_message(message);
        let event_type = if level == EventLevel::Error {
            EventType::Error
        } else {
            EventType::Log
        };

        let color = level_color(level);
        println!(
            "{color}[{}] [{:?}] [task:{}] [step:{}] {message}\x1b[0m",
            Utc::now().to_rfc3339(),
            level,
            self.task_id,
            self.step,
        );

        match level {
            EventLevel::Trace => tracing::trace!(task_id = %self.task_id, step = %self.step, "{message}"),
            EventLevel::Debug => tracing::debug!(task_id = %self.task_id, step = %self.step, "{message}"),
            EventLevel::Info => tracing::info!(task_id = %self.task_id, step = %self.step, "{message}"),
            EventLevel::Warn => tracing::warn!(task_id = %self.task_id, step = %self.step, "{message}"),
            EventLevel::Error => tracing::error!(task_id = %self.task_id, step = %self.step, error = ?error_message, "{message}"),
        }

        if let Err(e) = self.store.append_task_event(
            &self.task_id,
            &self.project_id,
            &self.step,
            event_type,
            level,
            &message,
            self.percent,
            None,
            error_message,
        ) {
            tracing::warn!("failed to persist task event: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncates_long_messages_with_marker() {
        let long = "a".repeat(MAX_MESSAGE_CHARS + 50);
        let truncated = truncate_message(&long);
        assert!(truncated.ends_with("...[truncated 50 chars]"));
        assert_eq!(
            truncated.len(),
            MAX_MESSAGE_CHARS + "...[truncated 50 chars]".len()
        );
    }

    #[test]
    fn leaves_short_messages_untouched() {
        assert_eq!(truncate_message("hello"), "hello");
    }
}
