//! Row types and status enums for the five durable tables.
//!
//! Field names are `snake_case` in Rust and `camelCase` on the wire
//! (serialized for a hypothetical RPC layer), matching the job-model
//! convention the domain types in this crate are grounded on.

use serde::{Deserialize, Serialize};

fn default_zero() -> i64 {
    0
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    Bilibili,
    Tver,
    Youtube,
    Unknown,
}

impl Source {
    pub fn as_str(self) -> &'static str {
        match self {
            Source::Bilibili => "bilibili",
            Source::Tver => "tver",
            Source::Youtube => "youtube",
            Source::Unknown => "unknown",
        }
    }

    pub fn from_str_opt(s: &str) -> Option<Self> {
        match s {
            "bilibili" => Some(Source::Bilibili),
            "tver" => Some(Source::Tver),
            "youtube" => Some(Source::Youtube),
            "unknown" => Some(Source::Unknown),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProjectStatus {
    Queued,
    Downloading,
    Asr,
    Translating,
    Completed,
    Failed,
    Canceling,
    Canceled,
}

impl ProjectStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ProjectStatus::Queued => "queued",
            ProjectStatus::Downloading => "downloading",
            ProjectStatus::Asr => "asr",
            ProjectStatus::Translating => "translating",
            ProjectStatus::Completed => "completed",
            ProjectStatus::Failed => "failed",
            ProjectStatus::Canceling => "canceling",
            ProjectStatus::Canceled => "canceled",
        }
    }

    pub fn from_str_opt(s: &str) -> Option<Self> {
        Some(match s {
            "queued" => ProjectStatus::Queued,
            "downloading" => ProjectStatus::Downloading,
            "asr" => ProjectStatus::Asr,
            "translating" => ProjectStatus::Translating,
            "completed" => ProjectStatus::Completed,
            "failed" => ProjectStatus::Failed,
            "canceling" => ProjectStatus::Canceling,
            "canceled" => ProjectStatus::Canceled,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Queued,
    Running,
    Canceling,
    Completed,
    Failed,
    Canceled,
}

impl TaskStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Queued => "queued",
            TaskStatus::Running => "running",
            TaskStatus::Canceling => "canceling",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Canceled => "canceled",
        }
    }

    pub fn from_str_opt(s: &str) -> Option<Self> {
        Some(match s {
            "queued" => TaskStatus::Queued,
            "running" => TaskStatus::Running,
            "canceling" => TaskStatus::Canceling,
            "completed" => TaskStatus::Completed,
            "failed" => TaskStatus::Failed,
            "canceled" => TaskStatus::Canceled,
            _ => return None,
        })
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Canceled
        )
    }

    pub fn is_non_terminal(self) -> bool {
        !self.is_terminal()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Canceled,
}

impl StepStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            StepStatus::Pending => "pending",
            StepStatus::Running => "running",
            StepStatus::Completed => "completed",
            StepStatus::Failed => "failed",
            StepStatus::Canceled => "canceled",
        }
    }

    pub fn from_str_opt(s: &str) -> Option<Self> {
        Some(match s {
            "pending" => StepStatus::Pending,
            "running" => StepStatus::Running,
            "completed" => StepStatus::Completed,
            "failed" => StepStatus::Failed,
            "canceled" => StepStatus::Canceled,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    StepStart,
    StepEnd,
    Log,
    Error,
    System,
}

impl EventType {
    pub fn as_str(self) -> &'static str {
        match self {
            EventType::StepStart => "step_start",
            EventType::StepEnd => "step_end",
            EventType::Log => "log",
            EventType::Error => "error",
            EventType::System => "system",
        }
    }

    pub fn from_str_opt(s: &str) -> Option<Self> {
        Some(match s {
            "step_start" => EventType::StepStart,
            "step_end" => EventType::StepEnd,
            "log" => EventType::Log,
            "error" => EventType::Error,
            "system" => EventType::System,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl EventLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            EventLevel::Trace => "trace",
            EventLevel::Debug => "debug",
            EventLevel::Info => "info",
            EventLevel::Warn => "warn",
            EventLevel::Error => "error",
        }
    }

    pub fn from_str_opt(s: &str) -> Option<Self> {
        Some(match s {
            "trace" => EventLevel::Trace,
            "debug" => EventLevel::Debug,
            "info" => EventLevel::Info,
            "warn" => EventLevel::Warn,
            "error" => EventLevel::Error,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    pub project_id: String,
    pub source: Source,
    pub source_video_id: String,
    pub original_input: String,
    pub translation_hint: Option<String>,
    pub status: ProjectStatus,
    pub title: Option<String>,
    pub thumbnail_url: Option<String>,
    pub source_url: Option<String>,
    pub media_path: Option<String>,
    pub subtitle_path: Option<String>,
    pub asr_vtt_path: Option<String>,
    #[serde(default = "default_zero")]
    pub llm_cost_twd: i64,
    pub llm_provider: Option<String>,
    pub llm_model: Option<String>,
    pub input_tokens: Option<i64>,
    pub output_tokens: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
    /// The most recent task for this project, when loaded via a join helper.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latest_task: Option<Task>,
}

/// Partial-update payload for `updateProjectFromPipeline`; `None` means
/// "leave unchanged".
#[derive(Debug, Clone, Default)]
pub struct ProjectUpdate {
    pub status: Option<ProjectStatus>,
    pub title: Option<String>,
    pub thumbnail_url: Option<String>,
    pub source_url: Option<String>,
    pub media_path: Option<String>,
    pub subtitle_path: Option<String>,
    pub asr_vtt_path: Option<String>,
    pub llm_cost_twd: Option<i64>,
    pub llm_provider: Option<String>,
    pub llm_model: Option<String>,
    pub input_tokens: Option<i64>,
    pub output_tokens: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub task_id: String,
    pub project_id: String,
    #[serde(rename = "type")]
    pub task_type: String,
    pub status: TaskStatus,
    pub current_step: String,
    pub progress_percent: i64,
    pub message: Option<String>,
    pub started_at: Option<i64>,
    pub finished_at: Option<i64>,
    pub cancel_requested_at: Option<i64>,
    pub canceled_at: Option<i64>,
    pub error_message: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskStepState {
    pub task_id: String,
    pub project_id: String,
    pub step: String,
    pub status: StepStatus,
    pub attempt: i64,
    pub started_at: Option<i64>,
    pub finished_at: Option<i64>,
    pub duration_ms: Option<i64>,
    pub error_message: Option<String>,
    pub output_json: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskEvent {
    pub id: i64,
    pub task_id: String,
    pub project_id: String,
    pub step: String,
    pub event_type: EventType,
    pub level: EventLevel,
    pub message: String,
    pub percent: i64,
    pub duration_ms: Option<i64>,
    pub error_message: Option<String>,
    pub created_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WatchProgress {
    pub project_id: String,
    pub viewer_id: String,
    pub position_sec: f64,
    pub duration_sec: f64,
    pub updated_at: i64,
}

/// Current epoch milliseconds, the timestamp unit used across all tables.
pub fn unix_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
