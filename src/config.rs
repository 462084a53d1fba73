//! Process-wide configuration, loaded from environment variables at startup.
//!
//! Every field has a sensible default so `mock` mode works out of the box
//! without any environment variables set. `live` mode requires the
//! credentials it names; [`Config::missing_live_requirements`] enumerates
//! what's absent so callers can fail submission/the first step with a
//! descriptive [`crate::error::CoreError::Infrastructure`].

use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineMode {
    Mock,
    Live,
}

impl PipelineMode {
    fn from_env_str(s: &str) -> Self {
        if s.eq_ignore_ascii_case("live") {
            PipelineMode::Live
        } else {
            PipelineMode::Mock
        }
    }

    pub fn is_live(self) -> bool {
        matches!(self, PipelineMode::Live)
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub pipeline_mode: PipelineMode,

    pub yt_dlp_bin: String,
    pub ffmpeg_bin: String,

    pub dashscope_api_url: Option<String>,
    pub dashscope_api_key: Option<String>,
    pub fun_asr_model: Option<String>,

    pub oss_region: Option<String>,
    pub oss_bucket: Option<String>,
    pub oss_access_key_id: Option<String>,
    pub oss_access_key_secret: Option<String>,

    pub gemini_api_key: Option<String>,
    pub gemini_model: Option<String>,

    /// Directory under which `projects/<projectId>` working directories live.
    pub data_dir: PathBuf,
    pub sqlite_db_path: PathBuf,

    pub log_json: bool,
    pub log_level: String,
    /// Directory for the rolling daily log file, in addition to console
    /// output. Created on first write if missing.
    pub log_dir: PathBuf,
}

impl Config {
    /// Build [`Config`] from environment variables, falling back to defaults.
    ///
    /// Reads a `.env` file in the current directory first (if present) via
    /// `dotenvy`, so local development does not require exporting variables
    /// into the shell.
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv();

        Self {
            pipeline_mode: PipelineMode::from_env_str(&env_or("PIPELINE_MODE", "mock")),
            yt_dlp_bin: env_or("YT_DLP_BIN", "yt-dlp"),
            ffmpeg_bin: env_or("FFMPEG_BIN", "ffmpeg"),
            dashscope_api_url: opt_env("DASHSCOPE_API_URL"),
            dashscope_api_key: opt_env("DASHSCOPE_API_KEY"),
            fun_asr_model: opt_env("FUN_ASR_MODEL"),
            oss_region: opt_env("OSS_REGION"),
            oss_bucket: opt_env("OSS_BUCKET"),
            oss_access_key_id: opt_env("OSS_ACCESS_KEY_ID"),
            oss_access_key_secret: opt_env("OSS_ACCESS_KEY_SECRET"),
            gemini_api_key: opt_env("GEMINI_API_KEY"),
            gemini_model: opt_env("GEMINI_MODEL"),
            data_dir: PathBuf::from(env_or("DATA_DIR", "projects")),
            sqlite_db_path: PathBuf::from(env_or("SQLITE_DB_PATH", "data/grillmaster.db")),
            log_json: bool_env("GRILLMASTER_LOG_JSON", false),
            log_level: env_or("GRILLMASTER_LOG", "info"),
            log_dir: PathBuf::from(env_or("LOG_DIR", "logs")),
        }
    }

    /// Names of required `live`-mode credentials that are currently unset.
    ///
    /// Entering `live` with any of these missing fails submission (or the
    /// first step that needs them) with an Infrastructure error listing the
    /// missing names, per the configuration contract.
    pub fn missing_live_requirements(&self) -> Vec<&'static str> {
        if self.pipeline_mode != PipelineMode::Live {
            return Vec::new();
        }
        let mut missing = Vec::new();
        if self.dashscope_api_url.is_none() {
            missing.push("DASHSCOPE_API_URL");
        }
        if self.dashscope_api_key.is_none() {
            missing.push("DASHSCOPE_API_KEY");
        }
        if self.fun_asr_model.is_none() {
            missing.push("FUN_ASR_MODEL");
        }
        if self.oss_region.is_none() {
            missing.push("OSS_REGION");
        }
        if self.oss_bucket.is_none() {
            missing.push("OSS_BUCKET");
        }
        if self.oss_access_key_id.is_none() {
            missing.push("OSS_ACCESS_KEY_ID");
        }
        if self.oss_access_key_secret.is_none() {
            missing.push("OSS_ACCESS_KEY_SECRET");
        }
        if self.gemini_api_key.is_none() {
            missing.push("GEMINI_API_KEY");
        }
        if self.gemini_model.is_none() {
            missing.push("GEMINI_MODEL");
        }
        missing
    }

    /// Directory for one project's working files.
    pub fn project_dir(&self, project_id: &str) -> PathBuf {
        self.data_dir.join(project_id)
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_owned())
}

fn opt_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

fn bool_env(key: &str, default: bool) -> bool {
    std::env::var(key)
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(default)
}
