//! Per-task context threaded through every pipeline step.

use std::collections::HashMap;
use std::path::PathBuf;

use crate::store::models::TaskStepState;

pub struct StepContext {
    pub task_id: String,
    pub project_id: String,
    pub project_dir: PathBuf,
    pub source_url: String,
    pub video_path: PathBuf,
    pub audio_path: PathBuf,
    pub asr_json_path: PathBuf,
    pub asr_srt_path: PathBuf,
    pub translated_srt_path: PathBuf,
    pub translated_vtt_path: PathBuf,
    pub states: HashMap<String, TaskStepState>,
}

impl StepContext {
    pub fn new(
        task_id: String,
        project_id: String,
        project_dir: PathBuf,
        source_url: String,
        states: HashMap<String, TaskStepState>,
    ) -> Self {
        Self {
            video_path: project_dir.join("video.mp4"),
            audio_path: project_dir.join("audio.opus"),
            asr_json_path: project_dir.join("asr.json"),
            asr_srt_path: project_dir.join("asr.srt"),
            translated_srt_path: project_dir.join("video.srt"),
            translated_vtt_path: project_dir.join("video.vtt"),
            task_id,
            project_id,
            project_dir,
            source_url,
            states,
        }
    }

    /// Decoded output of a previously-completed step, or `None` if the
    /// checkpoint is absent, not completed, or fails to decode as `T` — a
    /// corrupted checkpoint is treated as "step not completed", never a
    /// panic.
    pub fn completed_output<T: serde::de::DeserializeOwned>(&self, step: &str) -> Option<T> {
        let state = self.states.get(step)?;
        if state.status != crate::store::models::StepStatus::Completed {
            return None;
        }
        let value = state.output_json.clone()?;
        serde_json::from_value(value).ok()
    }
}
