//! The RPC surface: plain functions a hypothetical HTTP/RPC frontend would
//! call, one per operation named in the external interface contract. Each
//! wraps a `Store`/`PipelineRunner` call and returns `Result<T, CoreError>`
//! so a web layer can map error kinds to status codes without this crate
//! depending on any web framework.

use std::sync::Arc;

use crate::config::Config;
use crate::error::CoreError;
use crate::pipeline::PipelineRunner;
use crate::store::models::{Project, Task, TaskEvent, TaskStatus, TaskStepState};
use crate::store::Store;

pub fn list_projects(store: &Store) -> Result<Vec<Project>, CoreError> {
    store.list_projects(200)
}

pub fn list_tasks(store: &Store, limit: i64) -> Result<Vec<Task>, CoreError> {
    let limit = if limit > 0 { limit } else { 100 };
    store.list_tasks(limit)
}

pub fn project_by_id(store: &Store, project_id: &str) -> Result<Option<(Project, Vec<Task>)>, CoreError> {
    store.get_project_by_id(project_id)
}

pub fn task_by_id(store: &Store, task_id: &str) -> Result<Option<(Task, Vec<TaskEvent>)>, CoreError> {
    store.get_task_by_id(task_id)
}

pub fn task_step_states(store: &Store, task_id: &str) -> Result<Vec<TaskStepState>, CoreError> {
    store.get_task_step_states(task_id)
}

/// Resets the task/step checkpoints and re-enqueues it on the runner.
pub fn retry_task(
    store: &Store,
    runner: &Arc<PipelineRunner>,
    task_id: &str,
) -> Result<(String, String), CoreError> {
    let (task_id, project_id) = store.retry_task(task_id)?;
    runner.enqueue(&task_id, &project_id);
    Ok((task_id, project_id))
}

/// Returns the task's status immediately after the cancellation request.
pub fn cancel_task(store: &Store, task_id: &str) -> Result<TaskStatus, CoreError> {
    store.request_task_cancel(task_id)
}

pub fn upsert_watch_progress(
    store: &Store,
    project_id: &str,
    viewer_id: &str,
    position_sec: f64,
    duration_sec: f64,
) -> Result<(), CoreError> {
    if duration_sec <= 0.0 {
        return Err(CoreError::Validation("durationSec must be > 0".to_owned()));
    }
    if position_sec < 0.0 {
        return Err(CoreError::Validation("positionSec must be >= 0".to_owned()));
    }
    store.upsert_watch_progress(project_id, viewer_id, position_sec, duration_sec)
}

/// Renames `projects/<projectId>` to `projects/_deleted_<projectId>`
/// (non-fatal if the directory is already absent; fatal on any other I/O
/// error), then cascades the DB deletion.
pub fn delete_project(store: &Store, config: &Config, project_id: &str) -> Result<(), CoreError> {
    let project_dir = config.project_dir(project_id);
    let renamed_dir = config.data_dir.join(format!("_deleted_{project_id}"));

    match std::fs::rename(&project_dir, &renamed_dir) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }

    store.delete_project(project_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::models::Source;

    #[test]
    fn delete_project_succeeds_when_directory_is_already_absent() {
        let store = Store::open_in_memory().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            pipeline_mode: crate::config::PipelineMode::Mock,
            yt_dlp_bin: "yt-dlp".into(),
            ffmpeg_bin: "ffmpeg".into(),
            dashscope_api_url: None,
            dashscope_api_key: None,
            fun_asr_model: None,
            oss_region: None,
            oss_bucket: None,
            oss_access_key_id: None,
            oss_access_key_secret: None,
            gemini_api_key: None,
            gemini_model: None,
            data_dir: dir.path().to_path_buf(),
            sqlite_db_path: "unused".into(),
            log_json: false,
            log_level: "info".into(),
            log_dir: dir.path().to_path_buf(),
        };

        let (project_id, _task_id) = store
            .submit_project(Source::Unknown, "nodirxyz", "nodirxyz", None)
            .unwrap();

        delete_project(&store, &config, &project_id).unwrap();
        assert!(store.get_project_by_id(&project_id).unwrap().is_none());
    }

    #[test]
    fn delete_project_renames_existing_directory() {
        let store = Store::open_in_memory().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            pipeline_mode: crate::config::PipelineMode::Mock,
            yt_dlp_bin: "yt-dlp".into(),
            ffmpeg_bin: "ffmpeg".into(),
            dashscope_api_url: None,
            dashscope_api_key: None,
            fun_asr_model: None,
            oss_region: None,
            oss_bucket: None,
            oss_access_key_id: None,
            oss_access_key_secret: None,
            gemini_api_key: None,
            gemini_model: None,
            data_dir: dir.path().to_path_buf(),
            sqlite_db_path: "unused".into(),
            log_json: false,
            log_level: "info".into(),
            log_dir: dir.path().to_path_buf(),
        };

        let (project_id, _task_id) = store
            .submit_project(Source::Unknown, "withdirxyz", "withdirxyz", None)
            .unwrap();
        std::fs::create_dir_all(config.project_dir(&project_id)).unwrap();

        delete_project(&store, &config, &project_id).unwrap();
        assert!(!config.project_dir(&project_id).exists());
        assert!(dir.path().join(format!("_deleted_{project_id}")).exists());
    }
}
