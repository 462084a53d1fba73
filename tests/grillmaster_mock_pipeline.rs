//! End-to-end scenarios driving `PipelineRunner` against fake `yt-dlp`/
//! `ffmpeg` binaries and the mock ASR/translation providers, covering
//! spec scenarios S1, S2, S3, S4 (with a deterministic failing provider
//! standing in for a live-mode credential failure, since these tests must
//! not depend on network access), S5 and S6.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use grillmaster_core::config::{Config, PipelineMode};
use grillmaster_core::error::{CoreError, Retryable};
use grillmaster_core::logging::TaskLogger;
use grillmaster_core::pipeline::steps::Providers;
use grillmaster_core::pipeline::PipelineRunner;
use grillmaster_core::providers::{AsrProvider, AsrRequest, MockTranslationProvider};
use grillmaster_core::store::models::{ProjectStatus, StepStatus, TaskStatus};
use grillmaster_core::store::Store;
use grillmaster_core::submission::{submit_project, SubmitInput};

fn fixture(name: &str) -> String {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests/fixtures")
        .join(name)
        .to_string_lossy()
        .into_owned()
}

fn test_config(data_dir: PathBuf, yt_dlp: &str, ffmpeg: &str) -> Config {
    Config {
        pipeline_mode: PipelineMode::Mock,
        yt_dlp_bin: fixture(yt_dlp),
        ffmpeg_bin: fixture(ffmpeg),
        dashscope_api_url: None,
        dashscope_api_key: None,
        fun_asr_model: None,
        oss_region: None,
        oss_bucket: None,
        oss_access_key_id: None,
        oss_access_key_secret: None,
        gemini_api_key: None,
        gemini_model: None,
        data_dir: data_dir.clone(),
        sqlite_db_path: "unused".into(),
        log_json: false,
        log_level: "error".into(),
        log_dir: data_dir.join("logs"),
    }
}

fn mock_runner(store: Arc<Store>, config: Config) -> Arc<PipelineRunner> {
    mock_runner_with_asr(store, config, Box::new(grillmaster_core::providers::MockAsrProvider))
}

fn mock_runner_with_asr(
    store: Arc<Store>,
    config: Config,
    asr: Box<dyn AsrProvider>,
) -> Arc<PipelineRunner> {
    let providers = Arc::new(Providers {
        asr,
        translation: Box::new(MockTranslationProvider),
    });
    PipelineRunner::new(store, Arc::new(config), providers)
}

fn wait_until<F: Fn() -> bool>(timeout: Duration, predicate: F) -> bool {
    let start = Instant::now();
    while start.elapsed() < timeout {
        if predicate() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(25));
    }
    predicate()
}

/// S1: submit in mock mode, expect a full completed run with every
/// expected output file and at least one `step_end` event per step.
#[test]
fn s1_submit_happy_path_completes_with_all_outputs() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(Store::open_in_memory().unwrap());
    let config = test_config(dir.path().to_path_buf(), "fake_yt_dlp.sh", "fake_ffmpeg.sh");
    let runner = mock_runner(Arc::clone(&store), config.clone());

    let output = submit_project(
        &store,
        &runner,
        SubmitInput {
            source_or_url: "BV18KBJBeEmV",
            translation_hint: None,
        },
    )
    .unwrap();

    let finished = wait_until(Duration::from_secs(10), || {
        store
            .get_task_by_id(&output.task_id)
            .unwrap()
            .map(|(t, _)| t.status.is_terminal())
            .unwrap_or(false)
    });
    assert!(finished, "task did not reach a terminal status in time");

    let (task, events) = store.get_task_by_id(&output.task_id).unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Completed);
    assert_eq!(task.progress_percent, 100);
    assert_eq!(task.current_step, "done");

    let (project, _) = store.get_project_by_id(&output.project_id).unwrap().unwrap();
    assert_eq!(project.source, grillmaster_core::store::models::Source::Bilibili);
    assert_eq!(project.source_video_id, "BV18KBJBeEmV");
    assert_eq!(project.status, ProjectStatus::Completed);

    let project_dir = config.project_dir(&output.project_id);
    for file in ["video.mp4", "audio.opus", "asr.srt", "video.srt", "video.vtt"] {
        assert!(
            project_dir.join(file).exists(),
            "expected output file {file} to exist"
        );
    }

    let step_end_count = events
        .iter()
        .filter(|e| e.event_type == grillmaster_core::store::models::EventType::StepEnd)
        .count();
    assert!(
        step_end_count >= 7,
        "expected at least 7 step_end events, got {step_end_count}"
    );

    runner.shutdown();
}

/// S2: submitting the same source twice conflicts on the second call and
/// does not create a second project.
#[test]
fn s2_duplicate_submission_conflicts() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(Store::open_in_memory().unwrap());
    let config = test_config(dir.path().to_path_buf(), "fake_yt_dlp.sh", "fake_ffmpeg.sh");
    let runner = mock_runner(Arc::clone(&store), config);

    let first = submit_project(
        &store,
        &runner,
        SubmitInput {
            source_or_url: "BV18KBJBeEmV",
            translation_hint: None,
        },
    )
    .unwrap();
    assert_eq!(first.status, "queued");

    let second = submit_project(
        &store,
        &runner,
        SubmitInput {
            source_or_url: "BV18KBJBeEmV",
            translation_hint: None,
        },
    );
    assert!(matches!(second, Err(CoreError::Conflict(_))));
    assert_eq!(store.list_projects(200).unwrap().len(), 1);
    assert_eq!(store.list_tasks(200).unwrap().len(), 1);

    runner.shutdown();
}

/// S3: cancel while a step is running. The in-flight step row stays
/// `running`/`attempt=1` (not overwritten), the task and project end up
/// `canceled`, and a warn-level event mentions cancellation.
#[test]
fn s3_cancel_while_running_leaves_terminal_canceled_state() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(Store::open_in_memory().unwrap());
    let config = test_config(dir.path().to_path_buf(), "fake_yt_dlp_slow.sh", "fake_ffmpeg.sh");
    let runner = mock_runner(Arc::clone(&store), config);

    let output = submit_project(
        &store,
        &runner,
        SubmitInput {
            source_or_url: "BV18KBJBeEmV",
            translation_hint: None,
        },
    )
    .unwrap();

    let reached_download = wait_until(Duration::from_secs(5), || {
        store
            .get_task_by_id(&output.task_id)
            .unwrap()
            .map(|(t, _)| t.status == TaskStatus::Running && t.current_step == "download_video")
            .unwrap_or(false)
    });
    assert!(reached_download, "task never reached download_video");

    let status = store.request_task_cancel(&output.task_id).unwrap();
    assert_eq!(status, TaskStatus::Canceling);

    let canceled = wait_until(Duration::from_secs(10), || {
        store
            .get_task_by_id(&output.task_id)
            .unwrap()
            .map(|(t, _)| t.status == TaskStatus::Canceled)
            .unwrap_or(false)
    });
    assert!(canceled, "task never reached canceled");

    let (project, _) = store.get_project_by_id(&output.project_id).unwrap().unwrap();
    assert_eq!(project.status, ProjectStatus::Canceled);

    let states = store.get_task_step_states(&output.task_id).unwrap();
    let download_state = states
        .iter()
        .find(|s| s.step == "download_video")
        .expect("download_video step row must exist");
    assert_eq!(download_state.status, StepStatus::Running);
    assert_eq!(download_state.attempt, 1);

    let (_, events) = store.get_task_by_id(&output.task_id).unwrap().unwrap();
    assert!(events.iter().any(|e| e.message.to_lowercase().contains("canceled")
        && e.level == grillmaster_core::store::models::EventLevel::Warn));

    runner.shutdown();
}

/// A deterministic stand-in for a live-mode ASR credential/network
/// failure: always returns a non-retryable pipeline error so the task
/// fails at `run_asr` without depending on network access in tests.
struct FailingAsrProvider;

impl AsrProvider for FailingAsrProvider {
    fn run_asr(&self, _req: &AsrRequest<'_>, _logger: &TaskLogger) -> Result<(), CoreError> {
        let err = CoreError::pipeline("run_asr", "invalid DASHSCOPE_API_KEY", false);
        assert!(!err.is_retryable());
        Err(err)
    }
}

/// S4: a task that fails at `run_asr` can be retried; the retry resumes
/// from `run_asr` onward, leaving the already-completed steps untouched.
#[test]
fn s4_retry_after_failure_resumes_from_failed_step() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(Store::open_in_memory().unwrap());
    let config = test_config(dir.path().to_path_buf(), "fake_yt_dlp.sh", "fake_ffmpeg.sh");
    let runner = mock_runner_with_asr(Arc::clone(&store), config, Box::new(FailingAsrProvider));

    let output = submit_project(
        &store,
        &runner,
        SubmitInput {
            source_or_url: "BV18KBJBeEmV",
            translation_hint: None,
        },
    )
    .unwrap();

    let failed = wait_until(Duration::from_secs(10), || {
        store
            .get_task_by_id(&output.task_id)
            .unwrap()
            .map(|(t, _)| t.status == TaskStatus::Failed)
            .unwrap_or(false)
    });
    assert!(failed, "task never reached failed");

    let (task, _) = store.get_task_by_id(&output.task_id).unwrap().unwrap();
    assert_eq!(task.current_step, "run_asr");
    assert!(task.error_message.is_some());

    let states_before = store.get_task_step_states(&output.task_id).unwrap();
    let completed_before: Vec<_> = states_before
        .iter()
        .filter(|s| s.status == StepStatus::Completed)
        .map(|s| s.step.clone())
        .collect();
    assert!(completed_before.contains(&"fetch_metadata".to_string()));
    assert!(completed_before.contains(&"download_video".to_string()));
    assert!(completed_before.contains(&"extract_audio".to_string()));
    assert!(!completed_before.contains(&"run_asr".to_string()));

    runner.shutdown();

    // A second runner, now with a working ASR provider, picks up the retry.
    let runner2 = mock_runner(Arc::clone(&store), test_config(
        dir.path().to_path_buf(),
        "fake_yt_dlp.sh",
        "fake_ffmpeg.sh",
    ));
    let (task_id, _project_id) = store.retry_task(&output.task_id).unwrap();
    runner2.enqueue(&task_id, &output.project_id);

    let completed = wait_until(Duration::from_secs(10), || {
        store
            .get_task_by_id(&task_id)
            .unwrap()
            .map(|(t, _)| t.status == TaskStatus::Completed)
            .unwrap_or(false)
    });
    assert!(completed, "retried task never completed");

    let states_after: std::collections::HashMap<_, _> = store
        .get_task_step_states(&task_id)
        .unwrap()
        .into_iter()
        .map(|s| (s.step.clone(), s))
        .collect();
    for step in ["fetch_metadata", "download_video", "extract_audio"] {
        assert_eq!(
            states_after[step].attempt, 1,
            "{step} should not have been re-run by the retry"
        );
    }
    assert_eq!(states_after["run_asr"].status, StepStatus::Completed);

    runner2.shutdown();
}

/// S5: a task left `running` in the store (as if the process crashed
/// mid-step) is marked `failed` with the fixed crash-recovery message as
/// soon as a new `PipelineRunner` boots, and is never re-enqueued.
#[test]
fn s5_crash_recovery_fails_interrupted_task_without_reenqueue() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(Store::open_in_memory().unwrap());

    let (project_id, task_id) = store
        .submit_project(
            grillmaster_core::store::models::Source::Bilibili,
            "BV18KBJBeEmV",
            "BV18KBJBeEmV",
            None,
        )
        .unwrap();
    store
        .update_task_progress(
            &task_id,
            TaskStatus::Running,
            "translate_subtitles",
            75,
            "translating",
            None,
            None,
            None,
            None,
        )
        .unwrap();
    store.mark_step_start(&task_id, &project_id, "translate_subtitles").unwrap();

    let config = test_config(dir.path().to_path_buf(), "fake_yt_dlp.sh", "fake_ffmpeg.sh");
    let runner = mock_runner(Arc::clone(&store), config);

    // Recovery runs synchronously inside `PipelineRunner::new`.
    let (task, events) = store.get_task_by_id(&task_id).unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Failed);
    assert_eq!(
        task.error_message.as_deref(),
        Some("Task execution interrupted by server restart")
    );
    let (project, _) = store.get_project_by_id(&project_id).unwrap().unwrap();
    assert_eq!(project.status, ProjectStatus::Failed);
    assert!(events
        .iter()
        .any(|e| e.event_type == grillmaster_core::store::models::EventType::Error));

    // No automatic re-enqueue: give the worker a moment, then confirm the
    // task is still in the terminal failed state it was left in.
    std::thread::sleep(Duration::from_millis(200));
    let (task_again, _) = store.get_task_by_id(&task_id).unwrap().unwrap();
    assert_eq!(task_again.status, TaskStatus::Failed);

    runner.shutdown();
}

/// S6: deleting a project cascades every row keyed by that project id and
/// renames (or tolerates the absence of) its working directory.
#[test]
fn s6_delete_project_cascades_rows_and_renames_directory() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(Store::open_in_memory().unwrap());
    let config = test_config(dir.path().to_path_buf(), "fake_yt_dlp.sh", "fake_ffmpeg.sh");
    let runner = mock_runner(Arc::clone(&store), config.clone());

    let output = submit_project(
        &store,
        &runner,
        SubmitInput {
            source_or_url: "BV18KBJBeEmV",
            translation_hint: None,
        },
    )
    .unwrap();
    wait_until(Duration::from_secs(10), || {
        store
            .get_task_by_id(&output.task_id)
            .unwrap()
            .map(|(t, _)| t.status.is_terminal())
            .unwrap_or(false)
    });

    store
        .upsert_watch_progress(&output.project_id, "viewer-1", 10.0, 120.0)
        .unwrap();

    let project_dir = config.project_dir(&output.project_id);
    assert!(project_dir.exists());

    grillmaster_core::commands::delete_project(&store, &config, &output.project_id).unwrap();

    assert!(store.get_project_by_id(&output.project_id).unwrap().is_none());
    assert!(store.get_task_by_id(&output.task_id).unwrap().is_none());
    assert!(store.get_task_step_states(&output.task_id).unwrap().is_empty());
    assert!(store
        .get_watch_progress(&output.project_id, "viewer-1")
        .unwrap()
        .is_none());

    assert!(!project_dir.exists());
    assert!(config
        .data_dir
        .join(format!("_deleted_{}", output.project_id))
        .exists());

    runner.shutdown();
}
