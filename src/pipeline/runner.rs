//! The in-memory FIFO queue and single dispatcher thread.
//!
//! A `Condvar`-signalled worker thread reads from a `VecDeque` behind the
//! same `Mutex` guarding the queued-id set. Exactly one task runs at a
//! time.

use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;

use crate::config::Config;
use crate::error::CoreError;
use crate::logging::TaskLogger;
use crate::store::models::{EventLevel, EventType, ProjectStatus, ProjectUpdate, StepStatus, TaskStatus};
use crate::store::Store;
use crate::sync_ext::{CondvarExt, MutexExt};

use super::context::StepContext;
use super::steps::{self, Providers};
use super::StepId;

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
struct QueueItem {
    task_id: String,
    project_id: String,
}

struct RunnerState {
    queue: VecDeque<QueueItem>,
    queued: HashSet<String>,
    shutdown: bool,
}

pub struct PipelineRunner {
    store: Arc<Store>,
    config: Arc<Config>,
    providers: Arc<Providers>,
    state: Mutex<RunnerState>,
    condvar: Condvar,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl PipelineRunner {
    /// Runs the crash-recovery sweep once, then spawns the single worker
    /// thread. Recovery never re-enqueues; humans retry explicitly.
    pub fn new(store: Arc<Store>, config: Arc<Config>, providers: Arc<Providers>) -> Arc<Self> {
        let runner = Arc::new(Self {
            store,
            config,
            providers,
            state: Mutex::new(RunnerState {
                queue: VecDeque::new(),
                queued: HashSet::new(),
                shutdown: false,
            }),
            condvar: Condvar::new(),
            worker: Mutex::new(None),
        });

        runner.recover_interrupted_tasks();

        let worker_runner = Arc::clone(&runner);
        let handle = std::thread::spawn(move || worker_runner.worker_loop());
        *runner.worker.lock_unpoisoned() = Some(handle);

        runner
    }

    fn recover_interrupted_tasks(&self) {
        let interrupted = match self.store.get_interrupted_tasks() {
            Ok(tasks) => tasks,
            Err(e) => {
                tracing::error!("crash recovery sweep failed to load interrupted tasks: {e}");
                return;
            }
        };

        for task in interrupted {
            let result = match task.status {
                TaskStatus::Running => {
                    let update = self.store.update_task_progress(
                        &task.task_id,
                        TaskStatus::Failed,
                        &task.current_step,
                        task.progress_percent,
                        "Task execution interrupted by server restart",
                        Some(EventType::Error),
                        Some(EventLevel::Error),
                        Some("Server restart detected while task was running"),
                        None,
                    );
                    if update.is_ok() {
                        let _ = self.store.update_project_from_pipeline(
                            &task.project_id,
                            &ProjectUpdate {
                                status: Some(ProjectStatus::Failed),
                                ..Default::default()
                            },
                        );
                    }
                    update
                }
                TaskStatus::Canceling => self.store.mark_task_canceled(
                    &task.task_id,
                    "Task canceled by user (processed after restart)",
                    &task.current_step,
                    task.progress_percent,
                ),
                _ => Ok(()),
            };

            if let Err(e) = result {
                tracing::error!(task_id = %task.task_id, "crash recovery failed for task: {e}");
            }
        }
    }

    /// Idempotent: returns immediately if `task_id` is already queued.
    pub fn enqueue(&self, task_id: &str, project_id: &str) {
        let mut state = self.state.lock_unpoisoned();
        if !state.queued.insert(task_id.to_owned()) {
            return;
        }
        state.queue.push_back(QueueItem {
            task_id: task_id.to_owned(),
            project_id: project_id.to_owned(),
        });
        self.condvar.notify_one();
    }

    pub fn shutdown(&self) {
        self.state.lock_unpoisoned().shutdown = true;
        self.condvar.notify_all();
        if let Some(handle) = self.worker.lock_unpoisoned().take() {
            let _ = handle.join();
        }
    }

    fn worker_loop(self: Arc<Self>) {
        loop {
            let item = {
                let mut state = self.state.lock_unpoisoned();
                state = self
                    .condvar
                    .wait_while_unpoisoned(state, |s| s.queue.is_empty() && !s.shutdown);
                if state.shutdown && state.queue.is_empty() {
                    return;
                }
                state.queue.pop_front()
            };

            let Some(item) = item else { continue };

            if let Err(e) = self.run_one(&item) {
                tracing::warn!(task_id = %item.task_id, "task run ended with error: {e}");
            }

            self.state.lock_unpoisoned().queued.remove(&item.task_id);
        }
    }

    fn run_one(&self, item: &QueueItem) -> Result<(), CoreError> {
        let Some((task, _events)) = self.store.get_task_by_id(&item.task_id)? else {
            return Ok(());
        };
        if task.status == TaskStatus::Canceled {
            return Ok(());
        }

        let Some((project, _tasks)) = self.store.get_project_by_id(&item.project_id)? else {
            self.store.update_task_progress(
                &item.task_id,
                TaskStatus::Failed,
                &task.current_step,
                task.progress_percent,
                "project not found",
                Some(EventType::Error),
                Some(EventLevel::Error),
                Some("project not found"),
                None,
            )?;
            return Ok(());
        };

        let project_dir = self.config.project_dir(&project.project_id);
        std::fs::create_dir_all(&project_dir)?;

        let source_url = crate::source_parser::derive_source_url(
            &project.original_input,
            project.source,
            &project.source_video_id,
        );

        let mut states: std::collections::HashMap<String, crate::store::models::TaskStepState> =
            self.store
                .get_task_step_states(&task.task_id)?
                .into_iter()
                .map(|s| (s.step.clone(), s))
                .collect();

        for step_id in StepId::ALL {
            if self.store.is_task_cancel_requested(&task.task_id)? {
                self.store.mark_task_canceled(
                    &task.task_id,
                    "Task canceled by user",
                    step_id.name(),
                    step_id.enter_percent(),
                )?;
                return Ok(());
            }

            if states
                .get(step_id.name())
                .is_some_and(|s| s.status == StepStatus::Completed)
            {
                let logger = self.logger_for(&task.task_id, &project.project_id, step_id);
                logger.debug(format!("skipping already-completed step {}", step_id.name()));
                continue;
            }

            self.store.update_project_from_pipeline(
                &project.project_id,
                &ProjectUpdate {
                    status: Some(step_id.project_status()),
                    ..Default::default()
                },
            )?;
            self.store.update_task_progress(
                &task.task_id,
                TaskStatus::Running,
                step_id.name(),
                step_id.enter_percent(),
                step_id.message(),
                None,
                None,
                None,
                None,
            )?;

            self.store.mark_step_start(&task.task_id, &project.project_id, step_id.name())?;
            self.store.append_task_event(
                &task.task_id,
                &project.project_id,
                step_id.name(),
                EventType::StepStart,
                EventLevel::Info,
                step_id.message(),
                step_id.enter_percent(),
                None,
                None,
            )?;

            let logger = self.logger_for(&task.task_id, &project.project_id, step_id);
            let ctx = StepContext::new(
                task.task_id.clone(),
                project.project_id.clone(),
                project_dir.clone(),
                source_url.clone(),
                states.clone(),
            );

            let outcome = self.run_step_body(step_id, &ctx, project.translation_hint.as_deref(), &logger);

            match outcome {
                Ok(output_json) => {
                    let duration_ms = self.store.mark_step_end(
                        &task.task_id,
                        step_id.name(),
                        StepStatus::Completed,
                        None,
                        Some(&output_json),
                    )?;
                    self.store.append_task_event(
                        &task.task_id,
                        &project.project_id,
                        step_id.name(),
                        EventType::StepEnd,
                        EventLevel::Info,
                        &format!("{} completed", step_id.name()),
                        step_id.enter_percent(),
                        Some(duration_ms),
                        None,
                    )?;
                    states = self
                        .store
                        .get_task_step_states(&task.task_id)?
                        .into_iter()
                        .map(|s| (s.step.clone(), s))
                        .collect();
                }
                Err(CoreError::Canceled) => {
                    // The subprocess was killed mid-step because a cancel was
                    // observed on an I/O tick. Leave the step row as `running`
                    // with its attempt intact (per spec, retry resumes
                    // cleanly) and transition through the normal cancel path
                    // rather than marking the step failed.
                    self.store.mark_task_canceled(
                        &task.task_id,
                        "Task canceled by user",
                        step_id.name(),
                        step_id.enter_percent(),
                    )?;
                    return Ok(());
                }
                Err(e) => {
                    let message = e.to_string();
                    self.store.mark_step_end(
                        &task.task_id,
                        step_id.name(),
                        StepStatus::Failed,
                        Some(&message),
                        None,
                    )?;
                    self.store.update_project_from_pipeline(
                        &project.project_id,
                        &ProjectUpdate {
                            status: Some(ProjectStatus::Failed),
                            ..Default::default()
                        },
                    )?;
                    self.store.update_task_progress(
                        &task.task_id,
                        TaskStatus::Failed,
                        step_id.name(),
                        step_id.enter_percent(),
                        &message,
                        Some(EventType::Error),
                        Some(EventLevel::Error),
                        Some(&message),
                        None,
                    )?;
                    logger.error(&message, Some(&message));
                    return Ok(());
                }
            }

            if self.store.is_task_cancel_requested(&task.task_id)? {
                self.store.mark_task_canceled(
                    &task.task_id,
                    "Task canceled by user",
                    step_id.name(),
                    step_id.enter_percent(),
                )?;
                return Ok(());
            }
        }

        self.store.update_task_progress(
            &task.task_id,
            TaskStatus::Completed,
            "done",
            100,
            "Pipeline completed",
            None,
            None,
            None,
            None,
        )?;
        Ok(())
    }

    fn logger_for(&self, task_id: &str, project_id: &str, step_id: StepId) -> TaskLogger {
        TaskLogger::new(
            Arc::clone(&self.store),
            task_id,
            project_id,
            step_id.name(),
            step_id.enter_percent(),
        )
    }

    fn run_step_body(
        &self,
        step_id: StepId,
        ctx: &StepContext,
        translation_hint: Option<&str>,
        logger: &TaskLogger,
    ) -> Result<serde_json::Value, CoreError> {
        match step_id {
            StepId::FetchMetadata => steps::fetch_metadata(ctx, &self.config, &self.store, logger),
            StepId::DownloadVideo => steps::download_video(ctx, &self.config, &self.store, logger),
            StepId::ExtractAudio => steps::extract_audio(ctx, &self.config, logger),
            StepId::RunAsr => steps::run_asr(ctx, &self.store, &self.providers, logger),
            StepId::TranslateSubtitles => {
                steps::translate_subtitles(ctx, &self.store, &self.providers, translation_hint, logger)
            }
            StepId::BuildVtt => steps::build_vtt(ctx),
            StepId::FinalizeProject => steps::finalize_project(ctx, &self.store),
        }
    }
}
