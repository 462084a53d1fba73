//! The durable relational store.
//!
//! Every status mutation in the system goes through `Store` — it is the
//! only component permitted to write the five tables, and every operation
//! here is synchronously durable (SQLite, not buffered) before it returns
//! success. A single connection behind a `Mutex` is deliberate: SQLite
//! serializes writers regardless, and a connection pool would buy nothing
//! for a single-worker runtime.

pub mod models;
mod schema;

use std::path::Path;

use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::error::CoreError;
use crate::sync_ext::MutexExt;
use models::{
    unix_millis, EventLevel, EventType, Project, ProjectStatus, ProjectUpdate, Source, StepStatus,
    Task, TaskEvent, TaskStatus, TaskStepState, WatchProgress,
};

pub struct Store {
    conn: std::sync::Mutex<Connection>,
}

impl Store {
    pub fn open(db_path: &Path) -> Result<Self, CoreError> {
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(db_path)?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self, CoreError> {
        let conn = Connection::open_in_memory()?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self, CoreError> {
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.execute_batch(schema::SCHEMA_SQL)?;
        Ok(Self {
            conn: std::sync::Mutex::new(conn),
        })
    }

    // ---- submission -------------------------------------------------

    /// Inserts project (status=queued), task (status=queued, step=submit,
    /// percent=0), and an initial `system/info` event atomically. Fails
    /// with `Conflict` when `(source, sourceVideoId)` already exists.
    pub fn submit_project(
        &self,
        source: Source,
        source_video_id: &str,
        original_input: &str,
        translation_hint: Option<&str>,
    ) -> Result<(String, String), CoreError> {
        let mut conn = self.conn.lock_unpoisoned();
        let tx = conn.transaction()?;

        let exists: Option<String> = tx
            .query_row(
                "SELECT project_id FROM projects WHERE source = ?1 AND source_video_id = ?2",
                params![source.as_str(), source_video_id],
                |row| row.get(0),
            )
            .optional()?;
        if exists.is_some() {
            return Err(CoreError::Conflict(format!(
                "project already exists for ({}, {source_video_id})",
                source.as_str()
            )));
        }

        let project_id = uuid::Uuid::new_v4().to_string();
        let task_id = uuid::Uuid::new_v4().to_string();
        let now = unix_millis();

        tx.execute(
            "INSERT INTO projects (
                project_id, source, source_video_id, original_input, translation_hint,
                status, llm_cost_twd, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0, ?7, ?7)",
            params![
                project_id,
                source.as_str(),
                source_video_id,
                original_input,
                translation_hint,
                ProjectStatus::Queued.as_str(),
                now,
            ],
        )?;

        tx.execute(
            "INSERT INTO tasks (
                task_id, project_id, type, status, current_step, progress_percent,
                created_at, updated_at
            ) VALUES (?1, ?2, 'pipeline', ?3, 'submit', 0, ?4, ?4)",
            params![task_id, project_id, TaskStatus::Queued.as_str(), now],
        )?;

        insert_event(
            &tx,
            &task_id,
            &project_id,
            "submit",
            EventType::System,
            EventLevel::Info,
            "project submitted",
            0,
            None,
            None,
            now,
        )?;

        tx.commit()?;
        Ok((project_id, task_id))
    }

    // ---- reads --------------------------------------------------------

    pub fn list_projects(&self, limit: i64) -> Result<Vec<Project>, CoreError> {
        let conn = self.conn.lock_unpoisoned();
        let mut stmt = conn.prepare(
            "SELECT * FROM projects ORDER BY created_at DESC LIMIT ?1",
        )?;
        let mut projects: Vec<Project> = stmt
            .query_map(params![limit], project_from_row)?
            .collect::<Result<_, _>>()?;

        for project in &mut projects {
            project.latest_task = latest_task_for_project(&conn, &project.project_id)?;
        }
        Ok(projects)
    }

    pub fn list_tasks(&self, limit: i64) -> Result<Vec<Task>, CoreError> {
        let conn = self.conn.lock_unpoisoned();
        let mut stmt = conn.prepare("SELECT * FROM tasks ORDER BY updated_at DESC LIMIT ?1")?;
        let tasks = stmt
            .query_map(params![limit], task_from_row)?
            .collect::<Result<_, _>>()?;
        Ok(tasks)
    }

    /// Returns the project plus up to 20 of its tasks, newest first.
    pub fn get_project_by_id(
        &self,
        project_id: &str,
    ) -> Result<Option<(Project, Vec<Task>)>, CoreError> {
        let conn = self.conn.lock_unpoisoned();
        let project: Option<Project> = conn
            .query_row(
                "SELECT * FROM projects WHERE project_id = ?1",
                params![project_id],
                project_from_row,
            )
            .optional()?;
        let Some(project) = project else {
            return Ok(None);
        };

        let mut stmt = conn.prepare(
            "SELECT * FROM tasks WHERE project_id = ?1 ORDER BY created_at DESC LIMIT 20",
        )?;
        let tasks = stmt
            .query_map(params![project_id], task_from_row)?
            .collect::<Result<_, _>>()?;
        Ok(Some((project, tasks)))
    }

    /// Returns the task plus up to 400 of its events, newest first.
    pub fn get_task_by_id(
        &self,
        task_id: &str,
    ) -> Result<Option<(Task, Vec<TaskEvent>)>, CoreError> {
        let conn = self.conn.lock_unpoisoned();
        let task: Option<Task> = conn
            .query_row(
                "SELECT * FROM tasks WHERE task_id = ?1",
                params![task_id],
                task_from_row,
            )
            .optional()?;
        let Some(task) = task else {
            return Ok(None);
        };

        let mut stmt = conn.prepare(
            "SELECT * FROM task_events WHERE task_id = ?1 ORDER BY created_at DESC LIMIT 400",
        )?;
        let events = stmt
            .query_map(params![task_id], task_event_from_row)?
            .collect::<Result<_, _>>()?;
        Ok(Some((task, events)))
    }

    pub fn get_task_step_states(&self, task_id: &str) -> Result<Vec<TaskStepState>, CoreError> {
        let conn = self.conn.lock_unpoisoned();
        let mut stmt =
            conn.prepare("SELECT * FROM task_step_states WHERE task_id = ?1")?;
        let states = stmt
            .query_map(params![task_id], step_state_from_row)?
            .collect::<Result<_, _>>()?;
        Ok(states)
    }

    pub fn get_interrupted_tasks(&self) -> Result<Vec<Task>, CoreError> {
        let conn = self.conn.lock_unpoisoned();
        let mut stmt = conn.prepare(
            "SELECT * FROM tasks WHERE status IN ('running', 'canceling')",
        )?;
        let tasks = stmt.query_map([], task_from_row)?.collect::<Result<_, _>>()?;
        Ok(tasks)
    }

    pub fn is_task_cancel_requested(&self, task_id: &str) -> Result<bool, CoreError> {
        let conn = self.conn.lock_unpoisoned();
        let row: Option<(Option<i64>, String)> = conn
            .query_row(
                "SELECT cancel_requested_at, status FROM tasks WHERE task_id = ?1",
                params![task_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        let Some((cancel_requested_at, status)) = row else {
            return Err(CoreError::NotFound(format!("task {task_id}")));
        };
        Ok(cancel_requested_at.is_some() || status == "canceling")
    }

    // ---- writes ---------------------------------------------------------

    pub fn update_project_from_pipeline(
        &self,
        project_id: &str,
        update: &ProjectUpdate,
    ) -> Result<(), CoreError> {
        let conn = self.conn.lock_unpoisoned();
        apply_project_update(&conn, project_id, update)
    }

    #[allow(clippy::too_many_arguments)]
    pub fn update_task_progress(
        &self,
        task_id: &str,
        status: TaskStatus,
        step: &str,
        percent: i64,
        message: &str,
        event_type: Option<EventType>,
        level: Option<EventLevel>,
        error_message: Option<&str>,
        duration_ms: Option<i64>,
    ) -> Result<(), CoreError> {
        let mut conn = self.conn.lock_unpoisoned();
        let tx = conn.transaction()?;
        let now = unix_millis();

        let existing: Option<(Option<i64>, String)> = tx
            .query_row(
                "SELECT started_at, project_id FROM tasks WHERE task_id = ?1",
                params![task_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        let Some((started_at, project_id)) = existing else {
            return Err(CoreError::NotFound(format!("task {task_id}")));
        };

        let started_at = started_at.unwrap_or(now);
        let finished_at: Option<i64> = if status.is_terminal() { Some(now) } else { None };

        tx.execute(
            "UPDATE tasks SET status = ?1, current_step = ?2, progress_percent = ?3,
                message = ?4, error_message = ?5, started_at = ?6, finished_at = ?7,
                updated_at = ?8
             WHERE task_id = ?9",
            params![
                status.as_str(),
                step,
                percent,
                message,
                error_message,
                started_at,
                finished_at,
                now,
                task_id,
            ],
        )?;

        insert_event(
            &tx,
            task_id,
            &project_id,
            step,
            event_type.unwrap_or(EventType::System),
            level.unwrap_or(EventLevel::Info),
            message,
            percent,
            duration_ms,
            error_message,
            now,
        )?;

        tx.commit()?;
        Ok(())
    }

    pub fn mark_step_start(
        &self,
        task_id: &str,
        project_id: &str,
        step: &str,
    ) -> Result<(), CoreError> {
        let conn = self.conn.lock_unpoisoned();
        let now = unix_millis();
        let prev_attempt: i64 = conn
            .query_row(
                "SELECT attempt FROM task_step_states WHERE task_id = ?1 AND step = ?2",
                params![task_id, step],
                |row| row.get(0),
            )
            .optional()?
            .unwrap_or(0);

        conn.execute(
            "INSERT INTO task_step_states (
                task_id, project_id, step, status, attempt, started_at, finished_at,
                duration_ms, error_message, output_json
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, NULL, NULL, NULL, NULL)
             ON CONFLICT (task_id, step) DO UPDATE SET
                status = excluded.status,
                attempt = excluded.attempt,
                started_at = excluded.started_at,
                finished_at = NULL,
                duration_ms = NULL,
                error_message = NULL",
            params![
                task_id,
                project_id,
                step,
                StepStatus::Running.as_str(),
                prev_attempt + 1,
                now,
            ],
        )?;
        Ok(())
    }

    /// Writes a terminal step status. Returns the computed duration in ms.
    pub fn mark_step_end(
        &self,
        task_id: &str,
        step: &str,
        status: StepStatus,
        error_message: Option<&str>,
        output_json: Option<&serde_json::Value>,
    ) -> Result<i64, CoreError> {
        let conn = self.conn.lock_unpoisoned();
        let now = unix_millis();
        let started_at: Option<i64> = conn
            .query_row(
                "SELECT started_at FROM task_step_states WHERE task_id = ?1 AND step = ?2",
                params![task_id, step],
                |row| row.get(0),
            )
            .optional()?
            .flatten();
        let duration_ms = (now - started_at.unwrap_or(now)).max(0);

        let output_text = output_json.map(serde_json::to_string).transpose()?;

        conn.execute(
            "UPDATE task_step_states SET status = ?1, finished_at = ?2, duration_ms = ?3,
                error_message = ?4, output_json = ?5
             WHERE task_id = ?6 AND step = ?7",
            params![
                status.as_str(),
                now,
                duration_ms,
                error_message,
                output_text,
                task_id,
                step,
            ],
        )?;
        Ok(duration_ms)
    }

    /// State-dependent cancellation request; returns the task's status
    /// after the call.
    pub fn request_task_cancel(&self, task_id: &str) -> Result<TaskStatus, CoreError> {
        let mut conn = self.conn.lock_unpoisoned();
        let tx = conn.transaction()?;
        let now = unix_millis();

        let row: Option<(String, String)> = tx
            .query_row(
                "SELECT status, project_id FROM tasks WHERE task_id = ?1",
                params![task_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        let Some((status_str, project_id)) = row else {
            return Err(CoreError::NotFound(format!("task {task_id}")));
        };
        let status = TaskStatus::from_str_opt(&status_str)
            .ok_or_else(|| CoreError::infrastructure("unrecognized task status in store"))?;

        let result_status = match status {
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Canceled => status,
            TaskStatus::Queued => {
                tx.execute(
                    "UPDATE tasks SET status = ?1, canceled_at = ?2, finished_at = ?2, updated_at = ?2 WHERE task_id = ?3",
                    params![TaskStatus::Canceled.as_str(), now, task_id],
                )?;
                tx.execute(
                    "UPDATE projects SET status = ?1, updated_at = ?2 WHERE project_id = ?3",
                    params![ProjectStatus::Canceled.as_str(), now, project_id],
                )?;
                insert_event(
                    &tx,
                    task_id,
                    &project_id,
                    "cancel",
                    EventType::System,
                    EventLevel::Warn,
                    "cancel requested on a queued task; canceled immediately",
                    0,
                    None,
                    None,
                    now,
                )?;
                TaskStatus::Canceled
            }
            TaskStatus::Running | TaskStatus::Canceling => {
                tx.execute(
                    "UPDATE tasks SET status = ?1, cancel_requested_at = ?2, updated_at = ?2 WHERE task_id = ?3",
                    params![TaskStatus::Canceling.as_str(), now, task_id],
                )?;
                tx.execute(
                    "UPDATE projects SET status = ?1, updated_at = ?2 WHERE project_id = ?3",
                    params![ProjectStatus::Canceling.as_str(), now, project_id],
                )?;
                insert_event(
                    &tx,
                    task_id,
                    &project_id,
                    "cancel",
                    EventType::System,
                    EventLevel::Warn,
                    "cancel requested; will be observed at the next safe point",
                    0,
                    None,
                    None,
                    now,
                )?;
                TaskStatus::Canceling
            }
        };

        tx.commit()?;
        Ok(result_status)
    }

    pub fn mark_task_canceled(
        &self,
        task_id: &str,
        reason: &str,
        step: &str,
        percent: i64,
    ) -> Result<(), CoreError> {
        let mut conn = self.conn.lock_unpoisoned();
        let tx = conn.transaction()?;
        let now = unix_millis();

        let project_id: Option<String> = tx
            .query_row(
                "SELECT project_id FROM tasks WHERE task_id = ?1",
                params![task_id],
                |row| row.get(0),
            )
            .optional()?;
        let Some(project_id) = project_id else {
            return Err(CoreError::NotFound(format!("task {task_id}")));
        };

        tx.execute(
            "UPDATE tasks SET status = ?1, current_step = ?2, progress_percent = ?3,
                message = ?4, canceled_at = ?5, finished_at = ?5, updated_at = ?5
             WHERE task_id = ?6",
            params![
                TaskStatus::Canceled.as_str(),
                step,
                percent,
                reason,
                now,
                task_id,
            ],
        )?;
        tx.execute(
            "UPDATE projects SET status = ?1, updated_at = ?2 WHERE project_id = ?3",
            params![ProjectStatus::Canceled.as_str(), now, project_id],
        )?;
        insert_event(
            &tx,
            task_id,
            &project_id,
            step,
            EventType::System,
            EventLevel::Warn,
            reason,
            percent,
            None,
            None,
            now,
        )?;

        tx.commit()?;
        Ok(())
    }

    /// Resets task + project to `queued` and resets every non-completed
    /// step row to `pending`. Returns `(taskId, projectId)` so the caller
    /// can re-enqueue.
    pub fn retry_task(&self, task_id: &str) -> Result<(String, String), CoreError> {
        let mut conn = self.conn.lock_unpoisoned();
        let tx = conn.transaction()?;
        let now = unix_millis();

        let project_id: Option<String> = tx
            .query_row(
                "SELECT project_id FROM tasks WHERE task_id = ?1",
                params![task_id],
                |row| row.get(0),
            )
            .optional()?;
        let Some(project_id) = project_id else {
            return Err(CoreError::NotFound(format!("task {task_id}")));
        };

        tx.execute(
            "UPDATE tasks SET status = ?1, current_step = 'retry', progress_percent = 0,
                error_message = NULL, cancel_requested_at = NULL, canceled_at = NULL,
                finished_at = NULL, updated_at = ?2
             WHERE task_id = ?3",
            params![TaskStatus::Queued.as_str(), now, task_id],
        )?;
        tx.execute(
            "UPDATE projects SET status = ?1, updated_at = ?2 WHERE project_id = ?3",
            params![ProjectStatus::Queued.as_str(), now, project_id],
        )?;
        tx.execute(
            "UPDATE task_step_states SET status = ?1, attempt = 0, started_at = NULL,
                finished_at = NULL, duration_ms = NULL, error_message = NULL
             WHERE task_id = ?2 AND status != ?3",
            params![StepStatus::Pending.as_str(), task_id, StepStatus::Completed.as_str()],
        )?;
        insert_event(
            &tx,
            task_id,
            &project_id,
            "retry",
            EventType::System,
            EventLevel::Info,
            "task retried; non-completed steps reset to pending",
            0,
            None,
            None,
            now,
        )?;

        tx.commit()?;
        Ok((task_id.to_owned(), project_id))
    }

    pub fn delete_project(&self, project_id: &str) -> Result<(), CoreError> {
        let mut conn = self.conn.lock_unpoisoned();
        let tx = conn.transaction()?;
        tx.execute(
            "DELETE FROM task_events WHERE project_id = ?1",
            params![project_id],
        )?;
        tx.execute(
            "DELETE FROM task_step_states WHERE project_id = ?1",
            params![project_id],
        )?;
        tx.execute(
            "DELETE FROM tasks WHERE project_id = ?1",
            params![project_id],
        )?;
        tx.execute(
            "DELETE FROM watch_progress WHERE project_id = ?1",
            params![project_id],
        )?;
        tx.execute(
            "DELETE FROM projects WHERE project_id = ?1",
            params![project_id],
        )?;
        tx.commit()?;
        Ok(())
    }

    pub fn upsert_watch_progress(
        &self,
        project_id: &str,
        viewer_id: &str,
        position_sec: f64,
        duration_sec: f64,
    ) -> Result<(), CoreError> {
        let conn = self.conn.lock_unpoisoned();
        let now = unix_millis();
        conn.execute(
            "INSERT INTO watch_progress (project_id, viewer_id, position_sec, duration_sec, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT (project_id, viewer_id) DO UPDATE SET
                position_sec = excluded.position_sec,
                duration_sec = excluded.duration_sec,
                updated_at = excluded.updated_at",
            params![project_id, viewer_id, position_sec, duration_sec, now],
        )?;
        Ok(())
    }

    pub fn get_watch_progress(
        &self,
        project_id: &str,
        viewer_id: &str,
    ) -> Result<Option<WatchProgress>, CoreError> {
        let conn = self.conn.lock_unpoisoned();
        let row = conn
            .query_row(
                "SELECT * FROM watch_progress WHERE project_id = ?1 AND viewer_id = ?2",
                params![project_id, viewer_id],
                watch_progress_from_row,
            )
            .optional()?;
        Ok(row)
    }

    /// Appends a task event. `step` defaults to `"system"`, `event_type`
    /// to [`EventType::System`], `level` to [`EventLevel::Info`] at call
    /// sites that don't care (see [`crate::logging::TaskLogger`] for the
    /// caller that always specifies them).
    #[allow(clippy::too_many_arguments)]
    pub fn append_task_event(
        &self,
        task_id: &str,
        project_id: &str,
        step: &str,
        event_type: EventType,
        level: EventLevel,
        message: &str,
        percent: i64,
        duration_ms: Option<i64>,
        error_message: Option<&str>,
    ) -> Result<(), CoreError> {
        let conn = self.conn.lock_unpoisoned();
        let now = unix_millis();
        insert_event(
            &conn,
            task_id,
            project_id,
            step,
            event_type,
            level,
            message,
            percent,
            duration_ms,
            error_message,
            now,
        )
    }
}

#[allow(clippy::too_many_arguments)]
fn insert_event(
    conn: &Connection,
    task_id: &str,
    project_id: &str,
    step: &str,
    event_type: EventType,
    level: EventLevel,
    message: &str,
    percent: i64,
    duration_ms: Option<i64>,
    error_message: Option<&str>,
    now: i64,
) -> Result<(), CoreError> {
    conn.execute(
        "INSERT INTO task_events (
            task_id, project_id, step, event_type, level, message, percent,
            duration_ms, error_message, created_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        params![
            task_id,
            project_id,
            step,
            event_type.as_str(),
            level.as_str(),
            message,
            percent,
            duration_ms,
            error_message,
            now,
        ],
    )?;
    Ok(())
}

fn apply_project_update(
    conn: &Connection,
    project_id: &str,
    update: &ProjectUpdate,
) -> Result<(), CoreError> {
    let now = unix_millis();
    conn.execute(
        "UPDATE projects SET
            status = COALESCE(?1, status),
            title = COALESCE(?2, title),
            thumbnail_url = COALESCE(?3, thumbnail_url),
            source_url = COALESCE(?4, source_url),
            media_path = COALESCE(?5, media_path),
            subtitle_path = COALESCE(?6, subtitle_path),
            asr_vtt_path = COALESCE(?7, asr_vtt_path),
            llm_cost_twd = COALESCE(?8, llm_cost_twd),
            llm_provider = COALESCE(?9, llm_provider),
            llm_model = COALESCE(?10, llm_model),
            input_tokens = COALESCE(?11, input_tokens),
            output_tokens = COALESCE(?12, output_tokens),
            updated_at = ?13
         WHERE project_id = ?14",
        params![
            update.status.map(ProjectStatus::as_str),
            update.title,
            update.thumbnail_url,
            update.source_url,
            update.media_path,
            update.subtitle_path,
            update.asr_vtt_path,
            update.llm_cost_twd,
            update.llm_provider,
            update.llm_model,
            update.input_tokens,
            update.output_tokens,
            now,
            project_id,
        ],
    )?;
    Ok(())
}

fn latest_task_for_project(conn: &Connection, project_id: &str) -> Result<Option<Task>, CoreError> {
    let task = conn
        .query_row(
            "SELECT * FROM tasks WHERE project_id = ?1 ORDER BY created_at DESC LIMIT 1",
            params![project_id],
            task_from_row,
        )
        .optional()?;
    Ok(task)
}

fn project_from_row(row: &Row<'_>) -> rusqlite::Result<Project> {
    let source: String = row.get("source")?;
    let status: String = row.get("status")?;
    Ok(Project {
        project_id: row.get("project_id")?,
        source: Source::from_str_opt(&source).unwrap_or(Source::Unknown),
        source_video_id: row.get("source_video_id")?,
        original_input: row.get("original_input")?,
        translation_hint: row.get("translation_hint")?,
        status: ProjectStatus::from_str_opt(&status).unwrap_or(ProjectStatus::Failed),
        title: row.get("title")?,
        thumbnail_url: row.get("thumbnail_url")?,
        source_url: row.get("source_url")?,
        media_path: row.get("media_path")?,
        subtitle_path: row.get("subtitle_path")?,
        asr_vtt_path: row.get("asr_vtt_path")?,
        llm_cost_twd: row.get("llm_cost_twd")?,
        llm_provider: row.get("llm_provider")?,
        llm_model: row.get("llm_model")?,
        input_tokens: row.get("input_tokens")?,
        output_tokens: row.get("output_tokens")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
        latest_task: None,
    })
}

fn task_from_row(row: &Row<'_>) -> rusqlite::Result<Task> {
    let status: String = row.get("status")?;
    Ok(Task {
        task_id: row.get("task_id")?,
        project_id: row.get("project_id")?,
        task_type: row.get("type")?,
        status: TaskStatus::from_str_opt(&status).unwrap_or(TaskStatus::Failed),
        current_step: row.get("current_step")?,
        progress_percent: row.get("progress_percent")?,
        message: row.get("message")?,
        started_at: row.get("started_at")?,
        finished_at: row.get("finished_at")?,
        cancel_requested_at: row.get("cancel_requested_at")?,
        canceled_at: row.get("canceled_at")?,
        error_message: row.get("error_message")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}

fn step_state_from_row(row: &Row<'_>) -> rusqlite::Result<TaskStepState> {
    let status: String = row.get("status")?;
    let output_text: Option<String> = row.get("output_json")?;
    let output_json = output_text.and_then(|s| serde_json::from_str(&s).ok());
    Ok(TaskStepState {
        task_id: row.get("task_id")?,
        project_id: row.get("project_id")?,
        step: row.get("step")?,
        status: StepStatus::from_str_opt(&status).unwrap_or(StepStatus::Pending),
        attempt: row.get("attempt")?,
        started_at: row.get("started_at")?,
        finished_at: row.get("finished_at")?,
        duration_ms: row.get("duration_ms")?,
        error_message: row.get("error_message")?,
        output_json,
    })
}

fn task_event_from_row(row: &Row<'_>) -> rusqlite::Result<TaskEvent> {
    let event_type: String = row.get("event_type")?;
    let level: String = row.get("level")?;
    Ok(TaskEvent {
        id: row.get("id")?,
        task_id: row.get("task_id")?,
        project_id: row.get("project_id")?,
        step: row.get("step")?,
        event_type: EventType::from_str_opt(&event_type).unwrap_or(EventType::System),
        level: EventLevel::from_str_opt(&level).unwrap_or(EventLevel::Info),
        message: row.get("message")?,
        percent: row.get("percent")?,
        duration_ms: row.get("duration_ms")?,
        error_message: row.get("error_message")?,
        created_at: row.get("created_at")?,
    })
}

fn watch_progress_from_row(row: &Row<'_>) -> rusqlite::Result<WatchProgress> {
    Ok(WatchProgress {
        project_id: row.get("project_id")?,
        viewer_id: row.get("viewer_id")?,
        position_sec: row.get("position_sec")?,
        duration_sec: row.get("duration_sec")?,
        updated_at: row.get("updated_at")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> Store {
        Store::open_in_memory().expect("open in-memory store")
    }

    #[test]
    fn submit_project_rejects_duplicates() {
        let store = store();
        store
            .submit_project(Source::Bilibili, "BV18KBJBeEmV", "BV18KBJBeEmV", None)
            .expect("first submit succeeds");

        let err = store
            .submit_project(Source::Bilibili, "BV18KBJBeEmV", "BV18KBJBeEmV", None)
            .expect_err("duplicate submit must fail");
        assert!(matches!(err, CoreError::Conflict(_)));

        assert_eq!(store.list_projects(200).unwrap().len(), 1);
    }

    #[test]
    fn mark_step_start_increments_attempt() {
        let store = store();
        let (project_id, task_id) = store
            .submit_project(Source::Youtube, "dQw4w9WgXcQ", "dQw4w9WgXcQ", None)
            .unwrap();

        store.mark_step_start(&task_id, &project_id, "fetch_metadata").unwrap();
        store.mark_step_end(&task_id, "fetch_metadata", StepStatus::Completed, None, None).unwrap();
        store.mark_step_start(&task_id, &project_id, "fetch_metadata").unwrap();

        let states = store.get_task_step_states(&task_id).unwrap();
        let state = states.iter().find(|s| s.step == "fetch_metadata").unwrap();
        assert_eq!(state.attempt, 2);
    }

    #[test]
    fn retry_resets_only_non_completed_steps() {
        let store = store();
        let (project_id, task_id) = store
            .submit_project(Source::Unknown, "abc123", "abc123", None)
            .unwrap();

        store.mark_step_start(&task_id, &project_id, "fetch_metadata").unwrap();
        store
            .mark_step_end(&task_id, "fetch_metadata", StepStatus::Completed, None, None)
            .unwrap();
        store.mark_step_start(&task_id, &project_id, "download_video").unwrap();
        store
            .mark_step_end(&task_id, "download_video", StepStatus::Failed, Some("boom"), None)
            .unwrap();
        store
            .update_task_progress(&task_id, TaskStatus::Failed, "download_video", 25, "boom", None, None, Some("boom"), None)
            .unwrap();

        store.retry_task(&task_id).unwrap();

        let states = store.get_task_step_states(&task_id).unwrap();
        let fetch = states.iter().find(|s| s.step == "fetch_metadata").unwrap();
        let download = states.iter().find(|s| s.step == "download_video").unwrap();
        assert_eq!(fetch.status, StepStatus::Completed);
        assert_eq!(download.status, StepStatus::Pending);

        let (task, _) = store.get_task_by_id(&task_id).unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Queued);
    }

    #[test]
    fn cancel_requested_is_monotone_until_retry() {
        let store = store();
        let (project_id, task_id) = store
            .submit_project(Source::Tver, "xyz987", "xyz987", None)
            .unwrap();
        store
            .update_task_progress(&task_id, TaskStatus::Running, "download_video", 25, "working", None, None, None, None)
            .unwrap();
        let _ = project_id;

        assert!(!store.is_task_cancel_requested(&task_id).unwrap());
        store.request_task_cancel(&task_id).unwrap();
        assert!(store.is_task_cancel_requested(&task_id).unwrap());

        store.mark_task_canceled(&task_id, "canceled by user", "download_video", 25).unwrap();
        assert!(store.is_task_cancel_requested(&task_id).unwrap());

        store.retry_task(&task_id).unwrap();
        assert!(!store.is_task_cancel_requested(&task_id).unwrap());
    }

    #[test]
    fn delete_project_cascades() {
        let store = store();
        let (project_id, task_id) = store
            .submit_project(Source::Bilibili, "BV1cascade01", "BV1cascade01", None)
            .unwrap();
        store.upsert_watch_progress(&project_id, "viewer-1", 10.0, 100.0).unwrap();
        store.append_task_event(&task_id, &project_id, "system", EventType::System, EventLevel::Info, "hi", 0, None, None).unwrap();

        store.delete_project(&project_id).unwrap();

        assert!(store.get_project_by_id(&project_id).unwrap().is_none());
        assert!(store.get_task_by_id(&task_id).unwrap().is_none());
        assert!(store.get_watch_progress(&project_id, "viewer-1").unwrap().is_none());
    }

    #[test]
    fn task_events_are_strictly_ordered() {
        let store = store();
        let (project_id, task_id) = store
            .submit_project(Source::Unknown, "orderedabc", "orderedabc", None)
            .unwrap();
        for i in 0..5 {
            store
                .append_task_event(&task_id, &project_id, "system", EventType::Log, EventLevel::Info, &format!("event {i}"), 0, None, None)
                .unwrap();
        }
        let (_, events) = store.get_task_by_id(&task_id).unwrap().unwrap();
        let mut ids: Vec<i64> = events.iter().map(|e| e.id).collect();
        let sorted = {
            let mut s = ids.clone();
            s.sort_unstable_by(|a, b| b.cmp(a));
            s
        };
        assert_eq!(ids, sorted);
        ids.reverse();
        assert!(ids.windows(2).all(|w| w[0] < w[1]));
    }
}
