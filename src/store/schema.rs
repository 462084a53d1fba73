//! Embedded schema, executed once per connection via `Store::open`.
//!
//! The schema never changes shape at runtime — there is no migration
//! framework here, just `CREATE TABLE IF NOT EXISTS` executed inside one
//! transaction, matching a fixed, never-altered schema.

pub const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS projects (
    project_id        TEXT PRIMARY KEY,
    source             TEXT NOT NULL,
    source_video_id    TEXT NOT NULL,
    original_input     TEXT NOT NULL,
    translation_hint   TEXT,
    status             TEXT NOT NULL,
    title              TEXT,
    thumbnail_url      TEXT,
    source_url         TEXT,
    media_path         TEXT,
    subtitle_path      TEXT,
    asr_vtt_path       TEXT,
    llm_cost_twd       INTEGER NOT NULL DEFAULT 0,
    llm_provider       TEXT,
    llm_model          TEXT,
    input_tokens       INTEGER,
    output_tokens      INTEGER,
    created_at         INTEGER NOT NULL,
    updated_at         INTEGER NOT NULL,
    UNIQUE (source, source_video_id)
);
CREATE INDEX IF NOT EXISTS idx_projects_created_at ON projects (created_at);

CREATE TABLE IF NOT EXISTS tasks (
    task_id             TEXT PRIMARY KEY,
    project_id          TEXT NOT NULL,
    type                TEXT NOT NULL,
    status              TEXT NOT NULL,
    current_step        TEXT NOT NULL,
    progress_percent    INTEGER NOT NULL DEFAULT 0,
    message             TEXT,
    started_at          INTEGER,
    finished_at         INTEGER,
    cancel_requested_at INTEGER,
    canceled_at         INTEGER,
    error_message       TEXT,
    created_at          INTEGER NOT NULL,
    updated_at          INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_tasks_project_id ON tasks (project_id);
CREATE INDEX IF NOT EXISTS idx_tasks_updated_at ON tasks (updated_at);

CREATE TABLE IF NOT EXISTS task_step_states (
    task_id       TEXT NOT NULL,
    project_id    TEXT NOT NULL,
    step          TEXT NOT NULL,
    status        TEXT NOT NULL,
    attempt       INTEGER NOT NULL DEFAULT 0,
    started_at    INTEGER,
    finished_at   INTEGER,
    duration_ms   INTEGER,
    error_message TEXT,
    output_json   TEXT,
    PRIMARY KEY (task_id, step)
);
CREATE INDEX IF NOT EXISTS idx_step_states_task_id ON task_step_states (task_id);
CREATE INDEX IF NOT EXISTS idx_step_states_project_id ON task_step_states (project_id);

CREATE TABLE IF NOT EXISTS task_events (
    id            INTEGER PRIMARY KEY AUTOINCREMENT,
    task_id       TEXT NOT NULL,
    project_id    TEXT NOT NULL,
    step          TEXT NOT NULL,
    event_type    TEXT NOT NULL,
    level         TEXT NOT NULL,
    message       TEXT NOT NULL,
    percent       INTEGER NOT NULL DEFAULT 0,
    duration_ms   INTEGER,
    error_message TEXT,
    created_at    INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_task_events_task_id ON task_events (task_id);
CREATE INDEX IF NOT EXISTS idx_task_events_project_id ON task_events (project_id);

CREATE TABLE IF NOT EXISTS watch_progress (
    project_id    TEXT NOT NULL,
    viewer_id     TEXT NOT NULL,
    position_sec  REAL NOT NULL,
    duration_sec  REAL NOT NULL,
    updated_at    INTEGER NOT NULL,
    PRIMARY KEY (project_id, viewer_id)
);
CREATE INDEX IF NOT EXISTS idx_watch_progress_project_id ON watch_progress (project_id);
"#;
