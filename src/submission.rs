//! The submission service: parses a source reference, checks for
//! duplicates, creates the project+task rows, and enqueues the task.

use std::sync::Arc;

use crate::error::CoreError;
use crate::pipeline::PipelineRunner;
use crate::source_parser::parse_source;
use crate::store::Store;

pub struct SubmitInput<'a> {
    pub source_or_url: &'a str,
    pub translation_hint: Option<&'a str>,
}

pub struct SubmitOutput {
    pub project_id: String,
    pub task_id: String,
    pub status: &'static str,
}

/// Validates, parses, persists and enqueues one submission.
///
/// Failure kinds: [`CoreError::Validation`] (min length 2, or an
/// unrecognized source), [`CoreError::Conflict`] (duplicate
/// `(source, sourceVideoId)`), [`CoreError::Infrastructure`].
pub fn submit_project(
    store: &Store,
    runner: &Arc<PipelineRunner>,
    input: SubmitInput<'_>,
) -> Result<SubmitOutput, CoreError> {
    if input.source_or_url.trim().len() < 2 {
        return Err(CoreError::Validation(
            "sourceOrUrl must be at least 2 characters".to_owned(),
        ));
    }
    if let Some(hint) = input.translation_hint {
        if hint.chars().count() > 400 {
            return Err(CoreError::Validation(
                "translationHint must be at most 400 characters".to_owned(),
            ));
        }
    }

    let parsed = parse_source(input.source_or_url)?;
    let (project_id, task_id) = store.submit_project(
        parsed.source,
        &parsed.source_video_id,
        input.source_or_url,
        input.translation_hint,
    )?;

    runner.enqueue(&task_id, &project_id);

    Ok(SubmitOutput {
        project_id,
        task_id,
        status: "queued",
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::pipeline::steps::Providers;
    use crate::providers::{MockAsrProvider, MockTranslationProvider};

    fn test_runner(store: Arc<Store>) -> Arc<PipelineRunner> {
        let config = Arc::new(Config {
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
            data_dir: std::env::temp_dir(),
            sqlite_db_path: "unused".into(),
            log_json: false,
            log_level: "info".into(),
            log_dir: std::env::temp_dir(),
        });
        let providers = Arc::new(Providers {
            asr: Box::new(MockAsrProvider),
            translation: Box::new(MockTranslationProvider),
        });
        PipelineRunner::new(store, config, providers)
    }

    #[test]
    fn rejects_input_shorter_than_two_chars() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let runner = test_runner(Arc::clone(&store));
        let err = submit_project(
            &store,
            &runner,
            SubmitInput {
                source_or_url: "a",
                translation_hint: None,
            },
        )
        .unwrap_err();
        assert!(matches!(err, CoreError::Validation(_)));
        runner.shutdown();
    }

    #[test]
    fn duplicate_submission_conflicts_and_does_not_create_a_second_project() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let runner = test_runner(Arc::clone(&store));

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

        runner.shutdown();
    }
}
