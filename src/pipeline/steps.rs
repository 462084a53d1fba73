//! The seven pipeline step bodies.
//!
//! Every step returns an opaque `serde_json::Value`, produced by
//! serializing a typed per-step output struct; the checkpoint read-back in
//! [`crate::pipeline::context::StepContext::completed_output`] decodes the
//! same type and treats a decode failure as "step not completed".

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::error::CoreError;
use crate::logging::TaskLogger;
use crate::providers::{AsrProvider, AsrRequest, TranslationProvider, TranslationRequest};
use crate::retry::{retry_backoff, RetryOptions};
use crate::store::models::ProjectUpdate;
use crate::store::Store;
use crate::subprocess::{run_command, RunCommandOptions};

use super::context::StepContext;
use super::subtitle::srt_to_vtt;

pub struct Providers {
    pub asr: Box<dyn AsrProvider>,
    pub translation: Box<dyn TranslationProvider>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchMetadataOutput {
    pub title: String,
    pub thumbnail_url: Option<String>,
    pub source_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadVideoOutput {
    pub media_path: String,
    pub thumbnail_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractAudioOutput {
    pub audio_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunAsrOutput {
    pub asr_json_path: String,
    pub asr_srt_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranslateSubtitlesOutput {
    pub translation: crate::providers::TranslationResult,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildVttOutput {
    pub subtitle_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinalizeProjectOutput {
    pub media_path: String,
    pub subtitle_path: String,
}

fn to_value<T: Serialize>(value: &T) -> Result<serde_json::Value, CoreError> {
    Ok(serde_json::to_value(value)?)
}

/// Path relative to `projectDir`'s parent, i.e. `"<projectId>/<file>"`.
fn project_relative(ctx: &StepContext, file_name: &str) -> String {
    format!("{}/{file_name}", ctx.project_id)
}

pub fn fetch_metadata(
    ctx: &StepContext,
    cfg: &Config,
    store: &Store,
    logger: &TaskLogger,
) -> Result<serde_json::Value, CoreError> {
    let output = retry_backoff(RetryOptions::new(2, 500), |_attempt| {
        let result = run_command(
            &cfg.yt_dlp_bin,
            &[
                "--dump-single-json".to_owned(),
                "--skip-download".to_owned(),
                ctx.source_url.clone(),
            ],
            Some(&ctx.project_dir),
            RunCommandOptions {
                on_stdout_line: Some(Box::new(|line| logger.trace(line))),
                on_stderr_line: Some(Box::new(|line| logger.debug(line))),
                should_cancel: Some(Box::new(|| {
                    store.is_task_cancel_requested(&ctx.task_id).unwrap_or(false)
                })),
            },
        );
        result.map_err(PipelineRetryError)
    })
    .map_err(|e| e.0)?;

    let last_line = output
        .stdout
        .lines()
        .rev()
        .find(|line| !line.trim().is_empty())
        .ok_or_else(|| CoreError::pipeline("fetch_metadata", "yt-dlp produced no JSON output", true))?;

    let metadata: serde_json::Value = serde_json::from_str(last_line)
        .map_err(|e| CoreError::pipeline("fetch_metadata", format!("failed to parse yt-dlp metadata: {e}"), false))?;

    let title = metadata
        .get("title")
        .and_then(|v| v.as_str())
        .map(|s| s.to_owned())
        .unwrap_or_else(|| {
            ctx.video_path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| "video".to_owned())
        });
    let thumbnail_url = metadata
        .get("thumbnail")
        .and_then(|v| v.as_str())
        .map(|s| s.to_owned());

    std::fs::write(
        ctx.project_dir.join("metadata.info.json"),
        serde_json::to_vec_pretty(&metadata)?,
    )?;

    Ok(to_value(&FetchMetadataOutput {
        title,
        thumbnail_url,
        source_url: ctx.source_url.clone(),
    })?)
}

pub fn download_video(
    ctx: &StepContext,
    cfg: &Config,
    store: &Store,
    logger: &TaskLogger,
) -> Result<serde_json::Value, CoreError> {
    retry_backoff(RetryOptions::new(2, 1000), |_attempt| {
        let result = run_command(
            &cfg.yt_dlp_bin,
            &[
                "-f".to_owned(),
                "bestvideo+bestaudio/best".to_owned(),
                "--merge-output-format".to_owned(),
                "mp4".to_owned(),
                "--write-thumbnail".to_owned(),
                "--write-info-json".to_owned(),
                "--convert-thumbnails".to_owned(),
                "jpg".to_owned(),
                "-o".to_owned(),
                "%(playlist_index|0)s.%(ext)s".to_owned(),
                "-o".to_owned(),
                "infojson:metadata".to_owned(),
                "-o".to_owned(),
                "thumbnail:poster".to_owned(),
                ctx.source_url.clone(),
            ],
            Some(&ctx.project_dir),
            RunCommandOptions {
                on_stdout_line: Some(Box::new(|line| logger.trace(line))),
                on_stderr_line: Some(Box::new(|line| logger.debug(line))),
                should_cancel: Some(Box::new(|| {
                    store.is_task_cancel_requested(&ctx.task_id).unwrap_or(false)
                })),
            },
        );
        result.map_err(PipelineRetryError)
    })
    .map_err(|e| e.0)?;

    let mut mp4_files: Vec<_> = std::fs::read_dir(&ctx.project_dir)?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.extension().is_some_and(|ext| ext == "mp4"))
        .collect();
    mp4_files.sort();

    match mp4_files.len() {
        0 => {
            return Err(CoreError::pipeline(
                "download_video",
                "yt-dlp produced no .mp4 output",
                true,
            ));
        }
        1 => {
            std::fs::rename(&mp4_files[0], &ctx.video_path)?;
        }
        _ => {
            let concat_path = ctx.project_dir.join("concat.txt");
            let mut concat_contents = String::new();
            for part in &mp4_files {
                let escaped = part
                    .file_name()
                    .unwrap()
                    .to_string_lossy()
                    .replace('\'', "''");
                concat_contents.push_str(&format!("file '{escaped}'\n"));
            }
            std::fs::write(&concat_path, concat_contents)?;

            run_command(
                &cfg.ffmpeg_bin,
                &[
                    "-y".to_owned(),
                    "-f".to_owned(),
                    "concat".to_owned(),
                    "-safe".to_owned(),
                    "0".to_owned(),
                    "-i".to_owned(),
                    "concat.txt".to_owned(),
                    "-c".to_owned(),
                    "copy".to_owned(),
                    "-movflags".to_owned(),
                    "faststart".to_owned(),
                    "video.mp4".to_owned(),
                ],
                Some(&ctx.project_dir),
                RunCommandOptions::default(),
            )?;

            for part in &mp4_files {
                let _ = std::fs::remove_file(part);
            }
            let _ = std::fs::remove_file(&concat_path);
        }
    }

    let thumbnail_url = find_poster(&ctx.project_dir)?.map(|_| project_relative(ctx, "poster.jpg"));

    Ok(to_value(&DownloadVideoOutput {
        media_path: project_relative(ctx, "video.mp4"),
        thumbnail_url,
    })?)
}

fn find_poster(project_dir: &Path) -> Result<Option<std::path::PathBuf>, CoreError> {
    for entry in std::fs::read_dir(project_dir)? {
        let path = entry?.path();
        if path
            .file_stem()
            .is_some_and(|stem| stem.to_string_lossy() == "poster")
        {
            return Ok(Some(path));
        }
    }
    Ok(None)
}

pub fn extract_audio(
    ctx: &StepContext,
    cfg: &Config,
    logger: &TaskLogger,
) -> Result<serde_json::Value, CoreError> {
    retry_backoff(RetryOptions::new(2, 800), |_attempt| {
        let result = run_command(
            &cfg.ffmpeg_bin,
            &[
                "-y".to_owned(),
                "-i".to_owned(),
                "video.mp4".to_owned(),
                "-ac".to_owned(),
                "1".to_owned(),
                "-ar".to_owned(),
                "16000".to_owned(),
                "-b:a".to_owned(),
                "24k".to_owned(),
                "audio.opus".to_owned(),
            ],
            Some(&ctx.project_dir),
            RunCommandOptions {
                on_stderr_line: Some(Box::new(|line| logger.trace(line))),
                ..Default::default()
            },
        );
        result.map_err(PipelineRetryError)
    })
    .map_err(|e| e.0)?;

    Ok(to_value(&ExtractAudioOutput {
        audio_path: project_relative(ctx, "audio.opus"),
    })?)
}

pub fn run_asr(
    ctx: &StepContext,
    store: &Store,
    providers: &Providers,
    logger: &TaskLogger,
) -> Result<serde_json::Value, CoreError> {
    providers.asr.run_asr(
        &AsrRequest {
            project_id: &ctx.project_id,
            audio_path: &ctx.audio_path,
            output_json_path: &ctx.asr_json_path,
            output_srt_path: &ctx.asr_srt_path,
        },
        logger,
    )?;

    let srt = std::fs::read_to_string(&ctx.asr_srt_path)?;
    let vtt = srt_to_vtt(&srt);
    std::fs::write(ctx.project_dir.join("asr.vtt"), vtt)?;

    store.update_project_from_pipeline(
        &ctx.project_id,
        &ProjectUpdate {
            asr_vtt_path: Some(project_relative(ctx, "asr.vtt")),
            ..Default::default()
        },
    )?;

    Ok(to_value(&RunAsrOutput {
        asr_json_path: project_relative(ctx, "asr.json"),
        asr_srt_path: project_relative(ctx, "asr.srt"),
    })?)
}

pub fn translate_subtitles(
    ctx: &StepContext,
    store: &Store,
    providers: &Providers,
    translation_hint: Option<&str>,
    logger: &TaskLogger,
) -> Result<serde_json::Value, CoreError> {
    let translation = providers.translation.run_translate(
        &TranslationRequest {
            project_id: &ctx.project_id,
            asr_srt_path: &ctx.asr_srt_path,
            audio_path: &ctx.audio_path,
            output_srt_path: &ctx.translated_srt_path,
            translation_hint,
        },
        logger,
    )?;

    store.update_project_from_pipeline(
        &ctx.project_id,
        &ProjectUpdate {
            llm_cost_twd: Some(translation.total_cost_twd),
            llm_provider: Some(translation.llm_provider.clone()),
            llm_model: Some(translation.llm_model.clone()),
            input_tokens: Some(translation.input_tokens),
            output_tokens: Some(translation.output_tokens),
            ..Default::default()
        },
    )?;

    Ok(to_value(&TranslateSubtitlesOutput { translation })?)
}

pub fn build_vtt(ctx: &StepContext) -> Result<serde_json::Value, CoreError> {
    let srt = std::fs::read_to_string(&ctx.translated_srt_path)?;
    let vtt = srt_to_vtt(&srt);
    std::fs::write(&ctx.translated_vtt_path, vtt)?;

    Ok(to_value(&BuildVttOutput {
        subtitle_path: project_relative(ctx, "video.vtt"),
    })?)
}

pub fn finalize_project(ctx: &StepContext, store: &Store) -> Result<serde_json::Value, CoreError> {
    let fetch: FetchMetadataOutput = ctx
        .completed_output("fetch_metadata")
        .ok_or_else(|| CoreError::pipeline("finalize_project", "fetch_metadata checkpoint missing", false))?;
    let download: DownloadVideoOutput = ctx
        .completed_output("download_video")
        .ok_or_else(|| CoreError::pipeline("finalize_project", "download_video checkpoint missing", false))?;
    let translate: TranslateSubtitlesOutput = ctx
        .completed_output("translate_subtitles")
        .ok_or_else(|| CoreError::pipeline("finalize_project", "translate_subtitles checkpoint missing", false))?;

    let subtitle_path = project_relative(ctx, "video.vtt");

    store.update_project_from_pipeline(
        &ctx.project_id,
        &ProjectUpdate {
            status: Some(crate::store::models::ProjectStatus::Completed),
            title: Some(fetch.title),
            source_url: Some(fetch.source_url),
            thumbnail_url: download.thumbnail_url.or(fetch.thumbnail_url),
            media_path: Some(download.media_path.clone()),
            subtitle_path: Some(subtitle_path.clone()),
            llm_cost_twd: Some(translate.translation.total_cost_twd),
            llm_provider: Some(translate.translation.llm_provider),
            llm_model: Some(translate.translation.llm_model),
            input_tokens: Some(translate.translation.input_tokens),
            output_tokens: Some(translate.translation.output_tokens),
            ..Default::default()
        },
    )?;

    Ok(to_value(&FinalizeProjectOutput {
        media_path: download.media_path,
        subtitle_path,
    })?)
}

/// Wraps a `CoreError` so it can be used as the `Err` type of
/// `retry_backoff` closures without `CoreError` itself needing `Clone`.
struct PipelineRetryError(CoreError);

impl crate::error::Retryable for PipelineRetryError {
    fn is_retryable(&self) -> bool {
        self.0.is_retryable()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::models::{StepStatus, TaskStepState};
    use std::collections::HashMap;

    fn ctx_with_states(dir: &std::path::Path, states: HashMap<String, TaskStepState>) -> StepContext {
        StepContext::new(
            "task-1".into(),
            "project-1".into(),
            dir.to_path_buf(),
            "https://example.test/video".into(),
            states,
        )
    }

    #[test]
    fn build_vtt_converts_translated_srt() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("video.srt"),
            "1\n00:00:00,000 --> 00:00:01,000\nhi\n",
        )
        .unwrap();
        let ctx = ctx_with_states(dir.path(), HashMap::new());

        let output = build_vtt(&ctx).unwrap();
        let parsed: BuildVttOutput = serde_json::from_value(output).unwrap();
        assert_eq!(parsed.subtitle_path, "project-1/video.vtt");
        let vtt = std::fs::read_to_string(dir.path().join("video.vtt")).unwrap();
        assert!(vtt.starts_with("WEBVTT"));
    }

    #[test]
    fn finalize_project_requires_prior_checkpoints() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = ctx_with_states(dir.path(), HashMap::new());
        let store = Store::open_in_memory().unwrap();
        let err = finalize_project(&ctx, &store).unwrap_err();
        assert!(matches!(err, CoreError::Pipeline { .. }));
    }

    #[test]
    fn finalize_project_reads_back_typed_checkpoints() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open_in_memory().unwrap();
        let (project_id, task_id) = store
            .submit_project(crate::store::models::Source::Unknown, "finalizeabc", "finalizeabc", None)
            .unwrap();

        let mut states = HashMap::new();
        for (step, output) in [
            (
                "fetch_metadata",
                serde_json::to_value(FetchMetadataOutput {
                    title: "My Video".into(),
                    thumbnail_url: None,
                    source_url: "https://example.test".into(),
                })
                .unwrap(),
            ),
            (
                "download_video",
                serde_json::to_value(DownloadVideoOutput {
                    media_path: format!("{project_id}/video.mp4"),
                    thumbnail_url: None,
                })
                .unwrap(),
            ),
            (
                "translate_subtitles",
                serde_json::to_value(TranslateSubtitlesOutput {
                    translation: crate::providers::TranslationResult {
                        llm_provider: "mock".into(),
                        llm_model: "mock".into(),
                        input_tokens: 0,
                        output_tokens: 0,
                        total_cost_twd: 0,
                    },
                })
                .unwrap(),
            ),
        ] {
            states.insert(
                step.to_owned(),
                TaskStepState {
                    task_id: task_id.clone(),
                    project_id: project_id.clone(),
                    step: step.to_owned(),
                    status: StepStatus::Completed,
                    attempt: 1,
                    started_at: Some(0),
                    finished_at: Some(1),
                    duration_ms: Some(1),
                    error_message: None,
                    output_json: Some(output),
                },
            );
        }

        let ctx = StepContext::new(
            task_id,
            project_id.clone(),
            dir.path().to_path_buf(),
            "https://example.test".into(),
            states,
        );

        let output = finalize_project(&ctx, &store).unwrap();
        let parsed: FinalizeProjectOutput = serde_json::from_value(output).unwrap();
        assert_eq!(parsed.media_path, format!("{project_id}/video.mp4"));

        let (project, _) = store.get_project_by_id(&project_id).unwrap().unwrap();
        assert_eq!(project.title.as_deref(), Some("My Video"));
        assert_eq!(project.status, crate::store::models::ProjectStatus::Completed);
    }
}
