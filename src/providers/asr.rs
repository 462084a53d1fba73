//! ASR (automatic speech recognition) provider contract.
//!
//! `run_asr` takes a staged audio file and must have written both
//! `outputJsonPath` and `outputSrtPath` by the time it returns
//! successfully. The live implementation targets the DashScope-shaped
//! contract named in configuration (`DASHSCOPE_API_URL`/`_API_KEY`,
//! `FUN_ASR_MODEL`) staged through an S3-compatible OSS bucket; this is a
//! best-effort reconstruction of a third-party wire format, isolated
//! behind the trait so the pipeline runner never depends on its details.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::config::Config;
use crate::error::{http_status_retryable, CoreError, Retryable};
use crate::logging::TaskLogger;
use crate::retry::{retry_backoff, RetryOptions};

pub struct AsrRequest<'a> {
    pub project_id: &'a str,
    pub audio_path: &'a Path,
    pub output_json_path: &'a Path,
    pub output_srt_path: &'a Path,
}

pub trait AsrProvider: Send + Sync {
    fn run_asr(&self, req: &AsrRequest<'_>, logger: &TaskLogger) -> Result<(), CoreError>;
}

pub struct MockAsrProvider;

impl AsrProvider for MockAsrProvider {
    fn run_asr(&self, req: &AsrRequest<'_>, logger: &TaskLogger) -> Result<(), CoreError> {
        logger.info("mock ASR: writing placeholder transcript");
        let json = serde_json::json!({
            "sentences": [
                {"text": "[mock transcript]", "beginTime": 0, "endTime": 3000}
            ]
        });
        std::fs::write(req.output_json_path, serde_json::to_vec_pretty(&json)?)?;

        let srt = "1\n00:00:00,000 --> 00:00:03,000\n[mock transcript]\n";
        std::fs::write(req.output_srt_path, srt)?;
        Ok(())
    }
}

#[derive(Debug)]
struct AsrApiError {
    status: Option<u16>,
    terminal: bool,
    message: String,
}

impl std::fmt::Display for AsrApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl Retryable for AsrApiError {
    fn is_retryable(&self) -> bool {
        !self.terminal && self.status.is_some_and(http_status_retryable)
    }
}

#[derive(Deserialize)]
struct TranscriptionSentence {
    text: String,
    #[serde(rename = "beginTime")]
    begin_time_ms: u64,
    #[serde(rename = "endTime")]
    end_time_ms: u64,
}

#[derive(Deserialize)]
struct TranscriptionResult {
    sentences: Vec<TranscriptionSentence>,
}

pub struct LiveAsrProvider {
    client: reqwest::blocking::Client,
    api_url: String,
    api_key: String,
    model: String,
    oss_bucket: String,
    oss_region: String,
    poll_attempts: u32,
    poll_interval: Duration,
}

impl LiveAsrProvider {
    pub fn from_config(cfg: &Config) -> Result<Self, CoreError> {
        Ok(Self {
            client: reqwest::blocking::Client::new(),
            api_url: cfg
                .dashscope_api_url
                .clone()
                .ok_or_else(|| CoreError::infrastructure("DASHSCOPE_API_URL is not configured"))?,
            api_key: cfg
                .dashscope_api_key
                .clone()
                .ok_or_else(|| CoreError::infrastructure("DASHSCOPE_API_KEY is not configured"))?,
            model: cfg
                .fun_asr_model
                .clone()
                .ok_or_else(|| CoreError::infrastructure("FUN_ASR_MODEL is not configured"))?,
            oss_bucket: cfg
                .oss_bucket
                .clone()
                .ok_or_else(|| CoreError::infrastructure("OSS_BUCKET is not configured"))?,
            oss_region: cfg
                .oss_region
                .clone()
                .ok_or_else(|| CoreError::infrastructure("OSS_REGION is not configured"))?,
            poll_attempts: 600,
            poll_interval: Duration::from_secs(2),
        })
    }

    fn staging_url(&self, key: &str) -> String {
        format!("https://{}.{}.aliyuncs.com/{key}", self.oss_bucket, self.oss_region)
    }

    fn upload_staging(&self, project_id: &str, audio_path: &Path) -> Result<String, CoreError> {
        let key = format!("grillmaster/{project_id}/{}", file_name(audio_path));
        let bytes = std::fs::read(audio_path)?;
        let url = self.staging_url(&key);

        retry_backoff(RetryOptions::new(3, 500), |_attempt| {
            self.client
                .put(&url)
                .body(bytes.clone())
                .send()
                .map_err(|e| AsrApiError {
                    status: e.status().map(|s| s.as_u16()),
                    terminal: false,
                    message: format!("staging upload failed: {e}"),
                })
                .and_then(|resp| {
                    if resp.status().is_success() {
                        Ok(())
                    } else {
                        Err(AsrApiError {
                            status: Some(resp.status().as_u16()),
                            terminal: false,
                            message: format!("staging upload returned {}", resp.status()),
                        })
                    }
                })
        })
        .map_err(|e| CoreError::pipeline("run_asr", e.to_string(), e.is_retryable()))?;

        Ok(key)
    }

    fn cleanup_staging(&self, key: &str) {
        let url = self.staging_url(key);
        let _ = self.client.delete(&url).send();
    }

    fn submit_transcription(&self, staging_key: &str) -> Result<String, CoreError> {
        #[derive(Deserialize)]
        struct SubmitResponse {
            task_id: String,
        }

        let resp = retry_backoff(RetryOptions::new(2, 500), |_attempt| {
            self.client
                .post(format!("{}/transcriptions", self.api_url))
                .bearer_auth(&self.api_key)
                .json(&serde_json::json!({ "model": self.model, "file_key": staging_key }))
                .send()
                .map_err(|e| AsrApiError {
                    status: e.status().map(|s| s.as_u16()),
                    terminal: false,
                    message: format!("submit transcription failed: {e}"),
                })
        })
        .map_err(|e| CoreError::pipeline("run_asr", e.to_string(), e.is_retryable()))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(CoreError::pipeline(
                "run_asr",
                format!("submit transcription returned {status}"),
                http_status_retryable(status.as_u16()),
            ));
        }

        let parsed: SubmitResponse = resp
            .json()
            .map_err(|e| CoreError::pipeline("run_asr", format!("malformed submit response: {e}"), false))?;
        Ok(parsed.task_id)
    }

    fn poll_until_done(&self, task_id: &str) -> Result<TranscriptionResult, CoreError> {
        #[derive(Deserialize)]
        #[serde(rename_all = "UPPERCASE")]
        enum RemoteStatus {
            Pending,
            Running,
            Succeeded,
            Failed,
            Canceled,
        }

        #[derive(Deserialize)]
        struct PollResponse {
            status: RemoteStatus,
            result: Option<TranscriptionResult>,
            message: Option<String>,
        }

        for _ in 0..self.poll_attempts {
            let resp = self
                .client
                .get(format!("{}/transcriptions/{task_id}", self.api_url))
                .bearer_auth(&self.api_key)
                .send()
                .map_err(|e| CoreError::pipeline("run_asr", format!("poll failed: {e}"), true))?;

            let status_code = resp.status();
            if !status_code.is_success() {
                return Err(CoreError::pipeline(
                    "run_asr",
                    format!("poll returned {status_code}"),
                    http_status_retryable(status_code.as_u16()),
                ));
            }

            let parsed: PollResponse = resp
                .json()
                .map_err(|e| CoreError::pipeline("run_asr", format!("malformed poll response: {e}"), false))?;

            match parsed.status {
                RemoteStatus::Succeeded => {
                    return parsed.result.ok_or_else(|| {
                        CoreError::pipeline("run_asr", "succeeded response missing result", false)
                    });
                }
                RemoteStatus::Failed | RemoteStatus::Canceled => {
                    return Err(CoreError::pipeline(
                        "run_asr",
                        parsed.message.unwrap_or_else(|| "transcription failed".into()),
                        false,
                    ));
                }
                RemoteStatus::Pending | RemoteStatus::Running => {
                    std::thread::sleep(self.poll_interval);
                }
            }
        }

        Err(CoreError::pipeline(
            "run_asr",
            format!("transcription did not finish within {} attempts", self.poll_attempts),
            true,
        ))
    }
}

impl AsrProvider for LiveAsrProvider {
    fn run_asr(&self, req: &AsrRequest<'_>, logger: &TaskLogger) -> Result<(), CoreError> {
        logger.info("uploading audio to staging");
        let staging_key = self.upload_staging(req.project_id, req.audio_path)?;

        let run = (|| {
            logger.info("submitting transcription job");
            let task_id = self.submit_transcription(&staging_key)?;
            logger.info("polling transcription status");
            let result = self.poll_until_done(&task_id)?;

            std::fs::write(req.output_json_path, serde_json::to_vec_pretty(&serde_json::json!({
                "sentences": result.sentences.iter().map(|s| serde_json::json!({
                    "text": s.text, "beginTime": s.begin_time_ms, "endTime": s.end_time_ms,
                })).collect::<Vec<_>>(),
            }))?)?;

            let srt = sentences_to_srt(&result.sentences);
            std::fs::write(req.output_srt_path, srt)?;
            Ok(())
        })();

        self.cleanup_staging(&staging_key);
        run
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "audio.opus".to_owned())
}

/// Joins run-on English-letter sentences across a `.` boundary when the
/// inter-sentence gap is ≤500ms, then re-splits long joined sentences on
/// punctuation aiming for ≤40 chars per cue.
fn sentences_to_srt(sentences: &[TranscriptionSentence]) -> String {
    let mut merged: Vec<(String, u64, u64)> = Vec::new();
    for sentence in sentences {
        if let Some(last) = merged.last_mut() {
            let gap = sentence.begin_time_ms.saturating_sub(last.2);
            let ends_with_letter_period = last.0.trim_end().ends_with('.')
                && last
                    .0
                    .trim_end()
                    .chars()
                    .rev()
                    .nth(1)
                    .is_some_and(|c| c.is_ascii_alphabetic());
            if gap <= 500 && ends_with_letter_period {
                last.0.push(' ');
                last.0.push_str(&sentence.text);
                last.2 = sentence.end_time_ms;
                continue;
            }
        }
        merged.push((sentence.text.clone(), sentence.begin_time_ms, sentence.end_time_ms));
    }

    let mut cues: Vec<(String, u64, u64)> = Vec::new();
    for (text, start, end) in merged {
        cues.extend(resplit_long_sentence(&text, start, end));
    }

    let mut out = String::new();
    for (idx, (text, start, end)) in cues.iter().enumerate() {
        out.push_str(&format!(
            "{}\n{} --> {}\n{}\n\n",
            idx + 1,
            format_srt_timestamp(*start),
            format_srt_timestamp(*end),
            text
        ));
    }
    out
}

fn resplit_long_sentence(text: &str, start: u64, end: u64) -> Vec<(String, u64, u64)> {
    if text.chars().count() <= 40 {
        return vec![(text.to_owned(), start, end)];
    }

    let parts: Vec<&str> = text
        .split_inclusive(['.', '!', '?', ','])
        .flat_map(|chunk| {
            if chunk.chars().count() <= 40 {
                vec![chunk]
            } else {
                chunk.split_whitespace().collect()
            }
        })
        .collect();

    let total_chars: usize = parts.iter().map(|p| p.chars().count()).sum::<usize>().max(1);
    let duration = end.saturating_sub(start);
    let mut cursor = start;
    let mut out = Vec::new();
    for part in parts {
        let share = ((part.chars().count() as f64 / total_chars as f64) * duration as f64) as u64;
        let part_end = (cursor + share).min(end);
        out.push((part.trim().to_owned(), cursor, part_end));
        cursor = part_end;
    }
    out
}

fn format_srt_timestamp(ms: u64) -> String {
    let hours = ms / 3_600_000;
    let minutes = (ms % 3_600_000) / 60_000;
    let seconds = (ms % 60_000) / 1000;
    let millis = ms % 1000;
    format!("{hours:02}:{minutes:02}:{seconds:02},{millis:03}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mock_provider_writes_both_output_files() {
        let dir = tempfile::tempdir().unwrap();
        let json_path = dir.path().join("asr.json");
        let srt_path = dir.path().join("asr.srt");
        let audio_path = dir.path().join("audio.opus");
        std::fs::write(&audio_path, b"fake audio").unwrap();

        let logger = crate::logging::TaskLogger::new(
            std::sync::Arc::new(crate::store::Store::open_in_memory().unwrap()),
            "task-1",
            "project-1",
            "run_asr",
            55,
        );

        MockAsrProvider
            .run_asr(
                &AsrRequest {
                    project_id: "project-1",
                    audio_path: &audio_path,
                    output_json_path: &json_path,
                    output_srt_path: &srt_path,
                },
                &logger,
            )
            .unwrap();

        assert!(json_path.exists());
        assert!(srt_path.exists());
    }

    #[test]
    fn format_srt_timestamp_matches_expected_shape() {
        assert_eq!(format_srt_timestamp(3_723_045), "01:02:03,045");
    }

    #[test]
    fn resplit_keeps_short_sentences_whole() {
        let parts = resplit_long_sentence("hi there", 0, 1000);
        assert_eq!(parts.len(), 1);
    }
}
