//! The pipeline runner: the central orchestrator driving a task through
//! its seven fixed steps with checkpoint resume, cancellation, and
//! project/task status reconciliation.

pub mod context;
pub mod runner;
pub mod steps;
pub mod subtitle;

pub use context::StepContext;
pub use runner::PipelineRunner;

use crate::store::models::ProjectStatus;

/// One of the seven fixed pipeline steps, in declared order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepId {
    FetchMetadata,
    DownloadVideo,
    ExtractAudio,
    RunAsr,
    TranslateSubtitles,
    BuildVtt,
    FinalizeProject,
}

impl StepId {
    pub const ALL: [StepId; 7] = [
        StepId::FetchMetadata,
        StepId::DownloadVideo,
        StepId::ExtractAudio,
        StepId::RunAsr,
        StepId::TranslateSubtitles,
        StepId::BuildVtt,
        StepId::FinalizeProject,
    ];

    pub fn name(self) -> &'static str {
        match self {
            StepId::FetchMetadata => "fetch_metadata",
            StepId::DownloadVideo => "download_video",
            StepId::ExtractAudio => "extract_audio",
            StepId::RunAsr => "run_asr",
            StepId::TranslateSubtitles => "translate_subtitles",
            StepId::BuildVtt => "build_vtt",
            StepId::FinalizeProject => "finalize_project",
        }
    }

    /// Progress percent to report when entering this step.
    pub fn enter_percent(self) -> i64 {
        match self {
            StepId::FetchMetadata => 10,
            StepId::DownloadVideo => 25,
            StepId::ExtractAudio => 40,
            StepId::RunAsr => 55,
            StepId::TranslateSubtitles => 75,
            StepId::BuildVtt => 88,
            StepId::FinalizeProject => 95,
        }
    }

    /// Project status implied by being at this step.
    pub fn project_status(self) -> ProjectStatus {
        match self {
            StepId::FetchMetadata | StepId::DownloadVideo => ProjectStatus::Downloading,
            StepId::ExtractAudio | StepId::RunAsr => ProjectStatus::Asr,
            StepId::TranslateSubtitles | StepId::BuildVtt | StepId::FinalizeProject => {
                ProjectStatus::Translating
            }
        }
    }

    pub fn message(self) -> &'static str {
        match self {
            StepId::FetchMetadata => "Fetching video metadata",
            StepId::DownloadVideo => "Downloading video",
            StepId::ExtractAudio => "Extracting audio",
            StepId::RunAsr => "Transcribing audio",
            StepId::TranslateSubtitles => "Translating subtitles",
            StepId::BuildVtt => "Building WebVTT output",
            StepId::FinalizeProject => "Finalizing project",
        }
    }
}
