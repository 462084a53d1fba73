//! Provider adapters: thin wrappers around the ASR and translation
//! services. The core only depends on the contracts below; concrete
//! vendor wire formats are out of scope beyond satisfying them. Swapped by
//! `Config::pipeline_mode`.

pub mod asr;
pub mod translation;

pub use asr::{AsrProvider, AsrRequest, LiveAsrProvider, MockAsrProvider};
pub use translation::{
    LiveTranslationProvider, MockTranslationProvider, TranslationProvider, TranslationRequest,
    TranslationResult,
};
