//! SRT → VTT conversion.

use once_cell::sync::Lazy;
use regex::Regex;

static SRT_TIMESTAMP_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d{2}:\d{2}:\d{2}),(\d{3})").unwrap());

/// `"WEBVTT\n\n" + srt_normalized`, where `srt_normalized` replaces every
/// `\r\n` with `\n` and every `HH:MM:SS,mmm` timestamp with
/// `HH:MM:SS.mmm`.
pub fn srt_to_vtt(srt: &str) -> String {
    let normalized = srt.replace("\r\n", "\n");
    let normalized = SRT_TIMESTAMP_RE.replace_all(&normalized, "$1.$2");
    format!("WEBVTT\n\n{normalized}")
}
