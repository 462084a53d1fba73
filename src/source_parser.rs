//! Parses a raw user-supplied reference into `(source, sourceVideoId)`.
//!
//! Patterns are tried in order; the first match wins. No match is a
//! validation failure, not an infrastructure one.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::CoreError;
use crate::store::models::Source;

static BILIBILI_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"BV[A-Za-z0-9]{10}").unwrap());
static TVER_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"episodes/(\w+)").unwrap());
static YOUTUBE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?:v=|youtu\.be/)([A-Za-z0-9_-]{11})").unwrap());
static UNKNOWN_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z0-9_-]{6,30}$").unwrap());

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedSource {
    pub source: Source,
    pub source_video_id: String,
}

pub fn parse_source(input: &str) -> Result<ParsedSource, CoreError> {
    if let Some(m) = BILIBILI_RE.find(input) {
        return Ok(ParsedSource {
            source: Source::Bilibili,
            source_video_id: m.as_str().to_uppercase(),
        });
    }
    if let Some(caps) = TVER_RE.captures(input) {
        return Ok(ParsedSource {
            source: Source::Tver,
            source_video_id: caps[1].to_owned(),
        });
    }
    if let Some(caps) = YOUTUBE_RE.captures(input) {
        return Ok(ParsedSource {
            source: Source::Youtube,
            source_video_id: caps[1].to_owned(),
        });
    }
    if UNKNOWN_RE.is_match(input) {
        return Ok(ParsedSource {
            source: Source::Unknown,
            source_video_id: input.to_owned(),
        });
    }

    Err(CoreError::Validation(format!(
        "could not recognize a source in '{input}'"
    )))
}

/// Deterministic canonical URL derivation used before `fetch_metadata`: a
/// verbatim `http(s)://` input wins, otherwise it's derived per-source,
/// falling back to the original input.
pub fn derive_source_url(original_input: &str, source: Source, source_video_id: &str) -> String {
    if original_input.starts_with("http://") || original_input.starts_with("https://") {
        return original_input.to_owned();
    }
    match source {
        Source::Bilibili => format!("https://www.bilibili.com/video/{source_video_id}"),
        Source::Youtube => format!("https://www.youtube.com/watch?v={source_video_id}"),
        Source::Tver | Source::Unknown => original_input.to_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bilibili_bv_id_and_uppercases() {
        let parsed = parse_source("BV18KBJBeEmV").unwrap();
        assert_eq!(parsed.source, Source::Bilibili);
        assert_eq!(parsed.source_video_id, "BV18KBJBEEMV");
    }

    #[test]
    fn parses_bilibili_inside_full_url() {
        let parsed = parse_source("https://www.bilibili.com/video/BV18KBJBeEmV?p=1").unwrap();
        assert_eq!(parsed.source, Source::Bilibili);
    }

    #[test]
    fn parses_tver_episode_id() {
        let parsed = parse_source("https://tver.jp/episodes/epXXXXXXXX").unwrap();
        assert_eq!(parsed.source, Source::Tver);
        assert_eq!(parsed.source_video_id, "epXXXXXXXX");
    }

    #[test]
    fn parses_youtube_v_param_and_short_link() {
        let long = parse_source("https://www.youtube.com/watch?v=dQw4w9WgXcQ").unwrap();
        assert_eq!(long.source, Source::Youtube);
        assert_eq!(long.source_video_id, "dQw4w9WgXcQ");

        let short = parse_source("https://youtu.be/dQw4w9WgXcQ").unwrap();
        assert_eq!(short.source_video_id, "dQw4w9WgXcQ");
    }

    #[test]
    fn falls_back_to_unknown_for_bare_opaque_ids() {
        let parsed = parse_source("abc123-xyz").unwrap();
        assert_eq!(parsed.source, Source::Unknown);
        assert_eq!(parsed.source_video_id, "abc123-xyz");
    }

    #[test]
    fn rejects_unrecognizable_input() {
        let err = parse_source("!!").unwrap_err();
        assert!(matches!(err, CoreError::Validation(_)));
    }

    #[test]
    fn source_url_round_trips_through_the_parser() {
        for (source, id) in [
            (Source::Bilibili, "BV18KBJBEEMV"),
            (Source::Youtube, "dQw4w9WgXcQ"),
        ] {
            let url = derive_source_url(id, source, id);
            let reparsed = parse_source(&url).unwrap();
            assert_eq!(reparsed.source, source);
            assert_eq!(reparsed.source_video_id, id);
        }
    }
}
