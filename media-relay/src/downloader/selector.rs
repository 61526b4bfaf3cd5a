//! Format selection for direct streaming.
//!
//! Candidates are renditions with a direct URL and a video stream, matching
//! the requested codec family and not taller than the height ceiling. The
//! best candidate is the tallest, then the largest. Equal candidates keep
//! the order the fetch tool listed them in.

use std::cmp::Ordering;

use tracing::debug;

use super::codec::CodecFamily;
use super::models::{Format, MediaInfo};
use crate::{Error, Result};

/// Selection preferences.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FormatSelection {
    /// Maximum height in pixels; `None` accepts any height.
    pub max_height: Option<u32>,
    /// Requested video codec (`avc1`, `h264`, `vp9`, ...).
    pub codec: Option<String>,
}

/// Picks the best video rendition from a [`MediaInfo`].
#[derive(Debug, Clone, Default)]
pub struct FormatSelector {
    selection: FormatSelection,
}

impl FormatSelector {
    pub fn new(selection: FormatSelection) -> Self {
        Self { selection }
    }

    /// Best matching rendition, if any.
    pub fn select_best<'a>(&self, formats: &'a [Format]) -> Option<&'a Format> {
        self.sort_candidates(formats).first().copied()
    }

    /// Matching renditions, best first.
    pub fn sort_candidates<'a>(&self, formats: &'a [Format]) -> Vec<&'a Format> {
        let mut candidates: Vec<&Format> = formats
            .iter()
            .filter(|f| self.matches_criteria(f))
            .collect();
        // Stable sort: equal candidates stay in source order.
        candidates.sort_by(|a, b| compare_formats(a, b));
        candidates
    }

    fn matches_criteria(&self, format: &Format) -> bool {
        if format.url.is_none() {
            return false;
        }
        let Some(vcodec) = format.vcodec.as_deref() else {
            return false;
        };

        if let Some(max_height) = self.selection.max_height
            && format.height.unwrap_or(0) > max_height
        {
            return false;
        }

        match self.selection.codec.as_deref() {
            None => true,
            Some(requested) => codec_matches(requested, vcodec),
        }
    }

    /// Point `info.url` at the best rendition.
    ///
    /// Falls back to the URL the fetch tool chose itself when no rendition
    /// matches; fails with [`Error::NoSuitableFormat`] when there is neither.
    pub fn apply(&self, mut info: MediaInfo) -> Result<MediaInfo> {
        if let Some(best) = self.select_best(&info.formats) {
            debug!(
                id = %info.id,
                format_id = %best.format_id,
                height = ?best.height,
                vcodec = ?best.vcodec,
                "Selected stream format"
            );
            info.url = best.url.clone();
            return Ok(info);
        }

        if info.url.is_some() {
            debug!(id = %info.id, selection = ?self.selection, "No format matched, using fetch tool's choice");
            return Ok(info);
        }

        Err(Error::NoSuitableFormat(info.id))
    }
}

/// Largest audio-only rendition with a direct URL. Equal sizes keep source order.
pub fn select_audio(formats: &[Format]) -> Option<&Format> {
    formats
        .iter()
        .filter(|f| f.is_audio_only() && f.url.is_some())
        .reduce(|best, f| {
            if f.size.unwrap_or(0) > best.size.unwrap_or(0) {
                f
            } else {
                best
            }
        })
}

fn codec_matches(requested: &str, vcodec: &str) -> bool {
    match CodecFamily::from_codec(requested) {
        Some(family) => CodecFamily::from_codec(vcodec) == Some(family),
        None => vcodec
            .to_ascii_lowercase()
            .starts_with(&requested.trim().to_ascii_lowercase()),
    }
}

/// Lower sorts first: taller, then larger.
fn compare_formats(a: &Format, b: &Format) -> Ordering {
    b.height
        .unwrap_or(0)
        .cmp(&a.height.unwrap_or(0))
        .then_with(|| b.size.unwrap_or(0).cmp(&a.size.unwrap_or(0)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::downloader::models::fixtures::SAMPLE_DUMP;

    fn sample() -> MediaInfo {
        MediaInfo::from_tool_output(SAMPLE_DUMP.as_bytes()).unwrap()
    }

    fn selector(max_height: Option<u32>, codec: Option<&str>) -> FormatSelector {
        FormatSelector::new(FormatSelection {
            max_height,
            codec: codec.map(str::to_string),
        })
    }

    fn format(id: &str, height: u32, size: u64) -> Format {
        Format {
            format_id: id.to_string(),
            vcodec: Some("avc1.4d401f".to_string()),
            height: Some(height),
            size: Some(size),
            url: Some(format!("https://cdn.example.com/{id}")),
            ..Format::default()
        }
    }

    #[test]
    fn picks_largest_avc_at_ceiling() {
        let info = selector(Some(720), Some("avc1")).apply(sample()).unwrap();
        // 22 (15MB, muxed) beats 136 (12MB); 137 is above the ceiling.
        assert_eq!(info.url.as_deref(), Some("https://cdn.example.com/22.mp4"));
    }

    #[test]
    fn codec_aliases_select_the_same_family() {
        let info = sample();
        let by_alias = selector(Some(720), Some("h264"))
            .select_best(&info.formats)
            .unwrap();
        assert_eq!(by_alias.format_id, "22");

        let vp9 = sample();
        let best = selector(None, Some("vp09")).select_best(&vp9.formats).unwrap();
        assert_eq!(best.format_id, "247");
    }

    #[test]
    fn no_ceiling_prefers_tallest() {
        let info = sample();
        let best = selector(None, None).select_best(&info.formats).unwrap();
        assert_eq!(best.format_id, "137");
    }

    #[test]
    fn equal_candidates_keep_source_order() {
        let formats = vec![format("first", 720, 100), format("second", 720, 100)];
        let best = selector(Some(1080), None).select_best(&formats).unwrap();
        assert_eq!(best.format_id, "first");
    }

    #[test]
    fn falls_back_to_tool_choice() {
        let info = selector(Some(144), Some("av1")).apply(sample()).unwrap();
        assert_eq!(info.url.as_deref(), Some("https://cdn.example.com/best.mp4"));
    }

    #[test]
    fn no_candidate_and_no_fallback_is_an_error() {
        let mut info = sample();
        info.url = None;
        let err = selector(Some(144), None).apply(info).unwrap_err();
        assert!(matches!(err, Error::NoSuitableFormat(ref id) if id == "abc123"));
    }

    #[test]
    fn formats_without_url_or_video_are_skipped() {
        let mut no_url = format("no-url", 720, 999);
        no_url.url = None;
        let mut audio = format("audio", 0, 999);
        audio.vcodec = None;
        audio.acodec = Some("opus".into());
        let formats = vec![no_url, audio, format("ok", 360, 1)];

        let candidates = selector(None, None).sort_candidates(&formats);
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].format_id, "ok");
    }

    #[test]
    fn audio_selection_prefers_largest_audio_only() {
        let info = sample();
        let audio = select_audio(&info.formats).unwrap();
        assert_eq!(audio.format_id, "251");

        let video_only = vec![format("v", 720, 1)];
        assert!(select_audio(&video_only).is_none());
    }
}
