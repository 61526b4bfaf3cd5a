//! Media metadata.
//!
//! [`MediaInfo`] is what the service hands out; the `Raw*` structs mirror
//! the fetch tool's JSON dump and are converted right after parsing.

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// One downloadable rendition of a media item.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Format {
    pub format_id: String,
    pub extension: String,
    /// `None` when the rendition carries no audio.
    pub acodec: Option<String>,
    /// `None` when the rendition carries no video.
    pub vcodec: Option<String>,
    /// Size in bytes, exact or approximate.
    pub size: Option<u64>,
    pub resolution: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    /// Total bitrate in kbit/s.
    pub bitrate: Option<f64>,
    pub url: Option<String>,
}

impl Format {
    pub fn has_video(&self) -> bool {
        self.vcodec.is_some()
    }

    pub fn has_audio(&self) -> bool {
        self.acodec.is_some()
    }

    pub fn is_audio_only(&self) -> bool {
        self.has_audio() && !self.has_video()
    }
}

/// Metadata of a media item as reported by the fetch tool.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaInfo {
    pub id: String,
    pub title: String,
    pub original_url: String,
    /// Duration in seconds.
    pub duration: Option<f64>,
    pub uploader: Option<String>,
    /// `YYYYMMDD`
    pub upload_date: Option<String>,
    pub thumbnail: Option<String>,
    pub extension: Option<String>,
    pub size: Option<u64>,
    /// Direct stream URL chosen by the fetch tool (or by format selection).
    pub url: Option<String>,
    pub formats: Vec<Format>,
}

impl MediaInfo {
    /// Parse the fetch tool's `-J` output.
    pub fn from_tool_output(output: &[u8]) -> Result<Self> {
        let text = String::from_utf8_lossy(output);
        let text = text.trim();
        if text.is_empty() {
            return Err(Error::output_parse("fetch tool produced no metadata"));
        }

        let raw: RawMediaInfo = serde_json::from_str(text)
            .map_err(|e| Error::output_parse(format!("invalid metadata JSON: {e}")))?;
        if raw.id.trim().is_empty() {
            return Err(Error::output_parse("metadata has no id"));
        }
        Ok(raw.into())
    }

    /// Title, or the id when the item has none.
    pub fn display_title(&self) -> &str {
        if self.title.is_empty() {
            &self.id
        } else {
            &self.title
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawFormat {
    format_id: Option<String>,
    ext: Option<String>,
    acodec: Option<String>,
    vcodec: Option<String>,
    filesize: Option<u64>,
    filesize_approx: Option<u64>,
    resolution: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    tbr: Option<f64>,
    url: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawMediaInfo {
    id: String,
    title: Option<String>,
    webpage_url: Option<String>,
    original_url: Option<String>,
    duration: Option<f64>,
    uploader: Option<String>,
    upload_date: Option<String>,
    thumbnail: Option<String>,
    ext: Option<String>,
    filesize: Option<u64>,
    filesize_approx: Option<u64>,
    url: Option<String>,
    formats: Option<Vec<RawFormat>>,
}

/// The fetch tool writes `"none"` for an absent stream.
fn codec(value: Option<String>) -> Option<String> {
    value.filter(|c| !c.is_empty() && !c.eq_ignore_ascii_case("none"))
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

impl From<RawFormat> for Format {
    fn from(raw: RawFormat) -> Self {
        Self {
            format_id: raw.format_id.unwrap_or_default(),
            extension: raw.ext.unwrap_or_default(),
            acodec: codec(raw.acodec),
            vcodec: codec(raw.vcodec),
            size: raw.filesize.or(raw.filesize_approx),
            resolution: non_empty(raw.resolution),
            width: raw.width,
            height: raw.height,
            bitrate: raw.tbr,
            url: non_empty(raw.url),
        }
    }
}

impl From<RawMediaInfo> for MediaInfo {
    fn from(raw: RawMediaInfo) -> Self {
        Self {
            id: raw.id,
            title: raw.title.unwrap_or_default(),
            original_url: raw.original_url.or(raw.webpage_url).unwrap_or_default(),
            duration: raw.duration,
            uploader: non_empty(raw.uploader),
            upload_date: non_empty(raw.upload_date),
            thumbnail: non_empty(raw.thumbnail),
            extension: non_empty(raw.ext),
            size: raw.filesize.or(raw.filesize_approx),
            url: non_empty(raw.url),
            formats: raw
                .formats
                .unwrap_or_default()
                .into_iter()
                .map(Format::from)
                .collect(),
        }
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    /// Trimmed-down `-J` dump with mixed codecs and resolutions.
    pub const SAMPLE_DUMP: &str = r#"{
        "id": "abc123",
        "title": "Sample: A/B test",
        "webpage_url": "https://video.example.com/watch?v=abc123",
        "original_url": "https://video.example.com/watch?v=abc123&t=1",
        "duration": 212.5,
        "uploader": "Example Channel",
        "upload_date": "20240105",
        "thumbnail": "https://img.example.com/abc123.jpg",
        "ext": "mp4",
        "filesize_approx": 9000000,
        "url": "https://cdn.example.com/best.mp4",
        "formats": [
            {"format_id": "140", "ext": "m4a", "acodec": "mp4a.40.2", "vcodec": "none",
             "filesize": 3400000, "resolution": "audio only", "tbr": 129.5,
             "url": "https://cdn.example.com/140.m4a"},
            {"format_id": "251", "ext": "webm", "acodec": "opus", "vcodec": "none",
             "filesize": 3600000, "resolution": "audio only", "tbr": 135.0,
             "url": "https://cdn.example.com/251.webm"},
            {"format_id": "136", "ext": "mp4", "acodec": "none", "vcodec": "avc1.4d401f",
             "filesize": 12000000, "width": 1280, "height": 720, "resolution": "1280x720",
             "url": "https://cdn.example.com/136.mp4"},
            {"format_id": "22", "ext": "mp4", "acodec": "mp4a.40.2", "vcodec": "avc1.64001F",
             "filesize_approx": 15000000, "width": 1280, "height": 720, "resolution": "1280x720",
             "url": "https://cdn.example.com/22.mp4"},
            {"format_id": "247", "ext": "webm", "acodec": "none", "vcodec": "vp9",
             "filesize": 11000000, "width": 1280, "height": 720,
             "url": "https://cdn.example.com/247.webm"},
            {"format_id": "137", "ext": "mp4", "acodec": "none", "vcodec": "avc1.640028",
             "filesize": 30000000, "width": 1920, "height": 1080,
             "url": "https://cdn.example.com/137.mp4"},
            {"format_id": "sb0", "ext": "mhtml", "acodec": "none", "vcodec": "none",
             "url": "https://cdn.example.com/storyboard"}
        ]
    }"#;
}

#[cfg(test)]
mod tests {
    use super::fixtures::SAMPLE_DUMP;
    use super::*;

    #[test]
    fn parses_tool_dump() {
        let info = MediaInfo::from_tool_output(SAMPLE_DUMP.as_bytes()).unwrap();

        assert_eq!(info.id, "abc123");
        assert_eq!(info.original_url, "https://video.example.com/watch?v=abc123&t=1");
        assert_eq!(info.size, Some(9_000_000));
        assert_eq!(info.formats.len(), 7);

        let audio = &info.formats[0];
        assert!(audio.is_audio_only());
        assert_eq!(audio.vcodec, None);
        assert_eq!(audio.bitrate, Some(129.5));

        let muxed = &info.formats[3];
        assert_eq!(muxed.size, Some(15_000_000));
        assert!(muxed.has_audio() && muxed.has_video());

        let storyboard = &info.formats[6];
        assert!(!storyboard.has_audio() && !storyboard.has_video());
    }

    #[test]
    fn json_round_trip_is_field_identical() {
        let info = MediaInfo::from_tool_output(SAMPLE_DUMP.as_bytes()).unwrap();
        let json = serde_json::to_string(&info).unwrap();

        assert!(json.contains("\"originalUrl\""));
        assert!(json.contains("\"formatId\""));

        let back: MediaInfo = serde_json::from_str(&json).unwrap();
        assert_eq!(back, info);
    }

    #[test]
    fn malformed_output_is_a_parse_error() {
        let outputs: [&[u8]; 6] = [
            b"",
            b"   \n",
            b"ERROR: Unsupported URL",
            b"{\"id\": 5}",
            b"{\"title\": \"no id\"}",
            b"[1, 2, 3]",
        ];
        for output in outputs {
            let err = MediaInfo::from_tool_output(output).unwrap_err();
            assert!(matches!(err, Error::OutputParse(_)), "{err:?}");
        }
    }

    #[test]
    fn sparse_dump_uses_defaults() {
        let info = MediaInfo::from_tool_output(br#"{"id":"x","webpage_url":"https://e.com/x"}"#)
            .unwrap();
        assert_eq!(info.display_title(), "x");
        assert_eq!(info.original_url, "https://e.com/x");
        assert!(info.formats.is_empty());
        assert!(info.url.is_none());
    }
}
