//! Request options for downloads and streams.

use std::fmt;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use super::codec::{CodecFamily, encoder_for};
use crate::{Error, Result};

/// Whether an operation produces video or audio.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Video,
    Audio,
}

impl MediaKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Video => "video",
            Self::Audio => "audio",
        }
    }

    pub fn default_format(self) -> OutputFormat {
        match self {
            Self::Video => OutputFormat::Mp4,
            Self::Audio => OutputFormat::Mp3,
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for MediaKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "video" => Ok(Self::Video),
            "audio" => Ok(Self::Audio),
            other => Err(Error::validation(format!(
                "Unknown media kind '{other}', expected 'video' or 'audio'"
            ))),
        }
    }
}

/// Container produced by the transcode stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Mp4,
    Webm,
    Mkv,
    Mov,
    Ts,
    Mp3,
    M4a,
    Aac,
    Opus,
    Ogg,
    Flac,
    Wav,
}

impl OutputFormat {
    pub fn parse(value: &str) -> Result<Self> {
        let format = match value.trim().trim_start_matches('.').to_ascii_lowercase().as_str() {
            "mp4" => Self::Mp4,
            "webm" => Self::Webm,
            "mkv" | "matroska" => Self::Mkv,
            "mov" => Self::Mov,
            "ts" | "mpegts" => Self::Ts,
            "mp3" => Self::Mp3,
            "m4a" => Self::M4a,
            "aac" => Self::Aac,
            "opus" => Self::Opus,
            "ogg" => Self::Ogg,
            "flac" => Self::Flac,
            "wav" => Self::Wav,
            other => {
                return Err(Error::validation(format!("Unsupported output format '{other}'")));
            }
        };
        Ok(format)
    }

    pub fn is_audio(self) -> bool {
        matches!(
            self,
            Self::Mp3 | Self::M4a | Self::Aac | Self::Opus | Self::Ogg | Self::Flac | Self::Wav
        )
    }

    pub fn extension(self) -> &'static str {
        match self {
            Self::Mp4 => "mp4",
            Self::Webm => "webm",
            Self::Mkv => "mkv",
            Self::Mov => "mov",
            Self::Ts => "ts",
            Self::Mp3 => "mp3",
            Self::M4a => "m4a",
            Self::Aac => "aac",
            Self::Opus => "opus",
            Self::Ogg => "ogg",
            Self::Flac => "flac",
            Self::Wav => "wav",
        }
    }

    /// Muxer name passed to the transcode tool with `-f`.
    pub fn muxer(self) -> &'static str {
        match self {
            Self::Mkv => "matroska",
            Self::Ts => "mpegts",
            Self::M4a => "ipod",
            Self::Aac => "adts",
            other => other.extension(),
        }
    }

    pub fn content_type(self) -> &'static str {
        match self {
            Self::Mp4 => "video/mp4",
            Self::Webm => "video/webm",
            Self::Mkv => "video/x-matroska",
            Self::Mov => "video/quicktime",
            Self::Ts => "video/mp2t",
            Self::Mp3 => "audio/mpeg",
            Self::M4a => "audio/mp4",
            Self::Aac => "audio/aac",
            Self::Opus | Self::Ogg => "audio/ogg",
            Self::Flac => "audio/flac",
            Self::Wav => "audio/wav",
        }
    }

    /// MP4-family muxers need fragmenting to write to a non-seekable pipe.
    pub fn needs_fragmenting(self) -> bool {
        matches!(self, Self::Mp4 | Self::Mov | Self::M4a)
    }

    /// Audio encoder used when the request does not name one.
    pub fn default_audio_encoder(self) -> &'static str {
        match self {
            Self::Mp3 => "libmp3lame",
            Self::Opus | Self::Webm => "libopus",
            Self::Ogg => "libvorbis",
            Self::Flac => "flac",
            Self::Wav => "pcm_s16le",
            _ => "aac",
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

/// Options shared by every download and stream request.
///
/// Deserializes from both query strings and JSON bodies.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct MediaRequest {
    /// Page or media URL handed to the fetch tool.
    pub url: String,
    /// Operation id for progress events; empty disables events.
    pub id: String,
    /// Output container, e.g. `mp4` or `mp3`.
    pub format: Option<String>,
    /// Video codec family for video, audio codec for audio.
    pub codec: Option<String>,
    /// Height ceiling such as `720` or `720p`.
    pub resolution: Option<String>,
    /// Audio bitrate such as `192k`.
    pub bitrate: Option<String>,
}

impl MediaRequest {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// Validate every option and resolve it for `kind`.
    pub fn resolve(&self, kind: MediaKind) -> Result<TranscodeOptions> {
        validate_url(&self.url)?;

        let format = match non_empty(&self.format) {
            Some(raw) => OutputFormat::parse(raw)?,
            None => kind.default_format(),
        };
        if format.is_audio() != (kind == MediaKind::Audio) {
            return Err(Error::validation(format!(
                "Format '{format}' cannot carry {kind} output"
            )));
        }

        let codec = non_empty(&self.codec).map(str::to_ascii_lowercase);
        if let Some(codec) = codec.as_deref()
            && let Some(family) = CodecFamily::from_codec(codec)
            && family.is_audio() != (kind == MediaKind::Audio)
        {
            return Err(Error::validation(format!(
                "Codec '{codec}' is not a {kind} codec"
            )));
        }

        let bitrate = match non_empty(&self.bitrate) {
            Some(raw) => Some(parse_bitrate(raw)?),
            None => None,
        };

        Ok(TranscodeOptions {
            kind,
            format,
            codec,
            max_height: parse_resolution(self.resolution.as_deref().unwrap_or_default())?,
            bitrate,
        })
    }
}

/// Validated options for one operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscodeOptions {
    pub kind: MediaKind,
    pub format: OutputFormat,
    pub codec: Option<String>,
    pub max_height: Option<u32>,
    pub bitrate: Option<String>,
}

impl TranscodeOptions {
    /// Video encoder; `copy` when no codec was requested or it is unknown.
    pub fn video_encoder(&self) -> &'static str {
        self.codec.as_deref().map_or("copy", encoder_for)
    }

    /// Audio encoder for the chosen container and requested codec.
    pub fn audio_encoder(&self) -> &'static str {
        match (self.kind, self.codec.as_deref().and_then(CodecFamily::from_codec)) {
            (MediaKind::Audio, Some(family)) => family.encoder(),
            _ => self.format.default_audio_encoder(),
        }
    }

    /// Codec family requested for format selection.
    pub fn codec_family(&self) -> Option<CodecFamily> {
        self.codec.as_deref().and_then(CodecFamily::from_codec)
    }
}

/// Parse a height ceiling: `720`, `720p`, `1280x720`. Empty, `best` and
/// `max` mean no ceiling.
pub fn parse_resolution(value: &str) -> Result<Option<u32>> {
    let value = value.trim().to_ascii_lowercase();
    if value.is_empty() || value == "best" || value == "max" {
        return Ok(None);
    }

    let height = value.rsplit('x').next().unwrap_or_default();
    let height = height.strip_suffix('p').unwrap_or(height);
    match height.parse::<u32>() {
        Ok(h) if h > 0 => Ok(Some(h)),
        _ => Err(Error::validation(format!("Invalid resolution '{value}'"))),
    }
}

fn bitrate_regex() -> &'static Regex {
    static BITRATE: OnceLock<Regex> = OnceLock::new();
    BITRATE.get_or_init(|| Regex::new(r"^\d{1,7}(?:\.\d{1,3})?[km]?$").unwrap())
}

/// Normalize a bitrate such as `192k`, `1.5M` or `128000`.
pub fn parse_bitrate(value: &str) -> Result<String> {
    let value = value.trim().to_ascii_lowercase();
    if bitrate_regex().is_match(&value) {
        Ok(value)
    } else {
        Err(Error::validation(format!("Invalid bitrate '{value}'")))
    }
}

/// Accept only absolute http(s) URLs.
pub fn validate_url(value: &str) -> Result<url::Url> {
    let value = value.trim();
    if value.is_empty() {
        return Err(Error::validation("Missing url"));
    }
    let parsed =
        url::Url::parse(value).map_err(|e| Error::validation(format!("Invalid url '{value}': {e}")))?;
    match parsed.scheme() {
        "http" | "https" => Ok(parsed),
        scheme => Err(Error::validation(format!("Unsupported url scheme '{scheme}'"))),
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("720", Some(720))]
    #[case("720p", Some(720))]
    #[case(" 1080P ", Some(1080))]
    #[case("1280x720", Some(720))]
    #[case("", None)]
    #[case("best", None)]
    fn parses_resolution(#[case] input: &str, #[case] expected: Option<u32>) {
        assert_eq!(parse_resolution(input).unwrap(), expected);
    }

    #[rstest]
    #[case("tall")]
    #[case("0")]
    #[case("-720")]
    fn rejects_bad_resolution(#[case] input: &str) {
        assert!(matches!(parse_resolution(input), Err(Error::Validation(_))));
    }

    #[test]
    fn defaults_per_kind() {
        let request = MediaRequest::new("https://example.com/watch?v=1");

        let video = request.resolve(MediaKind::Video).unwrap();
        assert_eq!(video.format, OutputFormat::Mp4);
        assert_eq!(video.video_encoder(), "copy");
        assert_eq!(video.audio_encoder(), "aac");

        let audio = request.resolve(MediaKind::Audio).unwrap();
        assert_eq!(audio.format, OutputFormat::Mp3);
        assert_eq!(audio.audio_encoder(), "libmp3lame");
    }

    #[test]
    fn resolves_explicit_options() {
        let request = MediaRequest {
            url: "https://example.com/v".into(),
            format: Some("webm".into()),
            codec: Some("VP9".into()),
            resolution: Some("480p".into()),
            ..MediaRequest::default()
        };
        let options = request.resolve(MediaKind::Video).unwrap();
        assert_eq!(options.video_encoder(), "libvpx-vp9");
        assert_eq!(options.audio_encoder(), "libopus");
        assert_eq!(options.max_height, Some(480));
        assert_eq!(options.codec_family(), Some(CodecFamily::Vp9));

        let audio = MediaRequest {
            url: "https://example.com/v".into(),
            format: Some("ogg".into()),
            codec: Some("opus".into()),
            bitrate: Some("160K".into()),
            ..MediaRequest::default()
        }
        .resolve(MediaKind::Audio)
        .unwrap();
        assert_eq!(audio.audio_encoder(), "libopus");
        assert_eq!(audio.bitrate.as_deref(), Some("160k"));
    }

    #[rstest]
    #[case("", None, None, None)]
    #[case("ftp://example.com/a", None, None, None)]
    #[case("https://example.com", Some("exe"), None, None)]
    #[case("https://example.com", Some("mp3"), None, None)]
    #[case("https://example.com", None, Some("aac"), None)]
    #[case("https://example.com", None, None, Some("loud"))]
    fn rejects_invalid_video_requests(
        #[case] url: &str,
        #[case] format: Option<&str>,
        #[case] codec: Option<&str>,
        #[case] bitrate: Option<&str>,
    ) {
        let request = MediaRequest {
            url: url.into(),
            format: format.map(Into::into),
            codec: codec.map(Into::into),
            bitrate: bitrate.map(Into::into),
            ..MediaRequest::default()
        };
        assert!(matches!(
            request.resolve(MediaKind::Video),
            Err(Error::Validation(_))
        ));
    }

    #[test]
    fn deserializes_from_json_with_defaults() {
        let request: MediaRequest =
            serde_json::from_str(r#"{"url":"https://example.com","resolution":"720"}"#).unwrap();
        assert_eq!(request.id, "");
        assert_eq!(request.resolution.as_deref(), Some("720"));
        assert!(request.format.is_none());
    }

    #[test]
    fn output_format_metadata() {
        assert_eq!(OutputFormat::parse("MKV").unwrap().muxer(), "matroska");
        assert_eq!(OutputFormat::M4a.muxer(), "ipod");
        assert!(OutputFormat::M4a.needs_fragmenting());
        assert!(!OutputFormat::Webm.needs_fragmenting());
        assert_eq!(OutputFormat::Mp3.content_type(), "audio/mpeg");
    }
}
