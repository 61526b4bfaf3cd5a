//! Codec families.
//!
//! Tools report codecs with profile suffixes (`avc1.64001F`, `mp4a.40.2`)
//! and several aliases for the same codec. Selection and transcoding work
//! on the family instead.

use std::fmt;

/// A family of interchangeable codec identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CodecFamily {
    Avc,
    Hevc,
    Vp9,
    Av1,
    Aac,
    Opus,
    Vorbis,
    Mp3,
}

impl CodecFamily {
    /// Classify a codec string such as `avc1.4d401f`, `h264`, `vp09.00.40.08`.
    ///
    /// Returns `None` for unknown codecs and for the `none` placeholder.
    pub fn from_codec(codec: &str) -> Option<Self> {
        let base = codec
            .trim()
            .split('.')
            .next()
            .unwrap_or_default()
            .to_ascii_lowercase();

        match base.as_str() {
            "avc1" | "avc3" | "avc" | "h264" | "x264" => Some(Self::Avc),
            "hev1" | "hvc1" | "h265" | "hevc" | "x265" => Some(Self::Hevc),
            "vp09" | "vp9" => Some(Self::Vp9),
            "av01" | "av1" => Some(Self::Av1),
            "mp4a" | "aac" => Some(Self::Aac),
            "opus" => Some(Self::Opus),
            "vorbis" => Some(Self::Vorbis),
            "mp3" => Some(Self::Mp3),
            _ => None,
        }
    }

    pub fn is_audio(self) -> bool {
        matches!(self, Self::Aac | Self::Opus | Self::Vorbis | Self::Mp3)
    }

    /// Encoder name understood by the transcode tool.
    pub fn encoder(self) -> &'static str {
        match self {
            Self::Avc => "libx264",
            Self::Hevc => "libx265",
            Self::Vp9 => "libvpx-vp9",
            Self::Av1 => "libaom-av1",
            Self::Aac => "aac",
            Self::Opus => "libopus",
            Self::Vorbis => "libvorbis",
            Self::Mp3 => "libmp3lame",
        }
    }

    /// Prefix used by the fetch tool's format filters (`[vcodec^=avc1]`).
    pub fn filter_prefix(self) -> &'static str {
        match self {
            Self::Avc => "avc1",
            Self::Hevc => "hvc1",
            Self::Vp9 => "vp09",
            Self::Av1 => "av01",
            Self::Aac => "mp4a",
            Self::Opus => "opus",
            Self::Vorbis => "vorbis",
            Self::Mp3 => "mp3",
        }
    }
}

impl fmt::Display for CodecFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Avc => "avc",
            Self::Hevc => "hevc",
            Self::Vp9 => "vp9",
            Self::Av1 => "av1",
            Self::Aac => "aac",
            Self::Opus => "opus",
            Self::Vorbis => "vorbis",
            Self::Mp3 => "mp3",
        };
        f.write_str(name)
    }
}

/// Transcode encoder for a requested codec; unknown codecs copy the stream.
pub fn encoder_for(codec: &str) -> &'static str {
    CodecFamily::from_codec(codec).map_or("copy", CodecFamily::encoder)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("avc1.64001F", Some(CodecFamily::Avc))]
    #[case("H264", Some(CodecFamily::Avc))]
    #[case("hvc1.1.6.L93.B0", Some(CodecFamily::Hevc))]
    #[case("hev1", Some(CodecFamily::Hevc))]
    #[case("vp09.00.40.08", Some(CodecFamily::Vp9))]
    #[case("av01.0.08M.08", Some(CodecFamily::Av1))]
    #[case("mp4a.40.2", Some(CodecFamily::Aac))]
    #[case("opus", Some(CodecFamily::Opus))]
    #[case("none", None)]
    #[case("theora", None)]
    #[case("", None)]
    fn classifies_codec_strings(#[case] codec: &str, #[case] expected: Option<CodecFamily>) {
        assert_eq!(CodecFamily::from_codec(codec), expected);
    }

    #[rstest]
    #[case("avc", "libx264")]
    #[case("hevc", "libx265")]
    #[case("vp9", "libvpx-vp9")]
    #[case("av1", "libaom-av1")]
    #[case("mp3", "libmp3lame")]
    #[case("opus", "libopus")]
    #[case("vorbis", "libvorbis")]
    #[case("aac", "aac")]
    #[case("prores", "copy")]
    fn maps_codecs_to_encoders(#[case] codec: &str, #[case] encoder: &str) {
        assert_eq!(encoder_for(codec), encoder);
    }
}
