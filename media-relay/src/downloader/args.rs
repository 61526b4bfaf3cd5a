//! Command lines for the fetch and transcode tools.

use std::path::Path;

use process_utils::StageCommand;

use super::codec::CodecFamily;
use super::options::{MediaKind, TranscodeOptions};

pub const FETCH_STAGE: &str = "fetch";
pub const TRANSCODE_STAGE: &str = "transcode";

/// Flags shared by every fetch invocation.
const FETCH_COMMON_ARGS: &[&str] = &["--no-playlist", "--no-warnings", "--no-color"];

/// Where the transcode stage writes.
#[derive(Debug, Clone, Copy)]
pub enum TranscodeOutput<'a> {
    Pipe,
    File(&'a Path),
}

/// Fetch-tool format expression for a video request.
///
/// Prefers a muxed rendition matching both constraints, then relaxes the
/// codec, then takes whatever the tool considers best.
pub fn video_format_selector(max_height: Option<u32>, codec: Option<CodecFamily>) -> String {
    let height = max_height.map(|h| format!("[height<={h}]")).unwrap_or_default();
    let mut alternatives = Vec::with_capacity(3);

    if let Some(codec) = codec {
        alternatives.push(format!("b{height}[vcodec^={}]", codec.filter_prefix()));
    }
    if !height.is_empty() {
        alternatives.push(format!("b{height}"));
    }
    alternatives.push("b".to_string());
    alternatives.join("/")
}

/// Fetch-tool format expression for an audio request.
pub fn audio_format_selector() -> String {
    "ba/b".to_string()
}

/// Format expression for `options`.
pub fn format_selector(options: &TranscodeOptions) -> String {
    match options.kind {
        MediaKind::Video => video_format_selector(options.max_height, options.codec_family()),
        MediaKind::Audio => audio_format_selector(),
    }
}

/// Metadata dump: one JSON document on stdout.
pub fn info_command(program: &Path, url: &str, format: Option<&str>) -> StageCommand {
    let mut command = StageCommand::new(FETCH_STAGE, program)
        .arg("-J")
        .args(FETCH_COMMON_ARGS);
    if let Some(format) = format {
        command = command.arg("-f").arg(format);
    }
    command.arg("--").arg(url)
}

/// Raw media bytes on stdout, progress lines on stderr.
pub fn fetch_command(program: &Path, url: &str, format: &str) -> StageCommand {
    StageCommand::new(FETCH_STAGE, program)
        .args(FETCH_COMMON_ARGS)
        .args(["--newline", "--no-part", "-f", format, "-o", "-", "--"])
        .arg(url)
}

/// Transcode stdin into the requested container.
pub fn transcode_command(
    program: &Path,
    options: &TranscodeOptions,
    output: TranscodeOutput<'_>,
) -> StageCommand {
    let mut command = StageCommand::new(TRANSCODE_STAGE, program).args([
        "-hide_banner",
        "-loglevel",
        "error",
        "-nostats",
        "-i",
        "pipe:0",
    ]);

    match options.kind {
        MediaKind::Video => {
            let encoder = options.video_encoder();
            command = command.args(["-c:v", encoder]);
            if encoder != "copy"
                && let Some(height) = options.max_height
            {
                command = command.arg("-vf").arg(format!("scale=-2:'min({height},ih)'"));
            }
        }
        MediaKind::Audio => {
            command = command.arg("-vn");
        }
    }

    command = command.args(["-c:a", options.audio_encoder()]);
    if let Some(bitrate) = &options.bitrate {
        command = command.arg("-b:a").arg(bitrate);
    }
    command = command.args(["-f", options.format.muxer()]);

    match output {
        TranscodeOutput::Pipe => {
            if options.format.needs_fragmenting() {
                command = command.args(["-movflags", "frag_keyframe+empty_moov"]);
            }
            command.arg("pipe:1")
        }
        TranscodeOutput::File(path) => command.arg("-y").arg(path),
    }
}
