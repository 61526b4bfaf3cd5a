//! Media retrieval through the fetch and transcode tools.
//!
//! Every operation builds a [`Pipeline`] of tool invocations:
//!
//! - metadata: `fetch -J` alone, stdout parsed as JSON,
//! - download: `fetch -o -` piped into `transcode` writing a file,
//! - stream: `fetch -o -` piped into `transcode` writing to stdout.
//!
//! Operations with a non-empty id publish progress events and end with
//! exactly one terminal event (`complete` or `error`) for that id.

pub mod args;
pub mod codec;
pub mod models;
pub mod options;
pub mod selector;
pub mod tracker;

pub use codec::CodecFamily;
pub use models::{Format, MediaInfo};
pub use options::{MediaKind, MediaRequest, OutputFormat, TranscodeOptions};
pub use selector::{FormatSelection, FormatSelector};

use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use process_utils::{
    Pipeline, PipelineError, PipelineHandle, StageCommand, StageSpawner, SystemSpawner,
};
use tokio::io::{AsyncRead, AsyncReadExt, ReadBuf};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::AppConfig;
use crate::progress::{ProgressBroadcaster, ProgressEvent, ProgressStatus};
use crate::utils::{filename, fs};
use crate::{Error, Result};

use args::TranscodeOutput;

/// Runs tool pipelines for metadata, downloads and streams.
pub struct Downloader {
    ytdlp_path: PathBuf,
    ffmpeg_path: PathBuf,
    download_dir: PathBuf,
    temp_dir: PathBuf,
    spawner: Arc<dyn StageSpawner>,
    progress: Option<Arc<ProgressBroadcaster>>,
}

impl std::fmt::Debug for Downloader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Downloader")
            .field("ytdlp_path", &self.ytdlp_path)
            .field("ffmpeg_path", &self.ffmpeg_path)
            .field("download_dir", &self.download_dir)
            .field("temp_dir", &self.temp_dir)
            .field("progress", &self.progress.is_some())
            .finish()
    }
}

impl Downloader {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            ytdlp_path: config.ytdlp_path.clone(),
            ffmpeg_path: config.ffmpeg_path.clone(),
            download_dir: config.download_dir.clone(),
            temp_dir: config.temp_dir.clone(),
            spawner: Arc::new(SystemSpawner),
            progress: None,
        }
    }

    /// Replace the process spawner.
    pub fn with_spawner(mut self, spawner: Arc<dyn StageSpawner>) -> Self {
        self.spawner = spawner;
        self
    }

    /// Publish progress events through `progress`.
    pub fn with_progress(mut self, progress: Arc<ProgressBroadcaster>) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Metadata for `url` as reported by the fetch tool.
    pub async fn get_media_info(
        &self,
        url: &str,
        id: &str,
        cancel: &CancellationToken,
    ) -> Result<MediaInfo> {
        let result = self.resolve_info(url, None, id, cancel).await;
        self.finish(id, "Media info ready", &result, |info| Some(info.clone()));
        result
    }

    /// Metadata with `url` pointing at the best matching video rendition.
    ///
    /// `resolution` is a height ceiling such as `720p`; `codec` a video codec
    /// such as `avc1`. See [`FormatSelector`] for the rules.
    pub async fn get_stream_info(
        &self,
        url: &str,
        resolution: Option<&str>,
        codec: Option<&str>,
        id: &str,
        cancel: &CancellationToken,
    ) -> Result<MediaInfo> {
        let result = self
            .resolve_stream_info(url, resolution, codec, id, cancel)
            .await;
        self.finish(id, "Stream info ready", &result, |info| Some(info.clone()));
        result
    }

    async fn resolve_stream_info(
        &self,
        url: &str,
        resolution: Option<&str>,
        codec: Option<&str>,
        id: &str,
        cancel: &CancellationToken,
    ) -> Result<MediaInfo> {
        let max_height = options::parse_resolution(resolution.unwrap_or_default())?;
        let codec = codec.map(str::trim).filter(|c| !c.is_empty());
        let format = args::video_format_selector(max_height, codec.and_then(CodecFamily::from_codec));

        let info = self.resolve_info(url, Some(&format), id, cancel).await?;
        FormatSelector::new(FormatSelection {
            max_height,
            codec: codec.map(str::to_string),
        })
        .apply(info)
    }

    pub async fn download_video_to_file(
        &self,
        request: &MediaRequest,
        cancel: &CancellationToken,
    ) -> Result<(PathBuf, MediaInfo)> {
        self.download(MediaKind::Video, request, &self.download_dir, cancel)
            .await
    }

    pub async fn download_audio_to_file(
        &self,
        request: &MediaRequest,
        cancel: &CancellationToken,
    ) -> Result<(PathBuf, MediaInfo)> {
        self.download(MediaKind::Audio, request, &self.download_dir, cancel)
            .await
    }

    /// Like [`download_video_to_file`](Self::download_video_to_file) but into
    /// the temp directory. The caller removes the file.
    pub async fn download_video_to_temp_file(
        &self,
        request: &MediaRequest,
        cancel: &CancellationToken,
    ) -> Result<(PathBuf, MediaInfo)> {
        self.download(MediaKind::Video, request, &self.temp_dir, cancel)
            .await
    }

    pub async fn download_audio_to_temp_file(
        &self,
        request: &MediaRequest,
        cancel: &CancellationToken,
    ) -> Result<(PathBuf, MediaInfo)> {
        self.download(MediaKind::Audio, request, &self.temp_dir, cancel)
            .await
    }

    /// Dispatch on `kind`.
    pub async fn download_to_file(
        &self,
        kind: MediaKind,
        request: &MediaRequest,
        temporary: bool,
        cancel: &CancellationToken,
    ) -> Result<(PathBuf, MediaInfo)> {
        let dir = if temporary {
            &self.temp_dir
        } else {
            &self.download_dir
        };
        self.download(kind, request, dir, cancel).await
    }

    pub async fn stream_video(
        &self,
        request: &MediaRequest,
        cancel: &CancellationToken,
    ) -> Result<MediaStream> {
        self.stream(MediaKind::Video, request, cancel)
    }

    pub async fn stream_audio(
        &self,
        request: &MediaRequest,
        cancel: &CancellationToken,
    ) -> Result<MediaStream> {
        self.stream(MediaKind::Audio, request, cancel)
    }

    /// Start a fetch -> transcode pipeline writing to stdout.
    ///
    /// Success or failure of the tools is only known once the returned
    /// stream is closed.
    pub fn stream(
        &self,
        kind: MediaKind,
        request: &MediaRequest,
        cancel: &CancellationToken,
    ) -> Result<MediaStream> {
        let id = request.id.as_str();
        let result = self.start_stream(kind, request, cancel);
        if let Err(e) = &result {
            self.send_error(id, "Failed to start stream", e);
        }
        result
    }

    fn start_stream(
        &self,
        kind: MediaKind,
        request: &MediaRequest,
        cancel: &CancellationToken,
    ) -> Result<MediaStream> {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        let options = request.resolve(kind)?;
        let commands = vec![
            self.fetch_stage(&request.url, &args::format_selector(&options), &request.id),
            args::transcode_command(&self.ffmpeg_path, &options, TranscodeOutput::Pipe),
        ];

        let pipeline = Pipeline::start(self.spawner.as_ref(), commands, cancel.child_token())?;
        info!(id = %request.id, url = %request.url, %kind, format = %options.format, "Streaming media");
        self.report(ProgressEvent::new(
            request.id.as_str(),
            ProgressStatus::Streaming,
            "Streaming",
            0.0,
        ));

        Ok(MediaStream {
            pipeline,
            format: options.format,
            id: request.id.clone(),
            progress: self.progress.clone(),
        })
    }

    async fn download(
        &self,
        kind: MediaKind,
        request: &MediaRequest,
        dir: &Path,
        cancel: &CancellationToken,
    ) -> Result<(PathBuf, MediaInfo)> {
        let result = self.download_inner(kind, request, dir, cancel).await;
        self.finish(&request.id, "Download complete", &result, |(_, info)| {
            Some(info.clone())
        });
        result
    }

    async fn download_inner(
        &self,
        kind: MediaKind,
        request: &MediaRequest,
        dir: &Path,
        cancel: &CancellationToken,
    ) -> Result<(PathBuf, MediaInfo)> {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        let options = request.resolve(kind)?;
        let format = args::format_selector(&options);
        let id = request.id.as_str();

        let info = self
            .resolve_info(&request.url, Some(&format), id, cancel)
            .await?;

        let path = dir.join(filename::output_file_name(
            &info.id,
            &info.title,
            options.format.extension(),
        ));
        debug!(id, path = %path.display(), "Downloading media");
        self.report(ProgressEvent::new(
            id,
            ProgressStatus::Downloading,
            "Downloading",
            0.0,
        ));

        let commands = vec![
            self.fetch_stage(&request.url, &format, id),
            args::transcode_command(&self.ffmpeg_path, &options, TranscodeOutput::File(&path)),
        ];
        match self.write_verified(commands, &path, id, cancel).await {
            Ok(size) => {
                info!(id, path = %path.display(), size, %kind, "Download finished");
                Ok((path, info))
            }
            Err(e) => {
                warn!(id, path = %path.display(), error = %e, "Download failed, removing partial output");
                fs::remove_file_quietly(&path).await;
                Err(e)
            }
        }
    }

    /// Run a file-writing pipeline and check the file is not empty.
    async fn write_verified(
        &self,
        commands: Vec<StageCommand>,
        path: &Path,
        id: &str,
        cancel: &CancellationToken,
    ) -> Result<u64> {
        self.run_to_end(commands, cancel).await?;
        self.report(ProgressEvent::new(
            id,
            ProgressStatus::Processing,
            "Verifying output",
            100.0,
        ));
        match fs::file_size(path).await {
            Some(size) if size > 0 => Ok(size),
            _ => Err(Error::output_parse(format!(
                "transcode produced no output at {}",
                path.display()
            ))),
        }
    }

    /// Run the metadata dump, publishing `fetching_info` first.
    async fn resolve_info(
        &self,
        url: &str,
        format: Option<&str>,
        id: &str,
        cancel: &CancellationToken,
    ) -> Result<MediaInfo> {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        options::validate_url(url)?;
        self.report(ProgressEvent::new(
            id,
            ProgressStatus::FetchingInfo,
            "Fetching media info",
            0.0,
        ));

        let command = args::info_command(&self.ytdlp_path, url, format);
        let output = self.run_to_end(vec![command], cancel).await?;
        let info = MediaInfo::from_tool_output(&output)?;
        debug!(
            id,
            media_id = %info.id,
            title = info.display_title(),
            formats = info.formats.len(),
            "Resolved media info"
        );
        Ok(info)
    }

    /// Run a pipeline to completion and collect its stdout.
    async fn run_to_end(
        &self,
        commands: Vec<StageCommand>,
        cancel: &CancellationToken,
    ) -> Result<Vec<u8>> {
        let mut pipeline = Pipeline::start(self.spawner.as_ref(), commands, cancel.child_token())?;
        let mut output = Vec::new();
        let read = pipeline.read_to_end(&mut output).await;

        // The close result names the failing stage; prefer it over the read error.
        pipeline.close().await?;
        read.map_err(read_error)?;
        Ok(output)
    }

    fn fetch_stage(&self, url: &str, format: &str, id: &str) -> StageCommand {
        let command = args::fetch_command(&self.ytdlp_path, url, format);
        match &self.progress {
            Some(progress) if !id.is_empty() => {
                command.on_stderr(tracker::download_observer(Arc::clone(progress), id))
            }
            _ => command,
        }
    }

    fn report(&self, event: ProgressEvent) {
        if let Some(progress) = &self.progress {
            progress.send_event(&event);
        }
    }

    fn send_error(&self, id: &str, message: &str, error: &Error) {
        if let Some(progress) = &self.progress {
            progress.send_error(id, message, error.to_string());
        }
    }

    fn finish<T>(
        &self,
        id: &str,
        message: &str,
        result: &Result<T>,
        media_info: impl FnOnce(&T) -> Option<MediaInfo>,
    ) {
        let Some(progress) = &self.progress else {
            return;
        };
        match result {
            Ok(value) => progress.send_complete(id, message, media_info(value)),
            Err(e) => progress.send_error(id, "Operation failed", e.to_string()),
        }
    }
}

fn read_error(e: io::Error) -> Error {
    match PipelineError::from_io(&e) {
        Some(pipeline) => Error::from(pipeline.clone()),
        None => Error::Io(e),
    }
}

/// Transcoded output of a running stream pipeline.
///
/// Reads yield the transcoder's stdout. The caller must [`close`](Self::close)
/// the stream to learn whether the tools succeeded.
pub struct MediaStream {
    pipeline: Pipeline,
    format: OutputFormat,
    id: String,
    progress: Option<Arc<ProgressBroadcaster>>,
}

impl MediaStream {
    pub fn format(&self) -> OutputFormat {
        self.format
    }

    pub fn content_type(&self) -> &'static str {
        self.format.content_type()
    }

    /// Handle that can cancel or close the pipeline from another task.
    pub fn handle(&self) -> PipelineHandle {
        self.pipeline.handle()
    }

    /// Close the pipeline and publish the terminal event for the stream id.
    pub fn close(&self) -> impl Future<Output = Result<()>> + Send + 'static {
        let close = self.pipeline.close();
        let progress = self.progress.clone();
        let id = self.id.clone();

        async move {
            let result = close.await.map_err(Error::from);
            if let Some(progress) = progress {
                match &result {
                    Ok(()) => progress.send_complete(&id, "Stream finished", None),
                    Err(e) => progress.send_error(&id, "Stream failed", e.to_string()),
                }
            }
            result
        }
    }
}

impl std::fmt::Debug for MediaStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaStream")
            .field("pipeline", &self.pipeline)
            .field("format", &self.format)
            .field("id", &self.id)
            .finish()
    }
}

impl AsyncRead for MediaStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().pipeline).poll_read(cx, buf)
    }
}
