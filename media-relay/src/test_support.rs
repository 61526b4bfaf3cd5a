//! Fake fetch/transcode tools for tests.
//!
//! The scripts are written once per test binary, before any test spawns
//! them, so no process ever executes a file another thread still has open
//! for writing. Behaviour is chosen through the requested URL:
//!
//! - `.../fail`: the fetch tool exits 1 with an error on stderr
//! - `.../garbage`: the metadata dump is not JSON
//! - `.../empty`: the media download produces no bytes
//! - `.../slow`: the media download stalls until killed
//! - anything else: metadata from the sample dump, media bytes `fake-media-bytes`

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use tempfile::TempDir;

use crate::config::AppConfig;
use crate::downloader::models::fixtures::SAMPLE_DUMP;

pub const FAKE_MEDIA: &[u8] = b"fake-media-bytes";

const FAKE_FETCH: &str = r#"#!/bin/sh
for arg in "$@"; do url="$arg"; done
dump=0
for arg in "$@"; do [ "$arg" = "-J" ] && dump=1; done
case "$url" in
  *fail*) echo "ERROR: [generic] Unable to download webpage: HTTP Error 404: Not Found" >&2; exit 1 ;;
esac
if [ "$dump" = 1 ]; then
  case "$url" in
    *garbage*) echo "this is not json"; exit 0 ;;
  esac
  exec cat "$(dirname "$0")/info.json"
fi
case "$url" in
  *empty*) exit 0 ;;
  *slow*) echo "[download]   1.0% of 10.00MiB" >&2; exec sleep 30 ;;
esac
echo "[download]  25.0% of 10.00MiB at 1.00MiB/s ETA 00:07" >&2
echo "[download]  25.4% of 10.00MiB at 1.00MiB/s ETA 00:07" >&2
echo "[download] 100.0% of 10.00MiB in 00:01" >&2
printf 'fake-media-bytes'
"#;

const FAKE_TRANSCODE: &str = r#"#!/bin/sh
for arg in "$@"; do out="$arg"; done
if [ "$out" = "pipe:1" ]; then exec cat; fi
exec cat > "$out"
"#;

const FAILING_TRANSCODE: &str = r#"#!/bin/sh
cat > /dev/null
echo "pipe:0: Invalid data found when processing input" >&2
exit 1
"#;

pub struct FakeTools {
    dir: TempDir,
}

impl FakeTools {
    pub fn fetch(&self) -> PathBuf {
        self.dir.path().join("fake-yt-dlp")
    }

    pub fn transcode(&self) -> PathBuf {
        self.dir.path().join("fake-ffmpeg")
    }

    pub fn failing_transcode(&self) -> PathBuf {
        self.dir.path().join("failing-ffmpeg")
    }

    /// Configuration using the fake tools and directories under `root`.
    pub fn config(&self, root: &Path) -> AppConfig {
        AppConfig {
            ytdlp_path: self.fetch(),
            ffmpeg_path: self.transcode(),
            download_dir: root.join("downloads"),
            temp_dir: root.join("tmp"),
            ..AppConfig::default()
        }
    }
}

fn write_script(dir: &Path, name: &str, body: &str) {
    let path = dir.join(name);
    std::fs::write(&path, body).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
}

pub fn fake_tools() -> &'static FakeTools {
    static TOOLS: OnceLock<FakeTools> = OnceLock::new();
    TOOLS.get_or_init(|| {
        let dir = tempfile::Builder::new()
            .prefix("media-relay-tools")
            .tempdir()
            .unwrap();
        std::fs::write(dir.path().join("info.json"), SAMPLE_DUMP).unwrap();
        write_script(dir.path(), "fake-yt-dlp", FAKE_FETCH);
        write_script(dir.path(), "fake-ffmpeg", FAKE_TRANSCODE);
        write_script(dir.path(), "failing-ffmpeg", FAILING_TRANSCODE);
        FakeTools { dir }
    })
}

/// Prepared config rooted in a fresh temp dir.
pub async fn prepared_config() -> (TempDir, AppConfig) {
    let root = TempDir::new().unwrap();
    let config = fake_tools().config(root.path());
    config.prepare().await.unwrap();
    (root, config)
}
