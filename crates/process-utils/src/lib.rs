//! Process helpers shared across the workspace.
//!
//! Besides the small command constructors, this crate hosts the
//! [`pipeline`] module which chains several child processes into a single
//! byte stream (stage `i` stdout feeding stage `i + 1` stdin).

use std::ffi::OsStr;

#[cfg(feature = "tokio")]
pub mod pipeline;

#[cfg(feature = "tokio")]
pub use pipeline::{
    Pipeline, PipelineError, PipelineHandle, StageCommand, StageFailure, StageSpawner,
    StderrObserver, SystemSpawner,
};

#[cfg(windows)]
const CREATE_NO_WINDOW: u32 = 0x0800_0000;

/// Apply the Windows `CREATE_NO_WINDOW` flag to child processes.
///
/// On non-Windows targets this is a no-op.
pub trait NoWindowExt {
    fn no_window(&mut self);
}

impl NoWindowExt for std::process::Command {
    fn no_window(&mut self) {
        #[cfg(windows)]
        {
            use std::os::windows::process::CommandExt;
            self.creation_flags(CREATE_NO_WINDOW);
        }
    }
}

/// Create a `std::process::Command` that never opens a console window.
///
/// Used for short synchronous probes such as `--version` checks.
pub fn std_command(program: impl AsRef<OsStr>) -> std::process::Command {
    let mut cmd = std::process::Command::new(program);
    cmd.no_window();
    cmd
}

#[cfg(feature = "tokio")]
impl NoWindowExt for tokio::process::Command {
    fn no_window(&mut self) {
        #[cfg(windows)]
        {
            use std::os::windows::process::CommandExt;
            self.as_std_mut().creation_flags(CREATE_NO_WINDOW);
        }
    }
}

/// Create a `tokio::process::Command` that never opens a console window.
#[cfg(feature = "tokio")]
pub fn tokio_command(program: impl AsRef<OsStr>) -> tokio::process::Command {
    let mut cmd = tokio::process::Command::new(program);
    cmd.no_window();
    cmd
}

/// Run `program --version` and return the first line of its output.
///
/// Returns `None` when the program cannot be started or prints nothing.
/// Blocks the calling thread; use [`detect_version_async`] on a runtime.
pub fn detect_version(program: impl AsRef<OsStr>) -> Option<String> {
    let mut cmd = std_command(program);
    cmd.arg("--version");
    cmd.output().ok().and_then(|output| first_line(output.stdout))
}

/// Async variant of [`detect_version`].
#[cfg(feature = "tokio")]
pub async fn detect_version_async(program: impl AsRef<OsStr>) -> Option<String> {
    let mut cmd = tokio_command(program);
    cmd.arg("--version").kill_on_drop(true);
    let output = cmd.output().await.ok()?;
    first_line(output.stdout)
}

fn first_line(stdout: Vec<u8>) -> Option<String> {
    String::from_utf8(stdout)
        .ok()
        .and_then(|s| s.lines().next().map(|line| line.trim().to_string()))
        .filter(|line| !line.is_empty())
}
