//! Stage definitions and the spawner seam.

use std::collections::VecDeque;
use std::ffi::{OsStr, OsString};
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;

use tokio::process::{Child, ChildStderr, ChildStdout};
use tokio::task::JoinHandle;
use tracing::debug;

use super::records::RecordReader;
use crate::tokio_command;

/// Number of trailing stderr records kept for diagnostics.
const STDERR_TAIL_RECORDS: usize = 20;

/// How long to wait for a stage's stderr to drain after it exited.
const STDERR_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Callback invoked with every stderr record a stage emits.
pub type StderrObserver = Arc<dyn Fn(&str) + Send + Sync>;

/// Description of one process in a pipeline.
#[derive(Clone)]
pub struct StageCommand {
    name: String,
    program: PathBuf,
    args: Vec<OsString>,
    stderr_observer: Option<StderrObserver>,
}

impl StageCommand {
    /// Create a stage named `name` running `program`.
    pub fn new(name: impl Into<String>, program: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            program: program.into(),
            args: Vec::new(),
            stderr_observer: None,
        }
    }

    pub fn arg(mut self, arg: impl AsRef<OsStr>) -> Self {
        self.args.push(arg.as_ref().to_os_string());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.args
            .extend(args.into_iter().map(|a| a.as_ref().to_os_string()));
        self
    }

    /// Observe stderr records as they are produced (progress parsing).
    pub fn on_stderr(mut self, observer: StderrObserver) -> Self {
        self.stderr_observer = Some(observer);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    pub fn get_args(&self) -> &[OsString] {
        &self.args
    }
}

impl fmt::Debug for StageCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StageCommand")
            .field("name", &self.name)
            .field("program", &self.program)
            .field("args", &self.args)
            .field("stderr_observer", &self.stderr_observer.is_some())
            .finish()
    }
}

/// Launches stage processes.
///
/// Implementations must pipe stdout and stderr; the pipeline wires stdout
/// into the next stage and captures stderr for diagnostics.
pub trait StageSpawner: Send + Sync {
    fn spawn(&self, stage: &StageCommand, stdin: Stdio) -> io::Result<Child>;
}

/// Spawns stages as real OS processes connected by OS pipes.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemSpawner;

impl StageSpawner for SystemSpawner {
    fn spawn(&self, stage: &StageCommand, stdin: Stdio) -> io::Result<Child> {
        let mut cmd = tokio_command(stage.program());
        cmd.args(stage.get_args())
            .stdin(stdin)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd.spawn()
    }
}

/// A running stage owned by exactly one pipeline.
pub(crate) struct PipelineStage {
    name: String,
    child: Child,
    stderr: Option<JoinHandle<String>>,
}

impl PipelineStage {
    pub(crate) fn new(command: &StageCommand, mut child: Child) -> Self {
        let stderr = child.stderr.take().map(|stderr| {
            spawn_stderr_collector(
                command.name().to_string(),
                stderr,
                command.stderr_observer.clone(),
            )
        });

        Self {
            name: command.name().to_string(),
            child,
            stderr,
        }
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn id(&self) -> Option<u32> {
        self.child.id()
    }

    pub(crate) fn take_stdout(&mut self) -> Option<ChildStdout> {
        self.child.stdout.take()
    }

    pub(crate) async fn wait(&mut self) -> io::Result<ExitStatus> {
        self.child.wait().await
    }

    /// Request termination without waiting for it.
    pub(crate) fn kill(&mut self) {
        if let Err(e) = self.child.start_kill() {
            // InvalidInput means the process has already been reaped.
            if e.kind() != io::ErrorKind::InvalidInput {
                debug!(stage = %self.name, error = %e, "Failed to kill stage");
            }
        }
    }

    /// Captured stderr tail; only meaningful once the process has exited.
    pub(crate) async fn diagnostics(&mut self) -> String {
        let Some(handle) = self.stderr.take() else {
            return String::new();
        };
        match tokio::time::timeout(STDERR_DRAIN_TIMEOUT, handle).await {
            Ok(Ok(tail)) => tail,
            Ok(Err(e)) => format!("stderr collector failed: {e}"),
            Err(_) => String::new(),
        }
    }
}

fn spawn_stderr_collector(
    stage: String,
    stderr: ChildStderr,
    observer: Option<StderrObserver>,
) -> JoinHandle<String> {
    tokio::spawn(async move {
        let mut reader = RecordReader::new(stderr);
        let mut tail: VecDeque<String> = VecDeque::with_capacity(STDERR_TAIL_RECORDS);

        loop {
            match reader.next_record().await {
                Ok(Some(record)) => {
                    debug!(stage = %stage, "{}", record);
                    if let Some(observer) = &observer {
                        observer(&record);
                    }
                    if tail.len() == STDERR_TAIL_RECORDS {
                        tail.pop_front();
                    }
                    tail.push_back(record);
                }
                Ok(None) => break,
                Err(e) => {
                    debug!(stage = %stage, error = %e, "Stopped reading stage stderr");
                    break;
                }
            }
        }

        Vec::from(tail).join("\n")
    })
}
