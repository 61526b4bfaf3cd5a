//! Chained child-process pipelines.
//!
//! A [`Pipeline`] runs one or more [`StageCommand`]s where the stdout of
//! each stage is wired directly (through an OS pipe) into the stdin of the
//! next one. The stdout of the last stage is exposed through
//! [`tokio::io::AsyncRead`].
//!
//! Lifecycle:
//! - a supervisor task owns every stage and waits on each of them exactly
//!   once; its result is cached and shared,
//! - [`Pipeline::close`] drops the output handle and returns the cached
//!   result; repeated or concurrent calls all observe the same value,
//! - cancelling the caller's token kills every stage. This is a hard stop
//!   and can truncate output; it is not a graceful shutdown.
//!
//! Only one consumer should read the output at a time. Closing through a
//! [`PipelineHandle`] while a read is pending makes that read fail.

mod error;
mod records;
mod stage;

pub use error::{PipelineError, StageFailure};
pub use stage::{StageCommand, StageSpawner, StderrObserver, SystemSpawner};

use std::future::Future;
use std::io;
use std::pin::Pin;
use std::process::Stdio;
use std::sync::Arc;
use std::task::{Context, Poll};

use parking_lot::Mutex;
use tokio::io::{AsyncRead, ReadBuf};
use tokio::process::ChildStdout;
use tokio::sync::watch;
use tokio_util::sync::{CancellationToken, WaitForCancellationFutureOwned};
use tracing::{debug, warn};

use stage::PipelineStage;

type Outcome = Result<(), PipelineError>;

/// Close progression. Only the caller that moves `Open -> Closing` closes
/// the output; everyone else waits for `Closed` and gets the cached value.
///
/// `Closing` remembers whether the caller's token was already cancelled, so
/// a close after cancellation reports it even if every stage had exited.
enum CloseState {
    Open,
    Closing { cancelled: bool },
    Closed(Outcome),
}

struct Shared {
    stage_names: Vec<String>,
    output: Mutex<Option<ChildStdout>>,
    state: Mutex<CloseState>,
    /// Fires on close and, as a child token, on caller cancellation.
    closed: CancellationToken,
    cancel: CancellationToken,
    outcome: watch::Receiver<Option<Outcome>>,
}

impl Shared {
    async fn close(&self) -> Outcome {
        let (transitioned, cancelled) = {
            let mut state = self.state.lock();
            match &*state {
                CloseState::Closed(outcome) => return outcome.clone(),
                CloseState::Closing { cancelled } => (false, *cancelled),
                CloseState::Open => {
                    let cancelled = self.cancel.is_cancelled();
                    *state = CloseState::Closing { cancelled };
                    (true, cancelled)
                }
            }
        };

        if transitioned {
            drop(self.output.lock().take());
            self.closed.cancel();
            debug!(stages = ?self.stage_names, cancelled, "Pipeline output closed");
        }

        // Reads fail with the cancellation error once the token fires, so
        // close must agree with them whatever the stages returned.
        let outcome = match self.outcome().await {
            _ if cancelled => Err(PipelineError::Cancelled),
            outcome => outcome,
        };

        let mut state = self.state.lock();
        if matches!(*state, CloseState::Closing { .. }) {
            *state = CloseState::Closed(outcome.clone());
        }
        outcome
    }

    async fn outcome(&self) -> Outcome {
        let mut rx = self.outcome.clone();
        let settled = match rx.wait_for(Option::is_some).await {
            Ok(value) => (*value).clone(),
            Err(_) => None,
        };
        settled.unwrap_or(Err(PipelineError::Aborted))
    }

    fn interrupted(&self) -> io::Error {
        if self.cancel.is_cancelled() {
            PipelineError::Cancelled.into_io()
        } else {
            PipelineError::Closed.into_io()
        }
    }
}

/// A running chain of processes; reads yield the last stage's stdout.
pub struct Pipeline {
    shared: Arc<Shared>,
    closed: Pin<Box<WaitForCancellationFutureOwned>>,
    finishing: Option<Pin<Box<dyn Future<Output = Outcome> + Send>>>,
    eof: bool,
}

impl Pipeline {
    /// Launch `commands` in order, wiring each stage's stdout into the next.
    ///
    /// Nothing is spawned when `cancel` is already cancelled. When a stage
    /// fails to launch, every stage started before it is killed and the
    /// error names the failing stage.
    pub fn start(
        spawner: &dyn StageSpawner,
        commands: Vec<StageCommand>,
        cancel: CancellationToken,
    ) -> Result<Self, PipelineError> {
        if commands.is_empty() {
            return Err(PipelineError::NoStages);
        }
        if cancel.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }

        let mut stages: Vec<PipelineStage> = Vec::with_capacity(commands.len());
        let mut upstream: Option<ChildStdout> = None;

        for command in &commands {
            let stdin = match upstream.take() {
                None => Stdio::null(),
                Some(stdout) => match stdout.try_into() {
                    Ok(stdio) => stdio,
                    Err(e) => {
                        abort_started(&mut stages);
                        return Err(PipelineError::start(command.name(), &e));
                    }
                },
            };

            let child = match spawner.spawn(command, stdin) {
                Ok(child) => child,
                Err(e) => {
                    warn!(stage = command.name(), program = %command.program().display(), error = %e, "Failed to start pipeline stage");
                    abort_started(&mut stages);
                    return Err(PipelineError::start(command.name(), &e));
                }
            };

            let mut stage = PipelineStage::new(command, child);
            debug!(stage = stage.name(), pid = ?stage.id(), "Pipeline stage started");
            upstream = stage.take_stdout();
            stages.push(stage);

            if upstream.is_none() {
                abort_started(&mut stages);
                let e = io::Error::new(io::ErrorKind::BrokenPipe, "stdout was not piped");
                return Err(PipelineError::start(command.name(), &e));
            }
        }

        let stage_names = commands.iter().map(|c| c.name().to_string()).collect();
        let closed = cancel.child_token();
        let (outcome_tx, outcome_rx) = watch::channel(None);

        let supervisor_cancel = cancel.clone();
        tokio::spawn(async move {
            let outcome = supervise(stages, supervisor_cancel).await;
            let _ = outcome_tx.send(Some(outcome));
        });

        let shared = Arc::new(Shared {
            stage_names,
            output: Mutex::new(upstream),
            state: Mutex::new(CloseState::Open),
            closed: closed.clone(),
            cancel,
            outcome: outcome_rx,
        });

        Ok(Self {
            shared,
            closed: Box::pin(closed.cancelled_owned()),
            finishing: None,
            eof: false,
        })
    }

    /// A cloneable handle that can close the pipeline from another task.
    pub fn handle(&self) -> PipelineHandle {
        PipelineHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Names of the stages, in order.
    pub fn stage_names(&self) -> &[String] {
        &self.shared.stage_names
    }

    /// Close the output and wait for every stage.
    ///
    /// Returns `Ok(())` when every stage exited cleanly, the cancellation
    /// error when the pipeline was cancelled, or one combined error naming
    /// each failed stage with its captured stderr.
    pub fn close(&self) -> impl Future<Output = Result<(), PipelineError>> + Send + 'static {
        let shared = Arc::clone(&self.shared);
        async move { shared.close().await }
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("stages", &self.shared.stage_names)
            .field("eof", &self.eof)
            .finish()
    }
}

impl AsyncRead for Pipeline {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();

        if let Some(finishing) = this.finishing.as_mut() {
            let outcome = std::task::ready!(finishing.as_mut().poll(cx));
            this.finishing = None;
            this.eof = true;
            return Poll::Ready(outcome.map_err(PipelineError::into_io));
        }
        if this.eof || buf.remaining() == 0 {
            return Poll::Ready(Ok(()));
        }
        if this.closed.as_mut().poll(cx).is_ready() {
            return Poll::Ready(Err(this.shared.interrupted()));
        }

        let before = buf.filled().len();
        {
            let mut output = this.shared.output.lock();
            let Some(stdout) = output.as_mut() else {
                return Poll::Ready(Err(this.shared.interrupted()));
            };
            std::task::ready!(Pin::new(stdout).poll_read(cx, buf))?;
        }

        if buf.filled().len() > before {
            return Poll::Ready(Ok(()));
        }

        // End of output: report the aggregate result so a crashed stage
        // surfaces as a read error instead of a clean EOF.
        let shared = Arc::clone(&this.shared);
        this.finishing = Some(Box::pin(async move { shared.outcome().await }));
        Pin::new(this).poll_read(cx, buf)
    }
}

/// Cloneable close handle for a [`Pipeline`].
#[derive(Clone)]
pub struct PipelineHandle {
    shared: Arc<Shared>,
}

impl PipelineHandle {
    /// Same as [`Pipeline::close`].
    pub async fn close(&self) -> Result<(), PipelineError> {
        self.shared.close().await
    }

    /// Cancel the pipeline, killing every stage.
    pub fn cancel(&self) {
        self.shared.cancel.cancel();
    }
}

/// Kill stages started before a launch failure and reap them in the background.
fn abort_started(stages: &mut Vec<PipelineStage>) {
    if stages.is_empty() {
        return;
    }
    let mut started = std::mem::take(stages);
    for stage in started.iter_mut() {
        debug!(stage = stage.name(), "Killing stage after failed pipeline start");
        stage.kill();
    }
    tokio::spawn(async move {
        for stage in started.iter_mut() {
            let _ = stage.wait().await;
        }
    });
}

/// Wait for every stage exactly once, killing all of them on cancellation.
async fn supervise(mut stages: Vec<PipelineStage>, cancel: CancellationToken) -> Outcome {
    let statuses = {
        let waits = futures::future::join_all(stages.iter_mut().map(|stage| stage.wait()));
        tokio::select! {
            statuses = waits => Some(statuses),
            _ = cancel.cancelled() => None,
        }
    };

    let Some(statuses) = statuses else {
        warn!(
            stages = ?stages.iter().map(PipelineStage::name).collect::<Vec<_>>(),
            "Pipeline cancelled, killing stages"
        );
        for stage in stages.iter_mut() {
            stage.kill();
        }
        for stage in stages.iter_mut() {
            if let Err(e) = stage.wait().await {
                debug!(stage = stage.name(), error = %e, "Failed to reap killed stage");
            }
        }
        return Err(PipelineError::Cancelled);
    };

    let mut failures = Vec::new();
    for (stage, status) in stages.iter_mut().zip(statuses) {
        match status {
            Ok(status) if status.success() => {
                // Drain stderr so every observer call happens before the outcome.
                stage.diagnostics().await;
                debug!(stage = stage.name(), "Pipeline stage exited cleanly");
            }
            Ok(status) => failures.push(StageFailure {
                stage: stage.name().to_string(),
                code: status.code(),
                diagnostics: stage.diagnostics().await,
            }),
            Err(e) => failures.push(StageFailure {
                stage: stage.name().to_string(),
                code: None,
                diagnostics: format!("failed to wait for process: {e}"),
            }),
        }
    }

    if failures.is_empty() {
        Ok(())
    } else {
        let err = PipelineError::StageFailed(failures);
        warn!(error = %err, "Pipeline finished with failures");
        Err(err)
    }
}
