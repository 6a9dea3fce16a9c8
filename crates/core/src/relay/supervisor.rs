//! Per-session owner of the helper process.

use std::collections::VecDeque;
use std::io;
use std::process::ExitStatus;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr};
use tokio::sync::{oneshot, OwnedSemaphorePermit};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use super::error::RelayError;
use super::registry::SessionRegistry;
use crate::metrics::{HELPER_EXITS, SESSIONS_ACTIVE, SESSION_DURATION};

/// How long to wait for the stderr reader after the helper is reaped.
const STDERR_DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

/// Why the consumer let go of a session's stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Release {
    /// The helper closed stdout and every byte was yielded.
    Finished,
    /// The stream was dropped with the helper still writing.
    Dropped,
}

/// How a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Failed,
    Terminated,
}

impl Outcome {
    fn label(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failed => "failed",
            Self::Terminated => "terminated",
        }
    }
}

enum Trigger {
    Exited(io::Result<ExitStatus>),
    Released(Release),
    Cancelled,
}

/// Why the supervisor had to stop a still-running helper.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stop {
    /// Stdout was already closed; the helper did not exit within the grace period.
    Lingering,
    Dropped,
    Cancelled,
}

/// Owns a session's child from spawn to reap.
///
/// Whatever ends the session (helper exit, stream drop, cancellation), the
/// child is terminated if still running, then waited on, then the session is
/// deregistered, its admission permit released, and the result reported to
/// the stream.
pub(crate) struct Supervisor {
    pub session_id: String,
    pub child: Child,
    pub stderr: Option<JoinHandle<Vec<String>>>,
    pub released: oneshot::Receiver<Release>,
    pub cancelled: oneshot::Receiver<()>,
    pub exit: oneshot::Sender<Result<(), RelayError>>,
    pub registry: SessionRegistry,
    pub grace: Duration,
    pub permit: OwnedSemaphorePermit,
}

impl Supervisor {
    pub(crate) async fn run(mut self) -> Outcome {
        let started = Instant::now();

        let trigger = tokio::select! {
            status = self.child.wait() => Trigger::Exited(status),
            release = &mut self.released => {
                // a dropped sender means the stream never reached the consumer
                Trigger::Released(release.unwrap_or(Release::Dropped))
            }
            _ = &mut self.cancelled => Trigger::Cancelled,
        };

        let (status, stop) = match trigger {
            Trigger::Exited(status) => (status, None),
            Trigger::Released(Release::Finished) => {
                // stdout is closed; give the helper its grace period to exit
                match timeout(self.grace, self.child.wait()).await {
                    Ok(status) => (status, None),
                    Err(_) => {
                        debug!(session_id = %self.session_id, "Helper lingering after EOF");
                        (
                            terminate(&mut self.child, Duration::ZERO).await,
                            Some(Stop::Lingering),
                        )
                    }
                }
            }
            Trigger::Released(Release::Dropped) => {
                info!(session_id = %self.session_id, "Client went away; terminating helper");
                (
                    terminate(&mut self.child, self.grace).await,
                    Some(Stop::Dropped),
                )
            }
            Trigger::Cancelled => {
                info!(session_id = %self.session_id, "Session cancelled; terminating helper");
                (
                    terminate(&mut self.child, self.grace).await,
                    Some(Stop::Cancelled),
                )
            }
        };

        let stderr_tail = match self.stderr.take() {
            Some(handle) => drain_stderr(handle).await,
            None => Vec::new(),
        };

        let (outcome, result) = match (status, stop) {
            (Ok(_), Some(Stop::Cancelled)) => (Outcome::Terminated, Err(RelayError::Cancelled)),
            // every byte was already relayed
            (Ok(_), Some(Stop::Lingering)) => (Outcome::Terminated, Ok(())),
            (Ok(_), Some(Stop::Dropped)) => (Outcome::Terminated, Ok(())),
            (Ok(status), None) if status.success() => {
                info!(session_id = %self.session_id, "Helper exited cleanly");
                (Outcome::Success, Ok(()))
            }
            (Ok(status), None) => {
                let stderr = stderr_tail.join("\n");
                let err = RelayError::ProcessFailed {
                    code: status.code(),
                    stderr_tail,
                };
                warn!(
                    session_id = %self.session_id,
                    error = %err,
                    stderr = %stderr,
                    "Helper failed"
                );
                (Outcome::Failed, Err(err))
            }
            (Err(e), _) => {
                error!(session_id = %self.session_id, error = %e, "Failed to reap helper");
                (
                    Outcome::Failed,
                    Err(RelayError::ProcessFailed {
                        code: None,
                        stderr_tail,
                    }),
                )
            }
        };

        drop(self.permit);
        self.registry.remove(&self.session_id).await;
        HELPER_EXITS.with_label_values(&[outcome.label()]).inc();
        SESSION_DURATION
            .with_label_values(&[outcome.label()])
            .observe(started.elapsed().as_secs_f64());
        SESSIONS_ACTIVE.dec();
        debug!(
            session_id = %self.session_id,
            outcome = outcome.label(),
            "Session closed"
        );

        // the stream is gone if the client already went away
        let _ = self.exit.send(result);

        outcome
    }
}

/// Stops a running child and reaps it.
///
/// With a non-zero grace the child first gets SIGTERM (Unix only) and that long
/// to exit; after that, or immediately, it is killed.
pub(crate) async fn terminate(child: &mut Child, grace: Duration) -> io::Result<ExitStatus> {
    if let Some(status) = child.try_wait()? {
        return Ok(status);
    }

    if !grace.is_zero() && send_sigterm(child) {
        if let Ok(status) = timeout(grace, child.wait()).await {
            return status;
        }
        debug!("Helper ignored SIGTERM; killing");
    }

    child.kill().await?;
    child.wait().await
}

#[cfg(unix)]
fn send_sigterm(child: &Child) -> bool {
    let Some(pid) = child.id() else {
        return false;
    };
    // SAFETY: `pid` is a child we have not reaped yet, so it cannot be recycled.
    unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) == 0 }
}

#[cfg(not(unix))]
fn send_sigterm(_child: &Child) -> bool {
    false
}

/// Logs helper stderr line by line, returning the last `keep` lines.
pub(crate) fn spawn_stderr_reader(
    session_id: String,
    stderr: ChildStderr,
    keep: usize,
) -> JoinHandle<Vec<String>> {
    tokio::spawn(async move {
        let mut lines = BufReader::new(stderr).lines();
        let mut tail = VecDeque::with_capacity(keep);

        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    debug!(session_id = %session_id, "helper: {}", line);
                    if keep > 0 {
                        if tail.len() == keep {
                            tail.pop_front();
                        }
                        tail.push_back(line);
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    debug!(session_id = %session_id, error = %e, "Stopped reading helper stderr");
                    break;
                }
            }
        }

        tail.into_iter().collect()
    })
}

async fn drain_stderr(handle: JoinHandle<Vec<String>>) -> Vec<String> {
    let abort = handle.abort_handle();
    match timeout(STDERR_DRAIN_TIMEOUT, handle).await {
        Ok(Ok(tail)) => tail,
        Ok(Err(_)) => Vec::new(),
        Err(_) => {
            // something else still holds the pipe open
            abort.abort();
            Vec::new()
        }
    }
}
