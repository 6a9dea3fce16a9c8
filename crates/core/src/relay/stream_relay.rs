//! Session lifecycle: admission, spawn, supervision.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, OwnedSemaphorePermit, Semaphore, TryAcquireError};
use tokio::time::{sleep, timeout, Instant};
use tracing::{error, info, warn};
use uuid::Uuid;

use super::command::HelperCommand;
use super::error::RelayError;
use super::registry::{NewSession, SessionInfo, SessionRegistry, SessionStats};
use super::stream::RelayStream;
use super::supervisor::{spawn_stderr_reader, Supervisor};
use crate::config::{HelperConfig, RelayConfig, MAX_CONCURRENT_STREAMS};
use crate::metrics::{SESSIONS_ACTIVE, SESSIONS_STARTED, START_FAILURES};

/// Poll interval while waiting for sessions to drain on shutdown.
const DRAIN_POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Launches one helper per stream request and owns its lifetime.
pub struct StreamRelay {
    command: HelperCommand,
    config: RelayConfig,
    permits: Arc<Semaphore>,
    registry: SessionRegistry,
}

impl StreamRelay {
    pub fn new(helper: HelperConfig, mut config: RelayConfig) -> Self {
        config.max_concurrent_streams = config.max_concurrent_streams.min(MAX_CONCURRENT_STREAMS);
        let permits = Arc::new(Semaphore::new(config.max_concurrent_streams));
        Self {
            command: HelperCommand::new(helper),
            config,
            permits,
            registry: SessionRegistry::new(),
        }
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    pub fn max_concurrent_streams(&self) -> usize {
        self.config.max_concurrent_streams
    }

    /// Whether `shutdown` has been called.
    pub fn is_shutting_down(&self) -> bool {
        self.permits.is_closed()
    }

    /// Slots not currently held by a live helper.
    pub fn available_slots(&self) -> usize {
        self.permits.available_permits()
    }

    /// Starts a helper for `magnet` and returns its stdout as a stream.
    ///
    /// Returns once the process has been spawned; it does not wait for output.
    pub async fn start_session(
        &self,
        magnet: &str,
        file_index: usize,
    ) -> Result<RelayStream, RelayError> {
        let permit = self.acquire_permit().await.inspect_err(|e| {
            warn!(
                limit = self.config.max_concurrent_streams,
                "Rejecting stream request: {}", e
            );
            START_FAILURES.with_label_values(&[e.reason()]).inc();
        })?;

        let session_id = Uuid::new_v4().to_string();
        let mut child = self.command.spawn(magnet, file_index).inspect_err(|e| {
            error!(session_id = %session_id, error = %e, "Failed to start streaming helper");
            START_FAILURES.with_label_values(&[e.reason()]).inc();
        })?;

        let Some(stdout) = child.stdout.take() else {
            // dropping the child kills it
            let err = RelayError::StdoutNotCaptured;
            START_FAILURES.with_label_values(&[err.reason()]).inc();
            return Err(err);
        };
        let stderr = child.stderr.take().map(|stderr| {
            spawn_stderr_reader(session_id.clone(), stderr, self.config.stderr_tail_lines)
        });

        let pid = child.id();
        let stats = Arc::new(SessionStats::default());
        let (release_tx, release_rx) = oneshot::channel();
        let (cancel_tx, cancel_rx) = oneshot::channel();
        let (exit_tx, exit_rx) = oneshot::channel();

        self.registry
            .insert(NewSession {
                id: session_id.clone(),
                magnet: magnet.to_string(),
                file_index,
                pid,
                stats: Arc::clone(&stats),
                cancel: cancel_tx,
            })
            .await;
        SESSIONS_STARTED.inc();
        SESSIONS_ACTIVE.inc();

        info!(
            session_id = %session_id,
            pid = ?pid,
            file_index,
            magnet,
            "Started streaming helper"
        );

        tokio::spawn(
            Supervisor {
                session_id: session_id.clone(),
                child,
                stderr,
                released: release_rx,
                cancelled: cancel_rx,
                exit: exit_tx,
                registry: self.registry.clone(),
                grace: self.config.termination_grace(),
                permit,
            }
            .run(),
        );

        let stream = RelayStream::new(
            session_id,
            stdout,
            self.config.chunk_size,
            stats,
            release_tx,
            exit_rx,
        );

        // shutdown closed admission after this permit was taken and may have
        // missed the registry entry; dropping the stream stops the helper
        if self.permits.is_closed() {
            return Err(RelayError::ShuttingDown);
        }
        Ok(stream)
    }

    async fn acquire_permit(&self) -> Result<OwnedSemaphorePermit, RelayError> {
        let wait = self.config.admission_timeout();
        let permit = if wait.is_zero() {
            match Arc::clone(&self.permits).try_acquire_owned() {
                Ok(permit) => Some(permit),
                Err(TryAcquireError::Closed) => return Err(RelayError::ShuttingDown),
                Err(TryAcquireError::NoPermits) => None,
            }
        } else {
            match timeout(wait, Arc::clone(&self.permits).acquire_owned()).await {
                Ok(Ok(permit)) => Some(permit),
                Ok(Err(_)) => return Err(RelayError::ShuttingDown),
                Err(_) => None,
            }
        };

        permit.ok_or(RelayError::AtCapacity {
            limit: self.config.max_concurrent_streams,
        })
    }

    /// Terminates a live session's helper. Its stream then ends early.
    pub async fn cancel_session(&self, id: &str) -> Result<(), RelayError> {
        self.registry.cancel(id).await
    }

    pub async fn sessions(&self) -> Vec<SessionInfo> {
        self.registry.list().await
    }

    pub async fn active_sessions(&self) -> usize {
        self.registry.len().await
    }

    /// Waits up to `wait` for every registered session to be reaped.
    /// Returns the number still registered.
    pub async fn wait_for_drain(&self, wait: Duration) -> usize {
        let deadline = Instant::now() + wait;
        loop {
            let remaining = self.registry.len().await;
            if remaining == 0 || Instant::now() >= deadline {
                return remaining;
            }
            sleep(DRAIN_POLL_INTERVAL).await;
        }
    }

    /// Stops admitting sessions, cancels every live one and waits up to `wait`
    /// for their helpers to be reaped. Returns the number of sessions still
    /// registered afterwards.
    pub async fn shutdown(&self, wait: Duration) -> usize {
        self.permits.close();
        let signalled = self.registry.cancel_all().await;
        if signalled > 0 {
            info!(sessions = signalled, "Terminating active streams");
        }

        let remaining = self.wait_for_drain(wait).await;
        if remaining > 0 {
            warn!(sessions = remaining, "Streams still running at shutdown");
        }
        remaining
    }
}
