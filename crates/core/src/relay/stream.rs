//! Byte stream over a helper's stdout pipe.

use bytes::Bytes;
use futures::Stream;
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{ready, Context, Poll};
use tokio::io::{AsyncRead, ReadBuf};
use tokio::process::ChildStdout;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use super::error::RelayError;
use super::registry::SessionStats;
use super::supervisor::Release;
use crate::metrics::BYTES_RELAYED;

/// Forward-only stream of the chunks a helper writes to stdout.
///
/// Each item is exactly what one pipe read returned. At EOF the stream waits
/// for the helper to be reaped: it ends cleanly if the helper succeeded and
/// yields one final error if the helper failed or the session was cancelled,
/// so an HTTP body built from it is aborted instead of completed.
///
/// Dropping it before EOF tells the session supervisor to terminate and reap
/// the helper.
pub struct RelayStream {
    session_id: String,
    stdout: Option<ChildStdout>,
    buf: Vec<u8>,
    stats: Arc<SessionStats>,
    release: Option<oneshot::Sender<Release>>,
    exit: Option<oneshot::Receiver<Result<(), RelayError>>>,
}

impl RelayStream {
    pub(crate) fn new(
        session_id: String,
        stdout: ChildStdout,
        chunk_size: usize,
        stats: Arc<SessionStats>,
        release: oneshot::Sender<Release>,
        exit: oneshot::Receiver<Result<(), RelayError>>,
    ) -> Self {
        Self {
            session_id,
            stdout: Some(stdout),
            buf: vec![0; chunk_size],
            stats,
            release: Some(release),
            exit: Some(exit),
        }
    }

    /// Id of the session this stream belongs to.
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Bytes yielded so far.
    pub fn bytes_relayed(&self) -> u64 {
        self.stats.bytes_relayed()
    }

    fn poll_stdout(&mut self, cx: &mut Context<'_>) -> Poll<Option<io::Result<Bytes>>> {
        let Some(stdout) = self.stdout.as_mut() else {
            return Poll::Ready(None);
        };

        let mut read_buf = ReadBuf::new(&mut self.buf[..]);
        match ready!(Pin::new(stdout).poll_read(cx, &mut read_buf)) {
            Ok(()) => {
                let filled = read_buf.filled();
                if filled.is_empty() {
                    debug!(
                        session_id = %self.session_id,
                        bytes = self.stats.bytes_relayed(),
                        "Helper closed stdout"
                    );
                    self.stdout = None;
                    if let Some(tx) = self.release.take() {
                        let _ = tx.send(Release::Finished);
                    }
                    return Poll::Ready(None);
                }

                let chunk = Bytes::copy_from_slice(filled);
                if self.stats.record_chunk(chunk.len()) {
                    info!(session_id = %self.session_id, "First bytes received from helper");
                }
                BYTES_RELAYED.inc_by(chunk.len() as u64);
                Poll::Ready(Some(Ok(chunk)))
            }
            Err(e) => {
                warn!(session_id = %self.session_id, error = %e, "Failed reading helper stdout");
                self.stdout = None;
                self.exit = None;
                Poll::Ready(Some(Err(e)))
            }
        }
    }

    fn poll_exit(&mut self, cx: &mut Context<'_>) -> Poll<Option<io::Result<Bytes>>> {
        let Some(exit) = self.exit.as_mut() else {
            return Poll::Ready(None);
        };

        let result = ready!(Pin::new(exit).poll(cx));
        self.exit = None;
        match result {
            Ok(Ok(())) => Poll::Ready(None),
            Ok(Err(e)) => {
                debug!(session_id = %self.session_id, error = %e, "Truncating stream");
                Poll::Ready(Some(Err(io::Error::other(e))))
            }
            Err(_) => Poll::Ready(Some(Err(io::Error::other(
                "helper supervisor stopped without a result",
            )))),
        }
    }
}

impl Stream for RelayStream {
    type Item = io::Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.stdout.is_some() {
            if let Some(item) = ready!(this.poll_stdout(cx)) {
                return Poll::Ready(Some(item));
            }
        }
        this.poll_exit(cx)
    }
}

impl Drop for RelayStream {
    fn drop(&mut self) {
        if let Some(tx) = self.release.take() {
            debug!(
                session_id = %self.session_id,
                bytes = self.stats.bytes_relayed(),
                "Stream dropped before helper finished"
            );
            let _ = tx.send(Release::Dropped);
        }
    }
}
