//! Testing utilities for exercising the relay against real processes.
//!
//! # Example
//!
//! ```rust,ignore
//! use magnetstream_core::testing::FakeHelper;
//!
//! let dir = tempfile::TempDir::new()?;
//! let helper = FakeHelper::emitting(dir.path(), "webtorrent", b"hello-video-bytes")?;
//! let relay = StreamRelay::new(helper.helper_config(), RelayConfig::default());
//! ```

#[cfg(unix)]
mod fake_helper;

#[cfg(unix)]
pub use fake_helper::FakeHelper;

use std::time::{Duration, Instant};

/// Polls `check` every 20ms until it holds or `timeout` passes.
pub async fn wait_until(timeout: Duration, mut check: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if check() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

/// Whether a process with this pid exists.
#[cfg(unix)]
pub fn process_alive(pid: u32) -> bool {
    // SAFETY: signal 0 only checks for existence and permission.
    unsafe { libc::kill(pid as libc::pid_t, 0) == 0 }
}
