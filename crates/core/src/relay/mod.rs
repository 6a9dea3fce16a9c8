//! Relay module for streaming a torrent helper's stdout to HTTP clients.
//!
//! Each session spawns one external helper process (by default `webtorrent`)
//! as `<helper> <magnet> --select <index> --stdout` and exposes its stdout as a
//! [`RelayStream`]. A supervisor task owns the child for the whole session and
//! guarantees it is terminated and reaped no matter how the session ends:
//!
//! - the helper exits on its own (success or failure)
//! - the stream is dropped (response finished or client disconnected)
//! - the session is cancelled through the [`SessionRegistry`]
//! - the relay shuts down
//!
//! The stream ends cleanly only when the helper succeeded. A helper that
//! exits non-zero, or a session that is cancelled, ends the stream with an
//! error after the bytes already relayed.
//!
//! Helper stderr is logged line by line and its tail is reported when the
//! helper exits unsuccessfully.
//!
//! # Example
//!
//! ```ignore
//! use futures::StreamExt;
//! use magnetstream_core::{HelperConfig, RelayConfig, StreamRelay};
//!
//! let relay = StreamRelay::new(HelperConfig::default(), RelayConfig::default());
//! let mut stream = relay.start_session("magnet:?xt=urn:btih:...", 0).await?;
//! while let Some(chunk) = stream.next().await {
//!     let chunk = chunk?;
//!     // forward chunk
//! }
//! ```

mod command;
mod error;
mod registry;
mod stream;
mod stream_relay;
mod supervisor;

pub use command::{HelperCommand, DEFAULT_FILE_INDEX};
pub use error::RelayError;
pub use registry::{SessionInfo, SessionRegistry, SessionState, SessionStats};
pub use stream::RelayStream;
pub use stream_relay::StreamRelay;
