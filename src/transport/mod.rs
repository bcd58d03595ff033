//! Process transport: framed newline-delimited JSON over a subprocess's
//! stdio.
//!
//! - `codec`: [`LinesCodec`](tokio_util::codec::LinesCodec)-based framing that
//!   accumulates lines into complete JSON values.
//! - `process`: spawning, the shared write lock, half-close and shutdown.
//!
//! The control engine only sees the [`Transport`] trait, so any duplex
//! source of JSON frames can stand in for a real process.

pub mod codec;
pub mod process;

use std::future::Future;
use std::pin::Pin;

use futures_util::stream::BoxStream;
use serde_json::Value;

use crate::Result;

pub use codec::JsonFrameCodec;
pub use process::ProcessTransport;

/// Forward-only sequence of decoded inbound frames.
pub type FrameStream = BoxStream<'static, Result<Value>>;

/// Duplex frame channel to the agent process.
pub trait Transport: Send + Sync {
    /// Write one frame; a trailing newline is appended.
    ///
    /// Implementations serialize concurrent callers so frames never
    /// interleave.
    ///
    /// # Errors
    ///
    /// Returns `SdkError::Connection` when the input side is closed.
    fn write<'a>(&'a self, frame: &'a str) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;

    /// Hand out the inbound frame stream. Callable once.
    ///
    /// # Errors
    ///
    /// Returns `SdkError::InvalidState` when the stream was already taken
    /// or the transport is not connected.
    fn read_messages(&self) -> Result<FrameStream>;

    /// Half-close the input side; idempotent.
    fn end_input(&self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    /// Close everything, terminating the process if needed; idempotent.
    fn close(&self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    /// Whether frames can currently be written.
    fn is_ready(&self) -> bool;
}
