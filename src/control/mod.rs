//! Bidirectional control protocol over the transport.
//!
//! - `protocol`: wire envelopes and outbound request payloads.
//! - `pending`: correlation of outbound requests and their responses.
//! - `hooks`: callback id assignment for the handshake.
//! - `dispatch`: handlers for requests initiated by the agent process.
//! - `mcp`: JSON-RPC routing to in-process tool servers.
//! - `query`: the engine tying it together.

pub(crate) mod dispatch;
pub mod hooks;
pub mod mcp;
pub mod pending;
pub mod protocol;
pub mod query;

use std::fmt::{Display, Formatter};

pub use protocol::SdkControlRequest;
pub use query::{FrameQueue, Query, QueryOptions};

/// Engine lifecycle. Transitions only move forward; `Closing` and
/// `Closed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SessionState {
    /// Constructed; nothing running.
    Created,
    /// Read loop running; handshake not yet answered.
    Started,
    /// Handshake answered.
    Initialized,
    /// Control requests have been exchanged after the handshake.
    Streaming,
    /// Close in progress.
    Closing,
    /// Fully closed.
    Closed,
}

impl SessionState {
    pub(crate) fn as_u8(self) -> u8 {
        match self {
            Self::Created => 0,
            Self::Started => 1,
            Self::Initialized => 2,
            Self::Streaming => 3,
            Self::Closing => 4,
            Self::Closed => 5,
        }
    }

    pub(crate) fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::Created,
            1 => Self::Started,
            2 => Self::Initialized,
            3 => Self::Streaming,
            4 => Self::Closing,
            _ => Self::Closed,
        }
    }

    /// Lowercase state name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Started => "started",
            Self::Initialized => "initialized",
            Self::Streaming => "streaming",
            Self::Closing => "closing",
            Self::Closed => "closed",
        }
    }
}

impl Display for SessionState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
