//! Error types shared across the crate.

use std::fmt::{Display, Formatter};

/// Shared crate result type.
pub type Result<T> = std::result::Result<T, SdkError>;

/// Error enumeration covering every failure mode of a session.
///
/// The type is `Clone` so a single read-loop failure can be delivered both
/// to every pending control request and to the output message stream.
#[derive(Debug, Clone, PartialEq)]
pub enum SdkError {
    /// Spawn failure, broken pipe, or a write to a closed input stream.
    Connection(String),
    /// A single accumulated frame exceeded the configured maximum size.
    Overflow {
        /// Configured maximum frame size in bytes.
        limit: usize,
    },
    /// Malformed JSON or a payload that violates the message schema.
    Decode {
        /// Human-readable description naming the offending field or value.
        message: String,
        /// The original raw payload, kept for diagnostics.
        raw: String,
    },
    /// The agent process exited with a nonzero status.
    Process {
        /// Exit code, or `None` when the process was killed by a signal.
        exit_code: Option<i32>,
        /// Tail of the captured stderr output.
        stderr: String,
    },
    /// An outbound control request received no response in time.
    Timeout {
        /// Subtype of the request that timed out.
        subtype: String,
    },
    /// An inbound control-request handler failed.
    Dispatch(String),
    /// The agent process answered a control request with an error.
    Control(String),
    /// The session closed while the operation was still pending.
    Cancelled(String),
    /// The operation is not permitted in the current session state.
    InvalidState(String),
    /// Configuration parsing or validation failure.
    Config(String),
    /// File-system or I/O operation failure.
    Io(String),
}

impl SdkError {
    /// Build a decode error that carries the raw payload.
    pub fn decode(message: impl Into<String>, raw: impl Into<String>) -> Self {
        Self::Decode {
            message: message.into(),
            raw: raw.into(),
        }
    }

    /// Whether this error ends the read side of a session.
    ///
    /// Decode errors are confined to one frame; everything else coming out
    /// of the transport is terminal.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::Decode { .. })
    }
}

impl Display for SdkError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Connection(msg) => write!(f, "connection: {msg}"),
            Self::Overflow { limit } => {
                write!(f, "overflow: frame exceeded maximum buffer size of {limit} bytes")
            }
            Self::Decode { message, .. } => write!(f, "decode: {message}"),
            Self::Process { exit_code, stderr } => {
                match exit_code {
                    Some(code) => write!(f, "process: exited with code {code}")?,
                    None => write!(f, "process: terminated by signal")?,
                }
                if stderr.is_empty() {
                    Ok(())
                } else {
                    write!(f, "; stderr: {stderr}")
                }
            }
            Self::Timeout { subtype } => {
                write!(f, "timeout: control request '{subtype}' received no response")
            }
            Self::Dispatch(msg) => write!(f, "dispatch: {msg}"),
            Self::Control(msg) => write!(f, "control: {msg}"),
            Self::Cancelled(msg) => write!(f, "cancelled: {msg}"),
            Self::InvalidState(msg) => write!(f, "invalid state: {msg}"),
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
        }
    }
}

impl std::error::Error for SdkError {}

impl From<std::io::Error> for SdkError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::BrokenPipe
            | std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::NotConnected => Self::Connection(err.to_string()),
            _ => Self::Io(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for SdkError {
    fn from(err: serde_json::Error) -> Self {
        Self::decode(err.to_string(), String::new())
    }
}

impl From<toml::de::Error> for SdkError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}
