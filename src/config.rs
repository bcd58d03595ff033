//! Session configuration parsing and validation.
//!
//! Two values cross into the core from the outside:
//!
//! - [`ProcessSpec`]: the argv, environment and working directory of the
//!   agent process. How the command line is built is the caller's concern;
//!   the transport treats it as opaque.
//! - [`SessionConfig`]: buffer limits and timeouts, loadable from TOML.
//!
//! Settings that other clients pick up from process-wide environment
//! variables (such as the stream-close timeout) live here and are threaded
//! explicitly into the engine.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;

use crate::{Result, SdkError};

/// Default maximum size of a single inbound frame: 1 MiB.
pub const DEFAULT_MAX_BUFFER_SIZE: usize = 1_048_576;

/// Environment variables inherited by the agent process when
/// [`ProcessSpec::inherit_env`] is `false`.
pub const ALLOWED_ENV_VARS: &[&str] = &[
    "PATH",
    "HOME",
    "RUST_LOG",
    "USERPROFILE",
    "SystemRoot",
    "TEMP",
    "TMP",
    "USERNAME",
    "APPDATA",
    "LOCALAPPDATA",
    "COMSPEC",
];

/// Callback receiving each stderr line of the agent process.
pub type StderrCallback = Arc<dyn Fn(&str) + Send + Sync>;

/// Command line, environment and working directory of the agent process.
#[derive(Clone)]
pub struct ProcessSpec {
    /// Executable to launch.
    pub command: String,
    /// Arguments passed to the executable.
    pub args: Vec<String>,
    /// Extra environment variables set on the child.
    pub env: HashMap<String, String>,
    /// Working directory; inherits the parent's when `None`.
    pub cwd: Option<PathBuf>,
    /// Inherit the full parent environment. When `false` only
    /// [`ALLOWED_ENV_VARS`] and [`ProcessSpec::env`] reach the child.
    pub inherit_env: bool,
    /// Pipe and drain stderr instead of discarding it.
    pub capture_stderr: bool,
    /// Optional per-line stderr observer.
    pub stderr_callback: Option<StderrCallback>,
}

impl ProcessSpec {
    /// Create a spec for `command` with no arguments, inheriting the
    /// environment and capturing stderr.
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            args: Vec::new(),
            env: HashMap::new(),
            cwd: None,
            inherit_env: true,
            capture_stderr: true,
            stderr_callback: None,
        }
    }

    /// Append arguments.
    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Set one environment variable on the child.
    #[must_use]
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Set the working directory.
    #[must_use]
    pub fn cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    /// Observe stderr lines as they arrive.
    #[must_use]
    pub fn on_stderr(mut self, callback: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.stderr_callback = Some(Arc::new(callback));
        self
    }
}

impl std::fmt::Debug for ProcessSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessSpec")
            .field("command", &self.command)
            .field("args", &self.args)
            .field("env_keys", &self.env.keys().collect::<Vec<_>>())
            .field("cwd", &self.cwd)
            .field("inherit_env", &self.inherit_env)
            .field("capture_stderr", &self.capture_stderr)
            .field("stderr_callback", &self.stderr_callback.is_some())
            .finish()
    }
}

fn default_max_buffer_size() -> usize {
    DEFAULT_MAX_BUFFER_SIZE
}

fn default_message_queue_capacity() -> usize {
    100
}

fn default_initialize_timeout() -> u64 {
    60
}

fn default_control_timeout() -> u64 {
    60
}

fn default_stream_close_timeout() -> u64 {
    60
}

fn default_shutdown_grace() -> u64 {
    5000
}

fn default_stderr_tail_lines() -> usize {
    50
}

/// Buffer limits and timeouts for one session.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
pub struct SessionConfig {
    /// Maximum size of one accumulated inbound frame in bytes.
    #[serde(default = "default_max_buffer_size")]
    pub max_buffer_size: usize,
    /// Capacity of the bounded queue between the read loop and the caller.
    #[serde(default = "default_message_queue_capacity")]
    pub message_queue_capacity: usize,
    /// Handshake timeout.
    #[serde(default = "default_initialize_timeout")]
    pub initialize_timeout_seconds: u64,
    /// Default timeout for session operations such as `interrupt`.
    #[serde(default = "default_control_timeout")]
    pub control_timeout_seconds: u64,
    /// How long input streaming waits for the first result before
    /// half-closing the pipe when hooks or tool servers are registered.
    #[serde(default = "default_stream_close_timeout")]
    pub stream_close_timeout_seconds: u64,
    /// Grace period for joining background tasks and process exit on close.
    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace_millis: u64,
    /// Number of stderr lines retained for process errors.
    #[serde(default = "default_stderr_tail_lines")]
    pub stderr_tail_lines: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_buffer_size: default_max_buffer_size(),
            message_queue_capacity: default_message_queue_capacity(),
            initialize_timeout_seconds: default_initialize_timeout(),
            control_timeout_seconds: default_control_timeout(),
            stream_close_timeout_seconds: default_stream_close_timeout(),
            shutdown_grace_millis: default_shutdown_grace(),
            stderr_tail_lines: default_stderr_tail_lines(),
        }
    }
}

impl SessionConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `SdkError::Config` if the file cannot be read, contains
    /// invalid TOML, or fails validation.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| SdkError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns `SdkError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Handshake timeout as a [`Duration`].
    #[must_use]
    pub fn initialize_timeout(&self) -> Duration {
        Duration::from_secs(self.initialize_timeout_seconds)
    }

    /// Session-operation timeout as a [`Duration`].
    #[must_use]
    pub fn control_timeout(&self) -> Duration {
        Duration::from_secs(self.control_timeout_seconds)
    }

    /// Stream-close wait as a [`Duration`].
    #[must_use]
    pub fn stream_close_timeout(&self) -> Duration {
        Duration::from_secs(self.stream_close_timeout_seconds)
    }

    /// Shutdown grace period as a [`Duration`].
    #[must_use]
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_millis)
    }

    /// Check value ranges.
    ///
    /// # Errors
    ///
    /// Returns `SdkError::Config` naming the first invalid field.
    pub fn validate(&self) -> Result<()> {
        if self.max_buffer_size == 0 {
            return Err(SdkError::Config(
                "max_buffer_size must be greater than zero".into(),
            ));
        }
        if self.message_queue_capacity == 0 {
            return Err(SdkError::Config(
                "message_queue_capacity must be greater than zero".into(),
            ));
        }
        if self.initialize_timeout_seconds == 0 || self.control_timeout_seconds == 0 {
            return Err(SdkError::Config(
                "control request timeouts must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}
