//! High-level session over one agent process.
//!
//! [`Session::connect`] spawns the process, starts the read loop and
//! performs the handshake. Messages come back as typed [`Message`]s;
//! control frames never reach the caller.

use std::sync::Arc;

use futures_util::stream::BoxStream;
use futures_util::{Stream, StreamExt};
use serde_json::{json, Value};
use tokio::sync::{Mutex, MutexGuard};
use tracing::warn;

use crate::config::{ProcessSpec, SessionConfig};
use crate::control::{Query, QueryOptions, SessionState};
use crate::decode::parse_message;
use crate::models::message::Message;
use crate::models::permission::PermissionMode;
use crate::transport::{ProcessTransport, Transport};
use crate::Result;

/// Decoded messages in arrival order.
pub type MessageStream = BoxStream<'static, Result<Message>>;

/// A connected agent session.
pub struct Session {
    query: Query,
    messages: Mutex<Option<MessageStream>>,
}

impl Session {
    /// Spawn the agent described by `spec` and complete the handshake.
    ///
    /// # Errors
    ///
    /// Returns `SdkError::Config` for an invalid `config`,
    /// `SdkError::Connection` when the process cannot be started, and any
    /// handshake error. The process is shut down before an error is
    /// returned.
    pub async fn connect(spec: ProcessSpec, config: SessionConfig, options: QueryOptions) -> Result<Self> {
        config.validate()?;
        let transport = ProcessTransport::new(spec, &config);
        if let Err(e) = transport.connect().await {
            let _ = transport.close().await;
            return Err(e);
        }
        Self::with_transport(Arc::new(transport), &config, options).await
    }

    /// Run a session over an already connected `transport`.
    ///
    /// # Errors
    ///
    /// Returns `SdkError::Config` for an invalid `config` without touching
    /// the transport, and the start or handshake error after closing the
    /// transport.
    pub async fn with_transport(
        transport: Arc<dyn Transport>,
        config: &SessionConfig,
        options: QueryOptions,
    ) -> Result<Self> {
        config.validate()?;
        let query = Query::new(transport, options, config);
        let started = match query.start().await {
            Ok(()) => query.initialize().await.map(drop),
            Err(e) => Err(e),
        };
        if let Err(e) = started {
            warn!(error = %e, "session setup failed");
            if let Err(close_err) = query.close().await {
                warn!(error = %close_err, "failed to close transport after setup failure");
            }
            return Err(e);
        }
        Ok(Self {
            query,
            messages: Mutex::new(None),
        })
    }

    /// The underlying engine.
    #[must_use]
    pub fn query(&self) -> &Query {
        &self.query
    }

    /// Lifecycle state of the engine.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.query.state()
    }

    /// Handshake response reported by the process, `None` in one-shot mode.
    #[must_use]
    pub fn server_info(&self) -> Option<Value> {
        self.query.initialization_result()
    }

    /// Send one user prompt.
    ///
    /// # Errors
    ///
    /// Returns the transport's write error.
    pub async fn send_user_message(&self, prompt: &str, session_id: &str) -> Result<()> {
        let frame = json!({
            "type": "user",
            "message": { "role": "user", "content": prompt },
            "parent_tool_use_id": null,
            "session_id": session_id,
        });
        self.query.write_frame(&frame).await
    }

    /// Write every frame of `input`, then half-close the input side.
    pub async fn stream_input<S>(&self, input: S)
    where
        S: Stream<Item = Value> + Send,
    {
        self.query.stream_input(input).await;
    }

    /// Every subsequent message until the process closes its output.
    ///
    /// The stream shares one cursor with [`Session::receive_response`];
    /// holding it blocks other readers.
    ///
    /// # Errors
    ///
    /// Returns `SdkError::InvalidState` when the engine's queue is not
    /// available.
    pub async fn messages(&self) -> Result<BoxStream<'_, Result<Message>>> {
        let guard = self.message_stream().await?;
        let stream = futures_util::stream::unfold(guard, |mut guard| async move {
            let item = guard.as_mut()?.next().await?;
            Some((item, guard))
        });
        Ok(stream.boxed())
    }

    /// Messages up to and including the next `result` message. A fatal
    /// error also ends the stream.
    ///
    /// # Errors
    ///
    /// Returns `SdkError::InvalidState` when the engine's queue is not
    /// available.
    pub async fn receive_response(&self) -> Result<BoxStream<'_, Result<Message>>> {
        let guard = self.message_stream().await?;
        let stream = futures_util::stream::unfold(Some(guard), |guard| async move {
            let mut guard = guard?;
            let item = guard.as_mut()?.next().await?;
            let done = match &item {
                Ok(message) => message.is_result(),
                Err(e) => e.is_fatal(),
            };
            Some((item, if done { None } else { Some(guard) }))
        });
        Ok(stream.boxed())
    }

    /// Stop the current turn.
    ///
    /// # Errors
    ///
    /// See [`Query::send_control_request`].
    pub async fn interrupt(&self) -> Result<()> {
        self.query.interrupt().await
    }

    /// Change the permission mode.
    ///
    /// # Errors
    ///
    /// See [`Query::send_control_request`].
    pub async fn set_permission_mode(&self, mode: PermissionMode) -> Result<()> {
        self.query.set_permission_mode(mode).await
    }

    /// Change the model; `None` restores the default.
    ///
    /// # Errors
    ///
    /// See [`Query::send_control_request`].
    pub async fn set_model(&self, model: Option<&str>) -> Result<()> {
        self.query.set_model(model).await
    }

    /// Restore tracked files to their state at `user_message_id`.
    ///
    /// # Errors
    ///
    /// See [`Query::send_control_request`].
    pub async fn rewind_files(&self, user_message_id: &str) -> Result<()> {
        self.query.rewind_files(user_message_id).await
    }

    /// Status of the process's tool-server connections.
    ///
    /// # Errors
    ///
    /// See [`Query::send_control_request`].
    pub async fn get_status(&self) -> Result<Value> {
        self.query.get_status().await
    }

    /// Close the session and the agent process. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns the transport's close error.
    pub async fn close(&self) -> Result<()> {
        self.query.close().await
    }

    async fn message_stream(&self) -> Result<MutexGuard<'_, Option<MessageStream>>> {
        let mut guard = self.messages.lock().await;
        if guard.is_none() {
            let frames = self.query.receive_messages()?;
            *guard = Some(
                frames
                    .map(|item| item.and_then(|frame| parse_message(&frame)))
                    .boxed(),
            );
        }
        Ok(guard)
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if !matches!(self.state(), SessionState::Closed) {
            self.query.abandon();
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("query", &self.query)
            .finish_non_exhaustive()
    }
}
