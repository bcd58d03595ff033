//! Control-protocol engine.
//!
//! One background read loop classifies inbound frames:
//!
//! - `control_response` resolves a pending outbound request;
//! - `control_request` is handled on its own tracked task;
//! - `control_cancel_request` is logged and dropped;
//! - anything else goes to the bounded message queue.
//!
//! Outbound control requests go through [`Query::send_control_request`],
//! which correlates the response by id and bounds the wait.

use std::collections::BTreeMap;
use std::future::Future;
use std::pin::pin;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use futures_util::stream::BoxStream;
use futures_util::{Stream, StreamExt};
use serde_json::Value;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use super::dispatch::Dispatcher;
use super::hooks::HookRegistry;
use super::mcp::ToolServers;
use super::pending::PendingRequests;
use super::protocol::{
    parse_response, request_envelope, SdkControlRequest, CONTROL_CANCEL_REQUEST, CONTROL_REQUEST,
    CONTROL_RESPONSE,
};
use super::SessionState;
use crate::config::SessionConfig;
use crate::models::hook::{HookEvent, HookMatcher};
use crate::models::permission::{CanUseTool, PermissionMode, PermissionResult, ToolPermissionContext};
use crate::models::tool_server::ToolServer;
use crate::transport::{FrameStream, Transport};
use crate::{Result, SdkError};

/// Raw non-control frames in arrival order; errors are terminal except for
/// per-frame decode failures.
pub type FrameQueue = BoxStream<'static, Result<Value>>;

// ── Options ─────────────────────────────────────────────────────────────

/// Caller-supplied behavior of a session.
#[derive(Clone)]
pub struct QueryOptions {
    /// Hook callbacks per event.
    pub hooks: BTreeMap<HookEvent, Vec<HookMatcher>>,
    /// Permission callback for `can_use_tool` requests.
    pub can_use_tool: Option<CanUseTool>,
    /// In-process tool servers keyed by name.
    pub tool_servers: ToolServers,
    /// Bidirectional mode; when `false` no handshake is performed and
    /// control requests are rejected.
    pub streaming: bool,
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self {
            hooks: BTreeMap::new(),
            can_use_tool: None,
            tool_servers: ToolServers::new(),
            streaming: true,
        }
    }
}

impl QueryOptions {
    /// Empty streaming options.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `matcher` for `event`.
    #[must_use]
    pub fn hook(mut self, event: HookEvent, matcher: HookMatcher) -> Self {
        self.hooks.entry(event).or_default().push(matcher);
        self
    }

    /// Set the permission callback.
    #[must_use]
    pub fn can_use_tool<F, Fut>(mut self, callback: F) -> Self
    where
        F: Fn(String, Value, ToolPermissionContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<PermissionResult>> + Send + 'static,
    {
        self.can_use_tool = Some(crate::models::permission::can_use_tool_fn(callback));
        self
    }

    /// Register an in-process tool server under its own name.
    #[must_use]
    pub fn tool_server(mut self, server: impl ToolServer + 'static) -> Self {
        let server: Arc<dyn ToolServer> = Arc::new(server);
        self.tool_servers.insert(server.name().to_owned(), server);
        self
    }

    /// Select streaming or one-shot mode.
    #[must_use]
    pub fn streaming(mut self, streaming: bool) -> Self {
        self.streaming = streaming;
        self
    }
}

impl std::fmt::Debug for QueryOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut servers: Vec<_> = self.tool_servers.keys().collect();
        servers.sort();
        f.debug_struct("QueryOptions")
            .field("hooks", &self.hooks)
            .field("can_use_tool", &self.can_use_tool.is_some())
            .field("tool_servers", &servers)
            .field("streaming", &self.streaming)
            .finish()
    }
}

// ── Engine ──────────────────────────────────────────────────────────────

/// Handle to the control-protocol engine of one session. Clones share the
/// same engine.
#[derive(Clone)]
pub struct Query {
    inner: Arc<QueryInner>,
}

struct QueryInner {
    transport: Arc<dyn Transport>,
    dispatcher: Dispatcher,
    pending: PendingRequests,
    state: AtomicU8,
    closed: AtomicBool,
    streaming: bool,
    control_timeout: Duration,
    initialize_timeout: Duration,
    stream_close_timeout: Duration,
    shutdown_grace: Duration,
    queue_capacity: usize,
    init_lock: Mutex<()>,
    init_result: OnceLock<Value>,
    /// Why the inbound side stopped; set once, before pending requests are
    /// failed.
    ended: OnceLock<SdkError>,
    first_result: watch::Sender<bool>,
    cancel: CancellationToken,
    tracker: TaskTracker,
    read_task: Mutex<Option<JoinHandle<()>>>,
    queue: std::sync::Mutex<Option<mpsc::Receiver<Result<Value>>>>,
}

impl Query {
    /// Create an engine over `transport`. Nothing runs until
    /// [`Query::start`].
    #[must_use]
    pub fn new(transport: Arc<dyn Transport>, options: QueryOptions, config: &SessionConfig) -> Self {
        let hooks = HookRegistry::build(&options.hooks);
        let (first_result, _) = watch::channel(false);
        Self {
            inner: Arc::new(QueryInner {
                transport,
                dispatcher: Dispatcher::new(hooks, options.can_use_tool, options.tool_servers),
                pending: PendingRequests::new(),
                state: AtomicU8::new(SessionState::Created.as_u8()),
                closed: AtomicBool::new(false),
                streaming: options.streaming,
                control_timeout: config.control_timeout(),
                initialize_timeout: config.initialize_timeout(),
                stream_close_timeout: config.stream_close_timeout(),
                shutdown_grace: config.shutdown_grace(),
                queue_capacity: config.message_queue_capacity,
                init_lock: Mutex::new(()),
                init_result: OnceLock::new(),
                ended: OnceLock::new(),
                first_result,
                cancel: CancellationToken::new(),
                tracker: TaskTracker::new(),
                read_task: Mutex::new(None),
                queue: std::sync::Mutex::new(None),
            }),
        }
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        SessionState::from_u8(self.inner.state.load(Ordering::SeqCst))
    }

    /// Whether the engine runs in bidirectional mode.
    #[must_use]
    pub fn is_streaming(&self) -> bool {
        self.inner.streaming
    }

    /// Cached handshake response, once [`Query::initialize`] succeeded.
    #[must_use]
    pub fn initialization_result(&self) -> Option<Value> {
        self.inner.init_result.get().cloned()
    }

    /// Number of outbound requests awaiting a response.
    pub async fn pending_requests(&self) -> usize {
        self.inner.pending.len().await
    }

    /// Start the read loop. A second call is a no-op.
    ///
    /// # Errors
    ///
    /// Returns `SdkError::InvalidState` after close, or the transport's
    /// error when its frame stream cannot be taken.
    pub async fn start(&self) -> Result<()> {
        match self.inner.advance(SessionState::Created, SessionState::Started) {
            Ok(()) => {}
            Err(SessionState::Closing | SessionState::Closed) => {
                return Err(SdkError::InvalidState("session is closed".into()));
            }
            Err(_) => return Ok(()),
        }

        let frames = self.inner.transport.read_messages()?;
        let (tx, rx) = mpsc::channel(self.inner.queue_capacity.max(1));
        if let Ok(mut slot) = self.inner.queue.lock() {
            *slot = Some(rx);
        }

        let inner = Arc::clone(&self.inner);
        let handle = tokio::spawn(async move { inner.read_loop(frames, tx).await });
        *self.inner.read_task.lock().await = Some(handle);
        debug!(streaming = self.inner.streaming, "control read loop started");
        Ok(())
    }

    /// Perform the handshake and cache its response.
    ///
    /// Returns `None` in one-shot mode, where no handshake happens. Repeat
    /// calls return the cached response.
    ///
    /// # Errors
    ///
    /// Returns `SdkError::InvalidState` before [`Query::start`] or after
    /// close, `SdkError::Timeout` when the process does not answer, and
    /// `SdkError::Control` when it answers with an error.
    pub async fn initialize(&self) -> Result<Option<Value>> {
        if !self.inner.streaming {
            return Ok(None);
        }
        let _guard = self.inner.init_lock.lock().await;
        match self.state() {
            SessionState::Started => {}
            SessionState::Initialized | SessionState::Streaming => {
                return Ok(self.initialization_result());
            }
            other => {
                return Err(SdkError::InvalidState(format!(
                    "cannot initialize in state {other}"
                )));
            }
        }

        let hooks = self.inner.dispatcher.hooks().initialize_config();
        let response = self
            .inner
            .request(SdkControlRequest::Initialize { hooks }, self.inner.initialize_timeout)
            .await?;

        let _ = self.inner.init_result.set(response.clone());
        // A concurrent close wins; the handshake result stays cached.
        let _ = self
            .inner
            .advance(SessionState::Started, SessionState::Initialized);
        info!(
            hook_callbacks = self.inner.dispatcher.hooks().len(),
            "control handshake complete"
        );
        Ok(Some(response))
    }

    /// Send a control request and wait for its response payload.
    ///
    /// `timeout` defaults to the configured control timeout.
    ///
    /// # Errors
    ///
    /// - `SdkError::InvalidState` unless the handshake completed.
    /// - `SdkError::Timeout` when no response arrives in time.
    /// - `SdkError::Control` when the process answers with an error.
    /// - `SdkError::Cancelled` when the session closes first.
    pub async fn send_control_request(
        &self,
        request: SdkControlRequest,
        timeout: Option<Duration>,
    ) -> Result<Value> {
        match self.state() {
            SessionState::Initialized => {
                let _ = self
                    .inner
                    .advance(SessionState::Initialized, SessionState::Streaming);
            }
            SessionState::Streaming => {}
            other => {
                return Err(SdkError::InvalidState(format!(
                    "cannot send '{}' control request in state {other}",
                    request.subtype()
                )));
            }
        }
        self.inner
            .request(request, timeout.unwrap_or(self.inner.control_timeout))
            .await
    }

    /// Stop the current turn.
    ///
    /// # Errors
    ///
    /// See [`Query::send_control_request`].
    pub async fn interrupt(&self) -> Result<()> {
        self.send_control_request(SdkControlRequest::Interrupt, None)
            .await
            .map(drop)
    }

    /// Change the permission mode.
    ///
    /// # Errors
    ///
    /// See [`Query::send_control_request`].
    pub async fn set_permission_mode(&self, mode: PermissionMode) -> Result<()> {
        self.send_control_request(SdkControlRequest::SetPermissionMode { mode }, None)
            .await
            .map(drop)
    }

    /// Change the model; `None` restores the default.
    ///
    /// # Errors
    ///
    /// See [`Query::send_control_request`].
    pub async fn set_model(&self, model: Option<&str>) -> Result<()> {
        let model = model.map(str::to_owned);
        self.send_control_request(SdkControlRequest::SetModel { model }, None)
            .await
            .map(drop)
    }

    /// Restore tracked files to their state at `user_message_id`.
    ///
    /// # Errors
    ///
    /// See [`Query::send_control_request`].
    pub async fn rewind_files(&self, user_message_id: &str) -> Result<()> {
        let user_message_id = user_message_id.to_owned();
        self.send_control_request(SdkControlRequest::RewindFiles { user_message_id }, None)
            .await
            .map(drop)
    }

    /// Status of the process's tool-server connections.
    ///
    /// # Errors
    ///
    /// See [`Query::send_control_request`].
    pub async fn get_status(&self) -> Result<Value> {
        self.send_control_request(SdkControlRequest::McpStatus, None)
            .await
    }

    /// Write one raw frame.
    ///
    /// # Errors
    ///
    /// Returns `SdkError::InvalidState` after close and the transport's
    /// error otherwise.
    pub async fn write_frame(&self, frame: &Value) -> Result<()> {
        self.inner.write(&frame.to_string()).await
    }

    /// Write every frame of `input`, then half-close the input side.
    ///
    /// When hooks or tool servers are registered, the half-close waits for
    /// the first `result` message (bounded by the stream-close timeout) so
    /// in-flight callbacks can still answer. Failures are logged; the
    /// message queue reports transport errors.
    pub async fn stream_input<S>(&self, input: S)
    where
        S: Stream<Item = Value> + Send,
    {
        let mut input = pin!(input);
        let mut written: u64 = 0;
        loop {
            let next = tokio::select! {
                () = self.inner.cancel.cancelled() => {
                    debug!(written, "input streaming stopped by close");
                    return;
                }
                next = input.next() => next,
            };
            let Some(frame) = next else { break };
            if let Err(e) = self.write_frame(&frame).await {
                warn!(error = %e, written, "input streaming aborted");
                return;
            }
            written += 1;
        }

        if !self.inner.dispatcher.hooks().is_empty() || self.inner.dispatcher.has_tool_servers() {
            let timeout = self.inner.stream_close_timeout;
            if !self.wait_for_first_result(timeout).await {
                debug!(
                    timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                    "no result before input close"
                );
            }
        }

        if let Err(e) = self.inner.transport.end_input().await {
            warn!(error = %e, "failed to half-close agent input");
        }
        debug!(written, "input stream finished");
    }

    /// Spawn a task that streams frames sent on the returned channel. The
    /// input side is half-closed once every sender is dropped.
    #[must_use]
    pub fn spawn_input_channel(&self, capacity: usize) -> mpsc::Sender<Value> {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let query = self.clone();
        self.inner.tracker.spawn(async move {
            let input = futures_util::stream::unfold(rx, |mut rx| async move {
                rx.recv().await.map(|frame| (frame, rx))
            });
            query.stream_input(input).await;
        });
        tx
    }

    /// Wait until the first `result` message was seen, at most `timeout`.
    /// Returns `false` on timeout or close.
    pub async fn wait_for_first_result(&self, timeout: Duration) -> bool {
        let mut seen = self.inner.first_result.subscribe();
        let wait = async move { seen.wait_for(|seen| *seen).await.map(|_| ()) };
        tokio::select! {
            () = self.inner.cancel.cancelled() => false,
            outcome = tokio::time::timeout(timeout, wait) => matches!(outcome, Ok(Ok(()))),
        }
    }

    /// Take the queue of non-control frames. Callable once.
    ///
    /// # Errors
    ///
    /// Returns `SdkError::InvalidState` before [`Query::start`] or when the
    /// queue was already taken.
    pub fn receive_messages(&self) -> Result<FrameQueue> {
        let rx = self
            .inner
            .queue
            .lock()
            .map_err(|_| SdkError::InvalidState("message queue slot poisoned".into()))?
            .take()
            .ok_or_else(|| {
                SdkError::InvalidState("message queue already taken or not started".into())
            })?;
        let stream = futures_util::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        });
        Ok(stream.boxed())
    }

    /// Close the session. Idempotent.
    ///
    /// Cancels the read loop and inbound handlers, waits for them within
    /// the shutdown grace period, fails every pending request with
    /// `SdkError::Cancelled`, and closes the transport.
    ///
    /// # Errors
    ///
    /// Returns the transport's close error.
    pub async fn close(&self) -> Result<()> {
        let inner = &self.inner;
        if inner.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        inner
            .state
            .store(SessionState::Closing.as_u8(), Ordering::SeqCst);
        inner.cancel.cancel();

        let read_task = inner.read_task.lock().await.take();
        if let Some(mut handle) = read_task {
            if tokio::time::timeout(inner.shutdown_grace, &mut handle)
                .await
                .is_err()
            {
                warn!("read loop did not stop within grace period, aborting");
                handle.abort();
            }
        }

        inner.tracker.close();
        if tokio::time::timeout(inner.shutdown_grace, inner.tracker.wait())
            .await
            .is_err()
        {
            warn!(
                remaining = inner.tracker.len(),
                "inbound handlers did not finish within grace period"
            );
        }

        let failed = inner
            .end(SdkError::Cancelled("session closed".into()))
            .await;
        let result = inner.transport.close().await;
        inner
            .state
            .store(SessionState::Closed.as_u8(), Ordering::SeqCst);
        info!(failed_requests = failed, "session closed");
        result
    }

    /// Stop background work without waiting. Used when the owner is
    /// dropped without an explicit close: pending and later requests fail
    /// with `SdkError::Cancelled`. The transport stays open until closed.
    pub(crate) fn abandon(&self) {
        self.inner.cancel.cancel();
        let _ = self
            .inner
            .ended
            .set(SdkError::Cancelled("session dropped".into()));
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                let inner = Arc::clone(&self.inner);
                runtime.spawn(async move {
                    let failed = inner
                        .end(SdkError::Cancelled("session dropped".into()))
                        .await;
                    debug!(failed_requests = failed, "session dropped without close");
                });
            }
            Err(_) => warn!("session dropped outside a runtime; pending requests left to time out"),
        }
    }
}

impl std::fmt::Debug for Query {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Query")
            .field("state", &self.state())
            .field("streaming", &self.inner.streaming)
            .field("dispatcher", &self.inner.dispatcher)
            .finish_non_exhaustive()
    }
}

// ── Internals ───────────────────────────────────────────────────────────

impl QueryInner {
    /// Move from `from` to `to`; on mismatch returns the actual state.
    fn advance(&self, from: SessionState, to: SessionState) -> std::result::Result<(), SessionState> {
        self.state
            .compare_exchange(from.as_u8(), to.as_u8(), Ordering::SeqCst, Ordering::SeqCst)
            .map(drop)
            .map_err(SessionState::from_u8)
    }

    async fn write(&self, frame: &str) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(SdkError::InvalidState("session is closed".into()));
        }
        self.transport.write(frame).await
    }

    /// Correlated request without the state check.
    async fn request(&self, request: SdkControlRequest, timeout: Duration) -> Result<Value> {
        let subtype = request.subtype();
        let request_id = self.pending.next_id();
        let slot = self.pending.register(&request_id, subtype, timeout).await?;
        // Checked after registering: `end` sets the reason before draining.
        if let Some(reason) = self.ended.get() {
            self.pending.remove(&request_id).await;
            return Err(reason.clone());
        }

        let sent = match request_envelope(&request_id, &request) {
            Ok(frame) => self.write(&frame).await,
            Err(e) => Err(e),
        };
        if let Err(e) = sent {
            self.pending.remove(&request_id).await;
            return Err(e);
        }
        debug!(%request_id, subtype, "control request sent");

        match tokio::time::timeout(timeout, slot).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_dropped)) => Err(SdkError::Cancelled(format!(
                "control request '{subtype}' was abandoned"
            ))),
            Err(_elapsed) => {
                self.pending.remove(&request_id).await;
                warn!(%request_id, subtype, "control request timed out");
                Err(SdkError::Timeout {
                    subtype: subtype.to_owned(),
                })
            }
        }
    }

    /// Mark the inbound side as finished with `reason` and fail every
    /// pending request with it. Later requests fail with the same reason.
    async fn end(&self, reason: SdkError) -> usize {
        let _ = self.ended.set(reason);
        match self.ended.get() {
            Some(reason) => self.pending.fail_all(reason).await,
            None => 0,
        }
    }

    async fn read_loop(self: Arc<Self>, mut frames: FrameStream, tx: mpsc::Sender<Result<Value>>) {
        loop {
            let next = tokio::select! {
                () = self.cancel.cancelled() => {
                    debug!("read loop cancelled");
                    return;
                }
                next = frames.next() => next,
            };

            match next {
                None => {
                    let failed = self
                        .end(SdkError::Cancelled("agent process closed its output".into()))
                        .await;
                    debug!(failed_requests = failed, "inbound stream ended");
                    return;
                }
                Some(Err(err)) if !err.is_fatal() => {
                    warn!(error = %err, "skipping undecodable frame");
                    if !self.push(&tx, Err(err)).await {
                        return;
                    }
                }
                Some(Err(err)) => {
                    warn!(error = %err, "read loop terminated");
                    self.end(err.clone()).await;
                    self.push(&tx, Err(err)).await;
                    return;
                }
                Some(Ok(frame)) => {
                    if !self.route(frame, &tx).await {
                        return;
                    }
                }
            }
        }
    }

    /// Classify one frame. Returns `false` when the loop must stop.
    async fn route(self: &Arc<Self>, frame: Value, tx: &mpsc::Sender<Result<Value>>) -> bool {
        match frame.get("type").and_then(Value::as_str) {
            Some(CONTROL_RESPONSE) => {
                match parse_response(&frame) {
                    Ok(response) => {
                        let request_id = response.request_id;
                        if !self.pending.resolve(&request_id, response.outcome).await {
                            debug!(%request_id, "discarding late or unknown control response");
                        }
                    }
                    Err(e) => warn!(error = %e, "discarding malformed control response"),
                }
                true
            }
            Some(CONTROL_REQUEST) => {
                self.spawn_inbound(frame);
                true
            }
            Some(CONTROL_CANCEL_REQUEST) => {
                let request_id = frame
                    .get("request_id")
                    .and_then(serde_json::Value::as_str)
                    .unwrap_or_default();
                debug!(request_id, "control_cancel_request is not supported; ignoring");
                true
            }
            kind => {
                if kind == Some("result") {
                    self.first_result.send_replace(true);
                }
                self.push(tx, Ok(frame)).await
            }
        }
    }

    /// Queue one item. Returns `false` when the session is closing; a
    /// receiver that went away only drops the item.
    async fn push(&self, tx: &mpsc::Sender<Result<Value>>, item: Result<Value>) -> bool {
        tokio::select! {
            () = self.cancel.cancelled() => false,
            sent = tx.send(item) => {
                if sent.is_err() {
                    debug!("message queue receiver dropped; discarding frame");
                }
                true
            }
        }
    }

    fn spawn_inbound(self: &Arc<Self>, frame: Value) {
        let Some(request_id) = frame
            .get("request_id")
            .and_then(Value::as_str)
            .map(str::to_owned)
        else {
            warn!("discarding control_request without request_id");
            return;
        };
        let request = frame.get("request").cloned().unwrap_or(Value::Null);
        let signal = self.cancel.child_token();
        let inner = Arc::clone(self);

        self.tracker.spawn(async move {
            let envelope = tokio::select! {
                () = signal.cancelled() => {
                    debug!(%request_id, "inbound control request cancelled by close");
                    return;
                }
                envelope = inner.dispatcher.handle(&request_id, &request, signal.clone()) => envelope,
            };
            if let Err(e) = inner.write(&envelope.to_string()).await {
                warn!(%request_id, error = %e, "failed to write control response");
            }
        });
    }
}
