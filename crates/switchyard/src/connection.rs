// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Runtime connections.
//!
//! A [`Connection`] wraps one [`Transport`] with:
//!
//! - the lifecycle state machine (`open`, `close`, `pause`, `resume`, `reset`),
//! - the mode gate in front of `read`/`write`,
//! - a listener thread that publishes inbound payloads to subscribers,
//! - the routes (mappings naming this connection) computed at resolution time.
//!
//! # Listener
//!
//! Once listening is requested and the connection is open, a named thread
//! polls the transport every [`READ_POLL_INTERVAL`] and publishes each
//! payload to a snapshot of the subscriber list. Close and reset stop the
//! thread and wait at most [`LISTENER_STOP_TIMEOUT`] for it; a payload being
//! published when the stop is requested is still delivered in full.

use crate::connector::Connector;
use crate::diagnostics::{Diagnostic, DiagnosticSink, TracingSink};
use crate::error::{ConnectionError, ErrorKind, TransportError};
use crate::mapping::{Arguments, MessageMapping};
use crate::payload::Payload;
use crate::transport::Transport;
use arc_swap::ArcSwap;
use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::Duration;

/// Timeout of each transport read issued by the listener.
pub const READ_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Longest close/reset waits for the listener thread.
pub const LISTENER_STOP_TIMEOUT: Duration = Duration::from_secs(2);

/// Allowed directions of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionMode {
    ReadOnly,
    WriteOnly,
    #[default]
    ReadWrite,
}

impl ConnectionMode {
    pub fn can_read(&self) -> bool {
        matches!(self, Self::ReadOnly | Self::ReadWrite)
    }

    pub fn can_write(&self) -> bool {
        matches!(self, Self::WriteOnly | Self::ReadWrite)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ReadOnly => "readonly",
            Self::WriteOnly => "writeonly",
            Self::ReadWrite => "readwrite",
        }
    }
}

impl fmt::Display for ConnectionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle state of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Opening,
    Open,
    Closing,
    Closed,
    Paused,
    Resetting,
    Reset,
    Error,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Opening => "opening",
            Self::Open => "open",
            Self::Closing => "closing",
            Self::Closed => "closed",
            Self::Paused => "paused",
            Self::Resetting => "resetting",
            Self::Reset => "reset",
            Self::Error => "error",
        }
    }

    /// Open or paused: the transport is held.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Open | Self::Paused)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Receiver of payloads published by a connection.
///
/// # Panics
/// A panicking subscriber is isolated; delivery continues with the next one.
pub trait PayloadSubscriber: Send + Sync {
    fn on_payload(&self, source: &Connection, payload: &Payload);
}

/// Closure-backed subscriber.
pub struct CallbackSubscriber<F>
where
    F: Fn(&Connection, &Payload) + Send + Sync,
{
    callback: F,
}

impl<F> CallbackSubscriber<F>
where
    F: Fn(&Connection, &Payload) + Send + Sync,
{
    pub fn new(callback: F) -> Self {
        Self { callback }
    }
}

impl<F> PayloadSubscriber for CallbackSubscriber<F>
where
    F: Fn(&Connection, &Payload) + Send + Sync,
{
    fn on_payload(&self, source: &Connection, payload: &Payload) {
        (self.callback)(source, payload);
    }
}

/// Mappings that name a connection, split by role.
#[derive(Debug, Default, Clone)]
pub struct ConnectionRoutes {
    /// Root mappings reading from the connection (identification candidates).
    pub inputs: Vec<Arc<MessageMapping>>,
    /// Mappings, chained ones included, writing to it synchronously.
    pub sync_outputs: Vec<Arc<MessageMapping>>,
    /// Mappings, chained ones included, writing to it asynchronously.
    pub async_outputs: Vec<Arc<MessageMapping>>,
}

impl ConnectionRoutes {
    /// Collect the routes of `connection_id` from the loaded root mappings.
    pub fn for_connection(connection_id: &str, mappings: &[Arc<MessageMapping>]) -> Self {
        let mut routes = Self::default();
        for mapping in mappings {
            if mapping.uses_as_input(connection_id) {
                routes.inputs.push(Arc::clone(mapping));
            }
            routes.collect_outputs(connection_id, mapping);
        }
        routes
    }

    fn collect_outputs(&mut self, connection_id: &str, mapping: &Arc<MessageMapping>) {
        if mapping.uses_as_sync_output(connection_id) {
            self.sync_outputs.push(Arc::clone(mapping));
        }
        if mapping.uses_as_async_output(connection_id) {
            self.async_outputs.push(Arc::clone(mapping));
        }
        for output in mapping.outputs() {
            for chained in output.chained() {
                self.collect_outputs(connection_id, chained);
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.inputs.is_empty() && self.sync_outputs.is_empty() && self.async_outputs.is_empty()
    }
}

struct Listener {
    stop: Arc<AtomicBool>,
    /// Disconnects when the thread exits.
    done_rx: Receiver<()>,
    thread_id: ThreadId,
    handle: Option<JoinHandle<()>>,
}

impl Listener {
    fn is_alive(&self) -> bool {
        matches!(self.done_rx.try_recv(), Err(TryRecvError::Empty))
    }
}

/// One logical link to a source or destination.
pub struct Connection {
    id: String,
    kind: String,
    mode: ConnectionMode,
    params: Arguments,
    transport: Arc<dyn Transport>,
    state: Mutex<ConnectionState>,
    /// Serializes lifecycle operations.
    lifecycle: Mutex<()>,
    subscribers: RwLock<Vec<Arc<dyn PayloadSubscriber>>>,
    routes: ArcSwap<ConnectionRoutes>,
    parent: RwLock<Weak<Connector>>,
    diagnostics: RwLock<Option<Arc<dyn DiagnosticSink>>>,
    listening: AtomicBool,
    listener: Mutex<Option<Listener>>,
    received: AtomicU64,
    written: AtomicU64,
    delivery_errors: AtomicU64,
}

impl Connection {
    /// Create a closed connection over `transport`.
    pub fn new(id: impl Into<String>, mode: ConnectionMode, transport: Arc<dyn Transport>) -> Self {
        Self {
            id: id.into(),
            kind: transport.kind().to_string(),
            mode,
            params: Arguments::new(),
            transport,
            state: Mutex::new(ConnectionState::Closed),
            lifecycle: Mutex::new(()),
            subscribers: RwLock::new(Vec::new()),
            routes: ArcSwap::from_pointee(ConnectionRoutes::default()),
            parent: RwLock::new(Weak::new()),
            diagnostics: RwLock::new(None),
            listening: AtomicBool::new(false),
            listener: Mutex::new(None),
            received: AtomicU64::new(0),
            written: AtomicU64::new(0),
            delivery_errors: AtomicU64::new(0),
        }
    }

    /// Override the type name (defaults to the transport's kind).
    pub fn with_kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = kind.into();
        self
    }

    /// Attach the construction parameters.
    pub fn with_params(mut self, params: Arguments) -> Self {
        self.params = params;
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn mode(&self) -> ConnectionMode {
        self.mode
    }

    pub fn params(&self) -> &Arguments {
        &self.params
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.lock()
    }

    fn set_state(&self, next: ConnectionState) {
        let mut state = self.state.lock();
        let prev = *state;
        if prev != next {
            tracing::debug!(connection = %self.id, from = %prev, to = %next, "state change");
            *state = next;
        }
    }

    fn invalid_state(&self, operation: &'static str, state: ConnectionState) -> ConnectionError {
        ConnectionError::InvalidState {
            connection: self.id.clone(),
            operation,
            state,
        }
    }

    fn transport_failure(&self, operation: &'static str, source: TransportError) -> ConnectionError {
        ConnectionError::Transport {
            connection: self.id.clone(),
            operation,
            source,
        }
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Open the transport. Allowed from closed, reset, paused and error.
    ///
    /// Restarts the listener when listening was requested earlier.
    pub fn open(self: &Arc<Self>) -> Result<(), ConnectionError> {
        let _guard = self.lifecycle.lock();
        let state = self.state();
        if !matches!(
            state,
            ConnectionState::Closed
                | ConnectionState::Reset
                | ConnectionState::Paused
                | ConnectionState::Error
        ) {
            return Err(self.invalid_state("open", state));
        }
        self.open_locked()
    }

    /// Caller holds the lifecycle lock and checked the state.
    fn open_locked(self: &Arc<Self>) -> Result<(), ConnectionError> {
        self.set_state(ConnectionState::Opening);
        if let Err(e) = self.transport.open() {
            self.set_state(ConnectionState::Error);
            return Err(self.transport_failure("open", e));
        }
        self.set_state(ConnectionState::Open);

        if self.listening.load(Ordering::Acquire) {
            self.start_listener()?;
        }
        Ok(())
    }

    /// Close the transport. Closing a closed connection does nothing.
    pub fn close(&self) -> Result<(), ConnectionError> {
        let _guard = self.lifecycle.lock();
        if self.state() == ConnectionState::Closed {
            return Ok(());
        }

        self.set_state(ConnectionState::Closing);
        self.stop_listener();
        if let Err(e) = self.transport.close() {
            self.set_state(ConnectionState::Error);
            return Err(self.transport_failure("close", e));
        }
        self.set_state(ConnectionState::Closed);
        Ok(())
    }

    /// Suspend an open connection. The listener stops reading until resumed.
    pub fn pause(&self) -> Result<(), ConnectionError> {
        let _guard = self.lifecycle.lock();
        let state = self.state();
        if state != ConnectionState::Open {
            return Err(self.invalid_state("pause", state));
        }

        if let Err(e) = self.transport.pause() {
            self.set_state(ConnectionState::Error);
            return Err(self.fault(self.transport_failure("pause", e)));
        }
        self.set_state(ConnectionState::Paused);
        Ok(())
    }

    /// Reopen a paused connection.
    pub fn resume(self: &Arc<Self>) -> Result<(), ConnectionError> {
        let _guard = self.lifecycle.lock();
        let state = self.state();
        if state != ConnectionState::Paused {
            return Err(self.invalid_state("resume", state));
        }
        self.open_locked()
    }

    /// Stop the listener and reset the transport. Allowed from open, paused
    /// and error; a later `open` resumes listening.
    pub fn reset(&self) -> Result<(), ConnectionError> {
        let _guard = self.lifecycle.lock();
        let state = self.state();
        if !matches!(
            state,
            ConnectionState::Open | ConnectionState::Paused | ConnectionState::Error
        ) {
            return Err(self.invalid_state("reset", state));
        }

        self.set_state(ConnectionState::Resetting);
        self.stop_listener();
        if let Err(e) = self.transport.reset() {
            self.set_state(ConnectionState::Error);
            return Err(self.fault(self.transport_failure("reset", e)));
        }
        self.set_state(ConnectionState::Reset);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Gated I/O
    // ------------------------------------------------------------------

    /// Read one payload, waiting up to `timeout`.
    pub fn read(&self, timeout: Duration) -> Result<Option<Payload>, ConnectionError> {
        if !self.mode.can_read() {
            return Err(ConnectionError::CapabilityViolation {
                connection: self.id.clone(),
                mode: self.mode,
                operation: "read",
            });
        }
        self.transport
            .read_message(timeout)
            .map_err(|e| self.transport_failure("read", e))
    }

    /// Write one payload, returning the transport's reply if any.
    pub fn write(&self, payload: &Payload) -> Result<Option<Payload>, ConnectionError> {
        if !self.mode.can_write() {
            return Err(ConnectionError::CapabilityViolation {
                connection: self.id.clone(),
                mode: self.mode,
                operation: "write",
            });
        }
        let reply = self
            .transport
            .write_message(payload)
            .map_err(|e| self.transport_failure("write", e))?;
        self.written.fetch_add(1, Ordering::Relaxed);
        Ok(reply)
    }

    // ------------------------------------------------------------------
    // Publish / subscribe
    // ------------------------------------------------------------------

    /// Add a subscriber. Returns false if it is already registered.
    pub fn subscribe(&self, subscriber: Arc<dyn PayloadSubscriber>) -> bool {
        let ptr = Arc::as_ptr(&subscriber) as *const () as usize;
        let mut subscribers = self.subscribers.write();
        if subscribers
            .iter()
            .any(|existing| Arc::as_ptr(existing) as *const () as usize == ptr)
        {
            return false;
        }
        subscribers.push(subscriber);
        true
    }

    /// Remove a subscriber by identity.
    pub fn unsubscribe(&self, subscriber: &Arc<dyn PayloadSubscriber>) -> bool {
        let ptr = Arc::as_ptr(subscriber) as *const () as usize;
        let mut subscribers = self.subscribers.write();
        match subscribers
            .iter()
            .position(|existing| Arc::as_ptr(existing) as *const () as usize == ptr)
        {
            Some(index) => {
                subscribers.remove(index);
                true
            }
            None => false,
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }

    /// Deliver a payload to every current subscriber with panic isolation.
    ///
    /// Returns the number of subscribers that panicked.
    pub fn publish(&self, payload: &Payload) -> usize {
        let snapshot: Vec<Arc<dyn PayloadSubscriber>> = self.subscribers.read().clone();
        let mut errors = 0;

        for subscriber in &snapshot {
            let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                subscriber.on_payload(self, payload);
            }));
            if result.is_err() {
                errors += 1;
                tracing::warn!(connection = %self.id, "Subscriber panicked during delivery");
            }
        }

        if errors > 0 {
            self.delivery_errors
                .fetch_add(errors as u64, Ordering::Relaxed);
        }
        errors
    }

    // ------------------------------------------------------------------
    // Listener
    // ------------------------------------------------------------------

    /// Request listening. Starts the listener now if the connection is open.
    pub fn listen(self: &Arc<Self>) -> Result<(), ConnectionError> {
        if !self.mode.can_read() {
            return Err(ConnectionError::CapabilityViolation {
                connection: self.id.clone(),
                mode: self.mode,
                operation: "listen",
            });
        }
        self.listening.store(true, Ordering::Release);
        if self.state().is_active() {
            self.start_listener()?;
        }
        Ok(())
    }

    /// Withdraw the listening request and stop the listener.
    pub fn stop_listening(&self) {
        self.listening.store(false, Ordering::Release);
        self.stop_listener();
    }

    pub fn is_listening(&self) -> bool {
        self.listener
            .lock()
            .as_ref()
            .map(Listener::is_alive)
            .unwrap_or(false)
    }

    fn start_listener(self: &Arc<Self>) -> Result<(), ConnectionError> {
        let mut slot = self.listener.lock();
        if slot.as_ref().map(Listener::is_alive).unwrap_or(false) {
            return Ok(());
        }
        if let Some(mut finished) = slot.take() {
            if let Some(handle) = finished.handle.take() {
                let _ = handle.join();
            }
        }

        let stop = Arc::new(AtomicBool::new(false));
        let (done_tx, done_rx) = channel::bounded::<()>(0);
        let weak = Arc::downgrade(self);
        let thread_stop = Arc::clone(&stop);

        let handle = thread::Builder::new()
            .name(format!("sy-listen-{}", self.id))
            .spawn(move || listener_loop(weak, thread_stop, done_tx))
            .map_err(|e| self.transport_failure("listen", e.into()))?;

        tracing::debug!(connection = %self.id, "listener started");
        *slot = Some(Listener {
            stop,
            done_rx,
            thread_id: handle.thread().id(),
            handle: Some(handle),
        });
        Ok(())
    }

    fn stop_listener(&self) {
        let Some(mut listener) = self.listener.lock().take() else {
            return;
        };
        listener.stop.store(true, Ordering::Release);

        // Called from a subscriber on the listener itself: it exits on its own.
        if thread::current().id() == listener.thread_id {
            return;
        }

        match listener.done_rx.recv_timeout(LISTENER_STOP_TIMEOUT) {
            Err(RecvTimeoutError::Disconnected) => {
                if let Some(handle) = listener.handle.take() {
                    let _ = handle.join();
                }
                tracing::debug!(connection = %self.id, "listener stopped");
            }
            Ok(()) | Err(RecvTimeoutError::Timeout) => {
                tracing::warn!(
                    connection = %self.id,
                    "Listener still busy after {:?}, detaching",
                    LISTENER_STOP_TIMEOUT
                );
            }
        }
    }

    /// Tell the owning connector about a failure that left this connection
    /// in error.
    fn fault(&self, err: ConnectionError) -> ConnectionError {
        if let Some(parent) = self.parent() {
            parent.report_fault(&self.id, &err);
        }
        err
    }

    fn fail_listener(&self, error: TransportError) {
        {
            let mut state = self.state.lock();
            if state.is_active() {
                *state = ConnectionState::Error;
            }
        }
        let err = self.transport_failure("read", error);
        tracing::warn!(connection = %self.id, "Listener stopped: {}", err);
        self.report(Diagnostic::new(ErrorKind::TransportFailure, self.id.clone(), err.to_string()));
        self.fault(err);
    }

    // ------------------------------------------------------------------
    // Wiring
    // ------------------------------------------------------------------

    pub fn routes(&self) -> Arc<ConnectionRoutes> {
        self.routes.load_full()
    }

    pub fn set_routes(&self, routes: ConnectionRoutes) {
        self.routes.store(Arc::new(routes));
    }

    /// Root mappings that read from this connection.
    pub fn input_mappings(&self) -> Vec<Arc<MessageMapping>> {
        self.routes.load().inputs.clone()
    }

    pub fn parent(&self) -> Option<Arc<Connector>> {
        self.parent.read().upgrade()
    }

    pub(crate) fn set_parent(&self, parent: Weak<Connector>) {
        *self.parent.write() = parent;
    }

    pub fn set_diagnostics(&self, sink: Arc<dyn DiagnosticSink>) {
        *self.diagnostics.write() = Some(sink);
    }

    /// Detach the sink; later diagnostics go to tracing.
    pub fn clear_diagnostics(&self) {
        *self.diagnostics.write() = None;
    }

    /// Report a diagnostic through the attached sink (tracing otherwise).
    pub fn report(&self, diagnostic: Diagnostic) {
        let sink = self.diagnostics.read().clone();
        match sink {
            Some(sink) => sink.report(diagnostic),
            None => TracingSink.report(diagnostic),
        }
    }

    // ------------------------------------------------------------------
    // Counters
    // ------------------------------------------------------------------

    /// Payloads read by the listener.
    pub fn received(&self) -> u64 {
        self.received.load(Ordering::Relaxed)
    }

    /// Successful writes.
    pub fn written(&self) -> u64 {
        self.written.load(Ordering::Relaxed)
    }

    /// Subscriber panics caught during publish.
    pub fn delivery_errors(&self) -> u64 {
        self.delivery_errors.load(Ordering::Relaxed)
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("mode", &self.mode)
            .field("state", &self.state())
            .finish()
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        if let Some(listener) = self.listener.get_mut().take() {
            listener.stop.store(true, Ordering::Release);
        }
    }
}

fn listener_loop(connection: Weak<Connection>, stop: Arc<AtomicBool>, _done: Sender<()>) {
    while !stop.load(Ordering::Acquire) {
        let Some(conn) = connection.upgrade() else {
            break;
        };

        if conn.state() == ConnectionState::Paused {
            drop(conn);
            thread::sleep(READ_POLL_INTERVAL);
            continue;
        }

        match conn.transport.read_message(READ_POLL_INTERVAL) {
            Ok(Some(payload)) => {
                conn.received.fetch_add(1, Ordering::Relaxed);
                conn.publish(&payload);
            }
            Ok(None) => {}
            Err(e) => {
                if !stop.load(Ordering::Acquire) {
                    conn.fail_listener(e);
                }
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::ChannelSink;
    use crate::mapping::{IoMode, MatchStyle, MessageIOConfig};
    use crate::transport::MemoryTransport;
    use serde_json::json;
    use std::time::Instant;

    fn payload(value: serde_json::Value) -> Payload {
        crate::payload::from_json(value).expect("object")
    }

    /// Transport whose operations can be made to fail.
    #[derive(Default)]
    struct FlakyTransport {
        fail_open: AtomicBool,
        fail_close: AtomicBool,
        fail_read: AtomicBool,
        fail_pause: AtomicBool,
        fail_reset: AtomicBool,
    }

    impl Transport for FlakyTransport {
        fn open(&self) -> Result<(), TransportError> {
            if self.fail_open.load(Ordering::SeqCst) {
                return Err(TransportError::new("refused"));
            }
            Ok(())
        }

        fn close(&self) -> Result<(), TransportError> {
            if self.fail_close.load(Ordering::SeqCst) {
                return Err(TransportError::new("stuck"));
            }
            Ok(())
        }

        fn pause(&self) -> Result<(), TransportError> {
            if self.fail_pause.load(Ordering::SeqCst) {
                return Err(TransportError::new("cannot pause"));
            }
            Ok(())
        }

        fn reset(&self) -> Result<(), TransportError> {
            if self.fail_reset.load(Ordering::SeqCst) {
                return Err(TransportError::new("cannot reset"));
            }
            Ok(())
        }

        fn read_message(&self, timeout: Duration) -> Result<Option<Payload>, TransportError> {
            if self.fail_read.load(Ordering::SeqCst) {
                return Err(TransportError::new("broken pipe"));
            }
            thread::sleep(timeout.min(Duration::from_millis(10)));
            Ok(None)
        }

        fn write_message(&self, _payload: &Payload) -> Result<Option<Payload>, TransportError> {
            Ok(None)
        }

        fn kind(&self) -> &'static str {
            "flaky"
        }
    }

    fn memory_connection(mode: ConnectionMode) -> (Arc<Connection>, crate::transport::MemoryHandle) {
        let (transport, handle) = MemoryTransport::new(false);
        (Arc::new(Connection::new("c1", mode, Arc::new(transport))), handle)
    }

    fn channel_subscriber() -> (Arc<dyn PayloadSubscriber>, Receiver<Payload>) {
        let (tx, rx) = channel::unbounded();
        let sub: Arc<dyn PayloadSubscriber> = Arc::new(CallbackSubscriber::new(
            move |_conn: &Connection, payload: &Payload| {
                let _ = tx.send(payload.clone());
            },
        ));
        (sub, rx)
    }

    #[test]
    fn test_mode_gate() {
        let (conn, _handle) = memory_connection(ConnectionMode::WriteOnly);
        conn.open().expect("open");
        let err = conn.read(Duration::from_millis(1)).expect_err("gated");
        assert_eq!(err.kind(), ErrorKind::CapabilityViolation);
        assert!(conn.write(&payload(json!({"a": 1}))).is_ok());

        let (conn, _handle) = memory_connection(ConnectionMode::ReadOnly);
        conn.open().expect("open");
        let err = conn.write(&payload(json!({"a": 1}))).expect_err("gated");
        assert_eq!(err.kind(), ErrorKind::CapabilityViolation);
        conn.listen().expect("listen");
        conn.close().expect("close");
    }

    #[test]
    fn test_listen_requires_read() {
        let (conn, _handle) = memory_connection(ConnectionMode::WriteOnly);
        let err = conn.listen().expect_err("gated");
        assert_eq!(err.kind(), ErrorKind::CapabilityViolation);
    }

    #[test]
    fn test_lifecycle_transitions() {
        let (conn, _handle) = memory_connection(ConnectionMode::ReadWrite);
        assert_eq!(conn.state(), ConnectionState::Closed);

        let err = conn.pause().expect_err("pause from closed");
        assert_eq!(err.kind(), ErrorKind::InvalidState);
        assert!(conn.reset().is_err());

        conn.open().expect("open");
        assert_eq!(conn.state(), ConnectionState::Open);
        assert!(conn.open().is_err());

        conn.pause().expect("pause");
        assert_eq!(conn.state(), ConnectionState::Paused);
        conn.resume().expect("resume");
        assert_eq!(conn.state(), ConnectionState::Open);

        conn.reset().expect("reset");
        assert_eq!(conn.state(), ConnectionState::Reset);
        conn.open().expect("reopen");

        conn.close().expect("close");
        assert_eq!(conn.state(), ConnectionState::Closed);
        conn.close().expect("close is idempotent");
    }

    #[test]
    fn test_transport_failure_moves_to_error() {
        let transport = Arc::new(FlakyTransport::default());
        transport.fail_open.store(true, Ordering::SeqCst);
        let conn = Arc::new(Connection::new("f", ConnectionMode::ReadWrite, transport.clone()));

        let err = conn.open().expect_err("open fails");
        assert_eq!(err.kind(), ErrorKind::TransportFailure);
        assert_eq!(conn.state(), ConnectionState::Error);

        transport.fail_open.store(false, Ordering::SeqCst);
        conn.open().expect("open from error");
        assert_eq!(conn.state(), ConnectionState::Open);

        transport.fail_close.store(true, Ordering::SeqCst);
        assert!(conn.close().is_err());
        assert_eq!(conn.state(), ConnectionState::Error);
    }

    #[test]
    fn test_pause_and_reset_failures_reach_connector() {
        use crate::connector::{Connector, ConnectorState, DirectBackend};

        let transport = Arc::new(FlakyTransport::default());
        let conn = Arc::new(Connection::new("f", ConnectionMode::ReadWrite, transport.clone()));
        let connector = Arc::new(Connector::new("k", Arc::new(DirectBackend)));
        connector.add_connection(Arc::clone(&conn)).expect("add");
        connector.connect().expect("connect");
        assert_eq!(connector.state(), ConnectorState::Connected);

        transport.fail_pause.store(true, Ordering::SeqCst);
        let err = conn.pause().expect_err("pause fails");
        assert_eq!(err.kind(), ErrorKind::TransportFailure);
        assert_eq!(conn.state(), ConnectionState::Error);
        assert_eq!(connector.state(), ConnectorState::Disconnected);

        connector.connect().expect("reconnect");
        assert_eq!(connector.state(), ConnectorState::Connected);
        transport.fail_reset.store(true, Ordering::SeqCst);
        assert!(conn.reset().is_err());
        assert_eq!(conn.state(), ConnectionState::Error);
        assert_eq!(connector.state(), ConnectorState::Disconnected);
    }

    #[test]
    fn test_concurrent_resume_opens_once() {
        let (conn, _handle) = memory_connection(ConnectionMode::ReadOnly);
        conn.open().expect("open");
        conn.pause().expect("pause");

        let workers: Vec<_> = (0..4)
            .map(|_| {
                let conn = Arc::clone(&conn);
                thread::spawn(move || conn.resume().is_ok())
            })
            .collect();
        let resumed = workers
            .into_iter()
            .map(|w| w.join().expect("join"))
            .filter(|ok| *ok)
            .count();
        assert_eq!(resumed, 1);
        assert_eq!(conn.state(), ConnectionState::Open);
    }

    #[test]
    fn test_jsonl_pause_resume_delivers_each_line_once() {
        use crate::transport::JsonlTransport;

        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("in.jsonl");
        std::fs::write(&path, "{\"n\":1}\n{\"n\":2}\n").expect("write");

        let transport = JsonlTransport::new(Some(path.clone()), None);
        let conn = Arc::new(Connection::new("j", ConnectionMode::ReadOnly, Arc::new(transport)));
        let (sub, rx) = channel_subscriber();
        conn.subscribe(sub);
        conn.listen().expect("listen");
        conn.open().expect("open");

        let wait = Duration::from_secs(2);
        assert_eq!(rx.recv_timeout(wait).expect("n=1").get("n"), Some(&json!(1)));
        assert_eq!(rx.recv_timeout(wait).expect("n=2").get("n"), Some(&json!(2)));

        conn.pause().expect("pause");
        conn.resume().expect("resume");
        conn.reset().expect("reset");
        conn.open().expect("reopen");

        std::fs::OpenOptions::new()
            .append(true)
            .open(&path)
            .and_then(|mut f| std::io::Write::write_all(&mut f, b"{\"n\":3}\n"))
            .expect("append");
        assert_eq!(rx.recv_timeout(wait).expect("n=3").get("n"), Some(&json!(3)));
        assert!(rx.recv_timeout(Duration::from_millis(300)).is_err());
        assert_eq!(conn.received(), 3);
        conn.close().expect("close");
    }

    #[test]
    fn test_listener_publishes_payloads() {
        let (conn, handle) = memory_connection(ConnectionMode::ReadOnly);
        let (sub, rx) = channel_subscriber();
        assert!(conn.subscribe(sub));

        conn.listen().expect("listen");
        assert!(!conn.is_listening());
        conn.open().expect("open");
        assert!(conn.is_listening());

        handle.inject(payload(json!({"n": 1}))).expect("inject");
        handle.inject(payload(json!({"n": 2}))).expect("inject");

        let first = rx.recv_timeout(Duration::from_secs(2)).expect("first");
        let second = rx.recv_timeout(Duration::from_secs(2)).expect("second");
        assert_eq!(first.get("n"), Some(&json!(1)));
        assert_eq!(second.get("n"), Some(&json!(2)));
        assert_eq!(conn.received(), 2);

        conn.close().expect("close");
    }

    #[test]
    fn test_close_stops_blocked_listener() {
        let (conn, _handle) = memory_connection(ConnectionMode::ReadOnly);
        conn.listen().expect("listen");
        conn.open().expect("open");
        assert!(conn.is_listening());

        let started = Instant::now();
        conn.close().expect("close");
        assert!(started.elapsed() < LISTENER_STOP_TIMEOUT);
        assert!(!conn.is_listening());
        assert_eq!(conn.state(), ConnectionState::Closed);
    }

    #[test]
    fn test_inflight_payload_delivered_on_close() {
        let (conn, handle) = memory_connection(ConnectionMode::ReadOnly);
        let (tx, rx) = channel::unbounded();
        let (entered_tx, entered_rx) = channel::bounded::<()>(1);
        conn.subscribe(Arc::new(CallbackSubscriber::new(
            move |_c: &Connection, p: &Payload| {
                let _ = entered_tx.send(());
                thread::sleep(Duration::from_millis(200));
                let _ = tx.send(p.clone());
            },
        )));
        conn.listen().expect("listen");
        conn.open().expect("open");

        handle.inject(payload(json!({"slow": true}))).expect("inject");
        entered_rx
            .recv_timeout(Duration::from_secs(2))
            .expect("delivery started");
        conn.close().expect("close");

        let got = rx.recv_timeout(Duration::from_secs(2)).expect("delivered");
        assert_eq!(got, payload(json!({"slow": true})));
    }

    #[test]
    fn test_paused_connection_skips_reads() {
        let (conn, handle) = memory_connection(ConnectionMode::ReadOnly);
        let (sub, rx) = channel_subscriber();
        conn.subscribe(sub);
        conn.listen().expect("listen");
        conn.open().expect("open");
        conn.pause().expect("pause");
        // Let an in-progress read finish before injecting.
        thread::sleep(READ_POLL_INTERVAL * 2);

        handle.inject(payload(json!({"n": 1}))).expect("inject");
        assert!(rx.recv_timeout(Duration::from_millis(300)).is_err());

        conn.resume().expect("resume");
        assert!(rx.recv_timeout(Duration::from_secs(2)).is_ok());
        conn.close().expect("close");
    }

    #[test]
    fn test_reset_then_open_resumes_listening() {
        let (conn, handle) = memory_connection(ConnectionMode::ReadOnly);
        let (sub, rx) = channel_subscriber();
        conn.subscribe(sub);
        conn.listen().expect("listen");
        conn.open().expect("open");

        conn.reset().expect("reset");
        assert!(!conn.is_listening());

        conn.open().expect("open");
        assert!(conn.is_listening());
        handle.inject(payload(json!({"n": 1}))).expect("inject");
        assert!(rx.recv_timeout(Duration::from_secs(2)).is_ok());
        conn.close().expect("close");
    }

    #[test]
    fn test_subscriber_panic_isolated() {
        let (conn, _handle) = memory_connection(ConnectionMode::ReadOnly);
        conn.subscribe(Arc::new(CallbackSubscriber::new(
            |_c: &Connection, _p: &Payload| panic!("subscriber bug"),
        )));
        let (sub, rx) = channel_subscriber();
        conn.subscribe(sub);

        let errors = conn.publish(&payload(json!({"a": 1})));
        assert_eq!(errors, 1);
        assert_eq!(conn.delivery_errors(), 1);
        assert!(rx.try_recv().is_ok());
    }

    #[test]
    fn test_subscribe_dedup_and_remove() {
        let (conn, _handle) = memory_connection(ConnectionMode::ReadOnly);
        let (sub, _rx) = channel_subscriber();
        assert!(conn.subscribe(Arc::clone(&sub)));
        assert!(!conn.subscribe(Arc::clone(&sub)));
        assert_eq!(conn.subscriber_count(), 1);

        assert!(conn.unsubscribe(&sub));
        assert!(!conn.unsubscribe(&sub));
        assert_eq!(conn.subscriber_count(), 0);
    }

    #[test]
    fn test_read_failure_reports_diagnostic() {
        let transport = Arc::new(FlakyTransport::default());
        let conn = Arc::new(Connection::new("f", ConnectionMode::ReadOnly, transport.clone()));
        let (sink, rx) = ChannelSink::new();
        conn.set_diagnostics(Arc::new(sink));

        conn.listen().expect("listen");
        conn.open().expect("open");
        transport.fail_read.store(true, Ordering::SeqCst);

        let diag = rx.recv_timeout(Duration::from_secs(2)).expect("diagnostic");
        assert_eq!(diag.kind, ErrorKind::TransportFailure);
        assert_eq!(diag.source_connection, "f");
        assert_eq!(conn.state(), ConnectionState::Error);
    }

    #[test]
    fn test_routes_for_connection() {
        let follow = MessageMapping::new("ack", MessageIOConfig::input("in", MatchStyle::Any))
            .with_output(MessageIOConfig::new("acks", IoMode::Async));
        let root = Arc::new(
            MessageMapping::new("m", MessageIOConfig::input("in", MatchStyle::Exact)).with_output(
                MessageIOConfig::new("out", IoMode::Sync).follow_message(follow),
            ),
        );
        let mappings = vec![root];

        let routes = ConnectionRoutes::for_connection("in", &mappings);
        assert_eq!(routes.inputs.len(), 1);
        let routes = ConnectionRoutes::for_connection("out", &mappings);
        assert_eq!(routes.sync_outputs.len(), 1);
        let routes = ConnectionRoutes::for_connection("acks", &mappings);
        assert_eq!(routes.async_outputs.len(), 1);
        assert!(routes.inputs.is_empty());
        assert!(ConnectionRoutes::for_connection("other", &mappings).is_empty());

        let (conn, _handle) = memory_connection(ConnectionMode::ReadWrite);
        conn.set_routes(ConnectionRoutes::for_connection("in", &mappings));
        assert_eq!(conn.input_mappings().len(), 1);
    }
}
