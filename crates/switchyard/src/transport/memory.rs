// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! In-process transport over crossbeam channels.
//!
//! Each endpoint has three queues: inbound payloads (read by the
//! connection), written payloads (observed through a [`MemoryHandle`]) and
//! queued replies (returned by the next write). Transports created through
//! a [`MemoryHub`] with the same channel name share their queues.

use super::Transport;
use crate::error::TransportError;
use crate::payload::Payload;
use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender, TrySendError};
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Default number of written payloads retained per endpoint.
pub const DEFAULT_CAPACITY: usize = 1024;

#[derive(Clone)]
struct Queues {
    inbound_tx: Sender<Payload>,
    inbound_rx: Receiver<Payload>,
    written_tx: Sender<Payload>,
    written_rx: Receiver<Payload>,
    reply_tx: Sender<Payload>,
    reply_rx: Receiver<Payload>,
}

impl Queues {
    fn new(capacity: usize) -> Self {
        let (inbound_tx, inbound_rx) = channel::unbounded();
        let (written_tx, written_rx) = channel::bounded(capacity.max(1));
        let (reply_tx, reply_rx) = channel::unbounded();
        Self {
            inbound_tx,
            inbound_rx,
            written_tx,
            written_rx,
            reply_tx,
            reply_rx,
        }
    }
}

/// Channel-backed transport.
pub struct MemoryTransport {
    queues: Queues,
    echo: bool,
    open: AtomicBool,
}

impl MemoryTransport {
    /// Create a standalone endpoint and its handle.
    ///
    /// With `echo`, every write returns the written payload as its reply
    /// unless a reply was queued through the handle.
    pub fn new(echo: bool) -> (Self, MemoryHandle) {
        Self::with_capacity(echo, DEFAULT_CAPACITY)
    }

    /// Same as [`new`](Self::new), retaining at most `capacity` written payloads.
    pub fn with_capacity(echo: bool, capacity: usize) -> (Self, MemoryHandle) {
        let queues = Queues::new(capacity);
        let handle = MemoryHandle {
            queues: queues.clone(),
        };
        (Self::from_queues(queues, echo), handle)
    }

    fn from_queues(queues: Queues, echo: bool) -> Self {
        Self {
            queues,
            echo,
            open: AtomicBool::new(false),
        }
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }
}

impl Transport for MemoryTransport {
    fn open(&self) -> Result<(), TransportError> {
        self.open.store(true, Ordering::Release);
        Ok(())
    }

    fn close(&self) -> Result<(), TransportError> {
        self.open.store(false, Ordering::Release);
        Ok(())
    }

    fn reset(&self) -> Result<(), TransportError> {
        self.open.store(false, Ordering::Release);
        while self.queues.inbound_rx.try_recv().is_ok() {}
        while self.queues.reply_rx.try_recv().is_ok() {}
        Ok(())
    }

    fn read_message(&self, timeout: Duration) -> Result<Option<Payload>, TransportError> {
        match self.queues.inbound_rx.recv_timeout(timeout) {
            Ok(payload) => Ok(Some(payload)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => {
                Err(TransportError::new("memory channel disconnected"))
            }
        }
    }

    fn write_message(&self, payload: &Payload) -> Result<Option<Payload>, TransportError> {
        if !self.is_open() {
            return Err(TransportError::new("memory endpoint is not open"));
        }

        let mut pending = payload.clone();
        loop {
            match self.queues.written_tx.try_send(pending) {
                Ok(()) => break,
                Err(TrySendError::Full(back)) => {
                    // Keep the most recent writes.
                    let _ = self.queues.written_rx.try_recv();
                    pending = back;
                }
                Err(TrySendError::Disconnected(_)) => {
                    return Err(TransportError::new("memory channel disconnected"));
                }
            }
        }

        if let Ok(reply) = self.queues.reply_rx.try_recv() {
            return Ok(Some(reply));
        }
        Ok(self.echo.then(|| payload.clone()))
    }

    fn kind(&self) -> &'static str {
        "memory"
    }
}

/// External side of a memory endpoint.
#[derive(Clone)]
pub struct MemoryHandle {
    queues: Queues,
}

impl MemoryHandle {
    /// Feed a payload to the endpoint's reader.
    pub fn inject(&self, payload: Payload) -> Result<(), TransportError> {
        self.queues
            .inbound_tx
            .send(payload)
            .map_err(|_| TransportError::new("memory channel disconnected"))
    }

    /// Queue the reply returned by the next write.
    pub fn queue_reply(&self, payload: Payload) -> Result<(), TransportError> {
        self.queues
            .reply_tx
            .send(payload)
            .map_err(|_| TransportError::new("memory channel disconnected"))
    }

    /// Next written payload, if one is waiting.
    pub fn try_written(&self) -> Option<Payload> {
        self.queues.written_rx.try_recv().ok()
    }

    /// Wait up to `timeout` for the next written payload.
    pub fn written_timeout(&self, timeout: Duration) -> Option<Payload> {
        self.queues.written_rx.recv_timeout(timeout).ok()
    }

    /// Take every written payload currently queued.
    pub fn drain_written(&self) -> Vec<Payload> {
        self.queues.written_rx.try_iter().collect()
    }

    /// Number of inbound payloads not yet read.
    pub fn pending_inbound(&self) -> usize {
        self.queues.inbound_rx.len()
    }
}

/// Named memory channels shared between transports and test code.
#[derive(Default)]
pub struct MemoryHub {
    channels: DashMap<String, Queues>,
}

impl MemoryHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a transport bound to the named channel, creating the channel
    /// with `capacity` on first use.
    pub fn transport(&self, channel: &str, echo: bool, capacity: usize) -> MemoryTransport {
        let queues = self
            .channels
            .entry(channel.to_string())
            .or_insert_with(|| Queues::new(capacity))
            .clone();
        MemoryTransport::from_queues(queues, echo)
    }

    /// Handle of the named channel, created on first use.
    pub fn handle(&self, channel: &str) -> MemoryHandle {
        let queues = self
            .channels
            .entry(channel.to_string())
            .or_insert_with(|| Queues::new(DEFAULT_CAPACITY))
            .clone();
        MemoryHandle { queues }
    }

    pub fn contains(&self, channel: &str) -> bool {
        self.channels.contains_key(channel)
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn payload(value: serde_json::Value) -> Payload {
        crate::payload::from_json(value).expect("object")
    }

    #[test]
    fn test_read_injected_payload() {
        let (transport, handle) = MemoryTransport::new(false);
        handle.inject(payload(json!({"a": 1}))).expect("inject");

        let got = transport
            .read_message(Duration::from_millis(50))
            .expect("read");
        assert_eq!(got, Some(payload(json!({"a": 1}))));

        let none = transport
            .read_message(Duration::from_millis(10))
            .expect("read");
        assert!(none.is_none());
    }

    #[test]
    fn test_write_requires_open() {
        let (transport, handle) = MemoryTransport::new(false);
        assert!(transport.write_message(&payload(json!({"a": 1}))).is_err());

        transport.open().expect("open");
        let reply = transport
            .write_message(&payload(json!({"a": 1})))
            .expect("write");
        assert!(reply.is_none());
        assert_eq!(handle.drain_written().len(), 1);
    }

    #[test]
    fn test_echo_and_queued_reply() {
        let (transport, handle) = MemoryTransport::new(true);
        transport.open().expect("open");

        let reply = transport
            .write_message(&payload(json!({"a": 1})))
            .expect("write");
        assert_eq!(reply, Some(payload(json!({"a": 1}))));

        handle.queue_reply(payload(json!({"ack": true}))).expect("queue");
        let reply = transport
            .write_message(&payload(json!({"a": 2})))
            .expect("write");
        assert_eq!(reply, Some(payload(json!({"ack": true}))));
    }

    #[test]
    fn test_capacity_keeps_latest() {
        let (transport, handle) = MemoryTransport::with_capacity(false, 2);
        transport.open().expect("open");
        for i in 0..4 {
            transport
                .write_message(&payload(json!({"n": i})))
                .expect("write");
        }
        let written = handle.drain_written();
        assert_eq!(written, vec![payload(json!({"n": 2})), payload(json!({"n": 3}))]);
    }

    #[test]
    fn test_reset_drops_pending_inbound() {
        let (transport, handle) = MemoryTransport::new(false);
        handle.inject(payload(json!({"a": 1}))).expect("inject");
        assert_eq!(handle.pending_inbound(), 1);
        transport.reset().expect("reset");
        assert_eq!(handle.pending_inbound(), 0);
    }

    #[test]
    fn test_hub_shares_named_channel() {
        let hub = MemoryHub::new();
        let writer = hub.transport("bus", false, 8);
        let handle = hub.handle("bus");
        assert_eq!(hub.len(), 1);

        writer.open().expect("open");
        writer
            .write_message(&payload(json!({"x": 1})))
            .expect("write");
        assert_eq!(
            handle.written_timeout(Duration::from_millis(50)),
            Some(payload(json!({"x": 1})))
        );
    }
}
