// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Transport contract and built-in transports.
//!
//! A [`Transport`] supplies the raw primitives of one connection. Mode
//! gating, state tracking and the listener loop live in
//! [`Connection`](crate::connection::Connection), so implementers only deal
//! with their own I/O.
//!
//! # Built-in transports
//!
//! - [`memory`]: in-process channels, used for tests and for wiring
//!   instances together inside one process.
//! - [`jsonl`]: newline-delimited JSON files.

pub mod jsonl;
pub mod memory;

pub use jsonl::JsonlTransport;
pub use memory::{MemoryHandle, MemoryHub, MemoryTransport};

use crate::error::TransportError;
use crate::payload::Payload;
use std::time::Duration;

/// Raw I/O primitives of one connection.
///
/// # Thread Safety
/// `read_message` is called from the connection's listener thread while
/// `write_message` may be called concurrently from dispatch threads.
pub trait Transport: Send + Sync {
    /// Acquire the underlying resource.
    fn open(&self) -> Result<(), TransportError>;

    /// Release the underlying resource.
    fn close(&self) -> Result<(), TransportError>;

    /// Suspend delivery. Default: nothing to do.
    fn pause(&self) -> Result<(), TransportError> {
        Ok(())
    }

    /// Drop pending state so the next `open` starts clean. Default: nothing to do.
    fn reset(&self) -> Result<(), TransportError> {
        Ok(())
    }

    /// Wait up to `timeout` for the next inbound payload.
    ///
    /// `Ok(None)` means nothing arrived in time.
    fn read_message(&self, timeout: Duration) -> Result<Option<Payload>, TransportError>;

    /// Write one payload, optionally returning a reply payload.
    fn write_message(&self, payload: &Payload) -> Result<Option<Payload>, TransportError>;

    /// Short transport name for logs.
    fn kind(&self) -> &'static str;
}
