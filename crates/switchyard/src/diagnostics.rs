// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Diagnostic channel for dropped and failed payloads.
//!
//! Every failure that does not stop a receive loop (unidentified payloads,
//! transformation failures, failed writes, listener faults) is reported as a
//! [`Diagnostic`] to a [`DiagnosticSink`]. The default sink logs through
//! `tracing`; [`ChannelSink`] hands diagnostics to another thread and
//! [`FanoutSink`] combines several sinks.

use crate::error::ErrorKind;
use crate::payload::{self, Payload};
use chrono::{DateTime, Utc};
use crossbeam::channel::{self, Receiver, Sender};
use serde::Serialize;
use std::sync::Arc;

/// One operator-facing failure report.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Diagnostic {
    pub kind: ErrorKind,
    /// Connection the payload arrived on (or the failing connection).
    pub source_connection: String,
    /// Mapping involved, if identification got that far.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mapping_id: Option<String>,
    /// Raw payload involved, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<Payload>,
    pub detail: String,
    pub at: DateTime<Utc>,
}

impl Diagnostic {
    pub fn new(kind: ErrorKind, source_connection: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            kind,
            source_connection: source_connection.into(),
            mapping_id: None,
            payload: None,
            detail: detail.into(),
            at: Utc::now(),
        }
    }

    pub fn with_mapping(mut self, mapping_id: impl Into<String>) -> Self {
        self.mapping_id = Some(mapping_id.into());
        self
    }

    pub fn with_payload(mut self, payload: &Payload) -> Self {
        self.payload = Some(payload.clone());
        self
    }
}

/// Receiver of diagnostics.
pub trait DiagnosticSink: Send + Sync {
    fn report(&self, diagnostic: Diagnostic);
}

/// Logs diagnostics at `warn` level.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl DiagnosticSink for TracingSink {
    fn report(&self, diagnostic: Diagnostic) {
        let payload = diagnostic
            .payload
            .as_ref()
            .map(|p| payload::summarize(p, 256))
            .unwrap_or_default();
        tracing::warn!(
            kind = diagnostic.kind.as_str(),
            source = %diagnostic.source_connection,
            mapping = diagnostic.mapping_id.as_deref().unwrap_or("-"),
            payload = %payload,
            "{}",
            diagnostic.detail
        );
    }
}

/// Forwards diagnostics to a crossbeam channel.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: Sender<Diagnostic>,
}

impl ChannelSink {
    /// Create a sink and the receiving end of its unbounded channel.
    pub fn new() -> (Self, Receiver<Diagnostic>) {
        let (tx, rx) = channel::unbounded();
        (Self { tx }, rx)
    }
}

impl DiagnosticSink for ChannelSink {
    fn report(&self, diagnostic: Diagnostic) {
        // Receiver gone means nobody is watching anymore.
        let _ = self.tx.send(diagnostic);
    }
}

/// Delivers each diagnostic to every inner sink, in order.
#[derive(Default, Clone)]
pub struct FanoutSink {
    sinks: Vec<Arc<dyn DiagnosticSink>>,
}

impl FanoutSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: Arc<dyn DiagnosticSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn push(&mut self, sink: Arc<dyn DiagnosticSink>) {
        self.sinks.push(sink);
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

impl DiagnosticSink for FanoutSink {
    fn report(&self, diagnostic: Diagnostic) {
        if let Some((last, rest)) = self.sinks.split_last() {
            for sink in rest {
                sink.report(diagnostic.clone());
            }
            last.report(diagnostic);
        }
    }
}
