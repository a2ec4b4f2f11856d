// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! The message builder: identification, transformation and dispatch.
//!
//! A [`MessageBuilder`] subscribes to input connections. For each payload it
//! picks the best mapping among the connection's input routes, transforms
//! the payload into one message per destination and writes the messages to
//! the mapping's outputs, running chained mappings as writes complete.
//!
//! Identification, transformation and synchronous writes run on the thread
//! that delivered the payload, so payloads of one connection are handled in
//! arrival order. Asynchronous writes and chained messages run on a fixed
//! pool of `sy-worker-*` threads owned by the builder.

pub mod dispatch;
pub mod identify;
pub mod logger;
pub mod pool;
pub mod transform;

pub use identify::{identify, qualify, score, shape_matches};
pub use logger::LoggerSink;
pub use pool::DEFAULT_WORKERS;
pub use transform::{transform, transform_value, TransformOutcome};

use crate::connection::{Connection, PayloadSubscriber};
use crate::connector::ConnectorSet;
use crate::diagnostics::{Diagnostic, DiagnosticSink};
use crate::error::ErrorKind;
use crate::mapping::MessageMapping;
use crate::payload::Payload;
use crate::stats::RoutingStats;
use pool::WorkerPool;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Deepest allowed nesting of return/follow/EOT chains.
pub const MAX_CHAIN_DEPTH: usize = 16;

pub(crate) struct BuilderShared {
    pub(crate) directory: Arc<ConnectorSet>,
    pub(crate) sink: Arc<dyn DiagnosticSink>,
    pub(crate) stats: Arc<RoutingStats>,
    pub(crate) pool: WorkerPool,
    next_transaction: AtomicU64,
}

impl BuilderShared {
    pub(crate) fn next_transaction(&self) -> u64 {
        self.next_transaction.fetch_add(1, Ordering::Relaxed) + 1
    }
}

/// Identifies, transforms and dispatches payloads of one routing instance.
#[derive(Clone)]
pub struct MessageBuilder {
    shared: Arc<BuilderShared>,
}

impl MessageBuilder {
    /// `directory` resolves output connection IDs at dispatch time.
    pub fn new(
        directory: Arc<ConnectorSet>,
        sink: Arc<dyn DiagnosticSink>,
        stats: Arc<RoutingStats>,
    ) -> Self {
        Self::with_workers(directory, sink, stats, DEFAULT_WORKERS)
    }

    /// Like [`MessageBuilder::new`] with `workers` dispatch threads.
    pub fn with_workers(
        directory: Arc<ConnectorSet>,
        sink: Arc<dyn DiagnosticSink>,
        stats: Arc<RoutingStats>,
        workers: usize,
    ) -> Self {
        Self {
            shared: Arc::new(BuilderShared {
                directory,
                sink,
                stats,
                pool: WorkerPool::new(workers),
                next_transaction: AtomicU64::new(0),
            }),
        }
    }

    /// Dispatch worker threads running.
    pub fn workers(&self) -> usize {
        self.shared.pool.workers()
    }

    pub fn stats(&self) -> &Arc<RoutingStats> {
        &self.shared.stats
    }

    /// Handle one payload read from `source`.
    ///
    /// Returns the ID of the mapping it was identified as, or `None` when it
    /// was dropped (a diagnostic is reported).
    pub fn handle_payload(
        &self,
        source: &str,
        candidates: &[Arc<MessageMapping>],
        payload: &Payload,
    ) -> Option<String> {
        let stats = &self.shared.stats;
        stats.record_received();

        let Some(mapping) = identify(candidates, payload) else {
            stats.record_unidentified();
            self.shared.sink.report(
                Diagnostic::new(
                    ErrorKind::IdentificationFailure,
                    source,
                    format!("No mapping matched among {} candidate(s)", candidates.len()),
                )
                .with_payload(payload),
            );
            return None;
        };

        stats.record_identified();
        tracing::debug!(source = %source, mapping = %mapping.message_id, "payload identified");
        dispatch::dispatch(&self.shared, mapping, source, payload, 0);
        Some(mapping.message_id.clone())
    }

    /// Transform and dispatch `payload` as `mapping`, skipping identification.
    pub fn process(&self, mapping: &Arc<MessageMapping>, source: &str, payload: &Payload) {
        dispatch::dispatch(&self.shared, mapping, source, payload, 0);
    }
}

impl PayloadSubscriber for MessageBuilder {
    fn on_payload(&self, source: &Connection, payload: &Payload) {
        let routes = source.routes();
        self.handle_payload(source.id(), &routes.inputs, payload);
    }
}
