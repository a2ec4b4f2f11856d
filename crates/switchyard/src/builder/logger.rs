// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Logger mappings: routing diagnostics like payloads.
//!
//! Each diagnostic becomes a payload with the keys `kind`, `source`,
//! `mapping`, `detail`, `payload` (raw payload as JSON text) and
//! `timestamp` (RFC 3339). Every logger mapping whose `match_on_value`
//! fields accept it is transformed and written to its outputs on the
//! reporting thread. The payload shape is fixed, so match styles are not
//! checked. Failures here are only traced, never reported again.

use super::identify::score;
use super::transform::transform;
use crate::connector::ConnectorSet;
use crate::diagnostics::{Diagnostic, DiagnosticSink};
use crate::mapping::MessageMapping;
use crate::payload::{Payload, Value};
use chrono::Utc;
use std::sync::Arc;

/// Source name used for logger payloads.
pub const LOGGER_SOURCE: &str = "diagnostics";

/// Sink routing diagnostics through logger mappings.
pub struct LoggerSink {
    mappings: Vec<Arc<MessageMapping>>,
    directory: Arc<ConnectorSet>,
}

impl LoggerSink {
    pub fn new(mappings: Vec<Arc<MessageMapping>>, directory: Arc<ConnectorSet>) -> Self {
        Self {
            mappings,
            directory,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.mappings.is_empty()
    }

    /// Payload representation of a diagnostic.
    pub fn to_payload(diagnostic: &Diagnostic) -> Payload {
        let mut payload = Payload::new();
        payload.insert("kind".into(), Value::from(diagnostic.kind.as_str()));
        payload.insert(
            "source".into(),
            Value::from(diagnostic.source_connection.as_str()),
        );
        payload.insert(
            "mapping".into(),
            diagnostic
                .mapping_id
                .as_deref()
                .map(Value::from)
                .unwrap_or(Value::Null),
        );
        payload.insert("detail".into(), Value::from(diagnostic.detail.as_str()));
        let raw = diagnostic
            .payload
            .as_ref()
            .and_then(|p| serde_json::to_string(p).ok())
            .unwrap_or_default();
        payload.insert("payload".into(), Value::String(raw));
        payload.insert("timestamp".into(), Value::String(diagnostic.at.to_rfc3339()));
        payload
    }

    fn route(&self, mapping: &MessageMapping, payload: &Payload) {
        let outcome = transform(mapping, LOGGER_SOURCE, payload, Utc::now());
        for (destination, err) in &outcome.failures {
            tracing::warn!(
                logger = %mapping.message_id,
                destination = %destination,
                "Logger field dropped: {}",
                err
            );
        }

        for output in mapping.outputs() {
            let Some(message) = outcome.message_for(&output.connection_id) else {
                continue;
            };
            let Some(connection) = self.directory.resolve(&output.connection_id) else {
                tracing::warn!(
                    logger = %mapping.message_id,
                    output = %output.connection_id,
                    "Logger output connection does not exist"
                );
                continue;
            };
            if let Err(e) = connection.write(&message.output_payload) {
                tracing::warn!(logger = %mapping.message_id, "Logger write failed: {}", e);
            }
        }
    }
}

impl DiagnosticSink for LoggerSink {
    fn report(&self, diagnostic: Diagnostic) {
        if self.mappings.is_empty() {
            return;
        }
        let payload = Self::to_payload(&diagnostic);
        for mapping in &self.mappings {
            if score(mapping, &payload).is_some() {
                self.route(mapping, &payload);
            }
        }
    }
}
