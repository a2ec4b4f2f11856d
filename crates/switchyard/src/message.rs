// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Materialized outbound messages.

use crate::payload::Payload;
use chrono::{DateTime, Utc};
use serde::Serialize;

/// One transformed payload bound for one destination connection.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Message {
    /// Sequence assigned by the builder when the message is dispatched.
    pub transaction_id: Option<u64>,
    /// ID of the mapping that produced this message.
    pub message_id: String,
    /// Connection the input payload arrived on.
    pub source: String,
    /// Destination connection ID.
    pub destination: String,
    pub received_at: DateTime<Utc>,
    pub sent_at: Option<DateTime<Utc>>,
    /// Payload as received.
    pub input_payload: Payload,
    /// Payload after field transformation.
    pub output_payload: Payload,
}

impl Message {
    pub fn new(
        message_id: impl Into<String>,
        source: impl Into<String>,
        destination: impl Into<String>,
        received_at: DateTime<Utc>,
        input_payload: Payload,
    ) -> Self {
        Self {
            transaction_id: None,
            message_id: message_id.into(),
            source: source.into(),
            destination: destination.into(),
            received_at,
            sent_at: None,
            input_payload,
            output_payload: Payload::new(),
        }
    }

    /// Record the send time.
    pub fn mark_sent(&mut self) {
        self.sent_at = Some(Utc::now());
    }

    /// Time between reception and send, when sent.
    pub fn latency(&self) -> Option<chrono::Duration> {
        self.sent_at.map(|sent| sent - self.received_at)
    }
}
