// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Output dispatch and message chaining.
//!
//! Order of work for one mapping invocation:
//!
//! 1. asynchronous outputs are queued on the builder's worker pool,
//! 2. synchronous outputs are written on the calling thread, in order,
//! 3. after each write, return messages (fed with the write's reply) and
//!    follow messages (fed with the original payload) are queued on the pool,
//! 4. once every synchronous write returned and every asynchronous write
//!    finished, EOT messages are queued with the original payload.
//!
//! Chained mappings do not compete: each one that qualifies runs.

use super::identify::qualify;
use super::pool::Latch;
use super::transform::transform;
use super::{BuilderShared, MAX_CHAIN_DEPTH};
use crate::diagnostics::Diagnostic;
use crate::error::ErrorKind;
use crate::mapping::{MessageIOConfig, MessageMapping};
use crate::message::Message;
use crate::payload::Payload;
use chrono::Utc;
use std::sync::Arc;

/// Transform `payload` as `mapping` and write the results.
pub(crate) fn dispatch(
    shared: &Arc<BuilderShared>,
    mapping: &Arc<MessageMapping>,
    source: &str,
    payload: &Payload,
    depth: usize,
) {
    let outcome = transform(mapping, source, payload, Utc::now());

    for (destination, err) in &outcome.failures {
        shared.stats.record_transform_failure();
        shared.sink.report(
            Diagnostic::new(
                err.kind(),
                source,
                format!("destination '{}': {}", destination, err),
            )
            .with_mapping(&mapping.message_id)
            .with_payload(payload),
        );
    }

    let message_for = |output: &MessageIOConfig| -> Option<Message> {
        let found = outcome.message_for(&output.connection_id).cloned();
        if found.is_none() {
            tracing::debug!(
                mapping = %mapping.message_id,
                output = %output.connection_id,
                "no fields for output, absorbed"
            );
        }
        found
    };

    let async_messages: Vec<(MessageIOConfig, Message)> = mapping
        .async_outputs
        .iter()
        .filter_map(|output| message_for(output).map(|message| (output.clone(), message)))
        .collect();

    let eot: Vec<Arc<MessageMapping>> = mapping
        .outputs()
        .flat_map(|output| output.eot_messages.iter().cloned())
        .collect();

    // One party per async write plus this thread once the sync writes are done.
    let latch = (!eot.is_empty()).then(|| {
        let eot_shared = Arc::clone(shared);
        let original = payload.clone();
        let eot_source = source.to_string();
        Arc::new(Latch::new(async_messages.len() + 1, move || {
            run_chained(&eot_shared, &eot, &eot_source, &original, depth + 1);
        }))
    });

    for (output, message) in async_messages {
        let job_shared = Arc::clone(shared);
        let job_latch = latch.clone();
        let original = payload.clone();
        shared.pool.submit(move || {
            write_output(&job_shared, &output, message, &original, depth);
            if let Some(latch) = job_latch {
                arrive(&job_shared, &latch);
            }
        });
    }

    for output in &mapping.sync_outputs {
        if let Some(message) = message_for(output) {
            write_output(shared, output, message, payload, depth);
        }
    }

    if let Some(latch) = latch {
        arrive(shared, &latch);
    }
}

/// Arrive at an EOT latch; the last party queues the EOT messages.
fn arrive(shared: &Arc<BuilderShared>, latch: &Latch) {
    if let Some(eot) = latch.arrive() {
        shared.pool.submit(eot);
    }
}

/// Write one message to its output and start the output's chains.
fn write_output(
    shared: &Arc<BuilderShared>,
    output: &MessageIOConfig,
    mut message: Message,
    original: &Payload,
    depth: usize,
) {
    message.transaction_id = Some(shared.next_transaction());

    let reply = match shared.directory.resolve(&output.connection_id) {
        None => {
            shared.stats.record_write_failure();
            shared.sink.report(
                Diagnostic::new(
                    ErrorKind::ConfigurationResolutionFailure,
                    message.source.clone(),
                    format!("output connection '{}' does not exist", output.connection_id),
                )
                .with_mapping(&message.message_id)
                .with_payload(original),
            );
            None
        }
        Some(connection) => match connection.write(&message.output_payload) {
            Ok(reply) => {
                message.mark_sent();
                shared.stats.record_dispatched();
                tracing::debug!(
                    transaction = message.transaction_id.unwrap_or_default(),
                    mapping = %message.message_id,
                    destination = %message.destination,
                    "message written"
                );
                reply
            }
            Err(e) => {
                shared.stats.record_write_failure();
                shared.sink.report(
                    Diagnostic::new(e.kind(), message.source.clone(), e.to_string())
                        .with_mapping(&message.message_id)
                        .with_payload(original),
                );
                None
            }
        },
    };

    let returns = match reply {
        Some(reply) if !output.return_messages.is_empty() => Some(reply),
        _ => None,
    };
    if returns.is_none() && output.follow_messages.is_empty() {
        return;
    }

    let chain_shared = Arc::clone(shared);
    let return_messages = output.return_messages.clone();
    let follow_messages = output.follow_messages.clone();
    let return_source = output.connection_id.clone();
    let follow_source = message.source;
    let original = original.clone();

    shared.pool.submit(move || {
        if let Some(reply) = returns {
            run_chained(&chain_shared, &return_messages, &return_source, &reply, depth + 1);
        }
        run_chained(&chain_shared, &follow_messages, &follow_source, &original, depth + 1);
    });
}

/// Run every qualifying chained mapping.
fn run_chained(
    shared: &Arc<BuilderShared>,
    mappings: &[Arc<MessageMapping>],
    source: &str,
    payload: &Payload,
    depth: usize,
) {
    if mappings.is_empty() {
        return;
    }
    if depth > MAX_CHAIN_DEPTH {
        shared.sink.report(
            Diagnostic::new(
                ErrorKind::ConfigurationResolutionFailure,
                source,
                format!("message chain deeper than {} levels, dropped", MAX_CHAIN_DEPTH),
            )
            .with_payload(payload),
        );
        return;
    }

    for mapping in mappings {
        if qualify(mapping, payload).is_some() {
            dispatch(shared, mapping, source, payload, depth);
        } else {
            tracing::debug!(
                mapping = %mapping.message_id,
                type_ = ?mapping.message_type,
                "chained mapping does not apply"
            );
        }
    }
}
