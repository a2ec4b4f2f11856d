// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Field transformation.
//!
//! For each field and each destination in the field's output rules:
//!
//! 1. take the payload value under the field key (or the forced value),
//! 2. pad or truncate to the configured length,
//! 3. add header and footer,
//! 4. coerce to the target type.
//!
//! Lengths count characters, not bytes.

use crate::error::TransformError;
use crate::mapping::{MessageMapping, OutputFieldConfig, TargetType, TruncateSide};
use crate::message::Message;
use crate::payload::{value_text, Payload, Value};
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use std::fmt::Write as _;

pub const DEFAULT_DATE_FORMAT: &str = "%Y-%m-%d";
pub const DEFAULT_TIME_FORMAT: &str = "%H:%M:%S";
pub const DEFAULT_DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Result of transforming one payload with one mapping.
#[derive(Debug, Clone, PartialEq)]
pub struct TransformOutcome {
    /// One message per destination with at least one field, in first-seen order.
    pub messages: Vec<Message>,
    /// Destination and error of every field that failed.
    pub failures: Vec<(String, TransformError)>,
}

impl TransformOutcome {
    pub fn message_for(&self, destination: &str) -> Option<&Message> {
        self.messages.iter().find(|m| m.destination == destination)
    }
}

struct Draft {
    destination: String,
    payload: Payload,
}

/// Transform a payload identified as `mapping`.
///
/// Pure: the same inputs always give the same outcome.
pub fn transform(
    mapping: &MessageMapping,
    source: &str,
    payload: &Payload,
    received_at: DateTime<Utc>,
) -> TransformOutcome {
    let mut drafts: Vec<Draft> = Vec::new();
    let mut failures = Vec::new();

    for field in &mapping.fields {
        for (destination, rules) in &field.output_arguments {
            let index = match drafts.iter().position(|d| d.destination == *destination) {
                Some(index) => index,
                None => {
                    drafts.push(Draft {
                        destination: destination.clone(),
                        payload: Payload::new(),
                    });
                    drafts.len() - 1
                }
            };

            let value = match &rules.force_value {
                Some(forced) => forced.clone(),
                None => match payload.get(field.key()) {
                    Some(value) => value.clone(),
                    None => continue,
                },
            };

            match transform_value(&field.field_id, value, rules) {
                Ok(value) => {
                    let key = rules.key.clone().unwrap_or_else(|| field.field_id.clone());
                    drafts[index].payload.insert(key, value);
                }
                Err(e) => failures.push((destination.clone(), e)),
            }
        }
    }

    let messages = drafts
        .into_iter()
        .filter(|draft| !draft.payload.is_empty())
        .map(|draft| {
            let mut message = Message::new(
                mapping.message_id.clone(),
                source,
                draft.destination,
                received_at,
                payload.clone(),
            );
            message.output_payload = draft.payload;
            message
        })
        .collect();

    TransformOutcome { messages, failures }
}

/// Apply one destination's rules to one value.
pub fn transform_value(
    field: &str,
    value: Value,
    rules: &OutputFieldConfig,
) -> Result<Value, TransformError> {
    let reshaped = rules.length.is_some() || rules.header.is_some() || rules.footer.is_some();

    let value = if reshaped {
        let mut text = value_text(&value);
        if let Some(length) = rules.length {
            if length == 0 {
                return Err(TransformError::InvalidConfig {
                    field: field.to_string(),
                    reason: "length must be greater than zero".into(),
                });
            }
            text = fit_length(&text, length, rules);
        }
        if let Some(header) = &rules.header {
            text.insert_str(0, header);
        }
        if let Some(footer) = &rules.footer {
            text.push_str(footer);
        }
        Value::String(text)
    } else {
        value
    };

    match rules.target_type {
        Some(target) => coerce(field, value, target, rules.dateformat.as_deref()),
        None => Ok(value),
    }
}

/// Pad or truncate `text` to exactly `length` characters.
pub fn fit_length(text: &str, length: usize, rules: &OutputFieldConfig) -> String {
    let count = text.chars().count();
    let lpad = rules.lpad_char();
    let rpad = rules.rpad_char();

    if count < length {
        let missing = length - count;
        let (left, right) = match (lpad, rpad) {
            (Some(l), Some(r)) => {
                let left = missing.div_ceil(2);
                ((l, left), (r, missing - left))
            }
            (Some(l), None) => ((l, missing), (' ', 0)),
            (None, Some(r)) => ((' ', 0), (r, missing)),
            // Truncation alone never lengthens.
            (None, None) if rules.trunk.is_some() => return text.to_string(),
            (None, None) => ((' ', missing), (' ', 0)),
        };

        let mut out = String::with_capacity(text.len() + missing);
        out.extend(std::iter::repeat(left.0).take(left.1));
        out.push_str(text);
        out.extend(std::iter::repeat(right.0).take(right.1));
        out
    } else if count > length {
        let drop_leading = match rules.trunk {
            Some(TruncateSide::Left) => true,
            Some(TruncateSide::Right) => false,
            // Opposite of the preferred pad side.
            None => lpad.is_none() && rpad.is_some(),
        };
        if drop_leading {
            text.chars().skip(count - length).collect()
        } else {
            text.chars().take(length).collect()
        }
    } else {
        text.to_string()
    }
}

fn conversion_error(field: &str, value: &Value, target: TargetType) -> TransformError {
    TransformError::TypeConversion {
        field: field.to_string(),
        value: value.to_string(),
        target: target.as_str().to_string(),
    }
}

/// Coerce a value to the target type.
pub fn coerce(
    field: &str,
    value: Value,
    target: TargetType,
    dateformat: Option<&str>,
) -> Result<Value, TransformError> {
    match target {
        TargetType::String => match value {
            Value::String(_) => Ok(value),
            Value::Number(_) | Value::Bool(_) | Value::Null => Ok(Value::String(value_text(&value))),
            _ => Err(conversion_error(field, &value, target)),
        },
        TargetType::Integer => to_integer(&value)
            .map(Value::from)
            .ok_or_else(|| conversion_error(field, &value, target)),
        TargetType::Float => to_float(&value)
            .and_then(serde_json::Number::from_f64)
            .map(Value::Number)
            .ok_or_else(|| conversion_error(field, &value, target)),
        TargetType::Boolean => to_bool(&value)
            .map(Value::Bool)
            .ok_or_else(|| conversion_error(field, &value, target)),
        TargetType::Date | TargetType::Time | TargetType::DateTime => {
            format_temporal(field, &value, target, dateformat)
        }
    }
}

/// `i64::MIN as f64` is exact; `i64::MAX as f64` rounds up to 2^63.
const I64_FLOAT_MIN: f64 = -9_223_372_036_854_775_808.0;
const I64_FLOAT_END: f64 = 9_223_372_036_854_775_808.0;

fn integral_float(f: f64) -> Option<i64> {
    (f.is_finite() && f.fract() == 0.0 && f >= I64_FLOAT_MIN && f < I64_FLOAT_END)
        .then_some(f as i64)
}

fn to_integer(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().and_then(integral_float)),
        Value::String(s) => {
            let s = s.trim();
            s.parse::<i64>()
                .ok()
                .or_else(|| s.parse::<f64>().ok().and_then(integral_float))
        }
        Value::Bool(b) => Some(i64::from(*b)),
        _ => None,
    }
}

fn to_float(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|f| f.is_finite()),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    }
}

fn to_bool(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => match n.as_i64() {
            Some(0) => Some(false),
            Some(1) => Some(true),
            _ => None,
        },
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "yes" | "y" | "1" => Some(true),
            "false" | "no" | "n" | "0" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

enum Temporal {
    Stamp(DateTime<chrono::FixedOffset>),
    DateTime(NaiveDateTime),
    Date(NaiveDate),
    Time(NaiveTime),
}

fn parse_temporal(text: &str, format: &str) -> Option<Temporal> {
    if let Ok(stamp) = DateTime::parse_from_rfc3339(text) {
        return Some(Temporal::Stamp(stamp));
    }
    for fmt in [format, DEFAULT_DATETIME_FORMAT, "%Y-%m-%dT%H:%M:%S"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(text, fmt) {
            return Some(Temporal::DateTime(dt));
        }
    }
    for fmt in [format, DEFAULT_DATE_FORMAT] {
        if let Ok(date) = NaiveDate::parse_from_str(text, fmt) {
            return Some(Temporal::Date(date));
        }
    }
    for fmt in [format, DEFAULT_TIME_FORMAT] {
        if let Ok(time) = NaiveTime::parse_from_str(text, fmt) {
            return Some(Temporal::Time(time));
        }
    }
    None
}

fn format_temporal(
    field: &str,
    value: &Value,
    target: TargetType,
    dateformat: Option<&str>,
) -> Result<Value, TransformError> {
    let format = dateformat.unwrap_or(match target {
        TargetType::Date => DEFAULT_DATE_FORMAT,
        TargetType::Time => DEFAULT_TIME_FORMAT,
        _ => DEFAULT_DATETIME_FORMAT,
    });

    let parsed = match value {
        Value::Number(n) => n
            .as_i64()
            .and_then(DateTime::<Utc>::from_timestamp_millis)
            .map(|dt| Temporal::Stamp(dt.fixed_offset())),
        Value::String(s) => parse_temporal(s.trim(), format),
        _ => None,
    };
    let parsed = parsed.ok_or_else(|| conversion_error(field, value, target))?;

    let mut out = String::new();
    let written = match &parsed {
        Temporal::Stamp(dt) => write!(out, "{}", dt.format(format)),
        Temporal::DateTime(dt) => write!(out, "{}", dt.format(format)),
        Temporal::Date(d) => write!(out, "{}", d.format(format)),
        Temporal::Time(t) => write!(out, "{}", t.format(format)),
    };
    written.map_err(|_| TransformError::InvalidConfig {
        field: field.to_string(),
        reason: format!("date format '{}' does not apply to {}", format, value),
    })?;
    Ok(Value::String(out))
}
