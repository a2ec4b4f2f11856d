// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Message definitions.
//!
//! A [`MessageMapping`] describes one message: the input it is read from,
//! the per-field rules that turn it into outbound payloads, and the
//! synchronous/asynchronous outputs (with their chained messages) those
//! payloads are written to. The tree is immutable once loaded and shared
//! across connection threads behind `Arc`.

use crate::payload::Value;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Open argument map attached to inputs, outputs and field inputs.
pub type Arguments = BTreeMap<String, Value>;

/// Recognized argument and field-rule keys.
pub mod keys {
    pub const MATCH_STYLE: &str = "match_style";
    pub const MATCH_ON_VALUE: &str = "match_on_value";
    pub const FIELD_KEY: &str = "key";
    pub const FORCE_VALUE: &str = "force_value";
    pub const LENGTH: &str = "length";
    pub const TRUNK: &str = "trunk";
    pub const LPAD: &str = "lpad";
    pub const RPAD: &str = "rpad";
    pub const HEADER: &str = "header";
    pub const FOOTER: &str = "footer";
    pub const TYPE: &str = "type";
    pub const DATE_FORMAT: &str = "dateformat";
}

/// Ordering of an output relative to its siblings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IoMode {
    /// Written in declared order, each write completing before the next.
    Sync,
    /// Written independently, no ordering guarantee.
    #[default]
    Async,
}

/// Role of a mapping in the message tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    /// Root definition, identified against fresh inbound payloads.
    #[default]
    Message,
    /// Fed with the value returned by an output write.
    ReturnMessage,
    /// Fed with the original input after each write attempt of an output.
    FollowMessage,
    /// Fed with the original input after all outputs completed.
    EotMessage,
}

/// How strictly a payload's field set must match the declared fields.
///
/// Names are case-insensitive on input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", try_from = "String")]
pub enum MatchStyle {
    /// Same field set.
    #[default]
    Exact,
    /// Trailing declared fields may be missing.
    Under,
    /// Extra trailing fields may be present.
    Over,
    /// Both missing trailing fields and extra trailing fields are tolerated.
    Any,
}

impl MatchStyle {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Exact => "exact",
            Self::Under => "under",
            Self::Over => "over",
            Self::Any => "any",
        }
    }
}

impl FromStr for MatchStyle {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "exact" => Ok(Self::Exact),
            "under" => Ok(Self::Under),
            "over" => Ok(Self::Over),
            "any" => Ok(Self::Any),
            other => Err(format!("unknown match style '{}'", other)),
        }
    }
}

impl TryFrom<String> for MatchStyle {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl fmt::Display for MatchStyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Side characters are dropped from when a value overflows its length.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TruncateSide {
    /// Drop leading characters.
    Left,
    /// Drop trailing characters.
    Right,
}

/// Target type of a field value on output.
///
/// Names are case-insensitive on input and accept a few common aliases
/// (`int`, `long`, `double`, `number`, `bool`, `timestamp`, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", try_from = "String")]
pub enum TargetType {
    String,
    Integer,
    Float,
    Boolean,
    Date,
    Time,
    DateTime,
}

impl TargetType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Integer => "integer",
            Self::Float => "float",
            Self::Boolean => "boolean",
            Self::Date => "date",
            Self::Time => "time",
            Self::DateTime => "datetime",
        }
    }
}

impl FromStr for TargetType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "string" | "str" | "text" => Ok(Self::String),
            "integer" | "int" | "long" => Ok(Self::Integer),
            "float" | "double" | "number" => Ok(Self::Float),
            "boolean" | "bool" => Ok(Self::Boolean),
            "date" => Ok(Self::Date),
            "time" => Ok(Self::Time),
            "datetime" | "timestamp" => Ok(Self::DateTime),
            other => Err(format!("unknown target type '{}'", other)),
        }
    }
}

impl TryFrom<String> for TargetType {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl fmt::Display for TargetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Transformation rules for one field towards one destination.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OutputFieldConfig {
    /// Key used in the outbound payload (defaults to the field ID).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,

    /// Literal value replacing the input value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub force_value: Option<Value>,

    /// Fixed output length in characters.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub length: Option<usize>,

    /// Side to truncate from when the value is too long.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trunk: Option<TruncateSide>,

    /// Left pad character (first character is used).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lpad: Option<String>,

    /// Right pad character (first character is used).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rpad: Option<String>,

    /// Text prepended after length handling.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub header: Option<String>,

    /// Text appended after length handling.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub footer: Option<String>,

    /// Type the value is coerced to.
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub target_type: Option<TargetType>,

    /// strftime pattern for date/time targets.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dateformat: Option<String>,
}

impl OutputFieldConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn force(mut self, value: impl Into<Value>) -> Self {
        self.force_value = Some(value.into());
        self
    }

    pub fn length(mut self, length: usize) -> Self {
        self.length = Some(length);
        self
    }

    pub fn trunk(mut self, side: TruncateSide) -> Self {
        self.trunk = Some(side);
        self
    }

    pub fn lpad(mut self, pad: impl Into<String>) -> Self {
        self.lpad = Some(pad.into());
        self
    }

    pub fn rpad(mut self, pad: impl Into<String>) -> Self {
        self.rpad = Some(pad.into());
        self
    }

    pub fn header(mut self, header: impl Into<String>) -> Self {
        self.header = Some(header.into());
        self
    }

    pub fn footer(mut self, footer: impl Into<String>) -> Self {
        self.footer = Some(footer.into());
        self
    }

    pub fn target(mut self, target: TargetType) -> Self {
        self.target_type = Some(target);
        self
    }

    pub fn dateformat(mut self, format: impl Into<String>) -> Self {
        self.dateformat = Some(format.into());
        self
    }

    /// First character of the left pad, if configured and non-empty.
    pub fn lpad_char(&self) -> Option<char> {
        self.lpad.as_deref().and_then(|p| p.chars().next())
    }

    /// First character of the right pad, if configured and non-empty.
    pub fn rpad_char(&self) -> Option<char> {
        self.rpad.as_deref().and_then(|p| p.chars().next())
    }
}

/// One input or output endpoint reference inside a mapping.
#[derive(Debug, Clone, PartialEq)]
pub struct MessageIOConfig {
    pub connection_id: String,
    pub mode: IoMode,
    pub arguments: Arguments,
    pub return_messages: Vec<Arc<MessageMapping>>,
    pub follow_messages: Vec<Arc<MessageMapping>>,
    pub eot_messages: Vec<Arc<MessageMapping>>,
}

impl MessageIOConfig {
    /// Create an endpoint reference.
    pub fn new(connection_id: impl Into<String>, mode: IoMode) -> Self {
        Self {
            connection_id: connection_id.into(),
            mode,
            arguments: Arguments::new(),
            return_messages: Vec::new(),
            follow_messages: Vec::new(),
            eot_messages: Vec::new(),
        }
    }

    /// Input reference with the given match style.
    pub fn input(connection_id: impl Into<String>, style: MatchStyle) -> Self {
        Self::new(connection_id, IoMode::Async).argument(keys::MATCH_STYLE, style.as_str())
    }

    pub fn argument(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.arguments.insert(key.into(), value.into());
        self
    }

    pub fn return_message(mut self, mut mapping: MessageMapping) -> Self {
        mapping.message_type = MessageType::ReturnMessage;
        self.return_messages.push(Arc::new(mapping));
        self
    }

    pub fn follow_message(mut self, mut mapping: MessageMapping) -> Self {
        mapping.message_type = MessageType::FollowMessage;
        self.follow_messages.push(Arc::new(mapping));
        self
    }

    pub fn eot_message(mut self, mut mapping: MessageMapping) -> Self {
        mapping.message_type = MessageType::EotMessage;
        self.eot_messages.push(Arc::new(mapping));
        self
    }

    /// Match style declared in the arguments (defaults to exact).
    pub fn match_style(&self) -> MatchStyle {
        self.arguments
            .get(keys::MATCH_STYLE)
            .and_then(Value::as_str)
            .and_then(|s| s.parse().ok())
            .unwrap_or_default()
    }

    /// All chained mappings of this endpoint.
    pub fn chained(&self) -> impl Iterator<Item = &Arc<MessageMapping>> {
        self.return_messages
            .iter()
            .chain(self.follow_messages.iter())
            .chain(self.eot_messages.iter())
    }
}

/// Mapping rule for one logical field.
#[derive(Debug, Clone, PartialEq)]
pub struct MessageFieldConfig {
    pub field_id: String,
    pub input_id: String,
    pub input_arguments: Arguments,
    /// Destination connection ID to rules, in output precedence order.
    pub output_arguments: Vec<(String, OutputFieldConfig)>,
}

impl MessageFieldConfig {
    pub fn new(field_id: impl Into<String>, input_id: impl Into<String>) -> Self {
        Self {
            field_id: field_id.into(),
            input_id: input_id.into(),
            input_arguments: Arguments::new(),
            output_arguments: Vec::new(),
        }
    }

    /// Payload key this field is read from (defaults to the field ID).
    pub fn key(&self) -> &str {
        self.input_arguments
            .get(keys::FIELD_KEY)
            .and_then(Value::as_str)
            .unwrap_or(&self.field_id)
    }

    /// Value the payload must carry for this field to score a match.
    pub fn match_on_value(&self) -> Option<&Value> {
        self.input_arguments.get(keys::MATCH_ON_VALUE)
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.input_arguments
            .insert(keys::FIELD_KEY.to_string(), Value::String(key.into()));
        self
    }

    pub fn with_match_on(mut self, value: impl Into<Value>) -> Self {
        self.input_arguments
            .insert(keys::MATCH_ON_VALUE.to_string(), value.into());
        self
    }

    /// Add (or replace in place) the rules for a destination.
    pub fn with_output(mut self, destination: impl Into<String>, rules: OutputFieldConfig) -> Self {
        let destination = destination.into();
        match self
            .output_arguments
            .iter_mut()
            .find(|(dest, _)| *dest == destination)
        {
            Some(slot) => slot.1 = rules,
            None => self.output_arguments.push((destination, rules)),
        }
        self
    }

    /// Rules for a destination, if any.
    pub fn output_for(&self, destination: &str) -> Option<&OutputFieldConfig> {
        self.output_arguments
            .iter()
            .find(|(dest, _)| dest == destination)
            .map(|(_, rules)| rules)
    }
}

/// One message definition.
#[derive(Debug, Clone, PartialEq)]
pub struct MessageMapping {
    pub message_id: String,
    pub message_type: MessageType,
    pub input: MessageIOConfig,
    pub sync_outputs: Vec<MessageIOConfig>,
    pub async_outputs: Vec<MessageIOConfig>,
    pub fields: Vec<MessageFieldConfig>,
}

impl MessageMapping {
    /// Create a root mapping reading from `input`.
    pub fn new(message_id: impl Into<String>, input: MessageIOConfig) -> Self {
        Self {
            message_id: message_id.into(),
            message_type: MessageType::Message,
            input,
            sync_outputs: Vec::new(),
            async_outputs: Vec::new(),
            fields: Vec::new(),
        }
    }

    pub fn with_field(mut self, field: MessageFieldConfig) -> Self {
        self.fields.push(field);
        self
    }

    /// Add an output; it lands in the sync or async list according to its mode.
    pub fn with_output(mut self, output: MessageIOConfig) -> Self {
        match output.mode {
            IoMode::Sync => self.sync_outputs.push(output),
            IoMode::Async => self.async_outputs.push(output),
        }
        self
    }

    /// Match style of the input.
    pub fn match_style(&self) -> MatchStyle {
        self.input.match_style()
    }

    /// Sync outputs followed by async outputs.
    pub fn outputs(&self) -> impl Iterator<Item = &MessageIOConfig> {
        self.sync_outputs.iter().chain(self.async_outputs.iter())
    }

    /// Declared input keys in field order, without duplicates.
    pub fn declared_keys(&self) -> Vec<&str> {
        let mut seen = HashSet::new();
        self.fields
            .iter()
            .map(MessageFieldConfig::key)
            .filter(|key| seen.insert(*key))
            .collect()
    }

    pub fn uses_as_input(&self, connection_id: &str) -> bool {
        self.input.connection_id == connection_id
    }

    pub fn uses_as_sync_output(&self, connection_id: &str) -> bool {
        self.sync_outputs
            .iter()
            .any(|o| o.connection_id == connection_id)
    }

    pub fn uses_as_async_output(&self, connection_id: &str) -> bool {
        self.async_outputs
            .iter()
            .any(|o| o.connection_id == connection_id)
    }

    /// Every (message ID, connection ID) reference in this mapping and its
    /// chained mappings, depth first.
    pub fn connection_references(&self) -> Vec<(String, String)> {
        let mut refs = Vec::new();
        self.collect_references(&mut refs);
        refs
    }

    fn collect_references(&self, refs: &mut Vec<(String, String)>) {
        refs.push((self.message_id.clone(), self.input.connection_id.clone()));
        for output in self.outputs() {
            refs.push((self.message_id.clone(), output.connection_id.clone()));
            for chained in output.chained() {
                chained.collect_references(refs);
            }
        }
    }
}
