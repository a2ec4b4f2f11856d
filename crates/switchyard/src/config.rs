// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Service configuration.
//!
//! Loaded from TOML. A configuration holds routing instances, each with its
//! connectors (and their connections), message definitions and logger
//! definitions. Message definitions convert into [`MessageMapping`] trees.

use crate::connection::ConnectionMode;
use crate::error::{ConnectionError, ErrorKind};
use crate::mapping::{
    keys, Arguments, IoMode, MatchStyle, MessageFieldConfig, MessageIOConfig, MessageMapping,
    MessageType, OutputFieldConfig,
};
use crate::payload::Value;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

/// Accepted shape of instance, connector and connection IDs.
pub const ID_PATTERN: &str = r"^[A-Za-z0-9_.:-]+$";

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Unknown {category} type '{name}'")]
    UnknownType { category: &'static str, name: String },

    #[error("Message '{message}' references unknown connection '{connection}'")]
    UnresolvedConnection { message: String, connection: String },

    #[error("{0}")]
    Connection(#[from] ConnectionError),
}

impl ConfigError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Connection(err) => err.kind(),
            _ => ErrorKind::ConfigurationResolutionFailure,
        }
    }
}

/// Example configuration written by `switchyard gen-config`.
pub const EXAMPLE_CONFIG: &str = r#"# switchyard configuration
log_level = "info"
enable_stats = true
stats_interval_secs = 10

[[instances]]
id = "payments"

[[instances.connectors]]
id = "files"
type = "direct"

[[instances.connectors.connections]]
id = "incoming"
type = "jsonl"
mode = "readonly"
params = { path = "incoming.jsonl" }

[[instances.connectors.connections]]
id = "ledger"
type = "jsonl"
mode = "writeonly"
params = { output = "ledger.jsonl" }

[[instances.connectors.connections]]
id = "errors"
type = "jsonl"
mode = "writeonly"
params = { output = "errors.jsonl" }

[[instances.connectors]]
id = "local"

[[instances.connectors.connections]]
id = "audit"
type = "memory"
mode = "writeonly"
params = { capacity = 256 }

# Transfers: {"type": "TRANSFER", "amt": 5, "ref": "A1"}
[[instances.messages]]
id = "transfer"
input = { connection = "incoming", match_style = "exact" }

[[instances.messages.fields]]
id = "type"
input = { match_on_value = "TRANSFER" }

[[instances.messages.fields.outputs]]
connection = "audit"

[[instances.messages.fields]]
id = "amount"
input = { key = "amt" }

[[instances.messages.fields.outputs]]
connection = "ledger"
length = 10
lpad = "0"

[[instances.messages.fields.outputs]]
connection = "audit"
type = "float"

[[instances.messages.fields]]
id = "reference"
input = { key = "ref" }

[[instances.messages.fields.outputs]]
connection = "ledger"
header = "TXN-"

[[instances.messages.outputs]]
connection = "ledger"
mode = "sync"

[[instances.messages.outputs.follow_messages]]
id = "transfer-ack"
input = { connection = "incoming", match_style = "any" }

[[instances.messages.outputs.follow_messages.fields]]
id = "type"

[[instances.messages.outputs.follow_messages.fields.outputs]]
connection = "audit"
key = "ack"
force_value = "LEDGER-WRITTEN"

[[instances.messages.outputs.follow_messages.outputs]]
connection = "audit"
mode = "sync"

[[instances.messages.outputs]]
connection = "audit"
mode = "async"

# Every diagnostic goes to errors.jsonl
[[instances.loggers]]
id = "all-errors"
input = { connection = "diagnostics" }

[[instances.loggers.fields]]
id = "kind"

[[instances.loggers.fields.outputs]]
connection = "errors"

[[instances.loggers.fields]]
id = "source"

[[instances.loggers.fields.outputs]]
connection = "errors"

[[instances.loggers.fields]]
id = "detail"

[[instances.loggers.fields.outputs]]
connection = "errors"

[[instances.loggers.fields]]
id = "timestamp"

[[instances.loggers.fields.outputs]]
connection = "errors"
key = "at"

[[instances.loggers.outputs]]
connection = "errors"
mode = "sync"
"#;

/// Service configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterConfig {
    /// Log level.
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Enable statistics collection.
    #[serde(default = "default_true")]
    pub enable_stats: bool,

    /// Statistics reporting interval (seconds, 0 disables).
    #[serde(default = "default_stats_interval")]
    pub stats_interval_secs: u64,

    /// Routing instances.
    #[serde(default)]
    pub instances: Vec<InstanceConfig>,
}

fn default_true() -> bool {
    true
}

fn default_stats_interval() -> u64 {
    10
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_connector_type() -> String {
    "direct".to_string()
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            enable_stats: true,
            stats_interval_secs: default_stats_interval(),
            instances: Vec::new(),
        }
    }
}

impl RouterConfig {
    /// Load and validate configuration from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Parse and validate configuration text.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// The configuration written by `gen-config`.
    pub fn example() -> Result<Self, ConfigError> {
        Self::parse(EXAMPLE_CONFIG)
    }

    /// Add an instance.
    pub fn add_instance(&mut self, instance: InstanceConfig) {
        self.instances.push(instance);
    }

    /// Validate the configuration.
    ///
    /// Connection references of messages are not checked here; they are
    /// resolved per instance so that one broken instance does not stop the
    /// others (see [`InstanceConfig::check_references`]).
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.instances.is_empty() {
            return Err(ConfigError::Invalid("No instances configured".into()));
        }

        let id_re = Regex::new(ID_PATTERN)
            .map_err(|e| ConfigError::Invalid(format!("ID pattern: {}", e)))?;

        let mut instance_ids = HashSet::new();
        for instance in &self.instances {
            check_id(&id_re, "Instance", &instance.id)?;
            if !instance_ids.insert(instance.id.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "Duplicate instance '{}'",
                    instance.id
                )));
            }
            instance.validate(&id_re)?;
        }
        Ok(())
    }
}

fn check_id(id_re: &Regex, what: &str, id: &str) -> Result<(), ConfigError> {
    if id.is_empty() {
        return Err(ConfigError::Invalid(format!("{} with empty id", what)));
    }
    if !id_re.is_match(id) {
        return Err(ConfigError::Invalid(format!(
            "{} id '{}' must match {}",
            what, id, ID_PATTERN
        )));
    }
    Ok(())
}

/// One routing instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceConfig {
    pub id: String,

    #[serde(default)]
    pub connectors: Vec<ConnectorConfig>,

    #[serde(default)]
    pub messages: Vec<MessageConfig>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub loggers: Vec<MessageConfig>,
}

impl InstanceConfig {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            connectors: Vec::new(),
            messages: Vec::new(),
            loggers: Vec::new(),
        }
    }

    fn validate(&self, id_re: &Regex) -> Result<(), ConfigError> {
        let mut connector_ids = HashSet::new();
        let mut connection_ids = HashSet::new();

        for connector in &self.connectors {
            check_id(id_re, "Connector", &connector.id)?;
            if !connector_ids.insert(connector.id.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "Instance '{}': duplicate connector '{}'",
                    self.id, connector.id
                )));
            }
            if connector.kind.is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "Connector '{}' has empty type",
                    connector.id
                )));
            }

            for connection in &connector.connections {
                check_id(id_re, "Connection", &connection.id)?;
                if !connection_ids.insert(connection.id.as_str()) {
                    return Err(ConfigError::Invalid(format!(
                        "Instance '{}': duplicate connection '{}'",
                        self.id, connection.id
                    )));
                }
                if connection.kind.is_empty() {
                    return Err(ConfigError::Invalid(format!(
                        "Connection '{}' has empty type",
                        connection.id
                    )));
                }
            }
        }

        for message in &self.messages {
            message.validate()?;
        }
        for logger in &self.loggers {
            logger.validate()?;
        }
        Ok(())
    }

    /// IDs of every connection of every connector.
    pub fn connection_ids(&self) -> HashSet<&str> {
        self.connectors
            .iter()
            .flat_map(|c| c.connections.iter().map(|conn| conn.id.as_str()))
            .collect()
    }

    /// Check that every connection named by a message or logger exists.
    ///
    /// Logger inputs are exempt: loggers are fed by diagnostics.
    pub fn check_references(&self) -> Result<(), ConfigError> {
        let known = self.connection_ids();
        let unresolved = |message: &str, connection: &str| ConfigError::UnresolvedConnection {
            message: message.to_string(),
            connection: connection.to_string(),
        };

        for mapping in self.mappings() {
            for (message, connection) in mapping.connection_references() {
                if !known.contains(connection.as_str()) {
                    return Err(unresolved(&message, &connection));
                }
            }
        }

        for logger in self.logger_mappings() {
            for output in logger.outputs() {
                if !known.contains(output.connection_id.as_str()) {
                    return Err(unresolved(&logger.message_id, &output.connection_id));
                }
                for chained in output.chained() {
                    for (message, connection) in chained.connection_references() {
                        if !known.contains(connection.as_str()) {
                            return Err(unresolved(&message, &connection));
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// Message definitions as root mappings.
    pub fn mappings(&self) -> Vec<Arc<MessageMapping>> {
        self.messages
            .iter()
            .map(|m| Arc::new(m.to_mapping(MessageType::Message)))
            .collect()
    }

    /// Logger definitions as mappings.
    pub fn logger_mappings(&self) -> Vec<Arc<MessageMapping>> {
        self.loggers
            .iter()
            .map(|m| Arc::new(m.to_mapping(MessageType::Message)))
            .collect()
    }
}

/// Connector definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectorConfig {
    pub id: String,

    /// Connector type (registry name).
    #[serde(rename = "type", default = "default_connector_type")]
    pub kind: String,

    #[serde(default, skip_serializing_if = "Arguments::is_empty")]
    pub params: Arguments,

    #[serde(default)]
    pub connections: Vec<ConnectionConfig>,
}

/// Connection definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    pub id: String,

    /// Transport type (registry name).
    #[serde(rename = "type")]
    pub kind: String,

    #[serde(default)]
    pub mode: ConnectionMode,

    #[serde(default, skip_serializing_if = "Arguments::is_empty")]
    pub params: Arguments,
}

/// Message (or logger) definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageConfig {
    pub id: String,

    pub input: InputConfig,

    #[serde(default)]
    pub fields: Vec<FieldConfig>,

    #[serde(default)]
    pub outputs: Vec<OutputConfig>,
}

/// Input of a message definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputConfig {
    pub connection: String,

    #[serde(default)]
    pub match_style: MatchStyle,

    /// Extra arguments.
    #[serde(flatten)]
    pub extra: Arguments,
}

/// Output of a message definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    pub connection: String,

    #[serde(default)]
    pub mode: IoMode,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub return_messages: Vec<MessageConfig>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub follow_messages: Vec<MessageConfig>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub eot_messages: Vec<MessageConfig>,

    /// Extra arguments.
    #[serde(flatten)]
    pub extra: Arguments,
}

/// Field definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldConfig {
    pub id: String,

    #[serde(default)]
    pub input: FieldInputConfig,

    #[serde(default)]
    pub outputs: Vec<FieldOutputConfig>,
}

/// How a field is read from the input payload.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FieldInputConfig {
    /// Input connection (defaults to the message input).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection: Option<String>,

    /// Payload key (defaults to the field id).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub match_on_value: Option<Value>,

    /// Extra arguments.
    #[serde(flatten)]
    pub extra: Arguments,
}

/// Transformation rules of a field for one destination.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldOutputConfig {
    pub connection: String,

    #[serde(flatten)]
    pub rules: OutputFieldConfig,
}

impl MessageConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.id.is_empty() {
            return Err(ConfigError::Invalid("Message with empty id".into()));
        }
        if self.input.connection.is_empty() {
            return Err(ConfigError::Invalid(format!(
                "Message '{}' has empty input connection",
                self.id
            )));
        }

        for field in &self.fields {
            if field.id.is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "Message '{}' has a field with empty id",
                    self.id
                )));
            }
            for output in &field.outputs {
                validate_field_output(&self.id, &field.id, output)?;
            }
        }

        for output in &self.outputs {
            if output.connection.is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "Message '{}' has an output with empty connection",
                    self.id
                )));
            }
            for chained in output
                .return_messages
                .iter()
                .chain(&output.follow_messages)
                .chain(&output.eot_messages)
            {
                chained.validate()?;
            }
        }
        Ok(())
    }

    /// Convert into a mapping of the given type, chained messages included.
    ///
    /// Fields bound to another input connection are left out.
    pub fn to_mapping(&self, message_type: MessageType) -> MessageMapping {
        let input_connection = self.input.connection.clone();

        let mut input_arguments = self.input.extra.clone();
        input_arguments.insert(
            keys::MATCH_STYLE.to_string(),
            Value::from(self.input.match_style.as_str()),
        );
        let mut input = MessageIOConfig::new(input_connection.clone(), IoMode::Async);
        input.arguments = input_arguments;

        let mut mapping = MessageMapping::new(self.id.clone(), input);
        mapping.message_type = message_type;

        for field in &self.fields {
            let field_input = field
                .input
                .connection
                .clone()
                .unwrap_or_else(|| input_connection.clone());
            if field_input != input_connection {
                continue;
            }

            let mut config = MessageFieldConfig::new(field.id.clone(), field_input);
            config.input_arguments = field.input.extra.clone();
            if let Some(key) = &field.input.key {
                config = config.with_key(key.clone());
            }
            if let Some(value) = &field.input.match_on_value {
                config = config.with_match_on(value.clone());
            }
            for output in &field.outputs {
                config = config.with_output(output.connection.clone(), output.rules.clone());
            }
            mapping.fields.push(config);
        }

        for output in &self.outputs {
            let chain = |messages: &[MessageConfig], kind: MessageType| -> Vec<Arc<MessageMapping>> {
                messages
                    .iter()
                    .map(|m| Arc::new(m.to_mapping(kind)))
                    .collect()
            };
            let mut io = MessageIOConfig::new(output.connection.clone(), output.mode);
            io.arguments = output.extra.clone();
            io.return_messages = chain(&output.return_messages, MessageType::ReturnMessage);
            io.follow_messages = chain(&output.follow_messages, MessageType::FollowMessage);
            io.eot_messages = chain(&output.eot_messages, MessageType::EotMessage);
            mapping = mapping.with_output(io);
        }

        mapping
    }
}

fn validate_field_output(
    message: &str,
    field: &str,
    output: &FieldOutputConfig,
) -> Result<(), ConfigError> {
    let invalid = |reason: &str| {
        ConfigError::Invalid(format!(
            "Message '{}', field '{}', output '{}': {}",
            message, field, output.connection, reason
        ))
    };

    if output.connection.is_empty() {
        return Err(invalid("empty connection"));
    }
    let rules = &output.rules;
    if rules.length == Some(0) {
        return Err(invalid("length must be greater than zero"));
    }
    if rules.lpad.as_deref() == Some("") {
        return Err(invalid("lpad must not be empty"));
    }
    if rules.rpad.as_deref() == Some("") {
        return Err(invalid("rpad must not be empty"));
    }
    if rules.dateformat.as_deref() == Some("") {
        return Err(invalid("dateformat must not be empty"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::{TargetType, TruncateSide};
    use serde_json::json;
    use std::io::Write;

    const MINIMAL: &str = r#"
[[instances]]
id = "main"

[[instances.connectors]]
id = "mem"

[[instances.connectors.connections]]
id = "in"
type = "memory"

[[instances.connectors.connections]]
id = "out"
type = "memory"
mode = "writeonly"

[[instances.messages]]
id = "m1"
input = { connection = "in", match_style = "over", priority = 3 }

[[instances.messages.fields]]
id = "type"
input = { match_on_value = "A" }

[[instances.messages.fields]]
id = "amount"
input = { key = "amt" }

[[instances.messages.fields.outputs]]
connection = "out"
length = 4
lpad = "0"
trunk = "left"
type = "Integer"

[[instances.messages.outputs]]
connection = "out"
mode = "sync"
"#;

    #[test]
    fn test_defaults() {
        let config = RouterConfig::parse(MINIMAL).expect("parse");
        assert_eq!(config.log_level, "info");
        assert!(config.enable_stats);
        assert_eq!(config.stats_interval_secs, 10);

        let instance = &config.instances[0];
        assert_eq!(instance.connectors[0].kind, "direct");
        assert_eq!(instance.connectors[0].connections[0].mode, ConnectionMode::ReadWrite);
        assert_eq!(instance.connectors[0].connections[1].mode, ConnectionMode::WriteOnly);
    }

    #[test]
    fn test_to_mapping() {
        let config = RouterConfig::parse(MINIMAL).expect("parse");
        let mappings = config.instances[0].mappings();
        assert_eq!(mappings.len(), 1);

        let mapping = &mappings[0];
        assert_eq!(mapping.message_id, "m1");
        assert_eq!(mapping.match_style(), MatchStyle::Over);
        assert_eq!(mapping.input.arguments.get("priority"), Some(&json!(3)));
        assert_eq!(mapping.declared_keys(), vec!["type", "amt"]);
        assert_eq!(mapping.fields[0].match_on_value(), Some(&json!("A")));
        assert_eq!(mapping.sync_outputs.len(), 1);
        assert!(mapping.async_outputs.is_empty());

        let rules = mapping.fields[1].output_for("out").expect("rules");
        assert_eq!(rules.length, Some(4));
        assert_eq!(rules.lpad.as_deref(), Some("0"));
        assert_eq!(rules.trunk, Some(TruncateSide::Left));
        assert_eq!(rules.target_type, Some(TargetType::Integer));
    }

    #[test]
    fn test_type_and_style_names_any_case() {
        let shouty = MINIMAL
            .replace("match_style = \"over\"", "match_style = \"Exact\"")
            .replace("type = \"Integer\"", "type = \"INTEGER\"");
        let config = RouterConfig::parse(&shouty).expect("parse");
        let mapping = &config.instances[0].mappings()[0];
        assert_eq!(mapping.match_style(), MatchStyle::Exact);
        let rules = mapping.fields[1].output_for("out").expect("rules");
        assert_eq!(rules.target_type, Some(TargetType::Integer));

        let unknown = MINIMAL.replace("type = \"Integer\"", "type = \"Decimal\"");
        assert!(RouterConfig::parse(&unknown).is_err());
    }

    #[test]
    fn test_example_config_is_valid() {
        let config = RouterConfig::example().expect("example");
        let instance = &config.instances[0];
        instance.check_references().expect("references");

        let mappings = instance.mappings();
        let ledger = &mappings[0].sync_outputs[0];
        assert_eq!(ledger.follow_messages.len(), 1);
        assert_eq!(ledger.follow_messages[0].message_type, MessageType::FollowMessage);
        assert_eq!(instance.logger_mappings().len(), 1);
    }

    #[test]
    fn test_validation_errors() {
        assert!(RouterConfig::default().validate().is_err());

        let bad_id = MINIMAL.replace("id = \"in\"", "id = \"in put\"");
        assert!(RouterConfig::parse(&bad_id).is_err());

        let duplicate = MINIMAL.replace("id = \"out\"", "id = \"in\"");
        assert!(RouterConfig::parse(&duplicate).is_err());

        let zero = MINIMAL.replace("length = 4", "length = 0");
        assert!(RouterConfig::parse(&zero).is_err());

        let empty_pad = MINIMAL.replace("lpad = \"0\"", "lpad = \"\"");
        assert!(RouterConfig::parse(&empty_pad).is_err());

        let bad_trunk = MINIMAL.replace("trunk = \"left\"", "trunk = \"middle\"");
        assert!(matches!(
            RouterConfig::parse(&bad_trunk),
            Err(ConfigError::Toml(_))
        ));
    }

    #[test]
    fn test_unresolved_reference() {
        let broken = MINIMAL.replace("connection = \"out\"\nmode = \"sync\"", "connection = \"nowhere\"\nmode = \"sync\"");
        let config = RouterConfig::parse(&broken).expect("parse");
        let err = config.instances[0].check_references().expect_err("dangling");
        assert!(matches!(err, ConfigError::UnresolvedConnection { .. }));
        assert_eq!(err.kind(), ErrorKind::ConfigurationResolutionFailure);
    }

    #[test]
    fn test_field_bound_to_other_input_is_skipped() {
        let mut message: MessageConfig = toml::from_str(
            r#"
id = "m"
input = { connection = "in" }

[[fields]]
id = "a"

[[fields]]
id = "b"
input = { connection = "other" }
"#,
        )
        .expect("parse");
        let mapping = message.to_mapping(MessageType::Message);
        assert_eq!(mapping.fields.len(), 1);
        assert_eq!(mapping.fields[0].input_id, "in");

        message.fields.clear();
        assert!(message.to_mapping(MessageType::Message).fields.is_empty());
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().expect("tempfile");
        file.write_all(MINIMAL.as_bytes()).expect("write");
        let config = RouterConfig::from_file(file.path()).expect("load");
        assert_eq!(config.instances.len(), 1);

        assert!(matches!(
            RouterConfig::from_file("/nonexistent/switchyard.toml"),
            Err(ConfigError::Io(_))
        ));
    }

    #[test]
    fn test_config_serialization() {
        let mut config = RouterConfig::default();
        config.add_instance(InstanceConfig::new("main"));
        let toml_str = toml::to_string_pretty(&config).expect("serialize");
        assert!(toml_str.contains("log_level = \"info\""));
        assert!(toml_str.contains("id = \"main\""));
    }
}
