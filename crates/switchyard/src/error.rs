// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Error types shared by connections, the message builder and the service.
//!
//! Every error maps onto an [`ErrorKind`], the stable classification that is
//! carried by diagnostics and used in log lines.

use crate::config::ConfigError;
use crate::connection::{ConnectionMode, ConnectionState};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Failure classification reported through the diagnostic channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Read or write attempted against a mode that forbids it.
    CapabilityViolation,
    /// Underlying transport failed (open/close/pause/reset/read/write).
    TransportFailure,
    /// A connection or connector with the same ID already exists.
    DuplicateKey,
    /// No message definition matched a payload.
    IdentificationFailure,
    /// A field rule could not be applied to its value.
    TransformationFailure,
    /// A message definition references a connection that does not exist.
    ConfigurationResolutionFailure,
    /// A lifecycle operation is not allowed from the current state.
    InvalidState,
}

impl ErrorKind {
    /// Snake-case name used in logs and diagnostic payloads.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CapabilityViolation => "capability_violation",
            Self::TransportFailure => "transport_failure",
            Self::DuplicateKey => "duplicate_key",
            Self::IdentificationFailure => "identification_failure",
            Self::TransformationFailure => "transformation_failure",
            Self::ConfigurationResolutionFailure => "configuration_resolution_failure",
            Self::InvalidState => "invalid_state",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure raised by a concrete transport.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct TransportError(pub String);

impl TransportError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self(reason.into())
    }
}

impl From<std::io::Error> for TransportError {
    fn from(err: std::io::Error) -> Self {
        Self(err.to_string())
    }
}

impl From<serde_json::Error> for TransportError {
    fn from(err: serde_json::Error) -> Self {
        Self(format!("JSON error: {}", err))
    }
}

/// Connection and connector errors.
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("Connection '{connection}' is {mode} and cannot {operation}")]
    CapabilityViolation {
        connection: String,
        mode: ConnectionMode,
        operation: &'static str,
    },

    #[error("Transport failure on '{connection}' during {operation}: {source}")]
    Transport {
        connection: String,
        operation: &'static str,
        #[source]
        source: TransportError,
    },

    #[error("Connection '{connection}' cannot {operation} while {state}")]
    InvalidState {
        connection: String,
        operation: &'static str,
        state: ConnectionState,
    },

    #[error("Duplicate key: {0}")]
    DuplicateKey(String),

    #[error("Connection not found: {0}")]
    NotFound(String),
}

impl ConnectionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::CapabilityViolation { .. } => ErrorKind::CapabilityViolation,
            Self::Transport { .. } => ErrorKind::TransportFailure,
            Self::InvalidState { .. } => ErrorKind::InvalidState,
            Self::DuplicateKey(_) => ErrorKind::DuplicateKey,
            Self::NotFound(_) => ErrorKind::ConfigurationResolutionFailure,
        }
    }
}

/// Field transformation errors.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TransformError {
    #[error("Field '{field}': cannot convert {value} to {target}")]
    TypeConversion {
        field: String,
        value: String,
        target: String,
    },

    #[error("Field '{field}': invalid configuration: {reason}")]
    InvalidConfig { field: String, reason: String },
}

impl TransformError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::TransformationFailure
    }

    /// Field the failure belongs to.
    pub fn field(&self) -> &str {
        match self {
            Self::TypeConversion { field, .. } | Self::InvalidConfig { field, .. } => field,
        }
    }
}

/// Top-level routing errors.
#[derive(Debug, Error)]
pub enum RoutingError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Connection error: {0}")]
    Connection(#[from] ConnectionError),

    #[error("Transform error: {0}")]
    Transform(#[from] TransformError),

    #[error("Instance '{0}' already running")]
    AlreadyRunning(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl RoutingError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Config(err) => err.kind(),
            Self::Connection(err) => err.kind(),
            Self::Transform(err) => err.kind(),
            Self::AlreadyRunning(_) => ErrorKind::InvalidState,
            Self::Io(_) => ErrorKind::TransportFailure,
        }
    }
}
