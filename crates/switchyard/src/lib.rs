// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Switchyard Routing Service
//!
//! Configuration-driven message identification, field transformation and
//! routing between connections.
//!
//! # Features
//!
//! - **Identification**: Match raw payloads to message mappings by key shape
//!   and discriminating field values
//! - **Field Transformation**: Rename, force, pad, truncate, wrap and coerce
//!   fields per destination
//! - **Dispatch**: Synchronous and asynchronous outputs, with return, follow
//!   and end-of-transmission chains
//! - **Connections**: Mode-gated transports with a listener thread and a
//!   lifecycle state machine
//!
//! # Quick Start
//!
//! ```bash
//! # Write an example configuration
//! switchyard gen-config --output switchyard.toml
//!
//! # Check it
//! switchyard validate --config switchyard.toml
//!
//! # Run it
//! switchyard --config switchyard.toml
//! ```
//!
//! # Configuration File
//!
//! ```toml
//! [[instances]]
//! id = "main"
//!
//! [[instances.connectors]]
//! id = "local"
//!
//! [[instances.connectors.connections]]
//! id = "in"
//! type = "memory"
//! mode = "readonly"
//!
//! [[instances.connectors.connections]]
//! id = "out"
//! type = "jsonl"
//! mode = "writeonly"
//! params = { output = "out.jsonl" }
//!
//! [[instances.messages]]
//! id = "order"
//! input = { connection = "in", match_style = "exact" }
//!
//! [[instances.messages.fields]]
//! id = "type"
//! input = { match_on_value = "ORDER" }
//!
//! [[instances.messages.fields.outputs]]
//! connection = "out"
//!
//! [[instances.messages.outputs]]
//! connection = "out"
//! mode = "sync"
//! ```

pub mod builder;
pub mod config;
pub mod connection;
pub mod connector;
pub mod diagnostics;
pub mod error;
pub mod instance;
pub mod mapping;
pub mod message;
pub mod payload;
pub mod registry;
pub mod stats;
pub mod transport;

pub use builder::{LoggerSink, MessageBuilder, MAX_CHAIN_DEPTH};
pub use config::{ConfigError, InstanceConfig, RouterConfig};
pub use connection::{
    CallbackSubscriber, Connection, ConnectionMode, ConnectionRoutes, ConnectionState,
    PayloadSubscriber,
};
pub use connector::{Connector, ConnectorBackend, ConnectorSet, ConnectorState, DirectBackend};
pub use diagnostics::{ChannelSink, Diagnostic, DiagnosticSink, FanoutSink, TracingSink};
pub use error::{ConnectionError, ErrorKind, RoutingError, TransformError, TransportError};
pub use instance::{RoutingInstance, RoutingService};
pub use mapping::{
    IoMode, MatchStyle, MessageFieldConfig, MessageIOConfig, MessageMapping, MessageType,
    OutputFieldConfig, TargetType, TruncateSide,
};
pub use message::Message;
pub use payload::Payload;
pub use registry::TransportRegistry;
pub use stats::{RoutingStats, RoutingStatsSnapshot};
pub use transport::{JsonlTransport, MemoryHandle, MemoryHub, MemoryTransport, Transport};
