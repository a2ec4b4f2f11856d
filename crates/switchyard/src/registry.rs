// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Type-name to factory registry for transports and connector backends.
//!
//! Configuration names transports and connectors by type string; the
//! registry turns those names into instances. Built-ins:
//!
//! | Type     | Kind      | Parameters                                  |
//! |----------|-----------|---------------------------------------------|
//! | `memory` | transport | `channel`, `echo`, `capacity`               |
//! | `jsonl`  | transport | `path` (read, and write unless `output`), `output` |
//! | `direct` | connector | none                                        |

use crate::config::ConfigError;
use crate::connector::{ConnectorBackend, DirectBackend};
use crate::mapping::Arguments;
use crate::payload::Value;
use crate::transport::memory::DEFAULT_CAPACITY;
use crate::transport::{JsonlTransport, MemoryHub, Transport};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

/// What a transport factory gets to build one connection's transport.
pub struct TransportContext<'a> {
    pub connection_id: &'a str,
    pub params: &'a Arguments,
    pub memory: &'a Arc<MemoryHub>,
}

impl TransportContext<'_> {
    pub fn str_param(&self, key: &str) -> Option<&str> {
        self.params.get(key).and_then(Value::as_str)
    }

    pub fn bool_param(&self, key: &str) -> Result<Option<bool>, ConfigError> {
        match self.params.get(key) {
            None => Ok(None),
            Some(Value::Bool(b)) => Ok(Some(*b)),
            Some(other) => Err(ConfigError::Invalid(format!(
                "Connection '{}': parameter '{}' must be a boolean, got {}",
                self.connection_id, key, other
            ))),
        }
    }

    pub fn usize_param(&self, key: &str) -> Result<Option<usize>, ConfigError> {
        match self.params.get(key) {
            None => Ok(None),
            Some(value) => value
                .as_u64()
                .and_then(|n| usize::try_from(n).ok())
                .map(Some)
                .ok_or_else(|| {
                    ConfigError::Invalid(format!(
                        "Connection '{}': parameter '{}' must be a non-negative integer, got {}",
                        self.connection_id, key, value
                    ))
                }),
        }
    }
}

pub type TransportFactory =
    Arc<dyn Fn(&TransportContext<'_>) -> Result<Arc<dyn Transport>, ConfigError> + Send + Sync>;

pub type BackendFactory =
    Arc<dyn Fn(&Arguments) -> Result<Arc<dyn ConnectorBackend>, ConfigError> + Send + Sync>;

/// Registry of transport and connector types.
pub struct TransportRegistry {
    transports: HashMap<String, TransportFactory>,
    backends: HashMap<String, BackendFactory>,
    memory: Arc<MemoryHub>,
}

impl Default for TransportRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

impl TransportRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self {
            transports: HashMap::new(),
            backends: HashMap::new(),
            memory: Arc::new(MemoryHub::new()),
        }
    }

    /// Registry with `memory`, `jsonl` and `direct`.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();

        registry.register_transport("memory", |ctx| {
            let channel = ctx.str_param("channel").unwrap_or(ctx.connection_id);
            let echo = ctx.bool_param("echo")?.unwrap_or(false);
            let capacity = ctx.usize_param("capacity")?.unwrap_or(DEFAULT_CAPACITY);
            Ok(Arc::new(ctx.memory.transport(channel, echo, capacity)) as Arc<dyn Transport>)
        });

        registry.register_transport("jsonl", |ctx| {
            let input = ctx.str_param("path").map(PathBuf::from);
            let output = ctx
                .str_param("output")
                .map(PathBuf::from)
                .or_else(|| input.clone());
            if input.is_none() && output.is_none() {
                return Err(ConfigError::Invalid(format!(
                    "Connection '{}': jsonl transport needs 'path' or 'output'",
                    ctx.connection_id
                )));
            }
            Ok(Arc::new(JsonlTransport::new(input, output)) as Arc<dyn Transport>)
        });

        registry.register_backend("direct", |_params| {
            Ok(Arc::new(DirectBackend) as Arc<dyn ConnectorBackend>)
        });

        registry
    }

    pub fn register_transport<F>(&mut self, kind: impl Into<String>, factory: F)
    where
        F: Fn(&TransportContext<'_>) -> Result<Arc<dyn Transport>, ConfigError> + Send + Sync + 'static,
    {
        self.transports.insert(kind.into(), Arc::new(factory));
    }

    pub fn register_backend<F>(&mut self, kind: impl Into<String>, factory: F)
    where
        F: Fn(&Arguments) -> Result<Arc<dyn ConnectorBackend>, ConfigError> + Send + Sync + 'static,
    {
        self.backends.insert(kind.into(), Arc::new(factory));
    }

    /// Build the transport of one connection.
    pub fn create_transport(
        &self,
        kind: &str,
        connection_id: &str,
        params: &Arguments,
    ) -> Result<Arc<dyn Transport>, ConfigError> {
        let factory = self
            .transports
            .get(kind)
            .ok_or_else(|| ConfigError::UnknownType {
                category: "transport",
                name: kind.to_string(),
            })?;
        factory(&TransportContext {
            connection_id,
            params,
            memory: &self.memory,
        })
    }

    /// Build a connector backend.
    pub fn create_backend(
        &self,
        kind: &str,
        params: &Arguments,
    ) -> Result<Arc<dyn ConnectorBackend>, ConfigError> {
        let factory = self
            .backends
            .get(kind)
            .ok_or_else(|| ConfigError::UnknownType {
                category: "connector",
                name: kind.to_string(),
            })?;
        factory(params)
    }

    pub fn has_transport(&self, kind: &str) -> bool {
        self.transports.contains_key(kind)
    }

    pub fn has_backend(&self, kind: &str) -> bool {
        self.backends.contains_key(kind)
    }

    /// Registered transport types, sorted.
    pub fn transport_types(&self) -> Vec<&str> {
        let mut kinds: Vec<&str> = self.transports.keys().map(String::as_str).collect();
        kinds.sort_unstable();
        kinds
    }

    /// Memory channels used by `memory` transports.
    pub fn memory_hub(&self) -> Arc<MemoryHub> {
        Arc::clone(&self.memory)
    }
}
