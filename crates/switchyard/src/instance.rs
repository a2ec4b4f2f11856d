// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Routing instances and the service running them.
//!
//! A [`RoutingInstance`] is one resolved `[[instances]]` entry: its
//! connectors and connections built through a [`TransportRegistry`], its
//! mappings, and one [`MessageBuilder`] subscribed to every input
//! connection. Each connection is handed the routes that name it when the
//! instance is built.

use crate::builder::{LoggerSink, MessageBuilder};
use crate::config::{ConfigError, InstanceConfig, RouterConfig};
use crate::connection::{Connection, ConnectionRoutes, PayloadSubscriber};
use crate::connector::{Connector, ConnectorSet};
use crate::diagnostics::{Diagnostic, DiagnosticSink, FanoutSink};
use crate::error::{ConnectionError, RoutingError};
use crate::mapping::MessageMapping;
use crate::registry::TransportRegistry;
use crate::stats::{RoutingStats, RoutingStatsSnapshot};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// One resolved routing instance.
pub struct RoutingInstance {
    id: String,
    directory: Arc<ConnectorSet>,
    mappings: Vec<Arc<MessageMapping>>,
    inputs: Vec<Arc<Connection>>,
    builder: MessageBuilder,
    /// The builder as registered on every input.
    subscriber: Arc<dyn PayloadSubscriber>,
    running: AtomicBool,
}

impl RoutingInstance {
    /// Resolve an instance configuration.
    ///
    /// Fails when a connector or transport type is unknown, an ID is
    /// duplicated, a mapping names a connection that does not exist, or a
    /// mapping reads from a connection that cannot be read.
    pub fn from_config(
        config: &InstanceConfig,
        registry: &TransportRegistry,
        sink: Arc<dyn DiagnosticSink>,
    ) -> Result<Self, ConfigError> {
        config.check_references()?;

        let directory = Arc::new(ConnectorSet::new());
        for connector_config in &config.connectors {
            let backend = registry.create_backend(&connector_config.kind, &connector_config.params)?;
            let connector = Arc::new(
                Connector::new(connector_config.id.clone(), backend)
                    .with_params(connector_config.params.clone()),
            );

            for connection_config in &connector_config.connections {
                let transport = registry.create_transport(
                    &connection_config.kind,
                    &connection_config.id,
                    &connection_config.params,
                )?;
                let connection = Connection::new(
                    connection_config.id.clone(),
                    connection_config.mode,
                    transport,
                )
                .with_kind(connection_config.kind.clone())
                .with_params(connection_config.params.clone());
                connector.add_connection(Arc::new(connection))?;
            }
            directory.insert(connector)?;
        }

        let mappings = config.mappings();
        let loggers = config.logger_mappings();

        let sink: Arc<dyn DiagnosticSink> = if loggers.is_empty() {
            sink
        } else {
            Arc::new(
                FanoutSink::new()
                    .with(sink)
                    .with(Arc::new(LoggerSink::new(loggers, Arc::clone(&directory)))),
            )
        };

        let connections: Vec<(Arc<Connection>, ConnectionRoutes)> = directory
            .all_connections()
            .into_iter()
            .map(|connection| {
                let routes = ConnectionRoutes::for_connection(connection.id(), &mappings);
                (connection, routes)
            })
            .collect();
        if let Some((connection, _)) = connections
            .iter()
            .find(|(c, routes)| !routes.inputs.is_empty() && !c.mode().can_read())
        {
            return Err(ConnectionError::CapabilityViolation {
                connection: connection.id().to_string(),
                mode: connection.mode(),
                operation: "read",
            }
            .into());
        }

        let stats = Arc::new(RoutingStats::new());
        let builder = MessageBuilder::new(Arc::clone(&directory), Arc::clone(&sink), stats);
        let subscriber: Arc<dyn PayloadSubscriber> = Arc::new(builder.clone());

        let mut inputs = Vec::new();
        for (connection, routes) in connections {
            connection.set_diagnostics(Arc::clone(&sink));
            if !routes.inputs.is_empty() {
                connection.subscribe(Arc::clone(&subscriber));
                inputs.push(Arc::clone(&connection));
            }
            connection.set_routes(routes);
        }

        tracing::info!(
            instance = %config.id,
            connectors = directory.len(),
            mappings = mappings.len(),
            inputs = inputs.len(),
            "Routing instance resolved"
        );

        Ok(Self {
            id: config.id.clone(),
            directory,
            mappings,
            inputs,
            builder,
            subscriber,
            running: AtomicBool::new(false),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    /// Connectors of this instance.
    pub fn connectors(&self) -> &Arc<ConnectorSet> {
        &self.directory
    }

    /// Look up a connection by ID.
    pub fn connection(&self, connection_id: &str) -> Option<Arc<Connection>> {
        self.directory.resolve(connection_id)
    }

    /// Root mappings.
    pub fn mappings(&self) -> &[Arc<MessageMapping>] {
        &self.mappings
    }

    /// Connections the builder listens to.
    pub fn inputs(&self) -> &[Arc<Connection>] {
        &self.inputs
    }

    pub fn builder(&self) -> &MessageBuilder {
        &self.builder
    }

    /// Connect every connector, then start listening on input connections.
    ///
    /// On failure the connectors connected so far are disconnected again.
    pub fn start(&self) -> Result<(), RoutingError> {
        if self.running.swap(true, Ordering::AcqRel) {
            return Err(RoutingError::AlreadyRunning(self.id.clone()));
        }

        if let Err(e) = self.connect_and_listen() {
            self.shutdown();
            self.running.store(false, Ordering::Release);
            return Err(e.into());
        }

        tracing::info!(instance = %self.id, "Routing instance started");
        Ok(())
    }

    fn connect_and_listen(&self) -> Result<(), ConnectionError> {
        for connector in self.directory.connectors() {
            connector.connect()?;
        }
        for input in &self.inputs {
            input.listen()?;
        }
        Ok(())
    }

    /// Stop listening and disconnect every connector.
    pub fn stop(&self) {
        if !self.running.swap(false, Ordering::AcqRel) {
            return;
        }
        self.shutdown();
        tracing::info!(instance = %self.id, "Routing instance stopped");
    }

    fn shutdown(&self) {
        for input in &self.inputs {
            input.stop_listening();
        }
        for connector in self.directory.connectors() {
            if let Err(e) = connector.disconnect() {
                tracing::warn!(
                    instance = %self.id,
                    connector = %connector.id(),
                    "Disconnect failed: {}",
                    e
                );
            }
        }
    }

    pub fn stats(&self) -> RoutingStatsSnapshot {
        self.builder.stats().snapshot()
    }
}

impl Drop for RoutingInstance {
    fn drop(&mut self) {
        self.stop();
        // Connections hold the builder and the sink, both of which hold the
        // directory that owns the connections.
        for input in &self.inputs {
            input.unsubscribe(&self.subscriber);
        }
        for connection in self.directory.all_connections() {
            connection.clear_diagnostics();
        }
    }
}

/// Every routing instance of a configuration.
pub struct RoutingService {
    instances: Vec<RoutingInstance>,
    failed: Vec<(String, ConfigError)>,
    sink: Arc<dyn DiagnosticSink>,
}

impl RoutingService {
    /// Resolve every instance. Instances that fail to resolve are reported
    /// to `sink` and left out; the others are unaffected.
    pub fn from_config(
        config: &RouterConfig,
        registry: &TransportRegistry,
        sink: Arc<dyn DiagnosticSink>,
    ) -> Self {
        let mut instances = Vec::new();
        let mut failed = Vec::new();

        for instance_config in &config.instances {
            match RoutingInstance::from_config(instance_config, registry, Arc::clone(&sink)) {
                Ok(instance) => instances.push(instance),
                Err(e) => {
                    tracing::error!(instance = %instance_config.id, "Instance not started: {}", e);
                    sink.report(Diagnostic::new(
                        e.kind(),
                        instance_config.id.as_str(),
                        format!("Instance '{}' not started: {}", instance_config.id, e),
                    ));
                    failed.push((instance_config.id.clone(), e));
                }
            }
        }

        Self {
            instances,
            failed,
            sink,
        }
    }

    pub fn instances(&self) -> &[RoutingInstance] {
        &self.instances
    }

    pub fn instance(&self, id: &str) -> Option<&RoutingInstance> {
        self.instances.iter().find(|i| i.id() == id)
    }

    /// Instances that failed to resolve, with the reason.
    pub fn failed(&self) -> &[(String, ConfigError)] {
        &self.failed
    }

    /// Start every instance. Returns how many are running.
    pub fn start(&self) -> usize {
        let mut started = 0;
        for instance in &self.instances {
            match instance.start() {
                Ok(()) => started += 1,
                Err(RoutingError::AlreadyRunning(_)) => started += 1,
                Err(e) => {
                    tracing::error!(instance = %instance.id(), "Instance failed to start: {}", e);
                    self.sink.report(Diagnostic::new(
                        e.kind(),
                        instance.id(),
                        format!("Instance '{}' failed to start: {}", instance.id(), e),
                    ));
                }
            }
        }
        started
    }

    pub fn stop(&self) {
        for instance in &self.instances {
            instance.stop();
        }
    }

    /// Statistics of every instance, summed.
    pub fn stats(&self) -> RoutingStatsSnapshot {
        self.instances
            .iter()
            .map(RoutingInstance::stats)
            .fold(RoutingStatsSnapshot::default(), |acc, s| acc.merge(&s))
    }

    /// Statistics per instance.
    pub fn instance_stats(&self) -> Vec<(String, RoutingStatsSnapshot)> {
        self.instances
            .iter()
            .map(|i| (i.id().to_string(), i.stats()))
            .collect()
    }
}
