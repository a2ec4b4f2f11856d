// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Connectors: owners of keyed connection sets.
//!
//! A [`Connector`] owns the connections of one transport family and tracks
//! its own connect state. What `connect`/`disconnect` mean is supplied by a
//! [`ConnectorBackend`]; the built-in [`DirectBackend`] simply opens and
//! closes every connection.

use crate::connection::Connection;
use crate::error::ConnectionError;
use crate::mapping::Arguments;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;
use std::fmt;
use std::sync::{Arc, Weak};

/// Connect state of a connector, independent of its connections' states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectorState {
    Disconnected,
    Connecting,
    Connected,
}

impl fmt::Display for ConnectorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
        };
        f.write_str(name)
    }
}

/// Connector-type specific connect/disconnect behavior.
pub trait ConnectorBackend: Send + Sync {
    fn connect(&self, connector: &Connector) -> Result<(), ConnectionError>;

    fn disconnect(&self, connector: &Connector) -> Result<(), ConnectionError>;

    fn kind(&self) -> &'static str;
}

/// Opens every connection on connect and closes every one on disconnect.
///
/// All connections are attempted; the first error is returned.
#[derive(Debug, Default, Clone, Copy)]
pub struct DirectBackend;

impl ConnectorBackend for DirectBackend {
    fn connect(&self, connector: &Connector) -> Result<(), ConnectionError> {
        let mut first_error = None;
        for conn in connector.connections() {
            if conn.state().is_active() {
                continue;
            }
            if let Err(e) = conn.open() {
                tracing::warn!(connector = %connector.id(), "Failed to open: {}", e);
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    fn disconnect(&self, connector: &Connector) -> Result<(), ConnectionError> {
        let mut first_error = None;
        for conn in connector.connections() {
            if let Err(e) = conn.close() {
                tracing::warn!(connector = %connector.id(), "Failed to close: {}", e);
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    fn kind(&self) -> &'static str {
        "direct"
    }
}

/// Owner of a keyed connection set.
pub struct Connector {
    id: String,
    params: Arguments,
    backend: Arc<dyn ConnectorBackend>,
    connections: DashMap<String, Arc<Connection>>,
    state: Mutex<ConnectorState>,
}

impl Connector {
    pub fn new(id: impl Into<String>, backend: Arc<dyn ConnectorBackend>) -> Self {
        Self {
            id: id.into(),
            params: Arguments::new(),
            backend,
            connections: DashMap::new(),
            state: Mutex::new(ConnectorState::Disconnected),
        }
    }

    pub fn with_params(mut self, params: Arguments) -> Self {
        self.params = params;
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn kind(&self) -> &'static str {
        self.backend.kind()
    }

    pub fn params(&self) -> &Arguments {
        &self.params
    }

    pub fn state(&self) -> ConnectorState {
        *self.state.lock()
    }

    fn set_state(&self, next: ConnectorState) {
        let mut state = self.state.lock();
        if *state != next {
            tracing::debug!(connector = %self.id, to = %next, "connector state change");
            *state = next;
        }
    }

    /// Add a connection, failing with `DuplicateKey` if the ID is taken.
    pub fn add_connection(self: &Arc<Self>, connection: Arc<Connection>) -> Result<(), ConnectionError> {
        match self.connections.entry(connection.id().to_string()) {
            Entry::Occupied(_) => Err(ConnectionError::DuplicateKey(format!(
                "connection '{}' in connector '{}'",
                connection.id(),
                self.id
            ))),
            Entry::Vacant(slot) => {
                connection.set_parent(Arc::downgrade(self));
                slot.insert(connection);
                Ok(())
            }
        }
    }

    /// Close and remove a connection.
    ///
    /// Returns `Ok(false)` if no such connection exists. A close failure is
    /// propagated and the connection stays in the set.
    pub fn remove_connection(&self, connection_id: &str) -> Result<bool, ConnectionError> {
        let Some(connection) = self.get(connection_id) else {
            return Ok(false);
        };

        connection.close()?;

        let removed = self
            .connections
            .remove_if(connection_id, |_, existing| Arc::ptr_eq(existing, &connection))
            .is_some();
        if removed {
            connection.set_parent(Weak::new());
        }
        Ok(removed)
    }

    pub fn get(&self, connection_id: &str) -> Option<Arc<Connection>> {
        self.connections
            .get(connection_id)
            .map(|entry| Arc::clone(entry.value()))
    }

    pub fn contains(&self, connection_id: &str) -> bool {
        self.connections.contains_key(connection_id)
    }

    /// Snapshot of the connections, sorted by ID.
    pub fn connections(&self) -> Vec<Arc<Connection>> {
        let mut connections: Vec<Arc<Connection>> = self
            .connections
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        connections.sort_by(|a, b| a.id().cmp(b.id()));
        connections
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Connect through the backend.
    pub fn connect(&self) -> Result<(), ConnectionError> {
        self.set_state(ConnectorState::Connecting);
        match self.backend.connect(self) {
            Ok(()) => {
                self.set_state(ConnectorState::Connected);
                tracing::info!(connector = %self.id, connections = self.len(), "Connector connected");
                Ok(())
            }
            Err(e) => {
                self.set_state(ConnectorState::Disconnected);
                Err(e)
            }
        }
    }

    /// Disconnect through the backend. The connector ends up disconnected
    /// even when the backend reports an error.
    pub fn disconnect(&self) -> Result<(), ConnectionError> {
        let result = self.backend.disconnect(self);
        self.set_state(ConnectorState::Disconnected);
        result
    }

    /// Called by a connection whose listener failed.
    pub fn report_fault(&self, connection_id: &str, error: &ConnectionError) {
        tracing::warn!(
            connector = %self.id,
            connection = %connection_id,
            kind = error.kind().as_str(),
            "Connection fault: {}",
            error
        );

        let any_active = self
            .connections
            .iter()
            .any(|entry| entry.value().state().is_active());
        if !any_active {
            self.set_state(ConnectorState::Disconnected);
        }
    }
}

impl fmt::Debug for Connector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connector")
            .field("id", &self.id)
            .field("kind", &self.kind())
            .field("state", &self.state())
            .field("connections", &self.len())
            .finish()
    }
}

/// Connectors of one routing instance, keyed by connector ID.
#[derive(Default)]
pub struct ConnectorSet {
    connectors: DashMap<String, Arc<Connector>>,
}

impl ConnectorSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a connector, failing with `DuplicateKey` if the ID is taken.
    pub fn insert(&self, connector: Arc<Connector>) -> Result<(), ConnectionError> {
        match self.connectors.entry(connector.id().to_string()) {
            Entry::Occupied(_) => Err(ConnectionError::DuplicateKey(format!(
                "connector '{}'",
                connector.id()
            ))),
            Entry::Vacant(slot) => {
                slot.insert(connector);
                Ok(())
            }
        }
    }

    pub fn get(&self, connector_id: &str) -> Option<Arc<Connector>> {
        self.connectors
            .get(connector_id)
            .map(|entry| Arc::clone(entry.value()))
    }

    /// Snapshot of the connectors, sorted by ID.
    pub fn connectors(&self) -> Vec<Arc<Connector>> {
        let mut connectors: Vec<Arc<Connector>> = self
            .connectors
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        connectors.sort_by(|a, b| a.id().cmp(b.id()));
        connectors
    }

    /// Find a connection by ID in any connector.
    pub fn resolve(&self, connection_id: &str) -> Option<Arc<Connection>> {
        self.connectors
            .iter()
            .find_map(|entry| entry.value().get(connection_id))
    }

    /// Every connection of every connector.
    pub fn all_connections(&self) -> Vec<Arc<Connection>> {
        self.connectors()
            .iter()
            .flat_map(|connector| connector.connections())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.connectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connectors.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::{ConnectionMode, ConnectionState};
    use crate::error::{ErrorKind, TransportError};
    use crate::payload::Payload;
    use crate::transport::{MemoryTransport, Transport};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    fn memory_connection(id: &str) -> Arc<Connection> {
        let (transport, _handle) = MemoryTransport::new(false);
        Arc::new(Connection::new(id, ConnectionMode::ReadWrite, Arc::new(transport)))
    }

    fn direct_connector(id: &str) -> Arc<Connector> {
        Arc::new(Connector::new(id, Arc::new(DirectBackend)))
    }

    #[derive(Default)]
    struct StubbornTransport {
        fail_close: AtomicBool,
    }

    impl Transport for StubbornTransport {
        fn open(&self) -> Result<(), TransportError> {
            Ok(())
        }

        fn close(&self) -> Result<(), TransportError> {
            if self.fail_close.load(Ordering::SeqCst) {
                return Err(TransportError::new("busy"));
            }
            Ok(())
        }

        fn read_message(&self, _timeout: Duration) -> Result<Option<Payload>, TransportError> {
            Ok(None)
        }

        fn write_message(&self, _payload: &Payload) -> Result<Option<Payload>, TransportError> {
            Ok(None)
        }

        fn kind(&self) -> &'static str {
            "stubborn"
        }
    }

    #[test]
    fn test_duplicate_connection_rejected() {
        let connector = direct_connector("k");
        connector
            .add_connection(memory_connection("c1"))
            .expect("first add");

        let err = connector
            .add_connection(memory_connection("c1"))
            .expect_err("duplicate");
        assert_eq!(err.kind(), ErrorKind::DuplicateKey);
        assert_eq!(connector.len(), 1);
    }

    #[test]
    fn test_add_sets_parent() {
        let connector = direct_connector("k");
        let conn = memory_connection("c1");
        connector.add_connection(Arc::clone(&conn)).expect("add");
        let parent = conn.parent().expect("parent");
        assert_eq!(parent.id(), "k");
    }

    #[test]
    fn test_connect_opens_all() {
        let connector = direct_connector("k");
        connector.add_connection(memory_connection("a")).expect("add");
        connector.add_connection(memory_connection("b")).expect("add");
        assert_eq!(connector.state(), ConnectorState::Disconnected);

        connector.connect().expect("connect");
        assert_eq!(connector.state(), ConnectorState::Connected);
        assert!(connector
            .connections()
            .iter()
            .all(|c| c.state() == ConnectionState::Open));

        // Connecting again skips connections that are already open.
        connector.connect().expect("reconnect");

        connector.disconnect().expect("disconnect");
        assert_eq!(connector.state(), ConnectorState::Disconnected);
        assert!(connector
            .connections()
            .iter()
            .all(|c| c.state() == ConnectionState::Closed));
    }

    #[test]
    fn test_remove_closes_first() {
        let connector = direct_connector("k");
        let conn = memory_connection("c1");
        connector.add_connection(Arc::clone(&conn)).expect("add");
        conn.open().expect("open");

        assert!(connector.remove_connection("c1").expect("remove"));
        assert_eq!(conn.state(), ConnectionState::Closed);
        assert!(connector.is_empty());
        assert!(conn.parent().is_none());
        assert!(!connector.remove_connection("c1").expect("absent"));
    }

    #[test]
    fn test_remove_keeps_connection_when_close_fails() {
        let connector = direct_connector("k");
        let transport = Arc::new(StubbornTransport::default());
        let conn = Arc::new(Connection::new("s", ConnectionMode::ReadWrite, transport.clone()));
        connector.add_connection(Arc::clone(&conn)).expect("add");
        conn.open().expect("open");

        transport.fail_close.store(true, Ordering::SeqCst);
        let err = connector.remove_connection("s").expect_err("close fails");
        assert_eq!(err.kind(), ErrorKind::TransportFailure);
        assert!(connector.contains("s"));
    }

    #[test]
    fn test_report_fault_disconnects_when_nothing_active() {
        let connector = direct_connector("k");
        let conn = memory_connection("c1");
        connector.add_connection(Arc::clone(&conn)).expect("add");
        connector.connect().expect("connect");

        let err = ConnectionError::NotFound("x".into());
        connector.report_fault("c1", &err);
        assert_eq!(connector.state(), ConnectorState::Connected);

        conn.close().expect("close");
        connector.report_fault("c1", &err);
        assert_eq!(connector.state(), ConnectorState::Disconnected);
    }

    #[test]
    fn test_connector_set_resolve() {
        let set = ConnectorSet::new();
        let a = direct_connector("a");
        a.add_connection(memory_connection("in")).expect("add");
        let b = direct_connector("b");
        b.add_connection(memory_connection("out")).expect("add");
        set.insert(a).expect("insert");
        set.insert(b).expect("insert");

        let err = set.insert(direct_connector("a")).expect_err("duplicate");
        assert_eq!(err.kind(), ErrorKind::DuplicateKey);
        assert_eq!(set.len(), 2);

        assert_eq!(set.resolve("out").map(|c| c.id().to_string()), Some("out".into()));
        assert!(set.resolve("missing").is_none());
        assert_eq!(set.all_connections().len(), 2);
    }

    #[test]
    fn test_resolve_sees_connections_added_later() {
        let set = ConnectorSet::new();
        let a = direct_connector("a");
        set.insert(Arc::clone(&a)).expect("insert");
        assert!(set.resolve("late").is_none());

        a.add_connection(memory_connection("late")).expect("add");
        let found = set.resolve("late").expect("resolved");
        assert_eq!(found.parent().map(|p| p.id().to_string()), Some("a".into()));
    }
}
