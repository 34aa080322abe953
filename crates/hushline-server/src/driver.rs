//! Sans-IO server driver.
//!
//! The driver is the single owner of the [`SessionRegistry`]. The runtime
//! feeds it [`ServerEvent`]s one at a time and executes the
//! [`ServerAction`]s it returns. Because every event goes through
//! `&mut self`, wrapping the driver in one mutex is enough to serialize
//! message handling and timer firing.
//!
//! # Event flow
//!
//! ```text
//! ConnectionAccepted ─┐
//! FrameReceived ──────┼─> ServerDriver ─> Dispatcher / SessionRegistry ─> Vec<ServerAction>
//! ConnectionClosed ───┤
//! Tick ───────────────┘
//! ```
//!
//! Sends addressed to connections the driver no longer considers open are
//! dropped here, so the executor never sees them.
//!
//! `FrameReceived` fires every due timer before dispatching, so a frame never
//! reaches a session whose expiry deadline has passed. `Tick` only bounds how
//! late timers fire for sessions that stay quiet.

use std::collections::HashSet;

use hushline_core::{
    ConnectionId, Dispatcher, Environment, LeaveOutcome, Outbound, SessionConfig, SessionRegistry,
};

/// Events the runtime feeds into the driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerEvent {
    /// A transport connection completed its upgrade
    ConnectionAccepted {
        /// Identifier assigned by [`ServerDriver::allocate_connection_id`]
        conn_id: ConnectionId,
    },

    /// A text frame arrived
    FrameReceived {
        /// Originating connection
        conn_id: ConnectionId,
        /// Raw frame text
        text: String,
    },

    /// A transport connection closed, voluntarily or not
    ConnectionClosed {
        /// Closed connection
        conn_id: ConnectionId,
        /// Why it closed (for logging)
        reason: String,
    },

    /// Fire whatever session timers are due
    Tick,
}

/// Actions returned by the driver for the runtime to execute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerAction {
    /// Queue a serialized envelope on a connection
    SendToConnection {
        /// Recipient
        conn_id: ConnectionId,
        /// Serialized envelope
        payload: std::sync::Arc<str>,
    },

    /// Close a connection
    CloseConnection {
        /// Connection to close
        conn_id: ConnectionId,
        /// Reason for closing
        reason: String,
    },
}

/// Errors from event processing.
///
/// None of these are fatal to the server, they indicate a runtime
/// bookkeeping mistake for a single connection.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DriverError {
    /// Connection id is already open
    #[error("connection {0:016x} is already open")]
    DuplicateConnection(ConnectionId),

    /// Event for a connection that is not open
    #[error("connection {0:016x} is not open")]
    UnknownConnection(ConnectionId),
}

/// Driver configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerConfig {
    /// Connections beyond this are closed on accept
    pub max_connections: usize,
    /// Session lifetime configuration
    pub session: SessionConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { max_connections: 10_000, session: SessionConfig::default() }
    }
}

/// Owns the registry and the set of open connections.
pub struct ServerDriver<E>
where
    E: Environment,
{
    env: E,
    registry: SessionRegistry,
    connections: HashSet<ConnectionId>,
    config: ServerConfig,
}

impl<E> ServerDriver<E>
where
    E: Environment,
{
    /// Create a driver with an empty registry.
    pub fn new(env: E, config: ServerConfig) -> Self {
        Self {
            env,
            registry: SessionRegistry::new(config.session),
            connections: HashSet::new(),
            config,
        }
    }

    /// Read-only view of the registry.
    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    /// Environment used for time and randomness.
    pub fn env(&self) -> &E {
        &self.env
    }

    /// Number of open connections.
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Whether `conn_id` is open.
    pub fn is_open(&self, conn_id: ConnectionId) -> bool {
        self.connections.contains(&conn_id)
    }

    /// Draw a random identifier that no open connection uses.
    pub fn allocate_connection_id(&self) -> ConnectionId {
        loop {
            let candidate = self.env.random_u64();
            if !self.connections.contains(&candidate) {
                return candidate;
            }
        }
    }

    /// Process one event.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::DuplicateConnection`] when a connection is
    /// accepted twice and [`DriverError::UnknownConnection`] for frames from
    /// a connection that is not open.
    pub fn process_event(&mut self, event: ServerEvent) -> Result<Vec<ServerAction>, DriverError> {
        match event {
            ServerEvent::ConnectionAccepted { conn_id } => self.handle_accept(conn_id),
            ServerEvent::FrameReceived { conn_id, text } => {
                if !self.connections.contains(&conn_id) {
                    return Err(DriverError::UnknownConnection(conn_id));
                }
                // Deadlines that passed since the last tick fire before the
                // frame sees the registry.
                let now = self.env.now();
                let mut out = self.registry.tick(now);
                out.extend(Dispatcher::dispatch(&mut self.registry, conn_id, &text, now));
                Ok(self.into_actions(out))
            },
            ServerEvent::ConnectionClosed { conn_id, reason } => {
                Ok(self.handle_close(conn_id, &reason))
            },
            ServerEvent::Tick => {
                let now = self.env.now();
                let out = self.registry.tick(now);
                Ok(self.into_actions(out))
            },
        }
    }

    fn handle_accept(&mut self, conn_id: ConnectionId) -> Result<Vec<ServerAction>, DriverError> {
        if self.connections.contains(&conn_id) {
            return Err(DriverError::DuplicateConnection(conn_id));
        }

        if self.connections.len() >= self.config.max_connections {
            tracing::warn!(
                conn_id,
                max = self.config.max_connections,
                "connection refused: server at capacity"
            );
            return Ok(vec![ServerAction::CloseConnection {
                conn_id,
                reason: "server at capacity".to_string(),
            }]);
        }

        self.connections.insert(conn_id);
        tracing::info!(conn_id, open = self.connections.len(), "new client connected");
        Ok(Vec::new())
    }

    fn handle_close(&mut self, conn_id: ConnectionId, reason: &str) -> Vec<ServerAction> {
        if !self.connections.remove(&conn_id) {
            tracing::debug!(conn_id, reason, "close for connection that was never open");
            return Vec::new();
        }

        match self.registry.leave(conn_id) {
            LeaveOutcome::NotJoined => {},
            LeaveOutcome::Left { code, remaining } => {
                tracing::debug!(conn_id, code = ?code, remaining, "member disconnected");
            },
            LeaveOutcome::Closed { code } => {
                tracing::debug!(conn_id, code = ?code, "last member disconnected");
            },
        }

        tracing::info!(conn_id, reason, open = self.connections.len(), "client disconnected");
        Vec::new()
    }

    /// Convert registry sends into actions, skipping connections that are
    /// no longer open.
    fn into_actions(&self, out: Vec<Outbound>) -> Vec<ServerAction> {
        out.into_iter()
            .filter(|o| {
                let open = self.connections.contains(&o.conn_id);
                if !open {
                    tracing::debug!(conn_id = o.conn_id, "skipping send to closed connection");
                }
                open
            })
            .map(|Outbound { conn_id, payload }| {
                ServerAction::SendToConnection { conn_id, payload }
            })
            .collect()
    }
}

impl<E> std::fmt::Debug for ServerDriver<E>
where
    E: Environment,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerDriver")
            .field("connections", &self.connections.len())
            .field("sessions", &self.registry.session_count())
            .field("config", &self.config)
            .finish()
    }
}
