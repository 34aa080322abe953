//! In-memory relay: a real [`ServerDriver`] with inboxes instead of sockets.
//!
//! Actions are executed synchronously. Sends append to the recipient's
//! inbox; closes drop the inbox and report the closure back to the driver,
//! the same order the production transport produces.
//!
//! [`SimRelay::advance`] walks the virtual clock from deadline to deadline,
//! so every warning and expiry fires at its exact instant regardless of how
//! large the jump is.

use std::{collections::HashMap, time::Duration};

use hushline_core::{ConnectionId, Environment, SessionRegistry};
use hushline_server::{DriverConfig, DriverError, ServerAction, ServerDriver, ServerEvent};
use serde_json::Value;

use crate::SimEnv;

/// Relay driven entirely in memory.
#[derive(Debug)]
pub struct SimRelay {
    env: SimEnv,
    driver: ServerDriver<SimEnv>,
    inboxes: HashMap<ConnectionId, Vec<String>>,
}

impl SimRelay {
    /// Relay with default configuration.
    pub fn new(seed: u64) -> Self {
        Self::with_config(seed, DriverConfig::default())
    }

    /// Relay with explicit driver configuration.
    pub fn with_config(seed: u64, config: DriverConfig) -> Self {
        let env = SimEnv::with_seed(seed);
        let driver = ServerDriver::new(env.clone(), config);
        Self { env, driver, inboxes: HashMap::new() }
    }

    /// Shared simulated environment.
    pub fn env(&self) -> &SimEnv {
        &self.env
    }

    /// Underlying driver.
    pub fn driver(&self) -> &ServerDriver<SimEnv> {
        &self.driver
    }

    /// Session state.
    pub fn registry(&self) -> &SessionRegistry {
        self.driver.registry()
    }

    /// Whether `conn_id` is still connected.
    pub fn is_open(&self, conn_id: ConnectionId) -> bool {
        self.inboxes.contains_key(&conn_id)
    }

    /// Open a connection. Returns `None` if the relay refused it.
    pub fn connect(&mut self) -> Result<Option<ConnectionId>, DriverError> {
        let conn_id = self.driver.allocate_connection_id();
        self.inboxes.insert(conn_id, Vec::new());
        self.process(ServerEvent::ConnectionAccepted { conn_id })?;
        Ok(self.is_open(conn_id).then_some(conn_id))
    }

    /// Deliver a raw text frame from `conn_id`.
    pub fn send(&mut self, conn_id: ConnectionId, text: &str) -> Result<(), DriverError> {
        self.process(ServerEvent::FrameReceived { conn_id, text: text.to_string() })
    }

    /// Deliver a JSON frame from `conn_id`.
    pub fn send_json(&mut self, conn_id: ConnectionId, frame: &Value) -> Result<(), DriverError> {
        self.send(conn_id, &frame.to_string())
    }

    /// Close `conn_id` from the client side.
    pub fn disconnect(&mut self, conn_id: ConnectionId) -> Result<(), DriverError> {
        self.inboxes.remove(&conn_id);
        self.process(ServerEvent::ConnectionClosed { conn_id, reason: "client closed".into() })
    }

    /// Advance virtual time by `by`, firing timers as their deadlines pass.
    pub fn advance(&mut self, by: Duration) -> Result<(), DriverError> {
        let target = self.env.now() + by;

        while let Some(deadline) = self.driver.registry().next_deadline() {
            if deadline > target {
                break;
            }
            self.env.advance_to(deadline);
            self.process(ServerEvent::Tick)?;
        }

        self.env.advance_to(target);
        Ok(())
    }

    /// Drain the raw frames delivered to `conn_id`.
    pub fn take_raw(&mut self, conn_id: ConnectionId) -> Vec<String> {
        self.inboxes.get_mut(&conn_id).map(std::mem::take).unwrap_or_default()
    }

    /// Drain and decode the frames delivered to `conn_id`.
    ///
    /// Frames that are not JSON are skipped; the relay never produces them
    /// except by forwarding what a client sent.
    pub fn take_inbox(&mut self, conn_id: ConnectionId) -> Vec<Value> {
        self.take_raw(conn_id)
            .iter()
            .filter_map(|raw| serde_json::from_str(raw).ok())
            .collect()
    }

    fn process(&mut self, event: ServerEvent) -> Result<(), DriverError> {
        let actions = self.driver.process_event(event)?;
        self.execute(actions)
    }

    fn execute(&mut self, actions: Vec<ServerAction>) -> Result<(), DriverError> {
        for action in actions {
            match action {
                ServerAction::SendToConnection { conn_id, payload } => {
                    if let Some(inbox) = self.inboxes.get_mut(&conn_id) {
                        inbox.push(payload.to_string());
                    }
                },
                ServerAction::CloseConnection { conn_id, reason } => {
                    if self.inboxes.remove(&conn_id).is_some() {
                        self.process(ServerEvent::ConnectionClosed { conn_id, reason })?;
                    }
                },
            }
        }
        Ok(())
    }
}
