//! Action execution against per-connection outbound queues.
//!
//! Each open WebSocket has a writer task draining a bounded queue. The
//! executor maps connection ids to the sending half of those queues and
//! turns [`ServerAction`]s into queue operations. It never awaits, so it
//! can run while the driver lock is held without stalling other
//! connections behind a slow peer.

use std::{collections::HashMap, sync::Arc};

use hushline_core::ConnectionId;
use tokio::sync::mpsc::{self, error::TrySendError};

use crate::driver::ServerAction;

/// Counters for one call to [`ActionExecutor::execute`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecutionReport {
    /// Payloads queued for a writer
    pub queued: usize,
    /// Payloads dropped because the queue was full or gone
    pub dropped: usize,
    /// Connections whose queue was closed
    pub closed: usize,
}

/// Routes driver actions to connection writer queues.
#[derive(Debug, Default)]
pub struct ActionExecutor {
    queues: HashMap<ConnectionId, mpsc::Sender<Arc<str>>>,
}

impl ActionExecutor {
    /// Create an executor with no registered connections.
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach the outbound queue for a connection.
    pub fn register(&mut self, conn_id: ConnectionId, queue: mpsc::Sender<Arc<str>>) {
        self.queues.insert(conn_id, queue);
    }

    /// Detach a connection's queue.
    ///
    /// Dropping the sender ends the writer task once it drains what is
    /// already queued.
    pub fn unregister(&mut self, conn_id: ConnectionId) -> bool {
        self.queues.remove(&conn_id).is_some()
    }

    /// Number of registered queues.
    pub fn len(&self) -> usize {
        self.queues.len()
    }

    /// Whether no queues are registered.
    pub fn is_empty(&self) -> bool {
        self.queues.is_empty()
    }

    /// Execute actions in order.
    pub fn execute(&mut self, actions: Vec<ServerAction>) -> ExecutionReport {
        let mut report = ExecutionReport::default();

        for action in actions {
            match action {
                ServerAction::SendToConnection { conn_id, payload } => {
                    let Some(queue) = self.queues.get(&conn_id) else {
                        tracing::debug!(conn_id, "no queue for connection, dropping payload");
                        report.dropped += 1;
                        continue;
                    };

                    match queue.try_send(payload) {
                        Ok(()) => report.queued += 1,
                        Err(TrySendError::Full(_)) => {
                            tracing::warn!(conn_id, "outbound queue full, dropping payload");
                            report.dropped += 1;
                        },
                        Err(TrySendError::Closed(_)) => {
                            tracing::debug!(conn_id, "writer gone, dropping payload");
                            report.dropped += 1;
                        },
                    }
                },
                ServerAction::CloseConnection { conn_id, reason } => {
                    if self.queues.remove(&conn_id).is_some() {
                        tracing::info!(conn_id, reason, "closing connection");
                        report.closed += 1;
                    }
                },
            }
        }

        report
    }
}
