//! Operations for model-based testing.
//!
//! Operations are generated by proptest and applied to both the model and
//! the real relay. Identifiers are small integers; [`Operation::normalize`]
//! folds them into the configured client and code ranges so every
//! generated value is meaningful.

/// Client identifier (0-indexed).
pub type ClientId = u8;

/// Session code index, expanded by [`code_for`].
pub type ModelCode = u8;

/// Sixteen-character session code for a model code index.
pub fn code_for(code: ModelCode) -> String {
    format!("room-{code:011}")
}

/// Actions a client (or the clock) can take.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    /// Client sends `join`.
    Join {
        /// Joining client.
        client_id: ClientId,
        /// Target session.
        code: ModelCode,
        /// Request a group session instead of direct.
        group: bool,
    },

    /// Client sends a `msg` frame to a session.
    Relay {
        /// Sending client.
        client_id: ClientId,
        /// Target session.
        code: ModelCode,
        /// Payload marker, so deliveries can be told apart.
        seq: u8,
    },

    /// Client answers an extension prompt.
    Extend {
        /// Answering client.
        client_id: ClientId,
        /// Target session.
        code: ModelCode,
        /// Whether the extension is accepted.
        accept: bool,
    },

    /// Client sends `ping`.
    Ping {
        /// Pinging client.
        client_id: ClientId,
    },

    /// Client drops its connection and opens a new one.
    Reconnect {
        /// Reconnecting client.
        client_id: ClientId,
    },

    /// Virtual time passes.
    AdvanceTime {
        /// Milliseconds to advance.
        millis: u16,
    },
}

impl Operation {
    /// Fold identifiers into `num_clients` clients and `num_codes` codes.
    #[must_use]
    pub fn normalize(self, num_clients: u8, num_codes: u8) -> Self {
        let client = |id: ClientId| id % num_clients.max(1);
        let code = |c: ModelCode| c % num_codes.max(1);

        match self {
            Self::Join { client_id, code: c, group } => {
                Self::Join { client_id: client(client_id), code: code(c), group }
            },
            Self::Relay { client_id, code: c, seq } => {
                Self::Relay { client_id: client(client_id), code: code(c), seq }
            },
            Self::Extend { client_id, code: c, accept } => {
                Self::Extend { client_id: client(client_id), code: code(c), accept }
            },
            Self::Ping { client_id } => Self::Ping { client_id: client(client_id) },
            Self::Reconnect { client_id } => Self::Reconnect { client_id: client(client_id) },
            Self::AdvanceTime { millis } => Self::AdvanceTime { millis },
        }
    }

    /// The frame a client would send for this operation, if any.
    pub fn frame(&self) -> Option<serde_json::Value> {
        use serde_json::json;

        match *self {
            Self::Join { code, group, .. } => {
                let mode = if group { "group" } else { "direct" };
                Some(json!({"type": "join", "code": code_for(code), "mode": mode}))
            },
            Self::Relay { code, seq, .. } => {
                Some(json!({"type": "msg", "code": code_for(code), "seq": seq}))
            },
            Self::Extend { code, accept, .. } => {
                Some(json!({"type": "extend_response", "code": code_for(code), "accept": accept}))
            },
            Self::Ping { .. } => Some(json!({"type": "ping"})),
            Self::Reconnect { .. } | Self::AdvanceTime { .. } => None,
        }
    }
}
