//! Envelope codec.
//!
//! Every frame on the wire is a JSON object tagged by a `type` field. The
//! relay reads only the handful of routing fields it needs (`type`, `code`,
//! `mode`, `accept`) and never looks at anything else, so relayed payloads
//! stay opaque.
//!
//! Outbound envelopes are produced from [`ServerMessage`] and serialized once
//! into a shared `Arc<str>` so a broadcast does not re-encode per recipient.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Errors from envelope parsing and encoding.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Frame is not valid JSON
    #[error("malformed frame: {0}")]
    Malformed(#[source] serde_json::Error),

    /// Outbound envelope could not be serialized
    #[error("failed to encode envelope: {0}")]
    Encode(#[source] serde_json::Error),
}

/// Inbound message types understood by the dispatcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageType {
    /// Liveness probe
    Ping,
    /// Join a session
    Join,
    /// Relay signaling data to other members
    Signal,
    /// Relay ciphertext to other members
    Msg,
    /// Accept or decline a pending renewal
    ExtendResponse,
    /// Anything else, including a missing `type`
    Unknown(Option<String>),
}

impl MessageType {
    fn from_tag(tag: Option<&str>) -> Self {
        match tag {
            Some("ping") => Self::Ping,
            Some("join") => Self::Join,
            Some("signal") => Self::Signal,
            Some("msg") => Self::Msg,
            Some("extend_response") => Self::ExtendResponse,
            other => Self::Unknown(other.map(str::to_owned)),
        }
    }
}

/// Routing view of a parsed inbound frame.
///
/// Fields with the wrong JSON type are treated as absent: a numeric `code`
/// is as invalid as a missing one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    /// Declared message type
    pub message_type: MessageType,
    /// Raw `code` field, unvalidated
    pub code: Option<String>,
    /// Raw `mode` field
    pub mode: Option<String>,
    /// `accept` is honoured only when it is the JSON literal `true`
    pub accept: bool,
}

impl Envelope {
    /// Parse a raw text frame.
    ///
    /// Valid JSON that is not an object parses into an envelope with no
    /// fields, which dispatches as an unknown type.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::Malformed`] if `raw` is not JSON.
    pub fn parse(raw: &str) -> Result<Self, ProtocolError> {
        let value: Value = serde_json::from_str(raw).map_err(ProtocolError::Malformed)?;

        let field = |name: &str| value.get(name).and_then(Value::as_str).map(str::to_owned);

        Ok(Self {
            message_type: MessageType::from_tag(value.get("type").and_then(Value::as_str)),
            code: field("code"),
            mode: field("mode"),
            accept: value.get("accept").and_then(Value::as_bool).unwrap_or(false),
        })
    }
}

/// Membership policy of a session, fixed by the first join.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionKind {
    /// At most two members, announces `session_ready` when paired
    Direct,
    /// Unbounded membership
    Group,
}

impl SessionKind {
    /// Derive the kind from a join's `mode` field.
    ///
    /// Only the literal `group` selects a group session. Missing or
    /// unrecognised modes fall back to direct.
    pub fn from_mode(mode: Option<&str>) -> Self {
        match mode {
            Some("group") => Self::Group,
            _ => Self::Direct,
        }
    }

    /// Wire name of the kind.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Direct => "direct",
            Self::Group => "group",
        }
    }
}

/// Reason carried by an `error` envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorReason {
    /// `type` not recognised
    UnknownType,
    /// Session code failed validation
    InvalidCode,
    /// Direct session already has two members
    RoomFull,
    /// No live session for the code
    NoRoom,
    /// Renewal budget exhausted
    MaxExtensions,
}

impl ErrorReason {
    /// Human-readable explanation sent alongside the reason, if any.
    pub fn message(self) -> Option<&'static str> {
        match self {
            Self::UnknownType => None,
            Self::InvalidCode => Some("Code must be 16 ASCII characters"),
            Self::RoomFull => Some("Direct room already has 2 clients"),
            Self::NoRoom => Some("Room does not exist"),
            Self::MaxExtensions => Some("Maximum extensions reached"),
        }
    }
}

/// Envelopes originated by the relay.
///
/// Relayed `signal`/`msg` frames are not represented here: they are forwarded
/// as the exact text received.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Reply to a liveness probe
    Pong {
        /// Always `true`
        alive: bool,
    },

    /// Requester is now a member of the session
    Joined {
        /// Session code
        code: String,
        /// Session kind, which may differ from the requested mode
        mode: SessionKind,
    },

    /// Direct session has its second member
    SessionReady {
        /// Session code
        code: String,
    },

    /// Request was refused
    Error {
        /// Machine-readable reason
        reason: ErrorReason,
        /// Session code, when the error concerns a specific session
        #[serde(skip_serializing_if = "Option::is_none", default)]
        code: Option<String>,
        /// Human-readable explanation
        #[serde(skip_serializing_if = "Option::is_none", default)]
        message: Option<String>,
    },

    /// Session is about to expire, members may ask for a renewal
    ExtendRequest {
        /// Session code
        code: String,
        /// Renewals still available
        #[serde(rename = "remainingExtensions")]
        remaining_extensions: u32,
    },

    /// Session lifetime was reset
    Extended {
        /// Session code
        code: String,
        /// Renewals used so far
        #[serde(rename = "renewCount")]
        renew_count: u32,
    },

    /// Sender declined a renewal
    ExtendDeclined {
        /// Session code
        code: String,
    },

    /// Session was destroyed by its expiry timer
    Expired {
        /// Session code
        code: String,
    },
}

impl ServerMessage {
    /// `pong` reply.
    pub fn pong() -> Self {
        Self::Pong { alive: true }
    }

    /// `error` envelope with the reason's standard message.
    pub fn error(reason: ErrorReason, code: Option<&str>) -> Self {
        Self::Error {
            reason,
            code: code.map(str::to_owned),
            message: reason.message().map(str::to_owned),
        }
    }

    /// Wire name of the envelope type.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Pong { .. } => "pong",
            Self::Joined { .. } => "joined",
            Self::SessionReady { .. } => "session_ready",
            Self::Error { .. } => "error",
            Self::ExtendRequest { .. } => "extend_request",
            Self::Extended { .. } => "extended",
            Self::ExtendDeclined { .. } => "extend_declined",
            Self::Expired { .. } => "expired",
        }
    }

    /// Serialize to the shared wire representation.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::Encode`] if serialization fails.
    pub fn encode(&self) -> Result<Arc<str>, ProtocolError> {
        serde_json::to_string(self).map(Arc::from).map_err(ProtocolError::Encode)
    }
}
