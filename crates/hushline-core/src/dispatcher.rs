//! Frame dispatch.
//!
//! Turns one inbound text frame into registry calls and replies. Stateless:
//! everything it knows lives in the [`SessionRegistry`] it is handed.
//!
//! | type | invalid code | effect |
//! |---|---|---|
//! | `ping` | n/a | `pong` to sender |
//! | `join` | `error invalid_code` | [`SessionRegistry::join`] |
//! | `signal`, `msg` | dropped | frame relayed verbatim to other members |
//! | `extend_response` | `error invalid_code` | extend, or `extend_declined` to sender |
//! | other | n/a | `error unknown_type` |
//!
//! The health-check sentinel code short-circuits to `pong` before any of
//! the above.

use std::{sync::Arc, time::Instant};

use crate::{
    ConnectionId,
    code::SessionCode,
    protocol::{Envelope, ErrorReason, MessageType, ServerMessage, SessionKind},
    registry::{Outbound, SessionRegistry},
};

/// Routes inbound frames to the registry.
#[derive(Debug, Clone, Copy, Default)]
pub struct Dispatcher;

impl Dispatcher {
    /// Handle one text frame from `conn_id`.
    ///
    /// Unparseable frames are logged and dropped.
    pub fn dispatch(
        registry: &mut SessionRegistry,
        conn_id: ConnectionId,
        raw: &str,
        now: Instant,
    ) -> Vec<Outbound> {
        let envelope = match Envelope::parse(raw) {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::debug!(conn_id, error = %e, "dropping unparseable frame");
                return Vec::new();
            },
        };

        if validated(&envelope).is_some_and(|code| code.is_healthcheck()) {
            return reply(conn_id, &ServerMessage::pong());
        }

        match envelope.message_type {
            MessageType::Ping => reply(conn_id, &ServerMessage::pong()),
            MessageType::Join => {
                let Some(code) = validated(&envelope) else {
                    return reply(conn_id, &ServerMessage::error(ErrorReason::InvalidCode, None));
                };
                let kind = SessionKind::from_mode(envelope.mode.as_deref());
                registry.join(conn_id, code, kind, now)
            },
            MessageType::Signal | MessageType::Msg => {
                let Some(code) = validated(&envelope) else {
                    tracing::debug!(conn_id, "dropping relay frame with invalid code");
                    return Vec::new();
                };
                let payload: Arc<str> = Arc::from(raw);
                registry.broadcast(&code, Some(conn_id), &payload)
            },
            MessageType::ExtendResponse => {
                let Some(code) = validated(&envelope) else {
                    return reply(conn_id, &ServerMessage::error(ErrorReason::InvalidCode, None));
                };
                if envelope.accept {
                    registry.extend(conn_id, &code, now)
                } else {
                    tracing::info!(conn_id, code = ?code, "extension declined");
                    reply(conn_id, &ServerMessage::ExtendDeclined { code: code.to_string() })
                }
            },
            MessageType::Unknown(tag) => {
                tracing::debug!(conn_id, tag = ?tag, "unknown message type");
                reply(conn_id, &ServerMessage::error(ErrorReason::UnknownType, None))
            },
        }
    }
}

fn validated(envelope: &Envelope) -> Option<SessionCode> {
    envelope.code.as_deref().and_then(|raw| SessionCode::parse(raw).ok())
}

fn reply(conn_id: ConnectionId, msg: &ServerMessage) -> Vec<Outbound> {
    match msg.encode() {
        Ok(payload) => vec![Outbound { conn_id, payload }],
        Err(e) => {
            tracing::error!(kind = msg.type_name(), error = %e, "failed to encode reply");
            Vec::new()
        },
    }
}
