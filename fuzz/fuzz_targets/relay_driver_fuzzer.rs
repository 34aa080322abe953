//! Fuzz target for the relay driver
//!
//! # Strategy
//!
//! - Event sequences: connects, disconnects, duplicate accepts, frames and
//!   arbitrary time jumps interleaved freely
//! - Structured frames built from a small code pool so sessions actually
//!   form, mixed with fully arbitrary raw text
//! - Time jumps large enough to cross warning and expiry deadlines
//!
//! # Invariants
//!
//! - Every session is non-empty and reachable through the reverse index
//! - Direct sessions never hold more than two members
//! - Renewals never exceed the configured maximum
//! - Every session member is an open connection
//! - Sends are only ever addressed to open connections
//! - Relayed frames never reach their sender
//! - NEVER panic on any input

#![no_main]

use std::time::Duration;

use arbitrary::Arbitrary;
use hushline_core::{ConnectionId, Environment, SessionKind};
use hushline_harness::SimEnv;
use hushline_server::{DriverConfig, ServerAction, ServerDriver, ServerEvent};
use libfuzzer_sys::fuzz_target;
use serde_json::json;

const CODES: [&str; 3] = ["AAAAAAAAAAAAAAAA", "B b B b B b B b ", "~~~~~~~~~~~~~~~~"];

#[derive(Debug, Arbitrary)]
struct FuzzInput {
    seed: u64,
    events: Vec<FuzzEvent>,
}

#[derive(Debug, Arbitrary)]
enum FuzzEvent {
    Connect,
    Disconnect { slot: u8 },
    DuplicateAccept { slot: u8 },
    Frame { slot: u8, frame: FuzzFrame },
    Raw { slot: u8, text: String },
    Advance { secs: u16 },
}

#[derive(Debug, Arbitrary)]
enum FuzzFrame {
    Ping,
    Join { code: FuzzCode, group: Option<bool> },
    Signal { code: FuzzCode },
    Msg { code: FuzzCode },
    ExtendResponse { code: FuzzCode, accept: Option<bool> },
    Unknown { tag: String, code: FuzzCode },
}

#[derive(Debug, Arbitrary)]
enum FuzzCode {
    Pool(u8),
    Healthcheck,
    Missing,
    Raw(String),
}

impl FuzzCode {
    fn value(&self) -> serde_json::Value {
        match self {
            Self::Pool(i) => json!(CODES[usize::from(*i) % CODES.len()]),
            Self::Healthcheck => json!(hushline_core::HEALTHCHECK_CODE),
            Self::Missing => serde_json::Value::Null,
            Self::Raw(s) => json!(s),
        }
    }
}

impl FuzzFrame {
    /// Whether the relay forwards this frame to other members instead of
    /// answering it.
    fn relays(&self) -> bool {
        match self {
            Self::Signal { code } | Self::Msg { code } => {
                code.value() != json!(hushline_core::HEALTHCHECK_CODE)
            },
            _ => false,
        }
    }

    fn render(&self) -> String {
        let (frame_type, code) = match self {
            Self::Ping => return json!({"type": "ping"}).to_string(),
            Self::Join { code, group } => {
                let mut frame = json!({"type": "join", "code": code.value()});
                if let Some(group) = group {
                    frame["mode"] = json!(if *group { "group" } else { "direct" });
                }
                return frame.to_string();
            },
            Self::ExtendResponse { code, accept } => {
                let mut frame = json!({"type": "extend_response", "code": code.value()});
                if let Some(accept) = accept {
                    frame["accept"] = json!(accept);
                }
                return frame.to_string();
            },
            Self::Signal { code } => ("signal", code),
            Self::Msg { code } => ("msg", code),
            Self::Unknown { tag, code } => (tag.as_str(), code),
        };
        json!({"type": frame_type, "code": code.value(), "payload": "opaque"}).to_string()
    }
}

fuzz_target!(|input: FuzzInput| {
    let env = SimEnv::with_seed(input.seed);
    let config = DriverConfig { max_connections: 6, ..DriverConfig::default() };
    let max_extensions = config.session.max_extensions;
    let mut driver = ServerDriver::new(env.clone(), config);
    let mut open: Vec<ConnectionId> = Vec::new();

    for event in input.events.iter().take(256) {
        let pick = |slot: &u8| (!open.is_empty()).then(|| open[usize::from(*slot) % open.len()]);

        let (sender, actions) = match event {
            FuzzEvent::Connect => {
                let conn_id = driver.allocate_connection_id();
                let Ok(actions) = driver.process_event(ServerEvent::ConnectionAccepted { conn_id })
                else {
                    panic!("fresh connection id rejected");
                };
                if driver.is_open(conn_id) {
                    open.push(conn_id);
                } else {
                    assert!(matches!(
                        actions.as_slice(),
                        [ServerAction::CloseConnection { conn_id: c, .. }] if *c == conn_id
                    ));
                }
                (None, actions)
            },
            FuzzEvent::Disconnect { slot } => {
                let Some(conn_id) = pick(slot) else { continue };
                open.retain(|c| *c != conn_id);
                let event = ServerEvent::ConnectionClosed { conn_id, reason: "fuzz".into() };
                let actions = driver.process_event(event).unwrap_or_default();
                assert!(actions.is_empty(), "closing never notifies anyone");
                assert!(driver.registry().session_of(conn_id).is_none());
                (None, actions)
            },
            FuzzEvent::DuplicateAccept { slot } => {
                let Some(conn_id) = pick(slot) else { continue };
                let result = driver.process_event(ServerEvent::ConnectionAccepted { conn_id });
                assert!(result.is_err(), "duplicate accept must be rejected");
                continue;
            },
            FuzzEvent::Frame { slot, frame } => {
                let Some(conn_id) = pick(slot) else { continue };
                let text = frame.render();
                let is_relay = frame.relays();
                let event = ServerEvent::FrameReceived { conn_id, text };
                let Ok(actions) = driver.process_event(event) else {
                    panic!("frame from open connection rejected");
                };
                (is_relay.then_some(conn_id), actions)
            },
            FuzzEvent::Raw { slot, text } => {
                let Some(conn_id) = pick(slot) else { continue };
                let event = ServerEvent::FrameReceived { conn_id, text: text.clone() };
                let Ok(actions) = driver.process_event(event) else {
                    panic!("frame from open connection rejected");
                };
                (None, actions)
            },
            FuzzEvent::Advance { secs } => {
                env.advance(Duration::from_secs(u64::from(*secs)));
                let Ok(actions) = driver.process_event(ServerEvent::Tick) else {
                    panic!("tick rejected");
                };
                (None, actions)
            },
        };

        for action in &actions {
            if let ServerAction::SendToConnection { conn_id, .. } = action {
                assert!(driver.is_open(*conn_id), "send addressed to a closed connection");
                assert_ne!(Some(*conn_id), sender, "relay echoed to sender");
            }
        }

        let registry = driver.registry();
        let mut indexed = 0;
        for session in registry.sessions() {
            assert!(session.member_count() > 0, "empty session is discoverable");
            assert!(session.renew_count() <= max_extensions);
            if session.kind() == SessionKind::Direct {
                assert!(session.member_count() <= 2, "direct session over capacity");
            }
            for member in session.members() {
                assert!(driver.is_open(member), "closed connection still a member");
                assert_eq!(registry.session_of(member), Some(session.code()));
                indexed += 1;
            }
        }
        assert_eq!(indexed, registry.member_count(), "reverse index has stale entries");

        if let Some(deadline) = registry.next_deadline() {
            assert!(deadline > env.now(), "due timer left unfired");
        }
    }
});
