//! Fuzz target for inbound envelope parsing and dispatch
//!
//! # Strategy
//!
//! - Arbitrary bytes interpreted as UTF-8 frame text
//! - Dispatched against a registry that already holds a direct pair and a
//!   group session
//!
//! # Invariants
//!
//! - NEVER panic on any input
//! - Every reply is valid JSON with a string `type`, unless it is a relayed
//!   frame, which must equal the input byte for byte
//! - Only relays and accepted extensions reach anyone but the sender

#![no_main]

use std::time::Instant;

use hushline_core::{Dispatcher, Envelope, MessageType, SessionCode, SessionKind, SessionRegistry};
use libfuzzer_sys::fuzz_target;

const DIRECT: &str = "AAAAAAAAAAAAAAAA";
const GROUP: &str = "BBBBBBBBBBBBBBBB";
const OUTSIDER: u64 = 99;

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };

    let now = Instant::now();
    let mut registry = SessionRegistry::default();
    for (conn, code, kind) in [
        (1, DIRECT, SessionKind::Direct),
        (2, DIRECT, SessionKind::Direct),
        (3, GROUP, SessionKind::Group),
        (4, GROUP, SessionKind::Group),
    ] {
        if let Ok(code) = SessionCode::parse(code) {
            registry.join(conn, code, kind, now);
        }
    }

    let message_type = Envelope::parse(text).map(|e| e.message_type).ok();
    let is_relay = matches!(message_type, Some(MessageType::Signal | MessageType::Msg));
    let may_fan_out = is_relay || matches!(message_type, Some(MessageType::ExtendResponse));

    let out = Dispatcher::dispatch(&mut registry, OUTSIDER, text, now);

    for sent in &out {
        if is_relay && sent.conn_id != OUTSIDER {
            assert_eq!(&*sent.payload, text, "relay must be verbatim");
            continue;
        }
        assert!(sent.conn_id == OUTSIDER || may_fan_out, "reply leaked to another member");

        let value: serde_json::Value = match serde_json::from_str(&sent.payload) {
            Ok(value) => value,
            Err(e) => panic!("reply is not JSON: {e}"),
        };
        assert!(value["type"].is_string(), "reply without a type tag");
    }
});
