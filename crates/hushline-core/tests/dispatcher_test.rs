//! Dispatcher tests
//!
//! Frames go in as raw text, replies come out as `Outbound` sends. These
//! tests check routing by `type`, code validation per type, and the
//! health-check sentinel.

use std::time::Instant;

use hushline_core::{
    ConnectionId, Dispatcher, Outbound, SessionCode, SessionKind, SessionRegistry,
};
use serde_json::{Value, json};

const CODE: &str = "Abc123456789!@#$";

fn send(registry: &mut SessionRegistry, conn_id: ConnectionId, frame: &Value) -> Vec<Outbound> {
    Dispatcher::dispatch(registry, conn_id, &frame.to_string(), Instant::now())
}

fn decoded(out: &[Outbound], conn_id: ConnectionId) -> Vec<Value> {
    out.iter()
        .filter(|o| o.conn_id == conn_id)
        .map(|o| serde_json::from_str(&o.payload).unwrap())
        .collect()
}

fn code() -> SessionCode {
    SessionCode::parse(CODE).unwrap()
}

#[test]
fn ping_replies_pong() {
    let mut registry = SessionRegistry::default();
    let out = send(&mut registry, 1, &json!({"type": "ping"}));

    assert_eq!(decoded(&out, 1), vec![json!({"type": "pong", "alive": true})]);
}

#[test]
fn healthcheck_code_is_a_ping_whatever_the_type() {
    let mut registry = SessionRegistry::default();

    for frame_type in ["join", "signal", "extend_response", "bogus"] {
        let out = send(&mut registry, 1, &json!({"type": frame_type, "code": "1111111111111111"}));
        assert_eq!(decoded(&out, 1), vec![json!({"type": "pong", "alive": true})]);
    }

    assert_eq!(registry.session_count(), 0, "sentinel must never create a session");
}

#[test]
fn near_miss_of_healthcheck_code_is_not_a_ping() {
    let mut registry = SessionRegistry::default();

    let out = send(&mut registry, 1, &json!({"type": "join", "code": "111111111111111"}));

    assert_eq!(decoded(&out, 1)[0]["reason"], "invalid_code");
}

#[test]
fn unparseable_frame_is_dropped() {
    let mut registry = SessionRegistry::default();
    let out = Dispatcher::dispatch(&mut registry, 1, "{\"type\": \"join\"", Instant::now());

    assert!(out.is_empty());
    assert_eq!(registry.session_count(), 0);
}

#[test]
fn unknown_type_is_an_error() {
    let mut registry = SessionRegistry::default();

    let out = send(&mut registry, 1, &json!({"type": "leave", "code": CODE}));
    assert_eq!(decoded(&out, 1), vec![json!({"type": "error", "reason": "unknown_type"})]);

    let out = send(&mut registry, 1, &json!({"code": CODE}));
    assert_eq!(decoded(&out, 1), vec![json!({"type": "error", "reason": "unknown_type"})]);
}

#[test]
fn join_with_invalid_code_is_rejected() {
    let mut registry = SessionRegistry::default();

    let out = send(&mut registry, 1, &json!({"type": "join", "code": "short"}));

    assert_eq!(
        decoded(&out, 1),
        vec![json!({
            "type": "error",
            "reason": "invalid_code",
            "message": "Code must be 16 ASCII characters",
        })]
    );
    assert_eq!(registry.session_count(), 0);
}

#[test]
fn join_defaults_to_direct() {
    let mut registry = SessionRegistry::default();

    let out = send(&mut registry, 1, &json!({"type": "join", "code": CODE}));

    assert_eq!(decoded(&out, 1), vec![json!({"type": "joined", "code": CODE, "mode": "direct"})]);
    assert_eq!(registry.session(&code()).unwrap().kind(), SessionKind::Direct);
}

#[test]
fn group_mode_creates_uncapped_session() {
    let mut registry = SessionRegistry::default();

    for conn_id in 1..=3 {
        let frame = json!({"type": "join", "code": CODE, "mode": "group"});
        let out = send(&mut registry, conn_id, &frame);
        assert_eq!(decoded(&out, conn_id)[0]["type"], "joined");
    }

    assert_eq!(registry.session(&code()).unwrap().member_count(), 3);
}

#[test]
fn signal_is_relayed_verbatim_to_others_only() {
    let mut registry = SessionRegistry::default();
    send(&mut registry, 1, &json!({"type": "join", "code": CODE}));
    send(&mut registry, 2, &json!({"type": "join", "code": CODE}));

    let raw = r#"{"type":"signal","code":"Abc123456789!@#$","data":{"k":1},"z":null}"#;
    let out = Dispatcher::dispatch(&mut registry, 1, raw, Instant::now());

    assert_eq!(out.len(), 1);
    assert_eq!(out[0].conn_id, 2);
    assert_eq!(&*out[0].payload, raw);
}

#[test]
fn msg_is_relayed_to_every_other_group_member() {
    let mut registry = SessionRegistry::default();
    for conn_id in 1..=4 {
        send(&mut registry, conn_id, &json!({"type": "join", "code": CODE, "mode": "group"}));
    }

    let out = send(&mut registry, 3, &json!({"type": "msg", "code": CODE, "ciphertext": "AAAA"}));

    let mut recipients: Vec<_> = out.iter().map(|o| o.conn_id).collect();
    recipients.sort_unstable();
    assert_eq!(recipients, vec![1, 2, 4]);
}

#[test]
fn relay_with_invalid_code_is_silently_dropped() {
    let mut registry = SessionRegistry::default();
    send(&mut registry, 1, &json!({"type": "join", "code": CODE}));
    send(&mut registry, 2, &json!({"type": "join", "code": CODE}));

    let out = send(&mut registry, 1, &json!({"type": "signal", "code": 42, "data": {}}));
    assert!(out.is_empty());

    let out = send(&mut registry, 1, &json!({"type": "msg", "code": "Abc123456789!@#"}));
    assert!(out.is_empty());
}

#[test]
fn relay_to_unknown_session_goes_nowhere() {
    let mut registry = SessionRegistry::default();
    let out = send(&mut registry, 1, &json!({"type": "msg", "code": CODE}));
    assert!(out.is_empty());
}

#[test]
fn extend_response_with_invalid_code_is_rejected() {
    let mut registry = SessionRegistry::default();

    let frame = json!({"type": "extend_response", "code": "nope", "accept": true});
    let out = send(&mut registry, 1, &frame);

    assert_eq!(decoded(&out, 1)[0]["reason"], "invalid_code");
}

#[test]
fn declined_extension_only_answers_sender() {
    let mut registry = SessionRegistry::default();
    send(&mut registry, 1, &json!({"type": "join", "code": CODE}));
    send(&mut registry, 2, &json!({"type": "join", "code": CODE}));

    let frame = json!({"type": "extend_response", "code": CODE, "accept": false});
    let out = send(&mut registry, 1, &frame);

    assert_eq!(decoded(&out, 1), vec![json!({"type": "extend_declined", "code": CODE})]);
    assert!(decoded(&out, 2).is_empty());
    assert_eq!(registry.session(&code()).unwrap().renew_count(), 0);
}

#[test]
fn accepted_extension_is_broadcast() {
    let mut registry = SessionRegistry::default();
    send(&mut registry, 1, &json!({"type": "join", "code": CODE}));
    send(&mut registry, 2, &json!({"type": "join", "code": CODE}));

    let frame = json!({"type": "extend_response", "code": CODE, "accept": true});
    let out = send(&mut registry, 2, &frame);

    let expected = json!({"type": "extended", "code": CODE, "renewCount": 1});
    assert_eq!(decoded(&out, 1), vec![expected.clone()]);
    assert_eq!(decoded(&out, 2), vec![expected]);
}

#[test]
fn accepted_extension_for_missing_session_is_no_room() {
    let mut registry = SessionRegistry::default();

    let frame = json!({"type": "extend_response", "code": CODE, "accept": true});
    let out = send(&mut registry, 1, &frame);

    assert_eq!(
        decoded(&out, 1),
        vec![json!({"type": "error", "reason": "no_room", "message": "Room does not exist"})]
    );
}
