//! Deterministic end-to-end scenarios.
//!
//! Each scenario drives a real driver through `SimRelay` with virtual time,
//! so fifteen-minute session lifetimes run instantly.

use std::time::Duration;

use hushline_harness::SimRelay;
use hushline_server::DriverConfig;
use serde_json::{Value, json};

const CODE: &str = "Abc123456789!@#$";

fn types(inbox: &[Value]) -> Vec<&str> {
    inbox.iter().filter_map(|v| v["type"].as_str()).collect()
}

#[test]
fn two_party_session_lifecycle() {
    let mut relay = SimRelay::new(1);
    let a = relay.connect().unwrap().unwrap();
    let b = relay.connect().unwrap().unwrap();

    relay.send_json(a, &json!({"type": "join", "code": CODE})).unwrap();
    relay.send_json(b, &json!({"type": "join", "code": CODE})).unwrap();
    assert_eq!(types(&relay.take_inbox(a)), ["joined", "session_ready"]);
    assert_eq!(types(&relay.take_inbox(b)), ["joined", "session_ready"]);

    let offer = r#"{"type":"signal","code":"Abc123456789!@#$","data":{"offer":"x"}}"#;
    relay.send(a, offer).unwrap();
    assert_eq!(relay.take_raw(b), vec![offer.to_string()]);
    assert!(relay.take_raw(a).is_empty());

    relay.advance(Duration::from_secs(14 * 60 + 30)).unwrap();
    let request = json!({"type": "extend_request", "code": CODE, "remainingExtensions": 3});
    assert_eq!(relay.take_inbox(a), vec![request.clone()]);
    assert_eq!(relay.take_inbox(b), vec![request]);

    relay.advance(Duration::from_secs(30)).unwrap();
    assert_eq!(relay.take_inbox(a), vec![json!({"type": "expired", "code": CODE})]);
    assert_eq!(relay.take_inbox(b), vec![json!({"type": "expired", "code": CODE})]);
    assert_eq!(relay.registry().session_count(), 0);
}

#[test]
fn a_single_large_jump_fires_warning_and_expiry_in_order() {
    let mut relay = SimRelay::new(2);
    let a = relay.connect().unwrap().unwrap();
    relay.send_json(a, &json!({"type": "join", "code": CODE})).unwrap();
    relay.take_inbox(a);

    relay.advance(Duration::from_secs(3600)).unwrap();

    assert_eq!(types(&relay.take_inbox(a)), ["extend_request", "expired"]);
}

#[test]
fn extensions_run_out_after_three() {
    let mut relay = SimRelay::new(3);
    let a = relay.connect().unwrap().unwrap();
    relay.send_json(a, &json!({"type": "join", "code": CODE, "mode": "group"})).unwrap();
    relay.take_inbox(a);

    let accept = json!({"type": "extend_response", "code": CODE, "accept": true});
    for expected_remaining in [3, 2, 1] {
        relay.advance(Duration::from_secs(14 * 60 + 30)).unwrap();
        let inbox = relay.take_inbox(a);
        assert_eq!(types(&inbox), ["extend_request"]);
        assert_eq!(inbox[0]["remainingExtensions"], expected_remaining);

        relay.send_json(a, &accept).unwrap();
        assert_eq!(types(&relay.take_inbox(a)), ["extended"]);
    }

    relay.advance(Duration::from_secs(14 * 60 + 30)).unwrap();
    assert_eq!(relay.take_inbox(a)[0]["remainingExtensions"], 0);

    relay.send_json(a, &accept).unwrap();
    assert_eq!(relay.take_inbox(a)[0]["reason"], "max_extensions");

    relay.advance(Duration::from_secs(30)).unwrap();
    assert_eq!(types(&relay.take_inbox(a)), ["expired"]);
}

#[test]
fn disconnect_during_warning_window_cancels_nothing_for_others() {
    let mut relay = SimRelay::new(4);
    let a = relay.connect().unwrap().unwrap();
    let b = relay.connect().unwrap().unwrap();
    relay.send_json(a, &json!({"type": "join", "code": CODE})).unwrap();
    relay.send_json(b, &json!({"type": "join", "code": CODE})).unwrap();

    relay.advance(Duration::from_secs(14 * 60 + 35)).unwrap();
    relay.disconnect(a).unwrap();
    relay.take_inbox(b);

    relay.advance(Duration::from_secs(30)).unwrap();

    assert_eq!(types(&relay.take_inbox(b)), ["expired"]);
    assert!(!relay.is_open(a));
}

#[test]
fn last_member_leaving_cancels_timers() {
    let mut relay = SimRelay::new(5);
    let a = relay.connect().unwrap().unwrap();
    relay.send_json(a, &json!({"type": "join", "code": CODE})).unwrap();
    relay.disconnect(a).unwrap();

    assert_eq!(relay.registry().next_deadline(), None);
    relay.advance(Duration::from_secs(10 * 60)).unwrap();

    let b = relay.connect().unwrap().unwrap();
    relay.send_json(b, &json!({"type": "join", "code": CODE})).unwrap();
    relay.take_inbox(b);

    // Past the first session's expiry, well before the second one's warning.
    relay.advance(Duration::from_secs(6 * 60)).unwrap();
    assert!(relay.take_inbox(b).is_empty(), "dropped session's timers fired");
    assert_eq!(relay.registry().session_count(), 1);
}

#[test]
fn frame_after_unticked_expiry_sees_the_session_gone() {
    let mut relay = SimRelay::new(8);
    let a = relay.connect().unwrap().unwrap();
    let b = relay.connect().unwrap().unwrap();
    relay.send_json(a, &json!({"type": "join", "code": CODE})).unwrap();
    relay.send_json(b, &json!({"type": "join", "code": CODE})).unwrap();
    relay.take_inbox(a);
    relay.take_inbox(b);

    // Clock moves past expiry without the driver ticking.
    relay.env().advance(Duration::from_millis(900_100));
    relay.send_json(a, &json!({"type": "extend_response", "code": CODE, "accept": true})).unwrap();

    assert_eq!(types(&relay.take_inbox(a)), ["extend_request", "expired", "error"]);
    assert_eq!(types(&relay.take_inbox(b)), ["extend_request", "expired"]);
    assert_eq!(relay.registry().session_count(), 0);

    relay.advance(Duration::from_secs(1)).unwrap();
    assert!(relay.take_inbox(a).is_empty());
}

#[test]
fn frame_after_unticked_warning_still_extends() {
    let mut relay = SimRelay::new(9);
    let a = relay.connect().unwrap().unwrap();
    relay.send_json(a, &json!({"type": "join", "code": CODE})).unwrap();
    relay.take_inbox(a);

    relay.env().advance(Duration::from_secs(14 * 60 + 45));
    relay.send_json(a, &json!({"type": "extend_response", "code": CODE, "accept": true})).unwrap();
    assert_eq!(types(&relay.take_inbox(a)), ["extend_request", "extended"]);

    // The old expiry has passed; the renewed window has not.
    relay.advance(Duration::from_secs(60)).unwrap();
    assert!(relay.take_inbox(a).is_empty());
    assert_eq!(relay.registry().session_count(), 1);
}

#[test]
fn capacity_limit_refuses_extra_connections() {
    let config = DriverConfig { max_connections: 2, ..DriverConfig::default() };
    let mut relay = SimRelay::with_config(6, config);

    assert!(relay.connect().unwrap().is_some());
    assert!(relay.connect().unwrap().is_some());
    assert_eq!(relay.connect().unwrap(), None);
    assert_eq!(relay.driver().connection_count(), 2);
}

#[test]
fn garbage_frames_are_harmless() {
    let mut relay = SimRelay::new(7);
    let a = relay.connect().unwrap().unwrap();

    for frame in ["", "null", "[1,2]", "{\"type\":", "\u{0}", "{\"type\":42}"] {
        relay.send(a, frame).unwrap();
    }

    let inbox = relay.take_inbox(a);
    assert!(inbox.iter().all(|v| v["reason"] == "unknown_type"));
    assert_eq!(relay.registry().session_count(), 0);
}
