//! Model world: the reference relay.
//!
//! A deliberately plain rendition of the relay rules over integer
//! milliseconds and small ids. It is the oracle the real driver is checked
//! against; every envelope the relay would deliver is recorded per client,
//! in delivery order.

use std::collections::{BTreeMap, BTreeSet};

use serde_json::{Value, json};

use super::operation::{ClientId, ModelCode, Operation, code_for};

/// Timer configuration for the model, in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModelConfig {
    /// Session lifetime.
    pub duration_ms: u64,
    /// Warning lead before expiry.
    pub warning_lead_ms: u64,
    /// Maximum accepted extensions.
    pub max_extensions: u32,
}

/// One session as the model sees it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSession {
    /// Whether the session is a group session.
    pub group: bool,
    /// Current members.
    pub members: BTreeSet<ClientId>,
    /// Accepted extensions so far.
    pub renew_count: u32,
    ready_announced: bool,
    warning_at: Option<u64>,
    expires_at: u64,
}

/// Observable state for oracle comparison.
#[derive(Debug, Clone, PartialEq)]
pub struct ObservableState {
    /// Per-client session membership.
    pub memberships: Vec<Option<ModelCode>>,
    /// Per-client envelopes received since the last snapshot.
    pub inboxes: Vec<Vec<Value>>,
    /// Live sessions: code, group flag, sorted members, renew count.
    pub sessions: Vec<(ModelCode, bool, Vec<ClientId>, u32)>,
}

/// Reference implementation of the relay.
#[derive(Debug, Clone)]
pub struct ModelWorld {
    config: ModelConfig,
    now_ms: u64,
    sessions: BTreeMap<ModelCode, ModelSession>,
    memberships: Vec<Option<ModelCode>>,
    inboxes: Vec<Vec<Value>>,
}

impl ModelWorld {
    /// World with `num_clients` connected clients and no sessions.
    pub fn new(num_clients: usize, config: ModelConfig) -> Self {
        Self {
            config,
            now_ms: 0,
            sessions: BTreeMap::new(),
            memberships: vec![None; num_clients],
            inboxes: vec![Vec::new(); num_clients],
        }
    }

    /// Number of clients.
    pub fn num_clients(&self) -> usize {
        self.memberships.len()
    }

    /// Live session for `code`.
    pub fn session(&self, code: ModelCode) -> Option<&ModelSession> {
        self.sessions.get(&code)
    }

    /// Apply an already normalized operation.
    pub fn apply(&mut self, op: &Operation) {
        match *op {
            Operation::Join { client_id, code, group } => self.join(client_id, code, group),
            Operation::Relay { client_id, code, .. } => {
                if let (Some(session), Some(frame)) = (self.sessions.get(&code), op.frame()) {
                    let recipients: Vec<_> =
                        session.members.iter().copied().filter(|m| *m != client_id).collect();
                    for member in recipients {
                        self.deliver(member, frame.clone());
                    }
                }
            },
            Operation::Extend { client_id, code, accept } => self.extend(client_id, code, accept),
            Operation::Ping { client_id } => {
                self.deliver(client_id, json!({"type": "pong", "alive": true}));
            },
            Operation::Reconnect { client_id } => self.leave(client_id),
            Operation::AdvanceTime { millis } => self.advance(u64::from(millis)),
        }
    }

    /// Snapshot observable state, draining inboxes.
    pub fn observe(&mut self) -> ObservableState {
        let inboxes = self.inboxes.iter_mut().map(std::mem::take).collect();
        let sessions = self
            .sessions
            .iter()
            .map(|(code, s)| (*code, s.group, s.members.iter().copied().collect(), s.renew_count))
            .collect();

        ObservableState { memberships: self.memberships.clone(), inboxes, sessions }
    }

    fn join(&mut self, client_id: ClientId, code: ModelCode, group: bool) {
        let code_str = code_for(code);

        if let Some(session) = self.sessions.get(&code) {
            if session.members.contains(&client_id) {
                let mode = mode_name(session.group);
                self.deliver(client_id, json!({"type": "joined", "code": code_str, "mode": mode}));
                return;
            }
            if !session.group && session.members.len() >= 2 {
                self.deliver(
                    client_id,
                    json!({
                        "type": "error",
                        "reason": "room_full",
                        "code": code_str,
                        "message": "Direct room already has 2 clients",
                    }),
                );
                return;
            }
        }

        self.leave(client_id);

        let (now, config) = (self.now_ms, self.config);
        let session = self.sessions.entry(code).or_insert_with(|| ModelSession {
            group,
            members: BTreeSet::new(),
            renew_count: 0,
            ready_announced: false,
            warning_at: Some(now + config.duration_ms - config.warning_lead_ms),
            expires_at: now + config.duration_ms,
        });
        session.members.insert(client_id);
        let session_group = session.group;

        let ready = !session.group && session.members.len() == 2 && !session.ready_announced;
        if ready {
            session.ready_announced = true;
        }
        let members: Vec<_> = session.members.iter().copied().collect();

        self.memberships[usize::from(client_id)] = Some(code);
        let mode = mode_name(session_group);
        self.deliver(client_id, json!({"type": "joined", "code": code_str, "mode": mode}));

        if ready {
            for member in members {
                self.deliver(member, json!({"type": "session_ready", "code": code_str}));
            }
        }
    }

    fn extend(&mut self, client_id: ClientId, code: ModelCode, accept: bool) {
        let code_str = code_for(code);

        if !accept {
            self.deliver(client_id, json!({"type": "extend_declined", "code": code_str}));
            return;
        }

        let (now, config) = (self.now_ms, self.config);
        let Some(session) = self.sessions.get_mut(&code) else {
            self.deliver(
                client_id,
                json!({"type": "error", "reason": "no_room", "message": "Room does not exist"}),
            );
            return;
        };

        if session.renew_count >= config.max_extensions {
            self.deliver(
                client_id,
                json!({
                    "type": "error",
                    "reason": "max_extensions",
                    "message": "Maximum extensions reached",
                }),
            );
            return;
        }

        session.renew_count += 1;
        session.warning_at = Some(now + config.duration_ms - config.warning_lead_ms);
        session.expires_at = now + config.duration_ms;

        let envelope =
            json!({"type": "extended", "code": code_str, "renewCount": session.renew_count});
        let members: Vec<_> = session.members.iter().copied().collect();
        for member in members {
            self.deliver(member, envelope.clone());
        }
    }

    fn leave(&mut self, client_id: ClientId) {
        let Some(code) = self.memberships[usize::from(client_id)].take() else {
            return;
        };
        if let Some(session) = self.sessions.get_mut(&code) {
            session.members.remove(&client_id);
            if session.members.is_empty() {
                self.sessions.remove(&code);
            }
        }
    }

    fn advance(&mut self, millis: u64) {
        let target = self.now_ms + millis;

        loop {
            let next = self
                .sessions
                .iter()
                .flat_map(|(code, s)| {
                    let warning = s.warning_at.map(|at| (at, 0u8, *code));
                    warning.into_iter().chain(std::iter::once((s.expires_at, 1u8, *code)))
                })
                .filter(|(at, _, _)| *at <= target)
                .min();

            let Some((at, kind, code)) = next else {
                break;
            };
            self.now_ms = self.now_ms.max(at);

            if kind == 0 {
                self.fire_warning(code);
            } else {
                self.fire_expiry(code);
            }
        }

        self.now_ms = target;
    }

    fn fire_warning(&mut self, code: ModelCode) {
        let max = self.config.max_extensions;
        let Some(session) = self.sessions.get_mut(&code) else {
            return;
        };
        session.warning_at = None;

        let envelope = json!({
            "type": "extend_request",
            "code": code_for(code),
            "remainingExtensions": max.saturating_sub(session.renew_count),
        });
        let members: Vec<_> = session.members.iter().copied().collect();
        for member in members {
            self.deliver(member, envelope.clone());
        }
    }

    fn fire_expiry(&mut self, code: ModelCode) {
        let Some(session) = self.sessions.remove(&code) else {
            return;
        };
        for member in session.members {
            self.memberships[usize::from(member)] = None;
            self.deliver(member, json!({"type": "expired", "code": code_for(code)}));
        }
    }

    fn deliver(&mut self, client_id: ClientId, envelope: Value) {
        if let Some(inbox) = self.inboxes.get_mut(usize::from(client_id)) {
            inbox.push(envelope);
        }
    }
}

fn mode_name(group: bool) -> &'static str {
    if group { "group" } else { "direct" }
}
