//! Session Registry
//!
//! Owns every live session and the reverse index from connection to session
//! code.
//!
//! ## Responsibilities
//!
//! - Session Lifecycle: create on first join, destroy when the last member
//!   leaves or when the expiry timer fires
//! - Membership: enforce the two-member cap of direct sessions and announce
//!   pairing exactly once
//! - Renewal: reset the lifetime window a bounded number of times
//! - Fan-out: resolve a broadcast into one outbound send per recipient
//!
//! ## Design
//!
//! - Action-based: operations return [`Outbound`] sends, no direct I/O
//! - Time is a parameter: the registry never reads a clock, drivers pass
//!   `now` and call [`SessionRegistry::tick`] to fire due timers
//! - Single writer: every mutation goes through `&mut self`, so a driver that
//!   owns the registry behind one lock or one task serializes all of them
//!
//! ## Invariants
//!
//! - A session exists iff it has at least one member
//! - `sessions[k].members` contains `c` iff `members[c] == k`
//! - A direct session never has more than two members
//! - `renew_count <= max_extensions`

use std::{
    collections::{BTreeMap, HashMap},
    sync::Arc,
    time::Instant,
};

use crate::{
    ConnectionId,
    code::SessionCode,
    protocol::{ErrorReason, ServerMessage, SessionKind},
    session::{Session, SessionConfig, TimerKind},
};

/// One serialized envelope addressed to one connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outbound {
    /// Recipient
    pub conn_id: ConnectionId,
    /// Serialized envelope
    pub payload: Arc<str>,
}

/// Result of removing a connection from the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LeaveOutcome {
    /// Connection was not in any session
    NotJoined,
    /// Connection left, the session lives on
    Left {
        /// Session the connection left
        code: SessionCode,
        /// Members still in the session
        remaining: usize,
    },
    /// Connection was the last member, the session is gone
    Closed {
        /// Session that was destroyed
        code: SessionCode,
    },
}

/// Owns all live sessions and the connection → code reverse index.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    /// Live sessions. Ordered so timer firing and fan-out are deterministic.
    sessions: BTreeMap<SessionCode, Session>,
    /// Reverse index, kept in lockstep with every session's member set
    members: HashMap<ConnectionId, SessionCode>,
    config: SessionConfig,
}

impl SessionRegistry {
    /// Create an empty registry.
    pub fn new(config: SessionConfig) -> Self {
        Self { sessions: BTreeMap::new(), members: HashMap::new(), config }
    }

    /// Lifetime configuration.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Check if a session exists for `code`.
    pub fn has_session(&self, code: &SessionCode) -> bool {
        self.sessions.contains_key(code)
    }

    /// Look up a live session.
    pub fn session(&self, code: &SessionCode) -> Option<&Session> {
        self.sessions.get(code)
    }

    /// Code of the session `conn_id` belongs to.
    pub fn session_of(&self, conn_id: ConnectionId) -> Option<&SessionCode> {
        self.members.get(&conn_id)
    }

    /// Number of live sessions.
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Number of connections that are members of some session.
    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    /// Live sessions in code order.
    pub fn sessions(&self) -> impl Iterator<Item = &Session> {
        self.sessions.values()
    }

    /// Join `conn_id` to the session for `code`, creating it if needed.
    ///
    /// A connection already in this session is simply told `joined` again. A
    /// connection in another session leaves it first, but only once the
    /// target is known to have room.
    pub fn join(
        &mut self,
        conn_id: ConnectionId,
        code: SessionCode,
        kind: SessionKind,
        now: Instant,
    ) -> Vec<Outbound> {
        let mut out = Vec::new();

        if let Some(session) = self.sessions.get(&code) {
            if session.contains(conn_id) {
                tracing::debug!(conn_id, code = ?code, "duplicate join ignored");
                let joined = ServerMessage::Joined { code: code.to_string(), mode: session.kind() };
                push(&mut out, conn_id, &joined);
                return out;
            }

            if session.is_full() {
                tracing::info!(conn_id, code = ?code, "join rejected: room full");
                let error = ServerMessage::error(ErrorReason::RoomFull, Some(code.as_str()));
                push(&mut out, conn_id, &error);
                return out;
            }
        }

        if let Some(previous) = self.members.get(&conn_id).cloned() {
            tracing::info!(conn_id, from = ?previous, to = ?code, "connection switching sessions");
            self.leave(conn_id);
        }

        let config = self.config;
        let session = self.sessions.entry(code.clone()).or_insert_with(|| {
            tracing::info!(code = ?code, kind = kind.as_str(), "session created");
            Session::new(code.clone(), kind, now, &config)
        });

        session.insert(conn_id);
        self.members.insert(conn_id, code.clone());

        tracing::info!(
            conn_id,
            code = ?code,
            kind = session.kind().as_str(),
            size = session.member_count(),
            "client joined session"
        );

        let joined = ServerMessage::Joined { code: code.to_string(), mode: session.kind() };
        push(&mut out, conn_id, &joined);

        if session.take_ready() {
            tracing::info!(code = ?code, "direct session paired");
            let ready = ServerMessage::SessionReady { code: code.to_string() };
            fan_out(&mut out, session, None, &ready);
        }

        out
    }

    /// Renew the session for `code`, resetting both timers.
    ///
    /// The sender does not have to be a member.
    pub fn extend(
        &mut self,
        conn_id: ConnectionId,
        code: &SessionCode,
        now: Instant,
    ) -> Vec<Outbound> {
        let mut out = Vec::new();
        let max = self.config.max_extensions;
        let config = self.config;

        let Some(session) = self.sessions.get_mut(code) else {
            tracing::info!(conn_id, code = ?code, "extend refused: no room");
            push(&mut out, conn_id, &ServerMessage::error(ErrorReason::NoRoom, None));
            return out;
        };

        if session.renew_count() >= max {
            tracing::info!(conn_id, code = ?code, "extend refused: max extensions");
            push(&mut out, conn_id, &ServerMessage::error(ErrorReason::MaxExtensions, None));
            return out;
        }

        session.renew(now, &config);
        tracing::info!(code = ?code, renew_count = session.renew_count(), "session extended");

        let extended =
            ServerMessage::Extended { code: code.to_string(), renew_count: session.renew_count() };
        fan_out(&mut out, session, None, &extended);
        out
    }

    /// Remove `conn_id` from its session, destroying the session if it was
    /// the last member.
    ///
    /// Remaining members are not notified.
    pub fn leave(&mut self, conn_id: ConnectionId) -> LeaveOutcome {
        let Some(code) = self.members.remove(&conn_id) else {
            return LeaveOutcome::NotJoined;
        };

        let Some(session) = self.sessions.get_mut(&code) else {
            tracing::warn!(conn_id, code = ?code, "reverse index pointed at a missing session");
            return LeaveOutcome::NotJoined;
        };

        session.remove(conn_id);
        let remaining = session.member_count();
        tracing::info!(conn_id, code = ?code, size = remaining, "client left session");

        if remaining == 0 {
            // Dropping the session drops its deadlines with it.
            self.sessions.remove(&code);
            tracing::info!(code = ?code, "last client left, session closed");
            return LeaveOutcome::Closed { code };
        }

        LeaveOutcome::Left { code, remaining }
    }

    /// Send `payload` to every member of `code` except `exclude`.
    ///
    /// Unknown codes produce nothing.
    pub fn broadcast(
        &self,
        code: &SessionCode,
        exclude: Option<ConnectionId>,
        payload: &Arc<str>,
    ) -> Vec<Outbound> {
        let Some(session) = self.sessions.get(code) else {
            return Vec::new();
        };

        session
            .members()
            .filter(|member| Some(*member) != exclude)
            .map(|conn_id| Outbound { conn_id, payload: Arc::clone(payload) })
            .collect()
    }

    /// Earliest pending timer deadline across all sessions.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.sessions.values().map(|s| s.timers().next_deadline()).min()
    }

    /// Fire every timer due at `now`, in deadline order.
    ///
    /// A warning broadcasts `extend_request` and leaves the session alone. An
    /// expiry broadcasts `expired`, clears every member's reverse index entry
    /// and deletes the session.
    pub fn tick(&mut self, now: Instant) -> Vec<Outbound> {
        let mut due: Vec<(Instant, TimerKind, SessionCode)> = self
            .sessions
            .values()
            .flat_map(|s| s.timers().due(now).map(move |(at, kind)| (at, kind, s.code().clone())))
            .collect();

        if due.is_empty() {
            return Vec::new();
        }
        due.sort();

        let mut out = Vec::new();
        for (_, kind, code) in due {
            match kind {
                TimerKind::Warning => self.fire_warning(&code, &mut out),
                TimerKind::Expiry => self.fire_expiry(&code, &mut out),
            }
        }
        out
    }

    fn fire_warning(&mut self, code: &SessionCode, out: &mut Vec<Outbound>) {
        let max = self.config.max_extensions;
        let Some(session) = self.sessions.get_mut(code) else {
            return;
        };

        session.timers_mut().clear_warning();

        let remaining = max.saturating_sub(session.renew_count());
        tracing::info!(code = ?code, renew_count = session.renew_count(), "extend request sent");

        let request = ServerMessage::ExtendRequest {
            code: code.to_string(),
            remaining_extensions: remaining,
        };
        fan_out(out, session, None, &request);
    }

    fn fire_expiry(&mut self, code: &SessionCode, out: &mut Vec<Outbound>) {
        let Some(session) = self.sessions.remove(code) else {
            return;
        };

        tracing::info!(code = ?code, size = session.member_count(), "session expired");

        fan_out(out, &session, None, &ServerMessage::Expired { code: code.to_string() });
        for member in session.members() {
            self.members.remove(&member);
        }
    }
}

/// Encode `msg` and address it to `conn_id`.
fn push(out: &mut Vec<Outbound>, conn_id: ConnectionId, msg: &ServerMessage) {
    match msg.encode() {
        Ok(payload) => out.push(Outbound { conn_id, payload }),
        Err(e) => tracing::error!(kind = msg.type_name(), error = %e, "failed to encode envelope"),
    }
}

/// Encode `msg` once and address it to every member except `exclude`.
fn fan_out(
    out: &mut Vec<Outbound>,
    session: &Session,
    exclude: Option<ConnectionId>,
    msg: &ServerMessage,
) {
    let payload = match msg.encode() {
        Ok(payload) => payload,
        Err(e) => {
            tracing::error!(kind = msg.type_name(), error = %e, "failed to encode envelope");
            return;
        },
    };

    out.extend(
        session
            .members()
            .filter(|member| Some(*member) != exclude)
            .map(|conn_id| Outbound { conn_id, payload: Arc::clone(&payload) }),
    );
}
