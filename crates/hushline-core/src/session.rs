//! Session state and the two-tier timer protocol.
//!
//! # Timers
//!
//! Every session carries two deadlines, armed together and never
//! independently:
//!
//! ```text
//!  arm(now)                    warning_at                  expires_at
//!     │                            │                            │
//!     ├────────────────────────────┼────────────────────────────┤
//!     │   session_duration − lead  │        warning_lead        │
//!                         extend_request                    expired
//! ```
//!
//! Timers are plain deadlines owned by the [`Session`]. Re-arming overwrites
//! both, deleting the session drops them, so a cancelled timer has nothing
//! left that could fire. The registry's `tick` fires whatever is due.

use std::{
    collections::HashSet,
    time::{Duration, Instant},
};

use thiserror::Error;

use crate::{ConnectionId, code::SessionCode, protocol::SessionKind};

/// Default lifetime of a session before it expires.
pub const SESSION_DURATION: Duration = Duration::from_secs(15 * 60);

/// Default lead time of the renewal warning before expiry.
pub const WARNING_LEAD: Duration = Duration::from_secs(30);

/// Default number of renewals per session.
pub const MAX_EXTENDS: u32 = 3;

/// Longest session lifetime [`SessionConfig::validate`] accepts.
pub const MAX_SESSION_DURATION: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Invalid timer configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// Session duration is zero
    #[error("session duration must be non-zero")]
    ZeroDuration,

    /// Session duration is longer than [`MAX_SESSION_DURATION`]
    #[error("session duration {0:?} exceeds the maximum of {MAX_SESSION_DURATION:?}")]
    DurationTooLong(Duration),

    /// Warning would fire at or before arming time
    #[error("warning lead {lead:?} must be shorter than session duration {duration:?}")]
    WarningLeadTooLong {
        /// Configured warning lead
        lead: Duration,
        /// Configured session duration
        duration: Duration,
    },
}

/// Session lifetime configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionConfig {
    /// Time from arming until expiry
    pub session_duration: Duration,
    /// How long before expiry the renewal warning fires
    pub warning_lead: Duration,
    /// Renewals allowed per session
    pub max_extensions: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            session_duration: SESSION_DURATION,
            warning_lead: WARNING_LEAD,
            max_extensions: MAX_EXTENDS,
        }
    }
}

impl SessionConfig {
    /// Check that the warning fires strictly between arming and expiry.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the durations are inconsistent.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.session_duration.is_zero() {
            return Err(ConfigError::ZeroDuration);
        }
        if self.session_duration > MAX_SESSION_DURATION {
            return Err(ConfigError::DurationTooLong(self.session_duration));
        }
        if self.warning_lead >= self.session_duration {
            return Err(ConfigError::WarningLeadTooLong {
                lead: self.warning_lead,
                duration: self.session_duration,
            });
        }
        Ok(())
    }

    /// Offset from arming to the warning.
    pub fn warning_after(&self) -> Duration {
        self.session_duration.saturating_sub(self.warning_lead)
    }
}

/// Which of a session's two timers is due.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum TimerKind {
    /// Renewal warning (`extend_request`)
    Warning,
    /// Forced destruction (`expired`)
    Expiry,
}

/// Pending deadlines of one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionTimers {
    /// Cleared once the warning has fired
    warning_at: Option<Instant>,
    expires_at: Instant,
}

impl SessionTimers {
    /// Fresh timers measured from `now`.
    ///
    /// Durations past [`MAX_SESSION_DURATION`] are clamped to it, so an
    /// unvalidated config cannot overflow the clock.
    pub fn armed(now: Instant, config: &SessionConfig) -> Self {
        let duration = config.session_duration.min(MAX_SESSION_DURATION);
        let warning_after = duration.saturating_sub(config.warning_lead);
        Self { warning_at: Some(now + warning_after), expires_at: now + duration }
    }

    /// Replace both deadlines with a full window from `now`.
    pub fn rearm(&mut self, now: Instant, config: &SessionConfig) {
        *self = Self::armed(now, config);
    }

    /// Pending warning deadline, if it has not fired yet.
    pub fn warning_at(&self) -> Option<Instant> {
        self.warning_at
    }

    /// Expiry deadline.
    pub fn expires_at(&self) -> Instant {
        self.expires_at
    }

    /// Earliest pending deadline.
    pub fn next_deadline(&self) -> Instant {
        self.warning_at.map_or(self.expires_at, |w| w.min(self.expires_at))
    }

    /// Deadlines that are due at `now`, warning first.
    pub fn due(&self, now: Instant) -> impl Iterator<Item = (Instant, TimerKind)> + use<> {
        let warning = self.warning_at.filter(|at| *at <= now).map(|at| (at, TimerKind::Warning));
        let expiry = (self.expires_at <= now).then_some((self.expires_at, TimerKind::Expiry));
        warning.into_iter().chain(expiry)
    }

    /// Mark the warning as fired.
    pub fn clear_warning(&mut self) {
        self.warning_at = None;
    }
}

/// A live session.
///
/// Owned exclusively by the registry. Exists only while it has members.
#[derive(Debug, Clone)]
pub struct Session {
    code: SessionCode,
    kind: SessionKind,
    members: HashSet<ConnectionId>,
    created_at: Instant,
    renew_count: u32,
    ready_announced: bool,
    timers: SessionTimers,
}

impl Session {
    /// New empty session with freshly armed timers.
    pub(crate) fn new(
        code: SessionCode,
        kind: SessionKind,
        now: Instant,
        config: &SessionConfig,
    ) -> Self {
        Self {
            code,
            kind,
            members: HashSet::new(),
            created_at: now,
            renew_count: 0,
            ready_announced: false,
            timers: SessionTimers::armed(now, config),
        }
    }

    /// Session code.
    pub fn code(&self) -> &SessionCode {
        &self.code
    }

    /// Kind fixed at creation.
    pub fn kind(&self) -> SessionKind {
        self.kind
    }

    /// Current members.
    pub fn members(&self) -> impl Iterator<Item = ConnectionId> + '_ {
        self.members.iter().copied()
    }

    /// Whether `conn_id` is a member.
    pub fn contains(&self, conn_id: ConnectionId) -> bool {
        self.members.contains(&conn_id)
    }

    /// Number of members.
    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    /// When the session was created.
    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    /// Renewals used so far.
    pub fn renew_count(&self) -> u32 {
        self.renew_count
    }

    /// Pending timers.
    pub fn timers(&self) -> &SessionTimers {
        &self.timers
    }

    /// Whether a direct session has no room for another member.
    pub(crate) fn is_full(&self) -> bool {
        self.kind == SessionKind::Direct && self.members.len() >= 2
    }

    pub(crate) fn insert(&mut self, conn_id: ConnectionId) -> bool {
        self.members.insert(conn_id)
    }

    pub(crate) fn remove(&mut self, conn_id: ConnectionId) -> bool {
        self.members.remove(&conn_id)
    }

    /// Latch the pairing announcement. Returns true only the first time a
    /// direct session reaches two members.
    pub(crate) fn take_ready(&mut self) -> bool {
        if self.kind == SessionKind::Direct && self.members.len() == 2 && !self.ready_announced {
            self.ready_announced = true;
            return true;
        }
        false
    }

    pub(crate) fn renew(&mut self, now: Instant, config: &SessionConfig) {
        self.renew_count = self.renew_count.saturating_add(1);
        self.timers.rearm(now, config);
    }

    pub(crate) fn timers_mut(&mut self) -> &mut SessionTimers {
        &mut self.timers
    }
}
