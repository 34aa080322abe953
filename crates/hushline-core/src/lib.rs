//! Hushline relay core logic
//!
//! This crate contains the pure session logic of the Hushline relay. It is
//! completely decoupled from I/O, enabling deterministic testing of the
//! session lifetime protocol without waiting fifteen real minutes.
//!
//! # Architecture: "The Hollow Shell"
//!
//! ```text
//!      ┌──────────────────────────────┐
//!      │ hushline-core                │
//!      │ - Session registry           │
//!      │ - Timer protocol (deadlines) │
//!      │ - Envelope dispatch          │
//!      └──────────────────────────────┘
//!         ↓                        ↓
//! ┌──────────────────┐  ┌──────────────────┐
//! │ hushline-harness │  │ hushline-server  │
//! │ - Virtual time   │  │ - axum WebSocket │
//! │ - Seeded RNG     │  │ - System clock   │
//! │ - Model checks   │  │ - Production     │
//! └──────────────────┘  └──────────────────┘
//! ```
//!
//! # Key Principles
//!
//! - No I/O in Core: never spawn tasks or read the clock here
//! - Time as input: registry operations take `now`, timers fire on `tick`
//! - Opaque payloads: relayed frames are forwarded byte-for-byte
//!
//! # Modules
//!
//! - [`code`]: Session code validation and the health-check sentinel
//! - [`protocol`]: Inbound envelope parsing and outbound envelopes
//! - [`session`]: Session state, lifetime configuration, timers
//! - [`registry`]: The Session Registry
//! - [`dispatcher`]: Frame routing by `type`
//! - [`env`]: Environment abstraction (time, RNG)

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod code;
pub mod dispatcher;
pub mod env;
pub mod protocol;
pub mod registry;
pub mod session;

pub use code::{CodeError, HEALTHCHECK_CODE, SessionCode};
pub use dispatcher::Dispatcher;
pub use env::Environment;
pub use protocol::{Envelope, ErrorReason, MessageType, ProtocolError, ServerMessage, SessionKind};
pub use registry::{LeaveOutcome, Outbound, SessionRegistry};
pub use session::{
    ConfigError, MAX_SESSION_DURATION, Session, SessionConfig, SessionTimers, TimerKind,
};

/// Identifier the transport assigns to each connection.
pub type ConnectionId = u64;
