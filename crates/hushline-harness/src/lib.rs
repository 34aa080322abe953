//! Deterministic simulation harness for the Hushline relay.
//!
//! - [`SimEnv`]: virtual clock and seeded RNG implementing `Environment`
//! - [`SimRelay`]: a real `ServerDriver` with in-memory inboxes instead of
//!   sockets, advanced deadline by deadline
//! - [`model`]: a reference relay for model-based property tests
//!
//! Nothing here touches the network or the wall clock, so every run with
//! the same seed and operations is identical.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod model;
mod sim_env;
mod sim_relay;

pub use model::{
    ClientId, ModelCode, ModelConfig, ModelSession, ModelWorld, ObservableState, Operation,
    code_for,
};
pub use sim_env::SimEnv;
pub use sim_relay::SimRelay;
