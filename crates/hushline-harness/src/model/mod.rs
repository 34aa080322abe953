//! Model-based testing infrastructure.
//!
//! [`ModelWorld`] is a reference relay; tests apply the same
//! [`Operation`] sequence to it and to a [`crate::SimRelay`] and compare
//! what every client observed.

mod operation;
mod world;

pub use operation::{ClientId, ModelCode, Operation, code_for};
pub use world::{ModelConfig, ModelSession, ModelWorld, ObservableState};
