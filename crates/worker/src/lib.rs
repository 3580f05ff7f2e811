//! ModelGrid Worker
//!
//! Worker agent that keeps a persistent connection to the broker, advertises
//! its model catalog, and answers dispatches with the local inference
//! backend.

pub mod agent;
pub mod inference;
pub mod resources;

pub use agent::Agent;
pub use inference::{EchoBackend, HttpBackend, InferenceBackend, InferenceCall};
pub use resources::ResourceProbe;
