//! ModelGrid Broker
//!
//! Routes inference requests to connected worker machines: worker lifecycle,
//! model selection, request/response correlation, and the HTTP front door.

pub mod correlation;
pub mod http;
pub mod registry;
pub mod scheduler;
pub mod session;
pub mod slots;

pub use correlation::{CorrelationTable, DispatchOutcome};
pub use registry::{Worker, WorkerId, WorkerRegistry};
pub use scheduler::{DispatchRequest, Scheduler};
pub use slots::{ModelSlot, SlotTable};
