//! Domain types, error taxonomy, and configuration shared across the
//! digital-twin CDC event router workspace.
//!
//! - [`model`] — `EventData`, `CloudEvent`, `EventRoute`, `JobRecord`,
//!   and the checkpoint types (spec §3).
//! - [`twin_store`] — the `TwinStore` collaborator trait the job engines
//!   call into.
//! - [`error`] — the `CdcError` taxonomy, retry policy, and circuit
//!   breaker (spec §7).
//! - [`config`] — environment-driven configuration loading.

pub mod config;
pub mod dlq;
pub mod error;
#[cfg(feature = "monitoring")]
pub mod metrics;
pub mod model;
pub mod twin_store;

pub use dlq::DlqWriter;
pub use error::{CdcError, Result};
pub use model::{
    CloudEvent, DeleteCheckpoint, DeleteSection, EventData, EventFormat, EventRoute, EventType,
    ImportCheckpoint, ImportSection, JobRecord, JobStatus, JobType, SinkEventType,
};
pub use twin_store::TwinStore;
#[cfg(feature = "test-utils")]
pub use twin_store::MockTwinStore;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Prelude for common imports across the workspace.
pub mod prelude {
    pub use crate::{
        error::{CdcError, ErrorCategory, Result},
        CloudEvent, EventData, EventFormat, EventRoute, EventType, JobRecord, JobStatus, JobType,
        TwinStore,
    };
    pub use async_trait::async_trait;
    pub use serde_json::{json, Value};
    pub use uuid::Uuid;
}
