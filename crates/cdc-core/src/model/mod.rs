//! Domain model shared by the replication decoder, event factory, router,
//! and job engines: [`EventData`], [`CloudEvent`], [`EventRoute`],
//! [`JobRecord`], and the checkpoint types.

mod checkpoint;
mod cloud_event;
mod event_data;
mod job;
mod route;

pub use checkpoint::{DeleteCheckpoint, DeleteSection, ImportCheckpoint, ImportSection};
pub use cloud_event::CloudEvent;
pub use event_data::{EventData, EventType};
pub use job::{JobRecord, JobStatus, JobType};
pub use route::{EventFormat, EventRoute, SinkEventType};
