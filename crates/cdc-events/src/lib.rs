//! Event queue (C1), CloudEvent factory (C2), consumer/router (C7), and
//! dead-letter queue (C10) for the digital-twin CDC event router.

pub mod cloud_event_factory;
#[cfg(feature = "database")]
pub mod dlq;
pub mod queue;
pub mod router;

pub use cloud_event_factory::build_cloud_events;
#[cfg(feature = "database")]
pub use dlq::DlqStore;
pub use queue::{EventProducer, EventQueue};
pub use router::Router;
