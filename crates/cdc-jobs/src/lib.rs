//! C8/C9: the job service (distributed lease + checkpoint persistence) and
//! the resumable import/delete job engines.

#[cfg(feature = "database")]
pub mod delete;
#[cfg(feature = "database")]
pub mod import;
#[cfg(feature = "database")]
pub mod job_store;
pub mod lease;

#[cfg(feature = "database")]
pub use delete::DeleteEngine;
#[cfg(feature = "database")]
pub use import::ImportEngine;
#[cfg(feature = "database")]
pub use job_store::{AcquireOutcome, JobLeaseStore, JobStore};
pub use lease::instance_id;
