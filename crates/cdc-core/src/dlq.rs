//! `DlqWriter`: the dead-letter persistence interface the sink resilient
//! wrapper (C3) depends on. The concrete table-backed implementation lives
//! in `cdc-events` (C10); keeping the interface here lets `cdc-sinks` depend
//! on it without depending on `cdc-events` (which itself depends on
//! `cdc-sinks` to dispatch batches).

use crate::{CdcError, CloudEvent};
use async_trait::async_trait;

#[async_trait]
pub trait DlqWriter: Send + Sync {
    /// Persists one undeliverable event as a `pending` dead-letter row
    /// (§4.10).
    async fn persist(
        &self,
        event: &CloudEvent,
        sink_name: &str,
        error_message: &str,
        attempt_count: u32,
    ) -> Result<(), CdcError>;
}
