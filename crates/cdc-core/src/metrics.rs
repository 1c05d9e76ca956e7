//! Prometheus metrics for the CDC router, built the way the teacher's
//! `monitoring::metrics` module builds its registry. No HTTP endpoint is
//! mounted here — that's an external collaborator's job — but the registry
//! is ready for one to scrape it.

use lazy_static::lazy_static;
use prometheus::{IntCounterVec, IntGauge, IntGaugeVec, Opts, Registry};

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();

    /// Current depth of the event queue (C1).
    pub static ref QUEUE_DEPTH: IntGauge = IntGauge::with_opts(
        Opts::new("queue_depth", "Current number of events waiting in the router queue")
            .namespace("cdc")
    ).unwrap();

    /// Lifetime count of events enqueued (C1).
    pub static ref QUEUE_ENQUEUED_TOTAL: IntGauge = IntGauge::with_opts(
        Opts::new("queue_enqueued_total", "Lifetime count of events enqueued")
            .namespace("cdc")
    ).unwrap();

    /// Per-sink send outcomes (C3).
    pub static ref SINK_SEND_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("sink_send_total", "Sink batch send attempts by outcome")
            .namespace("cdc")
            .subsystem("sinks"),
        &["sink_name", "outcome"]
    ).unwrap();

    /// Current DLQ size (C10), tracked as the process observes it.
    pub static ref DLQ_SIZE: IntGauge = IntGauge::with_opts(
        Opts::new("dlq_size", "Number of pending dead-letter rows")
            .namespace("cdc")
    ).unwrap();

    /// Job counts by status (C8/C9).
    pub static ref JOBS_BY_STATUS: IntGaugeVec = IntGaugeVec::new(
        Opts::new("jobs_by_status", "Current job count grouped by status")
            .namespace("cdc")
            .subsystem("jobs"),
        &["job_type", "status"]
    ).unwrap();
}

/// Registers every collector with [`REGISTRY`]. Call once at process start.
pub fn register_all() -> prometheus::Result<()> {
    REGISTRY.register(Box::new(QUEUE_DEPTH.clone()))?;
    REGISTRY.register(Box::new(QUEUE_ENQUEUED_TOTAL.clone()))?;
    REGISTRY.register(Box::new(SINK_SEND_TOTAL.clone()))?;
    REGISTRY.register(Box::new(DLQ_SIZE.clone()))?;
    REGISTRY.register(Box::new(JOBS_BY_STATUS.clone()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registration_is_idempotent_free_of_panics() {
        // lazy_static collectors are process-global; registering twice in
        // the same test binary would error, so this just exercises the
        // happy path once.
        let _ = register_all();
    }
}
