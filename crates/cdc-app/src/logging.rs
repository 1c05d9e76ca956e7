//! Structured logging setup, grounded on the teacher's
//! `monitoring::logging::init_structured_logging` — JSON output, thread
//! ids, span-close events — minus its correlation-ID layer, since a CDC
//! run's unit of work is a replication transaction or job id rather than
//! an inbound HTTP request.

use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

/// Installs the global tracing subscriber. `log_level` is used only when
/// `RUST_LOG` is unset, so an operator's explicit filter always wins.
pub fn init(log_level: &str) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level.to_string()));

    let formatting_layer = fmt::layer()
        .with_target(true)
        .with_thread_ids(true)
        .with_span_events(FmtSpan::CLOSE)
        .json();

    tracing_subscriber::registry().with(env_filter).with(formatting_layer).init();
}
