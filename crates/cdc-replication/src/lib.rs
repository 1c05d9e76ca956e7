//! C5/C6: the logical-replication decoder and the NOTIFY-based telemetry
//! listener that feed the event queue.

pub mod decoder;
pub mod pgoutput;
pub mod telemetry;

pub use decoder::ReplicationDecoder;
pub use telemetry::TelemetryListener;
