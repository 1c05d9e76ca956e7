//! C3/C4: the sink contract, its resilient wrapper, and the four sink
//! implementations (Kafka, MQTT, webhook, analytics ingestor).

pub mod analytics;
#[cfg(feature = "kafka")]
pub mod kafka;
#[cfg(feature = "mqtt")]
pub mod mqtt;
pub mod oauth;
pub mod sink;
pub mod webhook;

pub use oauth::{OAuthConfig, OAuthTokenProvider};
pub use sink::{DispatchSink, ResilientSink, Sink, DEFAULT_MAX_BATCH_SIZE};
