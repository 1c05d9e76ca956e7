//! C3: the sink contract every implementation exposes, and the resilient
//! wrapper every sink is constructed behind.

use async_trait::async_trait;
use cdc_core::error::retry::{retry_with_policy, RetryPolicy};
use cdc_core::{CdcError, CloudEvent, DlqWriter};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

/// Sinks accept at most this many events per `sendBatch` call by default
/// (§4.3); the router enforces it when grouping per-sink buffers.
pub const DEFAULT_MAX_BATCH_SIZE: usize = 50;

/// Object-safe façade over `ResilientSink<S>` so the router can hold a
/// heterogeneous registry of sinks (Kafka, MQTT, webhook, analytics) behind
/// one collection type.
#[async_trait]
pub trait DispatchSink: Send + Sync {
    fn name(&self) -> &str;
    fn is_healthy(&self) -> bool;
    async fn dispatch(&self, events: Vec<CloudEvent>);
    fn queued_event_count(&self) -> u32;
}

#[async_trait]
pub trait Sink: Send + Sync {
    /// Unique across the process's configured sinks.
    fn name(&self) -> &str;

    /// Best-effort: true once the most recent send succeeded and the
    /// transport reports itself connected.
    fn is_healthy(&self) -> bool;

    /// Sends the batch; returns on full success, raises on partial or total
    /// failure. No ordering is promised across batches; within a batch,
    /// implementations preserve input order where cheap.
    async fn send_batch(&self, events: &[CloudEvent]) -> Result<(), CdcError>;
}

/// Interposes on `send_batch` with the retry/backoff + DLQ policy from
/// §4.3, reusing `cdc_core::error::retry` exactly as the replication
/// decoder's connection-fault loop does.
pub struct ResilientSink<S: Sink> {
    inner: S,
    policy: RetryPolicy,
    dlq: Arc<dyn DlqWriter>,
    queued_event_count: AtomicU32,
    healthy: AtomicBool,
}

impl<S: Sink> ResilientSink<S> {
    pub fn new(inner: S, dlq: Arc<dyn DlqWriter>) -> Self {
        Self {
            inner,
            policy: RetryPolicy::sink_default(),
            dlq,
            queued_event_count: AtomicU32::new(0),
            healthy: AtomicBool::new(true),
        }
    }

    pub fn with_policy(inner: S, dlq: Arc<dyn DlqWriter>, policy: RetryPolicy) -> Self {
        Self {
            inner,
            policy,
            dlq,
            queued_event_count: AtomicU32::new(0),
            healthy: AtomicBool::new(true),
        }
    }

    /// Number of events in batches currently awaiting their next retry
    /// attempt.
    pub fn queued_event_count(&self) -> u32 {
        self.queued_event_count.load(Ordering::SeqCst)
    }

    pub fn name(&self) -> &str {
        self.inner.name()
    }

    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::SeqCst) && self.inner.is_healthy()
    }

    /// Sends `events`, retrying per policy, and on exhaustion persists every
    /// event in the batch to the DLQ annotated with sink name, last error,
    /// and attempt count (§4.3). Never propagates the DLQ-exhaustion case as
    /// an error to the caller — a batch that lands in the DLQ has been
    /// handled, not dropped silently, so the router logs and moves on.
    pub async fn send_batch(&self, events: Vec<CloudEvent>) {
        if events.is_empty() {
            return;
        }
        self.queued_event_count.fetch_add(events.len() as u32, Ordering::SeqCst);
        let sink_name = self.inner.name().to_string();
        let batch = events.clone();
        let result = retry_with_policy(&self.policy, |_attempt| {
            let batch = batch.clone();
            async move { self.inner.send_batch(&batch).await }
        })
        .await;
        self.queued_event_count.fetch_sub(events.len() as u32, Ordering::SeqCst);

        match result {
            Ok(()) => {
                self.healthy.store(true, Ordering::SeqCst);
            }
            Err(error) => {
                self.healthy.store(false, Ordering::SeqCst);
                tracing::error!(
                    sink = %sink_name,
                    error = %error,
                    batch_size = events.len(),
                    "sink exhausted retries, persisting batch to dead-letter queue"
                );
                for event in &events {
                    if let Err(dlq_error) = self
                        .dlq
                        .persist(event, &sink_name, &error.to_string(), self.policy.max_attempts)
                        .await
                    {
                        tracing::error!(
                            sink = %sink_name,
                            event_id = %event.id,
                            error = %dlq_error,
                            "failed to persist event to dead-letter queue"
                        );
                    }
                }
            }
        }
    }
}

#[async_trait]
impl<S: Sink> DispatchSink for ResilientSink<S> {
    fn name(&self) -> &str {
        ResilientSink::name(self)
    }

    fn is_healthy(&self) -> bool {
        ResilientSink::is_healthy(self)
    }

    async fn dispatch(&self, events: Vec<CloudEvent>) {
        self.send_batch(events).await
    }

    fn queued_event_count(&self) -> u32 {
        ResilientSink::queued_event_count(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;

    struct FlakySink {
        name: String,
        failures_remaining: AtomicUsize,
    }

    #[async_trait]
    impl Sink for FlakySink {
        fn name(&self) -> &str {
            &self.name
        }
        fn is_healthy(&self) -> bool {
            true
        }
        async fn send_batch(&self, _events: &[CloudEvent]) -> Result<(), CdcError> {
            if self.failures_remaining.load(Ordering::SeqCst) > 0 {
                self.failures_remaining.fetch_sub(1, Ordering::SeqCst);
                Err(CdcError::SinkTransient {
                    sink_name: self.name.clone(),
                    attempt: 1,
                    message: "simulated failure".to_string(),
                })
            } else {
                Ok(())
            }
        }
    }

    struct AlwaysFailsSink;

    #[async_trait]
    impl Sink for AlwaysFailsSink {
        fn name(&self) -> &str {
            "always-fails"
        }
        fn is_healthy(&self) -> bool {
            true
        }
        async fn send_batch(&self, _events: &[CloudEvent]) -> Result<(), CdcError> {
            Err(CdcError::SinkTransient {
                sink_name: "always-fails".to_string(),
                attempt: 1,
                message: "boom".to_string(),
            })
        }
    }

    struct RecordingDlq {
        persisted: Mutex<Vec<(String, String, u32)>>,
    }

    impl RecordingDlq {
        fn new() -> Arc<Self> {
            Arc::new(Self { persisted: Mutex::new(Vec::new()) })
        }
    }

    #[async_trait]
    impl DlqWriter for RecordingDlq {
        async fn persist(
            &self,
            event: &CloudEvent,
            sink_name: &str,
            error_message: &str,
            attempt_count: u32,
        ) -> Result<(), CdcError> {
            self.persisted.lock().unwrap().push((
                event.id.to_string(),
                sink_name.to_string(),
                attempt_count,
            ));
            let _ = error_message;
            Ok(())
        }
    }

    fn sample_event() -> CloudEvent {
        CloudEvent::new("src", "Konnektr.DigitalTwins.Twin.Create", "twin1", Utc::now(), json!({}))
    }

    #[tokio::test]
    async fn succeeds_after_transient_failures_without_touching_dlq() {
        let dlq = RecordingDlq::new();
        let sink = FlakySink { name: "kafka-main".to_string(), failures_remaining: AtomicUsize::new(2) };
        let resilient = ResilientSink::with_policy(
            sink,
            dlq.clone(),
            RetryPolicy::fixed(5, std::time::Duration::from_millis(1)),
        );
        resilient.send_batch(vec![sample_event()]).await;
        assert!(resilient.is_healthy());
        assert!(dlq.persisted.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn exhausted_retries_land_every_event_in_the_dlq() {
        let dlq = RecordingDlq::new();
        let resilient = ResilientSink::with_policy(
            AlwaysFailsSink,
            dlq.clone(),
            RetryPolicy::fixed(2, std::time::Duration::from_millis(1)),
        );
        resilient.send_batch(vec![sample_event(), sample_event()]).await;
        assert!(!resilient.is_healthy());
        assert_eq!(dlq.persisted.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn queued_event_count_returns_to_zero_after_send() {
        let dlq = RecordingDlq::new();
        let sink = FlakySink { name: "kafka-main".to_string(), failures_remaining: AtomicUsize::new(0) };
        let resilient = ResilientSink::new(sink, dlq);
        resilient.send_batch(vec![sample_event()]).await;
        assert_eq!(resilient.queued_event_count(), 0);
    }
}
