//! C7: consumer/router. Drains the event queue in batches, builds
//! CloudEvents per configured route, groups them per sink, and dispatches
//! concurrently.

use crate::cloud_event_factory::build_cloud_events;
use crate::queue::EventQueue;
use cdc_core::{CloudEvent, EventRoute};
use cdc_sinks::DispatchSink;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// §4.7 step 1 default.
pub const DEFAULT_MAX_BATCH_SIZE: usize = 50;
/// Sleep between polls when the queue was empty (§4.7 step 1).
const EMPTY_POLL_INTERVAL: Duration = Duration::from_millis(100);

pub struct Router {
    queue: Arc<EventQueue>,
    routes: Vec<EventRoute>,
    sinks: HashMap<String, Arc<dyn DispatchSink>>,
    source: String,
    max_batch_size: usize,
}

impl Router {
    pub fn new(
        queue: Arc<EventQueue>,
        routes: Vec<EventRoute>,
        sinks: HashMap<String, Arc<dyn DispatchSink>>,
        source: impl Into<String>,
    ) -> Self {
        Self { queue, routes, sinks, source: source.into(), max_batch_size: DEFAULT_MAX_BATCH_SIZE }
    }

    /// Runs until `cancellation` fires, then drains whatever is left in the
    /// queue before returning (§4.7 step 4).
    pub async fn run(&self, cancellation: CancellationToken) {
        loop {
            if cancellation.is_cancelled() {
                self.drain_remaining().await;
                return;
            }
            let batch = self.queue.dequeue_batch(self.max_batch_size).await;
            if batch.is_empty() {
                tokio::select! {
                    _ = tokio::time::sleep(EMPTY_POLL_INTERVAL) => {}
                    _ = cancellation.cancelled() => {
                        self.drain_remaining().await;
                        return;
                    }
                }
                continue;
            }
            self.process_batch(batch).await;
        }
    }

    async fn drain_remaining(&self) {
        loop {
            let batch = self.queue.dequeue_batch(self.max_batch_size).await;
            if batch.is_empty() {
                return;
            }
            self.process_batch(batch).await;
        }
    }

    async fn process_batch(&self, batch: Vec<cdc_core::EventData>) {
        let mut per_sink: HashMap<String, Vec<CloudEvent>> = HashMap::new();
        for event in &batch {
            for route in &self.routes {
                if !self.sinks.contains_key(&route.sink_name) {
                    tracing::warn!(sink = %route.sink_name, "route references unknown sink, skipping");
                    continue;
                }
                match build_cloud_events(event, &self.source, route) {
                    Ok(cloud_events) => {
                        per_sink.entry(route.sink_name.clone()).or_default().extend(cloud_events);
                    }
                    Err(error) => {
                        tracing::warn!(
                            event_id = %event.id,
                            sink = %route.sink_name,
                            error = %error,
                            "failed to build cloud events for route, skipping"
                        );
                    }
                }
            }
        }

        let dispatches = per_sink.into_iter().map(|(sink_name, events)| {
            let sink = self.sinks.get(&sink_name).cloned();
            async move {
                if let Some(sink) = sink {
                    for chunk in events.chunks(DEFAULT_MAX_BATCH_SIZE) {
                        sink.dispatch(chunk.to_vec()).await;
                    }
                }
            }
        });
        futures_util::future::join_all(dispatches).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use cdc_core::{EventFormat, EventType};
    use chrono::Utc;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct CountingSink {
        name: String,
        received: Mutex<Vec<CloudEvent>>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl DispatchSink for CountingSink {
        fn name(&self) -> &str {
            &self.name
        }
        fn is_healthy(&self) -> bool {
            true
        }
        async fn dispatch(&self, events: Vec<CloudEvent>) {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.received.lock().unwrap().extend(events);
        }
        fn queued_event_count(&self) -> u32 {
            0
        }
    }

    fn twin_create_event() -> cdc_core::EventData {
        let mut e = cdc_core::EventData::new("row-1", "graph-a", "Twin", EventType::TwinCreate, Utc::now());
        e.new_value = Some(
            [("$dtId".to_string(), json!("twin1")), ("$metadata".to_string(), json!({"$model": "m1"}))]
                .into_iter()
                .collect(),
        );
        e
    }

    #[tokio::test]
    async fn routes_event_to_configured_sink_only() {
        let queue = EventQueue::new(16);
        queue.enqueue(twin_create_event()).await;
        let sink = Arc::new(CountingSink {
            name: "kafka-main".to_string(),
            received: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
        });
        let mut sinks: HashMap<String, Arc<dyn DispatchSink>> = HashMap::new();
        sinks.insert("kafka-main".to_string(), sink.clone());
        let routes = vec![EventRoute::new("kafka-main", EventFormat::EventNotification)];
        let router = Router::new(queue.clone(), routes, sinks, "src");
        let batch = router.queue.dequeue_batch(10).await;
        router.process_batch(batch).await;
        assert_eq!(sink.received.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn unknown_sink_is_skipped_without_panicking() {
        let queue = EventQueue::new(16);
        queue.enqueue(twin_create_event()).await;
        let sinks: HashMap<String, Arc<dyn DispatchSink>> = HashMap::new();
        let routes = vec![EventRoute::new("missing-sink", EventFormat::EventNotification)];
        let router = Router::new(queue.clone(), routes, sinks, "src");
        let batch = router.queue.dequeue_batch(10).await;
        router.process_batch(batch).await;
    }

    #[tokio::test]
    async fn drain_remaining_flushes_queue_on_shutdown() {
        let queue = EventQueue::new(16);
        for _ in 0..3 {
            queue.enqueue(twin_create_event()).await;
        }
        let sink = Arc::new(CountingSink {
            name: "kafka-main".to_string(),
            received: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
        });
        let mut sinks: HashMap<String, Arc<dyn DispatchSink>> = HashMap::new();
        sinks.insert("kafka-main".to_string(), sink.clone());
        let routes = vec![EventRoute::new("kafka-main", EventFormat::EventNotification)];
        let router = Router::new(queue, routes, sinks, "src");
        router.drain_remaining().await;
        assert_eq!(sink.received.lock().unwrap().len(), 3);
    }
}
