//! C5: the replication decoder. Owns a single logical-replication
//! connection, runs the slot-ensure/connect/decode/fault-handling loop, and
//! carries the per-transaction "current event" state machine.

use crate::pgoutput::{self, Message, Relation};
use bytes::Bytes;
use cdc_core::config::ReplicationConfig;
use cdc_core::{CdcError, EventData, EventType};
use cdc_events::EventProducer;
use futures_util::{SinkExt, StreamExt};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_postgres::config::ReplicationMode;
use tokio_postgres::{Client, Config, NoTls};
use tokio_util::sync::CancellationToken;

/// §4.5 step 5: sleep before reconnecting after a transport fault.
const RECONNECT_DELAY: Duration = Duration::from_secs(5);
const PROTOCOL_VERSION: u32 = 4;

#[derive(Debug, Default)]
enum DecoderState {
    #[default]
    Idle,
    CollectingForEntity {
        id: String,
        table: String,
        event: EventData,
    },
}

pub struct ReplicationDecoder {
    config: ReplicationConfig,
    producer: EventProducer,
    healthy: Arc<AtomicBool>,
}

impl ReplicationDecoder {
    pub fn new(config: ReplicationConfig, producer: EventProducer) -> Self {
        Self { config, producer, healthy: Arc::new(AtomicBool::new(false)) }
    }

    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::SeqCst)
    }

    /// Runs until `cancellation` fires. Reconnects indefinitely on
    /// transport faults and slot invalidation (§4.5 step 5).
    pub async fn run(&self, cancellation: CancellationToken) {
        while !cancellation.is_cancelled() {
            match self.run_once(&cancellation).await {
                Ok(()) => return,
                Err(error) => {
                    self.healthy.store(false, Ordering::SeqCst);
                    match &error {
                        CdcError::SlotInvalidated { message } => {
                            tracing::warn!(error = %message, "slot invalidated, recreating and retrying");
                            if let Err(drop_error) = self.drop_slot().await {
                                tracing::warn!(error = %drop_error, "failed to drop invalidated slot");
                            }
                        }
                        CdcError::ConnectionError { message } => {
                            tracing::warn!(error = %message, "connection fault, reconnecting");
                            tokio::time::sleep(RECONNECT_DELAY).await;
                        }
                        other => {
                            tracing::error!(error = %other, "replication loop error, retrying");
                            tokio::time::sleep(RECONNECT_DELAY).await;
                        }
                    }
                }
            }
        }
    }

    async fn connect(&self) -> Result<Client, CdcError> {
        let mut config: Config = self
            .config
            .database_url
            .parse()
            .map_err(|e| CdcError::ConfigurationError(format!("invalid DATABASE_URL: {e}")))?;
        config.replication_mode(ReplicationMode::Logical);
        config.keepalives(true);
        config.keepalives_idle(Duration::from_secs(30));

        let (client, connection) = config
            .connect(NoTls)
            .await
            .map_err(|e| CdcError::classify_io_message(&e.to_string()))?;
        tokio::spawn(async move {
            if let Err(error) = connection.await {
                tracing::warn!(error = %error, "replication connection closed");
            }
        });
        Ok(client)
    }

    /// §4.5 step 1: ensure the slot exists, creating it with the `pgoutput`
    /// plugin if missing.
    async fn ensure_slot(&self, client: &Client) -> Result<(), CdcError> {
        let rows = client
            .simple_query(&format!(
                "SELECT 1 FROM pg_replication_slots WHERE slot_name = '{}'",
                self.config.slot_name
            ))
            .await
            .map_err(CdcError::from)?;
        let exists = rows
            .iter()
            .any(|row| matches!(row, tokio_postgres::SimpleQueryMessage::Row(_)));
        if !exists {
            client
                .simple_query(&format!(
                    "CREATE_REPLICATION_SLOT \"{}\" LOGICAL pgoutput",
                    self.config.slot_name
                ))
                .await
                .map_err(CdcError::from)?;
        }
        Ok(())
    }

    async fn drop_slot(&self) -> Result<(), CdcError> {
        let client = self.connect().await?;
        client
            .simple_query(&format!("SELECT pg_drop_replication_slot('{}')", self.config.slot_name))
            .await
            .map_err(CdcError::from)?;
        Ok(())
    }

    async fn run_once(&self, cancellation: &CancellationToken) -> Result<(), CdcError> {
        let client = self.connect().await?;
        self.ensure_slot(&client).await?;

        let query = format!(
            "START_REPLICATION SLOT \"{}\" LOGICAL 0/0 (proto_version '{}', publication_names '{}')",
            self.config.slot_name, PROTOCOL_VERSION, self.config.publication_name
        );
        let mut stream = Box::pin(
            client
                .copy_both_simple::<Bytes>(&query)
                .await
                .map_err(CdcError::from)?,
        );
        self.healthy.store(true, Ordering::SeqCst);
        tracing::info!(slot = %self.config.slot_name, "replication stream started");

        let mut relations: HashMap<i32, Relation> = HashMap::new();
        let mut state = DecoderState::Idle;
        let mut span: Option<tracing::Span> = None;

        loop {
            tokio::select! {
                _ = cancellation.cancelled() => return Ok(()),
                next = stream.next() => {
                    let Some(chunk) = next else {
                        return Err(CdcError::connection_error("replication stream ended"));
                    };
                    let chunk = chunk.map_err(CdcError::from)?;
                    if chunk.is_empty() {
                        continue;
                    }
                    match chunk[0] {
                        b'w' => {
                            // XLogData: 1 tag + 8 start_lsn + 8 end_lsn + 8 timestamp + payload
                            if chunk.len() < 25 {
                                continue;
                            }
                            let wal_end = i64::from_be_bytes(chunk[9..17].try_into().unwrap());
                            let payload = chunk.slice(25..);
                            let message = pgoutput::parse_message(payload, &relations)?;
                            self.apply_message(message, &mut relations, &mut state, &mut span).await;
                            self.send_standby_status(&mut stream, wal_end).await?;
                        }
                        b'k' => {
                            let wal_end = if chunk.len() >= 9 {
                                i64::from_be_bytes(chunk[1..9].try_into().unwrap())
                            } else {
                                0
                            };
                            let reply_requested = chunk.last().map(|b| *b == 1).unwrap_or(false);
                            if reply_requested {
                                self.send_standby_status(&mut stream, wal_end).await?;
                            }
                        }
                        _ => {}
                    }
                }
            }
        }
    }

    async fn send_standby_status(
        &self,
        stream: &mut (impl futures_util::Sink<Bytes, Error = tokio_postgres::Error> + Unpin),
        wal_end: i64,
    ) -> Result<(), CdcError> {
        let mut message = Vec::with_capacity(34);
        message.push(b'r');
        message.extend_from_slice(&wal_end.to_be_bytes());
        message.extend_from_slice(&wal_end.to_be_bytes());
        message.extend_from_slice(&wal_end.to_be_bytes());
        message.extend_from_slice(&0i64.to_be_bytes());
        message.push(0);
        stream.send(Bytes::from(message)).await.map_err(CdcError::from)
    }

    /// Per-transaction state machine (§4.5).
    async fn apply_message(
        &self,
        message: Message,
        relations: &mut HashMap<i32, Relation>,
        state: &mut DecoderState,
        span: &mut Option<tracing::Span>,
    ) {
        match message {
            Message::Relation { id, relation } => {
                relations.insert(id, relation);
            }
            Message::Begin { xid } => {
                *state = DecoderState::Idle;
                *span = Some(tracing::info_span!("replication_transaction", xid));
            }
            Message::Insert { relation_id, row } => {
                let Some(relation) = relations.get(&relation_id) else { return };
                if is_system_namespace(relation) {
                    return;
                }
                self.enqueue_current_if_switching(state, &relation.name, None).await;
                let map = row.as_named_map(relation);
                let Some((id, properties)) = extract_id_and_properties(&map) else { return };
                let event_type = infer_create_type(&properties, &relation.name);
                let mut event = EventData::new(&id, &relation.namespace, &relation.name, event_type, chrono::Utc::now());
                event.new_value = Some(properties);
                *state = DecoderState::CollectingForEntity { id, table: relation.name.clone(), event };
            }
            Message::Update { relation_id, old_row, new_row } => {
                let Some(relation) = relations.get(&relation_id) else { return };
                if is_system_namespace(relation) {
                    return;
                }
                let new_map = new_row.as_named_map(relation);
                let Some((new_id, new_properties)) = extract_id_and_properties(&new_map) else { return };
                let old_id = old_row
                    .as_ref()
                    .and_then(|r| extract_id_and_properties(&r.as_named_map(relation)).map(|(id, _)| id));
                if let Some(old_id) = &old_id {
                    if old_id != &new_id {
                        self.enqueue_current(state).await;
                        *state = DecoderState::Idle;
                        return;
                    }
                }
                self.enqueue_current_if_switching(state, &relation.name, Some(&new_id)).await;
                let event_type = infer_update_type(&new_properties);
                match state {
                    DecoderState::CollectingForEntity { event, .. } => {
                        event.new_value = Some(new_properties);
                        event.event_type = event_type;
                    }
                    DecoderState::Idle => {
                        let mut event =
                            EventData::new(&new_id, &relation.namespace, &relation.name, event_type, chrono::Utc::now());
                        event.new_value = Some(new_properties);
                        if let Some(old_row) = &old_row {
                            let old_map = old_row.as_named_map(relation);
                            if let Some((_, old_properties)) = extract_id_and_properties(&old_map) {
                                event.old_value = old_properties;
                            }
                        }
                        *state = DecoderState::CollectingForEntity { id: new_id, table: relation.name.clone(), event };
                    }
                }
            }
            Message::Delete { relation_id, old_row } => {
                let Some(relation) = relations.get(&relation_id) else { return };
                if is_system_namespace(relation) {
                    return;
                }
                let old_map = old_row.as_named_map(relation);
                let Some((id, old_properties)) = extract_id_and_properties(&old_map) else { return };
                self.enqueue_current_if_switching(state, &relation.name, Some(&id)).await;
                let event_type = infer_delete_type(&old_properties, &relation.name);
                match state {
                    DecoderState::CollectingForEntity { event, .. } if event.old_value.is_empty() => {
                        event.old_value = old_properties;
                        event.event_type = event_type;
                    }
                    DecoderState::Idle => {
                        let mut event = EventData::new(&id, &relation.namespace, &relation.name, event_type, chrono::Utc::now());
                        event.old_value = old_properties;
                        *state = DecoderState::CollectingForEntity { id, table: relation.name.clone(), event };
                    }
                    _ => {}
                }
            }
            Message::Commit => {
                self.enqueue_current(state).await;
                *state = DecoderState::Idle;
                *span = None;
            }
            Message::Other => {}
        }
    }

    async fn enqueue_current_if_switching(&self, state: &mut DecoderState, table: &str, id: Option<&str>) {
        if let DecoderState::CollectingForEntity { id: current_id, table: current_table, .. } = state {
            if current_table != table || id.map(|i| i != current_id).unwrap_or(true) {
                self.enqueue_current(state).await;
                *state = DecoderState::Idle;
            }
        }
    }

    async fn enqueue_current(&self, state: &mut DecoderState) {
        if let DecoderState::CollectingForEntity { event, .. } = std::mem::take(state) {
            if event.validate().is_ok() {
                let _ = self.producer.enqueue(event).await;
            } else {
                tracing::debug!(id = %event.id, "dropping invalid event built from replication stream");
            }
        }
    }
}

fn is_system_namespace(relation: &Relation) -> bool {
    relation.namespace.starts_with("pg_")
        || relation.namespace == "information_schema"
        || relation.namespace == "ag_catalog"
}

fn extract_id_and_properties(
    map: &HashMap<String, String>,
) -> Option<(String, HashMap<String, serde_json::Value>)> {
    let id = map.get("id")?.clone();
    let properties_text = map.get("properties")?;
    let value: serde_json::Value = serde_json::from_str(properties_text).ok()?;
    let object = value.as_object()?.clone().into_iter().collect();
    Some((id, object))
}

fn infer_create_type(properties: &HashMap<String, serde_json::Value>, table: &str) -> EventType {
    if EventData::infer_kind_is_twin(properties, table) {
        EventType::TwinCreate
    } else {
        EventType::RelationshipCreate
    }
}

fn infer_update_type(properties: &HashMap<String, serde_json::Value>) -> EventType {
    if properties.contains_key("$dtId") {
        EventType::TwinUpdate
    } else {
        EventType::RelationshipUpdate
    }
}

fn infer_delete_type(properties: &HashMap<String, serde_json::Value>, table: &str) -> EventType {
    if EventData::infer_kind_is_twin(properties, table) {
        EventType::TwinDelete
    } else {
        EventType::RelationshipDelete
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_namespace_is_recognized() {
        let relation = Relation { namespace: "pg_catalog".to_string(), name: "t".to_string(), columns: vec![] };
        assert!(is_system_namespace(&relation));
        let relation = Relation { namespace: "ag_catalog".to_string(), name: "t".to_string(), columns: vec![] };
        assert!(is_system_namespace(&relation));
    }

    #[test]
    fn extracts_id_and_properties_from_text_map() {
        let map = HashMap::from([
            ("id".to_string(), "twin1".to_string()),
            ("properties".to_string(), r#"{"$dtId":"twin1","temp":1}"#.to_string()),
        ]);
        let (id, properties) = extract_id_and_properties(&map).unwrap();
        assert_eq!(id, "twin1");
        assert_eq!(properties.get("temp").unwrap(), &serde_json::json!(1));
    }

    #[test]
    fn missing_properties_column_yields_none() {
        let map = HashMap::from([("id".to_string(), "twin1".to_string())]);
        assert!(extract_id_and_properties(&map).is_none());
    }

    #[test]
    fn infers_twin_create_from_dt_id() {
        let properties = HashMap::from([("$dtId".to_string(), serde_json::json!("twin1"))]);
        assert_eq!(infer_create_type(&properties, "SomeTable"), EventType::TwinCreate);
    }
}
