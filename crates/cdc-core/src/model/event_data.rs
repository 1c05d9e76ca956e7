//! `EventData`: produced by the replication decoder (C5) and the telemetry
//! listener (C6), consumed by the router (C7). See spec §3.

use crate::error::CdcError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    TwinCreate,
    TwinUpdate,
    TwinDelete,
    RelationshipCreate,
    RelationshipUpdate,
    RelationshipDelete,
    Telemetry,
}

impl EventType {
    pub fn is_create(&self) -> bool {
        matches!(self, EventType::TwinCreate | EventType::RelationshipCreate)
    }

    pub fn is_update(&self) -> bool {
        matches!(self, EventType::TwinUpdate | EventType::RelationshipUpdate)
    }

    pub fn is_delete(&self) -> bool {
        matches!(self, EventType::TwinDelete | EventType::RelationshipDelete)
    }

    pub fn is_twin(&self) -> bool {
        matches!(self, EventType::TwinCreate | EventType::TwinUpdate | EventType::TwinDelete)
    }

    pub fn is_relationship(&self) -> bool {
        matches!(
            self,
            EventType::RelationshipCreate | EventType::RelationshipUpdate | EventType::RelationshipDelete
        )
    }
}

/// A reconstructed twin/relationship/telemetry lifecycle event.
///
/// `id`, `table_name`, and `graph_name` are set once at construction and
/// never mutated afterward; `old_value`/`new_value`/`event_type` may be
/// mutated by the decoder while the event is "current" (see the decoder's
/// per-transaction state machine), but never again once enqueued.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventData {
    pub id: String,
    pub graph_name: String,
    pub table_name: String,
    pub old_value: HashMap<String, Value>,
    pub new_value: Option<HashMap<String, Value>>,
    pub event_type: EventType,
    pub timestamp: DateTime<Utc>,
}

impl EventData {
    pub fn new(
        id: impl Into<String>,
        graph_name: impl Into<String>,
        table_name: impl Into<String>,
        event_type: EventType,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            graph_name: graph_name.into(),
            table_name: table_name.into(),
            old_value: HashMap::new(),
            new_value: None,
            event_type,
            timestamp,
        }
    }

    /// Infers the event kind from a payload's shape, per §3: `$dtId`
    /// present ⇒ Twin-kind, `$relationshipId` ⇒ Relationship-kind, else
    /// fall back on `table_name == "Twin"`.
    pub fn infer_kind_is_twin(payload: &HashMap<String, Value>, table_name: &str) -> bool {
        if payload.contains_key("$dtId") {
            true
        } else if payload.contains_key("$relationshipId") {
            false
        } else {
            table_name == "Twin"
        }
    }

    /// §3 invariants, checked before enqueue. Violation means the caller
    /// should drop the event with a warning log, not propagate an error
    /// through the queue.
    pub fn validate(&self) -> Result<(), CdcError> {
        match self.event_type {
            EventType::TwinCreate
            | EventType::TwinUpdate
            | EventType::RelationshipCreate
            | EventType::RelationshipUpdate => {
                if self.new_value.is_none() {
                    return Err(CdcError::invalid_event_data(format!(
                        "{:?} for entity {} requires newValue",
                        self.event_type, self.id
                    )));
                }
            }
            _ => {}
        }
        if matches!(self.event_type, EventType::TwinUpdate | EventType::RelationshipUpdate)
            && self.old_value.is_empty()
        {
            return Err(CdcError::invalid_event_data(format!(
                "{:?} for entity {} requires oldValue",
                self.event_type, self.id
            )));
        }
        if matches!(self.event_type, EventType::TwinDelete | EventType::RelationshipDelete)
            && self.old_value.is_empty()
        {
            return Err(CdcError::invalid_event_data(format!(
                "{:?} for entity {} requires oldValue",
                self.event_type, self.id
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample(event_type: EventType) -> EventData {
        EventData::new("row-1", "factory-a", "Twin", event_type, Utc::now())
    }

    #[test]
    fn create_without_new_value_is_invalid() {
        let event = sample(EventType::TwinCreate);
        assert!(event.validate().is_err());
    }

    #[test]
    fn create_with_new_value_is_valid() {
        let mut event = sample(EventType::TwinCreate);
        event.new_value = Some(HashMap::from([("$dtId".to_string(), json!("twin1"))]));
        assert!(event.validate().is_ok());
    }

    #[test]
    fn update_requires_both_sides() {
        let mut event = sample(EventType::TwinUpdate);
        event.new_value = Some(HashMap::new());
        assert!(event.validate().is_err());
        event.old_value.insert("$dtId".to_string(), json!("twin1"));
        assert!(event.validate().is_ok());
    }

    #[test]
    fn delete_requires_old_value() {
        let event = sample(EventType::TwinDelete);
        assert!(event.validate().is_err());
    }

    #[test]
    fn infers_twin_from_dt_id() {
        let payload = HashMap::from([("$dtId".to_string(), json!("t1"))]);
        assert!(EventData::infer_kind_is_twin(&payload, "SomeTable"));
    }

    #[test]
    fn infers_relationship_from_relationship_id() {
        let payload = HashMap::from([("$relationshipId".to_string(), json!("r1"))]);
        assert!(!EventData::infer_kind_is_twin(&payload, "SomeTable"));
    }

    #[test]
    fn falls_back_to_table_name() {
        let payload = HashMap::new();
        assert!(EventData::infer_kind_is_twin(&payload, "Twin"));
        assert!(!EventData::infer_kind_is_twin(&payload, "Other"));
    }
}
