//! `EventRoute`: binds a sink to an output format with optional per-event
//! type-string overrides (§3, §4.2).

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventFormat {
    EventNotification,
    DataHistory,
    Telemetry,
}

/// The sink-facing event-type enum used as the key in `typeMappings`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SinkEventType {
    TwinCreate,
    TwinUpdate,
    TwinDelete,
    RelationshipCreate,
    RelationshipUpdate,
    RelationshipDelete,
    PropertyEvent,
    TwinLifecycle,
    RelationshipLifecycle,
    Telemetry,
}

impl SinkEventType {
    /// Default wire-format type strings (§4.2), used when no override is
    /// present in the route's or sink's `typeMappings`.
    pub fn default_type_string(self) -> &'static str {
        match self {
            SinkEventType::TwinCreate => "Konnektr.DigitalTwins.Twin.Create",
            SinkEventType::TwinUpdate => "Konnektr.DigitalTwins.Twin.Update",
            SinkEventType::TwinDelete => "Konnektr.DigitalTwins.Twin.Delete",
            SinkEventType::RelationshipCreate => "Konnektr.DigitalTwins.Relationship.Create",
            SinkEventType::RelationshipUpdate => "Konnektr.DigitalTwins.Relationship.Update",
            SinkEventType::RelationshipDelete => "Konnektr.DigitalTwins.Relationship.Delete",
            SinkEventType::TwinLifecycle => "Konnektr.DigitalTwins.Twin.Lifecycle",
            SinkEventType::RelationshipLifecycle => "Konnektr.DigitalTwins.Relationship.Lifecycle",
            SinkEventType::PropertyEvent => "Konnektr.DigitalTwins.Property.Event",
            SinkEventType::Telemetry => "Konnektr.DigitalTwins.Telemetry",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventRoute {
    pub sink_name: String,
    pub event_format: EventFormat,
    #[serde(default)]
    pub type_mappings: HashMap<SinkEventType, String>,
}

impl EventRoute {
    pub fn new(sink_name: impl Into<String>, event_format: EventFormat) -> Self {
        Self {
            sink_name: sink_name.into(),
            event_format,
            type_mappings: HashMap::new(),
        }
    }

    /// Resolves the wire type string for a given sink-facing event kind,
    /// preferring the route's override over the built-in default.
    pub fn resolve_type(&self, kind: SinkEventType) -> String {
        self.type_mappings
            .get(&kind)
            .cloned()
            .unwrap_or_else(|| kind.default_type_string().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_default_type_without_override() {
        let route = EventRoute::new("kafka-main", EventFormat::EventNotification);
        assert_eq!(route.resolve_type(SinkEventType::TwinCreate), "Konnektr.DigitalTwins.Twin.Create");
    }

    #[test]
    fn override_takes_precedence() {
        let mut route = EventRoute::new("kafka-main", EventFormat::EventNotification);
        route.type_mappings.insert(SinkEventType::TwinCreate, "custom.twin.created".to_string());
        assert_eq!(route.resolve_type(SinkEventType::TwinCreate), "custom.twin.created");
    }
}
