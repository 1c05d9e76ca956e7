//! C2: pure, deterministic `(EventData, sourceURI, typeMap) -> []CloudEvent`
//! transform for the three output formats (§4.2).

use cdc_core::{CdcError, CloudEvent, EventData, EventFormat, EventRoute, EventType, SinkEventType};
use json_patch::{diff, Patch, PatchOperation};
use serde_json::{json, Map, Value};
use std::collections::HashMap;

fn to_value(map: &HashMap<String, Value>) -> Value {
    Value::Object(map.iter().map(|(k, v)| (k.clone(), v.clone())).collect::<Map<_, _>>())
}

fn get_str<'a>(map: &'a HashMap<String, Value>, key: &str) -> Option<&'a str> {
    map.get(key).and_then(Value::as_str)
}

fn model_id(map: &HashMap<String, Value>) -> Option<&str> {
    map.get("$metadata")?.get("$model")?.as_str()
}

fn op_path(op: &PatchOperation) -> String {
    match op {
        PatchOperation::Add(o) => o.path.to_string(),
        PatchOperation::Remove(o) => o.path.to_string(),
        PatchOperation::Replace(o) => o.path.to_string(),
        PatchOperation::Move(o) => o.path.to_string(),
        PatchOperation::Copy(o) => o.path.to_string(),
        PatchOperation::Test(o) => o.path.to_string(),
    }
}

fn op_value(op: &PatchOperation) -> Option<Value> {
    match op {
        PatchOperation::Add(o) => Some(o.value.clone()),
        PatchOperation::Replace(o) => Some(o.value.clone()),
        PatchOperation::Test(o) => Some(o.value.clone()),
        _ => None,
    }
}

/// `add`→Create, `replace`→Update, `remove`→Delete (§4.2, §8 item 4).
fn op_action(op: &PatchOperation) -> Option<&'static str> {
    match op {
        PatchOperation::Add(_) => Some("Create"),
        PatchOperation::Replace(_) => Some("Update"),
        PatchOperation::Remove(_) => Some("Delete"),
        _ => None,
    }
}

/// Patch path with leading `/` stripped and remaining `/` → `_` (§4.2, §8
/// item 4).
fn path_to_key(path: &str) -> String {
    path.trim_start_matches('/').replace('/', "_")
}

fn resolve_in(value: &Value, path: &str) -> Option<Value> {
    let pointer = jsonptr::PointerBuf::parse(path).ok()?;
    pointer.resolve(value).ok().cloned()
}

/// Builds every CloudEvent produced from one `EventData` for the route's
/// configured format (§4.2). Pure and deterministic given its inputs.
pub fn build_cloud_events(
    event: &EventData,
    source: &str,
    route: &EventRoute,
) -> Result<Vec<CloudEvent>, CdcError> {
    match route.event_format {
        EventFormat::EventNotification => build_event_notification(event, source, route),
        EventFormat::DataHistory => build_data_history(event, source, route),
        EventFormat::Telemetry => build_telemetry(event, source, route),
    }
}

fn subject_for(event: &EventData, side: &HashMap<String, Value>) -> Result<String, CdcError> {
    if event.event_type.is_twin() {
        get_str(side, "$dtId")
            .map(str::to_string)
            .ok_or_else(|| CdcError::invalid_event_data("missing $dtId"))
    } else {
        let source_id = get_str(side, "$sourceId")
            .ok_or_else(|| CdcError::invalid_event_data("missing $sourceId"))?;
        let rel_id = get_str(side, "$relationshipId")
            .ok_or_else(|| CdcError::invalid_event_data("missing $relationshipId"))?;
        Ok(format!("{source_id}/relationships/{rel_id}"))
    }
}

fn sink_kind(event: &EventData) -> SinkEventType {
    match event.event_type {
        EventType::TwinCreate => SinkEventType::TwinCreate,
        EventType::TwinUpdate => SinkEventType::TwinUpdate,
        EventType::TwinDelete => SinkEventType::TwinDelete,
        EventType::RelationshipCreate => SinkEventType::RelationshipCreate,
        EventType::RelationshipUpdate => SinkEventType::RelationshipUpdate,
        EventType::RelationshipDelete => SinkEventType::RelationshipDelete,
        EventType::Telemetry => SinkEventType::Telemetry,
    }
}

fn build_event_notification(
    event: &EventData,
    source: &str,
    route: &EventRoute,
) -> Result<Vec<CloudEvent>, CdcError> {
    let event_type = route.resolve_type(sink_kind(event));
    match event.event_type {
        EventType::TwinCreate | EventType::RelationshipCreate => {
            let new_value = event
                .new_value
                .as_ref()
                .ok_or_else(|| CdcError::invalid_event_data("create requires newValue"))?;
            let subject = subject_for(event, new_value)?;
            Ok(vec![CloudEvent::new(source, event_type, subject, event.timestamp, to_value(new_value))])
        }
        EventType::TwinDelete | EventType::RelationshipDelete => {
            if event.old_value.is_empty() {
                return Err(CdcError::invalid_event_data("delete requires oldValue"));
            }
            let subject = subject_for(event, &event.old_value)?;
            Ok(vec![CloudEvent::new(source, event_type, subject, event.timestamp, to_value(&event.old_value))])
        }
        EventType::TwinUpdate | EventType::RelationshipUpdate => {
            let new_value = event
                .new_value
                .as_ref()
                .ok_or_else(|| CdcError::invalid_event_data("update requires newValue"))?;
            if event.old_value.is_empty() {
                return Err(CdcError::invalid_event_data("update requires oldValue"));
            }
            let model = model_id(new_value).unwrap_or_default();
            let subject = subject_for(event, new_value)?;
            let patch = diff(&to_value(&event.old_value), &to_value(new_value));
            let data = json!({
                "modelId": model,
                "patch": serde_json::to_value(&patch)?,
            });
            Ok(vec![CloudEvent::new(source, event_type, subject, event.timestamp, data)])
        }
        EventType::Telemetry => Err(CdcError::invalid_event_data(
            "Telemetry events are not valid for the EventNotification format",
        )),
    }
}

fn twin_lifecycle_data(
    action: &str,
    dt_id: &str,
    timestamp: chrono::DateTime<chrono::Utc>,
    source: &str,
    model: Option<&str>,
) -> Value {
    json!({
        "twinId": dt_id,
        "action": action,
        "timeStamp": timestamp,
        "serviceId": source,
        "modelId": model,
    })
}

fn relationship_lifecycle_data(
    action: &str,
    relationship_id: &str,
    timestamp: chrono::DateTime<chrono::Utc>,
    source: &str,
    name: Option<&str>,
    source_id: Option<&str>,
    target_id: Option<&str>,
) -> Value {
    json!({
        "relationshipId": relationship_id,
        "action": action,
        "timeStamp": timestamp,
        "serviceId": source,
        "name": name,
        "source": source_id,
        "target": target_id,
    })
}

fn property_event_data(
    id: &str,
    model: Option<&str>,
    key: &str,
    value: Option<Value>,
    action: &str,
    source_timestamp: Option<Value>,
) -> Value {
    let mut obj = Map::new();
    obj.insert("id".to_string(), json!(id));
    obj.insert("modelId".to_string(), json!(model));
    obj.insert("key".to_string(), json!(key));
    obj.insert("value".to_string(), value.unwrap_or(Value::Null));
    obj.insert("action".to_string(), json!(action));
    if let Some(source_time) = source_timestamp {
        obj.insert("sourceTimeStamp".to_string(), source_time);
    }
    Value::Object(obj)
}

fn property_events_from_patch(
    id: &str,
    model: Option<&str>,
    patch: &Patch,
    source: &str,
    route: &EventRoute,
    timestamp: chrono::DateTime<chrono::Utc>,
    old_json: &Value,
    new_json: &Value,
) -> Vec<CloudEvent> {
    let ops = &patch.0;
    let property_type = route.resolve_type(SinkEventType::PropertyEvent);
    let mut events = Vec::new();
    let mut emitted_keys = std::collections::HashSet::new();
    for op in ops.iter() {
        let path = op_path(op);
        if path.starts_with("/$") {
            continue;
        }
        let Some(action) = op_action(op) else { continue };
        let key = path_to_key(&path);
        let value = op_value(op).or_else(|| resolve_in(old_json, &path));
        let source_time_path = format!("/$metadata/{key}/sourceTime");
        let source_time = ops
            .iter()
            .find(|candidate| op_path(candidate) == source_time_path)
            .and_then(op_value);
        let data = property_event_data(id, model, &key, value, action, source_time);
        events.push(CloudEvent::new(source, property_type.clone(), id, timestamp, data));
        emitted_keys.insert(key);
    }

    // §8-S3: a same-value property update only touches
    // `/$metadata/<key>/lastUpdateTime`, which `diff` drops since the
    // property path itself is unchanged. The source still emits a
    // redundant `replace` for the property in that case; synthesize the
    // same PropertyEvent here rather than relying on the minimal diff.
    for op in ops.iter() {
        let path = op_path(op);
        let Some(key) =
            path.strip_prefix("/$metadata/").and_then(|rest| rest.strip_suffix("/lastUpdateTime"))
        else {
            continue;
        };
        if emitted_keys.contains(key) {
            continue;
        }
        let Some(value) = resolve_in(new_json, &format!("/{key}")) else { continue };
        let source_time_path = format!("/$metadata/{key}/sourceTime");
        let source_time =
            ops.iter().find(|candidate| op_path(candidate) == source_time_path).and_then(op_value);
        let data = property_event_data(id, model, key, Some(value), "Update", source_time);
        events.push(CloudEvent::new(source, property_type.clone(), id, timestamp, data));
        emitted_keys.insert(key.to_string());
    }
    events
}

fn build_data_history(
    event: &EventData,
    source: &str,
    route: &EventRoute,
) -> Result<Vec<CloudEvent>, CdcError> {
    let mut events = Vec::new();
    match event.event_type {
        EventType::TwinCreate => {
            let new_value = event
                .new_value
                .as_ref()
                .ok_or_else(|| CdcError::invalid_event_data("create requires newValue"))?;
            let dt_id = get_str(new_value, "$dtId")
                .ok_or_else(|| CdcError::invalid_event_data("missing $dtId"))?;
            let model = model_id(new_value);
            let lifecycle_type = route.resolve_type(SinkEventType::TwinLifecycle);
            events.push(CloudEvent::new(
                source,
                lifecycle_type,
                dt_id,
                event.timestamp,
                twin_lifecycle_data("Create", dt_id, event.timestamp, source, model),
            ));
            let property_type = route.resolve_type(SinkEventType::PropertyEvent);
            for (key, value) in new_value.iter() {
                if key.starts_with('$') {
                    continue;
                }
                let data = property_event_data(dt_id, model, key, Some(value.clone()), "Create", None);
                events.push(CloudEvent::new(source, property_type.clone(), dt_id, event.timestamp, data));
            }
        }
        EventType::TwinDelete => {
            if event.old_value.is_empty() {
                return Err(CdcError::invalid_event_data("delete requires oldValue"));
            }
            let dt_id = get_str(&event.old_value, "$dtId")
                .ok_or_else(|| CdcError::invalid_event_data("missing $dtId"))?;
            let model = model_id(&event.old_value);
            let lifecycle_type = route.resolve_type(SinkEventType::TwinLifecycle);
            events.push(CloudEvent::new(
                source,
                lifecycle_type,
                dt_id,
                event.timestamp,
                twin_lifecycle_data("Delete", dt_id, event.timestamp, source, model),
            ));
        }
        EventType::TwinUpdate => {
            let new_value = event
                .new_value
                .as_ref()
                .ok_or_else(|| CdcError::invalid_event_data("update requires newValue"))?;
            if event.old_value.is_empty() {
                return Err(CdcError::invalid_event_data("update requires oldValue"));
            }
            let dt_id = get_str(new_value, "$dtId")
                .ok_or_else(|| CdcError::invalid_event_data("missing $dtId"))?;
            let model = model_id(new_value);
            let old_json = to_value(&event.old_value);
            let new_json = to_value(new_value);
            let patch = diff(&old_json, &new_json);
            if patch.0.iter().any(|op| op_path(op) == "/$metadata/$model") {
                let lifecycle_type = route.resolve_type(SinkEventType::TwinLifecycle);
                events.push(CloudEvent::new(
                    source,
                    lifecycle_type,
                    dt_id,
                    event.timestamp,
                    twin_lifecycle_data("Update", dt_id, event.timestamp, source, model),
                ));
            }
            events.extend(property_events_from_patch(
                dt_id,
                model,
                &patch,
                source,
                route,
                event.timestamp,
                &old_json,
                &new_json,
            ));
        }
        EventType::RelationshipCreate => {
            let new_value = event
                .new_value
                .as_ref()
                .ok_or_else(|| CdcError::invalid_event_data("create requires newValue"))?;
            let rel_id = get_str(new_value, "$relationshipId")
                .ok_or_else(|| CdcError::invalid_event_data("missing $relationshipId"))?;
            let source_id = get_str(new_value, "$sourceId").unwrap_or_default();
            let subject = format!("{source_id}/relationships/{rel_id}");
            let lifecycle_type = route.resolve_type(SinkEventType::RelationshipLifecycle);
            events.push(CloudEvent::new(
                source,
                lifecycle_type,
                subject,
                event.timestamp,
                relationship_lifecycle_data(
                    "Create",
                    rel_id,
                    event.timestamp,
                    source,
                    get_str(new_value, "$relationshipName"),
                    get_str(new_value, "$sourceId"),
                    get_str(new_value, "$targetId"),
                ),
            ));
        }
        EventType::RelationshipDelete => {
            if event.old_value.is_empty() {
                return Err(CdcError::invalid_event_data("delete requires oldValue"));
            }
            let rel_id = get_str(&event.old_value, "$relationshipId")
                .ok_or_else(|| CdcError::invalid_event_data("missing $relationshipId"))?;
            let source_id = get_str(&event.old_value, "$sourceId").unwrap_or_default();
            let subject = format!("{source_id}/relationships/{rel_id}");
            let lifecycle_type = route.resolve_type(SinkEventType::RelationshipLifecycle);
            events.push(CloudEvent::new(
                source,
                lifecycle_type,
                subject,
                event.timestamp,
                relationship_lifecycle_data(
                    "Delete",
                    rel_id,
                    event.timestamp,
                    source,
                    get_str(&event.old_value, "$relationshipName"),
                    get_str(&event.old_value, "$sourceId"),
                    get_str(&event.old_value, "$targetId"),
                ),
            ));
        }
        EventType::RelationshipUpdate => {
            let new_value = event
                .new_value
                .as_ref()
                .ok_or_else(|| CdcError::invalid_event_data("update requires newValue"))?;
            if event.old_value.is_empty() {
                return Err(CdcError::invalid_event_data("update requires oldValue"));
            }
            let rel_id = get_str(new_value, "$relationshipId")
                .ok_or_else(|| CdcError::invalid_event_data("missing $relationshipId"))?;
            let source_id = get_str(new_value, "$sourceId").unwrap_or_default();
            let subject = format!("{source_id}/relationships/{rel_id}");
            let old_json = to_value(&event.old_value);
            let new_json = to_value(new_value);
            let patch = diff(&old_json, &new_json);
            events.push(CloudEvent::new(
                source,
                route.resolve_type(SinkEventType::RelationshipLifecycle),
                subject.clone(),
                event.timestamp,
                relationship_lifecycle_data(
                    "Update",
                    rel_id,
                    event.timestamp,
                    source,
                    get_str(new_value, "$relationshipName"),
                    get_str(new_value, "$sourceId"),
                    get_str(new_value, "$targetId"),
                ),
            ));
            events.extend(property_events_from_patch(
                &subject,
                None,
                &patch,
                source,
                route,
                event.timestamp,
                &old_json,
                &new_json,
            ));
        }
        EventType::Telemetry => {
            return Err(CdcError::invalid_event_data(
                "Telemetry events are not valid for the DataHistory format",
            ))
        }
    }
    Ok(events)
}

fn build_telemetry(
    event: &EventData,
    source: &str,
    route: &EventRoute,
) -> Result<Vec<CloudEvent>, CdcError> {
    if event.event_type != EventType::Telemetry {
        return Err(CdcError::invalid_event_data("Telemetry format requires a Telemetry event"));
    }
    let payload = event
        .new_value
        .as_ref()
        .ok_or_else(|| CdcError::invalid_event_data("telemetry requires newValue"))?;
    let event_type = route.resolve_type(SinkEventType::Telemetry);
    Ok(vec![CloudEvent::new(source, event_type, &event.id, event.timestamp, to_value(payload))])
}

#[cfg(test)]
mod tests {
    use super::*;
    use cdc_core::EventFormat;
    use chrono::Utc;

    fn twin_create_event() -> EventData {
        let mut e = EventData::new("row-1", "graph-a", "Twin", EventType::TwinCreate, Utc::now());
        e.new_value = Some(
            [("$dtId".to_string(), json!("twin1")), ("$metadata".to_string(), json!({"$model": "m1"}))]
                .into_iter()
                .collect(),
        );
        e
    }

    #[test]
    fn s1_twin_create_notification() {
        let event = twin_create_event();
        let route = EventRoute::new("kafka-main", EventFormat::EventNotification);
        let events = build_event_notification(&event, "src", &route).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, "Konnektr.DigitalTwins.Twin.Create");
        assert_eq!(events[0].subject, "twin1");
        assert_eq!(events[0].data["$dtId"], json!("twin1"));
    }

    #[test]
    fn s2_twin_update_patch() {
        let mut event = EventData::new("row-1", "graph-a", "Twin", EventType::TwinUpdate, Utc::now());
        event.old_value = [
            ("$dtId".to_string(), json!("twin1")),
            ("$metadata".to_string(), json!({"$model": "m0"})),
        ]
        .into_iter()
        .collect();
        event.new_value = Some(
            [("$dtId".to_string(), json!("twin1")), ("$metadata".to_string(), json!({"$model": "m1"}))]
                .into_iter()
                .collect(),
        );
        let route = EventRoute::new("kafka-main", EventFormat::EventNotification);
        let events = build_event_notification(&event, "src", &route).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, "Konnektr.DigitalTwins.Twin.Update");
        assert_eq!(events[0].data["modelId"], json!("m1"));
        let patch = events[0].data["patch"].as_array().unwrap();
        assert!(patch.iter().any(|op| op["path"] == "/$metadata/$model"));
    }

    #[test]
    fn s3_same_value_update_with_metadata_timestamp_change_still_emits_property_event() {
        let mut event = EventData::new("row-1", "graph-a", "Twin", EventType::TwinUpdate, Utc::now());
        event.old_value = [
            ("$dtId".to_string(), json!("twin1")),
            ("temperature".to_string(), json!(25.5)),
            ("$metadata".to_string(), json!({"temperature": {"lastUpdateTime": "2024-01-01T00:00:00Z"}})),
        ]
        .into_iter()
        .collect();
        event.new_value = Some(
            [
                ("$dtId".to_string(), json!("twin1")),
                ("temperature".to_string(), json!(25.5)),
                ("$metadata".to_string(), json!({"temperature": {"lastUpdateTime": "2024-01-02T00:00:00Z"}})),
            ]
            .into_iter()
            .collect(),
        );
        let route = EventRoute::new("kafka-main", EventFormat::DataHistory);
        let events = build_data_history(&event, "src", &route).unwrap();
        let property_events: Vec<_> = events
            .iter()
            .filter(|e| e.event_type == "Konnektr.DigitalTwins.Property.Event")
            .collect();
        assert!(property_events.iter().any(|e| e.data["key"] == json!("temperature")
            && e.data["value"] == json!(25.5)
            && e.data["action"] == json!("Update")));
    }

    #[test]
    fn s4_relationship_delete() {
        let mut event =
            EventData::new("row-2", "graph-a", "Relationship", EventType::RelationshipDelete, Utc::now());
        event.old_value = [
            ("$relationshipId".to_string(), json!("rel1")),
            ("$sourceId".to_string(), json!("twinA")),
            ("$targetId".to_string(), json!("twinB")),
            ("$relationshipName".to_string(), json!("has")),
        ]
        .into_iter()
        .collect();
        let route = EventRoute::new("kafka-main", EventFormat::EventNotification);
        let events = build_event_notification(&event, "src", &route).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, "Konnektr.DigitalTwins.Relationship.Delete");
        assert_eq!(events[0].subject, "twinA/relationships/rel1");
        assert_eq!(events[0].data["$relationshipId"], json!("rel1"));
    }

    #[test]
    fn create_time_property_events_use_create_action() {
        let event = twin_create_event();
        let mut event = event;
        event.new_value.as_mut().unwrap().insert("color".to_string(), json!("red"));
        let route = EventRoute::new("history", EventFormat::DataHistory);
        let events = build_data_history(&event, "src", &route).unwrap();
        let property = events
            .iter()
            .find(|e| e.event_type == "Konnektr.DigitalTwins.Property.Event")
            .unwrap();
        assert_eq!(property.data["action"], json!("Create"));
        assert_eq!(property.data["key"], json!("color"));
    }

    #[test]
    fn lifecycle_comes_before_property_events() {
        let event = twin_create_event();
        let route = EventRoute::new("history", EventFormat::DataHistory);
        let events = build_data_history(&event, "src", &route).unwrap();
        assert_eq!(events[0].event_type, "Konnektr.DigitalTwins.Twin.Lifecycle");
    }

    #[test]
    fn telemetry_passthrough() {
        let mut event = EventData::new("twin1", "graph-a", "telemetry", EventType::Telemetry, Utc::now());
        event.new_value = Some([("temp".to_string(), json!(20))].into_iter().collect());
        let route = EventRoute::new("mqtt-telemetry", EventFormat::Telemetry);
        let events = build_telemetry(&event, "src", &route).unwrap();
        assert_eq!(events[0].subject, "twin1");
        assert_eq!(events[0].event_type, "Konnektr.DigitalTwins.Telemetry");
    }

    #[test]
    fn invalid_event_type_for_format_fails() {
        let mut event = EventData::new("twin1", "graph-a", "telemetry", EventType::Telemetry, Utc::now());
        event.new_value = Some(Default::default());
        let route = EventRoute::new("kafka-main", EventFormat::EventNotification);
        assert!(build_event_notification(&event, "src", &route).is_err());
    }

    #[test]
    fn every_cloud_event_gets_a_fresh_uuid() {
        let event = twin_create_event();
        let route = EventRoute::new("history", EventFormat::DataHistory);
        let events = build_data_history(&event, "src", &route).unwrap();
        let ids: std::collections::HashSet<_> = events.iter().map(|e| e.id).collect();
        assert_eq!(ids.len(), events.len());
    }
}
