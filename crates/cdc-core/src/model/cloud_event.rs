//! `CloudEvent`: the CloudEvents 1.0 envelope produced by the factory (C2).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloudEvent {
    pub id: Uuid,
    pub source: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub subject: String,
    pub time: DateTime<Utc>,
    #[serde(rename = "specversion")]
    pub spec_version: String,
    #[serde(rename = "datacontenttype")]
    pub data_content_type: String,
    pub data: Value,
}

impl CloudEvent {
    pub fn new(
        source: impl Into<String>,
        event_type: impl Into<String>,
        subject: impl Into<String>,
        time: DateTime<Utc>,
        data: Value,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            source: source.into(),
            event_type: event_type.into(),
            subject: subject.into(),
            time,
            spec_version: Self::SPEC_VERSION.to_string(),
            data_content_type: "application/json".to_string(),
            data,
        }
    }

    pub const SPEC_VERSION: &'static str = "1.0";
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn each_event_gets_a_fresh_id() {
        let a = CloudEvent::new("src", "type", "subj", Utc::now(), json!({}));
        let b = CloudEvent::new("src", "type", "subj", Utc::now(), json!({}));
        assert_ne!(a.id, b.id);
    }
}
