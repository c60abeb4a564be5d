use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use time::OffsetDateTime;
use uuid::Uuid;

use super::ports::Record;

/// Dotted, lowercase event type name such as `compliance.requirement.updated`.
///
/// At least two segments are required (`<namespace>.<action>`); each segment
/// is made of ASCII lowercase letters, digits or `_`. Construction goes
/// through [`EventType::parse`], so a value of this type is always
/// recognizable, including after deserialization.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct EventType(String);

impl EventType {
    pub fn parse(name: impl Into<String>) -> Result<Self, InvalidEventType> {
        let name = name.into();

        let mut segments = 0usize;
        for segment in name.split('.') {
            let valid = !segment.is_empty()
                && segment
                    .chars()
                    .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');
            if !valid {
                return Err(InvalidEventType(name));
            }
            segments += 1;
        }

        if segments < 2 {
            return Err(InvalidEventType(name));
        }

        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Leading segment, e.g. `compliance` for `compliance.requirement.updated`
    pub fn namespace(&self) -> &str {
        self.0.split('.').next().unwrap_or(&self.0)
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for EventType {
    type Err = InvalidEventType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for EventType {
    type Error = InvalidEventType;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<EventType> for String {
    fn from(value: EventType) -> Self {
        value.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unrecognized event type: '{0}'")]
pub struct InvalidEventType(pub String);

/// An immutable fact emitted by the business domain.
///
/// Serialized with `serde_json` this is the exact body POSTed to subscribers;
/// `id` is the idempotency key receivers de-duplicate on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub id: String,

    #[serde(rename = "type")]
    pub event_type: EventType,

    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,

    pub data: Value,

    pub owner_id: String,
}

impl Event {
    /// Create an event with a fresh id and the current time
    pub fn new(event_type: EventType, owner_id: impl Into<String>, data: Value) -> Self {
        Self {
            id: format!("evt_{}", Uuid::new_v4().simple()),
            event_type,
            timestamp: OffsetDateTime::now_utc(),
            data,
            owner_id: owner_id.into(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_timestamp(mut self, timestamp: OffsetDateTime) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Canonical wire body
    pub fn to_json_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}

impl Record for Event {
    fn record_id(&self) -> &str {
        &self.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use time::macros::datetime;

    #[test]
    fn test_event_type_accepts_dotted_names() {
        for name in [
            "compliance.requirement.updated",
            "incident.resolved",
            "course_2.published",
        ] {
            assert!(EventType::parse(name).is_ok(), "{name} should parse");
        }
    }

    #[test]
    fn test_event_type_rejects_unrecognizable_names() {
        for name in [
            "",
            "incident",
            "incident.",
            ".resolved",
            "Incident.Resolved",
            "incident resolved",
            "incident..resolved",
        ] {
            assert!(EventType::parse(name).is_err(), "{name:?} should be rejected");
        }
    }

    #[test]
    fn test_event_type_namespace() -> Result<(), InvalidEventType> {
        let ty = EventType::parse("compliance.requirement.updated")?;
        assert_eq!(ty.namespace(), "compliance");
        assert_eq!(ty.to_string(), "compliance.requirement.updated");
        Ok(())
    }

    #[test]
    fn test_event_type_deserialization_is_validated() {
        let ok: Result<EventType, _> = serde_json::from_str(r#""incident.resolved""#);
        assert!(ok.is_ok());

        let bad: Result<EventType, _> = serde_json::from_str(r#""NOPE""#);
        assert!(bad.is_err());
    }

    #[test]
    fn test_event_wire_format() -> Result<(), Box<dyn std::error::Error>> {
        let event = Event::new(
            EventType::parse("compliance.requirement.updated")?,
            "org_1",
            json!({"requirementId": "req_9"}),
        )
        .with_id("evt_1")
        .with_timestamp(datetime!(2024-03-01 12:00:00 UTC));

        let value: Value = serde_json::from_slice(&event.to_json_bytes()?)?;

        assert_eq!(value["id"], "evt_1");
        assert_eq!(value["type"], "compliance.requirement.updated");
        assert_eq!(value["ownerId"], "org_1");
        assert_eq!(value["timestamp"], "2024-03-01T12:00:00Z");
        assert_eq!(value["data"]["requirementId"], "req_9");
        Ok(())
    }

    #[test]
    fn test_new_event_gets_unique_id() -> Result<(), InvalidEventType> {
        let ty = EventType::parse("incident.resolved")?;
        let a = Event::new(ty.clone(), "org_1", Value::Null);
        let b = Event::new(ty, "org_1", Value::Null);

        assert!(a.id.starts_with("evt_"));
        assert_ne!(a.id, b.id);
        Ok(())
    }
}
