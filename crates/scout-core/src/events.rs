use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Kinds of progress events published into a session's stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    #[serde(rename = "status")]
    Status,
    #[serde(rename = "thought")]
    Thought,
    #[serde(rename = "tool_call")]
    ToolCall,
    #[serde(rename = "tool_result")]
    ToolResult,
    #[serde(rename = "error")]
    Error,
    /// Terminal sentinel. Nothing follows it in a session's stream.
    #[serde(rename = "DONE")]
    Done,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Status => "status",
            Self::Thought => "thought",
            Self::ToolCall => "tool_call",
            Self::ToolResult => "tool_result",
            Self::Error => "error",
            Self::Done => "DONE",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done)
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One immutable record in a session's event stream.
///
/// Wire form is `{"timestamp": ..., "type": ..., "payload": ...}`. The
/// `DONE` sentinel carries no payload, so the field is omitted for it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OrchestrationEvent {
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "type")]
    pub event_type: EventType,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub payload: Value,
}

impl OrchestrationEvent {
    pub fn new(event_type: EventType, payload: Value, timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            event_type,
            payload,
        }
    }

    pub fn done(timestamp: DateTime<Utc>) -> Self {
        Self::new(EventType::Done, Value::Null, timestamp)
    }

    pub fn is_terminal(&self) -> bool {
        self.event_type.is_terminal()
    }

    /// The `message` field most payloads carry, if any.
    pub fn message(&self) -> Option<&str> {
        self.payload.get("message").and_then(Value::as_str)
    }

    /// Serialize to the single-line JSON form sent to subscribers.
    pub fn to_wire(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            format!(r#"{{"type":"{}"}}"#, self.event_type.as_str())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ts() -> DateTime<Utc> {
        "2026-03-01T12:00:00Z".parse().unwrap()
    }

    #[test]
    fn event_type_wire_names() {
        let names: Vec<String> = [
            EventType::Status,
            EventType::Thought,
            EventType::ToolCall,
            EventType::ToolResult,
            EventType::Error,
            EventType::Done,
        ]
        .iter()
        .map(|t| serde_json::to_string(t).unwrap())
        .collect();
        assert_eq!(
            names,
            vec![
                "\"status\"",
                "\"thought\"",
                "\"tool_call\"",
                "\"tool_result\"",
                "\"error\"",
                "\"DONE\""
            ]
        );
    }

    #[test]
    fn wire_format_has_timestamp_type_payload() {
        let event = OrchestrationEvent::new(
            EventType::Status,
            json!({"message": "loading"}),
            ts(),
        );
        let value: Value = serde_json::from_str(&event.to_wire()).unwrap();
        assert_eq!(value["type"], "status");
        assert_eq!(value["payload"]["message"], "loading");
        assert!(value["timestamp"].as_str().unwrap().starts_with("2026-03-01T12:00:00"));
    }

    #[test]
    fn done_omits_payload() {
        let wire = OrchestrationEvent::done(ts()).to_wire();
        let value: Value = serde_json::from_str(&wire).unwrap();
        assert_eq!(value["type"], "DONE");
        assert!(value.get("payload").is_none());
    }

    #[test]
    fn parses_done_without_payload() {
        let event: OrchestrationEvent =
            serde_json::from_str(r#"{"timestamp":"2026-03-01T12:00:00Z","type":"DONE"}"#).unwrap();
        assert!(event.is_terminal());
        assert!(event.payload.is_null());
    }

    #[test]
    fn message_accessor() {
        let event = OrchestrationEvent::new(EventType::Error, json!({"message": "boom"}), ts());
        assert_eq!(event.message(), Some("boom"));
        assert_eq!(OrchestrationEvent::done(ts()).message(), None);
    }

    #[test]
    fn only_done_is_terminal() {
        assert!(EventType::Done.is_terminal());
        assert!(!EventType::Error.is_terminal());
        assert!(!EventType::Status.is_terminal());
    }
}
