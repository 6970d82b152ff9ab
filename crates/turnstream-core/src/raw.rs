use serde_json::{Map, Value};

/// Untyped callback payload as produced by the agent runtime.
///
/// Raw events are read-only; normalization borrows them.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct RawEvent(Value);

impl RawEvent {
    pub fn new(value: Value) -> Self {
        Self(value)
    }

    /// Parses one JSON document (for example a JSONL line).
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text).map(Self)
    }

    /// Synthetic terminal event enqueued when the producer fails.
    pub fn force_stop(reason: impl Into<String>) -> Self {
        Self(serde_json::json!({
            "force_stop": true,
            "force_stop_reason": reason.into(),
        }))
    }

    pub fn value(&self) -> &Value {
        &self.0
    }

    pub fn as_object(&self) -> Option<&Map<String, Value>> {
        self.0.as_object()
    }

    pub fn into_value(self) -> Value {
        self.0
    }
}

impl From<Value> for RawEvent {
    fn from(value: Value) -> Self {
        Self(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn force_stop_carries_reason() {
        let raw = RawEvent::force_stop("agent crashed");
        let object = raw.as_object().expect("object");
        assert_eq!(object.get("force_stop"), Some(&Value::Bool(true)));
        assert_eq!(
            object.get("force_stop_reason").and_then(Value::as_str),
            Some("agent crashed")
        );
    }

    #[test]
    fn parse_is_transparent() {
        let raw = RawEvent::parse(r#"{"data":"hi"}"#).expect("parse");
        assert_eq!(raw.value(), &serde_json::json!({"data": "hi"}));
        assert_eq!(
            serde_json::to_string(&raw).expect("serialize"),
            r#"{"data":"hi"}"#
        );
    }
}
