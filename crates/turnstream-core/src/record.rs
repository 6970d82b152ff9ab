use serde_json::Value;
use uuid::Uuid;

use crate::errors::TurnFailure;
use crate::event::InvocationId;

/// Lifecycle of one tool invocation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolStatus {
    /// Announced, input not yet complete.
    Preparing,
    /// Input complete, waiting for a result.
    Running,
    Complete,
    Failed,
}

impl ToolStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::Failed)
    }
}

/// One tool invocation as shown to the user and kept in history.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ToolEntry {
    pub id: InvocationId,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<Value>,
    pub status: ToolStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ToolEntry {
    pub fn new(id: impl Into<InvocationId>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            input: None,
            status: ToolStatus::Preparing,
            result: None,
            error: None,
        }
    }
}

/// Conversation-history entry assembled once per turn.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct TurnRecord {
    pub turn_id: Uuid,
    pub visible_text: String,
    pub tool_summaries: Vec<ToolEntry>,
    pub reasoning_text: String,
    /// True only when a completion was observed and nothing failed.
    pub complete: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<TurnFailure>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub faults: Vec<TurnFailure>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics: Option<Value>,
    /// Malformed raw events plus events left in the queue at turn end.
    pub dropped_events: u64,
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;

    #[test]
    fn record_serializes_without_empty_optionals() {
        let record = TurnRecord {
            turn_id: Uuid::nil(),
            visible_text: "4".into(),
            tool_summaries: vec![ToolEntry {
                status: ToolStatus::Complete,
                result: Some(json!("4")),
                ..ToolEntry::new("T1", "calculator")
            }],
            reasoning_text: String::new(),
            complete: true,
            failure: None,
            faults: Vec::new(),
            stop_reason: Some("end_turn".into()),
            metrics: None,
            dropped_events: 0,
        };
        assert_eq!(
            serde_json::to_value(&record).expect("serialize"),
            json!({
                "turn_id": "00000000-0000-0000-0000-000000000000",
                "visible_text": "4",
                "tool_summaries": [{"id": "T1", "name": "calculator", "status": "complete", "result": "4"}],
                "reasoning_text": "",
                "complete": true,
                "stop_reason": "end_turn",
                "dropped_events": 0
            })
        );
    }
}
