use serde_json::Value;

/// Producer-assigned tool invocation id, unique per tool call.
pub type InvocationId = String;

/// Event-loop lifecycle markers.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LifecyclePhase {
    Init,
    Start,
    /// A new model cycle began (typically after tool execution).
    CycleStart,
    Complete,
    /// The producer was stopped before it could complete.
    ForceStop { reason: String },
}

impl LifecyclePhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::ForceStop { .. })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultStatus {
    Success,
    Error,
}

impl ResultStatus {
    /// `success` (or no status at all) is success; anything else is an error.
    pub fn parse(raw: Option<&str>) -> Self {
        match raw {
            None | Some("success") => Self::Success,
            Some(_) => Self::Error,
        }
    }
}

/// Canonical event taxonomy every raw shape is reduced to.
#[derive(Clone, Debug, PartialEq)]
pub enum NormalizedEvent {
    Lifecycle {
        phase: LifecyclePhase,
    },
    /// Streamed answer text, possibly containing reasoning markers.
    TextDelta {
        text: String,
    },
    /// A tool block was seen for the first time.
    ToolStart {
        id: InvocationId,
        name: String,
    },
    /// Partial tool input. Informational only.
    ToolInputDelta {
        id: InvocationId,
        fragment: String,
    },
    /// Fully parsed tool input.
    ToolReady {
        id: InvocationId,
        name: String,
        input: Value,
    },
    ToolResult {
        id: InvocationId,
        status: ResultStatus,
        content: Value,
    },
    /// Reasoning text from the model's native reasoning channel.
    ///
    /// `heuristic` deltas carry no text; they only signal that the model
    /// started reasoning in a form the normalizer cannot decode.
    ReasoningDelta {
        text: String,
        heuristic: bool,
    },
    MessageComplete {
        role: String,
        content: String,
    },
    /// The agent finished the turn.
    Completion {
        stop_reason: Option<String>,
        metrics: Option<Value>,
    },
}

impl NormalizedEvent {
    /// Short stable name, used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Lifecycle { .. } => "lifecycle",
            Self::TextDelta { .. } => "text_delta",
            Self::ToolStart { .. } => "tool_start",
            Self::ToolInputDelta { .. } => "tool_input_delta",
            Self::ToolReady { .. } => "tool_ready",
            Self::ToolResult { .. } => "tool_result",
            Self::ReasoningDelta { .. } => "reasoning_delta",
            Self::MessageComplete { .. } => "message_complete",
            Self::Completion { .. } => "completion",
        }
    }

    /// Whether the event ends the turn.
    pub fn is_terminal(&self) -> bool {
        match self {
            Self::Completion { .. } => true,
            Self::Lifecycle { phase } => phase.is_terminal(),
            _ => false,
        }
    }

    pub fn text_delta(text: impl Into<String>) -> Self {
        Self::TextDelta { text: text.into() }
    }

    pub fn reasoning(text: impl Into<String>) -> Self {
        Self::ReasoningDelta {
            text: text.into(),
            heuristic: false,
        }
    }
}
