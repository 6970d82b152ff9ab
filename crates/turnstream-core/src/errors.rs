use uuid::Uuid;

use crate::managers::ManagerKind;

/// Failure reported by the render layer when a slot cannot be created or updated.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("render error ({slot}): {message}")]
pub struct RenderError {
    /// Display name of the slot that failed.
    pub slot: String,
    /// Human-readable message from the render layer.
    pub message: String,
}

impl RenderError {
    /// Creates a render error for the given slot.
    pub fn new(slot: impl ToString, message: impl Into<String>) -> Self {
        Self {
            slot: slot.to_string(),
            message: message.into(),
        }
    }
}

/// Errors raised inside a manager while handling, flushing, aborting or
/// finalizing. The coordinator isolates these per manager.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ManagerFault {
    /// A render target rejected an update.
    #[error(transparent)]
    Render(#[from] RenderError),
    /// The manager detected an inconsistent internal state.
    #[error("invariant violated: {0}")]
    Invariant(String),
}

/// A raw event that could not be mapped onto the normalized taxonomy.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MalformedEvent {
    /// The payload is not a JSON object.
    #[error("raw event is not an object (found {found})")]
    NotAnObject { found: &'static str },
    /// The payload carries no key this normalizer recognises.
    #[error("raw event matches no known shape (keys: {})", keys.join(", "))]
    UnknownShape { keys: Vec<String> },
    /// A recognised key carries a value of the wrong type or is missing a
    /// required member.
    #[error("invalid `{field}`: {message}")]
    InvalidField { field: String, message: String },
}

impl MalformedEvent {
    pub(crate) fn invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidField {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Violations of the turn lifecycle contract. These indicate a bug in the
/// caller and are always surfaced, never swallowed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LifecycleError {
    /// `dispatch` or `finalize_turn` was called before `begin_turn`.
    #[error("turn not started: call begin_turn before dispatching or finalizing")]
    NotStarted,
    /// `begin_turn` was called while another turn is still open.
    #[error("turn {turn_id} is still in progress")]
    TurnInProgress { turn_id: Uuid },
    /// The turn was already finalized.
    #[error("turn {turn_id} was already finalized")]
    AlreadyFinalized { turn_id: Uuid },
}

/// Reason a turn record is marked incomplete.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, serde::Serialize, serde::Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TurnFailure {
    /// The consumer observed the stop signal.
    #[error("turn cancelled")]
    Cancelled,
    /// The producer failed or force-stopped the agent.
    #[error("producer failure: {message}")]
    Producer { message: String },
    /// The event stream closed before a completion event arrived.
    #[error("event stream closed before completion")]
    StreamClosed,
    /// A manager faulted and was degraded for the rest of the turn.
    #[error("{manager} manager fault: {message}")]
    ManagerFault { manager: ManagerKind, message: String },
}

/// Invalid configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// A reasoning marker is empty.
    #[error("{which} marker must not be empty")]
    EmptyMarker { which: &'static str },
    /// Opening and closing markers are identical.
    #[error("opening and closing markers must differ (both are {marker:?})")]
    IdenticalMarkers { marker: String },
    /// An environment value could not be parsed.
    #[error("invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Error returned by a producer future. The turn stream converts it into a
/// synthetic force-stop event.
#[derive(Debug, thiserror::Error)]
pub enum ProducerError {
    /// Reading the upstream source failed.
    #[error("producer i/o error: {0}")]
    Io(#[from] std::io::Error),
    /// An upstream payload could not be decoded.
    #[error("producer decode error: {0}")]
    Decode(#[from] serde_json::Error),
    /// The agent runtime reported a failure.
    #[error("agent failure: {0}")]
    Agent(String),
}

impl ProducerError {
    /// Creates an agent-runtime failure.
    pub fn agent(message: impl Into<String>) -> Self {
        Self::Agent(message.into())
    }
}
