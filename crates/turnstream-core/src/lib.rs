//! Projection core for streamed agent turns.
//!
//! Raw callback payloads from an agent runtime are normalized, routed to
//! domain managers (reasoning, tools, answer text) and rendered into a small
//! set of placeholders. When the turn ends, every manager is finalized once
//! and a [`TurnRecord`] is assembled for conversation history.
//!
//! ```no_run
//! use turnstream_core::prelude::*;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut coordinator = Coordinator::new(&TurnConfig::from_env()?, Box::new(NullSurface))?;
//! let (sender, stream) = turn_stream();
//! spawn_producer(sender, |tx| async move {
//!     tx.send(RawEvent::parse(r#"{"data": "<thinking>hm</thinking>Hello"}"#)?);
//!     tx.send(RawEvent::parse(r#"{"result": {"stop_reason": "end_turn"}}"#)?);
//!     Ok(())
//! });
//! let record = stream.drive(&mut coordinator).await?;
//! assert_eq!(record.visible_text, "Hello");
//! # Ok(())
//! # }
//! ```

/// Turn settings and environment loading.
pub mod config;
/// Routing, fault isolation and record assembly.
pub mod coordinator;
/// Public error types.
pub mod errors;
/// Normalized event taxonomy.
pub mod event;
/// Reasoning, tool and message managers.
pub mod managers;
/// Raw event to normalized event mapping.
pub mod normalize;
/// Process-wide `tracing` setup for binaries.
pub mod observability;
/// Common imports for typical usage.
pub mod prelude;
/// Untyped producer payloads.
pub mod raw;
/// Tool entries and the assembled turn record.
pub mod record;
/// Render targets and the placeholder registry.
pub mod render;
/// Incremental reasoning-marker splitter.
pub mod splitter;
/// Producer/consumer queue with cancellation.
pub mod turn;

pub use config::TurnConfig;
pub use coordinator::{Coordinator, Dispatch};
pub use errors::{
    ConfigError, LifecycleError, MalformedEvent, ManagerFault, ProducerError, RenderError,
    TurnFailure,
};
pub use event::{InvocationId, LifecyclePhase, NormalizedEvent, ResultStatus};
pub use normalize::Normalizer;
pub use raw::RawEvent;
pub use record::{ToolEntry, ToolStatus, TurnRecord};
pub use render::{
    NullSurface, PlaceholderRegistry, ReasoningPhase, RenderContent, RenderSurface, RenderTarget,
    Slot, StatusLevel,
};
pub use splitter::{Markers, Segment, TagSplitter};
pub use turn::{CancelHandle, EventSender, TurnStream, spawn_producer, turn_stream};
