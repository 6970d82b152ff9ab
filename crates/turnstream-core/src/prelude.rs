//! Common imports for driving a turn.
pub use crate::{
    CancelHandle, Coordinator, Dispatch, EventSender, LifecycleError, NullSurface, ProducerError,
    RawEvent, RenderContent, RenderSurface, RenderTarget, Slot, TurnConfig, TurnRecord,
    TurnStream, spawn_producer, turn_stream,
};
