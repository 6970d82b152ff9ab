//! Producer/consumer boundary for one turn.
//!
//! A producer (usually the agent runtime, possibly on another task or thread)
//! pushes raw events through an [`EventSender`]. The consumer drives a
//! [`Coordinator`] from a [`TurnStream`] on its own context, which is the only
//! place render targets are touched. The queue is the single point where the
//! two sides meet.

use std::future::Future;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{Instrument as _, debug, info_span};

use crate::coordinator::{Coordinator, Dispatch};
use crate::errors::{LifecycleError, ProducerError};
use crate::raw::RawEvent;
use crate::record::TurnRecord;

/// Creates a connected sender/stream pair for one turn.
pub fn turn_stream() -> (EventSender, TurnStream) {
    let (tx, rx) = mpsc::unbounded_channel();
    let (cancel_tx, cancel_rx) = watch::channel(false);
    (
        EventSender { tx },
        TurnStream {
            rx,
            cancel_rx,
            cancel: CancelHandle { tx: cancel_tx },
        },
    )
}

/// Producer side of the queue. Cheap to clone and `Send`.
#[derive(Clone, Debug)]
pub struct EventSender {
    tx: mpsc::UnboundedSender<RawEvent>,
}

impl EventSender {
    /// Enqueues one raw event. Returns `false` once the consumer is gone.
    pub fn send(&self, event: RawEvent) -> bool {
        self.tx.send(event).is_ok()
    }

    /// Enqueues the synthetic terminal event for a failed producer.
    pub fn fail(&self, reason: impl Into<String>) -> bool {
        self.send(RawEvent::force_stop(reason))
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Handle used to stop a turn from outside the consumer loop.
#[derive(Clone, Debug)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    /// Requests cancellation.
    ///
    /// The consumer observes it before its next dequeue, ahead of any events
    /// still queued.
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }
}

/// Consumer side of the queue.
#[derive(Debug)]
pub struct TurnStream {
    rx: mpsc::UnboundedReceiver<RawEvent>,
    cancel_rx: watch::Receiver<bool>,
    cancel: CancelHandle,
}

enum Stop {
    Terminal,
    Cancelled,
    Closed,
}

impl TurnStream {
    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// Runs one turn to completion on `coordinator`.
    ///
    /// Stops on a terminal event, on cancellation, or when every sender is
    /// dropped. Events still queued at that point are counted as dropped.
    /// `finalize_turn` is always called exactly once.
    pub async fn drive(mut self, coordinator: &mut Coordinator) -> Result<TurnRecord, LifecycleError> {
        let turn_id = coordinator.begin_turn()?;
        let span = info_span!("turn", turn_id = %turn_id);
        async move {
            let stop = self.pump(coordinator).await?;
            match stop {
                Stop::Terminal => debug!("terminal event reached"),
                Stop::Cancelled => coordinator.cancel()?,
                Stop::Closed => coordinator.close_stream()?,
            }

            self.rx.close();
            let mut leftover = 0_u64;
            while self.rx.try_recv().is_ok() {
                leftover += 1;
            }
            if leftover > 0 {
                debug!(leftover, "discarding events queued after turn end");
                coordinator.record_dropped(leftover);
            }
            coordinator.finalize_turn()
        }
        .instrument(span)
        .await
    }

    async fn pump(&mut self, coordinator: &mut Coordinator) -> Result<Stop, LifecycleError> {
        loop {
            if *self.cancel_rx.borrow() {
                return Ok(Stop::Cancelled);
            }
            tokio::select! {
                biased;
                changed = self.cancel_rx.changed() => {
                    if changed.is_err() || *self.cancel_rx.borrow() {
                        return Ok(Stop::Cancelled);
                    }
                }
                next = self.rx.recv() => {
                    let Some(event) = next else {
                        return Ok(Stop::Closed);
                    };
                    if coordinator.dispatch(&event)? == Dispatch::Terminal {
                        return Ok(Stop::Terminal);
                    }
                }
            }
        }
    }
}

/// Runs `producer` on the tokio runtime. An error is turned into the
/// synthetic force-stop event so the consumer never waits on a dead producer.
pub fn spawn_producer<F, Fut>(sender: EventSender, producer: F) -> JoinHandle<()>
where
    F: FnOnce(EventSender) -> Fut + Send + 'static,
    Fut: Future<Output = Result<(), ProducerError>> + Send + 'static,
{
    tokio::spawn(async move {
        if let Err(err) = producer(sender.clone()).await {
            tracing::warn!(error = %err, "producer failed");
            sender.fail(err.to_string());
        }
    })
}
