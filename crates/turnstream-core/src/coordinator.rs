//! Routes normalized events to domain managers and assembles the turn record.

use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;

use crate::config::TurnConfig;
use crate::errors::{ConfigError, LifecycleError, ManagerFault, TurnFailure};
use crate::event::{LifecyclePhase, NormalizedEvent};
use crate::managers::{
    Fragment, Manager, ManagerKind, MessageManager, ReasoningManager, ReasoningSink, ToolManager,
    TurnContext, TurnManager,
};
use crate::normalize::Normalizer;
use crate::raw::RawEvent;
use crate::record::TurnRecord;
use crate::render::{PlaceholderRegistry, RenderContent, RenderSurface, Slot, StatusLevel};

/// Whether the caller should keep feeding events.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Dispatch {
    Continue,
    /// The turn reached a terminal event; only `finalize_turn` remains.
    Terminal,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum TurnPhase {
    Idle,
    Active(Uuid),
    Finalized(Uuid),
}

#[derive(Debug)]
struct ManagerEntry {
    manager: Manager,
    degraded: bool,
}

/// Per-turn bookkeeping that is not owned by any manager.
#[derive(Debug, Default)]
struct TurnBook {
    completed: bool,
    terminated: bool,
    cycles: u32,
    failure: Option<TurnFailure>,
    faults: Vec<TurnFailure>,
    stop_reason: Option<String>,
    metrics: Option<serde_json::Value>,
    dropped: u64,
}

/// Single-consumer projection of one agent turn at a time.
///
/// A coordinator is reused across turns: `begin_turn`, any number of
/// `dispatch` calls, then exactly one `finalize_turn`.
#[derive(Debug)]
pub struct Coordinator {
    normalizer: Normalizer,
    managers: Vec<ManagerEntry>,
    registry: PlaceholderRegistry,
    reasoning: ReasoningSink,
    phase: TurnPhase,
    book: TurnBook,
}

impl Coordinator {
    pub fn new(config: &TurnConfig, surface: Box<dyn RenderSurface>) -> Result<Self, ConfigError> {
        let markers = config.markers()?;
        let mut managers: Vec<ManagerEntry> = [
            Manager::Message(MessageManager::new(markers, config.render_interval)),
            Manager::Tool(ToolManager::new()),
            Manager::Reasoning(ReasoningManager::new()),
        ]
        .into_iter()
        .map(|manager| ManagerEntry {
            manager,
            degraded: false,
        })
        .collect();
        managers.sort_by_key(|entry| entry.manager.priority());
        Ok(Self {
            normalizer: Normalizer::new(),
            managers,
            registry: PlaceholderRegistry::new(surface),
            reasoning: ReasoningSink::default(),
            phase: TurnPhase::Idle,
            book: TurnBook::default(),
        })
    }

    /// Id of the open turn, if any.
    pub fn turn_id(&self) -> Option<Uuid> {
        match self.phase {
            TurnPhase::Active(id) => Some(id),
            _ => None,
        }
    }

    pub fn is_terminated(&self) -> bool {
        self.book.terminated
    }

    pub fn is_degraded(&self, kind: ManagerKind) -> bool {
        self.managers
            .iter()
            .any(|entry| entry.degraded && entry.manager.kind() == kind)
    }

    /// Clears all per-turn state and opens a new turn.
    pub fn begin_turn(&mut self) -> Result<Uuid, LifecycleError> {
        if let TurnPhase::Active(turn_id) = self.phase {
            error!(turn_id = %turn_id, "begin_turn called while a turn is in progress");
            return Err(LifecycleError::TurnInProgress { turn_id });
        }
        self.normalizer.reset();
        for entry in &mut self.managers {
            entry.manager.reset();
            entry.degraded = false;
        }
        self.registry.reset();
        self.reasoning.reset();
        self.book = TurnBook::default();

        let turn_id = Uuid::new_v4();
        self.phase = TurnPhase::Active(turn_id);
        info!(turn_id = %turn_id, "turn started");
        Ok(turn_id)
    }

    /// Normalizes one raw event and routes the result.
    ///
    /// Malformed events are logged, counted and dropped.
    pub fn dispatch(&mut self, raw: &RawEvent) -> Result<Dispatch, LifecycleError> {
        let turn_id = self.active_turn()?;
        if self.book.terminated {
            debug!(turn_id = %turn_id, "dropping raw event after terminal event");
            self.book.dropped += 1;
            return Ok(Dispatch::Terminal);
        }
        let events = match self.normalizer.normalize(raw) {
            Ok(events) => events,
            Err(err) => {
                warn!(turn_id = %turn_id, error = %err, "dropping malformed raw event");
                self.book.dropped += 1;
                return Ok(Dispatch::Continue);
            }
        };
        for event in &events {
            if self.route(turn_id, event) == Dispatch::Terminal {
                return Ok(Dispatch::Terminal);
            }
        }
        Ok(Dispatch::Continue)
    }

    /// Routes an already normalized event.
    pub fn dispatch_normalized(&mut self, event: &NormalizedEvent) -> Result<Dispatch, LifecycleError> {
        let turn_id = self.active_turn()?;
        if self.book.terminated {
            self.book.dropped += 1;
            return Ok(Dispatch::Terminal);
        }
        Ok(self.route(turn_id, event))
    }

    /// Ends the turn as cancelled. In-flight work is aborted; `finalize_turn`
    /// must still be called.
    pub fn cancel(&mut self) -> Result<(), LifecycleError> {
        let turn_id = self.active_turn()?;
        if !self.book.terminated {
            info!(turn_id = %turn_id, "turn cancelled");
            self.fail(turn_id, TurnFailure::Cancelled);
        }
        Ok(())
    }

    /// Records that the event stream ended. Without a prior terminal event
    /// the turn is marked incomplete.
    pub fn close_stream(&mut self) -> Result<(), LifecycleError> {
        let turn_id = self.active_turn()?;
        if !self.book.terminated {
            warn!(turn_id = %turn_id, "event stream closed before completion");
            self.fail(turn_id, TurnFailure::StreamClosed);
        }
        Ok(())
    }

    /// Counts events discarded outside `dispatch` (for example left in a
    /// queue after the turn ended).
    pub fn record_dropped(&mut self, count: u64) {
        self.book.dropped += count;
    }

    /// Flushes and finalizes every manager exactly once and assembles the
    /// turn record. A second call for the same turn is an error and renders
    /// nothing.
    pub fn finalize_turn(&mut self) -> Result<TurnRecord, LifecycleError> {
        let turn_id = match self.phase {
            TurnPhase::Active(turn_id) => turn_id,
            TurnPhase::Idle => {
                error!("finalize_turn called before begin_turn");
                return Err(LifecycleError::NotStarted);
            }
            TurnPhase::Finalized(turn_id) => {
                error!(turn_id = %turn_id, "finalize_turn called twice");
                return Err(LifecycleError::AlreadyFinalized { turn_id });
            }
        };
        self.phase = TurnPhase::Finalized(turn_id);

        for index in 0..self.managers.len() {
            if self.managers[index].degraded {
                continue;
            }
            let mut ctx = TurnContext {
                registry: &mut self.registry,
                reasoning: &mut self.reasoning,
            };
            if let Err(fault) = self.managers[index].manager.flush(&mut ctx) {
                self.degrade(turn_id, index, fault);
            }
            self.charge_reasoning_fault(turn_id);
        }

        let mut visible_text = String::new();
        let mut tool_summaries = Vec::new();
        let mut reasoning_text = String::new();
        for kind in ManagerKind::FINALIZE_ORDER {
            let Some(index) = self.managers.iter().position(|e| e.manager.kind() == kind) else {
                continue;
            };
            let fragment = self.finalize_manager(turn_id, index);
            self.charge_reasoning_fault(turn_id);
            match fragment {
                Fragment::Empty => {}
                Fragment::Reasoning(text) => reasoning_text = text,
                Fragment::Tools(tools) => tool_summaries = tools,
                Fragment::Visible(text) => visible_text = text,
            }
        }

        let book = std::mem::take(&mut self.book);
        let complete = book.completed && book.failure.is_none() && book.faults.is_empty();
        if !complete {
            let reason = book
                .failure
                .as_ref()
                .or(book.faults.first())
                .map(ToString::to_string)
                .unwrap_or_else(|| "turn ended without completion".to_string());
            self.render_status(turn_id, reason, StatusLevel::Error);
        }
        info!(
            turn_id = %turn_id,
            complete,
            tools = tool_summaries.len(),
            dropped = book.dropped,
            "turn finalized"
        );
        Ok(TurnRecord {
            turn_id,
            visible_text,
            tool_summaries,
            reasoning_text,
            complete,
            failure: book.failure,
            faults: book.faults,
            stop_reason: book.stop_reason,
            metrics: book.metrics,
            dropped_events: book.dropped,
        })
    }

    fn active_turn(&self) -> Result<Uuid, LifecycleError> {
        match self.phase {
            TurnPhase::Active(turn_id) => Ok(turn_id),
            TurnPhase::Idle => {
                error!("event dispatched before begin_turn");
                Err(LifecycleError::NotStarted)
            }
            TurnPhase::Finalized(turn_id) => {
                error!(turn_id = %turn_id, "event dispatched after finalize_turn");
                Err(LifecycleError::AlreadyFinalized { turn_id })
            }
        }
    }

    fn route(&mut self, turn_id: Uuid, event: &NormalizedEvent) -> Dispatch {
        match event {
            NormalizedEvent::Completion { stop_reason, metrics } => {
                debug!(turn_id = %turn_id, stop_reason = ?stop_reason, "completion received");
                self.book.completed = true;
                self.book.terminated = true;
                self.book.stop_reason = stop_reason.clone();
                self.book.metrics = metrics.clone();
                return Dispatch::Terminal;
            }
            NormalizedEvent::Lifecycle {
                phase: LifecyclePhase::ForceStop { reason },
            } => {
                warn!(turn_id = %turn_id, reason = %reason, "producer force-stopped the turn");
                self.fail(
                    turn_id,
                    TurnFailure::Producer {
                        message: reason.clone(),
                    },
                );
                return Dispatch::Terminal;
            }
            NormalizedEvent::Lifecycle {
                phase: LifecyclePhase::CycleStart,
            } => {
                self.book.cycles += 1;
                let text = format!("Working (cycle {})", self.book.cycles);
                self.render_status(turn_id, text, StatusLevel::Info);
                return Dispatch::Continue;
            }
            NormalizedEvent::Lifecycle { phase } => {
                trace!(turn_id = %turn_id, phase = ?phase, "lifecycle event");
                return Dispatch::Continue;
            }
            _ => {}
        }

        let Some(index) = self
            .managers
            .iter()
            .position(|entry| !entry.degraded && entry.manager.can_handle(event))
        else {
            trace!(turn_id = %turn_id, kind = event.kind(), "no manager for event");
            return Dispatch::Continue;
        };
        trace!(
            turn_id = %turn_id,
            kind = event.kind(),
            manager = %self.managers[index].manager.kind(),
            "dispatching event"
        );
        let mut ctx = TurnContext {
            registry: &mut self.registry,
            reasoning: &mut self.reasoning,
        };
        if let Err(fault) = self.managers[index].manager.handle(event, &mut ctx) {
            self.degrade(turn_id, index, fault);
        }
        self.charge_reasoning_fault(turn_id);
        Dispatch::Continue
    }

    fn fail(&mut self, turn_id: Uuid, failure: TurnFailure) {
        self.book.terminated = true;
        let reason = failure.to_string();
        self.book.failure.get_or_insert(failure);
        for index in 0..self.managers.len() {
            if self.managers[index].degraded {
                continue;
            }
            let mut ctx = TurnContext {
                registry: &mut self.registry,
                reasoning: &mut self.reasoning,
            };
            if let Err(fault) = self.managers[index].manager.abort(&reason, &mut ctx) {
                self.degrade(turn_id, index, fault);
            }
            self.charge_reasoning_fault(turn_id);
        }
    }

    fn finalize_manager(&mut self, turn_id: Uuid, index: usize) -> Fragment {
        let mut ctx = TurnContext {
            registry: &mut self.registry,
            reasoning: &mut self.reasoning,
        };
        let entry = &mut self.managers[index];
        if entry.degraded {
            return entry.manager.snapshot(&ctx);
        }
        match entry.manager.finalize(&mut ctx) {
            Ok(fragment) => fragment,
            Err(fault) => {
                let fragment = entry.manager.snapshot(&ctx);
                self.degrade(turn_id, index, fault);
                fragment
            }
        }
    }

    /// The reasoning widget is shared, so its render failures are charged to
    /// the reasoning manager no matter which manager fed the sink.
    fn charge_reasoning_fault(&mut self, turn_id: Uuid) {
        let Some(err) = self.reasoning.take_fault() else {
            return;
        };
        let owner = self
            .managers
            .iter()
            .position(|entry| entry.manager.kind() == ManagerKind::Reasoning);
        match owner {
            Some(index) if !self.managers[index].degraded => {
                self.degrade(turn_id, index, ManagerFault::Render(err));
            }
            _ => warn!(turn_id = %turn_id, error = %err, "reasoning widget failed"),
        }
    }

    fn degrade(&mut self, turn_id: Uuid, index: usize, fault: ManagerFault) {
        let entry = &mut self.managers[index];
        entry.degraded = true;
        let manager = entry.manager.kind();
        warn!(turn_id = %turn_id, manager = %manager, error = %fault, "manager fault; degrading");
        let failure = TurnFailure::ManagerFault {
            manager,
            message: fault.to_string(),
        };
        self.render_status(turn_id, failure.to_string(), StatusLevel::Error);
        self.book.faults.push(failure);
    }

    fn render_status(&mut self, turn_id: Uuid, text: String, level: StatusLevel) {
        if let Err(err) = self
            .registry
            .render(&Slot::Status, &RenderContent::Status { text, level })
        {
            warn!(turn_id = %turn_id, error = %err, "status render failed");
        }
    }
}
