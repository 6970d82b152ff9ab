use crate::errors::{ManagerFault, RenderError};
use crate::event::NormalizedEvent;
use crate::render::{PlaceholderRegistry, ReasoningPhase, RenderContent, Slot};

use super::{Fragment, ManagerKind, TurnContext, TurnManager};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReasoningState {
    pub text: String,
    pub widget_created: bool,
    pub phase: ReasoningPhase,
}

impl Default for ReasoningState {
    fn default() -> Self {
        Self {
            text: String::new(),
            widget_created: false,
            phase: ReasoningPhase::Running,
        }
    }
}

/// Single accumulation path for reasoning text.
///
/// Both native reasoning deltas and marker-delimited spans found in answer
/// text land here, so the reasoning widget has exactly one owner. Render
/// failures never reach the caller: the first one is parked for the
/// coordinator, which charges it to the reasoning manager, and later
/// renders are skipped while text keeps accumulating.
#[derive(Debug, Default)]
pub struct ReasoningSink {
    state: ReasoningState,
    broken: bool,
    fault: Option<RenderError>,
}

impl ReasoningSink {
    pub fn state(&self) -> &ReasoningState {
        &self.state
    }

    pub fn text(&self) -> &str {
        &self.state.text
    }

    pub fn is_active(&self) -> bool {
        self.state.widget_created
    }

    /// Whether the reasoning widget rejected an update this turn.
    pub fn is_broken(&self) -> bool {
        self.broken
    }

    /// Takes the parked render failure, if any.
    pub fn take_fault(&mut self) -> Option<RenderError> {
        self.fault.take()
    }

    /// Appends reasoning text, reopening a settled widget. An aborted
    /// widget stays aborted.
    pub fn append(&mut self, text: &str, registry: &mut PlaceholderRegistry) {
        if text.is_empty() {
            return;
        }
        self.state.text.push_str(text);
        self.state.widget_created = true;
        if self.state.phase != ReasoningPhase::Aborted {
            self.state.phase = ReasoningPhase::Running;
        }
        self.render(registry);
    }

    /// Shows the widget for reasoning whose content cannot be decoded.
    pub fn detect(&mut self, registry: &mut PlaceholderRegistry) {
        if self.state.widget_created && self.state.phase != ReasoningPhase::Complete {
            return;
        }
        self.state.widget_created = true;
        self.state.phase = ReasoningPhase::Running;
        self.render(registry);
    }

    /// Closes a running widget once non-reasoning output starts.
    pub fn settle(&mut self, registry: &mut PlaceholderRegistry) {
        self.transition(ReasoningPhase::Complete, registry);
    }

    /// Final transition at turn end. Returns the accumulated text.
    pub fn complete(&mut self, registry: &mut PlaceholderRegistry) -> String {
        self.transition(ReasoningPhase::Complete, registry);
        self.state.text.clone()
    }

    pub fn abort(&mut self, registry: &mut PlaceholderRegistry) {
        self.transition(ReasoningPhase::Aborted, registry);
    }

    pub fn reset(&mut self) {
        self.state = ReasoningState::default();
        self.broken = false;
        self.fault = None;
    }

    fn transition(&mut self, phase: ReasoningPhase, registry: &mut PlaceholderRegistry) {
        if !self.state.widget_created || self.state.phase != ReasoningPhase::Running {
            return;
        }
        self.state.phase = phase;
        self.render(registry);
    }

    fn render(&mut self, registry: &mut PlaceholderRegistry) {
        if self.broken {
            return;
        }
        let content = RenderContent::Reasoning {
            text: self.state.text.clone(),
            phase: self.state.phase,
        };
        if let Err(err) = registry.render(&Slot::Reasoning, &content) {
            tracing::debug!(error = %err, "reasoning widget stopped accepting updates");
            self.broken = true;
            self.fault.get_or_insert(err);
        }
    }
}

/// Projects native reasoning deltas into the shared sink.
#[derive(Debug, Default)]
pub struct ReasoningManager {
    deltas: u64,
}

impl ReasoningManager {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TurnManager for ReasoningManager {
    fn kind(&self) -> ManagerKind {
        ManagerKind::Reasoning
    }

    fn priority(&self) -> u8 {
        10
    }

    fn can_handle(&self, event: &NormalizedEvent) -> bool {
        matches!(event, NormalizedEvent::ReasoningDelta { .. })
    }

    fn handle(&mut self, event: &NormalizedEvent, ctx: &mut TurnContext<'_>) -> Result<(), ManagerFault> {
        let NormalizedEvent::ReasoningDelta { text, heuristic } = event else {
            return Err(ManagerFault::Invariant(format!(
                "reasoning manager cannot handle {}",
                event.kind()
            )));
        };
        self.deltas += 1;
        if *heuristic && text.is_empty() {
            ctx.reasoning.detect(ctx.registry);
        } else {
            ctx.reasoning.append(text, ctx.registry);
        }
        Ok(())
    }

    fn abort(&mut self, _reason: &str, ctx: &mut TurnContext<'_>) -> Result<(), ManagerFault> {
        ctx.reasoning.abort(ctx.registry);
        Ok(())
    }

    fn finalize(&mut self, ctx: &mut TurnContext<'_>) -> Result<Fragment, ManagerFault> {
        if !ctx.reasoning.is_active() {
            return Ok(Fragment::Empty);
        }
        tracing::debug!(deltas = self.deltas, "finalizing reasoning");
        Ok(Fragment::Reasoning(ctx.reasoning.complete(ctx.registry)))
    }

    fn snapshot(&self, ctx: &TurnContext<'_>) -> Fragment {
        if ctx.reasoning.is_active() {
            Fragment::Reasoning(ctx.reasoning.text().to_string())
        } else {
            Fragment::Empty
        }
    }

    fn reset(&mut self) {
        self.deltas = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::managers::test_support::Bench;

    fn phases(h: &Bench) -> Vec<ReasoningPhase> {
        h.log
            .borrow()
            .updates_for(&Slot::Reasoning)
            .into_iter()
            .map(|content| match content {
                RenderContent::Reasoning { phase, .. } => *phase,
                other => panic!("unexpected content {other:?}"),
            })
            .collect()
    }

    #[test]
    fn finalize_without_events_is_empty() {
        let mut h = Bench::new();
        let mut manager = ReasoningManager::new();
        assert_eq!(manager.finalize(&mut h.ctx()).expect("finalize"), Fragment::Empty);
        assert!(h.log.borrow().created.is_empty());
    }

    #[test]
    fn deltas_accumulate_and_finalize_completes_widget() {
        let mut h = Bench::new();
        let mut manager = ReasoningManager::new();
        manager
            .handle(&NormalizedEvent::reasoning("first "), &mut h.ctx())
            .expect("handle");
        manager
            .handle(&NormalizedEvent::reasoning("second"), &mut h.ctx())
            .expect("handle");
        let fragment = manager.finalize(&mut h.ctx()).expect("finalize");
        assert_eq!(fragment, Fragment::Reasoning("first second".into()));
        assert_eq!(
            phases(&h),
            vec![ReasoningPhase::Running, ReasoningPhase::Running, ReasoningPhase::Complete]
        );
        assert_eq!(h.log.borrow().created, vec![Slot::Reasoning]);
    }

    #[test]
    fn heuristic_delta_opens_widget_without_text() {
        let mut h = Bench::new();
        let mut manager = ReasoningManager::new();
        let detected = NormalizedEvent::ReasoningDelta {
            text: String::new(),
            heuristic: true,
        };
        manager.handle(&detected, &mut h.ctx()).expect("handle");
        manager.handle(&detected, &mut h.ctx()).expect("handle");
        assert_eq!(phases(&h), vec![ReasoningPhase::Running]);
        assert_eq!(manager.finalize(&mut h.ctx()).expect("finalize"), Fragment::Reasoning(String::new()));
    }

    #[test]
    fn settle_is_single_and_reopens_on_new_reasoning() {
        let mut h = Bench::new();
        let mut sink = ReasoningSink::default();
        sink.settle(&mut h.registry);
        sink.append("a", &mut h.registry);
        sink.settle(&mut h.registry);
        sink.settle(&mut h.registry);
        sink.append("b", &mut h.registry);
        assert_eq!(sink.complete(&mut h.registry), "ab");
        assert_eq!(
            h.log.borrow().updates_for(&Slot::Reasoning).len(),
            4,
            "running, complete, running, complete"
        );
    }

    #[test]
    fn abort_marks_running_widget_aborted() {
        let mut h = Bench::new();
        let mut manager = ReasoningManager::new();
        manager
            .handle(&NormalizedEvent::reasoning("thinking"), &mut h.ctx())
            .expect("handle");
        manager.abort("cancelled", &mut h.ctx()).expect("abort");
        assert_eq!(
            manager.finalize(&mut h.ctx()).expect("finalize"),
            Fragment::Reasoning("thinking".into())
        );
        assert_eq!(phases(&h), vec![ReasoningPhase::Running, ReasoningPhase::Aborted]);
    }

    #[test]
    fn aborted_widget_stays_aborted_when_late_text_arrives() {
        let mut h = Bench::new();
        let mut sink = ReasoningSink::default();
        sink.append("still thinking", &mut h.registry);
        sink.abort(&mut h.registry);
        sink.append("</thi", &mut h.registry);
        assert_eq!(sink.complete(&mut h.registry), "still thinking</thi");
        assert_eq!(sink.state().phase, ReasoningPhase::Aborted);
        assert_eq!(
            phases(&h),
            vec![ReasoningPhase::Running, ReasoningPhase::Aborted, ReasoningPhase::Aborted]
        );
    }

    #[test]
    fn failed_widget_parks_one_fault_and_keeps_text() {
        let mut h = Bench::new();
        h.log.borrow_mut().failing.insert(Slot::Reasoning);
        let mut sink = ReasoningSink::default();
        sink.append("first ", &mut h.registry);
        sink.settle(&mut h.registry);
        sink.append("second", &mut h.registry);
        assert!(sink.is_broken());
        let fault = sink.take_fault().expect("parked fault");
        assert_eq!(fault.slot, Slot::Reasoning.to_string());
        assert!(sink.take_fault().is_none());
        assert_eq!(sink.complete(&mut h.registry), "first second");
        assert!(sink.take_fault().is_none());

        sink.reset();
        assert!(!sink.is_broken());
    }
}
