use std::collections::HashMap;

use serde_json::Value;

use crate::errors::ManagerFault;
use crate::event::{InvocationId, NormalizedEvent, ResultStatus};
use crate::record::{ToolEntry, ToolStatus};
use crate::render::{PlaceholderRegistry, RenderContent, Slot};

use super::{Fragment, ManagerKind, TurnContext, TurnManager};

/// Name given to results whose invocation was never announced.
const UNKNOWN_TOOL: &str = "unknown";

/// Tracks tool invocations from announcement to result.
///
/// Entries are never removed during a turn; they move from `active` to
/// `completed`. Every change renders immediately.
#[derive(Debug, Default)]
pub struct ToolManager {
    order: Vec<InvocationId>,
    active: HashMap<InvocationId, ToolEntry>,
    completed: HashMap<InvocationId, ToolEntry>,
}

impl ToolManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entry(&self, id: &str) -> Option<&ToolEntry> {
        self.active.get(id).or_else(|| self.completed.get(id))
    }

    fn entry_mut(&mut self, id: &str) -> Option<&mut ToolEntry> {
        match self.active.get_mut(id) {
            Some(entry) => Some(entry),
            None => self.completed.get_mut(id),
        }
    }

    fn insert_active(&mut self, entry: ToolEntry) -> &ToolEntry {
        let id = entry.id.clone();
        self.order.push(id.clone());
        self.active.entry(id).or_insert(entry)
    }

    fn summaries(&self) -> Vec<ToolEntry> {
        self.order
            .iter()
            .filter_map(|id| self.entry(id))
            .cloned()
            .collect()
    }

    fn start(&mut self, id: &str, name: &str, registry: &mut PlaceholderRegistry) -> Result<(), ManagerFault> {
        if self.entry(id).is_some() {
            return Ok(());
        }
        let entry = self.insert_active(ToolEntry::new(id, name));
        render(entry, registry)
    }

    fn ready(&mut self, id: &str, name: &str, input: &Value, registry: &mut PlaceholderRegistry) -> Result<(), ManagerFault> {
        let Some(entry) = self.entry_mut(id) else {
            let entry = self.insert_active(ToolEntry {
                input: Some(input.clone()),
                status: ToolStatus::Running,
                ..ToolEntry::new(id, name)
            });
            return render(entry, registry);
        };
        if entry.input.as_ref() == Some(input) {
            tracing::debug!(invocation_id = %id, "tool input re-delivered unchanged");
            return Ok(());
        }
        entry.input = Some(input.clone());
        if entry.name.is_empty() {
            entry.name = name.to_string();
        }
        if entry.status == ToolStatus::Preparing {
            entry.status = ToolStatus::Running;
        }
        render(entry, registry)
    }

    fn result(
        &mut self,
        id: &str,
        status: ResultStatus,
        content: &Value,
        registry: &mut PlaceholderRegistry,
    ) -> Result<(), ManagerFault> {
        if self.completed.contains_key(id) {
            tracing::debug!(invocation_id = %id, "ignoring result for completed tool");
            return Ok(());
        }
        let mut entry = match self.active.remove(id) {
            Some(entry) => entry,
            None => {
                tracing::warn!(invocation_id = %id, "result for a tool that was never announced");
                self.order.push(id.to_string());
                ToolEntry::new(id, UNKNOWN_TOOL)
            }
        };
        entry.result = Some(content.clone());
        match status {
            ResultStatus::Success => entry.status = ToolStatus::Complete,
            ResultStatus::Error => {
                entry.status = ToolStatus::Failed;
                entry.error = Some(match content {
                    Value::String(text) => text.clone(),
                    other => other.to_string(),
                });
            }
        }
        let entry = self.completed.entry(id.to_string()).or_insert(entry);
        render(entry, registry)
    }
}

fn render(entry: &ToolEntry, registry: &mut PlaceholderRegistry) -> Result<(), ManagerFault> {
    registry.render(&Slot::Tool(entry.id.clone()), &RenderContent::Tool(entry.clone()))?;
    Ok(())
}

impl TurnManager for ToolManager {
    fn kind(&self) -> ManagerKind {
        ManagerKind::Tool
    }

    fn priority(&self) -> u8 {
        20
    }

    fn can_handle(&self, event: &NormalizedEvent) -> bool {
        matches!(
            event,
            NormalizedEvent::ToolStart { .. }
                | NormalizedEvent::ToolReady { .. }
                | NormalizedEvent::ToolResult { .. }
        )
    }

    fn handle(&mut self, event: &NormalizedEvent, ctx: &mut TurnContext<'_>) -> Result<(), ManagerFault> {
        ctx.reasoning.settle(ctx.registry);
        match event {
            NormalizedEvent::ToolStart { id, name } => self.start(id, name, ctx.registry),
            NormalizedEvent::ToolReady { id, name, input } => self.ready(id, name, input, ctx.registry),
            NormalizedEvent::ToolResult { id, status, content } => {
                self.result(id, *status, content, ctx.registry)
            }
            other => Err(ManagerFault::Invariant(format!(
                "tool manager cannot handle {}",
                other.kind()
            ))),
        }
    }

    fn abort(&mut self, reason: &str, ctx: &mut TurnContext<'_>) -> Result<(), ManagerFault> {
        let pending: Vec<InvocationId> = self
            .order
            .iter()
            .filter(|id| self.active.contains_key(id.as_str()))
            .cloned()
            .collect();
        let mut first_error = None;
        for id in pending {
            let Some(mut entry) = self.active.remove(&id) else { continue };
            entry.status = ToolStatus::Failed;
            entry.error = Some(reason.to_string());
            let entry = self.completed.entry(id).or_insert(entry);
            if let Err(err) = render(entry, ctx.registry) {
                first_error.get_or_insert(err);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    fn finalize(&mut self, _ctx: &mut TurnContext<'_>) -> Result<Fragment, ManagerFault> {
        if self.order.is_empty() {
            return Ok(Fragment::Empty);
        }
        if !self.active.is_empty() {
            tracing::debug!(pending = self.active.len(), "finalizing with tools still running");
        }
        Ok(Fragment::Tools(self.summaries()))
    }

    fn snapshot(&self, _ctx: &TurnContext<'_>) -> Fragment {
        if self.order.is_empty() {
            Fragment::Empty
        } else {
            Fragment::Tools(self.summaries())
        }
    }

    fn reset(&mut self) {
        self.order.clear();
        self.active.clear();
        self.completed.clear();
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;
    use crate::managers::test_support::Bench;
    use crate::render::ReasoningPhase;

    fn start(id: &str) -> NormalizedEvent {
        NormalizedEvent::ToolStart {
            id: id.into(),
            name: "calculator".into(),
        }
    }

    fn ready(id: &str, input: Value) -> NormalizedEvent {
        NormalizedEvent::ToolReady {
            id: id.into(),
            name: "calculator".into(),
            input,
        }
    }

    fn result(id: &str, status: ResultStatus, content: Value) -> NormalizedEvent {
        NormalizedEvent::ToolResult {
            id: id.into(),
            status,
            content,
        }
    }

    fn statuses(h: &Bench, id: &str) -> Vec<ToolStatus> {
        h.log
            .borrow()
            .updates_for(&Slot::Tool(id.into()))
            .into_iter()
            .map(|content| match content {
                RenderContent::Tool(entry) => entry.status,
                other => panic!("unexpected content {other:?}"),
            })
            .collect()
    }

    #[test]
    fn start_ready_result_completes_entry() {
        let mut h = Bench::new();
        let mut manager = ToolManager::new();
        for event in [
            start("T1"),
            ready("T1", json!({"expr": "2+2"})),
            result("T1", ResultStatus::Success, json!("4")),
        ] {
            manager.handle(&event, &mut h.ctx()).expect("handle");
        }
        assert_eq!(
            statuses(&h, "T1"),
            vec![ToolStatus::Preparing, ToolStatus::Running, ToolStatus::Complete]
        );
        let Fragment::Tools(tools) = manager.finalize(&mut h.ctx()).expect("finalize") else {
            panic!("expected tool summaries");
        };
        assert_eq!(
            tools,
            vec![ToolEntry {
                input: Some(json!({"expr": "2+2"})),
                status: ToolStatus::Complete,
                result: Some(json!("4")),
                ..ToolEntry::new("T1", "calculator")
            }]
        );
    }

    #[test]
    fn duplicate_ready_with_identical_input_renders_once() {
        let mut h = Bench::new();
        let mut manager = ToolManager::new();
        let event = ready("T1", json!({"expr": "2+2"}));
        manager.handle(&event, &mut h.ctx()).expect("handle");
        manager.handle(&event, &mut h.ctx()).expect("handle");
        assert_eq!(statuses(&h, "T1"), vec![ToolStatus::Running]);
    }

    #[test]
    fn changed_input_re_renders_and_back_fill_keeps_terminal_status() {
        let mut h = Bench::new();
        let mut manager = ToolManager::new();
        manager.handle(&start("T1"), &mut h.ctx()).expect("handle");
        manager
            .handle(&result("T1", ResultStatus::Success, json!("4")), &mut h.ctx())
            .expect("handle");
        manager
            .handle(&ready("T1", json!({"expr": "2+2"})), &mut h.ctx())
            .expect("handle");
        let entry = manager.entry("T1").expect("entry");
        assert_eq!(entry.status, ToolStatus::Complete);
        assert_eq!(entry.input, Some(json!({"expr": "2+2"})));
    }

    #[test]
    fn error_result_fails_entry() {
        let mut h = Bench::new();
        let mut manager = ToolManager::new();
        manager.handle(&start("T1"), &mut h.ctx()).expect("handle");
        manager
            .handle(&result("T1", ResultStatus::Error, json!("division by zero")), &mut h.ctx())
            .expect("handle");
        let entry = manager.entry("T1").expect("entry");
        assert_eq!(entry.status, ToolStatus::Failed);
        assert_eq!(entry.error.as_deref(), Some("division by zero"));
    }

    #[test]
    fn result_for_unknown_id_is_kept() {
        let mut h = Bench::new();
        let mut manager = ToolManager::new();
        manager
            .handle(&result("T7", ResultStatus::Success, json!({"ok": true})), &mut h.ctx())
            .expect("handle");
        let entry = manager.entry("T7").expect("entry");
        assert_eq!(entry.name, "unknown");
        assert_eq!(entry.status, ToolStatus::Complete);
    }

    #[test]
    fn abort_fails_only_pending_entries() {
        let mut h = Bench::new();
        let mut manager = ToolManager::new();
        for event in [
            start("T1"),
            result("T1", ResultStatus::Success, json!("done")),
            start("T2"),
        ] {
            manager.handle(&event, &mut h.ctx()).expect("handle");
        }
        manager.abort("turn cancelled", &mut h.ctx()).expect("abort");
        assert_eq!(manager.entry("T1").expect("T1").status, ToolStatus::Complete);
        let t2 = manager.entry("T2").expect("T2");
        assert_eq!(t2.status, ToolStatus::Failed);
        assert_eq!(t2.error.as_deref(), Some("turn cancelled"));
        assert_eq!(statuses(&h, "T1").len(), 2);
    }

    #[test]
    fn summaries_follow_creation_order() {
        let mut h = Bench::new();
        let mut manager = ToolManager::new();
        for event in [start("b"), start("a"), result("a", ResultStatus::Success, json!(1))] {
            manager.handle(&event, &mut h.ctx()).expect("handle");
        }
        let Fragment::Tools(tools) = manager.snapshot(&h.ctx()) else {
            panic!("expected tools");
        };
        assert_eq!(tools.iter().map(|t| t.id.as_str()).collect::<Vec<_>>(), vec!["b", "a"]);
    }

    #[test]
    fn tool_activity_settles_running_reasoning() {
        let mut h = Bench::new();
        h.sink.append("hmm", &mut h.registry);
        let mut manager = ToolManager::new();
        manager.handle(&start("T1"), &mut h.ctx()).expect("handle");
        assert_eq!(h.sink.state().phase, ReasoningPhase::Complete);
    }

    #[test]
    fn finalize_without_events_is_empty() {
        let mut h = Bench::new();
        let mut manager = ToolManager::new();
        assert_eq!(manager.finalize(&mut h.ctx()).expect("finalize"), Fragment::Empty);
    }
}
