//! Reduction of raw callback payloads to [`NormalizedEvent`]s.
//!
//! The agent runtime reports most facts twice: once as a fine-grained
//! protocol envelope (`event`) and once as a pre-aggregated convenience field
//! (`data`, `reasoningText`, `current_tool_use`, `message`). Only the
//! aggregated form is forwarded. The envelope is read for detection only
//! (tool block starts, undecodable reasoning) and its text is never
//! forwarded, so a fact is never applied twice.

use std::collections::{HashMap, HashSet};

use serde_json::{Map, Value};

use crate::errors::MalformedEvent;
use crate::event::{InvocationId, LifecyclePhase, NormalizedEvent, ResultStatus};
use crate::raw::RawEvent;

/// Top-level keys that identify a raw shape. Anything else is a companion
/// field and is ignored.
const PRIMARY_KEYS: &[&str] = &[
    "init_event_loop",
    "start",
    "start_event_loop",
    "complete",
    "force_stop",
    "event",
    "reasoningText",
    "data",
    "current_tool_use",
    "tool_result",
    "message",
    "result",
    "reasoning_signature",
    "redactedContent",
];

/// Envelope members that are known and carry nothing to project.
const SILENT_ENVELOPE_KEYS: &[&str] = &["messageStart", "messageStop", "metadata", "redactContent"];

/// Stateful normalizer for one turn.
///
/// State is limited to what deduplication needs: which tool ids were already
/// announced or resulted, and which content block index maps to which tool.
#[derive(Debug, Default)]
pub struct Normalizer {
    open_blocks: HashMap<u64, InvocationId>,
    started: HashSet<InvocationId>,
    ready: HashMap<InvocationId, Value>,
    resulted: HashSet<InvocationId>,
    last_started: Option<InvocationId>,
}

impl Normalizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forgets everything learned during the previous turn.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Maps one raw event to zero or more normalized events.
    pub fn normalize(&mut self, raw: &RawEvent) -> Result<Vec<NormalizedEvent>, MalformedEvent> {
        let object = raw.as_object().ok_or_else(|| MalformedEvent::NotAnObject {
            found: json_type(raw.value()),
        })?;
        if !PRIMARY_KEYS.iter().any(|key| object.contains_key(*key)) {
            return Err(MalformedEvent::UnknownShape {
                keys: object.keys().cloned().collect(),
            });
        }

        let mut out = Vec::new();
        for (key, phase) in [
            ("init_event_loop", LifecyclePhase::Init),
            ("start", LifecyclePhase::Start),
            ("start_event_loop", LifecyclePhase::CycleStart),
            ("complete", LifecyclePhase::Complete),
        ] {
            if is_set(object, key) {
                out.push(NormalizedEvent::Lifecycle { phase });
            }
        }
        if is_set(object, "force_stop") {
            let reason = object
                .get("force_stop_reason")
                .map(display_value)
                .unwrap_or_else(|| "force stopped".to_string());
            out.push(NormalizedEvent::Lifecycle {
                phase: LifecyclePhase::ForceStop { reason },
            });
        }
        if let Some(envelope) = object.get("event") {
            self.envelope(envelope, &mut out)?;
        }
        if let Some(text) = object.get("reasoningText") {
            let text = expect_str(text, "reasoningText")?;
            if !text.is_empty() {
                out.push(NormalizedEvent::reasoning(text));
            }
        }
        if let Some(text) = object.get("data") {
            let text = expect_str(text, "data")?;
            if !text.is_empty() {
                out.push(NormalizedEvent::text_delta(text));
            }
        }
        if let Some(tool) = object.get("current_tool_use") {
            self.current_tool_use(tool, &mut out)?;
        }
        if let Some(result) = object.get("tool_result") {
            self.tool_result(result, "tool_result", &mut out)?;
        }
        if let Some(message) = object.get("message") {
            self.message(message, &mut out)?;
        }
        if let Some(result) = object.get("result") {
            self.result(result, &mut out)?;
        }
        Ok(out)
    }

    fn envelope(&mut self, envelope: &Value, out: &mut Vec<NormalizedEvent>) -> Result<(), MalformedEvent> {
        let envelope = envelope
            .as_object()
            .ok_or_else(|| MalformedEvent::invalid("event", "expected an object"))?;

        if let Some(start) = envelope.get("contentBlockStart") {
            let tool = start.pointer("/start/toolUse");
            if let Some(id) = tool.and_then(|t| tool_id(t)) {
                let name = tool.and_then(|t| t.get("name")).and_then(Value::as_str).unwrap_or_default();
                if let Some(index) = start.get("contentBlockIndex").and_then(Value::as_u64) {
                    self.open_blocks.insert(index, id.clone());
                }
                self.announce(id, name, out);
            }
        }

        if let Some(delta_block) = envelope.get("contentBlockDelta") {
            let delta = delta_block.get("delta");
            if let Some(fragment) = delta.and_then(|d| d.pointer("/toolUse/input")).and_then(Value::as_str) {
                let id = delta_block
                    .get("contentBlockIndex")
                    .and_then(Value::as_u64)
                    .and_then(|index| self.open_blocks.get(&index))
                    .or(self.last_started.as_ref());
                match id {
                    Some(id) => out.push(NormalizedEvent::ToolInputDelta {
                        id: id.clone(),
                        fragment: fragment.to_string(),
                    }),
                    None => tracing::trace!("tool input fragment without an open tool block"),
                }
            } else if delta
                .and_then(|d| d.pointer("/SDK_UNKNOWN_MEMBER/name"))
                .and_then(Value::as_str)
                == Some("reasoningContent")
            {
                out.push(NormalizedEvent::ReasoningDelta {
                    text: String::new(),
                    heuristic: true,
                });
            } else {
                tracing::trace!("envelope delta superseded by its aggregated form");
            }
        }

        if let Some(index) = envelope
            .get("contentBlockStop")
            .and_then(|stop| stop.get("contentBlockIndex"))
            .and_then(Value::as_u64)
        {
            self.open_blocks.remove(&index);
        }

        for key in envelope.keys() {
            let known = matches!(
                key.as_str(),
                "contentBlockStart" | "contentBlockDelta" | "contentBlockStop"
            ) || SILENT_ENVELOPE_KEYS.contains(&key.as_str());
            if !known {
                tracing::debug!(member = %key, "ignoring unknown envelope member");
            }
        }
        Ok(())
    }

    fn current_tool_use(&mut self, tool: &Value, out: &mut Vec<NormalizedEvent>) -> Result<(), MalformedEvent> {
        if !tool.is_object() {
            return Err(MalformedEvent::invalid("current_tool_use", "expected an object"));
        }
        let Some(id) = tool_id(tool) else {
            tracing::trace!("current_tool_use without an id yet");
            return Ok(());
        };
        let name = tool.get("name").and_then(Value::as_str).unwrap_or_default();
        self.announce(id.clone(), name, out);
        if let Some(input) = tool.get("input").and_then(complete_input) {
            self.ready(id, name, input, out);
        }
        Ok(())
    }

    fn tool_result(&mut self, result: &Value, field: &str, out: &mut Vec<NormalizedEvent>) -> Result<(), MalformedEvent> {
        let object = result
            .as_object()
            .ok_or_else(|| MalformedEvent::invalid(field, "expected an object"))?;
        let id = tool_id(result)
            .or_else(|| self.last_started.clone())
            .ok_or_else(|| MalformedEvent::invalid(field, "missing toolUseId"))?;
        if !self.resulted.insert(id.clone()) {
            tracing::debug!(invocation_id = %id, "dropping repeated tool result");
            return Ok(());
        }
        let status = ResultStatus::parse(object.get("status").and_then(Value::as_str));
        let payload = object
            .get("output")
            .or_else(|| object.get("content"))
            .cloned()
            .unwrap_or_else(|| {
                Value::Object(
                    object
                        .iter()
                        .filter(|(key, _)| !matches!(key.as_str(), "toolUseId" | "tool_use_id" | "status"))
                        .map(|(key, value)| (key.clone(), value.clone()))
                        .collect(),
                )
            });
        out.push(NormalizedEvent::ToolResult {
            id,
            status,
            content: tool_value(&payload),
        });
        Ok(())
    }

    fn message(&mut self, message: &Value, out: &mut Vec<NormalizedEvent>) -> Result<(), MalformedEvent> {
        if let Some(text) = message.as_str() {
            if !text.is_empty() {
                out.push(NormalizedEvent::MessageComplete {
                    role: "assistant".to_string(),
                    content: text.to_string(),
                });
            }
            return Ok(());
        }
        let object = message
            .as_object()
            .ok_or_else(|| MalformedEvent::invalid("message", "expected an object or a string"))?;
        let role = object.get("role").and_then(Value::as_str).unwrap_or("assistant");

        let mut text = String::new();
        match object.get("content") {
            Some(Value::String(content)) => text.push_str(content),
            Some(Value::Array(blocks)) => {
                for block in blocks {
                    if let Some(tool) = block.get("toolUse") {
                        if let Some(id) = tool_id(tool) {
                            let name = tool.get("name").and_then(Value::as_str).unwrap_or_default();
                            if let Some(input) = tool.get("input").and_then(complete_input) {
                                self.started.insert(id.clone());
                                self.ready(id, name, input, out);
                            }
                        }
                    } else if let Some(result) = block.get("toolResult") {
                        self.tool_result(result, "message.content.toolResult", out)?;
                    } else if let Some(fragment) = block.get("text").and_then(Value::as_str) {
                        text.push_str(fragment);
                    }
                }
            }
            Some(Value::Null) | None => {}
            Some(_) => return Err(MalformedEvent::invalid("message.content", "expected a string or an array")),
        }
        if !text.is_empty() {
            out.push(NormalizedEvent::MessageComplete {
                role: role.to_string(),
                content: text,
            });
        }
        Ok(())
    }

    fn result(&mut self, result: &Value, out: &mut Vec<NormalizedEvent>) -> Result<(), MalformedEvent> {
        let Some(object) = result.as_object() else {
            out.push(NormalizedEvent::Completion {
                stop_reason: None,
                metrics: None,
            });
            return Ok(());
        };
        let metrics = object.get("metrics").filter(|m| !m.is_null()).cloned();
        if let Some(tool_metrics) = metrics.as_ref().and_then(|m| m.get("tool_metrics")) {
            let entries: Vec<&Value> = match tool_metrics {
                Value::Object(map) => map.values().collect(),
                Value::Array(items) => items.iter().collect(),
                _ => Vec::new(),
            };
            for tool in entries.into_iter().filter_map(|metric| metric.get("tool")) {
                let Some(id) = tool_id(tool) else { continue };
                let name = tool.get("name").and_then(Value::as_str).unwrap_or_default();
                let input = tool.get("input").or_else(|| tool.get("arguments"));
                if let Some(input) = input.and_then(complete_input) {
                    self.ready(id, name, input, out);
                }
            }
        }
        if let Some(message) = object.get("message").filter(|m| !m.is_null()) {
            self.message(message, out)?;
        }
        out.push(NormalizedEvent::Completion {
            stop_reason: object
                .get("stop_reason")
                .and_then(Value::as_str)
                .map(str::to_string),
            metrics,
        });
        Ok(())
    }

    fn announce(&mut self, id: InvocationId, name: &str, out: &mut Vec<NormalizedEvent>) {
        self.last_started = Some(id.clone());
        if self.started.insert(id.clone()) {
            out.push(NormalizedEvent::ToolStart {
                id,
                name: name.to_string(),
            });
        }
    }

    fn ready(&mut self, id: InvocationId, name: &str, input: Value, out: &mut Vec<NormalizedEvent>) {
        if self.ready.get(&id) == Some(&input) {
            tracing::trace!(invocation_id = %id, "tool input unchanged");
            return;
        }
        self.ready.insert(id.clone(), input.clone());
        out.push(NormalizedEvent::ToolReady {
            id,
            name: name.to_string(),
            input,
        });
    }
}

fn is_set(object: &Map<String, Value>, key: &str) -> bool {
    object.get(key).and_then(Value::as_bool).unwrap_or(false)
}

fn expect_str<'a>(value: &'a Value, field: &str) -> Result<&'a str, MalformedEvent> {
    value
        .as_str()
        .ok_or_else(|| MalformedEvent::invalid(field, format!("expected a string, found {}", json_type(value))))
}

fn tool_id(tool: &Value) -> Option<InvocationId> {
    tool.get("toolUseId")
        .or_else(|| tool.get("tool_use_id"))
        .and_then(Value::as_str)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
}

/// Returns the structured input when it is complete, or `None` while it is
/// still a partial JSON string.
fn complete_input(input: &Value) -> Option<Value> {
    match input {
        Value::Object(_) | Value::Array(_) => Some(input.clone()),
        Value::String(raw) if !raw.trim().is_empty() => serde_json::from_str(raw).ok(),
        _ => None,
    }
}

/// Collapses tool payload content blocks into a display value.
///
/// `[{text}..]` becomes one string, a `{json}` block yields its value and
/// JSON-looking strings are parsed.
pub fn tool_value(value: &Value) -> Value {
    match value {
        Value::Array(blocks) if !blocks.is_empty() => {
            if blocks.iter().all(|b| b.get("text").is_some_and(Value::is_string)) {
                let text: Vec<&str> = blocks.iter().filter_map(|b| b.get("text")?.as_str()).collect();
                return tool_value(&Value::String(text.join("\n")));
            }
            if let [block] = blocks.as_slice()
                && let Some(json) = block.get("json")
            {
                return json.clone();
            }
            Value::Array(
                blocks
                    .iter()
                    .map(|block| match (block.get("text"), block.get("json")) {
                        (Some(text), _) => tool_value(text),
                        (None, Some(json)) => json.clone(),
                        _ => block.clone(),
                    })
                    .collect(),
            )
        }
        Value::String(raw) => {
            let candidate = raw.trim();
            if (candidate.starts_with('{') || candidate.starts_with('['))
                && let Ok(parsed) = serde_json::from_str::<Value>(candidate)
            {
                return parsed;
            }
            value.clone()
        }
        _ => value.clone(),
    }
}

fn display_value(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
