use std::time::{Duration, Instant};

use crate::errors::ManagerFault;
use crate::event::NormalizedEvent;
use crate::render::{RenderContent, Slot};
use crate::splitter::{Markers, Segment, TagSplitter};

use super::{Fragment, ManagerKind, TurnContext, TurnManager};

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MessageState {
    /// Visible text received so far, untrimmed.
    pub visible: String,
    /// Whether any text delta arrived this turn.
    pub streamed: bool,
    /// Last complete assistant message, used when nothing was streamed.
    pub fallback: Option<String>,
    /// Whether the response slot was ever rendered.
    pub rendered: bool,
    pub complete: bool,
}

/// Coalesces streaming re-renders to at most one per interval.
#[derive(Clone, Debug)]
struct RenderThrottle {
    interval: Duration,
    last: Option<Instant>,
}

impl RenderThrottle {
    fn new(interval: Duration) -> Self {
        Self { interval, last: None }
    }

    fn ready(&mut self, now: Instant) -> bool {
        let due = match self.last {
            None => true,
            Some(last) => now.duration_since(last) >= self.interval,
        };
        if due {
            self.last = Some(now);
        }
        due
    }

    fn reset(&mut self) {
        self.last = None;
    }
}

/// Streams answer text into the response slot, diverting marker-delimited
/// reasoning spans to the shared reasoning sink.
#[derive(Debug)]
pub struct MessageManager {
    splitter: TagSplitter,
    state: MessageState,
    throttle: RenderThrottle,
}

impl MessageManager {
    pub fn new(markers: Markers, render_interval: Duration) -> Self {
        Self {
            splitter: TagSplitter::new(markers),
            state: MessageState::default(),
            throttle: RenderThrottle::new(render_interval),
        }
    }

    pub fn state(&self) -> &MessageState {
        &self.state
    }

    fn apply(&mut self, segments: Vec<Segment>, ctx: &mut TurnContext<'_>) {
        for segment in segments {
            match segment {
                Segment::Visible(text) => {
                    ctx.reasoning.settle(ctx.registry);
                    self.state.visible.push_str(&text);
                }
                Segment::Reasoning(text) => ctx.reasoning.append(&text, ctx.registry),
            }
        }
    }

    fn render_streaming(&mut self, ctx: &mut TurnContext<'_>) -> Result<(), ManagerFault> {
        if self.state.visible.is_empty() || !self.throttle.ready(Instant::now()) {
            return Ok(());
        }
        self.state.rendered = true;
        ctx.registry.render(
            &Slot::Response,
            &RenderContent::Text {
                text: self.state.visible.clone(),
                streaming: true,
            },
        )?;
        Ok(())
    }

    fn final_text(&self) -> String {
        self.state.visible.trim().to_string()
    }
}

impl TurnManager for MessageManager {
    fn kind(&self) -> ManagerKind {
        ManagerKind::Message
    }

    fn priority(&self) -> u8 {
        30
    }

    fn can_handle(&self, event: &NormalizedEvent) -> bool {
        matches!(
            event,
            NormalizedEvent::TextDelta { .. } | NormalizedEvent::MessageComplete { .. }
        )
    }

    fn handle(&mut self, event: &NormalizedEvent, ctx: &mut TurnContext<'_>) -> Result<(), ManagerFault> {
        match event {
            NormalizedEvent::TextDelta { text } => {
                self.state.streamed = true;
                let segments = self.splitter.push(text);
                self.apply(segments, ctx);
                self.render_streaming(ctx)
            }
            NormalizedEvent::MessageComplete { role, content } => {
                if role == "assistant" {
                    self.state.fallback = Some(content.clone());
                }
                Ok(())
            }
            other => Err(ManagerFault::Invariant(format!(
                "message manager cannot handle {}",
                other.kind()
            ))),
        }
    }

    fn flush(&mut self, ctx: &mut TurnContext<'_>) -> Result<(), ManagerFault> {
        let tail: Vec<Segment> = self.splitter.finish().into_iter().collect();
        self.apply(tail, ctx);
        if !self.state.streamed
            && let Some(message) = self.state.fallback.take()
        {
            tracing::debug!("no streamed text; using the complete assistant message");
            let mut splitter = TagSplitter::new(self.splitter.markers().clone());
            let mut segments = splitter.push(&message);
            segments.extend(splitter.finish());
            self.apply(segments, ctx);
        }
        Ok(())
    }

    fn finalize(&mut self, ctx: &mut TurnContext<'_>) -> Result<Fragment, ManagerFault> {
        self.state.complete = true;
        if !self.state.rendered && self.state.visible.is_empty() {
            return Ok(Fragment::Empty);
        }
        let text = self.final_text();
        self.state.rendered = true;
        ctx.registry.render(
            &Slot::Response,
            &RenderContent::Text {
                text: text.clone(),
                streaming: false,
            },
        )?;
        Ok(Fragment::Visible(text))
    }

    fn snapshot(&self, _ctx: &TurnContext<'_>) -> Fragment {
        if self.state.visible.is_empty() {
            Fragment::Empty
        } else {
            Fragment::Visible(self.final_text())
        }
    }

    fn reset(&mut self) {
        self.splitter.reset();
        self.state = MessageState::default();
        self.throttle.reset();
    }
}
