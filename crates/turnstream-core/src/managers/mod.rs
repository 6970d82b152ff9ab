//! Domain managers that project normalized events onto render slots.
//!
//! Each manager owns one slice of turn state. The coordinator hands every
//! call a [`TurnContext`] holding the placeholder registry and the shared
//! reasoning sink, so managers never reach each other directly.

use std::fmt;

use crate::errors::ManagerFault;
use crate::event::NormalizedEvent;
use crate::record::ToolEntry;
use crate::render::PlaceholderRegistry;

pub mod message;
pub mod reasoning;
pub mod tools;

pub use message::MessageManager;
pub use reasoning::{ReasoningManager, ReasoningSink};
pub use tools::ToolManager;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ManagerKind {
    Reasoning,
    Tool,
    Message,
}

impl ManagerKind {
    /// Order in which managers are finalized.
    pub const FINALIZE_ORDER: [ManagerKind; 3] = [Self::Reasoning, Self::Tool, Self::Message];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Reasoning => "reasoning",
            Self::Tool => "tool",
            Self::Message => "message",
        }
    }
}

impl fmt::Display for ManagerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Mutable resources shared by all managers during one call.
pub struct TurnContext<'a> {
    pub registry: &'a mut PlaceholderRegistry,
    pub reasoning: &'a mut ReasoningSink,
}

/// A manager's contribution to the turn record.
#[derive(Clone, Debug, PartialEq)]
pub enum Fragment {
    /// The manager never activated.
    Empty,
    Reasoning(String),
    Tools(Vec<ToolEntry>),
    Visible(String),
}

/// Contract every domain manager implements.
pub trait TurnManager {
    fn kind(&self) -> ManagerKind;

    /// Lower values are asked first.
    fn priority(&self) -> u8;

    fn can_handle(&self, event: &NormalizedEvent) -> bool;

    fn handle(&mut self, event: &NormalizedEvent, ctx: &mut TurnContext<'_>) -> Result<(), ManagerFault>;

    /// Releases buffered state after the last event, before any manager is
    /// finalized.
    fn flush(&mut self, _ctx: &mut TurnContext<'_>) -> Result<(), ManagerFault> {
        Ok(())
    }

    /// Marks in-flight work as interrupted.
    fn abort(&mut self, _reason: &str, _ctx: &mut TurnContext<'_>) -> Result<(), ManagerFault> {
        Ok(())
    }

    /// Produces the final fragment. Called exactly once per turn.
    fn finalize(&mut self, ctx: &mut TurnContext<'_>) -> Result<Fragment, ManagerFault>;

    /// The fragment this manager would contribute right now, without side
    /// effects.
    fn snapshot(&self, ctx: &TurnContext<'_>) -> Fragment;

    /// Clears per-turn state.
    fn reset(&mut self);
}

/// The fixed set of managers a coordinator dispatches to.
#[derive(Debug)]
pub enum Manager {
    Reasoning(ReasoningManager),
    Tool(ToolManager),
    Message(MessageManager),
}

impl Manager {
    fn inner(&self) -> &dyn TurnManager {
        match self {
            Self::Reasoning(m) => m,
            Self::Tool(m) => m,
            Self::Message(m) => m,
        }
    }

    fn inner_mut(&mut self) -> &mut dyn TurnManager {
        match self {
            Self::Reasoning(m) => m,
            Self::Tool(m) => m,
            Self::Message(m) => m,
        }
    }
}

impl TurnManager for Manager {
    fn kind(&self) -> ManagerKind {
        self.inner().kind()
    }

    fn priority(&self) -> u8 {
        self.inner().priority()
    }

    fn can_handle(&self, event: &NormalizedEvent) -> bool {
        self.inner().can_handle(event)
    }

    fn handle(&mut self, event: &NormalizedEvent, ctx: &mut TurnContext<'_>) -> Result<(), ManagerFault> {
        self.inner_mut().handle(event, ctx)
    }

    fn flush(&mut self, ctx: &mut TurnContext<'_>) -> Result<(), ManagerFault> {
        self.inner_mut().flush(ctx)
    }

    fn abort(&mut self, reason: &str, ctx: &mut TurnContext<'_>) -> Result<(), ManagerFault> {
        self.inner_mut().abort(reason, ctx)
    }

    fn finalize(&mut self, ctx: &mut TurnContext<'_>) -> Result<Fragment, ManagerFault> {
        self.inner_mut().finalize(ctx)
    }

    fn snapshot(&self, ctx: &TurnContext<'_>) -> Fragment {
        self.inner().snapshot(ctx)
    }

    fn reset(&mut self) {
        self.inner_mut().reset()
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::cell::RefCell;
    use std::rc::Rc;

    use crate::render::PlaceholderRegistry;
    use crate::render::testing::{RecordingSurface, RenderLog};

    use super::{ReasoningSink, TurnContext};

    /// Registry, sink and render log wired together for manager tests.
    pub(crate) struct Bench {
        pub registry: PlaceholderRegistry,
        pub sink: ReasoningSink,
        pub log: Rc<RefCell<RenderLog>>,
    }

    impl Bench {
        pub fn new() -> Self {
            let (surface, log) = RecordingSurface::new();
            Self {
                registry: PlaceholderRegistry::new(Box::new(surface)),
                sink: ReasoningSink::default(),
                log,
            }
        }

        pub fn ctx(&mut self) -> TurnContext<'_> {
            TurnContext {
                registry: &mut self.registry,
                reasoning: &mut self.sink,
            }
        }
    }
}
