//! Render-target abstraction and the per-turn placeholder registry.
//!
//! The render layer is a single-threaded resource. Targets are handed out as
//! `Rc<dyn RenderTarget>`, which keeps them out of any `Send` context, so only
//! the consumer that owns the [`PlaceholderRegistry`] can touch them.

use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

use crate::errors::RenderError;
use crate::event::InvocationId;
use crate::record::ToolEntry;

/// Logical placeholder position, ordered top to bottom.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Slot {
    Status,
    /// One placeholder per tool invocation.
    Tool(InvocationId),
    Reasoning,
    Response,
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Status => f.write_str("status"),
            Self::Tool(id) => write!(f, "tool:{id}"),
            Self::Reasoning => f.write_str("reasoning"),
            Self::Response => f.write_str("response"),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StatusLevel {
    Info,
    Error,
}

/// Visual state of the reasoning widget.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReasoningPhase {
    Running,
    Complete,
    Aborted,
}

/// Full content of one slot. Every update replaces the previous content.
#[derive(Clone, Debug, PartialEq)]
pub enum RenderContent {
    Status { text: String, level: StatusLevel },
    /// Response text; `streaming` is false for the final render.
    Text { text: String, streaming: bool },
    Tool(ToolEntry),
    Reasoning { text: String, phase: ReasoningPhase },
}

impl fmt::Display for RenderContent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Status { text, level } => match level {
                StatusLevel::Info => write!(f, "{text}"),
                StatusLevel::Error => write!(f, "error: {text}"),
            },
            Self::Text { text, streaming } => {
                write!(f, "{text}")?;
                if *streaming {
                    f.write_str("▌")?;
                }
                Ok(())
            }
            Self::Tool(entry) => {
                write!(f, "{} [{:?}]", entry.name, entry.status)?;
                if let Some(input) = &entry.input {
                    write!(f, " input={input}")?;
                }
                if let Some(result) = &entry.result {
                    write!(f, " result={result}")?;
                }
                if let Some(error) = &entry.error {
                    write!(f, " error={error}")?;
                }
                Ok(())
            }
            Self::Reasoning { text, phase } => write!(f, "({phase:?}) {text}"),
        }
    }
}

/// A created placeholder on the render surface.
pub trait RenderTarget {
    fn update(&self, content: &RenderContent) -> Result<(), RenderError>;
}

/// Factory for render targets, implemented by the UI layer.
pub trait RenderSurface {
    fn create(&mut self, slot: &Slot) -> Result<Rc<dyn RenderTarget>, RenderError>;
}

/// Surface whose targets discard every update.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullSurface;

struct NullTarget;

impl RenderTarget for NullTarget {
    fn update(&self, _content: &RenderContent) -> Result<(), RenderError> {
        Ok(())
    }
}

impl RenderSurface for NullSurface {
    fn create(&mut self, _slot: &Slot) -> Result<Rc<dyn RenderTarget>, RenderError> {
        Ok(Rc::new(NullTarget))
    }
}

/// Creates each slot at most once per turn and routes updates to it.
pub struct PlaceholderRegistry {
    surface: Box<dyn RenderSurface>,
    slots: BTreeMap<Slot, Rc<dyn RenderTarget>>,
}

impl PlaceholderRegistry {
    pub fn new(surface: Box<dyn RenderSurface>) -> Self {
        Self {
            surface,
            slots: BTreeMap::new(),
        }
    }

    /// Returns the target for `slot`, creating it on first use.
    pub fn get_or_create(&mut self, slot: &Slot) -> Result<Rc<dyn RenderTarget>, RenderError> {
        if let Some(target) = self.slots.get(slot) {
            return Ok(Rc::clone(target));
        }
        let target = self.surface.create(slot)?;
        tracing::trace!(slot = %slot, "created placeholder");
        self.slots.insert(slot.clone(), Rc::clone(&target));
        Ok(target)
    }

    /// Replaces the content of `slot`, creating it if needed.
    pub fn render(&mut self, slot: &Slot, content: &RenderContent) -> Result<(), RenderError> {
        self.get_or_create(slot)?.update(content)
    }

    pub fn contains(&self, slot: &Slot) -> bool {
        self.slots.contains_key(slot)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Forgets all slots. Only called between turns.
    pub fn reset(&mut self) {
        self.slots.clear();
    }
}

impl fmt::Debug for PlaceholderRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlaceholderRegistry")
            .field("slots", &self.slots.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::cell::RefCell;
    use std::collections::HashSet;

    use super::*;

    #[derive(Debug, Default)]
    pub(crate) struct RenderLog {
        pub created: Vec<Slot>,
        pub updates: Vec<(Slot, RenderContent)>,
        pub failing: HashSet<Slot>,
    }

    impl RenderLog {
        pub fn updates_for(&self, slot: &Slot) -> Vec<&RenderContent> {
            self.updates
                .iter()
                .filter(|(s, _)| s == slot)
                .map(|(_, content)| content)
                .collect()
        }

        pub fn last(&self, slot: &Slot) -> Option<&RenderContent> {
            self.updates_for(slot).last().copied()
        }
    }

    /// Surface that records every creation and update for assertions.
    #[derive(Clone, Default)]
    pub(crate) struct RecordingSurface {
        log: Rc<RefCell<RenderLog>>,
    }

    impl RecordingSurface {
        pub fn new() -> (Self, Rc<RefCell<RenderLog>>) {
            let surface = Self::default();
            let log = Rc::clone(&surface.log);
            (surface, log)
        }
    }

    struct RecordingTarget {
        slot: Slot,
        log: Rc<RefCell<RenderLog>>,
    }

    impl RenderTarget for RecordingTarget {
        fn update(&self, content: &RenderContent) -> Result<(), RenderError> {
            let mut log = self.log.borrow_mut();
            if log.failing.contains(&self.slot) {
                return Err(RenderError::new(&self.slot, "injected failure"));
            }
            log.updates.push((self.slot.clone(), content.clone()));
            Ok(())
        }
    }

    impl RenderSurface for RecordingSurface {
        fn create(&mut self, slot: &Slot) -> Result<Rc<dyn RenderTarget>, RenderError> {
            self.log.borrow_mut().created.push(slot.clone());
            Ok(Rc::new(RecordingTarget {
                slot: slot.clone(),
                log: Rc::clone(&self.log),
            }))
        }
    }
}
