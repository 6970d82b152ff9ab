//! Incremental splitter that separates visible answer text from
//! marker-delimited reasoning spans.
//!
//! Markers may be cut at any point across incoming fragments. After every
//! [`TagSplitter::push`] the splitter retains only the longest suffix of its
//! pending text that could still grow into the marker it is waiting for, so at
//! most `marker.len() - 1` bytes are ever held back. Everything else is
//! emitted immediately.
//!
//! ```
//! use turnstream_core::splitter::{Markers, Segment, TagSplitter};
//!
//! let mut splitter = TagSplitter::new(Markers::thinking());
//! let mut out = splitter.push("<thi");
//! out.extend(splitter.push("nking>hidden</thinking>shown"));
//! out.extend(splitter.finish());
//! assert_eq!(
//!     out,
//!     vec![
//!         Segment::Reasoning("hidden".into()),
//!         Segment::Visible("shown".into()),
//!     ]
//! );
//! ```

use crate::errors::ConfigError;

/// Validated opening/closing marker pair.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Markers {
    open: String,
    close: String,
}

impl Markers {
    /// Validates and creates a marker pair. Both markers must be non-empty
    /// and distinct.
    pub fn new(open: impl Into<String>, close: impl Into<String>) -> Result<Self, ConfigError> {
        let open = open.into();
        let close = close.into();
        if open.is_empty() {
            return Err(ConfigError::EmptyMarker { which: "opening" });
        }
        if close.is_empty() {
            return Err(ConfigError::EmptyMarker { which: "closing" });
        }
        if open == close {
            return Err(ConfigError::IdenticalMarkers { marker: open });
        }
        Ok(Self { open, close })
    }

    /// The `<thinking>` / `</thinking>` pair emitted by most reasoning models.
    pub fn thinking() -> Self {
        Self {
            open: "<thinking>".to_string(),
            close: "</thinking>".to_string(),
        }
    }

    pub fn open(&self) -> &str {
        &self.open
    }

    pub fn close(&self) -> &str {
        &self.close
    }
}

impl Default for Markers {
    fn default() -> Self {
        Self::thinking()
    }
}

/// One classified piece of output.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Segment {
    /// Answer text meant for the response slot.
    Visible(String),
    /// Text found between an opening and a closing marker.
    Reasoning(String),
}

impl Segment {
    pub fn text(&self) -> &str {
        match self {
            Self::Visible(text) | Self::Reasoning(text) => text,
        }
    }

    pub fn is_visible(&self) -> bool {
        matches!(self, Self::Visible(_))
    }
}

/// Which marker the splitter is currently looking for.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SplitState {
    /// Outside any span; looking for the opening marker.
    Outside,
    /// Inside a span; looking for the closing marker.
    Inside,
}

impl SplitState {
    fn flipped(self) -> Self {
        match self {
            Self::Outside => Self::Inside,
            Self::Inside => Self::Outside,
        }
    }
}

/// Bounded-lookback state machine over a fragment stream.
#[derive(Clone, Debug)]
pub struct TagSplitter {
    markers: Markers,
    state: SplitState,
    pending: String,
}

impl TagSplitter {
    pub fn new(markers: Markers) -> Self {
        Self {
            markers,
            state: SplitState::Outside,
            pending: String::new(),
        }
    }

    pub fn state(&self) -> SplitState {
        self.state
    }

    /// Text held back because it may be the start of a marker.
    pub fn pending(&self) -> &str {
        &self.pending
    }

    pub fn markers(&self) -> &Markers {
        &self.markers
    }

    /// Feeds one fragment and returns every segment that can be classified
    /// now. Adjacent segments of the same kind are merged and empty ones are
    /// never returned.
    pub fn push(&mut self, fragment: &str) -> Vec<Segment> {
        self.pending.push_str(fragment);
        let mut out = Vec::new();
        loop {
            let marker = match self.state {
                SplitState::Outside => self.markers.open.as_str(),
                SplitState::Inside => self.markers.close.as_str(),
            };
            if let Some(idx) = self.pending.find(marker) {
                let rest = self.pending.split_off(idx + marker.len());
                self.pending.truncate(idx);
                let head = std::mem::replace(&mut self.pending, rest);
                push_segment(&mut out, self.state, head);
                self.state = self.state.flipped();
                continue;
            }

            let held = partial_marker_suffix(&self.pending, marker);
            let held_back = self.pending.split_off(self.pending.len() - held);
            let ready = std::mem::replace(&mut self.pending, held_back);
            push_segment(&mut out, self.state, ready);
            return out;
        }
    }

    /// Releases whatever is still held back, classified by the current
    /// state. A partial marker at end of stream is plain content, never a
    /// completed tag.
    pub fn finish(&mut self) -> Option<Segment> {
        let rest = std::mem::take(&mut self.pending);
        let mut out = Vec::with_capacity(1);
        push_segment(&mut out, self.state, rest);
        out.pop()
    }

    /// Returns the splitter to its initial state without emitting anything.
    pub fn reset(&mut self) {
        self.state = SplitState::Outside;
        self.pending.clear();
    }
}

fn push_segment(out: &mut Vec<Segment>, state: SplitState, text: String) {
    if text.is_empty() {
        return;
    }
    match (out.last_mut(), state) {
        (Some(Segment::Visible(last)), SplitState::Outside)
        | (Some(Segment::Reasoning(last)), SplitState::Inside) => last.push_str(&text),
        (_, SplitState::Outside) => out.push(Segment::Visible(text)),
        (_, SplitState::Inside) => out.push(Segment::Reasoning(text)),
    }
}

/// Length in bytes of the longest suffix of `text` that is a proper prefix of
/// `marker`.
fn partial_marker_suffix(text: &str, marker: &str) -> usize {
    let longest = marker.len().saturating_sub(1).min(text.len());
    (1..=longest)
        .rev()
        .find(|&len| {
            let start = text.len() - len;
            text.is_char_boundary(start) && marker.starts_with(&text[start..])
        })
        .unwrap_or(0)
}
