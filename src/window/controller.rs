//! Window bound arithmetic: where the active window is, what should be materialized.
//!
//! The controller is pure bookkeeping. It never touches the ring or the
//! loader; it reports which ranges left the content window (to be evicted
//! first) and which ranges entered it (to be filled).

#![allow(missing_docs)]

use std::ops::Range;

use crate::core::errors::{CacheError, Result};
use crate::loader::task::{WindowBounds, intersect};

/// Ranges affected by replacing the content window.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WindowShift {
    /// Indices that left the content window. Evict before anything else.
    pub evicted: Vec<Range<usize>>,
    /// Indices that entered the content window; one fill task each.
    pub fill: Vec<Range<usize>>,
}

impl WindowShift {
    fn between(old: &Range<usize>, new: &Range<usize>) -> Self {
        let mut shift = Self::default();
        if intersect(old, new).is_empty() {
            if !old.is_empty() {
                shift.evicted.push(old.clone());
            }
            if !new.is_empty() {
                shift.fill.push(new.clone());
            }
            return shift;
        }
        if old.start < new.start {
            shift.evicted.push(old.start..new.start);
        }
        if new.end < old.end {
            shift.evicted.push(new.end..old.end);
        }
        if new.start < old.start {
            shift.fill.push(new.start..old.start);
        }
        if old.end < new.end {
            shift.fill.push(old.end..new.end);
        }
        shift
    }
}

/// Outcome of a bound change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WindowUpdate {
    /// Same bounds as before; nothing to do.
    Unchanged,
    /// The active window moved inside the existing content window.
    ActiveMoved,
    /// The content window was replaced.
    ContentReplaced(WindowShift),
}

/// Owner of the active and content window bounds.
#[derive(Debug, Clone)]
pub struct WindowController {
    capacity: usize,
    slack: usize,
    size: usize,
    active: Range<usize>,
    content: Range<usize>,
}

impl WindowController {
    pub fn new(capacity: usize, slack: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            slack,
            size: 0,
            active: 0..0,
            content: 0..0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn active(&self) -> Range<usize> {
        self.active.clone()
    }

    pub fn content(&self) -> Range<usize> {
        self.content.clone()
    }

    pub fn bounds(&self) -> WindowBounds {
        WindowBounds {
            active_start: self.active.start,
            active_end: self.active.end,
            content_start: self.content.start,
            content_end: self.content.end,
        }
    }

    /// Move the active window to `[start, end)`.
    pub fn set_active_window(&mut self, start: usize, end: usize) -> Result<WindowUpdate> {
        if start > end {
            return Err(CacheError::invalid_argument(
                "set_active_window",
                format!("start {start} > end {end}"),
            ));
        }
        if end - start > self.capacity {
            return Err(CacheError::invalid_argument(
                "set_active_window",
                format!(
                    "window [{start}, {end}) wider than capacity {}",
                    self.capacity
                ),
            ));
        }
        if end > self.size {
            return Err(CacheError::invalid_argument(
                "set_active_window",
                format!("end {end} beyond size {}", self.size),
            ));
        }
        if self.active == (start..end) {
            return Ok(WindowUpdate::Unchanged);
        }

        self.active = start..end;
        Ok(self.recompute_content())
    }

    /// Commit a new source size, clamping the active window into it.
    pub fn set_size(&mut self, size: usize) -> WindowUpdate {
        if size == self.size {
            return WindowUpdate::Unchanged;
        }
        self.size = size;
        let end = self.active.end.min(size);
        let start = self.active.start.min(end);
        self.active = start..end;
        match self.recompute_content() {
            WindowUpdate::Unchanged => WindowUpdate::ActiveMoved,
            other => other,
        }
    }

    /// Forget all bounds, as for a freshly attached source.
    pub fn reset(&mut self) {
        self.size = 0;
        self.active = 0..0;
        self.content = 0..0;
    }

    /// Content window the controller would choose for the current active window.
    pub fn candidate_content(&self) -> Range<usize> {
        let width = self.capacity.min(self.size);
        let max_start = self.size - width;
        let mid = self.active.start + (self.active.end - self.active.start) / 2;
        let start = mid.saturating_sub(self.capacity / 2).min(max_start);
        start..start + width
    }

    fn recompute_content(&mut self) -> WindowUpdate {
        let candidate = self.candidate_content();
        let contains_active =
            self.content.start <= self.active.start && self.active.end <= self.content.end;
        let drifted = candidate.start.abs_diff(self.content.start) > self.slack;
        let resized = candidate.len() != self.content.len();

        if candidate == self.content || !(resized || drifted || !contains_active) {
            return WindowUpdate::ActiveMoved;
        }

        let shift = WindowShift::between(&self.content, &candidate);
        tracing::debug!(
            target: "wcache::window",
            from = ?self.content,
            to = ?candidate,
            evicted = ?shift.evicted,
            fill = ?shift.fill,
            "content window replaced"
        );
        self.content = candidate;
        WindowUpdate::ContentReplaced(shift)
    }
}
