//! Reload tasks: two-phase, chain-resumable fetches.
//!
//! A [`ReloadTask`] is created on the foreground (or by a dirty notification),
//! moves to the background context for its Loading step, and comes back as a
//! [`LoadedBatch`] for the Merging step. Ownership moves across each handoff;
//! no task is ever visible to both contexts at once.
//!
//! ```text
//! Created ──submit──▶ Loading (background) ──handoff──▶ Merging (foreground)
//!                        │                                   │
//!                        └─ nothing to do: discarded         ├─ Done
//!                                                            └─ Rechained ─▶ Loading
//! ```

#![allow(missing_docs)]

use std::ops::Range;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use bitflags::bitflags;
use parking_lot::Mutex;

use crate::loader::dirty::release_gate;
use crate::loader::serial::LoadJob;
use crate::loader::stats::TaskCounters;
use crate::source::Source;

bitflags! {
    /// Work items carried by a reload task.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct TaskFlags: u8 {
        /// Call `Source::reload` before anything else.
        const SOURCE_CHANGED = 0b001;
        /// Read `Source::size` into the batch.
        const SIZE_REFRESH = 0b010;
        /// Fetch records for the task's range.
        const RANGE_FILL = 0b100;
    }
}

impl TaskFlags {
    /// Bits that apply only to the first link of a chain.
    pub const ONE_SHOT: Self = Self::SOURCE_CHANGED.union(Self::SIZE_REFRESH);
}

/// Why a task exists. Dirty and initial tasks only refill when the store
/// actually changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskOrigin {
    Initial,
    Window,
    Dirty,
}

/// Active and content bounds, as one copyable value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WindowBounds {
    pub active_start: usize,
    pub active_end: usize,
    pub content_start: usize,
    pub content_end: usize,
}

impl WindowBounds {
    pub fn content(&self) -> Range<usize> {
        self.content_start..self.content_end
    }
}

/// Window bounds readable from the background context.
///
/// The lock guards four integers and is never held across source I/O.
#[derive(Debug, Default)]
pub struct SharedBounds {
    inner: Mutex<WindowBounds>,
}

impl SharedBounds {
    pub fn publish(&self, bounds: WindowBounds) {
        *self.inner.lock() = bounds;
    }

    pub fn content(&self) -> Range<usize> {
        self.inner.lock().content()
    }
}

/// Intersection of two half-open ranges; empty ranges normalize to `start..start`.
pub fn intersect(a: &Range<usize>, b: &Range<usize>) -> Range<usize> {
    let start = a.start.max(b.start);
    let end = a.end.min(b.end).max(start);
    start..end
}

/// One chainable unit of fetch-and-merge work.
#[derive(Debug)]
pub struct ReloadTask {
    id: u64,
    start: usize,
    end: usize,
    flags: TaskFlags,
    origin: TaskOrigin,
    batch_max: usize,
    bounds: Arc<SharedBounds>,
    counters: Arc<TaskCounters>,
    dirty_gate: Option<Arc<AtomicBool>>,
}

/// Context every task of one cache shares.
#[derive(Debug, Clone)]
pub struct TaskContext {
    pub batch_max: usize,
    pub bounds: Arc<SharedBounds>,
    pub counters: Arc<TaskCounters>,
}

impl ReloadTask {
    /// Fill `range` of the content window.
    pub fn fill(ctx: &TaskContext, range: Range<usize>) -> Self {
        Self::build(ctx, range, TaskFlags::RANGE_FILL, TaskOrigin::Window)
    }

    /// First task after a source is attached: reload, read size, refill.
    pub fn initial(ctx: &TaskContext) -> Self {
        Self::build(ctx, 0..usize::MAX, TaskFlags::all(), TaskOrigin::Initial)
    }

    /// Task scheduled by a dirty notification.
    ///
    /// `gate` is cleared when Loading starts so notifications arriving during
    /// the load schedule a fresh task.
    pub fn dirty(ctx: &TaskContext, gate: Option<Arc<AtomicBool>>) -> Self {
        let mut task = Self::build(ctx, 0..usize::MAX, TaskFlags::all(), TaskOrigin::Dirty);
        task.dirty_gate = gate;
        task
    }

    fn build(ctx: &TaskContext, range: Range<usize>, flags: TaskFlags, origin: TaskOrigin) -> Self {
        Self {
            id: ctx.counters.new_task(),
            start: range.start,
            end: range.end,
            flags,
            origin,
            batch_max: ctx.batch_max.max(1),
            bounds: Arc::clone(&ctx.bounds),
            counters: Arc::clone(&ctx.counters),
            dirty_gate: None,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn range(&self) -> Range<usize> {
        self.start..self.end
    }

    pub fn flags(&self) -> TaskFlags {
        self.flags
    }

    pub fn origin(&self) -> TaskOrigin {
        self.origin
    }

    /// Turn a merged task into the next link of its chain.
    ///
    /// The one-shot bits are dropped; the range fill resumes at `next_start`.
    #[must_use]
    pub fn rechain(mut self, next_start: usize) -> Self {
        self.start = next_start.min(self.end);
        self.flags.remove(TaskFlags::ONE_SHOT);
        self.flags.insert(TaskFlags::RANGE_FILL);
        self.origin = TaskOrigin::Window;
        self.counters.record_rechain();
        self
    }

    /// Whether the range left after `next_start` still overlaps `content`.
    pub fn remainder_intersects(&self, next_start: usize, content: &Range<usize>) -> bool {
        let remainder = next_start.min(self.end)..self.end;
        !intersect(&remainder, content).is_empty()
    }
}

impl<S: Source> LoadJob<S> for ReloadTask {
    type Output = LoadedBatch<S::Item>;

    fn run(mut self, source: &mut S) -> Option<Self::Output> {
        release_gate(self.dirty_gate.take());
        self.counters.record_load();

        if self.flags.contains(TaskFlags::SOURCE_CHANGED) && !source.reload() {
            self.flags.remove(TaskFlags::SOURCE_CHANGED);
            if self.origin != TaskOrigin::Window {
                // Unchanged store: nothing to refill.
                self.flags.remove(TaskFlags::RANGE_FILL);
            }
        }

        let size = self
            .flags
            .intersects(TaskFlags::ONE_SHOT)
            .then(|| source.size());

        let mut fetch_start = self.start;
        let mut requested = 0;
        let mut records = Vec::new();
        if self.flags.contains(TaskFlags::RANGE_FILL) {
            let clamped = intersect(&self.range(), &self.bounds.content());
            if clamped.is_empty() {
                self.flags.remove(TaskFlags::RANGE_FILL);
            } else {
                fetch_start = clamped.start;
                requested = clamped.len().min(self.batch_max);
                records = source.fetch_range(fetch_start, requested);
                records.truncate(requested);
                self.counters.record_batch(records.len());
            }
        }

        if size.is_none() && !self.flags.contains(TaskFlags::RANGE_FILL) {
            tracing::trace!(target: "wcache::loader", task = self.id, "nothing to load, discarded");
            self.counters.record_discard();
            return None;
        }

        tracing::trace!(
            target: "wcache::loader",
            task = self.id,
            start = fetch_start,
            requested,
            fetched = records.len(),
            size = ?size,
            "load step complete"
        );
        Some(LoadedBatch {
            task: self,
            size,
            fetch_start,
            requested,
            records,
        })
    }
}

/// A task after Loading: the fetched payload plus an optional fresh size.
#[derive(Debug)]
pub struct LoadedBatch<V> {
    task: ReloadTask,
    size: Option<usize>,
    fetch_start: usize,
    requested: usize,
    records: Vec<V>,
}

impl<V> LoadedBatch<V> {
    /// Split into the task and its payload for merging.
    pub fn into_parts(self) -> (ReloadTask, BatchPayload<V>) {
        let payload = BatchPayload {
            size: self.size,
            fetch_start: self.fetch_start,
            requested: self.requested,
            records: self.records,
        };
        (self.task, payload)
    }
}

/// Payload half of a [`LoadedBatch`].
#[derive(Debug)]
pub struct BatchPayload<V> {
    pub size: Option<usize>,
    pub fetch_start: usize,
    pub requested: usize,
    pub records: Vec<V>,
}

impl<V> BatchPayload<V> {
    /// Logical indices the payload covers.
    pub fn fetched_range(&self) -> Range<usize> {
        self.fetch_start..self.fetch_start + self.records.len()
    }

    /// Whether the source returned everything that was asked for.
    pub fn is_full(&self) -> bool {
        self.requested > 0 && self.records.len() == self.requested
    }
}
