//! Lock-free engine counters shared by both contexts.

#![allow(missing_docs)]

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Live counters, bumped from whichever context performs the step.
#[derive(Debug, Default)]
pub struct TaskCounters {
    next_id: AtomicU64,
    tasks_created: AtomicU64,
    loads_run: AtomicU64,
    batches_fetched: AtomicU64,
    records_fetched: AtomicU64,
    tasks_discarded: AtomicU64,
    merges: AtomicU64,
    rechains: AtomicU64,
    dirty_scheduled: AtomicU64,
    dirty_coalesced: AtomicU64,
}

/// Point-in-time copy of [`TaskCounters`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EngineStats {
    /// Reload tasks created (rechains reuse their task and are not counted).
    pub tasks_created: u64,
    /// Loading steps executed on the background context.
    pub loads_run: u64,
    /// Loading steps that fetched a batch of records.
    pub batches_fetched: u64,
    pub records_fetched: u64,
    /// Loading steps that found nothing to do and handed nothing back.
    pub tasks_discarded: u64,
    /// Merging steps executed on the foreground context.
    pub merges: u64,
    pub rechains: u64,
    pub dirty_scheduled: u64,
    /// Dirty notifications absorbed by an already-pending dirty task.
    pub dirty_coalesced: u64,
}

impl TaskCounters {
    /// Allocate a task id and count the task.
    pub fn new_task(&self) -> u64 {
        self.tasks_created.fetch_add(1, Ordering::Relaxed);
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    pub fn record_load(&self) {
        self.loads_run.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_batch(&self, records: usize) {
        self.batches_fetched.fetch_add(1, Ordering::Relaxed);
        self.records_fetched
            .fetch_add(records as u64, Ordering::Relaxed);
    }

    pub fn record_discard(&self) {
        self.tasks_discarded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_merge(&self) {
        self.merges.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rechain(&self) {
        self.rechains.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dirty_scheduled(&self) {
        self.dirty_scheduled.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dirty_coalesced(&self) {
        self.dirty_coalesced.fetch_add(1, Ordering::Relaxed);
    }

    #[must_use]
    pub fn snapshot(&self) -> EngineStats {
        EngineStats {
            tasks_created: self.tasks_created.load(Ordering::Relaxed),
            loads_run: self.loads_run.load(Ordering::Relaxed),
            batches_fetched: self.batches_fetched.load(Ordering::Relaxed),
            records_fetched: self.records_fetched.load(Ordering::Relaxed),
            tasks_discarded: self.tasks_discarded.load(Ordering::Relaxed),
            merges: self.merges.load(Ordering::Relaxed),
            rechains: self.rechains.load(Ordering::Relaxed),
            dirty_scheduled: self.dirty_scheduled.load(Ordering::Relaxed),
            dirty_coalesced: self.dirty_coalesced.load(Ordering::Relaxed),
        }
    }
}
