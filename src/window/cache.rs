//! The windowed cache engine: the foreground context of one source.
//!
//! [`WindowCache`] owns the ring, the window bounds, the size and the
//! listener. All of them are touched only through `&mut self`, so they are
//! foreground-only by construction. The source lives on a [`SerialLoader`]
//! thread; the only state both sides see is the [`SharedBounds`] used to
//! re-clamp fills during Loading.
//!
//! The cache never blocks on the source. Loaded batches queue up until the
//! owner pumps them with [`WindowCache::process_pending`] (or
//! [`WindowCache::wait_idle`] in tests and batch tools), and each batch is
//! re-clamped against the live windows before it touches the ring.

#![allow(missing_docs)]

use std::ops::Range;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, unbounded};

use crate::core::config::{Config, LoaderConfig};
use crate::core::errors::{CacheError, Result};
use crate::loader::dirty::debounced_observer;
use crate::loader::serial::{SerialLoader, loader_channel};
use crate::loader::stats::{EngineStats, TaskCounters};
use crate::loader::task::{
    BatchPayload, LoadedBatch, ReloadTask, SharedBounds, TaskContext, WindowBounds, intersect,
};
use crate::source::{DirtyObserver, Source};
use crate::window::controller::{WindowController, WindowUpdate};
use crate::window::notifier::{CacheListener, ChangeNotifier};
use crate::window::ring::RingCache;

const IDLE_POLL: Duration = Duration::from_millis(10);

/// Background context plus the channel its batches come back on.
struct Attachment<V> {
    loader: SerialLoader<ReloadTask>,
    inbox: Receiver<LoadedBatch<V>>,
    observer: DirtyObserver,
}

/// Windowed view over a [`Source`].
pub struct WindowCache<S: Source> {
    loader_config: LoaderConfig,
    controller: WindowController,
    ring: RingCache<S::Item>,
    notifier: ChangeNotifier<S::Item>,
    ctx: TaskContext,
    attachment: Attachment<S::Item>,
}

impl<S: Source> WindowCache<S> {
    /// Attach `source` and start loading its size.
    pub fn new(source: S, config: &Config) -> Result<Self> {
        config.validate()?;
        let capacity = config.window.capacity;
        let ctx = TaskContext {
            batch_max: config.window.batch_max,
            bounds: Arc::new(SharedBounds::default()),
            counters: Arc::new(TaskCounters::default()),
        };
        let attachment = attach(source, &ctx, &config.loader)?;

        tracing::debug!(
            target: "wcache::window",
            capacity,
            slack = config.window.reload_slack,
            batch_max = config.window.batch_max,
            "window cache created"
        );
        Ok(Self {
            loader_config: config.loader.clone(),
            controller: WindowController::new(capacity, config.window.reload_slack),
            ring: RingCache::new(capacity),
            notifier: ChangeNotifier::default(),
            ctx,
            attachment,
        })
    }

    /// [`new`](Self::new) with a listener installed before the first merge.
    pub fn with_listener<L>(source: S, config: &Config, listener: L) -> Result<Self>
    where
        L: CacheListener<S::Item> + 'static,
    {
        let mut cache = Self::new(source, config)?;
        cache.set_listener(listener);
        Ok(cache)
    }

    /// Replace the source.
    ///
    /// The old background context is shut down and joined, so none of its
    /// batches can reach the new ring. Windows and size start over from zero.
    pub fn set_source(&mut self, source: S) -> Result<()> {
        self.attachment.loader.shutdown();
        self.ring.clear_all();
        self.controller.reset();
        self.ctx.bounds.publish(WindowBounds::default());
        self.notifier.size_changed(0);

        self.attachment = attach(source, &self.ctx, &self.loader_config)?;
        tracing::debug!(target: "wcache::window", "source replaced");
        Ok(())
    }

    pub fn set_listener<L>(&mut self, listener: L)
    where
        L: CacheListener<S::Item> + 'static,
    {
        self.notifier.set_listener(Box::new(listener));
    }

    pub fn clear_listener(&mut self) {
        self.notifier.clear_listener();
    }

    /// Move the consumer-visible window to `[start, end)`.
    ///
    /// Requires `start <= end`, `end - start <= capacity` and `end <= size`.
    /// Same bounds as before are a no-op.
    pub fn set_active_window(&mut self, start: usize, end: usize) -> Result<()> {
        let update = self.controller.set_active_window(start, end)?;
        self.apply(update);
        Ok(())
    }

    /// Record at `index`, or `None` while it is not loaded yet.
    ///
    /// `index` must be inside the active window.
    pub fn get(&self, index: usize) -> Result<Option<&S::Item>> {
        let active = self.controller.active();
        if !active.contains(&index) {
            return Err(CacheError::invalid_argument(
                "get",
                format!(
                    "index {index} outside active window [{}, {})",
                    active.start, active.end
                ),
            ));
        }
        Ok(self.ring.get(index))
    }

    /// Last committed source size.
    pub fn size(&self) -> usize {
        self.controller.size()
    }

    pub fn capacity(&self) -> usize {
        self.controller.capacity()
    }

    pub fn active_window(&self) -> Range<usize> {
        self.controller.active()
    }

    pub fn content_window(&self) -> Range<usize> {
        self.controller.content()
    }

    /// Indices currently materialized, ascending.
    pub fn loaded_indices(&self) -> Vec<usize> {
        let mut indices: Vec<usize> = self.ring.held_indices().collect();
        indices.sort_unstable();
        indices
    }

    /// Observer registered with the current source.
    ///
    /// Callers that learn about store changes some other way can notify it
    /// directly.
    pub fn dirty_observer(&self) -> DirtyObserver {
        self.attachment.observer.clone()
    }

    #[must_use]
    pub fn stats(&self) -> EngineStats {
        self.ctx.counters.snapshot()
    }

    /// Merge every batch that has arrived, without blocking.
    pub fn process_pending(&mut self) -> usize {
        let mut merged = 0;
        while let Ok(batch) = self.attachment.inbox.try_recv() {
            self.merge(batch);
            merged += 1;
        }
        merged
    }

    /// No task is queued, loading, delayed, or waiting to be merged.
    pub fn is_idle(&self) -> bool {
        // Pending first: the worker decrements only after its handoff is queued.
        self.attachment.loader.pending() == 0 && self.attachment.inbox.is_empty()
    }

    /// Pump batches until idle or `timeout` elapses. Returns whether idle.
    pub fn wait_idle(&mut self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            self.process_pending();
            if self.is_idle() {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            match self.attachment.inbox.recv_timeout((deadline - now).min(IDLE_POLL)) {
                Ok(batch) => self.merge(batch),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => {
                    tracing::warn!(target: "wcache::window", "loader gone while waiting for idle");
                    return false;
                }
            }
        }
    }

    fn apply(&mut self, update: WindowUpdate) {
        match update {
            WindowUpdate::Unchanged => {}
            WindowUpdate::ActiveMoved => self.ctx.bounds.publish(self.controller.bounds()),
            WindowUpdate::ContentReplaced(shift) => {
                // Evict before publishing or submitting so no fill for a
                // reused slot can land while the old owner is still there.
                let mut evicted = 0;
                for range in shift.evicted {
                    evicted += self.ring.clear_range(range);
                }
                self.ctx.bounds.publish(self.controller.bounds());
                for range in shift.fill {
                    tracing::trace!(target: "wcache::window", ?range, "fill submitted");
                    self.submit(ReloadTask::fill(&self.ctx, range));
                }
                tracing::trace!(target: "wcache::window", evicted, "slots evicted");
            }
        }
    }

    fn submit(&self, task: ReloadTask) {
        let id = task.id();
        if let Err(err) = self.attachment.loader.submit(task) {
            tracing::warn!(target: "wcache::window", task = id, %err, "task lost");
        }
    }

    fn commit_size(&mut self, size: usize) {
        if size == self.controller.size() {
            return;
        }
        tracing::debug!(
            target: "wcache::window",
            from = self.controller.size(),
            to = size,
            "size committed"
        );
        let update = self.controller.set_size(size);
        self.apply(update);
        self.notifier.size_changed(size);
    }

    fn merge(&mut self, batch: LoadedBatch<S::Item>) {
        self.ctx.counters.record_merge();
        let (task, payload) = batch.into_parts();
        let is_full = payload.is_full();
        let fetched = payload.fetched_range();
        let BatchPayload {
            size,
            fetch_start,
            records,
            ..
        } = payload;

        if let Some(size) = size {
            self.commit_size(size);
        }

        let live = intersect(&fetched, &self.controller.content());
        let active = self.controller.active();
        let mut changed = 0;
        for (index, record) in (fetch_start..).zip(records) {
            if !live.contains(&index) || self.ring.get(index) == Some(&record) {
                continue;
            }
            let old = self.ring.put(index, record);
            if let Some(new) = self.ring.get(index)
                && self
                    .notifier
                    .content_changed(&active, index, old.as_ref(), new)
            {
                changed += 1;
            }
        }
        tracing::trace!(
            target: "wcache::window",
            task = task.id(),
            ?fetched,
            ?live,
            changed,
            "batch merged"
        );

        let next_start = fetched.end;
        if is_full && task.remainder_intersects(next_start, &self.controller.content()) {
            tracing::debug!(
                target: "wcache::window",
                task = task.id(),
                next_start,
                "task rechained"
            );
            self.submit(task.rechain(next_start));
        }
    }
}

fn attach<S: Source>(
    mut source: S,
    ctx: &TaskContext,
    config: &LoaderConfig,
) -> Result<Attachment<S::Item>> {
    let (handle, inbox) = loader_channel::<ReloadTask>();
    let task_ctx = ctx.clone();
    let observer = debounced_observer(
        handle.clone(),
        config,
        Arc::clone(&ctx.counters),
        move |gate| ReloadTask::dirty(&task_ctx, gate),
    );
    source.register_observer(observer.clone());

    let (out_tx, out_rx) = unbounded();
    let loader = SerialLoader::spawn(&config.thread_name, source, handle, inbox, out_tx)?;
    loader.submit(ReloadTask::initial(ctx))?;
    Ok(Attachment {
        loader,
        inbox: out_rx,
        observer,
    })
}
