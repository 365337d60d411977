//! Credit-bounded prefetch queue for sequential consumers.
//!
//! The queue keeps up to `capacity` records either fetched-and-waiting or
//! in flight. Credit is computed, never counted: a fetch is issued only while
//! `in_flight + queued < capacity`, so a refresh racing an item completion
//! cannot over- or under-issue.
//!
//! Fetches and the record transform run on a [`SerialLoader`] thread, one
//! index per job; completions come back to the owner on
//! [`PrefetchQueue::process_pending`].

#![allow(missing_docs)]

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, unbounded};
use serde::Serialize;

use crate::core::config::{Config, LoaderConfig};
use crate::core::errors::{CacheError, Result};
use crate::loader::dirty::{debounced_observer, release_gate};
use crate::loader::serial::{LoadJob, SerialLoader, loader_channel};
use crate::loader::stats::TaskCounters;
use crate::source::{DirtyObserver, Source};

const IDLE_POLL: Duration = Duration::from_millis(10);

/// Producer step applied to each fetched record on the background context.
///
/// `None` drops the record, the same as an absent index.
pub type Transform<V, T> = Arc<dyn Fn(V) -> Option<T> + Send + Sync>;

/// Consumer callbacks for a [`PrefetchQueue`].
pub trait PrefetchListener: Send {
    /// The queue went from empty to non-empty.
    fn on_content_available(&mut self);

    fn on_size_changed(&mut self, _size: usize) {}
}

/// Counters for one queue, in the order things happen.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PrefetchStats {
    pub fetches_issued: u64,
    pub items_delivered: u64,
    /// Fetches that came back with no record (past the end, or transformed away).
    pub items_absent: u64,
    pub size_refreshes: u64,
    pub dirty_scheduled: u64,
    pub dirty_coalesced: u64,
}

enum PrefetchJob<V, T> {
    Refresh {
        reload: bool,
        gate: Option<Arc<AtomicBool>>,
    },
    Fetch {
        index: usize,
        transform: Transform<V, T>,
    },
}

enum PrefetchOutcome<T> {
    Size { size: usize, changed: bool },
    Item { index: usize, item: Option<T> },
}

impl<S, T> LoadJob<S> for PrefetchJob<S::Item, T>
where
    S: Source,
    T: Send + 'static,
{
    type Output = PrefetchOutcome<T>;

    fn run(self, source: &mut S) -> Option<PrefetchOutcome<T>> {
        match self {
            Self::Refresh { reload, gate } => {
                release_gate(gate);
                let changed = reload && source.reload();
                Some(PrefetchOutcome::Size {
                    size: source.size(),
                    changed,
                })
            }
            Self::Fetch { index, transform } => {
                let item = source
                    .fetch_range(index, 1)
                    .into_iter()
                    .next()
                    .and_then(|record| transform(record));
                tracing::trace!(
                    target: "wcache::prefetch",
                    index,
                    present = item.is_some(),
                    "fetch complete"
                );
                Some(PrefetchOutcome::Item { index, item })
            }
        }
    }
}

/// Background context plus the channel its outcomes come back on.
struct Attachment<V, T> {
    loader: SerialLoader<PrefetchJob<V, T>>,
    inbox: Receiver<PrefetchOutcome<T>>,
    observer: DirtyObserver,
}

/// Bounded FIFO of ready records fed in index order.
pub struct PrefetchQueue<S: Source, T> {
    loader_config: LoaderConfig,
    capacity: usize,
    wrap_around: bool,
    transform: Transform<S::Item, T>,
    queue: VecDeque<T>,
    next_index: usize,
    size: usize,
    in_flight: usize,
    listener: Option<Box<dyn PrefetchListener>>,
    counters: Arc<TaskCounters>,
    stats: PrefetchStats,
    attachment: Attachment<S::Item, T>,
}

impl<S, T> PrefetchQueue<S, T>
where
    S: Source,
    T: Send + 'static,
{
    /// Attach `source` and start prefetching once its size is known.
    pub fn new<F>(source: S, transform: F, config: &Config) -> Result<Self>
    where
        F: Fn(S::Item) -> Option<T> + Send + Sync + 'static,
    {
        config.validate()?;
        let counters = Arc::new(TaskCounters::default());
        let attachment = attach(source, &config.loader, &counters)?;
        tracing::debug!(
            target: "wcache::prefetch",
            capacity = config.prefetch.capacity,
            wrap_around = config.prefetch.wrap_around,
            "prefetch queue created"
        );
        Ok(Self {
            loader_config: config.loader.clone(),
            capacity: config.prefetch.capacity,
            wrap_around: config.prefetch.wrap_around,
            transform: Arc::new(transform),
            queue: VecDeque::with_capacity(config.prefetch.capacity),
            next_index: 0,
            size: 0,
            in_flight: 0,
            listener: None,
            counters,
            stats: PrefetchStats::default(),
            attachment,
        })
    }

    /// Replace the source, dropping everything queued or in flight.
    pub fn set_source(&mut self, source: S) -> Result<()> {
        self.attachment.loader.shutdown();
        self.queue.clear();
        self.next_index = 0;
        self.in_flight = 0;
        self.commit_size(0);

        self.attachment = attach(source, &self.loader_config, &self.counters)?;
        tracing::debug!(target: "wcache::prefetch", "source replaced");
        Ok(())
    }

    pub fn set_listener<L: PrefetchListener + 'static>(&mut self, listener: L) {
        self.listener = Some(Box::new(listener));
    }

    pub fn clear_listener(&mut self) {
        self.listener = None;
    }

    pub fn has_next(&self) -> bool {
        !self.queue.is_empty()
    }

    /// Pop the oldest ready record and use the freed credit.
    pub fn take_next(&mut self) -> Result<T> {
        let Some(item) = self.queue.pop_front() else {
            return Err(CacheError::invalid_argument(
                "take_next",
                "prefetch queue is empty",
            ));
        };
        self.top_up();
        Ok(item)
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Index the next fetch will ask for.
    pub fn next_index(&self) -> usize {
        self.next_index
    }

    /// Fetches issued and not yet completed.
    pub fn in_flight(&self) -> usize {
        self.in_flight
    }

    /// Records ready to take.
    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    pub fn dirty_observer(&self) -> DirtyObserver {
        self.attachment.observer.clone()
    }

    #[must_use]
    pub fn stats(&self) -> PrefetchStats {
        let dirty = self.counters.snapshot();
        PrefetchStats {
            dirty_scheduled: dirty.dirty_scheduled,
            dirty_coalesced: dirty.dirty_coalesced,
            ..self.stats
        }
    }

    /// Handle every completion that has arrived, without blocking.
    pub fn process_pending(&mut self) -> usize {
        let mut handled = 0;
        while let Ok(outcome) = self.attachment.inbox.try_recv() {
            self.handle(outcome);
            handled += 1;
        }
        handled
    }

    pub fn is_idle(&self) -> bool {
        self.attachment.loader.pending() == 0 && self.attachment.inbox.is_empty()
    }

    /// Pump completions until idle or `timeout` elapses. Returns whether idle.
    pub fn wait_idle(&mut self, timeout: Duration) -> bool {
        self.pump_until(timeout, Self::is_idle)
    }

    /// Pump completions until a record is ready. Returns `false` on timeout or
    /// once nothing more can arrive.
    pub fn wait_for_next(&mut self, timeout: Duration) -> bool {
        self.pump_until(timeout, |q| q.has_next() || q.is_idle()) && self.has_next()
    }

    fn pump_until(&mut self, timeout: Duration, done: impl Fn(&Self) -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            self.process_pending();
            if done(self) {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            match self.attachment.inbox.recv_timeout((deadline - now).min(IDLE_POLL)) {
                Ok(outcome) => self.handle(outcome),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => {
                    tracing::warn!(target: "wcache::prefetch", "loader gone while waiting");
                    return false;
                }
            }
        }
    }

    fn handle(&mut self, outcome: PrefetchOutcome<T>) {
        match outcome {
            PrefetchOutcome::Size { size, changed } => {
                self.stats.size_refreshes += 1;
                if changed && self.next_index != 0 {
                    tracing::debug!(
                        target: "wcache::prefetch",
                        from = self.next_index,
                        "store changed, restarting sequence"
                    );
                    self.next_index = 0;
                }
                self.commit_size(size);
            }
            PrefetchOutcome::Item { index, item } => {
                self.in_flight = self.in_flight.saturating_sub(1);
                match item {
                    Some(item) => {
                        self.stats.items_delivered += 1;
                        let was_empty = self.queue.is_empty();
                        self.queue.push_back(item);
                        if was_empty && let Some(listener) = self.listener.as_mut() {
                            listener.on_content_available();
                        }
                    }
                    None => {
                        self.stats.items_absent += 1;
                        tracing::trace!(target: "wcache::prefetch", index, "no record");
                    }
                }
            }
        }
        self.top_up();
    }

    fn commit_size(&mut self, size: usize) {
        if size == self.size {
            return;
        }
        tracing::debug!(target: "wcache::prefetch", from = self.size, to = size, "size committed");
        self.size = size;
        if let Some(listener) = self.listener.as_mut() {
            listener.on_size_changed(size);
        }
    }

    /// Issue fetches while credit remains and indices are left.
    fn top_up(&mut self) {
        while self.in_flight + self.queue.len() < self.capacity {
            if self.next_index >= self.size {
                if !self.wrap_around || self.size == 0 {
                    break;
                }
                self.next_index = 0;
            }
            let job = PrefetchJob::Fetch {
                index: self.next_index,
                transform: Arc::clone(&self.transform),
            };
            if let Err(err) = self.attachment.loader.submit(job) {
                tracing::warn!(target: "wcache::prefetch", index = self.next_index, %err, "fetch not issued");
                break;
            }
            self.next_index += 1;
            self.in_flight += 1;
            self.stats.fetches_issued += 1;
        }
    }
}

impl<S: Source, T> fmt::Debug for PrefetchQueue<S, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PrefetchQueue")
            .field("capacity", &self.capacity)
            .field("size", &self.size)
            .field("next_index", &self.next_index)
            .field("in_flight", &self.in_flight)
            .field("queued", &self.queue.len())
            .finish_non_exhaustive()
    }
}

fn attach<S, T>(
    mut source: S,
    config: &LoaderConfig,
    counters: &Arc<TaskCounters>,
) -> Result<Attachment<S::Item, T>>
where
    S: Source,
    T: Send + 'static,
{
    let (handle, inbox) = loader_channel::<PrefetchJob<S::Item, T>>();
    let observer = debounced_observer(
        handle.clone(),
        config,
        Arc::clone(counters),
        |gate| PrefetchJob::Refresh { reload: true, gate },
    );
    source.register_observer(observer.clone());

    let (out_tx, out_rx) = unbounded();
    let loader = SerialLoader::spawn(&config.thread_name, source, handle, inbox, out_tx)?;
    loader.submit(PrefetchJob::Refresh {
        reload: true,
        gate: None,
    })?;
    Ok(Attachment {
        loader,
        inbox: out_rx,
        observer,
    })
}
