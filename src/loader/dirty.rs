//! Dirty notifications to delayed background jobs.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::core::config::LoaderConfig;
use crate::loader::serial::LoaderHandle;
use crate::loader::stats::TaskCounters;
use crate::source::DirtyObserver;

/// Build the observer a cache registers with its source.
///
/// Every notification posts `make_job(gate)` to run after the configured
/// delay. With `coalesce_dirty` on, `gate` is `Some` and stays raised until
/// the job starts loading; notifications arriving meanwhile are absorbed.
/// With it off, `gate` is `None` and each notification posts its own job.
pub fn debounced_observer<J, F>(
    handle: LoaderHandle<J>,
    config: &LoaderConfig,
    counters: Arc<TaskCounters>,
    make_job: F,
) -> DirtyObserver
where
    J: Send + 'static,
    F: Fn(Option<Arc<AtomicBool>>) -> J + Send + Sync + 'static,
{
    let delay = config.dirty_delay();
    let coalesce = config.coalesce_dirty;
    let gate = Arc::new(AtomicBool::new(false));
    DirtyObserver::new(move || {
        if coalesce && gate.swap(true, Ordering::AcqRel) {
            counters.record_dirty_coalesced();
            tracing::debug!(target: "wcache::loader", "dirty notification coalesced");
            return;
        }
        let job = make_job(coalesce.then(|| Arc::clone(&gate)));
        match handle.submit_after(delay, job) {
            Ok(()) => {
                counters.record_dirty_scheduled();
                tracing::debug!(
                    target: "wcache::loader",
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    "dirty reload scheduled"
                );
            }
            Err(err) => {
                gate.store(false, Ordering::Release);
                tracing::debug!(target: "wcache::loader", %err, "dirty reload not scheduled");
            }
        }
    })
}

/// Lower a gate handed out by [`debounced_observer`].
pub fn release_gate(gate: Option<Arc<AtomicBool>>) {
    if let Some(gate) = gate {
        gate.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::serial::loader_channel;

    fn config(coalesce: bool) -> LoaderConfig {
        LoaderConfig {
            dirty_delay_ms: 10_000,
            coalesce_dirty: coalesce,
            ..LoaderConfig::default()
        }
    }

    #[test]
    fn coalescing_absorbs_notifications_until_gate_is_released() {
        let (handle, _inbox) = loader_channel::<Option<Arc<AtomicBool>>>();
        let counters = Arc::new(TaskCounters::default());
        let observer =
            debounced_observer(handle.clone(), &config(true), Arc::clone(&counters), |g| g);
        observer.notify();
        observer.notify();
        observer.notify();
        let stats = counters.snapshot();
        assert_eq!(stats.dirty_scheduled, 1);
        assert_eq!(stats.dirty_coalesced, 2);
        assert_eq!(handle.pending(), 1);
    }

    #[test]
    fn without_coalescing_every_notification_schedules() {
        let (handle, _inbox) = loader_channel::<Option<Arc<AtomicBool>>>();
        let counters = Arc::new(TaskCounters::default());
        let observer =
            debounced_observer(handle.clone(), &config(false), Arc::clone(&counters), |g| {
                assert!(g.is_none());
                g
            });
        observer.notify();
        observer.notify();
        assert_eq!(counters.snapshot().dirty_scheduled, 2);
        assert_eq!(handle.pending(), 2);
    }

    #[test]
    fn released_gate_lets_next_notification_through() {
        let (handle, _inbox) = loader_channel::<Option<Arc<AtomicBool>>>();
        let counters = Arc::new(TaskCounters::default());
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let observer = debounced_observer(handle, &config(true), Arc::clone(&counters), move |g| {
            sink.lock().push(g.clone());
            g
        });
        observer.notify();
        release_gate(seen.lock()[0].clone());
        observer.notify();
        assert_eq!(counters.snapshot().dirty_scheduled, 2);
        assert_eq!(counters.snapshot().dirty_coalesced, 0);
    }

    #[test]
    fn closed_loader_leaves_gate_open() {
        let (handle, inbox) = loader_channel::<Option<Arc<AtomicBool>>>();
        drop(inbox);
        let counters = Arc::new(TaskCounters::default());
        let observer = debounced_observer(handle, &config(true), Arc::clone(&counters), |g| g);
        observer.notify();
        observer.notify();
        let stats = counters.snapshot();
        assert_eq!(stats.dirty_scheduled, 0);
        assert_eq!(stats.dirty_coalesced, 0, "a failed post never holds the gate");
    }
}
