//! Record sources: the lazy sequence the caches window over.
//!
//! A [`Source`] is only ever touched from the background context, so
//! implementations need no internal locking of their own. Change notifications
//! travel the other way through the [`DirtyObserver`] the cache registers.

pub mod memory;
pub mod nested;

use std::fmt;
use std::sync::Arc;

/// Lazy, possibly-stale ordered sequence of records.
pub trait Source: Send + 'static {
    /// One materialized record. Equality decides whether a slot changed.
    type Item: Clone + PartialEq + Send + 'static;

    /// Current number of records.
    fn size(&self) -> usize;

    /// Resynchronize with the underlying store.
    ///
    /// Returns `true` only when the store changed. Transient failures report
    /// `false`; the next dirty notification is the retry.
    fn reload(&mut self) -> bool;

    /// Fetch up to `count` records starting at `start`, in order.
    ///
    /// Returning fewer than requested means the end of the sequence was reached.
    fn fetch_range(&mut self, start: usize, count: usize) -> Vec<Self::Item>;

    /// Install the single observer notified when the store changes.
    ///
    /// A new registration replaces the previous one.
    fn register_observer(&mut self, observer: DirtyObserver) {
        let _ = observer;
    }
}

/// Cheaply-cloneable handle a source calls when its store changed.
///
/// Safe to call from any thread; the owning cache turns each call into a
/// delayed reload on its background context.
#[derive(Clone)]
pub struct DirtyObserver {
    notify: Arc<dyn Fn() + Send + Sync>,
}

impl DirtyObserver {
    pub fn new<F>(notify: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        Self {
            notify: Arc::new(notify),
        }
    }

    /// Report that the underlying store changed.
    pub fn notify(&self) {
        (self.notify)();
    }
}

impl fmt::Debug for DirtyObserver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DirtyObserver").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn observer_clones_share_callback() {
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        let observer = DirtyObserver::new(move || {
            counter.fetch_add(1, Ordering::Relaxed);
        });
        let clone = observer.clone();
        observer.notify();
        clone.notify();
        assert_eq!(hits.load(Ordering::Relaxed), 2);
    }
}
