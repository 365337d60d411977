//! Change Notifier: diff-and-dispatch to the consumer's listener.

#![allow(missing_docs)]

use std::fmt;
use std::ops::Range;

/// Consumer callbacks for a [`WindowCache`](crate::window::cache::WindowCache).
///
/// Called on the foreground context, from inside `process_pending` or a
/// window move. Implementations must not call back into the cache.
pub trait CacheListener<V>: Send {
    /// The source size changed to `size`.
    fn on_size_changed(&mut self, size: usize);

    /// The record at `index` (inside the active window) changed.
    ///
    /// `old` is `None` when the slot was not loaded yet.
    fn on_content_changed(&mut self, index: usize, old: Option<&V>, new: &V);
}

/// Dispatches size and content deltas to at most one listener.
pub struct ChangeNotifier<V> {
    listener: Option<Box<dyn CacheListener<V>>>,
    last_size: usize,
}

impl<V> Default for ChangeNotifier<V> {
    fn default() -> Self {
        Self {
            listener: None,
            last_size: 0,
        }
    }
}

impl<V: PartialEq> ChangeNotifier<V> {
    pub fn set_listener(&mut self, listener: Box<dyn CacheListener<V>>) {
        self.listener = Some(listener);
    }

    pub fn clear_listener(&mut self) -> Option<Box<dyn CacheListener<V>>> {
        self.listener.take()
    }

    /// Report `size` once per distinct value. Returns whether it was new.
    pub fn size_changed(&mut self, size: usize) -> bool {
        if size == self.last_size {
            return false;
        }
        self.last_size = size;
        if let Some(listener) = self.listener.as_mut() {
            listener.on_size_changed(size);
        }
        true
    }

    /// Report a slot change if the value differs and `index` is in `active`.
    ///
    /// Returns whether a callback was due (a listener need not be installed).
    pub fn content_changed(
        &mut self,
        active: &Range<usize>,
        index: usize,
        old: Option<&V>,
        new: &V,
    ) -> bool {
        if old == Some(new) || !active.contains(&index) {
            return false;
        }
        if let Some(listener) = self.listener.as_mut() {
            listener.on_content_changed(index, old, new);
        }
        true
    }
}

impl<V> fmt::Debug for ChangeNotifier<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChangeNotifier")
            .field("listener", &self.listener.is_some())
            .field("last_size", &self.last_size)
            .finish()
    }
}
