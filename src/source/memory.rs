//! In-memory source with versioned mutations from any thread.

#![allow(missing_docs)]

use std::sync::Arc;

use parking_lot::RwLock;

use crate::source::{DirtyObserver, Source};

#[derive(Debug)]
struct Store<T> {
    records: Vec<T>,
    version: u64,
    observer: Option<DirtyObserver>,
}

/// Source backed by a shared `Vec`.
///
/// The cache owns the `MemorySource`; producers keep a [`MemorySourceHandle`]
/// to mutate the records. Every mutation bumps a version and notifies the
/// registered observer, and [`Source::reload`] reports whether the version
/// moved since the previous reload.
#[derive(Debug)]
pub struct MemorySource<T> {
    store: Arc<RwLock<Store<T>>>,
    seen_version: Option<u64>,
}

/// Mutation side of a [`MemorySource`].
#[derive(Debug)]
pub struct MemorySourceHandle<T> {
    store: Arc<RwLock<Store<T>>>,
}

impl<T> Clone for MemorySourceHandle<T> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
        }
    }
}

impl<T> MemorySource<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    /// Create a source and its mutation handle.
    pub fn new(records: Vec<T>) -> (Self, MemorySourceHandle<T>) {
        let store = Arc::new(RwLock::new(Store {
            records,
            version: 0,
            observer: None,
        }));
        let handle = MemorySourceHandle {
            store: Arc::clone(&store),
        };
        (
            Self {
                store,
                seen_version: None,
            },
            handle,
        )
    }
}

impl<T> MemorySourceHandle<T>
where
    T: Clone,
{
    pub fn len(&self) -> usize {
        self.store.read().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, index: usize) -> Option<T> {
        self.store.read().records.get(index).cloned()
    }

    /// Current mutation version.
    pub fn version(&self) -> u64 {
        self.store.read().version
    }

    pub fn push(&self, record: T) {
        self.mutate(|records| {
            records.push(record);
            true
        });
    }

    /// Overwrite the record at `index`. Returns `false` when out of range.
    pub fn set(&self, index: usize, record: T) -> bool {
        self.mutate(|records| match records.get_mut(index) {
            Some(slot) => {
                *slot = record;
                true
            }
            None => false,
        })
    }

    /// Remove and return the record at `index`.
    pub fn remove(&self, index: usize) -> Option<T> {
        let mut removed = None;
        self.mutate(|records| {
            if index < records.len() {
                removed = Some(records.remove(index));
                true
            } else {
                false
            }
        });
        removed
    }

    pub fn replace_all(&self, records: Vec<T>) {
        self.mutate(|current| {
            *current = records;
            true
        });
    }

    /// Notify the observer without changing anything.
    pub fn touch(&self) {
        let observer = self.store.read().observer.clone();
        if let Some(observer) = observer {
            observer.notify();
        }
    }

    fn mutate<F>(&self, apply: F) -> bool
    where
        F: FnOnce(&mut Vec<T>) -> bool,
    {
        let observer = {
            let mut store = self.store.write();
            if !apply(&mut store.records) {
                return false;
            }
            store.version = store.version.wrapping_add(1);
            store.observer.clone()
        };
        // Notify outside the lock: the observer may post work synchronously.
        if let Some(observer) = observer {
            observer.notify();
        }
        true
    }
}

impl<T> Source for MemorySource<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    type Item = T;

    fn size(&self) -> usize {
        self.store.read().records.len()
    }

    fn reload(&mut self) -> bool {
        let version = self.store.read().version;
        let changed = self.seen_version != Some(version);
        self.seen_version = Some(version);
        changed
    }

    fn fetch_range(&mut self, start: usize, count: usize) -> Vec<T> {
        let store = self.store.read();
        let end = start.saturating_add(count).min(store.records.len());
        if start >= end {
            return Vec::new();
        }
        store.records[start..end].to_vec()
    }

    fn register_observer(&mut self, observer: DirtyObserver) {
        self.store.write().observer = Some(observer);
    }
}
