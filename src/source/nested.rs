//! Nested sources: a sequence of groups, each windowed as its first k covers.
//!
//! [`CoverSource`] turns a [`NestedSource`] into an ordinary [`Source`] whose
//! records are [`CoverSet`]s, so the grouped grid runs on the same engine as
//! the flat one.

#![allow(missing_docs)]

use crate::source::{DirtyObserver, Source};

/// A source whose elements are themselves sources.
pub trait NestedSource: Send + 'static {
    /// Record type of every inner source.
    type Record: Clone + PartialEq + Send + 'static;
    /// Inner source type.
    type Inner: Source<Item = Self::Record>;

    /// Resynchronize with the underlying store; `true` when it changed.
    fn reload(&mut self) -> bool;

    /// Number of inner sources.
    fn sub_source_count(&self) -> usize;

    /// Inner source at `index`, or `None` past the end.
    fn sub_source_at(&mut self, index: usize) -> Option<&mut Self::Inner>;

    /// Install the single observer notified when any group changes.
    fn register_observer(&mut self, observer: DirtyObserver) {
        let _ = observer;
    }
}

/// The first few records of one group, compared element by element.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CoverSet<R> {
    covers: Vec<R>,
}

impl<R> CoverSet<R> {
    #[must_use]
    pub fn new(covers: Vec<R>) -> Self {
        Self { covers }
    }

    pub fn len(&self) -> usize {
        self.covers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.covers.is_empty()
    }

    /// The representative cover, if the group has any records.
    pub fn first(&self) -> Option<&R> {
        self.covers.first()
    }

    pub fn get(&self, position: usize) -> Option<&R> {
        self.covers.get(position)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, R> {
        self.covers.iter()
    }

    pub fn as_slice(&self) -> &[R] {
        &self.covers
    }

    #[must_use]
    pub fn into_inner(self) -> Vec<R> {
        self.covers
    }
}

impl<'a, R> IntoIterator for &'a CoverSet<R> {
    type Item = &'a R;
    type IntoIter = std::slice::Iter<'a, R>;

    fn into_iter(self) -> Self::IntoIter {
        self.covers.iter()
    }
}

/// Adapter presenting each inner source as its first `cover_count` records.
#[derive(Debug)]
pub struct CoverSource<N> {
    nested: N,
    cover_count: usize,
}

impl<N: NestedSource> CoverSource<N> {
    /// Wrap `nested`, keeping at most `cover_count` covers per group.
    pub fn new(nested: N, cover_count: usize) -> Self {
        Self {
            nested,
            cover_count: cover_count.max(1),
        }
    }

    pub fn cover_count(&self) -> usize {
        self.cover_count
    }

    pub fn inner(&self) -> &N {
        &self.nested
    }
}

impl<N: NestedSource> Source for CoverSource<N> {
    type Item = CoverSet<N::Record>;

    fn size(&self) -> usize {
        self.nested.sub_source_count()
    }

    fn reload(&mut self) -> bool {
        self.nested.reload()
    }

    fn fetch_range(&mut self, start: usize, count: usize) -> Vec<Self::Item> {
        let end = start
            .saturating_add(count)
            .min(self.nested.sub_source_count());
        let mut groups = Vec::with_capacity(end.saturating_sub(start));
        for index in start..end {
            let Some(inner) = self.nested.sub_source_at(index) else {
                // Shorter than advertised: treat as end of range.
                break;
            };
            let mut covers = inner.fetch_range(0, self.cover_count);
            covers.truncate(self.cover_count);
            groups.push(CoverSet::new(covers));
        }
        groups
    }

    fn register_observer(&mut self, observer: DirtyObserver) {
        self.nested.register_observer(observer);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Album(Vec<u32>);

    impl Source for Album {
        type Item = u32;

        fn size(&self) -> usize {
            self.0.len()
        }

        fn reload(&mut self) -> bool {
            false
        }

        fn fetch_range(&mut self, start: usize, count: usize) -> Vec<u32> {
            self.0.iter().skip(start).take(count).copied().collect()
        }
    }

    struct Library {
        albums: Vec<Album>,
        changed: bool,
    }

    impl NestedSource for Library {
        type Record = u32;
        type Inner = Album;

        fn reload(&mut self) -> bool {
            std::mem::take(&mut self.changed)
        }

        fn sub_source_count(&self) -> usize {
            self.albums.len()
        }

        fn sub_source_at(&mut self, index: usize) -> Option<&mut Album> {
            self.albums.get_mut(index)
        }
    }

    fn library() -> Library {
        Library {
            albums: vec![
                Album(vec![1, 2, 3, 4, 5]),
                Album(vec![10]),
                Album(vec![]),
                Album(vec![20, 21, 22, 23]),
            ],
            changed: true,
        }
    }

    #[test]
    fn fetch_yields_first_k_covers_per_group() {
        let mut source = CoverSource::new(library(), 3);
        assert_eq!(source.size(), 4);
        let groups = source.fetch_range(0, 10);
        assert_eq!(groups.len(), 4);
        assert_eq!(groups[0].as_slice(), &[1, 2, 3]);
        assert_eq!(groups[1].as_slice(), &[10]);
        assert!(groups[2].is_empty());
        assert_eq!(groups[3].first(), Some(&20));
    }

    #[test]
    fn fetch_respects_start_and_count() {
        let mut source = CoverSource::new(library(), 2);
        let groups = source.fetch_range(1, 2);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].as_slice(), &[10]);
        assert!(groups[1].is_empty());
        assert!(source.fetch_range(4, 1).is_empty());
    }

    #[test]
    fn freshly_fetched_cover_sets_compare_equal() {
        let mut source = CoverSource::new(library(), 3);
        let first = source.fetch_range(0, 4);
        let second = source.fetch_range(0, 4);
        assert_eq!(first, second);
        assert_ne!(first[0], first[3]);
    }

    #[test]
    fn reload_is_forwarded() {
        let mut source = CoverSource::new(library(), 1);
        assert!(source.reload());
        assert!(!source.reload());
        assert_eq!(source.cover_count(), 1);
    }
}
