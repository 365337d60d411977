//! Convenience re-exports for library consumers.
//!
//! ```rust,no_run
//! use windowed_cache::prelude::*;
//! ```

// Core
pub use crate::core::config::Config;
pub use crate::core::errors::{CacheError, Result};

// Sources
pub use crate::source::memory::{MemorySource, MemorySourceHandle};
pub use crate::source::nested::{CoverSet, CoverSource, NestedSource};
pub use crate::source::{DirtyObserver, Source};

// Loading
pub use crate::loader::stats::EngineStats;

// Window variant
pub use crate::window::cache::WindowCache;
pub use crate::window::notifier::CacheListener;

// Prefetch variant
pub use crate::prefetch::queue::{PrefetchListener, PrefetchQueue, PrefetchStats};
