#![forbid(unsafe_code)]

//! Windowed data cache: a bounded, asynchronously-filled view over a large
//! lazily-loaded sequence of records.
//!
//! Two engines share one loading core:
//! 1. **Window cache** ([`window::cache::WindowCache`]): a ring of records kept
//!    around the consumer's active window, refilled in chained batches
//! 2. **Prefetch queue** ([`prefetch::queue::PrefetchQueue`]): a credit-bounded
//!    FIFO of ready records for strictly sequential consumers
//!
//! Each engine owns one background thread that holds the [`source::Source`]
//! and runs loads one at a time. The engine itself is the foreground side:
//! nothing reaches the consumer until the owner pumps completed loads with
//! `process_pending`.
//!
//! # Library usage
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use windowed_cache::prelude::*;
//!
//! let (source, _handle) = MemorySource::new((0..1000_u32).collect());
//! let mut cache = WindowCache::new(source, &Config::default())?;
//! cache.wait_idle(Duration::from_secs(1));
//! cache.set_active_window(100, 120)?;
//! cache.wait_idle(Duration::from_secs(1));
//! assert_eq!(cache.get(100)?, Some(&100));
//! # Ok::<(), windowed_cache::core::errors::CacheError>(())
//! ```

pub mod prelude;

pub mod core;
pub mod loader;
pub mod prefetch;
pub mod source;
pub mod window;
