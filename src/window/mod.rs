//! Window variant: a ring of records around the consumer's active window.
//!
//! - [`ring`]: modulo-addressed slot store
//! - [`controller`]: active/content bound arithmetic
//! - [`notifier`]: diff-and-dispatch of visible changes
//! - [`cache`]: the engine tying them to a background loader

pub mod cache;
pub mod controller;
pub mod notifier;
pub mod ring;
