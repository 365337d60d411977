//! Slideshow variant: a small queue of ready records consumed in order.

pub mod queue;
