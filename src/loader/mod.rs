//! Background loading: the serial worker context and the reload tasks it runs.

pub mod dirty;
pub mod serial;
pub mod stats;
pub mod task;
