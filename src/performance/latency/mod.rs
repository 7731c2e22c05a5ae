//! Latency histogram primitives, shared by [`crate::performance::queues`]
//! and the per-component metrics in [`crate::performance`].

pub mod histogram;

pub use histogram::*;
