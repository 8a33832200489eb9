//! Decode → buffer → consumer plumbing

pub mod buffer;
pub mod controller;
pub mod ingest;
pub mod registry;

use std::sync::{Mutex, MutexGuard, PoisonError};

pub use buffer::{Admission, Arrival, EvictionGate, FrameBuffer, Ungated};
pub use controller::{PipelineStats, ReadOutput, TensorStream};
pub use registry::{ConsumerRegistry, ConsumerState, OverflowPolicy, Resolved, MIN_DELAY};

/// Lifecycle of a [`TensorStream`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Uninitialized,
    /// Stream opened and probed; ready to start
    Initializing,
    Running,
    /// Terminal
    Stopped,
}

/// Guarded data stays consistent across a panicking holder, so poison is ignored.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
