//! Cancellation Flag
//!
//! A set-once boolean shared between the host and a listener. The listener
//! reads it at the top of every loop iteration, so shutdown takes effect
//! within one cycle time of `set()`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Cloneable handle to a shared stop request
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag {
    inner: Arc<AtomicBool>,
}

impl CancellationFlag {
    /// A fresh, unset flag
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Request termination. Idempotent; the flag is never cleared.
    pub fn set(&self) {
        self.inner.store(true, Ordering::SeqCst);
    }

    /// Whether termination has been requested
    #[must_use]
    pub fn is_set(&self) -> bool {
        self.inner.load(Ordering::SeqCst)
    }
}
