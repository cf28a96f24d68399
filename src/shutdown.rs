//! Cooperative cancellation shared between the scheduler and its feeds.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Clonable stop flag. Blocking waits re-check it every poll interval.
#[derive(Clone, Debug, Default)]
pub struct ShutdownSignal {
    triggered: Arc<AtomicBool>,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        self.triggered.store(true, Ordering::SeqCst);
    }

    pub fn is_triggered(&self) -> bool {
        self.triggered.load(Ordering::SeqCst)
    }
}
