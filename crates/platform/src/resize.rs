//! Resize notification shared by the window callback and the presentation
//! loop.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// A single "framebuffer resized" flag.
///
/// Clones share the flag. Setting it repeatedly before it is taken collapses
/// into one notification; a notify that races with [`take`](Self::take) is
/// never lost, it is observed either by that take or by the next one.
#[derive(Debug, Clone, Default)]
pub struct ResizeSignal {
    pending: Arc<AtomicBool>,
}

impl ResizeSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raise the flag. Called from the windowing layer on every resize event.
    pub fn notify(&self) {
        self.pending.store(true, Ordering::Release);
    }

    /// Clear the flag, returning whether it was set.
    pub fn take(&self) -> bool {
        self.pending.swap(false, Ordering::AcqRel)
    }

    /// Whether a notification is waiting, without consuming it.
    pub fn is_pending(&self) -> bool {
        self.pending.load(Ordering::Acquire)
    }
}
