//! Run/pause/shutdown flags shared between the monitor loop and its
//! controllers (stdin control thread, Ctrl-C style callers).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::info;

/// Cloneable handle; all clones observe the same flags.
#[derive(Clone, Debug, Default)]
pub struct Lifecycle {
    running: Arc<AtomicBool>,
    shutdown: Arc<AtomicBool>,
}

impl Lifecycle {
    /// Creates a lifecycle in the stopped state.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start(&self) {
        if !self.running.swap(true, Ordering::SeqCst) {
            info!("Monitoring started");
        }
    }

    pub fn stop(&self) {
        if self.running.swap(false, Ordering::SeqCst) {
            info!("Monitoring paused");
        }
    }

    /// Flips between running and paused. Returns the new running state.
    pub fn toggle(&self) -> bool {
        let was_running = self.running.fetch_xor(true, Ordering::SeqCst);
        if was_running {
            info!("Monitoring paused");
        } else {
            info!("Monitoring resumed");
        }
        !was_running
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst) && !self.is_shutdown()
    }

    /// Ends the monitor loop after the current cycle. Irreversible.
    pub fn request_shutdown(&self) {
        if !self.shutdown.swap(true, Ordering::SeqCst) {
            info!("Shutdown requested");
        }
        self.running.store(false, Ordering::SeqCst);
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }
}
