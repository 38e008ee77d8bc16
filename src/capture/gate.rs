//! Ordered access to a shared capture backend.
//!
//! Within one cycle, region N may only be grabbed after every region before
//! it has been grabbed or given up. A newer cycle resets the order; workers
//! still waiting on an older cycle are turned away.

use std::collections::BTreeSet;
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::Instant;
use tracing::trace;

use super::region::RegionRect;
use super::{CaptureFrame, ScreenCapture};
use crate::error::ExtractError;

#[derive(Default)]
struct Turn {
    cycle: u64,
    released: BTreeSet<usize>,
}

impl Turn {
    fn sync(&mut self, cycle: u64) {
        if cycle > self.cycle {
            self.cycle = cycle;
            self.released.clear();
        }
    }

    fn is_ready(&self, index: usize) -> bool {
        (0..index).all(|i| self.released.contains(&i))
    }
}

/// Serializes grabs on one backend in region order.
pub struct CaptureGate {
    backend: Mutex<Box<dyn ScreenCapture>>,
    turn: Mutex<Turn>,
    turn_changed: Condvar,
}

/// Holds a region's turn; dropping it lets the next region go.
pub struct TurnGuard<'a> {
    gate: &'a CaptureGate,
    cycle: u64,
    index: usize,
}

impl Drop for TurnGuard<'_> {
    fn drop(&mut self) {
        self.gate.release(self.cycle, self.index);
    }
}

impl CaptureGate {
    pub fn new(backend: Box<dyn ScreenCapture>) -> Self {
        Self {
            backend: Mutex::new(backend),
            turn: Mutex::new(Turn::default()),
            turn_changed: Condvar::new(),
        }
    }

    // A panicking backend must not wedge every later capture.
    fn lock_backend(&self) -> MutexGuard<'_, Box<dyn ScreenCapture>> {
        self.backend.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_turn(&self) -> MutexGuard<'_, Turn> {
        self.turn.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn backend_name(&self) -> String {
        self.lock_backend().name().to_string()
    }

    pub fn screen_size(&self) -> Result<(u32, u32), ExtractError> {
        self.lock_backend().screen_size()
    }

    /// Marks region `index` of `cycle` as done with the backend.
    ///
    /// Also used by the collector for slots that will not capture at all.
    pub fn release(&self, cycle: u64, index: usize) {
        let mut turn = self.lock_turn();
        turn.sync(cycle);
        if turn.cycle == cycle {
            turn.released.insert(index);
        }
        drop(turn);
        self.turn_changed.notify_all();
    }

    /// Blocks until every earlier region of `cycle` is released.
    ///
    /// Gives up at `deadline`, releasing `index` so later regions are not
    /// held back by this one.
    pub fn wait_turn(
        &self,
        cycle: u64,
        index: usize,
        deadline: Instant,
    ) -> Result<TurnGuard<'_>, ExtractError> {
        let mut turn = self.lock_turn();
        turn.sync(cycle);

        loop {
            if turn.cycle != cycle {
                return Err(ExtractError::CaptureFailed(format!(
                    "cycle {} was superseded by cycle {}",
                    cycle, turn.cycle
                )));
            }
            if turn.is_ready(index) {
                return Ok(TurnGuard {
                    gate: self,
                    cycle,
                    index,
                });
            }

            let now = Instant::now();
            if now >= deadline {
                drop(turn);
                self.release(cycle, index);
                return Err(ExtractError::CaptureFailed(format!(
                    "timed out waiting for earlier regions in cycle {}",
                    cycle
                )));
            }

            turn = match self.turn_changed.wait_timeout(turn, deadline - now) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
    }

    /// Waits for the region's turn, then resolves and captures it.
    pub fn capture_region(
        &self,
        cycle: u64,
        index: usize,
        rect: &RegionRect,
        deadline: Instant,
    ) -> Result<CaptureFrame, ExtractError> {
        let _turn = self.wait_turn(cycle, index, deadline)?;
        let mut backend = self.lock_backend();
        let (width, height) = backend.screen_size()?;
        let absolute = rect.resolve(width, height)?;
        trace!("cycle {} region {}: grabbing {}", cycle, index, absolute);
        let image = backend.capture(absolute)?;
        Ok(CaptureFrame {
            region: index,
            rect: absolute,
            captured_at: Instant::now(),
            image,
        })
    }
}
