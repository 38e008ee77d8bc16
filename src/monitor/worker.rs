//! Per-region extraction: capture, recognize, parse.
//!
//! Every failure, including a panic inside the OCR engine, stops at this
//! boundary and becomes an absent value for this region only.

use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::capture::{CaptureFrame, CaptureGate, RegionRect};
use crate::error::ExtractError;
use crate::ocr::{Bounds, OcrAdapter, ValueKind};

/// Worker state machine states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Idle,
    Capturing,
    Recognizing,
    Parsing,
    Done,
    Failed,
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkerState::Idle => write!(f, "Idle"),
            WorkerState::Capturing => write!(f, "Capturing"),
            WorkerState::Recognizing => write!(f, "Recognizing"),
            WorkerState::Parsing => write!(f, "Parsing"),
            WorkerState::Done => write!(f, "Done"),
            WorkerState::Failed => write!(f, "Failed"),
        }
    }
}

/// What a worker extracts and where.
#[derive(Debug, Clone)]
pub struct RegionSpec {
    /// Position in the configured region list.
    pub index: usize,
    pub name: String,
    pub kind: ValueKind,
    pub rect: RegionRect,
    pub bounds: Bounds,
}

/// Outcome of one worker invocation. Immutable once produced.
#[derive(Debug, Clone, PartialEq)]
pub struct RegionResult {
    pub index: usize,
    pub name: String,
    pub outcome: Result<u64, ExtractError>,
    pub elapsed: Duration,
    pub state: WorkerState,
}

impl RegionResult {
    /// Placeholder for a region that did not report before the deadline.
    pub fn timed_out(index: usize, name: &str, waited: Duration) -> Self {
        Self {
            index,
            name: name.to_string(),
            outcome: Err(ExtractError::CycleTimeout { waited }),
            elapsed: waited,
            state: WorkerState::Failed,
        }
    }

    pub fn value(&self) -> Option<u64> {
        self.outcome.as_ref().ok().copied()
    }

    pub fn is_absent(&self) -> bool {
        self.outcome.is_err()
    }
}

/// Extracts one region's value using its own long-lived OCR engine.
pub struct RegionWorker {
    region: RegionSpec,
    ocr: OcrAdapter,
    state: WorkerState,
    capture_dir: Option<PathBuf>,
}

impl RegionWorker {
    pub fn new(region: RegionSpec, ocr: OcrAdapter) -> Self {
        Self {
            region,
            ocr,
            state: WorkerState::Idle,
            capture_dir: None,
        }
    }

    /// Saves every capture as `<dir>/<cycle>_<region>.png`.
    pub fn with_capture_dir(mut self, dir: PathBuf) -> Self {
        self.capture_dir = Some(dir);
        self
    }

    pub fn region(&self) -> &RegionSpec {
        &self.region
    }

    pub fn state(&self) -> WorkerState {
        self.state
    }

    /// Runs one extraction for `cycle`.
    ///
    /// `on_captured` fires exactly once, as soon as this region is done
    /// with the capture backend, whether or not the grab succeeded.
    pub fn extract<F: FnOnce()>(
        &mut self,
        gate: &CaptureGate,
        cycle: u64,
        deadline: Instant,
        on_captured: F,
    ) -> RegionResult {
        let started = Instant::now();
        self.state = WorkerState::Idle;
        let mut notify = Some(on_captured);

        let run = panic::catch_unwind(AssertUnwindSafe(|| {
            self.run_stages(gate, cycle, deadline, &mut notify)
        }));
        let outcome = match run {
            Ok(outcome) => outcome,
            Err(payload) => Err(self.panic_error(payload.as_ref())),
        };

        if let Some(notify) = notify.take() {
            notify();
        }

        self.state = if outcome.is_ok() {
            WorkerState::Done
        } else {
            WorkerState::Failed
        };

        RegionResult {
            index: self.region.index,
            name: self.region.name.clone(),
            outcome,
            elapsed: started.elapsed(),
            state: self.state,
        }
    }

    fn run_stages<F: FnOnce()>(
        &mut self,
        gate: &CaptureGate,
        cycle: u64,
        deadline: Instant,
        notify: &mut Option<F>,
    ) -> Result<u64, ExtractError> {
        self.state = WorkerState::Capturing;
        let captured = gate.capture_region(cycle, self.region.index, &self.region.rect, deadline);
        if let Some(notify) = notify.take() {
            notify();
        }
        let frame = captured?;
        debug!(
            "{} ({}): captured {} in cycle {}",
            self.region.name, self.region.kind, frame.rect, cycle
        );
        self.save_capture(cycle, &frame);

        self.state = WorkerState::Recognizing;
        let detections = self.ocr.recognize(&frame.image)?;
        let captured_at = frame.captured_at;
        drop(frame);

        self.state = WorkerState::Parsing;
        let reading = self.ocr.select(&detections, self.region.bounds)?;
        debug!(
            "{} ({}): '{}' -> {} via {}, {} ms after capture",
            self.region.name,
            self.region.kind,
            reading.text,
            reading.value,
            reading.rule,
            captured_at.elapsed().as_millis()
        );
        Ok(reading.value)
    }

    fn save_capture(&self, cycle: u64, frame: &CaptureFrame) {
        let Some(dir) = &self.capture_dir else {
            return;
        };
        let path = dir.join(format!("{:06}_{}.png", cycle, self.region.name));
        if let Err(e) = frame.image.save(&path) {
            warn!("Failed to save capture {}: {}", path.display(), e);
        }
    }

    /// Maps a panic to the error kind of the stage it happened in.
    fn panic_error(&self, payload: &(dyn Any + Send)) -> ExtractError {
        let msg = if let Some(s) = payload.downcast_ref::<&str>() {
            s.to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "unknown panic".to_string()
        };
        warn!(
            "{}: panic while {}: {}",
            self.region.name, self.state, msg
        );

        let msg = format!("panic: {msg}");
        match self.state {
            WorkerState::Recognizing => ExtractError::RecognitionFailed(msg),
            WorkerState::Parsing => ExtractError::rejected("", msg),
            _ => ExtractError::CaptureFailed(msg),
        }
    }
}
