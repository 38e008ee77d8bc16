//! Fan-out/fan-in of region workers for one cycle.
//!
//! One long-lived thread per region slot, each owning its worker and OCR
//! engine. A cycle sends every idle slot a job, then collects events until
//! all slots reported or the deadline passed. Results are placed by region
//! index, so completion order never matters, and any slot that did not
//! report in time is filled with a `CycleTimeout` entry.

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Local};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use super::queue::{create_event_queue, create_job_queue, Job, SlotEvent};
use super::worker::{RegionResult, RegionWorker};
use crate::capture::CaptureGate;

/// Timestamped results of one cycle, one entry per configured region in
/// configuration order.
#[derive(Debug, Clone)]
pub struct CycleResult {
    pub cycle: u64,
    pub timestamp: DateTime<Local>,
    pub results: Vec<RegionResult>,
}

impl CycleResult {
    pub fn values(&self) -> Vec<Option<u64>> {
        self.results.iter().map(RegionResult::value).collect()
    }

    pub fn absent_count(&self) -> usize {
        self.results.iter().filter(|r| r.is_absent()).count()
    }

    /// Logs every region's value, or `unrecognized` with the failure kind.
    pub fn log_summary(&self) {
        for result in &self.results {
            match &result.outcome {
                Ok(value) => info!(
                    "cycle {} {}: {} ({} ms)",
                    self.cycle,
                    result.name,
                    value,
                    result.elapsed.as_millis()
                ),
                Err(e) => info!(
                    "cycle {} {}: unrecognized [{}] {}",
                    self.cycle,
                    result.name,
                    e.kind(),
                    e
                ),
            }
        }
        let absent = self.absent_count();
        if absent > 0 {
            info!(
                "cycle {}: {} of {} regions unrecognized",
                self.cycle,
                absent,
                self.results.len()
            );
        }
    }
}

struct WorkerSlot {
    name: String,
    jobs: Sender<Job>,
    /// Set by the collector when a job is sent, cleared by the slot thread
    /// once the job is done.
    busy: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

/// Runs every region worker concurrently and assembles cycle results.
pub struct ParallelCollector {
    slots: Vec<WorkerSlot>,
    events: Receiver<SlotEvent>,
    gate: Arc<CaptureGate>,
    timeout: Duration,
    last_cycle: u64,
}

impl ParallelCollector {
    /// Spawns one slot thread per worker. Worker `i` must be region `i`.
    pub fn new(
        workers: Vec<RegionWorker>,
        gate: Arc<CaptureGate>,
        timeout: Duration,
    ) -> Result<Self> {
        let (event_sender, events) = create_event_queue();
        let mut slots = Vec::with_capacity(workers.len());

        for (index, worker) in workers.into_iter().enumerate() {
            if worker.region().index != index {
                return Err(anyhow!(
                    "Worker for '{}' has index {} but is in slot {}",
                    worker.region().name,
                    worker.region().index,
                    index
                ));
            }

            let name = worker.region().name.clone();
            let (jobs, job_receiver) = create_job_queue();
            let busy = Arc::new(AtomicBool::new(false));

            let slot_gate = gate.clone();
            let slot_events = event_sender.clone();
            let slot_busy = busy.clone();
            let handle = thread::Builder::new()
                .name(format!("region-{index}"))
                .spawn(move || {
                    run_slot(index, worker, slot_gate, job_receiver, slot_events, slot_busy)
                })
                .with_context(|| format!("Failed to spawn worker thread for '{name}'"))?;

            slots.push(WorkerSlot {
                name,
                jobs,
                busy,
                handle,
            });
        }

        Ok(Self {
            slots,
            events,
            gate,
            timeout,
            last_cycle: 0,
        })
    }

    pub fn gate(&self) -> &Arc<CaptureGate> {
        &self.gate
    }

    /// Runs one cycle.
    ///
    /// `after_captures` runs exactly once, as soon as every region has been
    /// grabbed (or has given up on grabbing), typically well before OCR is
    /// done. If the deadline passes first it runs then.
    pub fn run_cycle<F: FnOnce()>(&mut self, after_captures: F) -> CycleResult {
        self.last_cycle += 1;
        let cycle = self.last_cycle;
        let timestamp = Local::now();
        let started = Instant::now();
        let deadline = started + self.timeout;

        let count = self.slots.len();
        let mut results: Vec<Option<RegionResult>> = (0..count).map(|_| None).collect();
        let mut captured = vec![false; count];
        let mut after_captures = Some(after_captures);

        for (index, slot) in self.slots.iter().enumerate() {
            if slot.busy.swap(true, Ordering::SeqCst) {
                // No pipelining: a slot's engine only ever serves one cycle at a time.
                warn!(
                    "cycle {}: {} is still busy with an earlier cycle",
                    cycle, slot.name
                );
                self.gate.release(cycle, index);
                captured[index] = true;
                continue;
            }
            if slot.jobs.send(Job { cycle, deadline }).is_err() {
                error!("cycle {}: worker for {} has exited", cycle, slot.name);
                slot.busy.store(false, Ordering::SeqCst);
                self.gate.release(cycle, index);
                captured[index] = true;
            }
        }

        loop {
            if after_captures.is_some() && captured.iter().all(|&c| c) {
                if let Some(callback) = after_captures.take() {
                    debug!("cycle {}: all regions captured", cycle);
                    callback();
                }
            }
            if results.iter().all(Option::is_some) {
                break;
            }

            let now = Instant::now();
            if now >= deadline {
                break;
            }

            match self.events.recv_timeout(deadline - now) {
                Ok(SlotEvent::Captured { cycle: c, slot }) if c == cycle => {
                    if let Some(flag) = captured.get_mut(slot) {
                        *flag = true;
                    }
                }
                Ok(SlotEvent::Finished { cycle: c, result }) if c == cycle => {
                    let index = result.index;
                    if index < count {
                        captured[index] = true;
                        results[index] = Some(result);
                    }
                }
                Ok(stale) => debug!(
                    "cycle {}: dropping stale event from cycle {}",
                    cycle,
                    stale.cycle()
                ),
                Err(RecvTimeoutError::Timeout) => break,
                Err(RecvTimeoutError::Disconnected) => {
                    error!("cycle {}: all region workers have exited", cycle);
                    break;
                }
            }
        }

        if let Some(callback) = after_captures.take() {
            warn!("cycle {}: deadline passed before every region was captured", cycle);
            callback();
        }

        let waited = started.elapsed();
        let results = results
            .into_iter()
            .enumerate()
            .map(|(index, result)| {
                result.unwrap_or_else(|| {
                    RegionResult::timed_out(index, &self.slots[index].name, waited)
                })
            })
            .collect();

        CycleResult {
            cycle,
            timestamp,
            results,
        }
    }

    /// Closes every job queue and waits for the slot threads to finish
    /// their current job.
    pub fn shutdown(self) {
        let ParallelCollector { slots, .. } = self;
        let mut handles = Vec::with_capacity(slots.len());
        for slot in slots {
            drop(slot.jobs);
            handles.push((slot.name, slot.handle));
        }
        for (name, handle) in handles {
            if handle.join().is_err() {
                error!("Worker thread for {} panicked", name);
            }
        }
        debug!("All region workers stopped");
    }
}

/// Slot thread body: serves jobs until the collector drops the queue.
fn run_slot(
    index: usize,
    mut worker: RegionWorker,
    gate: Arc<CaptureGate>,
    jobs: Receiver<Job>,
    events: Sender<SlotEvent>,
    busy: Arc<AtomicBool>,
) {
    debug!("worker {} ({}) started", index, worker.region().name);

    for job in jobs {
        if Instant::now() >= job.deadline {
            // Picked up too late; do not hold up later regions at the gate.
            gate.release(job.cycle, index);
            busy.store(false, Ordering::SeqCst);
            continue;
        }

        let result = worker.extract(&gate, job.cycle, job.deadline, || {
            let _ = events.send(SlotEvent::Captured {
                cycle: job.cycle,
                slot: index,
            });
        });
        busy.store(false, Ordering::SeqCst);

        let finished = SlotEvent::Finished {
            cycle: job.cycle,
            result,
        };
        if events.send(finished).is_err() {
            break;
        }
    }

    debug!("worker {} ({}) finished", index, worker.region().name);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{ImageFileCapture, RegionRect};
    use crate::error::ExtractError;
    use crate::monitor::worker::RegionSpec;
    use crate::ocr::{Bounds, Detection, OcrAdapter, Recognizer, ValueKind};
    use image::RgbImage;
    use std::path::PathBuf;
    use std::sync::Mutex;

    /// Test engine with scripted output, delays, and an optional panic.
    struct Stub {
        slot: usize,
        detections: Vec<Detection>,
        first_delay: Duration,
        delay: Duration,
        panic_first: bool,
        calls: usize,
        finished: Arc<Mutex<Vec<usize>>>,
    }

    impl Stub {
        fn new(slot: usize, text: Option<(&str, f32)>, finished: &Arc<Mutex<Vec<usize>>>) -> Self {
            Self {
                slot,
                detections: text
                    .map(|(t, c)| vec![Detection::from_rect(t, c, 0.0, 0.0, 40.0, 12.0)])
                    .unwrap_or_default(),
                first_delay: Duration::ZERO,
                delay: Duration::ZERO,
                panic_first: false,
                calls: 0,
                finished: finished.clone(),
            }
        }

        fn delayed(mut self, delay: Duration) -> Self {
            self.delay = delay;
            self.first_delay = delay;
            self
        }

        fn slow_first(mut self, delay: Duration) -> Self {
            self.first_delay = delay;
            self
        }

        fn panicking_first(mut self) -> Self {
            self.panic_first = true;
            self
        }
    }

    impl Recognizer for Stub {
        fn recognize(&mut self, _image: &RgbImage) -> Result<Vec<Detection>, ExtractError> {
            self.calls += 1;
            if self.panic_first && self.calls == 1 {
                panic!("engine crashed");
            }
            let delay = if self.calls == 1 {
                self.first_delay
            } else {
                self.delay
            };
            thread::sleep(delay);
            self.finished.lock().unwrap().push(self.slot);
            Ok(self.detections.clone())
        }

        fn name(&self) -> &str {
            "stub"
        }
    }

    fn collector(stubs: Vec<Stub>, timeout: Duration) -> ParallelCollector {
        let frame = RgbImage::new(300, 100);
        let gate = Arc::new(CaptureGate::new(Box::new(ImageFileCapture::from_image(
            PathBuf::from("synthetic.png"),
            frame,
        ))));

        let workers = stubs
            .into_iter()
            .enumerate()
            .map(|(index, stub)| {
                let left = index as f64 * 100.0 + 10.0;
                let spec = RegionSpec {
                    index,
                    name: format!("region{index}"),
                    kind: ValueKind::Price,
                    rect: RegionRect::Corners([left, 10.0, left + 50.0, 30.0]),
                    bounds: Bounds::PRICE,
                };
                RegionWorker::new(spec, OcrAdapter::new(Box::new(stub), 0.0))
            })
            .collect();

        ParallelCollector::new(workers, gate, timeout).unwrap()
    }

    #[test]
    fn test_results_follow_region_order_not_completion_order() {
        let finished = Arc::new(Mutex::new(Vec::new()));
        let mut collector = collector(
            vec![
                Stub::new(0, Some(("1,234", 0.9)), &finished).delayed(Duration::from_millis(200)),
                Stub::new(1, Some(("O12.000", 0.8)), &finished).delayed(Duration::from_millis(80)),
                Stub::new(2, None, &finished),
            ],
            Duration::from_secs(5),
        );

        let cycle = collector.run_cycle(|| {});

        assert_eq!(*finished.lock().unwrap(), vec![2, 1, 0]);
        assert_eq!(cycle.values(), vec![Some(1234), Some(12000), None]);
        assert_eq!(cycle.results.len(), 3);
        assert_eq!(cycle.absent_count(), 1);
        let indices: Vec<usize> = cycle.results.iter().map(|r| r.index).collect();
        assert_eq!(indices, [0, 1, 2]);
        assert_eq!(
            cycle.results[2].outcome.as_ref().unwrap_err().kind(),
            "RecognitionFailed"
        );
        collector.shutdown();
    }

    #[test]
    fn test_slow_region_times_out_and_stale_result_is_dropped() {
        let finished = Arc::new(Mutex::new(Vec::new()));
        let mut collector = collector(
            vec![
                Stub::new(0, Some(("500", 0.9)), &finished),
                Stub::new(1, Some(("600", 0.9)), &finished),
                Stub::new(2, Some(("700", 0.9)), &finished).slow_first(Duration::from_millis(400)),
            ],
            Duration::from_millis(150),
        );

        let first = collector.run_cycle(|| {});
        assert_eq!(first.results.len(), 3);
        assert_eq!(first.values(), vec![Some(500), Some(600), None]);
        assert_eq!(
            first.results[2].outcome.as_ref().unwrap_err().kind(),
            "CycleTimeout"
        );

        // Let the slow slot finish; its cycle-1 result must not leak into cycle 2.
        thread::sleep(Duration::from_millis(500));
        let second = collector.run_cycle(|| {});
        assert_eq!(second.cycle, first.cycle + 1);
        assert_eq!(second.values(), vec![Some(500), Some(600), Some(700)]);
        assert_eq!(second.absent_count(), 0);
        collector.shutdown();
    }

    #[test]
    fn test_busy_slot_is_not_pipelined() {
        let finished = Arc::new(Mutex::new(Vec::new()));
        let mut collector = collector(
            vec![
                Stub::new(0, Some(("800", 0.9)), &finished).slow_first(Duration::from_millis(400)),
                Stub::new(1, Some(("900", 0.9)), &finished),
            ],
            Duration::from_millis(100),
        );

        let first = collector.run_cycle(|| {});
        assert_eq!(first.values(), vec![None, Some(900)]);

        // Slot 0 is still inside its first recognition.
        let second = collector.run_cycle(|| {});
        assert_eq!(second.values(), vec![None, Some(900)]);
        assert_eq!(
            second.results[0].outcome.as_ref().unwrap_err().kind(),
            "CycleTimeout"
        );
        collector.shutdown();
    }

    #[test]
    fn test_panicking_engine_only_affects_its_region() {
        let finished = Arc::new(Mutex::new(Vec::new()));
        let mut collector = collector(
            vec![
                Stub::new(0, Some(("1,000", 0.9)), &finished).panicking_first(),
                Stub::new(1, Some(("2,000", 0.9)), &finished),
            ],
            Duration::from_secs(5),
        );

        let first = collector.run_cycle(|| {});
        assert_eq!(first.values(), vec![None, Some(2000)]);
        assert_eq!(
            first.results[0].outcome.as_ref().unwrap_err().kind(),
            "RecognitionFailed"
        );

        // The slot thread survived and serves the next cycle.
        let second = collector.run_cycle(|| {});
        assert_eq!(second.values(), vec![Some(1000), Some(2000)]);
        collector.shutdown();
    }

    #[test]
    fn test_after_captures_runs_before_ocr_completes() {
        let finished = Arc::new(Mutex::new(Vec::new()));
        let mut collector = collector(
            vec![
                Stub::new(0, Some(("100", 0.9)), &finished).delayed(Duration::from_millis(300)),
                Stub::new(1, Some(("200", 0.9)), &finished).delayed(Duration::from_millis(300)),
            ],
            Duration::from_secs(5),
        );

        let ran_at = Mutex::new(None);
        let cycle = collector.run_cycle(|| {
            *ran_at.lock().unwrap() = Some(Instant::now());
        });
        let returned_at = Instant::now();

        assert_eq!(cycle.values(), vec![Some(100), Some(200)]);
        let ran_at = ran_at.lock().unwrap().expect("after_captures did not run");
        assert!(returned_at.duration_since(ran_at) >= Duration::from_millis(150));
        collector.shutdown();
    }

    #[test]
    fn test_worker_index_must_match_slot() {
        let finished = Arc::new(Mutex::new(Vec::new()));
        let gate = Arc::new(CaptureGate::new(Box::new(ImageFileCapture::from_image(
            PathBuf::from("synthetic.png"),
            RgbImage::new(10, 10),
        ))));
        let spec = RegionSpec {
            index: 3,
            name: "misplaced".to_string(),
            kind: ValueKind::Price,
            rect: RegionRect::Corners([1.0, 1.0, 5.0, 5.0]),
            bounds: Bounds::PRICE,
        };
        let worker = RegionWorker::new(
            spec,
            OcrAdapter::new(Box::new(Stub::new(0, None, &finished)), 0.0),
        );
        assert!(ParallelCollector::new(vec![worker], gate, Duration::from_secs(1)).is_err());
    }
}
