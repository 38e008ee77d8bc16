//! Monitor loop: trigger, actions, parallel extraction, persistence.
//!
//! One cycle is: run `before_capture` actions, wait for the UI to settle,
//! fan out to every region worker, run `after_capture` actions as soon as
//! all regions are grabbed, then hand the finished row to the sink.

use anyhow::{Context, Result};
use std::fs;
use std::io::{self, BufRead};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use super::actions::{run_actions, ActionContext};
use super::collector::{CycleResult, ParallelCollector};
use super::config::{ActionsConfig, MonitorConfig, Trigger};
use super::input::{default_driver, InputDriver};
use super::lifecycle::Lifecycle;
use super::sink::{CsvSink, ResultSink};
use super::worker::{RegionSpec, RegionWorker};
use crate::capture::{open_backend, CaptureGate, RegionRect};
use crate::ocr::{setup, OcrAdapter, TesseractRecognizer};

/// How often a paused or waiting loop checks for shutdown.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

pub struct Monitor {
    collector: ParallelCollector,
    sink: Box<dyn ResultSink>,
    driver: Box<dyn InputDriver>,
    actions: ActionsConfig,
    trigger: Trigger,
    settle_delay: Duration,
    row_label: String,
    target_cell: Option<RegionRect>,
}

impl Monitor {
    /// Builds the full pipeline from configuration: capture backend,
    /// one Tesseract engine per region, CSV sink, and platform input.
    pub fn from_config(config: &MonitorConfig) -> Result<Self> {
        let backend = open_backend(&config.capture).context("Failed to open capture backend")?;
        let gate = Arc::new(CaptureGate::new(backend));
        info!("Capture backend: {}", gate.backend_name());

        let tesseract = &config.ocr.tesseract;
        let paths = setup::resolve(
            tesseract.executable.as_deref(),
            tesseract.tessdata_dir.as_deref(),
            &tesseract.language,
        )?;

        let capture_dir = if config.output.save_captures {
            let dir = crate::paths::get_captures_dir();
            fs::create_dir_all(&dir)
                .with_context(|| format!("Failed to create {}", dir.display()))?;
            info!("Saving captures to {}", dir.display());
            Some(dir)
        } else {
            None
        };

        let workers = config
            .regions
            .iter()
            .enumerate()
            .map(|(index, region)| {
                let spec = RegionSpec {
                    index,
                    name: region.name.clone(),
                    kind: region.kind,
                    rect: region.rect,
                    bounds: config.bounds.for_kind(region.kind),
                };
                let recognizer = TesseractRecognizer::new(paths.clone(), tesseract.clone());
                let ocr = OcrAdapter::new(Box::new(recognizer), config.ocr.min_confidence);
                let worker = RegionWorker::new(spec, ocr);
                match &capture_dir {
                    Some(dir) => worker.with_capture_dir(dir.clone()),
                    None => worker,
                }
            })
            .collect();

        let csv_path = crate::paths::resolve_output_path(&config.output.csv_path);
        info!("Results CSV: {}", csv_path.display());
        let sink = CsvSink::new(
            csv_path,
            config.region_names(),
            config.output.absent_marker.clone(),
        );

        Self::from_parts(config, workers, gate, Box::new(sink), default_driver())
    }

    /// Assembles a monitor from prebuilt parts.
    pub fn from_parts(
        config: &MonitorConfig,
        workers: Vec<RegionWorker>,
        gate: Arc<CaptureGate>,
        sink: Box<dyn ResultSink>,
        driver: Box<dyn InputDriver>,
    ) -> Result<Self> {
        let collector = ParallelCollector::new(workers, gate, config.cycle.timeout())?;
        Ok(Self {
            collector,
            sink,
            driver,
            actions: config.actions.clone(),
            trigger: config.cycle.trigger,
            settle_delay: Duration::from_millis(config.cycle.settle_delay_ms),
            row_label: config.row_label(),
            target_cell: config
                .grid
                .as_ref()
                .and_then(|grid| grid.target_cell().copied()),
        })
    }

    fn action_context(&self) -> ActionContext {
        let screen = match self.collector.gate().screen_size() {
            Ok(size) => Some(size),
            Err(e) => {
                warn!("Screen size unavailable for actions: {}", e);
                None
            }
        };
        let target = match (&self.target_cell, screen) {
            (Some(cell), Some((width, height))) => match cell.resolve(width, height) {
                Ok(rect) => Some((
                    (rect.x + rect.width / 2) as i32,
                    (rect.y + rect.height / 2) as i32,
                )),
                Err(e) => {
                    warn!("Grid target cell cannot be resolved: {}", e);
                    None
                }
            },
            _ => None,
        };
        ActionContext { screen, target }
    }

    /// Runs one cycle and writes its row.
    pub fn run_once(&mut self) -> CycleResult {
        let ctx = self.action_context();

        if !self.actions.before_capture.is_empty() {
            run_actions(&self.actions.before_capture, self.driver.as_mut(), &ctx);
            thread::sleep(self.settle_delay);
        }

        let after_capture = &self.actions.after_capture;
        let driver = &mut self.driver;
        let cycle = self
            .collector
            .run_cycle(|| run_actions(after_capture, driver.as_mut(), &ctx));

        cycle.log_summary();
        self.sink.emit(&self.row_label, &cycle);
        cycle
    }

    /// Runs cycles while `lifecycle` allows, up to `max_cycles` if given.
    /// Returns the number of completed cycles.
    pub fn run(&mut self, lifecycle: &Lifecycle, max_cycles: Option<u64>) -> u64 {
        let mut completed = 0;
        let mut next_start = Instant::now();

        while !lifecycle.is_shutdown() {
            if max_cycles.is_some_and(|max| completed >= max) {
                break;
            }
            if !lifecycle.is_running() {
                thread::sleep(POLL_INTERVAL);
                next_start = Instant::now();
                continue;
            }

            if let Trigger::IntervalMs(ms) = self.trigger {
                let now = Instant::now();
                if now < next_start {
                    thread::sleep((next_start - now).min(POLL_INTERVAL));
                    continue;
                }
                let period = Duration::from_millis(ms);
                next_start += period;
                if next_start < now {
                    debug!("Cycle overran its interval; skipping missed slots");
                    next_start = now + period;
                }
            }

            self.run_once();
            completed += 1;
        }

        info!("Monitor stopped after {} cycles", completed);
        completed
    }

    /// Stops the region workers.
    pub fn shutdown(self) {
        self.collector.shutdown();
    }
}

/// Applies one stdin command. Returns false for unknown input.
pub fn apply_command(line: &str, lifecycle: &Lifecycle) -> bool {
    match line.trim() {
        "p" | "pause" | "resume" => {
            lifecycle.toggle();
            true
        }
        "q" | "quit" => {
            lifecycle.request_shutdown();
            true
        }
        _ => false,
    }
}

/// Reads `p` (pause/resume) and `q` (quit) commands from stdin.
pub fn spawn_stdin_control(lifecycle: Lifecycle) -> Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("stdin-control".to_string())
        .spawn(move || {
            for line in io::stdin().lock().lines() {
                let Ok(line) = line else {
                    break;
                };
                if line.trim().is_empty() {
                    continue;
                }
                if !apply_command(&line, &lifecycle) {
                    warn!("Unknown command '{}' (p = pause/resume, q = quit)", line.trim());
                }
                if lifecycle.is_shutdown() {
                    break;
                }
            }
            debug!("stdin control finished");
        })
        .context("Failed to spawn stdin control thread")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::ImageFileCapture;
    use crate::error::ExtractError;
    use crate::monitor::actions::Action;
    use crate::monitor::config::{GridConfig, GridTarget, RegionConfig};
    use crate::monitor::input::Key;
    use crate::ocr::{Bounds, Detection, Recognizer, ValueKind};
    use image::RgbImage;
    use std::path::PathBuf;
    use std::sync::Mutex;

    struct Fixed(&'static str);

    impl Recognizer for Fixed {
        fn recognize(&mut self, _image: &RgbImage) -> Result<Vec<Detection>, ExtractError> {
            Ok(vec![Detection::from_rect(self.0, 0.9, 0.0, 0.0, 30.0, 10.0)])
        }

        fn name(&self) -> &str {
            "fixed"
        }
    }

    #[derive(Clone, Default)]
    struct Rows(Arc<Mutex<Vec<(String, Vec<Option<u64>>)>>>);

    impl ResultSink for Rows {
        fn emit(&mut self, row_label: &str, cycle: &CycleResult) {
            self.0
                .lock()
                .unwrap()
                .push((row_label.to_string(), cycle.values()));
        }
    }

    #[derive(Clone, Default)]
    struct Inputs(Arc<Mutex<Vec<String>>>);

    impl InputDriver for Inputs {
        fn move_to(&mut self, x: i32, y: i32) {
            self.0.lock().unwrap().push(format!("move {x},{y}"));
        }

        fn click(&mut self, x: i32, y: i32) {
            self.0.lock().unwrap().push(format!("click {x},{y}"));
        }

        fn press(&mut self, key: Key) {
            self.0.lock().unwrap().push(format!("press {key}"));
        }
    }

    fn config() -> MonitorConfig {
        let mut config = MonitorConfig::default();
        config.regions = vec![
            RegionConfig {
                name: "price".to_string(),
                kind: ValueKind::Price,
                rect: RegionRect::Corners([10.0, 10.0, 60.0, 30.0]),
            },
            RegionConfig {
                name: "qty".to_string(),
                kind: ValueKind::Quantity,
                rect: RegionRect::Corners([100.0, 10.0, 150.0, 30.0]),
            },
        ];
        config.cycle.settle_delay_ms = 0;
        config
    }

    fn monitor(config: &MonitorConfig, texts: [&'static str; 2]) -> (Monitor, Rows, Inputs) {
        let gate = Arc::new(CaptureGate::new(Box::new(ImageFileCapture::from_image(
            PathBuf::from("screen.png"),
            RgbImage::new(200, 100),
        ))));
        let workers = config
            .regions
            .iter()
            .zip(texts)
            .enumerate()
            .map(|(index, (region, text))| {
                let spec = RegionSpec {
                    index,
                    name: region.name.clone(),
                    kind: region.kind,
                    rect: region.rect,
                    bounds: match region.kind {
                        ValueKind::Price => Bounds::PRICE,
                        ValueKind::Quantity => Bounds::QUANTITY,
                    },
                };
                RegionWorker::new(spec, OcrAdapter::new(Box::new(Fixed(text)), 0.0))
            })
            .collect();

        let rows = Rows::default();
        let inputs = Inputs::default();
        let monitor = Monitor::from_parts(
            config,
            workers,
            gate,
            Box::new(rows.clone()),
            Box::new(inputs.clone()),
        )
        .unwrap();
        (monitor, rows, inputs)
    }

    #[test]
    fn test_run_once_runs_actions_and_emits_row() {
        let config = config();
        let (mut monitor, rows, inputs) = monitor(&config, ["1,234", "7"]);

        let cycle = monitor.run_once();

        assert_eq!(cycle.values(), vec![Some(1234), Some(7)]);
        assert_eq!(
            *rows.0.lock().unwrap(),
            vec![("all".to_string(), vec![Some(1234), Some(7)])]
        );
        assert_eq!(*inputs.0.lock().unwrap(), ["click 440,220", "press Esc"]);
        monitor.shutdown();
    }

    #[test]
    fn test_grid_target_labels_row_and_is_clickable() {
        let mut config = config();
        config.grid = Some(GridConfig {
            cells: vec![
                vec![RegionRect::Corners([0.0, 0.0, 20.0, 20.0])],
                vec![RegionRect::Corners([0.0, 40.0, 20.0, 60.0])],
            ],
            target: GridTarget { row: 1, col: 0 },
        });
        config.actions.before_capture = vec![Action::ClickTarget];
        config.actions.after_capture = vec![];
        let (mut monitor, rows, inputs) = monitor(&config, ["500", "x"]);

        monitor.run_once();

        let rows = rows.0.lock().unwrap();
        assert_eq!(rows[0].0, "R2C1");
        assert_eq!(rows[0].1, vec![Some(500), None]);
        assert_eq!(*inputs.0.lock().unwrap(), ["click 10,50"]);
        monitor.shutdown();
    }

    #[test]
    fn test_run_stops_at_max_cycles() {
        let config = config();
        let (mut monitor, rows, _) = monitor(&config, ["100", "1"]);
        let lifecycle = Lifecycle::new();
        lifecycle.start();

        assert_eq!(monitor.run(&lifecycle, Some(3)), 3);
        assert_eq!(rows.0.lock().unwrap().len(), 3);
        monitor.shutdown();
    }

    #[test]
    fn test_interval_trigger_spaces_cycles() {
        let mut config = config();
        config.cycle.trigger = Trigger::IntervalMs(100);
        let (mut monitor, _, _) = monitor(&config, ["100", "1"]);
        let lifecycle = Lifecycle::new();
        lifecycle.start();

        let started = Instant::now();
        assert_eq!(monitor.run(&lifecycle, Some(3)), 3);
        assert!(started.elapsed() >= Duration::from_millis(200));
        monitor.shutdown();
    }

    #[test]
    fn test_paused_monitor_exits_on_shutdown() {
        let config = config();
        let (mut monitor, rows, _) = monitor(&config, ["100", "1"]);
        let lifecycle = Lifecycle::new();

        let control = lifecycle.clone();
        let stopper = thread::spawn(move || {
            thread::sleep(Duration::from_millis(250));
            control.request_shutdown();
        });

        assert_eq!(monitor.run(&lifecycle, None), 0);
        assert!(rows.0.lock().unwrap().is_empty());
        stopper.join().unwrap();
        monitor.shutdown();
    }

    #[test]
    fn test_stdin_commands() {
        let lifecycle = Lifecycle::new();
        assert!(apply_command("p\n", &lifecycle));
        assert!(lifecycle.is_running());
        assert!(apply_command(" pause ", &lifecycle));
        assert!(!lifecycle.is_running());
        assert!(!apply_command("x", &lifecycle));
        assert!(apply_command("q", &lifecycle));
        assert!(lifecycle.is_shutdown());
    }
}
