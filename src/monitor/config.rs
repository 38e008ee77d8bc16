//! Configuration types for the monitor.
//!
//! Loads settings from config.json at startup. A missing file means
//! defaults; a file that does not parse or validate stops the process.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::info;

use super::actions::Action;
use super::input::Key;
use crate::capture::{CaptureConfig, RegionRect};
use crate::ocr::{Bounds, TesseractConfig, ValueKind};

/// Fatal configuration problems found at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("no regions configured")]
    NoRegions,

    #[error("region name '{0}' is used more than once")]
    DuplicateRegion(String),

    #[error("region name '{0}' must be non-empty and must not contain commas")]
    InvalidRegionName(String),

    #[error("region '{0}' has zero width or height")]
    EmptyRegion(String),

    #[error("{kind} bounds are inverted: min {min} > max {max}")]
    InvertedBounds { kind: ValueKind, min: u64, max: u64 },

    #[error("cycle.timeout_ms must be greater than zero")]
    ZeroTimeout,

    #[error("cycle.trigger interval must be greater than zero")]
    ZeroInterval,

    #[error("grid has no cells")]
    EmptyGrid,

    #[error("grid target R{}C{} is outside the {rows}x{cols} grid", .row + 1, .col + 1)]
    GridTargetOutOfRange {
        row: usize,
        col: usize,
        rows: usize,
        cols: usize,
    },

    #[error("click_target action needs a grid")]
    TargetWithoutGrid,

    #[error("invalid key in actions: {0}")]
    UnknownKey(String),

    #[error("capture backend '{0}' is not available in this build")]
    CaptureUnavailable(String),

    #[error("ocr.min_confidence must be within 0..=1, got {0}")]
    InvalidConfidence(f32),
}

/// One monitored screen region.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RegionConfig {
    pub name: String,
    #[serde(default = "default_kind")]
    pub kind: ValueKind,
    pub rect: RegionRect,
}

fn default_kind() -> ValueKind {
    ValueKind::Price
}

impl RegionConfig {
    fn anchored(name: &str, kind: ValueKind, rb: (f64, f64, f64, f64)) -> Self {
        let (right, bottom, width, height) = rb;
        Self {
            name: name.to_string(),
            kind,
            rect: RegionRect::Anchored {
                right,
                bottom,
                width,
                height,
            },
        }
    }
}

/// Grid cell selected as the monitored row.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GridTarget {
    pub row: usize,
    pub col: usize,
}

/// A table of item cells; the target cell names the CSV row and is what
/// `click_target` clicks.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GridConfig {
    /// Cells by row, then column.
    pub cells: Vec<Vec<RegionRect>>,
    pub target: GridTarget,
}

impl GridConfig {
    pub fn rows(&self) -> usize {
        self.cells.len()
    }

    pub fn cols(&self) -> usize {
        self.cells.iter().map(Vec::len).max().unwrap_or(0)
    }

    pub fn target_cell(&self) -> Option<&RegionRect> {
        self.cells
            .get(self.target.row)
            .and_then(|row| row.get(self.target.col))
    }

    /// `R{row}C{col}`, one-based.
    pub fn target_label(&self) -> String {
        format!("R{}C{}", self.target.row + 1, self.target.col + 1)
    }
}

/// Acceptance bounds per value kind.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BoundsConfig {
    pub price: Bounds,
    pub quantity: Bounds,
}

impl Default for BoundsConfig {
    fn default() -> Self {
        Self {
            price: Bounds::PRICE,
            quantity: Bounds::QUANTITY,
        }
    }
}

impl BoundsConfig {
    pub fn for_kind(&self, kind: ValueKind) -> Bounds {
        match kind {
            ValueKind::Price => self.price,
            ValueKind::Quantity => self.quantity,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OcrBackend {
    #[default]
    Tesseract,
}

/// OCR engine settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OcrConfig {
    pub backend: OcrBackend,
    /// Detections below this confidence (0..1) are ignored.
    pub min_confidence: f32,
    #[serde(flatten)]
    pub tesseract: TesseractConfig,
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            backend: OcrBackend::Tesseract,
            min_confidence: 0.0,
            tesseract: TesseractConfig::default(),
        }
    }
}

/// When cycles start.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trigger {
    /// Start the next cycle as soon as the previous one is written.
    #[default]
    Continuous,
    /// Start cycles at a fixed period.
    IntervalMs(u64),
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CycleConfig {
    /// Collector deadline per cycle.
    pub timeout_ms: u64,
    pub trigger: Trigger,
    /// Delay between `before_capture` actions and the first grab.
    pub settle_delay_ms: u64,
}

impl Default for CycleConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 5000,
            trigger: Trigger::Continuous,
            settle_delay_ms: 150,
        }
    }
}

impl CycleConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ActionsConfig {
    pub before_capture: Vec<Action>,
    /// Runs once every region has been grabbed, while OCR is still going.
    pub after_capture: Vec<Action>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Relative paths are resolved against the executable's directory.
    pub csv_path: PathBuf,
    /// Written in place of a value that could not be read.
    pub absent_marker: String,
    /// Save every region crop under `captures/`.
    pub save_captures: bool,
    /// Row label used when no grid is configured.
    pub row_label: String,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            csv_path: PathBuf::from("prices.csv"),
            absent_marker: String::new(),
            save_captures: false,
            row_label: "all".to_string(),
        }
    }
}

/// Complete monitor configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub regions: Vec<RegionConfig>,
    pub grid: Option<GridConfig>,
    pub bounds: BoundsConfig,
    pub capture: CaptureConfig,
    pub ocr: OcrConfig,
    pub cycle: CycleConfig,
    pub actions: ActionsConfig,
    pub output: OutputConfig,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        // Detail view of the market: three cheapest listings, anchored at
        // their bottom-right corners on a 1920x1080 screen.
        let regions = vec![
            RegionConfig::anchored("lowest_price", ValueKind::Price, (268.0, 953.0, 106.0, 19.0)),
            RegionConfig::anchored("second_price", ValueKind::Price, (421.0, 953.0, 106.0, 19.0)),
            RegionConfig::anchored("third_price", ValueKind::Price, (574.0, 953.0, 106.0, 19.0)),
            RegionConfig::anchored(
                "lowest_quantity",
                ValueKind::Quantity,
                (281.0, 927.0, 151.0, 685.0),
            ),
            RegionConfig::anchored(
                "second_quantity",
                ValueKind::Quantity,
                (434.0, 927.0, 151.0, 685.0),
            ),
            RegionConfig::anchored(
                "third_quantity",
                ValueKind::Quantity,
                (587.0, 927.0, 151.0, 685.0),
            ),
        ];

        Self {
            regions,
            grid: None,
            bounds: BoundsConfig::default(),
            capture: CaptureConfig::default(),
            ocr: OcrConfig::default(),
            cycle: CycleConfig::default(),
            actions: ActionsConfig {
                before_capture: vec![Action::Click { x: 440.0, y: 220.0 }],
                after_capture: vec![Action::Press {
                    key: "esc".to_string(),
                }],
            },
            output: OutputConfig::default(),
        }
    }
}

impl MonitorConfig {
    /// Checks everything that would otherwise fail mid-run, except whether
    /// the capture backend exists in this build.
    pub fn validate_settings(&self) -> Result<(), ConfigError> {
        if self.regions.is_empty() {
            return Err(ConfigError::NoRegions);
        }

        let mut seen = HashSet::new();
        for region in &self.regions {
            if region.name.trim().is_empty() || region.name.contains(',') {
                return Err(ConfigError::InvalidRegionName(region.name.clone()));
            }
            if !seen.insert(region.name.as_str()) {
                return Err(ConfigError::DuplicateRegion(region.name.clone()));
            }
            if !region.rect.has_area() {
                return Err(ConfigError::EmptyRegion(region.name.clone()));
            }
        }

        for kind in [ValueKind::Price, ValueKind::Quantity] {
            let bounds = self.bounds.for_kind(kind);
            if bounds.min > bounds.max {
                return Err(ConfigError::InvertedBounds {
                    kind,
                    min: bounds.min,
                    max: bounds.max,
                });
            }
        }

        if self.cycle.timeout_ms == 0 {
            return Err(ConfigError::ZeroTimeout);
        }
        if self.cycle.trigger == Trigger::IntervalMs(0) {
            return Err(ConfigError::ZeroInterval);
        }

        if let Some(grid) = &self.grid {
            if grid.rows() == 0 || grid.cols() == 0 {
                return Err(ConfigError::EmptyGrid);
            }
            if grid.target_cell().is_none() {
                return Err(ConfigError::GridTargetOutOfRange {
                    row: grid.target.row,
                    col: grid.target.col,
                    rows: grid.rows(),
                    cols: grid.cols(),
                });
            }
        }

        let actions = self
            .actions
            .before_capture
            .iter()
            .chain(&self.actions.after_capture);
        for action in actions {
            match action {
                Action::Press { key } => {
                    key.parse::<Key>()
                        .map_err(|e| ConfigError::UnknownKey(e.0))?;
                }
                Action::ClickTarget if self.grid.is_none() => {
                    return Err(ConfigError::TargetWithoutGrid);
                }
                _ => {}
            }
        }

        if !(0.0..=1.0).contains(&self.ocr.min_confidence) {
            return Err(ConfigError::InvalidConfidence(self.ocr.min_confidence));
        }

        Ok(())
    }

    pub fn check_capture(&self) -> Result<(), ConfigError> {
        if !self.capture.is_available() {
            return Err(ConfigError::CaptureUnavailable(
                self.capture.backend_name().to_string(),
            ));
        }

        Ok(())
    }

    /// Value written in the CSV `region` column.
    pub fn row_label(&self) -> String {
        match &self.grid {
            Some(grid) => grid.target_label(),
            None => self.output.row_label.clone(),
        }
    }

    pub fn region_names(&self) -> Vec<String> {
        self.regions.iter().map(|r| r.name.clone()).collect()
    }

    /// Grid layout with the target cell starred, then every region with
    /// its pixel rectangle when the screen size is known.
    pub fn region_map(&self, screen: Option<(u32, u32)>) -> String {
        let mut lines = Vec::new();

        if let Some(grid) = &self.grid {
            lines.push(format!(
                "Grid {}x{}, target {}:",
                grid.rows(),
                grid.cols(),
                grid.target_label()
            ));
            for (row, cells) in grid.cells.iter().enumerate() {
                let labels: Vec<String> = (0..cells.len())
                    .map(|col| {
                        let marker = if row == grid.target.row && col == grid.target.col {
                            '*'
                        } else {
                            ' '
                        };
                        format!("{}R{}C{}", marker, row + 1, col + 1)
                    })
                    .collect();
                lines.push(format!("  {}", labels.join(" ")));
            }
        }

        lines.push("Regions:".to_string());
        for (index, region) in self.regions.iter().enumerate() {
            let placement = match screen {
                Some((width, height)) => match region.rect.resolve(width, height) {
                    Ok(rect) => rect.to_string(),
                    Err(e) => e.to_string(),
                },
                None => format!("{:?}", region.rect),
            };
            lines.push(format!(
                "  {} {} ({}): {}",
                index, region.name, region.kind, placement
            ));
        }

        lines.join("\n")
    }
}

fn deserialize(contents: &str, path: &Path) -> Result<MonitorConfig, ConfigError> {
    serde_json::from_str(contents).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Reads configuration from `path`, or defaults if the file does not exist.
///
/// Settings are validated but the capture backend is not required, so
/// helper commands work in builds without live capture.
pub fn read_config(path: &Path) -> Result<MonitorConfig, ConfigError> {
    info!("Looking for config at: {}", path.display());

    if !path.exists() {
        info!("{} not found. Using default config.", path.display());
        let config = MonitorConfig::default();
        config.validate_settings()?;
        return Ok(config);
    }

    let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let config = deserialize(&contents, path)?;
    config.validate_settings()?;
    info!(
        "Config loaded from {} ({} regions)",
        path.display(),
        config.regions.len()
    );
    Ok(config)
}

/// Loads configuration for monitoring: [`read_config`] plus a usable
/// capture backend.
pub fn load_config(path: &Path) -> Result<MonitorConfig, ConfigError> {
    let config = read_config(path)?;
    config.check_capture()?;
    Ok(config)
}
