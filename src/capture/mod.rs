//! Region capture: backends that return RGB pixels for a screen rectangle.
//!
//! This module provides:
//! - Rectangle resolution (`RegionRect`, `AbsoluteRect`)
//! - The `ScreenCapture` backend trait and its implementations
//! - `CaptureGate`, which serializes grabs on a shared backend

pub mod file;
pub mod gate;
pub mod region;
#[cfg(feature = "screen-capture")]
pub mod screen;

use anyhow::Result;
use image::RgbImage;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Instant;

use crate::error::ExtractError;

pub use file::ImageFileCapture;
pub use gate::CaptureGate;
pub use region::{AbsoluteRect, RegionRect};

/// A capture backend.
///
/// Backends are generally not safe for concurrent use; share one through
/// a `CaptureGate` rather than calling it from several threads.
pub trait ScreenCapture: Send {
    /// Current screen size in pixels, used to resolve fractional regions.
    fn screen_size(&mut self) -> Result<(u32, u32), ExtractError>;

    fn capture(&mut self, rect: AbsoluteRect) -> Result<RgbImage, ExtractError>;

    fn name(&self) -> &str;
}

/// Pixels grabbed for one region, owned by the worker that captured them.
#[derive(Debug, Clone)]
pub struct CaptureFrame {
    /// Index of the source region.
    pub region: usize,
    pub rect: AbsoluteRect,
    pub captured_at: Instant,
    pub image: RgbImage,
}

/// Capture backend selection.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "snake_case")]
pub enum CaptureConfig {
    /// Live desktop capture of the primary monitor.
    #[default]
    Screen,
    /// Replays a saved full-screen image.
    ImageFile { path: PathBuf },
}

impl CaptureConfig {
    pub fn backend_name(&self) -> &'static str {
        match self {
            CaptureConfig::Screen => "screen",
            CaptureConfig::ImageFile { .. } => "image_file",
        }
    }

    /// True if this build can open the selected backend.
    pub fn is_available(&self) -> bool {
        match self {
            CaptureConfig::Screen => cfg!(feature = "screen-capture"),
            CaptureConfig::ImageFile { .. } => true,
        }
    }
}

/// Opens the configured capture backend.
pub fn open_backend(config: &CaptureConfig) -> Result<Box<dyn ScreenCapture>> {
    match config {
        #[cfg(feature = "screen-capture")]
        CaptureConfig::Screen => Ok(Box::new(screen::PrimaryMonitorCapture::new())),
        #[cfg(not(feature = "screen-capture"))]
        CaptureConfig::Screen => Err(anyhow::anyhow!(
            "Screen capture is not compiled in; rebuild with --features screen-capture"
        )),
        CaptureConfig::ImageFile { path } => {
            let backend = ImageFileCapture::open(path)?;
            Ok(Box::new(backend))
        }
    }
}
