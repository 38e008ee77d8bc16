//! Live desktop capture of the primary monitor via xcap.

use image::RgbImage;
use tracing::trace;
use xcap::Monitor;

use super::region::{crop_region, AbsoluteRect};
use super::ScreenCapture;
use crate::error::ExtractError;

/// Grabs the monitor the platform marks as primary, or the first one listed
/// when none is marked.
///
/// The monitor list is re-queried on every call so that resolution changes
/// are picked up between cycles.
#[derive(Default)]
pub struct PrimaryMonitorCapture;

impl PrimaryMonitorCapture {
    pub fn new() -> Self {
        Self
    }

    fn monitor(&self) -> Result<Monitor, ExtractError> {
        let monitors = Monitor::all()
            .map_err(|e| ExtractError::CaptureFailed(format!("Failed to get monitors: {e}")))?;
        let index = primary_index(monitors.iter().map(Monitor::is_primary));
        monitors
            .into_iter()
            .nth(index)
            .ok_or_else(|| ExtractError::CaptureFailed("No monitor found".to_string()))
    }
}

/// Position of the first primary flag, falling back to the first entry.
fn primary_index(is_primary: impl IntoIterator<Item = bool>) -> usize {
    is_primary.into_iter().position(|primary| primary).unwrap_or(0)
}

impl ScreenCapture for PrimaryMonitorCapture {
    fn screen_size(&mut self) -> Result<(u32, u32), ExtractError> {
        let monitor = self.monitor()?;
        Ok((monitor.width(), monitor.height()))
    }

    fn capture(&mut self, rect: AbsoluteRect) -> Result<RgbImage, ExtractError> {
        let monitor = self.monitor()?;
        let image = monitor
            .capture_image()
            .map_err(|e| ExtractError::CaptureFailed(format!("Failed to capture screen: {e}")))?;

        // Go through raw bytes so xcap's bundled image version does not matter.
        let (width, height) = (image.width(), image.height());
        let rgb: Vec<u8> = image
            .into_raw()
            .chunks_exact(4)
            .flat_map(|px| [px[0], px[1], px[2]])
            .collect();
        let frame = RgbImage::from_raw(width, height, rgb).ok_or_else(|| {
            ExtractError::CaptureFailed(format!("Malformed {}x{} frame", width, height))
        })?;
        trace!("captured {}x{} frame for {}", width, height, rect);

        crop_region(&frame, rect)
    }

    fn name(&self) -> &str {
        "screen"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_primary_monitor_is_preferred() {
        assert_eq!(primary_index([false, true, false]), 1);
        assert_eq!(primary_index([true, true]), 0);
    }

    #[test]
    fn test_first_monitor_without_primary_flag() {
        assert_eq!(primary_index([false, false]), 0);
        assert_eq!(primary_index([]), 0);
    }
}
