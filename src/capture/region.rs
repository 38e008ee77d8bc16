//! Region rectangles and their resolution to screen pixels.

use image::{imageops, RgbImage};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::ExtractError;

/// A rectangle in absolute screen pixels.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AbsoluteRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl AbsoluteRect {
    pub fn right(&self) -> u32 {
        self.x + self.width
    }

    pub fn bottom(&self) -> u32 {
        self.y + self.height
    }

    /// True if the rectangle lies fully inside a `width` x `height` screen.
    pub fn fits_within(&self, width: u32, height: u32) -> bool {
        self.width > 0 && self.height > 0 && self.right() <= width && self.bottom() <= height
    }
}

impl fmt::Display for AbsoluteRect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{} at ({}, {})", self.width, self.height, self.x, self.y)
    }
}

/// A configured region rectangle.
///
/// Both forms accept either absolute pixels or fractions of the screen size;
/// a first value below 1 selects fractions.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RegionRect {
    /// `[left, top, right, bottom]`
    Corners([f64; 4]),
    /// Anchored at the bottom-right corner.
    Anchored {
        right: f64,
        bottom: f64,
        width: f64,
        height: f64,
    },
}

/// Scales `[a, b, c, d]` by `(width, height, width, height)` when the first
/// value is fractional, otherwise returns it unchanged.
pub fn normalize_rect(rect: [f64; 4], width: u32, height: u32) -> [f64; 4] {
    if rect[0] < 1.0 {
        let (w, h) = (width as f64, height as f64);
        [rect[0] * w, rect[1] * h, rect[2] * w, rect[3] * h]
    } else {
        rect
    }
}

impl RegionRect {
    /// Left, top, right, bottom in pixels, before validation.
    pub fn corners(&self, width: u32, height: u32) -> [f64; 4] {
        match *self {
            RegionRect::Corners(rect) => normalize_rect(rect, width, height),
            RegionRect::Anchored {
                right,
                bottom,
                width: w,
                height: h,
            } => {
                let [right, bottom, w, h] = normalize_rect([right, bottom, w, h], width, height);
                [right - w, bottom - h, right, bottom]
            }
        }
    }

    /// Checks the size invariant without a screen: both forms must describe
    /// a non-empty area.
    pub fn has_area(&self) -> bool {
        match *self {
            RegionRect::Corners([l, t, r, b]) => r > l && b > t,
            RegionRect::Anchored { width, height, .. } => width > 0.0 && height > 0.0,
        }
    }

    /// Resolves to absolute pixels for the given screen size.
    pub fn resolve(&self, width: u32, height: u32) -> Result<AbsoluteRect, ExtractError> {
        let [left, top, right, bottom] = self.corners(width, height);
        if left < 0.0 || top < 0.0 {
            return Err(ExtractError::CaptureFailed(format!(
                "rectangle {:?} starts off-screen",
                self
            )));
        }

        let (x, y) = (left.trunc() as u32, top.trunc() as u32);
        let (r, b) = (right.trunc() as u32, bottom.trunc() as u32);
        if r <= x || b <= y {
            return Err(ExtractError::CaptureFailed(format!(
                "rectangle {:?} is empty on a {}x{} screen",
                self, width, height
            )));
        }

        Ok(AbsoluteRect {
            x,
            y,
            width: r - x,
            height: b - y,
        })
    }
}

/// Crops `rect` out of a full-screen image.
pub fn crop_region(img: &RgbImage, rect: AbsoluteRect) -> Result<RgbImage, ExtractError> {
    let (width, height) = img.dimensions();
    if !rect.fits_within(width, height) {
        return Err(ExtractError::CaptureFailed(format!(
            "region {} is outside the {}x{} frame",
            rect, width, height
        )));
    }
    Ok(imageops::crop_imm(img, rect.x, rect.y, rect.width, rect.height).to_image())
}
