use image::imageops::{self, FilterType};
use image::{GrayImage, ImageBuffer, Luma, RgbImage};
use serde::{Deserialize, Serialize};

/// Image preparation applied before handing a capture to Tesseract.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PreprocessConfig {
    /// Crops narrower than this are upscaled.
    pub upscale_min_width: u32,
    /// Crops shorter than this are upscaled.
    pub upscale_min_height: u32,
    /// Minimum factor used whenever upscaling happens.
    pub min_scale: f32,
    /// Stretch the grayscale histogram to the full 0-255 range.
    pub contrast_stretch: bool,
    /// Keep only pixels whose R, G and B all exceed this value (as black text).
    pub threshold: Option<u8>,
}

impl Default for PreprocessConfig {
    fn default() -> Self {
        Self {
            upscale_min_width: 500,
            upscale_min_height: 200,
            min_scale: 2.0,
            contrast_stretch: true,
            threshold: None,
        }
    }
}

/// Converts image to binary by keeping only bright pixels.
///
/// Pixels where R > threshold AND G > threshold AND B > threshold become black (text).
/// All other pixels become white (background).
pub fn threshold_bright_pixels(img: &RgbImage, threshold: u8) -> GrayImage {
    let (width, height) = img.dimensions();
    let mut output = ImageBuffer::new(width, height);

    for (x, y, pixel) in img.enumerate_pixels() {
        let [r, g, b] = pixel.0;
        let value = if r > threshold && g > threshold && b > threshold {
            0u8
        } else {
            255u8
        };
        output.put_pixel(x, y, Luma([value]));
    }

    output
}

/// Linearly maps the darkest pixel to 0 and the brightest to 255.
pub fn stretch_contrast(img: &GrayImage) -> GrayImage {
    let (lo, hi) = img
        .pixels()
        .fold((u8::MAX, u8::MIN), |(lo, hi), p| (lo.min(p[0]), hi.max(p[0])));

    if hi <= lo {
        return img.clone();
    }

    let span = (hi - lo) as f32;
    ImageBuffer::from_fn(img.width(), img.height(), |x, y| {
        let v = img.get_pixel(x, y)[0];
        Luma([(((v - lo) as f32 / span) * 255.0).round() as u8])
    })
}

/// Scale factor for a crop, or `None` if it is already large enough.
pub fn upscale_factor(width: u32, height: u32, config: &PreprocessConfig) -> Option<f32> {
    if width == 0 || height == 0 {
        return None;
    }
    if width >= config.upscale_min_width && height >= config.upscale_min_height {
        return None;
    }
    let scale = (config.upscale_min_width as f32 / width as f32)
        .max(config.upscale_min_height as f32 / height as f32)
        .max(config.min_scale);
    Some(scale)
}

/// Runs the full preparation pipeline on a captured region.
pub fn prepare(img: &RgbImage, config: &PreprocessConfig) -> GrayImage {
    let gray = match config.threshold {
        Some(threshold) => threshold_bright_pixels(img, threshold),
        None if config.contrast_stretch => stretch_contrast(&imageops::grayscale(img)),
        None => imageops::grayscale(img),
    };

    match upscale_factor(gray.width(), gray.height(), config) {
        Some(scale) => {
            let w = (gray.width() as f32 * scale).round() as u32;
            let h = (gray.height() as f32 * scale).round() as u32;
            imageops::resize(&gray, w, h, FilterType::CatmullRom)
        }
        None => gray,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn test_threshold_bright_pixels() {
        let mut img: RgbImage = ImageBuffer::new(3, 1);
        img.put_pixel(0, 0, Rgb([100, 100, 100]));
        img.put_pixel(1, 0, Rgb([250, 250, 250]));
        img.put_pixel(2, 0, Rgb([250, 250, 100]));

        let result = threshold_bright_pixels(&img, 190);

        assert_eq!(result.get_pixel(0, 0)[0], 255, "Dark pixel should become white");
        assert_eq!(result.get_pixel(1, 0)[0], 0, "Bright pixel should become black");
        assert_eq!(result.get_pixel(2, 0)[0], 255, "Partially dark pixel should become white");
    }

    #[test]
    fn test_stretch_contrast() {
        let img: GrayImage = ImageBuffer::from_fn(3, 1, |x, _| Luma([100 + x as u8 * 10]));
        let out = stretch_contrast(&img);
        assert_eq!(out.get_pixel(0, 0)[0], 0);
        assert_eq!(out.get_pixel(1, 0)[0], 128);
        assert_eq!(out.get_pixel(2, 0)[0], 255);
    }

    #[test]
    fn test_flat_image_is_unchanged_by_stretch() {
        let img: GrayImage = ImageBuffer::from_pixel(4, 4, Luma([77]));
        assert_eq!(stretch_contrast(&img), img);
    }

    #[test]
    fn test_upscale_factor() {
        let config = PreprocessConfig::default();
        // 106x19 price crop: height dominates, 200/19 ≈ 10.5.
        let scale = upscale_factor(106, 19, &config).unwrap();
        assert!((scale - 200.0 / 19.0).abs() < 1e-4);
        // Large enough on both axes.
        assert_eq!(upscale_factor(800, 300, &config), None);
        // Slightly short: min_scale wins.
        assert_eq!(upscale_factor(600, 190, &config), Some(2.0));
        assert_eq!(upscale_factor(0, 10, &config), None);
    }

    #[test]
    fn test_prepare_upscales_small_crop() {
        let img: RgbImage = ImageBuffer::from_pixel(50, 20, Rgb([10, 10, 10]));
        let out = prepare(&img, &PreprocessConfig::default());
        assert_eq!(out.dimensions(), (500, 200));
    }
}
