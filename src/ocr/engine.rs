use anyhow::{anyhow, Context, Result};
use image::{GrayImage, RgbImage};
use serde::{Deserialize, Serialize};
use std::process::Command;
use tempfile::NamedTempFile;
use tracing::trace;

use super::preprocess::{prepare, PreprocessConfig};
use super::setup::TesseractPaths;
use crate::error::ExtractError;

/// Quadrilateral corners, clockwise from top-left, in image pixels.
pub type Quad = [(f32, f32); 4];

/// One recognized text span. Read-only once produced.
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    pub text: String,
    /// Recognition confidence in 0.0..=1.0.
    pub confidence: f32,
    pub bbox: Quad,
}

impl Detection {
    pub fn new(text: impl Into<String>, confidence: f32, bbox: Quad) -> Self {
        Self {
            text: text.into(),
            confidence,
            bbox,
        }
    }

    /// Builds a detection from an axis-aligned rectangle.
    pub fn from_rect(
        text: impl Into<String>,
        confidence: f32,
        left: f32,
        top: f32,
        width: f32,
        height: f32,
    ) -> Self {
        let (right, bottom) = (left + width, top + height);
        Self::new(
            text,
            confidence,
            [(left, top), (right, top), (right, bottom), (left, bottom)],
        )
    }
}

/// An OCR capability: pixels in, detections out.
///
/// Instances are expensive to set up and are owned by exactly one worker
/// slot, so `recognize` takes `&mut self` and needs no internal locking.
pub trait Recognizer: Send {
    fn recognize(&mut self, image: &RgbImage) -> Result<Vec<Detection>, ExtractError>;

    fn name(&self) -> &str;
}

/// Tesseract engine settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TesseractConfig {
    pub executable: Option<std::path::PathBuf>,
    pub tessdata_dir: Option<std::path::PathBuf>,
    pub language: String,
    /// Tesseract page segmentation mode; 7 treats the image as one text line.
    pub page_seg_mode: u8,
    pub char_whitelist: Option<String>,
    pub preprocess: PreprocessConfig,
}

impl Default for TesseractConfig {
    fn default() -> Self {
        Self {
            executable: None,
            tessdata_dir: None,
            language: "eng".to_string(),
            page_seg_mode: 7,
            char_whitelist: Some("0123456789,.".to_string()),
            preprocess: PreprocessConfig::default(),
        }
    }
}

/// Runs the Tesseract CLI with TSV output.
pub struct TesseractRecognizer {
    paths: TesseractPaths,
    config: TesseractConfig,
}

impl TesseractRecognizer {
    pub fn new(paths: TesseractPaths, config: TesseractConfig) -> Self {
        Self { paths, config }
    }

    fn run(&self, img: &GrayImage) -> Result<Vec<Detection>> {
        let temp_input = NamedTempFile::with_suffix(".png")?;
        img.save(temp_input.path())
            .context("Failed to write OCR input image")?;

        // Tesseract appends .tsv to the output base
        let temp_output = NamedTempFile::new()?;
        let output_base = temp_output.path().to_string_lossy().to_string();

        let mut command = Command::new(&self.paths.executable);
        command.arg(temp_input.path()).arg(&output_base);
        if let Some(tessdata) = &self.paths.tessdata {
            command.arg("--tessdata-dir").arg(tessdata);
        }
        command
            .arg("-l")
            .arg(&self.config.language)
            .arg("--psm")
            .arg(self.config.page_seg_mode.to_string());
        if let Some(whitelist) = &self.config.char_whitelist {
            command.arg("-c").arg(format!("tessedit_char_whitelist={whitelist}"));
        }
        command.arg("tsv");

        let output = command.output().context("Failed to launch Tesseract")?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow!("Tesseract failed: {}", stderr.trim()));
        }

        let tsv_path = format!("{}.tsv", output_base);
        let tsv_content = std::fs::read_to_string(&tsv_path)
            .map_err(|e| anyhow!("Failed to read Tesseract output: {}", e))?;
        let _ = std::fs::remove_file(&tsv_path);

        Ok(parse_tsv_output(&tsv_content))
    }
}

impl Recognizer for TesseractRecognizer {
    fn recognize(&mut self, image: &RgbImage) -> Result<Vec<Detection>, ExtractError> {
        let prepared = prepare(image, &self.config.preprocess);
        self.run(&prepared)
            .map_err(|e| ExtractError::RecognitionFailed(format!("{e:#}")))
    }

    fn name(&self) -> &str {
        "tesseract"
    }
}

/// Accumulates word rows of one Tesseract text line.
#[derive(Default)]
struct LineAccumulator {
    key: Option<(i32, i32, i32)>,
    words: Vec<String>,
    conf_sum: f32,
    left: f32,
    top: f32,
    right: f32,
    bottom: f32,
}

impl LineAccumulator {
    fn push(&mut self, text: &str, conf: f32, rect: (f32, f32, f32, f32)) {
        let (left, top, width, height) = rect;
        if self.words.is_empty() {
            self.left = left;
            self.top = top;
            self.right = left + width;
            self.bottom = top + height;
        } else {
            self.left = self.left.min(left);
            self.top = self.top.min(top);
            self.right = self.right.max(left + width);
            self.bottom = self.bottom.max(top + height);
        }
        self.words.push(text.to_string());
        self.conf_sum += conf;
    }

    fn flush(&mut self, out: &mut Vec<Detection>) {
        if !self.words.is_empty() {
            let confidence = self.conf_sum / self.words.len() as f32 / 100.0;
            out.push(Detection::from_rect(
                self.words.join(" "),
                confidence,
                self.left,
                self.top,
                self.right - self.left,
                self.bottom - self.top,
            ));
        }
        *self = LineAccumulator::default();
    }
}

/// Parses Tesseract TSV output into one detection per text line.
///
/// Word rows (level 5) are grouped by block, paragraph and line number.
/// The line box is the union of its word boxes and the confidence is the
/// mean word confidence scaled to 0..1.
pub fn parse_tsv_output(tsv: &str) -> Vec<Detection> {
    let mut detections = Vec::new();
    let mut line = LineAccumulator::default();

    // TSV fields: level, page_num, block_num, par_num, line_num, word_num,
    //             left, top, width, height, conf, text
    for row in tsv.lines().skip(1) {
        let fields: Vec<&str> = row.split('\t').collect();
        if fields.len() < 12 {
            continue;
        }

        let num = |i: usize| fields[i].trim().parse::<i32>().unwrap_or(-1);
        if num(0) != 5 {
            continue;
        }

        let text = fields[11].trim();
        let conf: f32 = fields[10].trim().parse().unwrap_or(-1.0);
        if text.is_empty() || conf < 0.0 {
            continue;
        }

        let key = (num(2), num(3), num(4));
        if line.key != Some(key) {
            line.flush(&mut detections);
            line.key = Some(key);
        }

        let rect = (num(6) as f32, num(7) as f32, num(8) as f32, num(9) as f32);
        trace!("tsv word {:?} conf {:.1} at {:?}", text, conf, rect);
        line.push(text, conf, rect);
    }
    line.flush(&mut detections);

    detections
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEADER: &str =
        "level\tpage_num\tblock_num\tpar_num\tline_num\tword_num\tleft\ttop\twidth\theight\tconf\ttext";

    fn tsv(rows: &[&str]) -> String {
        let mut s = String::from(HEADER);
        for row in rows {
            s.push('\n');
            s.push_str(row);
        }
        s
    }

    #[test]
    fn test_parse_single_word() {
        let out = parse_tsv_output(&tsv(&[
            "1\t1\t0\t0\t0\t0\t0\t0\t200\t40\t-1\t",
            "5\t1\t1\t1\t1\t1\t10\t5\t60\t20\t91.5\t1,234",
        ]));
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].text, "1,234");
        assert!((out[0].confidence - 0.915).abs() < 1e-4);
        assert_eq!(out[0].bbox[0], (10.0, 5.0));
        assert_eq!(out[0].bbox[2], (70.0, 25.0));
    }

    #[test]
    fn test_words_on_one_line_are_joined() {
        let out = parse_tsv_output(&tsv(&[
            "5\t1\t1\t1\t1\t1\t10\t5\t30\t20\t90\t12",
            "5\t1\t1\t1\t1\t2\t50\t4\t40\t22\t80\t345",
        ]));
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].text, "12 345");
        assert!((out[0].confidence - 0.85).abs() < 1e-4);
        assert_eq!(out[0].bbox[0], (10.0, 4.0));
        assert_eq!(out[0].bbox[2], (90.0, 26.0));
    }

    #[test]
    fn test_separate_blocks_with_same_line_number() {
        let out = parse_tsv_output(&tsv(&[
            "5\t1\t1\t1\t1\t1\t0\t0\t10\t10\t90\t100",
            "5\t1\t2\t1\t1\t1\t0\t30\t10\t10\t90\t200",
        ]));
        let texts: Vec<&str> = out.iter().map(|d| d.text.as_str()).collect();
        assert_eq!(texts, ["100", "200"]);
    }

    #[test]
    fn test_skips_empty_and_unscored_rows() {
        let out = parse_tsv_output(&tsv(&[
            "5\t1\t1\t1\t1\t1\t0\t0\t10\t10\t-1\t ",
            "5\t1\t1\t1\t1\t2\t0\t0\t10\t10\t95\t",
            "short\trow",
        ]));
        assert!(out.is_empty());
    }
}
