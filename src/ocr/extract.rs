//! Candidate selection: raw detections to a single accepted value.

use image::RgbImage;
use std::cmp::Reverse;
use tracing::debug;

use super::engine::{Detection, Recognizer};
use super::normalize::normalize;
use super::parse::{parse_value, Bounds, ParseRule};
use crate::error::ExtractError;

/// An accepted value together with where it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct Reading {
    pub value: u64,
    pub rule: ParseRule,
    /// Raw OCR text the value was parsed from.
    pub text: String,
    /// True if no single detection parsed and the concatenation was used.
    pub combined: bool,
}

/// Picks the best value from a set of detections.
///
/// Longer texts are tried first since they are more likely to hold the
/// complete number. If no single detection is accepted, all texts are
/// concatenated in their original order and parsed once more.
pub fn select_value(
    detections: &[Detection],
    bounds: Bounds,
    min_confidence: f32,
) -> Result<Reading, ExtractError> {
    let usable: Vec<&Detection> = detections
        .iter()
        .filter(|d| d.confidence >= min_confidence)
        .collect();

    if usable.is_empty() {
        return Err(ExtractError::RecognitionFailed(format!(
            "no detections at or above confidence {:.2}",
            min_confidence
        )));
    }

    let mut ranked = usable.clone();
    ranked.sort_by_key(|d| Reverse(d.text.chars().count()));

    for detection in &ranked {
        let token = normalize(&detection.text);
        match parse_value(&token, bounds) {
            Ok(parsed) => {
                return Ok(Reading {
                    value: parsed.value,
                    rule: parsed.rule,
                    text: detection.text.clone(),
                    combined: false,
                });
            }
            Err(e) => debug!("candidate {:?} rejected: {}", detection.text, e),
        }
    }

    let combined: String = usable.iter().map(|d| d.text.as_str()).collect();
    let token = normalize(&combined);
    let parsed = parse_value(&token, bounds)?;
    Ok(Reading {
        value: parsed.value,
        rule: parsed.rule,
        text: combined,
        combined: true,
    })
}

/// Wraps one long-lived OCR engine for a worker slot.
pub struct OcrAdapter {
    recognizer: Box<dyn Recognizer>,
    min_confidence: f32,
}

impl OcrAdapter {
    pub fn new(recognizer: Box<dyn Recognizer>, min_confidence: f32) -> Self {
        Self {
            recognizer,
            min_confidence,
        }
    }

    pub fn engine_name(&self) -> &str {
        self.recognizer.name()
    }

    /// Runs the engine; an empty detection list counts as a failure.
    pub fn recognize(&mut self, image: &RgbImage) -> Result<Vec<Detection>, ExtractError> {
        let detections = self.recognizer.recognize(image)?;
        if detections.is_empty() {
            return Err(ExtractError::RecognitionFailed(
                "engine returned no detections".to_string(),
            ));
        }
        Ok(detections)
    }

    pub fn select(&self, detections: &[Detection], bounds: Bounds) -> Result<Reading, ExtractError> {
        select_value(detections, bounds, self.min_confidence)
    }

    /// Recognize and select in one step.
    pub fn read_value(&mut self, image: &RgbImage, bounds: Bounds) -> Result<Reading, ExtractError> {
        let detections = self.recognize(image)?;
        self.select(&detections, bounds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn det(text: &str, confidence: f32) -> Detection {
        Detection::from_rect(text, confidence, 0.0, 0.0, 10.0, 10.0)
    }

    struct Fixed(Vec<Detection>);

    impl Recognizer for Fixed {
        fn recognize(&mut self, _image: &RgbImage) -> Result<Vec<Detection>, ExtractError> {
            Ok(self.0.clone())
        }

        fn name(&self) -> &str {
            "fixed"
        }
    }

    #[test]
    fn test_longest_candidate_wins() {
        let detections = [det("123", 0.9), det("4,177", 0.5)];
        let reading = select_value(&detections, Bounds::PRICE, 0.0).unwrap();
        assert_eq!(reading.value, 4177);
        assert!(!reading.combined);
    }

    #[test]
    fn test_falls_back_to_shorter_candidate() {
        // "Price" normalizes to nothing, so the shorter "512" is used.
        let detections = [det("Price", 0.9), det("512", 0.9)];
        let reading = select_value(&detections, Bounds::PRICE, 0.0).unwrap();
        assert_eq!(reading.value, 512);
        assert_eq!(reading.text, "512");
    }

    #[test]
    fn test_concatenation_fallback() {
        // Each fragment is below the price minimum on its own.
        let detections = [det("12", 0.9), det("34", 0.9)];
        let reading = select_value(&detections, Bounds::PRICE, 0.0).unwrap();
        assert_eq!(reading.value, 1234);
        assert!(reading.combined);
    }

    #[test]
    fn test_low_confidence_detections_are_ignored() {
        let detections = [det("99999", 0.1), det("4,177", 0.8)];
        let reading = select_value(&detections, Bounds::PRICE, 0.5).unwrap();
        assert_eq!(reading.value, 4177);

        let err = select_value(&[det("4,177", 0.2)], Bounds::PRICE, 0.5).unwrap_err();
        assert_eq!(err.kind(), "RecognitionFailed");
    }

    #[test]
    fn test_nothing_accepted_is_parse_rejected() {
        let err = select_value(&[det("42", 0.9)], Bounds::PRICE, 0.0).unwrap_err();
        assert_eq!(err.kind(), "ParseRejected");
    }

    #[test]
    fn test_adapter_empty_detections_fail() {
        let mut adapter = OcrAdapter::new(Box::new(Fixed(vec![])), 0.0);
        let img = RgbImage::new(4, 4);
        let err = adapter.read_value(&img, Bounds::PRICE).unwrap_err();
        assert_eq!(err.kind(), "RecognitionFailed");
    }

    #[test]
    fn test_adapter_reads_value() {
        let mut adapter = OcrAdapter::new(Box::new(Fixed(vec![det("O12.000", 0.8)])), 0.0);
        let img = RgbImage::new(4, 4);
        let reading = adapter.read_value(&img, Bounds::PRICE).unwrap();
        assert_eq!(reading.value, 12000);
        assert_eq!(adapter.engine_name(), "fixed");
    }
}
