//! Failure taxonomy for a single region extraction.
//!
//! Every variant is recovered at the region worker boundary and turns into
//! an absent value for that region only.

use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExtractError {
    /// Capture backend unavailable or the rectangle could not be grabbed.
    #[error("capture failed: {0}")]
    CaptureFailed(String),

    /// OCR engine errored or returned no detections.
    #[error("recognition failed: {0}")]
    RecognitionFailed(String),

    /// Text was recognized but no rule produced an in-bounds integer.
    #[error("parse rejected '{text}': {reason}")]
    ParseRejected { text: String, reason: String },

    /// The collector deadline passed before the worker reported.
    #[error("cycle timed out after {waited:?}")]
    CycleTimeout { waited: Duration },
}

impl ExtractError {
    /// Short label used in per-region log lines.
    pub fn kind(&self) -> &'static str {
        match self {
            ExtractError::CaptureFailed(_) => "CaptureFailed",
            ExtractError::RecognitionFailed(_) => "RecognitionFailed",
            ExtractError::ParseRejected { .. } => "ParseRejected",
            ExtractError::CycleTimeout { .. } => "CycleTimeout",
        }
    }

    pub fn rejected(text: impl Into<String>, reason: impl Into<String>) -> Self {
        ExtractError::ParseRejected {
            text: text.into(),
            reason: reason.into(),
        }
    }
}
