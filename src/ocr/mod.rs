//! OCR pipeline: engine wrapper, text normalization, numeric parsing and
//! candidate selection.

pub mod engine;
pub mod extract;
pub mod normalize;
pub mod parse;
pub mod preprocess;
pub mod setup;

pub use engine::{Detection, Recognizer, TesseractConfig, TesseractRecognizer};
pub use extract::OcrAdapter;
pub use normalize::normalize;
pub use parse::{parse_value, Bounds, ValueKind};
