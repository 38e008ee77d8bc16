//! Numeric disambiguation for normalized OCR tokens.
//!
//! OCR renders thousands separators inconsistently (comma, period, or
//! dropped) and sometimes loses characters. The rules below encode those
//! failure modes as an ordered decision list; the first rule that applies
//! wins, and the result is then checked against the acceptance bounds of the
//! value kind.

use std::fmt;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::ExtractError;

/// What a region holds. Selects the acceptance bounds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueKind {
    Price,
    Quantity,
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueKind::Price => write!(f, "price"),
            ValueKind::Quantity => write!(f, "quantity"),
        }
    }
}

/// Inclusive acceptance range for a parsed value.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bounds {
    pub min: u64,
    pub max: u64,
}

impl Bounds {
    pub const PRICE: Bounds = Bounds {
        min: 100,
        max: 99_999_999,
    };
    pub const QUANTITY: Bounds = Bounds {
        min: 1,
        max: 999_999_999,
    };

    pub fn contains(&self, value: u64) -> bool {
        (self.min..=self.max).contains(&value)
    }
}

/// The rule in the decision list that produced a value.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ParseRule {
    /// Digits only.
    PlainDigits,
    /// Commas as thousands separators, no period.
    CommaGrouped,
    /// Single period followed by exactly three digits.
    MisreadThousands,
    /// Single period whose fractional part is not two digits long.
    NonDecimalFraction,
    /// Several periods between digit groups.
    RepeatedGrouping,
    /// Every digit run concatenated.
    DigitRuns,
    /// Floating-point parse, truncated.
    FloatTruncated,
}

impl fmt::Display for ParseRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ParseRule::PlainDigits => "plain digits",
            ParseRule::CommaGrouped => "comma grouping",
            ParseRule::MisreadThousands => "period as thousands separator",
            ParseRule::NonDecimalFraction => "period with non-decimal fraction",
            ParseRule::RepeatedGrouping => "repeated period grouping",
            ParseRule::DigitRuns => "digit-run concatenation",
            ParseRule::FloatTruncated => "truncated float",
        };
        f.write_str(name)
    }
}

/// An accepted, in-bounds value and the rule that produced it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Parsed {
    pub value: u64,
    pub rule: ParseRule,
}

fn digit_runs() -> &'static Regex {
    static DIGIT_RUNS: OnceLock<Regex> = OnceLock::new();
    DIGIT_RUNS.get_or_init(|| Regex::new(r"\d+").expect("digit-run pattern is valid"))
}

fn all_digits(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_ascii_digit())
}

fn parse_digits(s: &str) -> Option<u64> {
    if all_digits(s) { s.parse().ok() } else { None }
}

fn plain_digits(token: &str) -> Option<u64> {
    parse_digits(token)
}

fn comma_grouped(token: &str) -> Option<u64> {
    if !token.contains(',') || token.contains('.') {
        return None;
    }
    parse_digits(&token.replace(',', ""))
}

fn single_period(token: &str) -> Option<(u64, ParseRule)> {
    let (whole, frac) = token.split_once('.')?;
    if frac.contains('.') || !all_digits(whole) || !all_digits(frac) {
        return None;
    }
    let rule = match frac.len() {
        3 => ParseRule::MisreadThousands,
        2 => return None,
        _ => ParseRule::NonDecimalFraction,
    };
    parse_digits(&format!("{whole}{frac}")).map(|v| (v, rule))
}

fn repeated_grouping(token: &str) -> Option<u64> {
    let segments: Vec<&str> = token.split('.').collect();
    if segments.len() < 3 || !segments.iter().all(|s| all_digits(s)) {
        return None;
    }
    parse_digits(&segments.concat())
}

fn concatenated_digit_runs(token: &str) -> Option<u64> {
    let joined: String = digit_runs().find_iter(token).map(|m| m.as_str()).collect();
    parse_digits(&joined)
}

fn truncated_float(token: &str) -> Option<u64> {
    let value: f64 = token.replace(',', "").trim().parse().ok()?;
    if value.is_finite() && value >= 0.0 && value < u64::MAX as f64 {
        Some(value.trunc() as u64)
    } else {
        None
    }
}

/// Runs the decision list without bounds checking.
///
/// Returns the first interpretation any rule yields, or `None` when the
/// token contains nothing numeric.
pub fn interpret(token: &str) -> Option<Parsed> {
    let hit = |value: u64, rule: ParseRule| Some(Parsed { value, rule });

    if let Some(v) = plain_digits(token) {
        return hit(v, ParseRule::PlainDigits);
    }
    if let Some(v) = comma_grouped(token) {
        return hit(v, ParseRule::CommaGrouped);
    }
    if let Some((v, rule)) = single_period(token) {
        return hit(v, rule);
    }
    if let Some(v) = repeated_grouping(token) {
        return hit(v, ParseRule::RepeatedGrouping);
    }
    if let Some(v) = concatenated_digit_runs(token) {
        return hit(v, ParseRule::DigitRuns);
    }
    if let Some(v) = truncated_float(token) {
        return hit(v, ParseRule::FloatTruncated);
    }
    None
}

/// Parses a normalized token and enforces `bounds`.
///
/// Out-of-range values are rejected, never clamped.
pub fn parse_value(token: &str, bounds: Bounds) -> Result<Parsed, ExtractError> {
    let parsed = interpret(token)
        .ok_or_else(|| ExtractError::rejected(token, "no rule yields an integer"))?;

    if !bounds.contains(parsed.value) {
        return Err(ExtractError::rejected(
            token,
            format!(
                "{} ({}) outside [{}, {}]",
                parsed.value, parsed.rule, bounds.min, bounds.max
            ),
        ));
    }

    Ok(parsed)
}
