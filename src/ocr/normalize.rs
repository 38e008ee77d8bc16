//! Character-confusion correction for OCR output.
//!
//! OCR engines regularly confuse digits with similar-looking letters and
//! render digit-grouping separators as assorted punctuation. This module
//! repairs those confusions where context says the text is a number, then
//! reduces the string to a numeric token made of digits, commas and periods.

/// Returns the replacement for a confusable character, if it has one.
///
/// `Some("")` means the character is dropped. Periods are not in the table;
/// they are handled by [`regroup_periods`] after extraction.
fn substitution(c: char) -> Option<&'static str> {
    let replacement = match c {
        'o' | 'O' | 'g' | 'q' | 'Q' => "0",
        'l' | 'I' | '|' => "1",
        'S' | 's' => "5",
        'G' | 'b' => "6",
        'B' => "8",
        'Z' | 'z' => "2",
        '，' | '。' | '、' | '；' | ';' | '：' | ':' => ",",
        c if c.is_whitespace() => "",
        _ => return None,
    };
    Some(replacement)
}

fn is_separator(c: char) -> bool {
    matches!(c, ',' | '.')
}

fn is_numeric_context(c: char) -> bool {
    c.is_ascii_digit() || is_separator(c)
}

/// Fraction of characters that are ASCII digits.
fn digit_fraction(chars: &[char]) -> f32 {
    if chars.is_empty() {
        return 0.0;
    }
    let digits = chars.iter().filter(|c| c.is_ascii_digit()).count();
    digits as f32 / chars.len() as f32
}

fn is_confusable_letter(c: char) -> bool {
    !c.is_whitespace() && substitution(c).is_some()
}

/// True when the first character is a digit, or a separator with a digit
/// right behind it.
fn leads_to_digit<'a>(mut chars: impl Iterator<Item = &'a char>) -> bool {
    match chars.next() {
        Some(c) if c.is_ascii_digit() => true,
        Some(c) if is_separator(*c) => chars.next().is_some_and(|d| d.is_ascii_digit()),
        _ => false,
    }
}

/// Decides whether the run `chars[start..end]` sits in numeric context.
///
/// Between two neighbours, whitespace is skipped and both must be digits or
/// separators. At an edge of the string the run must touch a digit directly,
/// or a separator that touches one.
fn run_in_numeric_context(chars: &[char], start: usize, end: usize) -> bool {
    let before = chars[..start].iter().rev().find(|c| !c.is_whitespace());
    let after = chars[end..].iter().find(|c| !c.is_whitespace());

    match (before, after) {
        (Some(p), Some(n)) => is_numeric_context(*p) && is_numeric_context(*n),
        (None, Some(_)) => leads_to_digit(chars[end..].iter()),
        (Some(_), None) => leads_to_digit(chars[..start].iter().rev()),
        (None, None) => false,
    }
}

/// Applies the confusion table to each maximal run of confusable
/// characters where the run as a whole is plausibly numeric.
///
/// Whitespace inside a run is transparent and always removed. A run is
/// replaced when its neighbours are digits or separators, when it sits at
/// an edge next to a digit, or when more than 60% of the string is digits.
/// Context is read from the original characters only.
pub fn correct_confusions(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mostly_numeric = digit_fraction(&chars) > 0.6;

    let mut out = String::with_capacity(text.len());
    let mut idx = 0;
    while idx < chars.len() {
        let c = chars[idx];
        if c.is_whitespace() {
            idx += 1;
            continue;
        }
        if !is_confusable_letter(c) {
            out.push(c);
            idx += 1;
            continue;
        }

        let mut end = idx
            + chars[idx..]
                .iter()
                .take_while(|c| substitution(**c).is_some())
                .count();
        while chars[end - 1].is_whitespace() {
            end -= 1;
        }

        let replace = mostly_numeric || run_in_numeric_context(&chars, idx, end);
        for &c in &chars[idx..end] {
            match substitution(c) {
                Some("") => {}
                Some(replacement) if replace => out.push_str(replacement),
                _ => out.push(c),
            }
        }
        idx = end;
    }
    out
}

/// Rewrites a period as a comma when exactly three digits follow it.
///
/// A period followed by a full three-digit group is far more likely to be a
/// misread thousands separator than a decimal point.
pub fn regroup_periods(token: &str) -> String {
    let chars: Vec<char> = token.chars().collect();
    let mut out = String::with_capacity(token.len());

    for (idx, &c) in chars.iter().enumerate() {
        if c == '.' {
            let run = chars[idx + 1..]
                .iter()
                .take_while(|d| d.is_ascii_digit())
                .count();
            if run == 3 {
                out.push(',');
                continue;
            }
        }
        out.push(c);
    }
    out
}

/// Full normalization: confusion correction, numeric-token extraction, and
/// period regrouping.
///
/// The result contains only ASCII digits, commas and periods, and applying
/// the function to its own output returns the output unchanged.
pub fn normalize(text: &str) -> String {
    let corrected = correct_confusions(text);
    let token: String = corrected
        .chars()
        .filter(|c| c.is_ascii_digit() || is_separator(*c))
        .collect();
    regroup_periods(&token)
}
