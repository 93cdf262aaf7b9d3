//! Inference of [`Cell`] values from untyped text, as read from CSV input.

use crate::types::Cell;

/// Parses a textual value into the narrowest matching [`Cell`].
///
/// Empty input is [`Cell::Null`], then integers, floats and booleans are tried
/// in that order. Anything else stays text.
pub fn infer_cell(value: &str) -> Cell {
    if value.is_empty() {
        return Cell::Null;
    }

    if let Ok(v) = value.parse::<i64>() {
        return Cell::I64(v);
    }

    // `f64::from_str` accepts "inf" and "NaN", which should stay text.
    if value.bytes().any(|b| b.is_ascii_digit())
        && let Ok(v) = value.parse::<f64>()
    {
        return Cell::F64(v);
    }

    match parse_bool(value) {
        Some(v) => Cell::Bool(v),
        None => Cell::String(value.to_string()),
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    if value.eq_ignore_ascii_case("true") {
        Some(true)
    } else if value.eq_ignore_ascii_case("false") {
        Some(false)
    } else {
        None
    }
}
