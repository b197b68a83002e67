//! Numeric text helpers shared by the encoder and the decoder
//!
//! Servers render special floating point values as `inf`, `-inf` and `nan`
//! (case varies between versions, and a sign may precede either token).

use crate::error::{RedisError, RedisResult};

/// Parse a double as rendered by the server.
///
/// Accepts an optional `+`/`-` sign followed by either a decimal number or the
/// case-insensitive tokens `inf` / `nan`. A sign on `nan` is accepted and
/// discarded.
///
/// # Errors
///
/// Returns [`RedisError::Type`] for anything that is not a number.
pub fn to_double(text: &str) -> RedisResult<f64> {
    let trimmed = text.trim();
    let (negative, unsigned) = match trimmed.as_bytes().first() {
        Some(b'-') => (true, &trimmed[1..]),
        Some(b'+') => (false, &trimmed[1..]),
        _ => (false, trimmed),
    };

    if unsigned.eq_ignore_ascii_case("inf") || unsigned.eq_ignore_ascii_case("infinity") {
        return Ok(if negative {
            f64::NEG_INFINITY
        } else {
            f64::INFINITY
        });
    }
    if unsigned.eq_ignore_ascii_case("nan") {
        return Ok(f64::NAN);
    }

    // Reject what `f64::from_str` would otherwise accept as special values.
    if unsigned.is_empty()
        || unsigned
            .bytes()
            .any(|b| b.is_ascii_alphabetic() && b != b'e' && b != b'E')
    {
        return Err(RedisError::Type(format!("Invalid double: {text:?}")));
    }

    trimmed
        .parse::<f64>()
        .map_err(|e| RedisError::Type(format!("Invalid double {text:?}: {e}")))
}

/// Render a double in the textual form servers accept as a command argument.
#[must_use]
pub fn format_double(value: f64) -> String {
    if value.is_nan() {
        "nan".to_string()
    } else if value.is_infinite() {
        if value.is_sign_positive() {
            "+inf".to_string()
        } else {
            "-inf".to_string()
        }
    } else {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_double_nan() {
        assert!(to_double("nan").unwrap().is_nan());
        assert!(to_double("-nan").unwrap().is_nan());
        assert!(to_double("+nan").unwrap().is_nan());
        assert!(to_double("NaN").unwrap().is_nan());
    }

    #[test]
    fn test_to_double_inf() {
        assert_eq!(to_double("inf").unwrap(), f64::INFINITY);
        assert_eq!(to_double("+inf").unwrap(), f64::INFINITY);
        assert_eq!(to_double("-inf").unwrap(), f64::NEG_INFINITY);
        assert_eq!(to_double("-INF").unwrap(), f64::NEG_INFINITY);
    }

    #[test]
    fn test_to_double_numbers() {
        assert_eq!(to_double("1.5").unwrap(), 1.5);
        assert_eq!(to_double("-0.25").unwrap(), -0.25);
        assert_eq!(to_double("+3").unwrap(), 3.0);
        assert_eq!(to_double("1e3").unwrap(), 1000.0);
    }

    #[test]
    fn test_to_double_rejects_garbage() {
        assert!(to_double("").is_err());
        assert!(to_double("-").is_err());
        assert!(to_double("abc").is_err());
        assert!(to_double("1.2.3").is_err());
        assert!(to_double("nanx").is_err());
    }

    #[test]
    fn test_format_double() {
        assert_eq!(format_double(1.5), "1.5");
        assert_eq!(format_double(3.0), "3");
        assert_eq!(format_double(f64::INFINITY), "+inf");
        assert_eq!(format_double(f64::NEG_INFINITY), "-inf");
        assert_eq!(format_double(f64::NAN), "nan");
    }
}
