//! Pure field coercions. None of these fail: unusable input is `None`
//! (or zero for durations).

use bigdecimal::BigDecimal;
use std::str::FromStr;

/// Keep digits, a decimal point and a leading minus sign. More than one
/// decimal point makes the value unusable.
fn numeric_chars(raw: &str) -> Option<String> {
    let mut out = String::with_capacity(raw.len());
    let mut seen_point = false;
    for c in raw.trim().chars() {
        match c {
            '0'..='9' => out.push(c),
            '.' if seen_point => return None,
            '.' => {
                seen_point = true;
                out.push(c);
            },
            '-' if out.is_empty() => out.push(c),
            _ => {},
        }
    }
    Some(out).filter(|s| !s.is_empty())
}

pub fn decimal(raw: Option<&str>) -> Option<BigDecimal> {
    BigDecimal::from_str(&numeric_chars(raw?)?).ok()
}

pub fn float(raw: Option<&str>) -> Option<f64> {
    numeric_chars(raw?)?.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Whole numbers only; `"12.5"` or `"12a"` are absent.
pub fn integer(raw: Option<&str>) -> Option<i64> {
    let trimmed = raw?.trim();
    if trimmed.is_empty() {
        return None;
    }
    trimmed.parse().ok()
}

pub fn integer_i32(raw: Option<&str>) -> Option<i32> {
    integer(raw).and_then(|v| i32::try_from(v).ok())
}

/// `HH:MM:SS` to seconds. Anything else, including negative components or
/// totals that do not fit, is zero.
pub fn duration_secs(raw: Option<&str>) -> i64 {
    raw.and_then(checked_duration_secs).unwrap_or(0)
}

fn checked_duration_secs(raw: &str) -> Option<i64> {
    let parts: Vec<&str> = raw.trim().split(':').collect();
    let [hours, minutes, seconds] = parts.as_slice() else {
        return None;
    };
    let field = |part: &str| part.trim().parse::<i64>().ok().filter(|v| *v >= 0);
    field(*hours)?
        .checked_mul(3600)?
        .checked_add(field(*minutes)?.checked_mul(60)?)?
        .checked_add(field(*seconds)?)
}

/// Trimmed text, with empty strings treated as absent.
pub fn text(raw: Option<&str>) -> Option<String> {
    raw.map(str::trim).filter(|s| !s.is_empty()).map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decimal_strips_noise() {
        assert_eq!(decimal(Some(" 1,234.50 t")), Some(BigDecimal::from_str("1234.50").unwrap()));
        assert_eq!(decimal(Some("-3.2")), Some(BigDecimal::from_str("-3.2").unwrap()));
        assert_eq!(decimal(Some("5-2")), Some(BigDecimal::from_str("52").unwrap()));
    }

    #[test]
    fn test_decimal_absent_on_garbage() {
        assert_eq!(decimal(None), None);
        assert_eq!(decimal(Some("")), None);
        assert_eq!(decimal(Some("n/a")), None);
        assert_eq!(decimal(Some("-")), None);
        assert_eq!(decimal(Some(".")), None);
    }

    #[test]
    fn test_second_decimal_point_is_absent() {
        assert_eq!(decimal(Some("1.2.3")), None);
        assert_eq!(decimal(Some("1..5")), None);
        assert_eq!(float(Some("4.5.6 kg")), None);
    }

    #[test]
    fn test_float() {
        assert_eq!(float(Some("42.5 kg")), Some(42.5));
        assert_eq!(float(Some("abc")), None);
    }

    #[test]
    fn test_integer_is_strict() {
        assert_eq!(integer(Some(" 17 ")), Some(17));
        assert_eq!(integer(Some("-4")), Some(-4));
        assert_eq!(integer(Some("12.5")), None);
        assert_eq!(integer(Some("12a")), None);
        assert_eq!(integer(Some("   ")), None);
        assert_eq!(integer(None), None);
        assert_eq!(integer_i32(Some("99999999999")), None);
    }

    #[test]
    fn test_duration_secs() {
        assert_eq!(duration_secs(Some("01:02:03")), 3723);
        assert_eq!(duration_secs(Some("00:00:00")), 0);
        assert_eq!(duration_secs(Some("25:00:00")), 90_000);
        assert_eq!(duration_secs(Some("1:2")), 0);
        assert_eq!(duration_secs(Some("aa:bb:cc")), 0);
        assert_eq!(duration_secs(None), 0);
    }

    #[test]
    fn test_duration_overflow_and_negatives_are_zero() {
        assert_eq!(duration_secs(Some("9223372036854775807:00:00")), 0);
        assert_eq!(duration_secs(Some("2562047788015215:59:59")), 0);
        assert_eq!(duration_secs(Some("00:00:9223372036854775807")), i64::MAX);
        assert_eq!(duration_secs(Some("-01:00:00")), 0);
        assert_eq!(duration_secs(Some("01:-5:00")), 0);
    }

    #[test]
    fn test_text_treats_blank_as_absent() {
        assert_eq!(text(Some("  Base Course ")), Some("Base Course".to_string()));
        assert_eq!(text(Some("   ")), None);
    }
}
