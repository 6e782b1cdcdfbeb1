//! Report date carried in a file name, e.g. `REPORT_310723.xml` -> 2023-07-31.
//!
//! The date is the segment after the last `_`, up to the first `.`. Dates
//! are read day-first.

use chrono::NaiveDate;

use crate::ingest::error::IngestError;

pub const DATE_SEPARATOR: char = '_';
const MIN_DATE_CHARS: usize = 6;

/// Derive the companion date for aggregates from `file_name`.
pub fn derive_report_date(file_name: &str, extension: &str) -> Result<NaiveDate, IngestError> {
    let fail = || IngestError::DateDerivation(file_name.to_string());

    if !has_extension(file_name, extension) {
        return Err(fail());
    }
    let (_, tail) = file_name.rsplit_once(DATE_SEPARATOR).ok_or_else(fail)?;
    let date_part = tail.split('.').next().unwrap_or_default();
    if date_part.chars().count() < MIN_DATE_CHARS {
        return Err(fail());
    }
    parse_day_first(date_part).ok_or_else(fail)
}

/// Case-insensitive suffix check.
pub fn has_extension(file_name: &str, extension: &str) -> bool {
    file_name.len() >= extension.len()
        && file_name
            .get(file_name.len() - extension.len()..)
            .is_some_and(|suffix| suffix.eq_ignore_ascii_case(extension))
}

fn parse_day_first(raw: &str) -> Option<NaiveDate> {
    if raw.chars().all(|c| c.is_ascii_digit()) {
        return parse_compact(raw);
    }

    const FORMATS: &[&str] = &[
        "%d-%m-%y", "%d-%m-%Y", "%Y-%m-%d", "%d%b%y", "%d%b%Y", "%d-%b-%y", "%d-%b-%Y",
    ];
    FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(raw, fmt).ok())
}

/// `DDMMYY`, `DDMMYYYY`, or `YYYYMMDD` as a fallback for eight digits.
fn parse_compact(raw: &str) -> Option<NaiveDate> {
    let num = |range: std::ops::Range<usize>| raw.get(range)?.parse::<u32>().ok();
    match raw.len() {
        6 => {
            let (d, m, y) = (num(0..2)?, num(2..4)?, num(4..6)?);
            NaiveDate::from_ymd_opt(2000 + y as i32, m, d)
        },
        8 => {
            let day_first = NaiveDate::from_ymd_opt(num(4..8)? as i32, num(2..4)?, num(0..2)?);
            day_first.or_else(|| NaiveDate::from_ymd_opt(num(0..4)? as i32, num(4..6)?, num(6..8)?))
        },
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_six_digit_day_first() {
        assert_eq!(derive_report_date("REPORT_310723.xml", ".xml").unwrap(), date(2023, 7, 31));
        assert_eq!(derive_report_date("a_b_010224.XML", ".xml").unwrap(), date(2024, 2, 1));
    }

    #[test]
    fn test_eight_digit_forms() {
        assert_eq!(derive_report_date("R_31072023.xml", ".xml").unwrap(), date(2023, 7, 31));
        assert_eq!(derive_report_date("R_20230731.xml", ".xml").unwrap(), date(2023, 7, 31));
    }

    #[test]
    fn test_separated_forms() {
        assert_eq!(derive_report_date("R_31-07-2023.xml", ".xml").unwrap(), date(2023, 7, 31));
        assert_eq!(derive_report_date("R_2023-07-31.xml", ".xml").unwrap(), date(2023, 7, 31));
        assert_eq!(derive_report_date("R_31Jul2023.xml", ".xml").unwrap(), date(2023, 7, 31));
    }

    #[test]
    fn test_two_digit_year_with_separators() {
        assert_eq!(derive_report_date("R_31-07-23.xml", ".xml").unwrap(), date(2023, 7, 31));
    }

    #[test]
    fn test_day_first_disambiguation() {
        // 02/03 is 2 March, not 3 February
        assert_eq!(derive_report_date("R_020324.xml", ".xml").unwrap(), date(2024, 3, 2));
    }

    #[test]
    fn test_rejections() {
        for name in [
            "REPORT_310723.csv",
            "REPORT310723.xml",
            "REPORT_3107.xml",
            "REPORT_999999.xml",
            "REPORT_abcdef.xml",
        ] {
            let err = derive_report_date(name, ".xml").unwrap_err();
            assert!(matches!(err, IngestError::DateDerivation(_)), "{name}");
            assert!(err.to_string().contains("Could not derive date"));
        }
    }

    #[test]
    fn test_has_extension() {
        assert!(has_extension("a.xml", ".xml"));
        assert!(has_extension("a.XmL", ".xml"));
        assert!(!has_extension("a.xmlx", ".xml"));
        assert!(!has_extension("ml", ".xml"));
    }
}
