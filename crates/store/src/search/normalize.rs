//! Canonical forms for indexed and queried values.
//!
//! Both sides of a comparison go through the same functions here, so a value
//! written as `1000 mg` matches a query for `1 g` and `2024-03` matches any
//! instant inside March 2024.

use std::fmt;

use chrono::{DateTime, Months, NaiveDate, NaiveDateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};

/// Lowest instant used for an open period start.
pub const MIN_INSTANT_MS: i64 = i64::MIN / 2;

/// Highest instant used for an open period end.
pub const MAX_INSTANT_MS: i64 = i64::MAX / 2;

/// Lowercases and strips common Latin diacritics.
pub fn normalize_string(s: &str) -> String {
    s.chars()
        .flat_map(char::to_lowercase)
        .map(fold_diacritic)
        .collect()
}

fn fold_diacritic(c: char) -> char {
    match c {
        'à' | 'á' | 'â' | 'ã' | 'ä' | 'å' | 'ā' => 'a',
        'ç' | 'ć' | 'č' => 'c',
        'è' | 'é' | 'ê' | 'ë' | 'ē' | 'ě' => 'e',
        'ì' | 'í' | 'î' | 'ï' | 'ī' => 'i',
        'ñ' | 'ń' | 'ň' => 'n',
        'ò' | 'ó' | 'ô' | 'õ' | 'ö' | 'ø' | 'ō' => 'o',
        'ù' | 'ú' | 'û' | 'ü' | 'ū' | 'ů' => 'u',
        'ý' | 'ÿ' => 'y',
        'š' | 'ś' => 's',
        'ž' | 'ź' | 'ż' => 'z',
        'ř' => 'r',
        'ł' => 'l',
        _ => c,
    }
}

/// Date precision for search parameter values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatePrecision {
    /// Year only (e.g., "2024")
    Year,
    /// Year and month (e.g., "2024-01")
    Month,
    /// Full date (e.g., "2024-01-15")
    Day,
    /// Date and time to minutes (e.g., "2024-01-15T10:30")
    Minute,
    /// Date and time to seconds (e.g., "2024-01-15T10:30:00")
    Second,
    /// Full precision with fractional seconds
    Millisecond,
}

impl DatePrecision {
    /// Parse precision from an ISO date string.
    pub fn from_date_string(s: &str) -> Self {
        let base = strip_timezone(s);

        match base.len() {
            4 => DatePrecision::Year,
            7 => DatePrecision::Month,
            10 => DatePrecision::Day,
            16 => DatePrecision::Minute,
            19 => DatePrecision::Second,
            _ => DatePrecision::Millisecond,
        }
    }
}

impl fmt::Display for DatePrecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DatePrecision::Year => write!(f, "year"),
            DatePrecision::Month => write!(f, "month"),
            DatePrecision::Day => write!(f, "day"),
            DatePrecision::Minute => write!(f, "minute"),
            DatePrecision::Second => write!(f, "second"),
            DatePrecision::Millisecond => write!(f, "millisecond"),
        }
    }
}

/// Removes a trailing `Z` or `±hh:mm` offset from the time part.
fn strip_timezone(s: &str) -> &str {
    let s = s.strip_suffix('Z').unwrap_or(s);
    match s.find('T') {
        Some(t) => {
            let time = &s[t..];
            match time.rfind(['+', '-']) {
                Some(offset) => &s[..t + offset],
                None => s,
            }
        }
        None => s,
    }
}

/// An inclusive range of epoch milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    /// First millisecond covered.
    pub start_ms: i64,
    /// Last millisecond covered.
    pub end_ms: i64,
}

impl DateRange {
    /// Creates a range from inclusive bounds.
    pub fn new(start_ms: i64, end_ms: i64) -> Self {
        Self { start_ms, end_ms }
    }

    /// Parses a FHIR date, dateTime or instant into the range it covers.
    ///
    /// Values without an offset are taken as UTC. Returns `None` for text
    /// that is not a date.
    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim();
        match DatePrecision::from_date_string(s) {
            DatePrecision::Year => {
                let year: i32 = s.parse().ok()?;
                let start = NaiveDate::from_ymd_opt(year, 1, 1)?;
                let end = NaiveDate::from_ymd_opt(year + 1, 1, 1)?;
                Some(Self::from_dates(start, end))
            }
            DatePrecision::Month => {
                let start = NaiveDate::parse_from_str(&format!("{}-01", s), "%Y-%m-%d").ok()?;
                let end = start.checked_add_months(Months::new(1))?;
                Some(Self::from_dates(start, end))
            }
            DatePrecision::Day => {
                let start = NaiveDate::parse_from_str(s, "%Y-%m-%d").ok()?;
                let end = start.succ_opt()?;
                Some(Self::from_dates(start, end))
            }
            precision => {
                let instant = parse_instant(s)?;
                let start = instant.timestamp_millis();
                let width = match precision {
                    DatePrecision::Minute => 60_000,
                    DatePrecision::Second => 1_000,
                    _ => 1,
                };
                // Truncate to the stated precision.
                let start = start - start.rem_euclid(width);
                Some(Self::new(start, start + width - 1))
            }
        }
    }

    /// Builds the range a Period covers. Missing bounds are open.
    pub fn from_period(start: Option<&str>, end: Option<&str>) -> Option<Self> {
        if start.is_none() && end.is_none() {
            return None;
        }
        let start_ms = match start {
            Some(s) => Self::parse(s)?.start_ms,
            None => MIN_INSTANT_MS,
        };
        let end_ms = match end {
            Some(e) => Self::parse(e)?.end_ms,
            None => MAX_INSTANT_MS,
        };
        Some(Self::new(start_ms, end_ms))
    }

    fn from_dates(start: NaiveDate, end_exclusive: NaiveDate) -> Self {
        let start = Utc
            .from_utc_datetime(&start.and_hms_opt(0, 0, 0).unwrap_or_default())
            .timestamp_millis();
        let end = Utc
            .from_utc_datetime(&end_exclusive.and_hms_opt(0, 0, 0).unwrap_or_default())
            .timestamp_millis();
        Self::new(start, end - 1)
    }

    /// Returns true if this range lies entirely within `other`.
    pub fn within(&self, other: &DateRange) -> bool {
        self.start_ms >= other.start_ms && self.end_ms <= other.end_ms
    }

    /// Returns true if the two ranges share at least one instant.
    pub fn overlaps(&self, other: &DateRange) -> bool {
        self.start_ms <= other.end_ms && self.end_ms >= other.start_ms
    }
}

fn parse_instant(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_str(s, "%Y-%m-%dT%H:%M%:z") {
        return Some(dt.with_timezone(&Utc));
    }
    let naive = s.strip_suffix('Z').unwrap_or(s);
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(naive, fmt) {
            return Some(Utc.from_utc_datetime(&naive));
        }
    }
    None
}

/// Parses a decimal from search or resource text.
pub fn parse_decimal(s: &str) -> Option<Decimal> {
    let s = s.trim();
    s.parse::<Decimal>()
        .ok()
        .or_else(|| Decimal::from_scientific(s).ok())
}

/// Returns the implicit range of a decimal as written: `100` covers
/// `[99.5, 100.5)` and `100.0` covers `[99.95, 100.05)`.
///
/// `None` when a bound falls outside the decimal range.
pub fn implicit_range(value: Decimal) -> Option<(Decimal, Decimal)> {
    let half = Decimal::new(5, (value.scale() + 1).min(Decimal::MAX_SCALE));
    Some((value.checked_sub(half)?, value.checked_add(half)?))
}

/// Returns the `ap` range of a decimal: 10% either side of the value.
pub fn approximate_range(value: Decimal) -> Option<(Decimal, Decimal)> {
    let margin = value.checked_mul(Decimal::new(1, 1))?.abs();
    Some((value.checked_sub(margin)?, value.checked_add(margin)?))
}

/// Converts a decimal to the floating point form stored in the index.
pub fn decimal_to_f64(value: Decimal) -> Option<f64> {
    value.to_f64()
}

const UCUM_SYSTEM: &str = "http://unitsofmeasure.org";

/// Maps a UCUM unit code onto its canonical unit and scale factor.
///
/// Covers mass, length and time. Unknown codes return `None` and are
/// compared as written.
fn ucum_factor(code: &str) -> Option<(&'static str, Decimal)> {
    let entry = match code {
        "ug" => ("g", Decimal::new(1, 6)),
        "mg" => ("g", Decimal::new(1, 3)),
        "g" => ("g", Decimal::ONE),
        "kg" => ("g", Decimal::new(1000, 0)),
        "mm" => ("m", Decimal::new(1, 3)),
        "cm" => ("m", Decimal::new(1, 2)),
        "m" => ("m", Decimal::ONE),
        "km" => ("m", Decimal::new(1000, 0)),
        "ms" => ("s", Decimal::new(1, 3)),
        "s" => ("s", Decimal::ONE),
        "min" => ("s", Decimal::new(60, 0)),
        "h" => ("s", Decimal::new(3600, 0)),
        "d" => ("s", Decimal::new(86400, 0)),
        _ => return None,
    };
    Some(entry)
}

/// Returns the canonical `(value, unit)` for a UCUM quantity.
///
/// Quantities with an explicit non-UCUM system are not canonicalized.
pub fn canonicalize_quantity(
    value: Decimal,
    system: Option<&str>,
    code: Option<&str>,
) -> Option<(Decimal, &'static str)> {
    if system.is_some_and(|s| s != UCUM_SYSTEM) {
        return None;
    }
    let (unit, factor) = ucum_factor(code?)?;
    value.checked_mul(factor).map(|v| (v.normalize(), unit))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_string() {
        assert_eq!(normalize_string("Zoë Müller"), "zoe muller");
        assert_eq!(normalize_string("SMITH"), "smith");
    }

    #[test]
    fn test_date_precision() {
        assert_eq!(DatePrecision::from_date_string("2024"), DatePrecision::Year);
        assert_eq!(DatePrecision::from_date_string("2024-01"), DatePrecision::Month);
        assert_eq!(DatePrecision::from_date_string("2024-01-15"), DatePrecision::Day);
        assert_eq!(
            DatePrecision::from_date_string("2024-01-15T10:30:00Z"),
            DatePrecision::Second
        );
        assert_eq!(
            DatePrecision::from_date_string("2024-01-15T10:30:00+02:00"),
            DatePrecision::Second
        );
        assert_eq!(
            DatePrecision::from_date_string("2024-01-15T10:30:00.123Z"),
            DatePrecision::Millisecond
        );
    }

    #[test]
    fn test_date_ranges() {
        let year = DateRange::parse("2024").unwrap();
        let month = DateRange::parse("2024-02").unwrap();
        let day = DateRange::parse("2024-02-29").unwrap();
        let instant = DateRange::parse("2024-02-29T12:00:00Z").unwrap();

        assert!(month.within(&year));
        assert!(day.within(&month));
        assert!(instant.within(&day));
        assert_eq!(day.end_ms - day.start_ms + 1, 86_400_000);
        assert_eq!(instant.end_ms - instant.start_ms, 999);

        let offset = DateRange::parse("2024-02-29T14:00:00+02:00").unwrap();
        assert_eq!(offset, instant);

        assert!(DateRange::parse("not a date").is_none());
        assert!(DateRange::parse("2024-13").is_none());
    }

    #[test]
    fn test_period_range() {
        let open = DateRange::from_period(Some("2024-01-01"), None).unwrap();
        assert_eq!(open.end_ms, MAX_INSTANT_MS);
        assert!(DateRange::parse("2090-01-01").unwrap().within(&open));
        assert!(DateRange::from_period(None, None).is_none());
    }

    #[test]
    fn test_implicit_range() {
        let (low, high) = implicit_range(parse_decimal("100").unwrap()).unwrap();
        assert_eq!(low, parse_decimal("99.5").unwrap());
        assert_eq!(high, parse_decimal("100.5").unwrap());

        let (low, high) = implicit_range(parse_decimal("0.40").unwrap()).unwrap();
        assert_eq!(low, parse_decimal("0.395").unwrap());
        assert_eq!(high, parse_decimal("0.405").unwrap());
    }

    #[test]
    fn test_implicit_range_at_decimal_limits() {
        // Already at the maximum scale
        let precise = parse_decimal("1.0000000000000000000000000000").unwrap();
        let (low, high) = implicit_range(precise).unwrap();
        assert!(low < precise && precise < high);

        assert!(implicit_range(Decimal::MAX).is_none());
        assert!(implicit_range(Decimal::MIN).is_none());
    }

    #[test]
    fn test_approximate_range() {
        let (low, high) = approximate_range(Decimal::new(-100, 0)).unwrap();
        assert_eq!(low, Decimal::new(-110, 0));
        assert_eq!(high, Decimal::new(-90, 0));

        assert!(approximate_range(Decimal::MAX).is_none());
    }

    #[test]
    fn test_canonicalize_quantity() {
        let thousand_mg =
            canonicalize_quantity(parse_decimal("1000").unwrap(), Some(UCUM_SYSTEM), Some("mg"));
        let one_g = canonicalize_quantity(Decimal::ONE, None, Some("g"));
        assert_eq!(thousand_mg, one_g);
        assert_eq!(one_g.unwrap().1, "g");

        let minutes = canonicalize_quantity(Decimal::new(2, 0), None, Some("min")).unwrap();
        assert_eq!(minutes, (Decimal::new(120, 0), "s"));

        assert!(canonicalize_quantity(Decimal::ONE, Some("http://other"), Some("mg")).is_none());
        assert!(canonicalize_quantity(Decimal::ONE, None, Some("mm[Hg]")).is_none());
    }
}
