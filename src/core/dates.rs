//! Spreadsheet date serials
//!
//! Serial 0 is 1899-12-30 and serial 1 is 1900-01-01. Serials below 61 are
//! shifted by one day to absorb the fictitious 1900-02-29 that spreadsheet
//! applications still count.

use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime};

/// Last representable serial (9999-12-31)
pub const MAX_SERIAL: f64 = 2_958_465.0;

const LEAP_BUG_SERIAL: f64 = 61.0;

fn epoch() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(1899, 12, 30)
        .unwrap_or_default()
        .and_time(NaiveTime::MIN)
}

/// Convert a serial to a date-time. None for NaN, infinities and out-of-range serials.
pub fn serial_to_datetime(serial: f64) -> Option<NaiveDateTime> {
    if !serial.is_finite() || !(0.0..MAX_SERIAL + 1.0).contains(&serial) {
        return None;
    }
    let shifted = if (1.0..LEAP_BUG_SERIAL).contains(&serial) {
        serial + 1.0
    } else {
        serial
    };
    let millis = (shifted * 86_400_000.0).round() as i64;
    epoch().checked_add_signed(Duration::milliseconds(millis))
}

/// Convert a calendar date to its serial
pub fn date_to_serial(date: NaiveDate) -> f64 {
    datetime_to_serial(date.and_time(NaiveTime::MIN))
}

/// Convert a date-time to its (fractional) serial
pub fn datetime_to_serial(datetime: NaiveDateTime) -> f64 {
    let millis = (datetime - epoch()).num_milliseconds() as f64;
    let serial = millis / 86_400_000.0;
    // 1900-01-01 ..= 1900-02-28 sit one day earlier than the plain day count
    if (2.0..LEAP_BUG_SERIAL).contains(&serial) {
        serial - 1.0
    } else {
        serial
    }
}

/// Parse an ISO-8601 date or date-time ("2024-01-15", "2024-01-15T08:30:00") into a serial
pub fn parse_iso_serial(text: &str) -> Option<f64> {
    let text = text.trim();
    if let Ok(datetime) = NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f") {
        return Some(datetime_to_serial(datetime));
    }
    if let Ok(datetime) = NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S") {
        return Some(datetime_to_serial(datetime));
    }
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .map(date_to_serial)
}

/// True when the serial maps to a real calendar date
pub fn is_valid_serial(serial: f64) -> bool {
    serial_to_datetime(serial).is_some()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_serial_one_is_first_of_january_1900() {
        assert_eq!(serial_to_datetime(1.0).unwrap().date(), ymd(1900, 1, 1));
        assert_eq!(date_to_serial(ymd(1900, 1, 1)), 1.0);
    }

    #[test]
    fn test_modern_dates() {
        assert_eq!(date_to_serial(ymd(2024, 1, 15)), 45306.0);
        assert_eq!(serial_to_datetime(45306.0).unwrap().date(), ymd(2024, 1, 15));
        assert_eq!(serial_to_datetime(61.0).unwrap().date(), ymd(1900, 3, 1));
    }

    #[test]
    fn test_fractional_serial_keeps_time() {
        let dt = serial_to_datetime(45306.5).unwrap();
        assert_eq!(dt.format("%H:%M").to_string(), "12:00");
    }

    #[test]
    fn test_invalid_serials() {
        assert!(!is_valid_serial(f64::NAN));
        assert!(!is_valid_serial(f64::INFINITY));
        assert!(!is_valid_serial(-1.0));
        assert!(!is_valid_serial(MAX_SERIAL + 5.0));
        assert!(is_valid_serial(0.0));
    }

    #[test]
    fn test_parse_iso_serial() {
        assert_eq!(parse_iso_serial("2024-01-15"), Some(45306.0));
        assert_eq!(parse_iso_serial("2024-01-15T12:00:00"), Some(45306.5));
        assert_eq!(parse_iso_serial("15/01/2024"), None);
    }
}
