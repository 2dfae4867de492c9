use chrono::{DateTime, NaiveDate, NaiveDateTime};
use log::error;

use crate::error::PipelineError;

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M",
    "%Y/%m/%d %H:%M:%S",
    "%Y/%m/%d %H:%M",
    "%m/%d/%Y %H:%M:%S",
    "%m/%d/%Y %H:%M",
    "%d %B %Y %H:%M",
    "%B %d, %Y %H:%M",
];

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y/%m/%d", "%m/%d/%Y", "%d %B %Y", "%B %d, %Y"];

/// Parse a free-form date/time string.
///
/// Offsets are dropped and the wall-clock time kept, so the hour is always the
/// local hour written in the string. A bare date means midnight.
pub fn parse_timestamp(input: &str) -> Result<NaiveDateTime, PipelineError> {
    let value = input.trim();
    if value.is_empty() {
        return Err(invalid(input));
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Ok(dt.naive_local());
    }
    if let Ok(dt) = DateTime::parse_from_rfc2822(value) {
        return Ok(dt.naive_local());
    }

    for format in DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(value, format) {
            return Ok(dt);
        }
    }

    for format in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(value, format) {
            if let Some(dt) = date.and_hms_opt(0, 0, 0) {
                return Ok(dt);
            }
        }
    }

    Err(invalid(input))
}

fn invalid(input: &str) -> PipelineError {
    error!("Error parsing datetime '{}'", input);
    PipelineError::InvalidTimestamp(input.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, Timelike, Weekday};

    #[test]
    fn form_timestamp() {
        let dt = parse_timestamp("2024-03-15 14:00:00").unwrap();
        assert_eq!((dt.year(), dt.month(), dt.day()), (2024, 3, 15));
        assert_eq!(dt.hour(), 14);
        assert_eq!(dt.weekday(), Weekday::Fri);
    }

    #[test]
    fn assorted_layouts() {
        for input in [
            "2024-03-15T14:30:00",
            "2024-03-15 14:30",
            "2024/03/15 14:30",
            "03/15/2024 14:30",
            "15 March 2024 14:30",
            "  2024-03-15 14:30:00.250 ",
        ] {
            let dt = parse_timestamp(input).unwrap_or_else(|e| panic!("{input}: {e}"));
            assert_eq!((dt.month(), dt.day(), dt.hour()), (3, 15, 14), "{input}");
        }
    }

    #[test]
    fn offsets_keep_wall_clock_hour() {
        let dt = parse_timestamp("2024-03-15T14:00:00-04:00").unwrap();
        assert_eq!(dt.hour(), 14);
    }

    #[test]
    fn bare_date_is_midnight() {
        let dt = parse_timestamp("2024-12-01").unwrap();
        assert_eq!((dt.month(), dt.hour()), (12, 0));
    }

    #[test]
    fn garbage_is_rejected() {
        for input in ["", "   ", "tomorrow-ish", "2024-13-40 10:00:00", "2024-03-15 25:00:00"] {
            assert_eq!(
                parse_timestamp(input),
                Err(PipelineError::InvalidTimestamp(input.to_string()))
            );
        }
    }
}
