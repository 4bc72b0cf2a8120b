use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, TimeZone};

use crate::model::Ms;

/// `dd/MM/yyyy HH:mm:ss`, attached to listed bookings.
pub const LISTING_FORMAT: &str = "%d/%m/%Y %H:%M:%S";
/// `dd/MM/yyyy HH:mm`, sent in notifications.
pub const NOTIFICATION_FORMAT: &str = "%d/%m/%Y %H:%M";

const LOCAL_DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M",
];

/// Converts between stored Unix-ms schedules and text in one fixed zone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduleFormatter {
    tz: FixedOffset,
}

impl ScheduleFormatter {
    pub fn new(tz: FixedOffset) -> Self {
        Self { tz }
    }

    pub fn timezone(&self) -> FixedOffset {
        self.tz
    }

    /// Parse schedule input. RFC 3339 with an explicit offset is taken as-is;
    /// `YYYY-MM-DDTHH:MM[:SS]` and bare `YYYY-MM-DD` (midnight) are read in
    /// the configured zone.
    pub fn parse(&self, input: &str) -> Option<Ms> {
        let input = input.trim();
        if let Ok(dt) = DateTime::parse_from_rfc3339(input) {
            return Some(dt.timestamp_millis());
        }
        for fmt in LOCAL_DATETIME_FORMATS {
            if let Ok(naive) = NaiveDateTime::parse_from_str(input, fmt) {
                return self.localize(naive);
            }
        }
        let date = NaiveDate::parse_from_str(input, "%Y-%m-%d").ok()?;
        self.localize(date.and_hms_opt(0, 0, 0)?)
    }

    fn localize(&self, naive: NaiveDateTime) -> Option<Ms> {
        self.tz
            .from_local_datetime(&naive)
            .single()
            .map(|dt| dt.timestamp_millis())
    }

    pub fn format_listing(&self, at: Ms) -> String {
        self.format(at, LISTING_FORMAT)
    }

    pub fn format_notification(&self, at: Ms) -> String {
        self.format(at, NOTIFICATION_FORMAT)
    }

    fn format(&self, at: Ms, fmt: &str) -> String {
        match DateTime::from_timestamp_millis(at) {
            Some(utc) => utc.with_timezone(&self.tz).format(fmt).to_string(),
            None => String::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn guayaquil() -> ScheduleFormatter {
        ScheduleFormatter::new(FixedOffset::west_opt(5 * 3600).unwrap())
    }

    fn rfc3339_ms(s: &str) -> Ms {
        DateTime::parse_from_rfc3339(s).unwrap().timestamp_millis()
    }

    #[test]
    fn parse_local_forms_use_configured_zone() {
        let f = guayaquil();
        let expected = rfc3339_ms("2030-01-15T10:30:00-05:00");
        assert_eq!(f.parse("2030-01-15T10:30"), Some(expected));
        assert_eq!(f.parse("2030-01-15T10:30:00"), Some(expected));
        assert_eq!(f.parse("2030-01-15 10:30"), Some(expected));
        assert_eq!(f.parse("  2030-01-15T10:30:00.000 "), Some(expected));
    }

    #[test]
    fn parse_bare_date_is_local_midnight() {
        let f = guayaquil();
        assert_eq!(f.parse("2030-01-15"), Some(rfc3339_ms("2030-01-15T00:00:00-05:00")));
    }

    #[test]
    fn parse_explicit_offset_wins() {
        let f = guayaquil();
        assert_eq!(f.parse("2030-01-15T10:30:00Z"), Some(rfc3339_ms("2030-01-15T10:30:00+00:00")));
    }

    #[test]
    fn parse_rejects_garbage() {
        let f = guayaquil();
        assert_eq!(f.parse(""), None);
        assert_eq!(f.parse("tomorrow"), None);
        assert_eq!(f.parse("2030-13-01"), None);
        assert_eq!(f.parse("15/01/2030"), None);
    }

    #[test]
    fn formats_in_configured_zone() {
        let f = guayaquil();
        let at = rfc3339_ms("2030-01-15T15:30:45Z");
        assert_eq!(f.format_listing(at), "15/01/2030 10:30:45");
        assert_eq!(f.format_notification(at), "15/01/2030 10:30");
    }

    #[test]
    fn format_crosses_midnight_backwards() {
        let f = guayaquil();
        assert_eq!(f.format_listing(0), "31/12/1969 19:00:00");
    }
}
