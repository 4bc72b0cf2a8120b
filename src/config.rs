use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use chrono::{FixedOffset, Offset, Utc};

const DEFAULT_USER_SERVICE_URL: &str = "http://user-service:5003";
const DEFAULT_NOTIFICATION_SERVICE_URL: &str = "http://notification-service:5002";
/// America/Guayaquil: UTC-5 all year, no DST.
const DEFAULT_TZ_OFFSET_SECS: i32 = -5 * 3600;

#[derive(Debug, Clone)]
pub struct Config {
    pub data_dir: PathBuf,
    /// WAL appends since the last compaction that trigger a new one.
    pub compact_threshold: u64,
    pub metrics_port: Option<u16>,
    pub user_service_url: String,
    pub notification_service_url: String,
    pub http_timeout: Duration,
    /// Zone used to read offset-less schedule input and to format output.
    pub timezone: FixedOffset,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            compact_threshold: 1000,
            metrics_port: None,
            user_service_url: DEFAULT_USER_SERVICE_URL.into(),
            notification_service_url: DEFAULT_NOTIFICATION_SERVICE_URL.into(),
            http_timeout: Duration::from_millis(5000),
            timezone: default_timezone(),
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup. Missing or unparseable values
    /// fall back to the defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();

        let timezone = match lookup("BOOKING_TZ_OFFSET") {
            Some(raw) => parse_offset(&raw).unwrap_or_else(|| {
                tracing::warn!("ignoring invalid BOOKING_TZ_OFFSET {raw:?}");
                defaults.timezone
            }),
            None => defaults.timezone,
        };

        Self {
            data_dir: lookup("BOOKING_DATA_DIR").map(PathBuf::from).unwrap_or(defaults.data_dir),
            compact_threshold: parsed(&lookup, "BOOKING_COMPACT_THRESHOLD").unwrap_or(defaults.compact_threshold),
            metrics_port: parsed(&lookup, "BOOKING_METRICS_PORT"),
            user_service_url: lookup("USER_SERVICE_URL").unwrap_or(defaults.user_service_url),
            notification_service_url: lookup("NOTIFICATION_SERVICE_URL")
                .unwrap_or(defaults.notification_service_url),
            http_timeout: parsed(&lookup, "BOOKING_HTTP_TIMEOUT_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.http_timeout),
            timezone,
        }
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("bookings.wal")
    }
}

fn parsed<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    lookup(key).and_then(|s| s.trim().parse().ok())
}

fn default_timezone() -> FixedOffset {
    FixedOffset::east_opt(DEFAULT_TZ_OFFSET_SECS).unwrap_or(Utc.fix())
}

/// Parse `±HH:MM` (or `Z`) into a fixed offset.
pub fn parse_offset(raw: &str) -> Option<FixedOffset> {
    let raw = raw.trim();
    if raw.eq_ignore_ascii_case("z") || raw.eq_ignore_ascii_case("utc") {
        return FixedOffset::east_opt(0);
    }
    let (sign, rest) = match raw.as_bytes().first()? {
        b'+' => (1, &raw[1..]),
        b'-' => (-1, &raw[1..]),
        _ => return None,
    };
    let (hours, minutes) = rest.split_once(':').unwrap_or((rest, "0"));
    let hours: i32 = hours.parse().ok()?;
    let minutes: i32 = minutes.parse().ok()?;
    if hours > 23 || minutes > 59 {
        return None;
    }
    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_when_unset() {
        let config = Config::from_lookup(|_| None);
        assert_eq!(config.data_dir, PathBuf::from("./data"));
        assert_eq!(config.compact_threshold, 1000);
        assert_eq!(config.metrics_port, None);
        assert_eq!(config.user_service_url, DEFAULT_USER_SERVICE_URL);
        assert_eq!(config.http_timeout, Duration::from_secs(5));
        assert_eq!(config.timezone.local_minus_utc(), -5 * 3600);
        assert_eq!(config.wal_path(), PathBuf::from("./data/bookings.wal"));
    }

    #[test]
    fn reads_overrides() {
        let config = Config::from_lookup(lookup_from(&[
            ("BOOKING_DATA_DIR", "/var/lib/bookings"),
            ("BOOKING_COMPACT_THRESHOLD", "50"),
            ("BOOKING_METRICS_PORT", "9100"),
            ("USER_SERVICE_URL", "http://localhost:5003"),
            ("NOTIFICATION_SERVICE_URL", "http://localhost:5002"),
            ("BOOKING_HTTP_TIMEOUT_MS", "250"),
            ("BOOKING_TZ_OFFSET", "+02:30"),
        ]));
        assert_eq!(config.data_dir, PathBuf::from("/var/lib/bookings"));
        assert_eq!(config.compact_threshold, 50);
        assert_eq!(config.metrics_port, Some(9100));
        assert_eq!(config.user_service_url, "http://localhost:5003");
        assert_eq!(config.notification_service_url, "http://localhost:5002");
        assert_eq!(config.http_timeout, Duration::from_millis(250));
        assert_eq!(config.timezone.local_minus_utc(), 2 * 3600 + 30 * 60);
    }

    #[test]
    fn garbage_falls_back_to_defaults() {
        let config = Config::from_lookup(lookup_from(&[
            ("BOOKING_COMPACT_THRESHOLD", "lots"),
            ("BOOKING_METRICS_PORT", "99999"),
            ("BOOKING_TZ_OFFSET", "Mars/Olympus"),
        ]));
        assert_eq!(config.compact_threshold, 1000);
        assert_eq!(config.metrics_port, None);
        assert_eq!(config.timezone.local_minus_utc(), -5 * 3600);
    }

    #[test]
    fn offset_forms() {
        assert_eq!(parse_offset("Z").unwrap().local_minus_utc(), 0);
        assert_eq!(parse_offset("-05:00").unwrap().local_minus_utc(), -18_000);
        assert_eq!(parse_offset("+9").unwrap().local_minus_utc(), 9 * 3600);
        assert!(parse_offset("05:00").is_none());
        assert!(parse_offset("+24:00").is_none());
        assert!(parse_offset("").is_none());
    }
}
