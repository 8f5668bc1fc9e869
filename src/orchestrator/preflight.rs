//! Preflight gates: trigger detection, rest window and server load

use crate::config::Config;
use chrono::{DateTime, Duration, FixedOffset, TimeZone, Timelike, Utc};
use chrono_tz::Tz;
use std::path::PathBuf;

/// Where an invocation came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    /// A scheduled job fired
    Recurring,
    /// Someone asked for a scan now
    OnDemand,
}

/// Wraps any hour value into 0-23
pub fn normalize_hour(hour: i64) -> u32 {
    hour.rem_euclid(24) as u32
}

/// Local hours `[start, end)` during which recurring scans pause
///
/// Wraps past midnight when `start > end`; disabled when `start == end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RestWindow {
    pub start: u32,
    pub end: u32,
}

impl RestWindow {
    pub fn new(start: i64, end: i64) -> Self {
        Self {
            start: normalize_hour(start),
            end: normalize_hour(end),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.start != self.end
    }

    pub fn contains(&self, hour: u32) -> bool {
        if self.start < self.end {
            hour >= self.start && hour < self.end
        } else if self.start > self.end {
            hour >= self.start || hour < self.end
        } else {
            false
        }
    }
}

/// Site timezone resolved by name, then fixed offset, then UTC
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SiteTimezone {
    Named(Tz),
    Fixed(FixedOffset),
    Utc,
}

impl SiteTimezone {
    pub fn resolve(name: &str) -> Self {
        let name = name.trim();
        if let Ok(tz) = name.parse::<Tz>() {
            return Self::Named(tz);
        }
        if let Some(offset) = parse_offset(name) {
            return Self::Fixed(offset);
        }
        if !name.is_empty() && !name.eq_ignore_ascii_case("utc") {
            tracing::warn!("Unknown timezone {:?}, using UTC", name);
        }
        Self::Utc
    }

    /// Hour of day in this timezone
    pub fn local_hour(&self, now: DateTime<Utc>) -> u32 {
        match self {
            Self::Named(tz) => now.with_timezone(tz).hour(),
            Self::Fixed(offset) => now.with_timezone(offset).hour(),
            Self::Utc => now.hour(),
        }
    }

    /// First instant after `now` at which the local clock reads `hour`:00
    pub fn next_hour_boundary(&self, now: DateTime<Utc>, hour: u32) -> DateTime<Utc> {
        match self {
            Self::Named(tz) => next_boundary(tz, now, hour),
            Self::Fixed(offset) => next_boundary(offset, now, hour),
            Self::Utc => next_boundary(&Utc, now, hour),
        }
    }
}

fn next_boundary<Z: TimeZone>(tz: &Z, now: DateTime<Utc>, hour: u32) -> DateTime<Utc> {
    let mut date = now.with_timezone(tz).date_naive();

    // Two days cover any wrap; the third covers a DST gap at the boundary
    for _ in 0..3 {
        let candidate = date
            .and_hms_opt(hour, 0, 0)
            .and_then(|naive| tz.from_local_datetime(&naive).earliest())
            .map(|local| local.with_timezone(&Utc));

        if let Some(candidate) = candidate {
            if candidate > now {
                return candidate;
            }
        }

        date = match date.succ_opt() {
            Some(next) => next,
            None => break,
        };
    }

    now + Duration::hours(1)
}

/// Parses offsets like `+05:30`, `-0300`, `UTC+2`
fn parse_offset(value: &str) -> Option<FixedOffset> {
    let upper = value.to_ascii_uppercase();
    let rest = upper
        .strip_prefix("UTC")
        .or_else(|| upper.strip_prefix("GMT"))
        .unwrap_or(upper.as_str());

    let (sign, digits) = match rest.chars().next()? {
        '+' => (1, &rest[1..]),
        '-' => (-1, &rest[1..]),
        _ => return None,
    };

    let (hours, minutes) = match digits.split_once(':') {
        Some((h, m)) => (h.parse::<i32>().ok()?, m.parse::<i32>().ok()?),
        None if digits.len() > 2 => {
            let (h, m) = digits.split_at(digits.len() - 2);
            (h.parse::<i32>().ok()?, m.parse::<i32>().ok()?)
        }
        None => (digits.parse::<i32>().ok()?, 0),
    };

    if hours > 14 || minutes >= 60 {
        return None;
    }
    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
}

/// Source of system load averages
pub trait LoadProbe: Send + Sync {
    /// 1, 5 and 15 minute load averages, if the platform reports them
    fn load_average(&self) -> Option<[f64; 3]>;
}

/// Reads `/proc/loadavg`
#[derive(Debug, Clone)]
pub struct ProcLoadAvg {
    path: PathBuf,
}

impl Default for ProcLoadAvg {
    fn default() -> Self {
        Self {
            path: PathBuf::from("/proc/loadavg"),
        }
    }
}

impl LoadProbe for ProcLoadAvg {
    fn load_average(&self) -> Option<[f64; 3]> {
        let content = std::fs::read_to_string(&self.path).ok()?;
        parse_loadavg(&content)
    }
}

fn parse_loadavg(content: &str) -> Option<[f64; 3]> {
    let mut fields = content.split_whitespace().map(|f| f.parse::<f64>().ok());
    Some([fields.next()??, fields.next()??, fields.next()??])
}

/// Fixed load, or none at all
#[derive(Debug, Clone, Copy, Default)]
pub struct StaticLoad(pub Option<[f64; 3]>);

impl LoadProbe for StaticLoad {
    fn load_average(&self) -> Option<[f64; 3]> {
        self.0
    }
}

/// Gate settings taken from the configuration
#[derive(Debug, Clone)]
pub struct Preflight {
    pub window: RestWindow,
    pub timezone: SiteTimezone,
    pub load_threshold: f64,
    pub load_delay: u64,
    pub batch_delay: u64,
}

impl Preflight {
    pub fn from_config(config: &Config) -> Self {
        Self {
            window: RestWindow::new(config.schedule.rest_start, config.schedule.rest_end),
            timezone: SiteTimezone::resolve(&config.site.timezone),
            load_threshold: config.schedule.load_threshold,
            load_delay: config.schedule.load_delay,
            batch_delay: config.scan.batch_delay,
        }
    }

    /// When the rest window is active at `now`, the instant it ends
    pub fn rest_window_end(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        if !self.window.is_enabled() {
            return None;
        }
        let hour = self.timezone.local_hour(now);
        if self.window.contains(hour) {
            Some(self.timezone.next_hour_boundary(now, self.window.end))
        } else {
            None
        }
    }

    /// Whether the 1-minute load is above the threshold
    pub fn overloaded(&self, load: Option<[f64; 3]>) -> Option<f64> {
        load.map(|avg| avg[0])
            .filter(|one_minute| *one_minute > self.load_threshold)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn utc(day: u32, hour: u32, minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, day, hour, minute, 0).unwrap()
    }

    #[test]
    fn test_normalize_hour() {
        assert_eq!(normalize_hour(0), 0);
        assert_eq!(normalize_hour(23), 23);
        assert_eq!(normalize_hour(24), 0);
        assert_eq!(normalize_hour(-1), 23);
        assert_eq!(normalize_hour(49), 1);
    }

    #[test]
    fn test_window_contains() {
        let day = RestWindow::new(8, 20);
        assert!(day.contains(8));
        assert!(day.contains(19));
        assert!(!day.contains(20));
        assert!(!day.contains(7));

        let night = RestWindow::new(22, 6);
        assert!(night.contains(23));
        assert!(night.contains(0));
        assert!(night.contains(5));
        assert!(!night.contains(6));
        assert!(!night.contains(21));

        let off = RestWindow::new(5, 5);
        assert!(!off.is_enabled());
        assert!(!off.contains(5));
    }

    #[test]
    fn test_timezone_resolution_chain() {
        assert_eq!(
            SiteTimezone::resolve("Europe/Berlin"),
            SiteTimezone::Named(chrono_tz::Europe::Berlin)
        );
        assert_eq!(
            SiteTimezone::resolve("+05:30"),
            SiteTimezone::Fixed(FixedOffset::east_opt(5 * 3600 + 1800).unwrap())
        );
        assert_eq!(
            SiteTimezone::resolve("UTC-3"),
            SiteTimezone::Fixed(FixedOffset::west_opt(3 * 3600).unwrap())
        );
        assert_eq!(SiteTimezone::resolve("Mars/Olympus"), SiteTimezone::Utc);
        assert_eq!(SiteTimezone::resolve(""), SiteTimezone::Utc);
    }

    #[test]
    fn test_rest_window_end_same_day() {
        let preflight = Preflight {
            window: RestWindow::new(8, 20),
            timezone: SiteTimezone::Utc,
            load_threshold: 2.0,
            load_delay: 300,
            batch_delay: 60,
        };
        assert_eq!(preflight.rest_window_end(utc(1, 9, 0)), Some(utc(1, 20, 0)));
        assert_eq!(preflight.rest_window_end(utc(1, 20, 0)), None);
    }

    #[test]
    fn test_rest_window_end_wraps_midnight() {
        let preflight = Preflight {
            window: RestWindow::new(22, 6),
            timezone: SiteTimezone::Utc,
            load_threshold: 2.0,
            load_delay: 300,
            batch_delay: 60,
        };
        assert_eq!(preflight.rest_window_end(utc(1, 23, 15)), Some(utc(2, 6, 0)));
        assert_eq!(preflight.rest_window_end(utc(2, 3, 0)), Some(utc(2, 6, 0)));
    }

    #[test]
    fn test_rest_window_in_named_timezone() {
        let preflight = Preflight {
            window: RestWindow::new(8, 20),
            timezone: SiteTimezone::resolve("America/New_York"),
            load_threshold: 2.0,
            load_delay: 300,
            batch_delay: 60,
        };
        // 13:00 UTC is 09:00 EDT; the window ends at 20:00 EDT = 00:00 UTC
        assert_eq!(preflight.rest_window_end(utc(1, 13, 0)), Some(utc(2, 0, 0)));
        // 03:00 UTC is 23:00 EDT, outside the window
        assert_eq!(preflight.rest_window_end(utc(1, 3, 0)), None);
    }

    #[test]
    fn test_overloaded() {
        let preflight = Preflight {
            window: RestWindow::new(0, 0),
            timezone: SiteTimezone::Utc,
            load_threshold: 2.0,
            load_delay: 300,
            batch_delay: 60,
        };
        assert_eq!(preflight.overloaded(Some([3.5, 2.0, 1.0])), Some(3.5));
        assert_eq!(preflight.overloaded(Some([2.0, 9.0, 9.0])), None);
        assert_eq!(preflight.overloaded(None), None);
    }

    #[test]
    fn test_parse_loadavg() {
        assert_eq!(
            parse_loadavg("0.52 0.58 0.59 1/389 12345\n"),
            Some([0.52, 0.58, 0.59])
        );
        assert_eq!(parse_loadavg("garbage"), None);
        assert_eq!(parse_loadavg(""), None);
    }
}
