use chrono::{DateTime, NaiveDate, NaiveDateTime};

/// Time primitives
#[derive(Copy, Clone, Debug, PartialEq, PartialOrd)]
pub struct Time(pub f64); // seconds

impl Time {
    /// Parses the `dateTime` forms KML allows: `YYYY`, `YYYY-MM`, `YYYY-MM-DD`,
    /// and full timestamps with `Z`, a `±hh:mm` offset, or no zone (taken as UTC).
    ///
    /// The result is seconds since the Unix epoch.
    pub fn parse_iso8601(text: &str) -> Option<Time> {
        let text = text.trim();
        if text.is_empty() {
            return None;
        }

        if text.contains('T') {
            if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
                return Some(Time::from_millis(dt.timestamp_millis()));
            }
            let naive = NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f").ok()?;
            return Some(Time::from_millis(naive.and_utc().timestamp_millis()));
        }

        let mut parts = text.splitn(3, '-');
        let year: i32 = parse_digits(parts.next()?, 4)?;
        let month: u32 = match parts.next() {
            Some(m) => parse_digits(m, 2)?,
            None => 1,
        };
        let day: u32 = match parts.next() {
            Some(d) => parse_digits(d, 2)?,
            None => 1,
        };

        let date = NaiveDate::from_ymd_opt(year, month, day)?;
        let midnight = date.and_hms_opt(0, 0, 0)?;
        Some(Time::from_millis(midnight.and_utc().timestamp_millis()))
    }

    fn from_millis(ms: i64) -> Time {
        Time(ms as f64 / 1000.0)
    }
}

fn parse_digits<T: std::str::FromStr>(s: &str, width: usize) -> Option<T> {
    if s.len() != width || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    s.parse().ok()
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct TimeSpan {
    pub start: Time,
    pub end: Time,
}

impl TimeSpan {
    pub fn forever() -> Self {
        Self {
            start: Time(f64::NEG_INFINITY),
            end: Time(f64::INFINITY),
        }
    }

    pub fn instant(t: Time) -> Self {
        Self { start: t, end: t }
    }

    /// A span with optional ends; a missing end is unbounded on that side.
    pub fn between(start: Option<Time>, end: Option<Time>) -> Self {
        Self {
            start: start.unwrap_or(Time(f64::NEG_INFINITY)),
            end: end.unwrap_or(Time(f64::INFINITY)),
        }
    }

    pub fn duration(&self) -> f64 {
        (self.end.0 - self.start.0).max(0.0)
    }

    pub fn contains(&self, t: Time) -> bool {
        t.0 >= self.start.0 && t.0 <= self.end.0
    }
}

#[cfg(test)]
mod tests {
    use super::{Time, TimeSpan};

    #[test]
    fn parses_full_timestamp() {
        let t = Time::parse_iso8601("1970-01-02T00:00:00Z").unwrap();
        assert_eq!(t, Time(86_400.0));
    }

    #[test]
    fn parses_offsets_and_fractions() {
        let t = Time::parse_iso8601("1970-01-01T01:00:00+01:00").unwrap();
        assert_eq!(t, Time(0.0));
        let t = Time::parse_iso8601("1970-01-01T00:00:01.500Z").unwrap();
        assert_eq!(t, Time(1.5));
    }

    #[test]
    fn parses_reduced_precision_dates() {
        assert_eq!(Time::parse_iso8601("1970"), Some(Time(0.0)));
        assert_eq!(Time::parse_iso8601("1970-02"), Some(Time(31.0 * 86_400.0)));
        assert_eq!(Time::parse_iso8601("1970-01-03"), Some(Time(2.0 * 86_400.0)));
    }

    #[test]
    fn zoneless_timestamp_is_utc() {
        let t = Time::parse_iso8601("1970-01-01T00:01:00").unwrap();
        assert_eq!(t, Time(60.0));
    }

    #[test]
    fn rejects_garbage() {
        assert_eq!(Time::parse_iso8601(""), None);
        assert_eq!(Time::parse_iso8601("yesterday"), None);
        assert_eq!(Time::parse_iso8601("1970-13-01"), None);
    }

    #[test]
    fn open_ended_span_contains_everything_after_start() {
        let span = TimeSpan::between(Some(Time(10.0)), None);
        assert!(span.contains(Time(1e12)));
        assert!(!span.contains(Time(9.0)));
        assert_eq!(TimeSpan::instant(Time(3.0)).duration(), 0.0);
    }
}
