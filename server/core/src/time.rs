use serde::{Deserialize, Serialize};

/// A pair of timestamps in seconds since the epoch.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeRange {
    pub start: i64,
    pub end: i64,
}

impl TimeRange {
    pub fn new(start: i64, end: i64) -> Self {
        Self { start, end }
    }

    /// Derives the resolution for metric range queries as a step function of
    /// the range duration. Monotonic non-decreasing within each bucket.
    pub fn resolution(&self) -> i64 {
        let duration = self.end - self.start;
        if duration <= 6 * 3600 {
            30
        } else if duration <= 12 * 3600 {
            60
        } else if duration <= 24 * 3600 {
            120
        } else if duration <= 2 * 86400 {
            300
        } else if duration <= 7 * 86400 {
            1800
        } else if duration <= 30 * 86400 {
            3600
        } else {
            duration / 1000
        }
    }

    /// A user-supplied resolution overrides the derived value when it is
    /// parseable, either as plain seconds or as a duration like `5m`.
    pub fn resolution_or(&self, resolution: Option<&str>) -> i64 {
        resolution
            .and_then(parse_resolution)
            .unwrap_or_else(|| self.resolution())
    }
}

fn parse_resolution(resolution: &str) -> Option<i64> {
    if let Ok(seconds) = resolution.parse::<i64>() {
        return Some(seconds);
    }

    humantime::parse_duration(resolution)
        .ok()
        .map(|d| d.as_secs() as i64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolution_steps() {
        assert_eq!(TimeRange::new(0, 5 * 3600).resolution(), 30);
        assert_eq!(TimeRange::new(0, 6 * 3600).resolution(), 30);
        assert_eq!(TimeRange::new(0, 10 * 3600).resolution(), 60);
        assert_eq!(TimeRange::new(0, 24 * 3600).resolution(), 120);
        assert_eq!(TimeRange::new(0, 2 * 86400).resolution(), 300);
        assert_eq!(TimeRange::new(0, 3 * 86400).resolution(), 1800);
        assert_eq!(TimeRange::new(0, 14 * 86400).resolution(), 3600);
        assert_eq!(
            TimeRange::new(0, 365 * 86400).resolution(),
            365 * 86400 / 1000
        );
    }

    #[test]
    fn resolution_is_monotonic_up_to_thirty_days() {
        // Past 30 days the duration/1000 rule restarts below 3600.
        let mut last = 0;
        for hours in 1..=30 * 24 {
            let range = TimeRange::new(0, hours * 3600);
            let resolution = range.resolution();
            assert!(
                resolution >= last,
                "resolution decreased at {hours}h: {resolution} < {last}"
            );
            last = resolution;
        }
    }

    #[test]
    fn user_resolution_overrides() {
        let range = TimeRange::new(0, 3600);
        assert_eq!(range.resolution_or(None), 30);
        assert_eq!(range.resolution_or(Some("10")), 10);
        assert_eq!(range.resolution_or(Some("5m")), 300);
        assert_eq!(range.resolution_or(Some("not-a-duration")), 30);
    }
}
