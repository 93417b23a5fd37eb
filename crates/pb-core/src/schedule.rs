//! Time-of-day activity windows
//!
//! Any rule may carry a window outside of which it is inactive. Bounds are
//! stored as wall-clock times with no date component, so a window whose start
//! is later than its end wraps past midnight.

use chrono::{NaiveTime, Timelike};

use crate::error::TreeError;

/// Activity window for a rule node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Schedule {
    /// Inclusive start of the window
    pub start: Option<NaiveTime>,
    /// Exclusive end of the window
    pub end: Option<NaiveTime>,
}

impl Schedule {
    /// A window that is always active.
    pub const ALWAYS: Self = Self { start: None, end: None };

    pub fn new(start: Option<NaiveTime>, end: Option<NaiveTime>) -> Self {
        Self { start, end }
    }

    /// Parse optional `HH:MM` bounds. Empty strings count as absent.
    pub fn parse(start: Option<&str>, end: Option<&str>) -> Result<Self, TreeError> {
        Ok(Self {
            start: start.filter(|s| !s.is_empty()).map(parse_time).transpose()?,
            end: end.filter(|s| !s.is_empty()).map(parse_time).transpose()?,
        })
    }

    pub fn is_always(&self) -> bool {
        self.start.is_none() && self.end.is_none()
    }

    /// Check whether the window contains `now`.
    pub fn is_active_at(&self, now: NaiveTime) -> bool {
        match (self.start, self.end) {
            (None, None) => true,
            (Some(start), None) => now >= start,
            (None, Some(end)) => now < end,
            (Some(start), Some(end)) if start < end => now >= start && now < end,
            // Wraps past midnight
            (Some(start), Some(end)) if start > end => now >= start || now < end,
            // start == end: a zero-length window reads as "all day"
            _ => true,
        }
    }
}

/// Parse `HH:MM` (or `HH:MM:SS`, as some time inputs emit).
pub fn parse_time(value: &str) -> Result<NaiveTime, TreeError> {
    NaiveTime::parse_from_str(value, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(value, "%H:%M:%S"))
        .map_err(|_| TreeError::InvalidTime {
            value: value.to_string(),
        })
}

/// Format a time the way it is stored: `HH:MM`, with seconds only when set.
pub fn format_time(time: NaiveTime) -> String {
    if time.second() == 0 {
        time.format("%H:%M").to_string()
    } else {
        time.format("%H:%M:%S").to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    #[test]
    fn test_always_active() {
        assert!(Schedule::ALWAYS.is_active_at(t(0, 0)));
        assert!(Schedule::ALWAYS.is_active_at(t(23, 59)));
    }

    #[test]
    fn test_daytime_window() {
        let s = Schedule::new(Some(t(9, 0)), Some(t(17, 0)));
        assert!(!s.is_active_at(t(8, 59)));
        assert!(s.is_active_at(t(9, 0)));
        assert!(s.is_active_at(t(16, 59)));
        assert!(!s.is_active_at(t(17, 0)));
    }

    #[test]
    fn test_window_wraps_midnight() {
        let s = Schedule::new(Some(t(22, 0)), Some(t(6, 0)));
        assert!(s.is_active_at(t(23, 30)));
        assert!(s.is_active_at(t(2, 0)));
        assert!(!s.is_active_at(t(12, 0)));
    }

    #[test]
    fn test_open_ended_windows() {
        let from = Schedule::new(Some(t(20, 0)), None);
        assert!(!from.is_active_at(t(19, 0)));
        assert!(from.is_active_at(t(21, 0)));

        let until = Schedule::new(None, Some(t(8, 0)));
        assert!(until.is_active_at(t(7, 0)));
        assert!(!until.is_active_at(t(9, 0)));
    }

    #[test]
    fn test_equal_bounds_is_all_day() {
        let s = Schedule::new(Some(t(10, 0)), Some(t(10, 0)));
        assert!(s.is_active_at(t(3, 0)));
    }

    #[test]
    fn test_parse_and_format() {
        let s = Schedule::parse(Some("09:30"), Some("")).unwrap();
        assert_eq!(s.start, Some(t(9, 30)));
        assert_eq!(s.end, None);
        assert_eq!(format_time(t(9, 30)), "09:30");
        assert_eq!(parse_time("07:15:20").unwrap().second(), 20);
        assert_eq!(
            Schedule::parse(Some("25:00"), None),
            Err(TreeError::InvalidTime { value: "25:00".to_string() })
        );
    }
}
