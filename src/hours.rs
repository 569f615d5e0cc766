use std::fmt;

use chrono::{Datelike, NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};

/// Serde adapter for `HH:MM` clock times.
pub mod hhmm {
    use chrono::NaiveTime;
    use serde::{Deserialize, Deserializer, Serializer};

    use crate::model::CLOCK_FORMAT;

    pub fn serialize<S: Serializer>(t: &NaiveTime, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&t.format(CLOCK_FORMAT).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<NaiveTime, D::Error> {
        let raw = String::deserialize(d)?;
        super::parse_clock(&raw)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid clock time: {raw}")))
    }
}

/// Parse `HH:MM` (seconds tolerated, and ignored by callers that compare minutes).
pub fn parse_clock(s: &str) -> Option<NaiveTime> {
    let s = s.trim();
    NaiveTime::parse_from_str(s, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(s, "%H:%M:%S"))
        .ok()
}

/// An opening window `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Window {
    #[serde(with = "hhmm")]
    pub start: NaiveTime,
    #[serde(with = "hhmm")]
    pub end: NaiveTime,
}

impl Window {
    pub fn new(start: NaiveTime, end: NaiveTime) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, t: NaiveTime) -> bool {
        self.start <= t && t < self.end
    }
}

impl fmt::Display for Window {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start.format("%H:%M"), self.end.format("%H:%M"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DayClass {
    Weekday,
    Saturday,
    Sunday,
}

impl DayClass {
    /// 0 = Monday .. 6 = Sunday.
    pub fn of(weekday_index: u32) -> Self {
        match weekday_index {
            5 => DayClass::Saturday,
            6 => DayClass::Sunday,
            _ => DayClass::Weekday,
        }
    }
}

/// Result of an opening-hours lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opening {
    Open(Window),
    /// The building opens that day, but not at the requested time.
    Outside(Window),
    Closed,
}

impl Opening {
    pub fn is_open(&self) -> bool {
        matches!(self, Opening::Open(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusinessHours {
    pub weekday: Window,
    pub saturday: Option<Window>,
    pub sunday: Option<Window>,
    /// Weekday indices (0 = Monday) that use the weekday profile.
    pub business_weekdays: Vec<u8>,
}

impl Default for BusinessHours {
    fn default() -> Self {
        Self {
            weekday: Window::new(
                NaiveTime::from_hms_opt(9, 0, 0).unwrap_or_default(),
                NaiveTime::from_hms_opt(18, 0, 0).unwrap_or_default(),
            ),
            saturday: None,
            sunday: None,
            business_weekdays: vec![0, 1, 2, 3, 4],
        }
    }
}

impl BusinessHours {
    /// Parse the comma-joined weekday list ("0,1,2,3,4"). Unknown entries are dropped.
    pub fn parse_weekdays(raw: &str) -> Vec<u8> {
        raw.split(',')
            .filter_map(|d| d.trim().parse::<u8>().ok())
            .filter(|d| *d <= 6)
            .collect()
    }

    /// The opening window for a date, or `None` if closed all day.
    pub fn window_for(&self, date: NaiveDate) -> Option<Window> {
        let idx = date.weekday().num_days_from_monday();
        match DayClass::of(idx) {
            DayClass::Saturday => self.saturday,
            DayClass::Sunday => self.sunday,
            DayClass::Weekday => self
                .business_weekdays
                .contains(&(idx as u8))
                .then_some(self.weekday),
        }
    }

    pub fn is_open(&self, at: NaiveDateTime) -> Opening {
        match self.window_for(at.date()) {
            None => Opening::Closed,
            Some(w) if w.contains(at.time()) => Opening::Open(w),
            Some(w) => Opening::Outside(w),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::parse_instant;

    fn clock(s: &str) -> NaiveTime {
        parse_clock(s).unwrap()
    }

    // 2099-01-05 is a Monday.
    const MONDAY: &str = "2099-01-05";

    #[test]
    fn open_is_inclusive_close_is_exclusive() {
        let hours = BusinessHours::default();
        let at = |t: &str| parse_instant(&format!("{MONDAY} {t}")).unwrap();
        assert!(hours.is_open(at("09:00")).is_open());
        assert!(hours.is_open(at("17:59")).is_open());
        assert_eq!(
            hours.is_open(at("18:00")),
            Opening::Outside(Window::new(clock("09:00"), clock("18:00")))
        );
        assert!(!hours.is_open(at("08:59")).is_open());
    }

    #[test]
    fn weekend_profiles() {
        let mut hours = BusinessHours::default();
        let saturday = parse_instant("2099-01-10 10:00").unwrap();
        let sunday = parse_instant("2099-01-11 10:00").unwrap();
        assert_eq!(hours.is_open(saturday), Opening::Closed);
        assert_eq!(hours.is_open(sunday), Opening::Closed);

        hours.saturday = Some(Window::new(clock("10:00"), clock("15:00")));
        assert!(hours.is_open(saturday).is_open());
        assert_eq!(hours.is_open(sunday), Opening::Closed);
    }

    #[test]
    fn unlisted_weekday_is_closed() {
        let hours = BusinessHours {
            business_weekdays: BusinessHours::parse_weekdays("0,1,2,3"),
            ..BusinessHours::default()
        };
        // 2099-01-09 is a Friday.
        let friday = parse_instant("2099-01-09 10:00").unwrap();
        assert_eq!(hours.is_open(friday), Opening::Closed);
    }

    #[test]
    fn weekday_list_parsing() {
        assert_eq!(BusinessHours::parse_weekdays("0, 2,x,9,4"), vec![0, 2, 4]);
        assert!(BusinessHours::parse_weekdays("").is_empty());
    }

    #[test]
    fn window_serializes_as_clock_strings() {
        let w = Window::new(clock("09:00"), clock("18:30"));
        let json = serde_json::to_string(&w).unwrap();
        assert_eq!(json, r#"{"start":"09:00","end":"18:30"}"#);
        let back: Window = serde_json::from_str(&json).unwrap();
        assert_eq!(back, w);
    }
}
