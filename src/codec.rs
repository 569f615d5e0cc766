//! Compact text encoding of up to three alternate (date, time-window)
//! preferences: `①MM/DDlabel②MM/DDlabel③MM/DDlabel`, where an absent third
//! preference is written as the literal `③入力無し`.

use chrono::{NaiveTime, Timelike};
use serde::{Deserialize, Serialize};

use crate::hours::parse_clock;
use crate::model::parse_date;
use crate::pattern::TimePattern;

pub const FIRST_GLYPH: char = '①';
pub const SECOND_GLYPH: char = '②';
pub const THIRD_GLYPH: char = '③';
/// Marker body for "third preference explicitly not entered".
pub const NOT_ENTERED: &str = "入力無し";

/// Accepted separators between the two clock times of a window.
const WINDOW_SEPARATORS: [char; 2] = ['\u{FF5E}', '\u{301C}'];

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("invalid preferences: {}", .0.join("; "))]
    Invalid(Vec<String>),
    #[error("invalid date: {0:?}")]
    BadDate(String),
    #[error("invalid time window: {0:?}")]
    BadWindow(String),
}

/// Three (date, window) pairs as entered; blank strings mean "not supplied".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PreferenceInput {
    pub date1: String,
    pub time1: String,
    pub date2: String,
    pub time2: String,
    pub date3: String,
    pub time3: String,
}

impl PreferenceInput {
    fn pairs(&self) -> [(&str, &str); 3] {
        [
            (self.date1.trim(), self.time1.trim()),
            (self.date2.trim(), self.time2.trim()),
            (self.date3.trim(), self.time3.trim()),
        ]
    }

    pub fn has_third(&self) -> bool {
        let [_, _, (date, time)] = self.pairs();
        !date.is_empty() && !time.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Validation {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl Validation {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Parse `HH:MM～HH:MM`. Both sides must be clock times.
pub fn parse_window(s: &str) -> Result<(NaiveTime, NaiveTime), CodecError> {
    let bad = || CodecError::BadWindow(s.to_string());
    let mut parts = s.split(WINDOW_SEPARATORS);
    let (Some(start), Some(end), None) = (parts.next(), parts.next(), parts.next()) else {
        return Err(bad());
    };
    let start = parse_clock(start).ok_or_else(bad)?;
    let end = parse_clock(end).ok_or_else(bad)?;
    Ok((start, end))
}

pub fn validate(input: &PreferenceInput) -> Validation {
    let mut v = Validation::default();
    let [first, second, (date3, time3)] = input.pairs();

    if first.0.is_empty() || first.1.is_empty() {
        v.errors.push("first preference date and time window are required".into());
    }
    if second.0.is_empty() || second.1.is_empty() {
        v.errors.push("second preference date and time window are required".into());
    }
    match (date3.is_empty(), time3.is_empty()) {
        (false, true) => v
            .warnings
            .push("third preference has a date but no time window; it is ignored".into()),
        (true, false) => v
            .warnings
            .push("third preference has a time window but no date; it is ignored".into()),
        _ => {}
    }

    for (date, window) in input.pairs() {
        if !date.is_empty() && parse_date(date).is_none() {
            v.errors.push(CodecError::BadDate(date.to_string()).to_string());
        }
        if !window.is_empty()
            && let Err(e) = parse_window(window)
        {
            v.errors.push(e.to_string());
        }
    }
    v
}

/// Period label for a window start: the pattern's label for a slot starting
/// exactly there, else 06:00-11:59 AM, 12:00-17:59 PM, anything else PM2.
pub fn label_for(start: NaiveTime, pattern: Option<&TimePattern>) -> String {
    if let Some(label) = pattern.and_then(|p| p.label_for(start)) {
        return label.to_string();
    }
    match start.hour() {
        6..=11 => "AM".into(),
        12..=17 => "PM".into(),
        _ => "PM2".into(),
    }
}

/// One encoded preference body, `MM/DDlabel`.
pub fn segment(date: &str, window: &str, pattern: Option<&TimePattern>) -> Result<String, CodecError> {
    let day = parse_date(date).ok_or_else(|| CodecError::BadDate(date.to_string()))?;
    let (start, _) = parse_window(window)?;
    Ok(format!("{}{}", day.format("%m/%d"), label_for(start, pattern)))
}

/// Validate then encode. Warnings do not block encoding.
pub fn encode(input: &PreferenceInput, pattern: Option<&TimePattern>) -> Result<String, CodecError> {
    let validation = validate(input);
    if !validation.is_valid() {
        return Err(CodecError::Invalid(validation.errors));
    }
    let [first, second, third] = input.pairs();
    let mut out = String::new();
    out.push(FIRST_GLYPH);
    out.push_str(&segment(first.0, first.1, pattern)?);
    out.push(SECOND_GLYPH);
    out.push_str(&segment(second.0, second.1, pattern)?);
    out.push(THIRD_GLYPH);
    if input.has_third() {
        out.push_str(&segment(third.0, third.1, pattern)?);
    } else {
        out.push_str(NOT_ENTERED);
    }
    Ok(out)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "value", rename_all = "snake_case")]
pub enum ThirdChoice {
    Choice(String),
    /// The literal `③入力無し` marker.
    NotEntered,
    /// The text did not follow the three-glyph grammar.
    Missing,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DecodedChoices {
    pub first: String,
    pub second: String,
    pub third: ThirdChoice,
}

/// Split off a non-empty, single-line prefix ending right before `delim`.
fn take_until(s: &str, delim: char) -> Option<(&str, &str)> {
    let first_len = s.chars().next()?.len_utf8();
    let pos = first_len + s[first_len..].find(delim)?;
    let head = &s[..pos];
    if head.contains('\n') {
        return None;
    }
    Some((head, &s[pos + delim.len_utf8()..]))
}

fn parse_glyphs(text: &str) -> Option<(&str, &str, &str)> {
    let rest = text.strip_prefix(FIRST_GLYPH)?;
    let (first, rest) = take_until(rest, SECOND_GLYPH)?;
    let (second, rest) = take_until(rest, THIRD_GLYPH)?;
    let third = rest.lines().next().filter(|t| !t.is_empty())?;
    Some((first, second, third))
}

/// Decode a stored blob. Text outside the grammar becomes the first segment.
pub fn decode(text: &str) -> DecodedChoices {
    match parse_glyphs(text) {
        Some((first, second, third)) => {
            let third = third.trim();
            DecodedChoices {
                first: first.trim().to_string(),
                second: second.trim().to_string(),
                third: if third == NOT_ENTERED {
                    ThirdChoice::NotEntered
                } else {
                    ThirdChoice::Choice(third.to_string())
                },
            }
        }
        None => DecodedChoices {
            first: text.to_string(),
            second: String::new(),
            third: ThirdChoice::Missing,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pattern::PatternSlot;

    fn input(d1: &str, t1: &str, d2: &str, t2: &str, d3: &str, t3: &str) -> PreferenceInput {
        PreferenceInput {
            date1: d1.into(),
            time1: t1.into(),
            date2: d2.into(),
            time2: t2.into(),
            date3: d3.into(),
            time3: t3.into(),
        }
    }

    fn pattern() -> TimePattern {
        let slot = |s: &str, e: &str, l: &str| PatternSlot {
            start: parse_clock(s).unwrap(),
            end: parse_clock(e).unwrap(),
            label: Some(l.to_string()),
        };
        TimePattern::new(
            0,
            None,
            vec![slot("09:00", "12:00", "AM1"), slot("13:00", "15:00", "PM1"), slot("15:00", "18:00", "PM2")],
            60,
        )
        .unwrap()
    }

    #[test]
    fn encodes_with_pattern_labels_and_marker() {
        let p = pattern();
        let text = encode(
            &input("2099-01-05", "09:00～12:00", "2099-01-06", "15:00〜18:00", "", ""),
            Some(&p),
        )
        .unwrap();
        assert_eq!(text, "①01/05AM1②01/06PM2③入力無し");
    }

    #[test]
    fn third_preference_is_encoded_when_complete() {
        let text = encode(
            &input("2099-01-05", "09:00～12:00", "2099-01-06", "13:00～15:00", "2099-01-07", "19:00～20:00"),
            None,
        )
        .unwrap();
        assert_eq!(text, "①01/05AM②01/06PM③01/07PM2");
    }

    #[test]
    fn half_third_preference_warns_and_writes_marker() {
        let prefs = input("2099-01-05", "09:00～12:00", "2099-01-06", "13:00～15:00", "2099-01-07", "");
        let v = validate(&prefs);
        assert!(v.is_valid());
        assert_eq!(v.warnings.len(), 1);
        assert!(encode(&prefs, None).unwrap().ends_with("③入力無し"));
    }

    #[test]
    fn round_trip_without_third() {
        let p = pattern();
        let prefs = input("2099-03-10", "13:00～15:00", "2099-03-11", "09:00～12:00", "", "");
        let decoded = decode(&encode(&prefs, Some(&p)).unwrap());
        assert_eq!(decoded.first, segment("2099-03-10", "13:00～15:00", Some(&p)).unwrap());
        assert_eq!(decoded.second, segment("2099-03-11", "09:00～12:00", Some(&p)).unwrap());
        assert_eq!(decoded.first, "03/10PM1");
        assert_eq!(decoded.third, ThirdChoice::NotEntered);
    }

    #[test]
    fn missing_pairs_and_bad_formats_are_errors() {
        let v = validate(&input("", "09:00～12:00", "2099-02-30", "9時", "", ""));
        assert_eq!(v.errors.len(), 3, "{:?}", v.errors);
        let err = encode(&input("2099-01-05", "09:00-12:00", "2099-01-06", "13:00～15:00", "", ""), None)
            .unwrap_err();
        assert!(matches!(err, CodecError::Invalid(ref e) if e.len() == 1));
    }

    #[test]
    fn window_needs_exactly_one_separator() {
        assert!(parse_window("09:00～12:00").is_ok());
        assert!(parse_window("09:00 〜 12:00").is_ok());
        assert!(parse_window("09:00～12:00～13:00").is_err());
        assert!(parse_window("09:00").is_err());
        assert!(parse_window("～12:00").is_err());
    }

    #[test]
    fn heuristic_labels() {
        let t = |s: &str| parse_clock(s).unwrap();
        assert_eq!(label_for(t("06:00"), None), "AM");
        assert_eq!(label_for(t("11:59"), None), "AM");
        assert_eq!(label_for(t("12:00"), None), "PM");
        assert_eq!(label_for(t("17:59"), None), "PM");
        assert_eq!(label_for(t("18:00"), None), "PM2");
        assert_eq!(label_for(t("05:00"), None), "PM2");
        // A pattern without a slot at that start falls back too.
        assert_eq!(label_for(t("10:00"), Some(&pattern())), "AM");
    }

    #[test]
    fn free_text_decodes_as_first_segment() {
        let decoded = decode("any weekday morning");
        assert_eq!(decoded.first, "any weekday morning");
        assert_eq!(decoded.second, "");
        assert_eq!(decoded.third, ThirdChoice::Missing);
        // Empty segments do not match the grammar.
        assert_eq!(decode("①②01/06AM③入力無し").third, ThirdChoice::Missing);
    }

    #[test]
    fn decode_takes_shortest_first_segments() {
        let decoded = decode("①01/05AM②01/06PM③01/07PM2");
        assert_eq!(decoded.first, "01/05AM");
        assert_eq!(decoded.second, "01/06PM");
        assert_eq!(decoded.third, ThirdChoice::Choice("01/07PM2".into()));
    }
}
