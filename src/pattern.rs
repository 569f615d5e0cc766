use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use chrono::NaiveTime;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::hours::{hhmm, parse_clock};

/// Minute unit used when a pattern does not declare one.
pub const DEFAULT_MINUTE_UNIT: u32 = 60;

#[derive(Debug, thiserror::Error)]
pub enum PatternError {
    #[error("pattern {id}: {count_kind} count {got} does not match {expected} start times")]
    CountMismatch {
        id: u32,
        count_kind: &'static str,
        got: usize,
        expected: usize,
    },
    #[error("pattern {id}: invalid clock time {value:?}")]
    BadTime { id: u32, value: String },
    #[error("pattern {id}: invalid minute unit {value:?}")]
    BadMinuteUnit { id: u32, value: String },
    #[error("pattern {id}: slot {index} is empty, overlaps or is out of order")]
    Unordered { id: u32, index: usize },
    #[error("pattern file: {0}")]
    Json(#[from] serde_json::Error),
    #[error("pattern file: {0}")]
    Io(#[from] std::io::Error),
}

/// One labeled slot of a business day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatternSlot {
    #[serde(with = "hhmm")]
    pub start: NaiveTime,
    #[serde(with = "hhmm")]
    pub end: NaiveTime,
    pub label: Option<String>,
}

/// Ordered, non-overlapping division of a business day. Gaps are allowed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TimePattern {
    pub name: Option<String>,
    pub slots: Vec<PatternSlot>,
    pub minute_unit: u32,
}

impl TimePattern {
    /// Build a pattern, rejecting empty, overlapping or unsorted slots.
    pub fn new(
        id: u32,
        name: Option<String>,
        slots: Vec<PatternSlot>,
        minute_unit: u32,
    ) -> Result<Self, PatternError> {
        if minute_unit == 0 {
            return Err(PatternError::BadMinuteUnit {
                id,
                value: minute_unit.to_string(),
            });
        }
        for (i, slot) in slots.iter().enumerate() {
            if slot.start >= slot.end {
                return Err(PatternError::Unordered { id, index: i });
            }
            if i > 0 && slots[i - 1].end > slot.start {
                return Err(PatternError::Unordered { id, index: i });
            }
        }
        Ok(Self {
            name,
            slots,
            minute_unit,
        })
    }

    /// Exact match on a slot start, else the slot whose `[start, end)` contains `t`.
    pub fn slot_index_for(&self, t: NaiveTime) -> Option<usize> {
        self.slots
            .iter()
            .position(|s| s.start == t)
            .or_else(|| self.slots.iter().position(|s| s.start <= t && t < s.end))
    }

    /// Label of the slot starting exactly at `start`.
    pub fn label_for(&self, start: NaiveTime) -> Option<&str> {
        self.slots
            .iter()
            .find(|s| s.start == start)
            .and_then(|s| s.label.as_deref())
    }
}

/// Resolves pattern ids to patterns. Read-mostly; loaded at startup.
#[derive(Default)]
pub struct PatternRegistry {
    patterns: DashMap<u32, Arc<TimePattern>>,
}

impl PatternRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, id: u32, pattern: TimePattern) {
        self.patterns.insert(id, Arc::new(pattern));
    }

    pub fn get(&self, id: u32) -> Option<Arc<TimePattern>> {
        self.patterns.get(&id).map(|e| e.value().clone())
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    /// Load patterns from the JSON configuration form. Malformed entries are
    /// skipped with a warning; returns the number loaded.
    pub fn load_json(&self, text: &str) -> Result<usize, PatternError> {
        let raw: BTreeMap<String, serde_json::Value> = serde_json::from_str(text)?;
        let mut loaded = 0;
        for (key, value) in raw {
            let Ok(id) = key.trim().parse::<u32>() else {
                warn!(key = %key, "skipping pattern with non-numeric id");
                continue;
            };
            let entry = match serde_json::from_value::<RawPattern>(value) {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("skipping time pattern {id}: {e}");
                    continue;
                }
            };
            if self.install(id, entry) {
                loaded += 1;
            }
        }
        Ok(loaded)
    }

    /// Load patterns from the legacy `$WAKUPATTERN[i][...] = "...";` line form.
    pub fn load_legacy(&self, text: &str) -> usize {
        let mut raw: BTreeMap<u32, LegacyPattern> = BTreeMap::new();
        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if let Some((id, field, value)) = parse_legacy_line(line) {
                raw.entry(id).or_default().set(field, value);
            }
        }
        let mut loaded = 0;
        for (id, entry) in raw {
            if self.install(id, entry.into_raw()) {
                loaded += 1;
            }
        }
        loaded
    }

    /// JSON takes priority; the legacy file is read only when the JSON source
    /// is absent, unreadable or yields nothing.
    pub fn load_files(&self, json: Option<&Path>, legacy: Option<&Path>) -> usize {
        if let Some(path) = json {
            match std::fs::read_to_string(path)
                .map_err(PatternError::from)
                .and_then(|text| self.load_json(&text))
            {
                Ok(n) if n > 0 => {
                    info!(path = %path.display(), patterns = n, "loaded time patterns");
                    return n;
                }
                Ok(_) => warn!(path = %path.display(), "pattern file contained no usable patterns"),
                Err(e) => warn!(path = %path.display(), "failed to load pattern file: {e}"),
            }
        }
        if let Some(path) = legacy {
            match std::fs::read_to_string(path) {
                Ok(text) => {
                    let n = self.load_legacy(&text);
                    info!(path = %path.display(), patterns = n, "loaded legacy time patterns");
                    return n;
                }
                Err(e) => warn!(path = %path.display(), "failed to read legacy pattern file: {e}"),
            }
        }
        0
    }

    fn install(&self, id: u32, raw: RawPattern) -> bool {
        match raw.build(id) {
            Ok(pattern) => {
                self.insert(id, pattern);
                true
            }
            Err(e) => {
                warn!("skipping time pattern: {e}");
                false
            }
        }
    }
}

// ── Source shapes ────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawUnit {
    Number(u32),
    Text(String),
}

#[derive(Debug, Default, Deserialize)]
struct RawPattern {
    #[serde(rename = "Name", default)]
    name: Option<String>,
    #[serde(rename = "StartTime", default)]
    start: Vec<String>,
    #[serde(rename = "EndTime", default)]
    end: Vec<String>,
    #[serde(rename = "AMPM", default)]
    labels: Vec<String>,
    #[serde(rename = "JikanTani", default)]
    unit: Option<RawUnit>,
}

impl RawPattern {
    fn build(self, id: u32) -> Result<TimePattern, PatternError> {
        let expected = self.start.len();
        if self.end.len() != expected {
            return Err(PatternError::CountMismatch {
                id,
                count_kind: "end time",
                got: self.end.len(),
                expected,
            });
        }
        // A pattern without labels is allowed; any labels present must line up.
        if !self.labels.is_empty() && self.labels.len() != expected {
            return Err(PatternError::CountMismatch {
                id,
                count_kind: "label",
                got: self.labels.len(),
                expected,
            });
        }

        let clock = |value: &str| {
            parse_clock(value).ok_or_else(|| PatternError::BadTime {
                id,
                value: value.to_string(),
            })
        };
        let mut slots = Vec::with_capacity(expected);
        for (i, (start, end)) in self.start.iter().zip(&self.end).enumerate() {
            slots.push(PatternSlot {
                start: clock(start.as_str())?,
                end: clock(end.as_str())?,
                label: self
                    .labels
                    .get(i)
                    .map(|l| l.trim().to_string())
                    .filter(|l| !l.is_empty()),
            });
        }

        let minute_unit = match self.unit {
            None => DEFAULT_MINUTE_UNIT,
            Some(RawUnit::Number(n)) => n,
            Some(RawUnit::Text(t)) => t.trim().parse().map_err(|_| PatternError::BadMinuteUnit {
                id,
                value: t.clone(),
            })?,
        };
        TimePattern::new(id, self.name, slots, minute_unit)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LegacyField {
    Name,
    Start(usize),
    End(usize),
    Label(usize),
    Unit,
}

/// Indexed arrays may have holes; they are compacted in index order.
#[derive(Debug, Default)]
struct LegacyPattern {
    name: Option<String>,
    start: BTreeMap<usize, String>,
    end: BTreeMap<usize, String>,
    labels: BTreeMap<usize, String>,
    unit: Option<String>,
}

impl LegacyPattern {
    fn set(&mut self, field: LegacyField, value: String) {
        match field {
            LegacyField::Name => self.name = Some(value),
            LegacyField::Start(i) => {
                self.start.insert(i, value);
            }
            LegacyField::End(i) => {
                self.end.insert(i, value);
            }
            LegacyField::Label(i) => {
                self.labels.insert(i, value);
            }
            LegacyField::Unit => self.unit = Some(value),
        }
    }

    fn into_raw(self) -> RawPattern {
        RawPattern {
            name: self.name,
            start: self.start.into_values().collect(),
            end: self.end.into_values().collect(),
            labels: self.labels.into_values().collect(),
            unit: self.unit.map(RawUnit::Text),
        }
    }
}

const LEGACY_PREFIX: &str = "$WAKUPATTERN[";

/// Parse one `$WAKUPATTERN[i]['Key'][j] = "value";` line.
fn parse_legacy_line(line: &str) -> Option<(u32, LegacyField, String)> {
    let rest = line.strip_prefix(LEGACY_PREFIX)?;
    let (id, rest) = rest.split_once(']')?;
    let id: u32 = id.trim().parse().ok()?;

    let rest = rest.strip_prefix("['")?;
    let (key, rest) = rest.split_once("']")?;

    let (pos, rest) = match rest.strip_prefix('[') {
        Some(r) => {
            let (pos, r) = r.split_once(']')?;
            (Some(pos.trim().parse::<usize>().ok()?), r)
        }
        None => (None, rest),
    };

    let rest = rest.trim_start().strip_prefix('=')?.trim();
    let rest = rest.strip_suffix(';')?.trim_end();
    let value = rest.strip_prefix('"')?.strip_suffix('"')?;

    let field = match (key, pos) {
        ("Name", None) => LegacyField::Name,
        ("StartTime", Some(p)) => LegacyField::Start(p),
        ("EndTime", Some(p)) => LegacyField::End(p),
        ("AMPM", Some(p)) => LegacyField::Label(p),
        ("JikanTani", None) => {
            if value.is_empty() || !value.bytes().all(|b| b.is_ascii_digit()) {
                return None;
            }
            LegacyField::Unit
        }
        _ => return None,
    };
    Some((id, field, value.to_string()))
}
