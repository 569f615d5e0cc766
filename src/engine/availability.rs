use chrono::{Duration, NaiveDateTime};
use serde::{Deserialize, Serialize};

use crate::limits::MAX_UNITS_PER_SLOT;
use crate::model::*;
use crate::pattern::TimePattern;

// ── Slot Availability Checker ─────────────────────────────────────

/// How a request for an instant inside a slot is read.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StartPolicy {
    /// Only the requested instant counts; it must be free on its own.
    #[default]
    Exact,
    /// Accept the first feasible instant in the slot, scanning from its start.
    Relocate,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SlotCheck {
    pub available: bool,
    pub assigned_staff: Option<StaffId>,
    pub actual_start: Option<NaiveDateTime>,
    pub slot_index: Option<usize>,
}

impl SlotCheck {
    pub fn unavailable(slot_index: Option<usize>) -> Self {
        Self {
            available: false,
            assigned_staff: None,
            actual_start: None,
            slot_index,
        }
    }
}

impl StartPolicy {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "exact" => Some(StartPolicy::Exact),
            "relocate" => Some(StartPolicy::Relocate),
            _ => None,
        }
    }

    /// Run the checker the way this policy reads a request.
    pub fn check(
        self,
        state: &BuildingState,
        pattern: &TimePattern,
        target: NaiveDateTime,
        exclude: Option<&CustomerId>,
        menu: Option<MenuId>,
    ) -> SlotCheck {
        match self {
            StartPolicy::Exact => check_requested(state, pattern, target, exclude, menu),
            StartPolicy::Relocate => check_slot(state, pattern, target, exclude, menu),
        }
    }
}

fn offset(t: NaiveDateTime, unit_minutes: u32, steps: usize) -> Option<NaiveDateTime> {
    let minutes = i64::from(unit_minutes).checked_mul(i64::try_from(steps).ok()?)?;
    t.checked_add_signed(Duration::try_minutes(minutes)?)
}

/// Decide whether `target` is bookable in `state` and which staff member gets it.
///
/// 1. Locate the slot (exact start match, else the containing `[start, end)`).
/// 2. Whole-slot check: the summed count over every unit of the slot must stay
///    below the ceiling.
/// 3. Scan candidate starts `t` forward while `t + duration` fits in the slot;
///    the first `(t, staff)` with the staff below ceiling at every covered unit wins.
///
/// Staff are tried in ascending id order. `exclude` removes one customer's own
/// reservations from every count.
pub fn check_slot(
    state: &BuildingState,
    pattern: &TimePattern,
    target: NaiveDateTime,
    exclude: Option<&CustomerId>,
    menu: Option<MenuId>,
) -> SlotCheck {
    scan(state, pattern, to_minute(target), exclude, menu, false)
}

/// Like `check_slot`, but the only candidate is `target` itself. An instant
/// off the slot's unit grid is never bookable.
pub fn check_requested(
    state: &BuildingState,
    pattern: &TimePattern,
    target: NaiveDateTime,
    exclude: Option<&CustomerId>,
    menu: Option<MenuId>,
) -> SlotCheck {
    scan(state, pattern, to_minute(target), exclude, menu, true)
}

fn scan(
    state: &BuildingState,
    pattern: &TimePattern,
    target: NaiveDateTime,
    exclude: Option<&CustomerId>,
    menu: Option<MenuId>,
    only_target: bool,
) -> SlotCheck {
    let date = target.date();
    let Some(idx) = pattern.slot_index_for(target.time()) else {
        return SlotCheck::unavailable(None);
    };
    let slot = &pattern.slots[idx];
    let slot_start = date.and_time(slot.start);
    let slot_end = date.and_time(slot.end);
    let unit = state.minute_unit(pattern);

    let mut units = Vec::new();
    let mut t = slot_start;
    while t < slot_end {
        if units.len() >= MAX_UNITS_PER_SLOT {
            return SlotCheck::unavailable(Some(idx));
        }
        units.push(t);
        match offset(t, unit, 1) {
            Some(next) => t = next,
            None => break,
        }
    }

    let duration = state.service_duration_units(menu) as usize;
    if duration > units.len() {
        return SlotCheck::unavailable(Some(idx));
    }

    let ceiling = state.whole_slot_ceiling(idx);
    if let Some(ceiling) = ceiling {
        let sum: u32 = units.iter().map(|u| state.count_at(*u, exclude, None)).sum();
        if sum >= ceiling {
            return SlotCheck::unavailable(Some(idx));
        }
    }

    let roster = state.staff_roster();
    for (i, &candidate) in units.iter().enumerate() {
        if only_target && candidate != target {
            continue;
        }
        match offset(candidate, unit, duration) {
            Some(end) if end <= slot_end => {}
            _ => break,
        }
        let Some(covered) = units.get(i..i + duration) else {
            break;
        };

        if let Some(ceiling) = ceiling {
            let total: u32 = covered.iter().map(|u| state.count_at(*u, exclude, None)).sum();
            if total >= ceiling {
                continue;
            }
        }

        let feasible = roster.iter().find(|staff| {
            covered
                .iter()
                .all(|u| state.count_at(*u, exclude, Some(staff.id)) < staff.concurrency_ceiling)
        });
        if let Some(staff) = feasible {
            return SlotCheck {
                available: true,
                assigned_staff: Some(staff.id),
                actual_start: Some(candidate),
                slot_index: Some(idx),
            };
        }
    }

    SlotCheck::unavailable(Some(idx))
}
