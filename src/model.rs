use std::collections::{BTreeMap, HashMap};
use std::fmt;

use chrono::{NaiveDate, NaiveDateTime, Timelike};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::hours::BusinessHours;

/// Wire and storage format of a booked instant.
pub const INSTANT_FORMAT: &str = "%Y-%m-%d %H:%M";
pub const DATE_FORMAT: &str = "%Y-%m-%d";
pub const CLOCK_FORMAT: &str = "%H:%M";

pub fn parse_instant(s: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(s.trim(), INSTANT_FORMAT).ok()
}

pub fn parse_date(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s.trim(), DATE_FORMAT).ok()
}

pub fn format_instant(t: NaiveDateTime) -> String {
    t.format(INSTANT_FORMAT).to_string()
}

/// Reservations are counted at minute precision.
pub fn to_minute(t: NaiveDateTime) -> NaiveDateTime {
    t.with_second(0)
        .and_then(|t| t.with_nanosecond(0))
        .unwrap_or(t)
}

// ── Identifiers ──────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BuildingId(pub String);

/// Customer key within a building (the room/unit number).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CustomerId(pub String);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StaffId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MenuId(pub u32);

/// Audit record number, allocated as max + 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaioId(pub u64);

impl From<&str> for BuildingId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<&str> for CustomerId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl fmt::Display for BuildingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Display for CustomerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Display for StaffId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for TaioId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ── Configuration records ────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildingSettings {
    /// Index into the pattern registry.
    pub pattern_id: u32,
    /// Overrides the pattern's own minute unit when set.
    pub minute_unit: Option<u32>,
    /// Whole-slot ceiling per slot index; `None` (or a missing index) is unbounded.
    pub slot_ceilings: Vec<Option<u32>>,
    pub hours: BusinessHours,
}

impl BuildingSettings {
    pub fn new(pattern_id: u32, hours: BusinessHours) -> Self {
        Self {
            pattern_id,
            minute_unit: None,
            slot_ceilings: Vec::new(),
            hours,
        }
    }

    /// Parse the dash-joined ceiling list ("3-3-2"). Entries that are not
    /// plain numbers leave that slot unbounded.
    pub fn parse_slot_ceilings(raw: &str) -> Vec<Option<u32>> {
        if raw.trim().is_empty() {
            return Vec::new();
        }
        raw.split('-').map(|part| part.trim().parse().ok()).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Staff {
    pub id: StaffId,
    pub name: Option<String>,
    /// Max simultaneous reservations at one elementary unit.
    pub concurrency_ceiling: u32,
    /// Walk-in-only staff never receive assigned bookings.
    pub walk_in_only: bool,
    pub void: bool,
}

impl Staff {
    pub fn new(id: u32, concurrency_ceiling: u32) -> Self {
        Self {
            id: StaffId(id),
            name: None,
            concurrency_ceiling,
            walk_in_only: false,
            void: false,
        }
    }

    pub fn is_assignable(&self) -> bool {
        !self.void && !self.walk_in_only
    }
}

/// A bookable service and the number of consecutive units it occupies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Menu {
    pub id: MenuId,
    pub name: Option<String>,
    pub duration_units: u32,
    pub void: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomerAccount {
    pub id: CustomerId,
    /// bcrypt hash of the customer's secret.
    pub secret_hash: String,
}

// ── Reservations and audit ───────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReservationStatus {
    Active,
    Void,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: Ulid,
    pub customer_id: CustomerId,
    pub time_from: NaiveDateTime,
    pub time_to: Option<NaiveDateTime>,
    pub staff_id: Option<StaffId>,
    pub menu_id: Option<MenuId>,
    pub status: ReservationStatus,
    pub second_choice: Option<String>,
}

impl Reservation {
    pub fn new(customer_id: CustomerId, time_from: NaiveDateTime) -> Self {
        Self {
            id: Ulid::new(),
            customer_id,
            time_from: to_minute(time_from),
            time_to: None,
            staff_id: None,
            menu_id: None,
            status: ReservationStatus::Active,
            second_choice: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == ReservationStatus::Active
    }
}

/// Append-only note describing a mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub id: TaioId,
    pub customer_id: CustomerId,
    pub note: String,
    /// Category tag, e.g. `|1|` (first choice) or `|2|` (second choice).
    pub category: String,
    pub created: NaiveDateTime,
}

// ── Per-building state ───────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct BuildingState {
    pub id: BuildingId,
    pub settings: BuildingSettings,
    pub staff: BTreeMap<StaffId, Staff>,
    pub menus: HashMap<MenuId, Menu>,
    pub customers: HashMap<CustomerId, CustomerAccount>,
    /// All reservations, sorted by `time_from`.
    pub reservations: Vec<Reservation>,
    /// Audit records in append order.
    pub audit: Vec<AuditRecord>,
}

impl BuildingState {
    pub fn new(id: BuildingId, settings: BuildingSettings) -> Self {
        Self {
            id,
            settings,
            staff: BTreeMap::new(),
            menus: HashMap::new(),
            customers: HashMap::new(),
            reservations: Vec::new(),
            audit: Vec::new(),
        }
    }

    /// Insert a reservation maintaining sort order by `time_from`.
    pub fn insert_reservation(&mut self, reservation: Reservation) {
        let pos = self
            .reservations
            .partition_point(|r| r.time_from <= reservation.time_from);
        self.reservations.insert(pos, reservation);
    }

    pub fn remove_reservation(&mut self, id: Ulid) -> Option<Reservation> {
        let pos = self.reservations.iter().position(|r| r.id == id)?;
        Some(self.reservations.remove(pos))
    }

    pub fn reservation_mut(&mut self, id: Ulid) -> Option<&mut Reservation> {
        self.reservations.iter_mut().find(|r| r.id == id)
    }

    /// Reservations booked exactly at `at` (minute precision).
    pub fn at_instant(&self, at: NaiveDateTime) -> impl Iterator<Item = &Reservation> {
        let at = to_minute(at);
        let lo = self.reservations.partition_point(|r| r.time_from < at);
        let hi = self.reservations.partition_point(|r| r.time_from <= at);
        self.reservations[lo..hi].iter()
    }

    /// Active reservations at `at`, optionally excluding one customer and
    /// optionally restricted to one staff member.
    pub fn count_at(
        &self,
        at: NaiveDateTime,
        exclude: Option<&CustomerId>,
        staff: Option<StaffId>,
    ) -> u32 {
        self.at_instant(at)
            .filter(|r| r.is_active())
            .filter(|r| exclude.is_none_or(|c| &r.customer_id != c))
            .filter(|r| staff.is_none_or(|s| r.staff_id == Some(s)))
            .count() as u32
    }

    /// The customer's most recent active reservation.
    pub fn latest_active_for(&self, customer: &CustomerId) -> Option<&Reservation> {
        self.reservations
            .iter()
            .rev()
            .find(|r| r.is_active() && &r.customer_id == customer)
    }
}

/// New position of one reservation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeMove {
    pub reservation_id: Ulid,
    pub time_from: NaiveDateTime,
    pub time_to: Option<NaiveDateTime>,
    pub staff_id: Option<StaffId>,
}

/// WAL record format. One variant per mutation kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    BuildingConfigured {
        building: BuildingId,
        settings: BuildingSettings,
    },
    StaffUpserted {
        building: BuildingId,
        staff: Staff,
    },
    MenuUpserted {
        building: BuildingId,
        menu: Menu,
    },
    CustomerRegistered {
        building: BuildingId,
        account: CustomerAccount,
    },
    ReservationCreated {
        building: BuildingId,
        reservation: Reservation,
    },
    /// Every row moved by one conditional update, applied together.
    TimeFromChanged {
        building: BuildingId,
        moves: Vec<TimeMove>,
    },
    SecondChoiceChanged {
        building: BuildingId,
        reservation_ids: Vec<Ulid>,
        second_choice: Option<String>,
    },
    AuditAppended {
        building: BuildingId,
        record: AuditRecord,
    },
}

impl Event {
    pub fn building(&self) -> &BuildingId {
        match self {
            Event::BuildingConfigured { building, .. }
            | Event::StaffUpserted { building, .. }
            | Event::MenuUpserted { building, .. }
            | Event::CustomerRegistered { building, .. }
            | Event::ReservationCreated { building, .. }
            | Event::TimeFromChanged { building, .. }
            | Event::SecondChoiceChanged { building, .. }
            | Event::AuditAppended { building, .. } => building,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(s: &str) -> NaiveDateTime {
        parse_instant(s).unwrap()
    }

    fn building() -> BuildingState {
        BuildingState::new(
            BuildingId::from("3760"),
            BuildingSettings::new(0, BusinessHours::default()),
        )
    }

    fn booked(customer: &str, time: &str, staff: Option<u32>) -> Reservation {
        let mut r = Reservation::new(CustomerId::from(customer), at(time));
        r.staff_id = staff.map(StaffId);
        r
    }

    #[test]
    fn reservations_stay_sorted() {
        let mut b = building();
        b.insert_reservation(booked("103", "2099-01-01 13:00", None));
        b.insert_reservation(booked("101", "2099-01-01 09:00", None));
        b.insert_reservation(booked("102", "2099-01-01 10:00", None));
        let times: Vec<_> = b.reservations.iter().map(|r| format_instant(r.time_from)).collect();
        assert_eq!(
            times,
            vec!["2099-01-01 09:00", "2099-01-01 10:00", "2099-01-01 13:00"]
        );
    }

    #[test]
    fn count_at_filters_customer_staff_and_void() {
        let mut b = building();
        b.insert_reservation(booked("101", "2099-01-01 09:00", Some(1)));
        b.insert_reservation(booked("102", "2099-01-01 09:00", Some(2)));
        let mut void = booked("103", "2099-01-01 09:00", Some(1));
        void.status = ReservationStatus::Void;
        b.insert_reservation(void);
        b.insert_reservation(booked("104", "2099-01-01 10:00", Some(1)));

        let nine = at("2099-01-01 09:00");
        assert_eq!(b.count_at(nine, None, None), 2);
        assert_eq!(b.count_at(nine, Some(&CustomerId::from("101")), None), 1);
        assert_eq!(b.count_at(nine, None, Some(StaffId(1))), 1);
        assert_eq!(b.count_at(nine, None, Some(StaffId(3))), 0);
        assert_eq!(b.count_at(at("2099-01-01 09:30"), None, None), 0);
    }

    #[test]
    fn seconds_are_ignored_when_counting() {
        let mut b = building();
        b.insert_reservation(booked("101", "2099-01-01 09:00", None));
        let with_seconds = at("2099-01-01 09:00") + chrono::Duration::seconds(42);
        assert_eq!(b.count_at(with_seconds, None, None), 1);
    }

    #[test]
    fn latest_active_skips_void_rows() {
        let mut b = building();
        b.insert_reservation(booked("101", "2099-01-01 09:00", None));
        let mut later = booked("101", "2099-02-01 09:00", None);
        later.status = ReservationStatus::Void;
        b.insert_reservation(later);
        b.insert_reservation(booked("102", "2099-03-01 09:00", None));

        let latest = b.latest_active_for(&CustomerId::from("101")).unwrap();
        assert_eq!(format_instant(latest.time_from), "2099-01-01 09:00");
        assert!(b.latest_active_for(&CustomerId::from("999")).is_none());
    }

    #[test]
    fn slot_ceilings_parse_dash_list() {
        assert_eq!(
            BuildingSettings::parse_slot_ceilings("3-3-2"),
            vec![Some(3), Some(3), Some(2)]
        );
        assert_eq!(
            BuildingSettings::parse_slot_ceilings("3--x"),
            vec![Some(3), None, None]
        );
        assert!(BuildingSettings::parse_slot_ceilings("").is_empty());
    }

    #[test]
    fn event_serialization_roundtrip() {
        let event = Event::ReservationCreated {
            building: BuildingId::from("3760"),
            reservation: booked("101", "2099-01-01 09:00", Some(4)),
        };
        let bytes = bincode::serialize(&event).unwrap();
        let decoded: Event = bincode::deserialize(&bytes).unwrap();
        assert_eq!(event, decoded);
    }
}
