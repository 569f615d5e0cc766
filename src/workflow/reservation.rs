//! Read-only views of a customer's reservations. Each call takes an optional
//! secret: with one it authenticates first, without one it is a public lookup.

use chrono::{Duration, NaiveDateTime};
use serde::Serialize;

use crate::limits::*;
use crate::model::*;

use super::{now, observe, ChoiceError, ChoiceService};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CurrentReservation {
    pub has_reservation: bool,
    pub reservation_date: Option<String>,
    pub time_to: Option<String>,
    pub staff_id: Option<StaffId>,
    pub menu_id: Option<MenuId>,
    pub second_choice: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReservationEntry {
    pub datetime: String,
    pub datetime_to: Option<String>,
    pub staff_id: Option<StaffId>,
    pub menu_id: Option<MenuId>,
    pub second_choice: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReservationHistory {
    pub history: Vec<ReservationEntry>,
    pub total_count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReservationStatusCounts {
    pub has_reservations: bool,
    pub total_reservations: usize,
    pub upcoming_reservations: usize,
    pub with_second_choice: usize,
    pub latest_reservation: Option<String>,
    pub earliest_reservation: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UpcomingEntry {
    #[serde(flatten)]
    pub reservation: ReservationEntry,
    pub days_from_now: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UpcomingReservations {
    pub upcoming_reservations: Vec<UpcomingEntry>,
    pub total_count: usize,
    pub days_ahead: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SummaryCounts {
    pub has_current_reservation: bool,
    pub total_reservations: usize,
    pub upcoming_count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReservationSummary {
    pub current_reservation: CurrentReservation,
    pub status: ReservationStatusCounts,
    pub upcoming: UpcomingReservations,
    pub summary: SummaryCounts,
}

fn entry(r: &Reservation) -> ReservationEntry {
    ReservationEntry {
        datetime: format_instant(r.time_from),
        datetime_to: r.time_to.map(format_instant),
        staff_id: r.staff_id,
        menu_id: r.menu_id,
        second_choice: r.second_choice.clone(),
    }
}

fn current_of(bs: &BuildingState, customer: &CustomerId) -> CurrentReservation {
    match bs.latest_active_for(customer) {
        Some(r) => CurrentReservation {
            has_reservation: true,
            reservation_date: Some(format_instant(r.time_from)),
            time_to: r.time_to.map(format_instant),
            staff_id: r.staff_id,
            menu_id: r.menu_id,
            second_choice: r.second_choice.clone(),
        },
        None => CurrentReservation {
            has_reservation: false,
            reservation_date: None,
            time_to: None,
            staff_id: None,
            menu_id: None,
            second_choice: None,
        },
    }
}

/// The customer's active rows, oldest first.
fn active_rows<'a>(
    bs: &'a BuildingState,
    customer: &'a CustomerId,
) -> impl DoubleEndedIterator<Item = &'a Reservation> + 'a {
    bs.reservations
        .iter()
        .filter(move |r| r.is_active() && &r.customer_id == customer)
}

fn status_of(bs: &BuildingState, customer: &CustomerId, now: NaiveDateTime) -> ReservationStatusCounts {
    let rows: Vec<&Reservation> = active_rows(bs, customer).collect();
    ReservationStatusCounts {
        has_reservations: !rows.is_empty(),
        total_reservations: rows.len(),
        upcoming_reservations: rows.iter().filter(|r| r.time_from >= now).count(),
        with_second_choice: rows.iter().filter(|r| r.second_choice.is_some()).count(),
        latest_reservation: rows.last().map(|r| format_instant(r.time_from)),
        earliest_reservation: rows.first().map(|r| format_instant(r.time_from)),
    }
}

fn upcoming_of(
    bs: &BuildingState,
    customer: &CustomerId,
    days_ahead: u32,
    now: NaiveDateTime,
) -> UpcomingReservations {
    let horizon = now + Duration::days(i64::from(days_ahead));
    let upcoming_reservations: Vec<UpcomingEntry> = active_rows(bs, customer)
        .filter(|r| r.time_from >= now && r.time_from <= horizon)
        .map(|r| UpcomingEntry {
            reservation: entry(r),
            days_from_now: (r.time_from - now).num_days(),
        })
        .collect();
    UpcomingReservations {
        total_count: upcoming_reservations.len(),
        upcoming_reservations,
        days_ahead,
    }
}

impl ChoiceService {
    async fn authenticate_if_given(
        &self,
        customer: &CustomerId,
        secret: Option<&str>,
        building: &BuildingId,
    ) -> Result<(), ChoiceError> {
        match secret {
            Some(secret) => self.authenticate(customer, secret, building).await,
            None => Ok(()),
        }
    }

    /// The customer's most recent active reservation. No reservation is not
    /// an error: `has_reservation` is false.
    pub async fn get_reservation(
        &self,
        customer: &CustomerId,
        secret: Option<&str>,
        building: &BuildingId,
    ) -> Result<CurrentReservation, ChoiceError> {
        let result = self.current_reservation(customer, secret, building).await;
        observe("get_reservation", &result);
        result
    }

    async fn current_reservation(
        &self,
        customer: &CustomerId,
        secret: Option<&str>,
        building: &BuildingId,
    ) -> Result<CurrentReservation, ChoiceError> {
        self.authenticate_if_given(customer, secret, building).await?;
        let bs = self.engine.read(building).await?;
        Ok(current_of(&bs, customer))
    }

    /// Active reservations, latest first.
    pub async fn get_reservation_history(
        &self,
        customer: &CustomerId,
        secret: Option<&str>,
        building: &BuildingId,
        limit: Option<usize>,
    ) -> Result<ReservationHistory, ChoiceError> {
        let result = self
            .reservation_history(customer, secret, building, limit)
            .await;
        observe("get_reservation_history", &result);
        result
    }

    async fn reservation_history(
        &self,
        customer: &CustomerId,
        secret: Option<&str>,
        building: &BuildingId,
        limit: Option<usize>,
    ) -> Result<ReservationHistory, ChoiceError> {
        self.authenticate_if_given(customer, secret, building).await?;
        let limit = limit
            .unwrap_or(DEFAULT_RESERVATION_HISTORY_LIMIT)
            .clamp(1, MAX_RESERVATION_HISTORY_LIMIT);
        let bs = self.engine.read(building).await?;
        let history: Vec<ReservationEntry> =
            active_rows(&bs, customer).rev().take(limit).map(entry).collect();
        Ok(ReservationHistory {
            total_count: history.len(),
            history,
        })
    }

    pub async fn get_reservation_status(
        &self,
        customer: &CustomerId,
        secret: Option<&str>,
        building: &BuildingId,
    ) -> Result<ReservationStatusCounts, ChoiceError> {
        let result = self
            .get_reservation_status_at(customer, secret, building, now())
            .await;
        observe("get_reservation_status", &result);
        result
    }

    pub async fn get_reservation_status_at(
        &self,
        customer: &CustomerId,
        secret: Option<&str>,
        building: &BuildingId,
        now: NaiveDateTime,
    ) -> Result<ReservationStatusCounts, ChoiceError> {
        self.authenticate_if_given(customer, secret, building).await?;
        let bs = self.engine.read(building).await?;
        Ok(status_of(&bs, customer, now))
    }

    /// Active reservations from now through `days_ahead` days out, soonest first.
    pub async fn get_upcoming_reservations(
        &self,
        customer: &CustomerId,
        secret: Option<&str>,
        building: &BuildingId,
        days_ahead: Option<u32>,
    ) -> Result<UpcomingReservations, ChoiceError> {
        let result = self
            .get_upcoming_reservations_at(customer, secret, building, days_ahead, now())
            .await;
        observe("get_upcoming_reservations", &result);
        result
    }

    pub async fn get_upcoming_reservations_at(
        &self,
        customer: &CustomerId,
        secret: Option<&str>,
        building: &BuildingId,
        days_ahead: Option<u32>,
        now: NaiveDateTime,
    ) -> Result<UpcomingReservations, ChoiceError> {
        self.authenticate_if_given(customer, secret, building).await?;
        let days_ahead = days_ahead.unwrap_or(DEFAULT_DAYS_AHEAD).min(MAX_DAYS_AHEAD);
        let bs = self.engine.read(building).await?;
        Ok(upcoming_of(&bs, customer, days_ahead, now))
    }

    /// Current reservation, status counts and the default upcoming window,
    /// all from one snapshot.
    pub async fn get_reservation_summary(
        &self,
        customer: &CustomerId,
        secret: Option<&str>,
        building: &BuildingId,
    ) -> Result<ReservationSummary, ChoiceError> {
        let result = self
            .get_reservation_summary_at(customer, secret, building, now())
            .await;
        observe("get_reservation_summary", &result);
        result
    }

    pub async fn get_reservation_summary_at(
        &self,
        customer: &CustomerId,
        secret: Option<&str>,
        building: &BuildingId,
        now: NaiveDateTime,
    ) -> Result<ReservationSummary, ChoiceError> {
        self.authenticate_if_given(customer, secret, building).await?;
        let bs = self.engine.read(building).await?;
        let current_reservation = current_of(&bs, customer);
        let status = status_of(&bs, customer, now);
        let upcoming = upcoming_of(&bs, customer, DEFAULT_DAYS_AHEAD, now);
        let summary = SummaryCounts {
            has_current_reservation: current_reservation.has_reservation,
            total_reservations: status.total_reservations,
            upcoming_count: upcoming.total_count,
        };
        Ok(ReservationSummary {
            current_reservation,
            status,
            upcoming,
            summary,
        })
    }
}
