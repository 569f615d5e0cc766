use chrono::NaiveDateTime;
use serde::Serialize;
use tracing::info;

use crate::audit::CATEGORY_FIRST_CHOICE;
use crate::engine::BuildingTx;
use crate::hours::Opening;
use crate::model::*;

use super::{now, observe, ChoiceError, ChoiceService};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FirstChoiceUpdated {
    pub old_datetime: String,
    pub new_datetime: String,
    pub staff_id: Option<StaffId>,
}

/// A staff member with room left at an instant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StaffLoad {
    pub staff_id: StaffId,
    pub current_count: u32,
    pub ceiling: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SlotInfo {
    pub time: String,
    pub start_time: String,
    pub end_time: String,
    pub slot_index: usize,
    pub label: Option<String>,
    pub available: bool,
    pub staff_id: Option<StaffId>,
    pub actual_time_from: Option<String>,
    pub staff: Vec<StaffLoad>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SlotListing {
    pub date: String,
    pub time_slots: Vec<SlotInfo>,
    pub total_slots: usize,
    pub available_slots: usize,
}

fn hours_message(opening: Opening) -> String {
    match opening {
        Opening::Outside(window) => format!("outside business hours; open {window} that day"),
        _ => "the building is closed that day".to_string(),
    }
}

impl ChoiceService {
    /// Move the customer's current reservation to `new_datetime`
    /// (`YYYY-MM-DD HH:MM`).
    pub async fn update_first_choice(
        &self,
        customer: &CustomerId,
        building: &BuildingId,
        new_datetime: &str,
    ) -> Result<FirstChoiceUpdated, ChoiceError> {
        let result = self
            .update_first_choice_at(customer, building, new_datetime, now())
            .await;
        observe("update_first_choice", &result);
        result
    }

    /// `update_first_choice` behind a credential check.
    pub async fn update_first_choice_authenticated(
        &self,
        customer: &CustomerId,
        secret: &str,
        building: &BuildingId,
        new_datetime: &str,
    ) -> Result<FirstChoiceUpdated, ChoiceError> {
        let result = self
            .update_first_choice_authenticated_at(customer, secret, building, new_datetime, now())
            .await;
        observe("update_first_choice_authenticated", &result);
        result
    }

    pub async fn update_first_choice_authenticated_at(
        &self,
        customer: &CustomerId,
        secret: &str,
        building: &BuildingId,
        new_datetime: &str,
        now: NaiveDateTime,
    ) -> Result<FirstChoiceUpdated, ChoiceError> {
        self.authenticate(customer, secret, building).await?;
        self.update_first_choice_at(customer, building, new_datetime, now)
            .await
    }

    pub async fn update_first_choice_at(
        &self,
        customer: &CustomerId,
        building: &BuildingId,
        new_datetime: &str,
        now: NaiveDateTime,
    ) -> Result<FirstChoiceUpdated, ChoiceError> {
        let target =
            parse_instant(new_datetime).ok_or(ChoiceError::InvalidFormat("YYYY-MM-DD HH:MM"))?;
        if target <= now {
            return Err(ChoiceError::PastDateRejected);
        }

        let mut tx = self.engine.begin(building).await?;
        let opening = tx.settings.hours.is_open(target);
        if !opening.is_open() {
            return Err(ChoiceError::OutsideBusinessHours(hours_message(opening)));
        }

        let current = tx
            .latest_active_for(customer)
            .ok_or(ChoiceError::ReservationNotFound)?;
        let old = current.time_from;
        let menu = current.menu_id;

        let pattern = self.engine.pattern_for(&tx).ok_or_else(|| {
            ChoiceError::ConfigurationMissing(format!(
                "no time pattern {} for building {building}",
                tx.settings.pattern_id
            ))
        })?;
        let check = self
            .policy
            .check(&tx, &pattern, target, Some(customer), menu);
        let (Some(start), Some(staff)) = (check.actual_start, check.assigned_staff) else {
            return Err(ChoiceError::SlotFull);
        };

        self.commit_first_choice(&mut tx, customer, old, start, staff)
            .await?;
        drop(tx);

        let new_text = format_instant(start);
        info!(%building, %customer, from = %format_instant(old), to = %new_text, staff = %staff, "first choice updated");
        self.audit_best_effort(
            customer,
            building,
            format!("[first choice updated] {new_text}"),
            CATEGORY_FIRST_CHOICE,
        )
        .await;

        Ok(FirstChoiceUpdated {
            old_datetime: format_instant(old),
            new_datetime: new_text,
            staff_id: Some(staff),
        })
    }

    /// Conditional commit keyed on the previously read `time_from`. Zero
    /// affected rows means the reservation moved underneath us.
    pub(crate) async fn commit_first_choice(
        &self,
        tx: &mut BuildingTx,
        customer: &CustomerId,
        old: NaiveDateTime,
        new: NaiveDateTime,
        staff: StaffId,
    ) -> Result<(), ChoiceError> {
        let rows = self
            .engine
            .update_time_from(tx, customer, old, new, Some(staff))
            .await?;
        if rows == 0 {
            return Err(ChoiceError::ReservationNotFound);
        }
        Ok(())
    }

    /// Every pattern slot starting inside the day's business window, with
    /// availability and the staff that still have room.
    pub async fn list_available_slots(
        &self,
        building: &BuildingId,
        date: &str,
    ) -> Result<SlotListing, ChoiceError> {
        let result = self.list_available_slots_at(building, date, now()).await;
        observe("list_available_slots", &result);
        result
    }

    pub async fn list_available_slots_at(
        &self,
        building: &BuildingId,
        date: &str,
        now: NaiveDateTime,
    ) -> Result<SlotListing, ChoiceError> {
        let day = parse_date(date).ok_or(ChoiceError::InvalidFormat("YYYY-MM-DD"))?;
        if day < now.date() {
            return Err(ChoiceError::PastDateRejected);
        }

        let bs = self.engine.read(building).await?;
        let pattern = self.engine.pattern_for(&bs).ok_or_else(|| {
            ChoiceError::ConfigurationMissing(format!(
                "no time pattern {} for building {building}",
                bs.settings.pattern_id
            ))
        })?;

        let mut time_slots = Vec::new();
        if let Some(window) = bs.settings.hours.window_for(day) {
            let roster = bs.staff_roster();
            for (idx, slot) in pattern.slots.iter().enumerate() {
                if !window.contains(slot.start) {
                    continue;
                }
                let instant = day.and_time(slot.start);
                let check = self.policy.check(&bs, &pattern, instant, None, None);
                let staff = roster
                    .iter()
                    .map(|s| StaffLoad {
                        staff_id: s.id,
                        current_count: bs.count_at(instant, None, Some(s.id)),
                        ceiling: s.concurrency_ceiling,
                    })
                    .filter(|load| load.current_count < load.ceiling)
                    .collect();
                time_slots.push(SlotInfo {
                    time: format_instant(instant),
                    start_time: slot.start.format(CLOCK_FORMAT).to_string(),
                    end_time: slot.end.format(CLOCK_FORMAT).to_string(),
                    slot_index: idx,
                    label: slot.label.clone(),
                    available: check.available,
                    staff_id: check.assigned_staff,
                    actual_time_from: check.actual_start.map(format_instant),
                    staff,
                });
            }
        }

        let available_slots = time_slots.iter().filter(|s| s.available).count();
        Ok(SlotListing {
            date: day.format(DATE_FORMAT).to_string(),
            total_slots: time_slots.len(),
            available_slots,
            time_slots,
        })
    }
}
