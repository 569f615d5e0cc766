use std::sync::Arc;

use chrono::NaiveDateTime;
use tracing::debug;

use crate::hours::Opening;
use crate::model::*;
use crate::pattern::TimePattern;

use super::availability::{SlotCheck, StartPolicy};
use super::{Engine, EngineError};

impl Engine {
    /// Resolve the time pattern configured for a building.
    pub async fn resolve_pattern(
        &self,
        building: &BuildingId,
    ) -> Result<Option<Arc<TimePattern>>, EngineError> {
        let bs = self.read(building).await?;
        Ok(self.pattern_for(&bs))
    }

    pub async fn is_open(
        &self,
        building: &BuildingId,
        at: NaiveDateTime,
    ) -> Result<Opening, EngineError> {
        let bs = self.read(building).await?;
        Ok(bs.settings.hours.is_open(at))
    }

    pub async fn whole_slot_ceiling(
        &self,
        building: &BuildingId,
        slot_index: usize,
    ) -> Result<Option<u32>, EngineError> {
        Ok(self.read(building).await?.whole_slot_ceiling(slot_index))
    }

    /// Eligible staff as `(id, concurrency_ceiling)`, ascending by id.
    pub async fn staff_roster(
        &self,
        building: &BuildingId,
    ) -> Result<Vec<(StaffId, u32)>, EngineError> {
        let bs = self.read(building).await?;
        Ok(bs
            .staff_roster()
            .into_iter()
            .map(|s| (s.id, s.concurrency_ceiling))
            .collect())
    }

    pub async fn service_duration_units(
        &self,
        building: &BuildingId,
        menu: Option<MenuId>,
    ) -> Result<u32, EngineError> {
        Ok(self.read(building).await?.service_duration_units(menu))
    }

    /// Advisory availability check. Any lookup failure (unknown building,
    /// missing pattern, unparseable instant) reads as not available.
    pub async fn check_availability(
        &self,
        building: &BuildingId,
        target: &str,
        exclude: Option<&CustomerId>,
        menu: Option<MenuId>,
        policy: StartPolicy,
    ) -> SlotCheck {
        let Some(at) = parse_instant(target) else {
            debug!(%building, instant = target, "availability check on malformed instant");
            return SlotCheck::unavailable(None);
        };
        let Ok(bs) = self.read(building).await else {
            debug!(%building, "availability check on unknown building");
            return SlotCheck::unavailable(None);
        };
        let Some(pattern) = self.pattern_for(&bs) else {
            debug!(%building, pattern_id = bs.settings.pattern_id, "no time pattern for building");
            return SlotCheck::unavailable(None);
        };
        let check = policy.check(&bs, &pattern, at, exclude, menu);
        let label = if check.available { "available" } else { "full" };
        metrics::counter!(crate::observability::AVAILABILITY_CHECKS_TOTAL, "result" => label)
            .increment(1);
        check
    }

    /// Most recent active reservation for a customer.
    pub async fn latest_reservation(
        &self,
        building: &BuildingId,
        customer: &CustomerId,
    ) -> Result<Option<Reservation>, EngineError> {
        let bs = self.read(building).await?;
        Ok(bs.latest_active_for(customer).cloned())
    }

    pub fn building_count(&self) -> usize {
        self.state.len()
    }

    pub fn is_configured(&self, building: &BuildingId) -> bool {
        self.state.contains_key(building)
    }
}
