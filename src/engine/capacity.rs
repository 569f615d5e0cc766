use crate::model::*;
use crate::pattern::{TimePattern, DEFAULT_MINUTE_UNIT};

// ── Capacity Model ───────────────────────────────────────────────

impl BuildingState {
    /// Whole-slot ceiling for a pattern slot. `None` is unbounded.
    pub fn whole_slot_ceiling(&self, slot_index: usize) -> Option<u32> {
        self.settings.slot_ceilings.get(slot_index).copied().flatten()
    }

    /// Staff eligible for normal assignment, in ascending id order.
    pub fn staff_roster(&self) -> Vec<&Staff> {
        // BTreeMap iteration is already ordered by StaffId.
        self.staff.values().filter(|s| s.is_assignable()).collect()
    }

    /// Consecutive elementary units a service occupies. Defaults to 1 when no
    /// menu is given, or the menu is unknown, void or has no duration.
    pub fn service_duration_units(&self, menu: Option<MenuId>) -> u32 {
        menu.and_then(|id| self.menus.get(&id))
            .filter(|m| !m.void && m.duration_units > 0)
            .map(|m| m.duration_units)
            .unwrap_or(1)
    }

    /// The building override wins over the pattern's own unit.
    pub fn minute_unit(&self, pattern: &TimePattern) -> u32 {
        match self.settings.minute_unit {
            Some(unit) if unit > 0 => unit,
            _ if pattern.minute_unit > 0 => pattern.minute_unit,
            _ => DEFAULT_MINUTE_UNIT,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hours::BusinessHours;

    fn building() -> BuildingState {
        let mut settings = BuildingSettings::new(0, BusinessHours::default());
        settings.slot_ceilings = BuildingSettings::parse_slot_ceilings("3-x");
        BuildingState::new(BuildingId::from("3760"), settings)
    }

    #[test]
    fn ceilings_default_to_unbounded() {
        let b = building();
        assert_eq!(b.whole_slot_ceiling(0), Some(3));
        assert_eq!(b.whole_slot_ceiling(1), None);
        assert_eq!(b.whole_slot_ceiling(7), None);
    }

    #[test]
    fn roster_excludes_void_and_walk_in_staff() {
        let mut b = building();
        let mut walk_in = Staff::new(1, 2);
        walk_in.walk_in_only = true;
        let mut void = Staff::new(2, 2);
        void.void = true;
        for s in [Staff::new(9, 1), walk_in, void, Staff::new(4, 1)] {
            b.staff.insert(s.id, s);
        }
        let ids: Vec<u32> = b.staff_roster().iter().map(|s| s.id.0).collect();
        assert_eq!(ids, vec![4, 9]);
    }

    #[test]
    fn duration_falls_back_to_one_unit() {
        let mut b = building();
        let menu = |id: u32, units: u32, void: bool| Menu {
            id: MenuId(id),
            name: None,
            duration_units: units,
            void,
        };
        for m in [menu(1, 3, false), menu(2, 0, false), menu(3, 4, true)] {
            b.menus.insert(m.id, m);
        }
        assert_eq!(b.service_duration_units(None), 1);
        assert_eq!(b.service_duration_units(Some(MenuId(1))), 3);
        assert_eq!(b.service_duration_units(Some(MenuId(2))), 1);
        assert_eq!(b.service_duration_units(Some(MenuId(3))), 1);
        assert_eq!(b.service_duration_units(Some(MenuId(99))), 1);
    }

    #[test]
    fn building_minute_unit_overrides_pattern() {
        let mut b = building();
        let pattern = TimePattern::new(0, None, Vec::new(), 30).unwrap();
        assert_eq!(b.minute_unit(&pattern), 30);
        b.settings.minute_unit = Some(15);
        assert_eq!(b.minute_unit(&pattern), 15);
    }
}
