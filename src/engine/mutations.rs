use std::sync::Arc;

use chrono::NaiveDateTime;
use tokio::sync::oneshot;
use tokio::sync::RwLock;
use tracing::info;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::{BuildingTx, Engine, EngineError, WalCommand};

fn check_customer_id(customer: &CustomerId) -> Result<(), EngineError> {
    if customer.0.is_empty() || customer.0.len() > MAX_CUSTOMER_ID_LEN {
        return Err(EngineError::LimitExceeded("customer id length"));
    }
    Ok(())
}

impl Engine {
    /// Create a building, or replace the settings of an existing one.
    pub async fn configure_building(
        &self,
        building: BuildingId,
        settings: BuildingSettings,
    ) -> Result<(), EngineError> {
        if building.0.is_empty() || building.0.len() > MAX_BUILDING_ID_LEN {
            return Err(EngineError::LimitExceeded("building id length"));
        }
        let event = Event::BuildingConfigured {
            building: building.clone(),
            settings: settings.clone(),
        };
        if let Some(shared) = self.get_building(&building) {
            let mut guard = shared.write().await;
            return self.persist_and_apply(&mut guard, &event).await;
        }

        let _catalog = self.catalog.lock().await;
        if let Some(shared) = self.get_building(&building) {
            let mut guard = shared.write().await;
            return self.persist_and_apply(&mut guard, &event).await;
        }
        self.wal_append(&event).await?;
        let bs = BuildingState::new(building.clone(), settings);
        self.state.insert(building.clone(), Arc::new(RwLock::new(bs)));
        info!(%building, "building configured");
        Ok(())
    }

    pub async fn upsert_staff(&self, building: &BuildingId, staff: Staff) -> Result<(), EngineError> {
        let mut tx = self.begin(building).await?;
        let event = Event::StaffUpserted {
            building: building.clone(),
            staff,
        };
        self.persist_and_apply(&mut tx.guard, &event).await
    }

    pub async fn upsert_menu(&self, building: &BuildingId, menu: Menu) -> Result<(), EngineError> {
        let mut tx = self.begin(building).await?;
        let event = Event::MenuUpserted {
            building: building.clone(),
            menu,
        };
        self.persist_and_apply(&mut tx.guard, &event).await
    }

    pub async fn register_customer(
        &self,
        building: &BuildingId,
        account: CustomerAccount,
    ) -> Result<(), EngineError> {
        check_customer_id(&account.id)?;
        let mut tx = self.begin(building).await?;
        let event = Event::CustomerRegistered {
            building: building.clone(),
            account,
        };
        self.persist_and_apply(&mut tx.guard, &event).await
    }

    /// Insert a reservation as-is. Bookings are made elsewhere; this exists
    /// for seeding and tests and does not check capacity.
    pub async fn create_reservation(
        &self,
        building: &BuildingId,
        reservation: Reservation,
    ) -> Result<Ulid, EngineError> {
        check_customer_id(&reservation.customer_id)?;
        let id = reservation.id;
        let mut tx = self.begin(building).await?;
        let event = Event::ReservationCreated {
            building: building.clone(),
            reservation,
        };
        self.persist_and_apply(&mut tx.guard, &event).await?;
        Ok(id)
    }

    /// Conditional update of `time_from` for the customer's active rows whose
    /// current `time_from` equals `old`. `time_to` shifts by the same delta and
    /// the assigned staff is replaced when `staff` is given. All matching rows
    /// move in one WAL record. Returns the number of rows changed.
    pub async fn update_time_from(
        &self,
        tx: &mut BuildingTx,
        customer: &CustomerId,
        old: NaiveDateTime,
        new: NaiveDateTime,
        staff: Option<StaffId>,
    ) -> Result<usize, EngineError> {
        let old = to_minute(old);
        let new = to_minute(new);
        let delta = new - old;
        let moves: Vec<TimeMove> = tx
            .reservations
            .iter()
            .filter(|r| r.is_active() && &r.customer_id == customer && r.time_from == old)
            .map(|r| TimeMove {
                reservation_id: r.id,
                time_from: new,
                time_to: r.time_to.and_then(|t| t.checked_add_signed(delta)),
                staff_id: staff.or(r.staff_id),
            })
            .collect();
        if moves.is_empty() {
            return Ok(0);
        }

        let rows = moves.len();
        let event = Event::TimeFromChanged {
            building: tx.id.clone(),
            moves,
        };
        self.persist_and_apply(&mut tx.guard, &event).await?;
        Ok(rows)
    }

    /// Conditional update of `second_choice` keyed like [`Engine::update_time_from`].
    /// `None` clears the field.
    pub async fn update_second_choice(
        &self,
        tx: &mut BuildingTx,
        customer: &CustomerId,
        time_from: NaiveDateTime,
        second_choice: Option<String>,
    ) -> Result<usize, EngineError> {
        let time_from = to_minute(time_from);
        let reservation_ids: Vec<Ulid> = tx
            .reservations
            .iter()
            .filter(|r| r.is_active() && &r.customer_id == customer && r.time_from == time_from)
            .map(|r| r.id)
            .collect();
        if reservation_ids.is_empty() {
            return Ok(0);
        }

        let rows = reservation_ids.len();
        let event = Event::SecondChoiceChanged {
            building: tx.id.clone(),
            reservation_ids,
            second_choice,
        };
        self.persist_and_apply(&mut tx.guard, &event).await?;
        Ok(rows)
    }

    /// Append an audit record stamped `created`.
    pub async fn append_audit(
        &self,
        building: &BuildingId,
        customer: &CustomerId,
        note: String,
        category: &str,
        created: NaiveDateTime,
    ) -> Result<TaioId, EngineError> {
        let mut tx = self.begin(building).await?;
        let record = AuditRecord {
            id: self.next_taio_id(),
            customer_id: customer.clone(),
            note,
            category: category.to_string(),
            created,
        };
        let id = record.id;
        let event = Event::AuditAppended {
            building: building.clone(),
            record,
        };
        self.persist_and_apply(&mut tx.guard, &event).await?;
        Ok(id)
    }

    /// Rewrite the WAL as the minimal event list recreating current state.
    /// Every building stays read-locked, and the catalog locked, until the
    /// rewrite is acknowledged, so no append can slip in between the snapshot
    /// and the swap.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let catalog = self.catalog.lock().await;
        let mut buildings: Vec<_> = self.state.iter().map(|e| e.value().clone()).collect();
        let mut guards = Vec::with_capacity(buildings.len());
        for shared in buildings.drain(..) {
            guards.push(shared.read_owned().await);
        }
        guards.sort_by(|a, b| a.id.cmp(&b.id));

        let mut events = Vec::new();
        for bs in &guards {
            let building = bs.id.clone();
            events.push(Event::BuildingConfigured {
                building: building.clone(),
                settings: bs.settings.clone(),
            });
            events.extend(bs.staff.values().map(|staff| Event::StaffUpserted {
                building: building.clone(),
                staff: staff.clone(),
            }));
            events.extend(bs.menus.values().map(|menu| Event::MenuUpserted {
                building: building.clone(),
                menu: menu.clone(),
            }));
            events.extend(bs.customers.values().map(|account| Event::CustomerRegistered {
                building: building.clone(),
                account: account.clone(),
            }));
            events.extend(bs.reservations.iter().map(|r| Event::ReservationCreated {
                building: building.clone(),
                reservation: r.clone(),
            }));
            events.extend(bs.audit.iter().map(|record| Event::AuditAppended {
                building: building.clone(),
                record: record.clone(),
            }));
        }

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        let result = rx
            .await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()));
        drop(guards);
        drop(catalog);
        result
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
