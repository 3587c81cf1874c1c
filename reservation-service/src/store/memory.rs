use async_trait::async_trait;
use chrono::{DateTime, Utc};
use shared::*;
use std::collections::HashMap;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::ReservationStore;

#[derive(Debug, Default, Clone, Copy)]
struct Level {
    available: i32,
    reserved: i32,
}

#[derive(Debug, Default)]
struct Ledger {
    levels: HashMap<StockTarget, Level>,
    reservations: HashMap<Uuid, StockReservation>,
}

impl Ledger {
    fn active_mut(&mut self, id: Uuid) -> Result<&mut StockReservation, ReservationError> {
        let reservation = self
            .reservations
            .get_mut(&id)
            .ok_or(ReservationError::NotFound(id))?;
        if reservation.status.is_terminal() {
            return Err(ReservationError::InvalidStateTransition {
                id,
                status: reservation.status,
            });
        }
        Ok(reservation)
    }

    /// Applies both deltas or neither.
    fn adjust(
        &mut self,
        target: StockTarget,
        available: i32,
        reserved: i32,
    ) -> Result<(), ReservationError> {
        let level = self.levels.get(&target).copied().unwrap_or_default();
        let adjusted = level
            .available
            .checked_add(available)
            .zip(level.reserved.checked_add(reserved))
            .map(|(available, reserved)| Level { available, reserved })
            .ok_or_else(|| ReservationError::store(format!("stock level for {} out of range", target)))?;
        self.levels.insert(target, adjusted);
        Ok(())
    }

    /// Takes an active hold out of circulation. The ledger moves first, so a
    /// rejected adjustment leaves the reservation active.
    fn settle(
        &mut self,
        id: Uuid,
        restock: bool,
        apply: impl FnOnce(&mut StockReservation),
    ) -> Result<StockReservation, ReservationError> {
        let (target, quantity) = {
            let reservation = self.active_mut(id)?;
            (reservation.target, reservation.quantity)
        };
        let returned = if restock { quantity } else { 0 };
        self.adjust(target, returned, -quantity)?;

        let reservation = self.active_mut(id)?;
        apply(&mut *reservation);
        Ok(reservation.clone())
    }
}

/// Single-process ledger. One lock guards levels and reservations together,
/// which makes every operation atomic with respect to every other.
#[derive(Debug, Default)]
pub struct InMemoryReservationStore {
    ledger: Mutex<Ledger>,
}

impl InMemoryReservationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the quantity free to reserve for a target, leaving holds untouched.
    pub async fn set_available(&self, target: StockTarget, quantity: i32) {
        let mut ledger = self.ledger.lock().await;
        ledger.levels.entry(target).or_default().available = quantity;
    }

    /// Quantity currently tied up in active holds.
    pub async fn reserved_stock(&self, target: StockTarget) -> i32 {
        let ledger = self.ledger.lock().await;
        ledger.levels.get(&target).map(|l| l.reserved).unwrap_or(0)
    }
}

#[async_trait]
impl ReservationStore for InMemoryReservationStore {
    async fn available_stock(&self, target: StockTarget) -> Result<i32, ReservationError> {
        let ledger = self.ledger.lock().await;
        Ok(ledger.levels.get(&target).map(|l| l.available.max(0)).unwrap_or(0))
    }

    async fn reserve(
        &self,
        reservation: NewStockReservation,
    ) -> Result<StockReservation, ReservationError> {
        let mut ledger = self.ledger.lock().await;
        let available = ledger
            .levels
            .get(&reservation.target)
            .map(|l| l.available.max(0))
            .unwrap_or(0);

        if available < reservation.quantity {
            return Err(ReservationError::InsufficientStock {
                target: reservation.target,
                requested: reservation.quantity,
                available,
            });
        }
        if ledger.reservations.contains_key(&reservation.id) {
            return Err(ReservationError::store(format!(
                "duplicate reservation id {}",
                reservation.id
            )));
        }

        ledger.adjust(reservation.target, -reservation.quantity, reservation.quantity)?;
        let reservation = reservation.into_active();
        ledger.reservations.insert(reservation.id, reservation.clone());
        Ok(reservation)
    }

    async fn release(
        &self,
        id: Uuid,
        reason: &str,
        _now: DateTime<Utc>,
    ) -> Result<StockReservation, ReservationError> {
        let mut ledger = self.ledger.lock().await;
        ledger.settle(id, true, |reservation| {
            reservation.status = ReservationStatus::Released;
            reservation.release_reason = Some(reason.to_string());
        })
    }

    async fn complete(
        &self,
        id: Uuid,
        order_id: Uuid,
        _now: DateTime<Utc>,
    ) -> Result<StockReservation, ReservationError> {
        let mut ledger = self.ledger.lock().await;
        ledger.settle(id, false, |reservation| {
            reservation.status = ReservationStatus::Completed;
            reservation.order_id = Some(order_id);
        })
    }

    async fn expire_due(&self, now: DateTime<Utc>) -> Result<Vec<StockReservation>, ReservationError> {
        let mut ledger = self.ledger.lock().await;
        let mut due: Vec<Uuid> = ledger
            .reservations
            .values()
            .filter(|r| r.is_due(now))
            .map(|r| r.id)
            .collect();
        due.sort();

        let mut expired = Vec::with_capacity(due.len());
        for id in due {
            expired.push(ledger.settle(id, true, |reservation| {
                reservation.status = ReservationStatus::Expired;
                reservation.release_reason = Some(EXPIRED_RELEASE_REASON.to_string());
            })?);
        }
        Ok(expired)
    }

    async fn find(&self, id: Uuid) -> Result<Option<StockReservation>, ReservationError> {
        let ledger = self.ledger.lock().await;
        Ok(ledger.reservations.get(&id).cloned())
    }

    async fn find_by_holder(&self, holder: &Holder) -> Result<Vec<StockReservation>, ReservationError> {
        let ledger = self.ledger.lock().await;
        let mut found: Vec<StockReservation> = ledger
            .reservations
            .values()
            .filter(|r| &r.holder == holder)
            .cloned()
            .collect();
        found.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(found)
    }

    async fn find_active(&self) -> Result<Vec<StockReservation>, ReservationError> {
        let ledger = self.ledger.lock().await;
        let mut found: Vec<StockReservation> = ledger
            .reservations
            .values()
            .filter(|r| r.is_active())
            .cloned()
            .collect();
        found.sort_by(|a, b| a.expires_at.cmp(&b.expires_at));
        Ok(found)
    }
}
