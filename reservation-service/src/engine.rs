use chrono::Duration;
use serde::{Deserialize, Serialize};
use shared::*;
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::clock::{Clock, SystemClock};
use crate::store::ReservationStore;

/// Result of applying a payment webhook to the reservations of a checkout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CheckoutOutcome {
    Completed {
        order_id: Uuid,
        completed: usize,
        already_completed: usize,
    },
    Released {
        order_id: Uuid,
        #[serde(flatten)]
        summary: ReleaseSummary,
    },
}

/// Holds created so far by a cart reservation, in creation order. If a later
/// item fails these are released again.
#[derive(Debug, Default)]
struct CartCompensation {
    reserved: Vec<Uuid>,
}

impl CartCompensation {
    fn record(&mut self, id: Uuid) {
        self.reserved.push(id);
    }

    async fn roll_back(self, engine: &ReservationEngine) -> ReleaseSummary {
        engine
            .release_each(&self.reserved, DEFAULT_RELEASE_REASON)
            .await
    }
}

/// All mutations of reservations and of the stock they hold go through here.
pub struct ReservationEngine {
    store: Arc<dyn ReservationStore>,
    clock: Arc<dyn Clock>,
    default_hold_minutes: u32,
}

impl ReservationEngine {
    pub fn new(store: Arc<dyn ReservationStore>) -> Self {
        Self {
            store,
            clock: Arc::new(SystemClock),
            default_hold_minutes: DEFAULT_HOLD_MINUTES,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_default_hold_minutes(mut self, minutes: u32) -> Self {
        self.default_hold_minutes = minutes;
        self
    }

    pub fn store(&self) -> Arc<dyn ReservationStore> {
        Arc::clone(&self.store)
    }

    pub fn default_hold_minutes(&self) -> u32 {
        self.default_hold_minutes
    }

    /// Holds `quantity` units of `target` for `holder`.
    ///
    /// Arguments are validated before the ledger is touched. The availability
    /// check and the insert happen atomically in the store, so concurrent
    /// calls can never jointly oversell a target.
    pub async fn reserve_stock(
        &self,
        target: StockTarget,
        quantity: i32,
        holder: Holder,
        hold_minutes: Option<u32>,
    ) -> Result<Uuid, ReservationError> {
        if quantity <= 0 {
            return Err(ReservationError::invalid(format!(
                "quantity must be positive, got {}",
                quantity
            )));
        }
        let hold_minutes = hold_minutes.unwrap_or(self.default_hold_minutes);
        if hold_minutes == 0 {
            return Err(ReservationError::invalid("hold duration must be at least one minute"));
        }

        let now = self.clock.now();
        let reservation = NewStockReservation {
            id: Uuid::new_v4(),
            target,
            quantity,
            holder,
            created_at: now,
            expires_at: now + Duration::minutes(i64::from(hold_minutes)),
        };

        let reservation = self.store.reserve(reservation).await?;
        info!(
            "Reserved {} of {} for {} until {} ({})",
            reservation.quantity, reservation.target, reservation.holder, reservation.expires_at, reservation.id
        );
        Ok(reservation.id)
    }

    /// `active -> released`. A blank reason falls back to `cancelled`.
    pub async fn release_reservation(
        &self,
        reservation_id: Uuid,
        reason: Option<&str>,
    ) -> Result<(), ReservationError> {
        let reason = reason
            .map(str::trim)
            .filter(|r| !r.is_empty())
            .unwrap_or(DEFAULT_RELEASE_REASON);

        let released = self
            .store
            .release(reservation_id, reason, self.clock.now())
            .await?;
        info!(
            "Released reservation {} ({} of {}): {}",
            released.id, released.quantity, released.target, reason
        );
        Ok(())
    }

    /// `active -> completed`, binding the hold to an order. Stock was already
    /// taken at reservation time, so availability does not change.
    pub async fn complete_reservation(
        &self,
        reservation_id: Uuid,
        order_id: Uuid,
    ) -> Result<(), ReservationError> {
        let completed = self
            .store
            .complete(reservation_id, order_id, self.clock.now())
            .await?;
        info!(
            "Completed reservation {} for order {} ({} of {})",
            completed.id, order_id, completed.quantity, completed.target
        );
        Ok(())
    }

    /// Expires every active hold past its deadline. Returns how many were reclaimed.
    pub async fn cleanup_expired_reservations(&self) -> Result<usize, ReservationError> {
        let expired = self.store.expire_due(self.clock.now()).await?;
        for reservation in &expired {
            info!(
                "Expired reservation {} ({} of {} held by {})",
                reservation.id, reservation.quantity, reservation.target, reservation.holder
            );
        }
        Ok(expired.len())
    }

    pub async fn get_reservation(&self, reservation_id: Uuid) -> Result<StockReservation, ReservationError> {
        self.store
            .find(reservation_id)
            .await?
            .ok_or(ReservationError::NotFound(reservation_id))
    }

    pub async fn get_user_reservations(&self, holder: &Holder) -> Result<Vec<StockReservation>, ReservationError> {
        self.store.find_by_holder(holder).await
    }

    pub async fn get_all_active_reservations(&self) -> Result<Vec<StockReservation>, ReservationError> {
        self.store.find_active().await
    }

    /// Reserves every item in order. On the first failure the holds already
    /// taken by this call are released and the original error is returned, so
    /// either every item is held or none stays active.
    pub async fn reserve_cart_stock(
        &self,
        items: &[CartItem],
        holder: &Holder,
    ) -> Result<Vec<Uuid>, ReservationError> {
        let mut compensation = CartCompensation::default();

        for item in items {
            match self
                .reserve_stock(item.target, item.quantity, holder.clone(), None)
                .await
            {
                Ok(id) => compensation.record(id),
                Err(err) => {
                    warn!(
                        "Cart reservation for {} failed on {}: {}; rolling back {} hold(s)",
                        holder,
                        item.target,
                        err,
                        compensation.reserved.len()
                    );
                    let summary = compensation.roll_back(self).await;
                    if !summary.failed.is_empty() {
                        error!(
                            "Cart rollback for {} left {} hold(s) active: {:?}",
                            holder,
                            summary.failed.len(),
                            summary.failed
                        );
                    }
                    return Err(err);
                }
            }
        }

        Ok(compensation.reserved)
    }

    /// Completes each reservation in order, stopping at the first failure.
    /// Nothing is undone: money has already moved when this runs.
    pub async fn complete_cart_reservations(
        &self,
        reservation_ids: &[Uuid],
        order_id: Uuid,
    ) -> Result<(), ReservationError> {
        for id in reservation_ids {
            if let Err(err) = self.complete_reservation(*id, order_id).await {
                error!(
                    "Completing reservation {} for paid order {} failed: {}; needs manual attention",
                    id, order_id, err
                );
                return Err(err);
            }
        }
        Ok(())
    }

    /// Releases a whole cart, e.g. when checkout is abandoned. Keeps going
    /// past individual failures.
    pub async fn release_cart_reservations(
        &self,
        reservation_ids: &[Uuid],
        reason: Option<&str>,
    ) -> ReleaseSummary {
        let reason = reason
            .map(str::trim)
            .filter(|r| !r.is_empty())
            .unwrap_or(DEFAULT_RELEASE_REASON);
        self.release_each(reservation_ids, reason).await
    }

    /// Applies a payment webhook. Gateways redeliver, so a reservation that is
    /// already completed for the same order counts as done.
    ///
    /// The status read and the completion are separate store calls. A
    /// redelivery that overlaps the first delivery can read `active`, lose the
    /// completion race and fail with `InvalidStateTransition` (409). The
    /// reservation still ends up completed exactly once, and a later retry
    /// reports it as already completed.
    pub async fn finalize_checkout(
        &self,
        webhook: PaymentWebhook,
    ) -> Result<CheckoutOutcome, ReservationError> {
        match webhook {
            PaymentWebhook::PaymentSucceeded { order_id, reservation_ids } => {
                let mut completed = 0;
                let mut already_completed = 0;

                for id in reservation_ids {
                    let reservation = self.get_reservation(id).await?;
                    if reservation.status == ReservationStatus::Completed
                        && reservation.order_id == Some(order_id)
                    {
                        already_completed += 1;
                        continue;
                    }
                    self.complete_cart_reservations(&[id], order_id).await?;
                    completed += 1;
                }

                info!(
                    "Payment succeeded for order {}: {} completed, {} already completed",
                    order_id, completed, already_completed
                );
                Ok(CheckoutOutcome::Completed { order_id, completed, already_completed })
            }
            PaymentWebhook::PaymentFailed { order_id, reservation_ids } => {
                let summary = self
                    .release_each(&reservation_ids, PAYMENT_FAILED_RELEASE_REASON)
                    .await;
                info!(
                    "Payment failed for order {}: released {} hold(s)",
                    order_id, summary.released
                );
                Ok(CheckoutOutcome::Released { order_id, summary })
            }
        }
    }

    async fn release_each(&self, reservation_ids: &[Uuid], reason: &str) -> ReleaseSummary {
        let mut summary = ReleaseSummary::default();
        for id in reservation_ids {
            match self.release_reservation(*id, Some(reason)).await {
                Ok(()) => summary.released += 1,
                Err(err) => {
                    error!("Failed to release reservation {}: {}", id, err);
                    summary.failed.push(*id);
                }
            }
        }
        summary
    }
}
