//! Persistence boundary for the stock ledger and the reservation rows held
//! against it.
//!
//! Every mutating method is a single atomic unit: the ledger adjustment and
//! the reservation row change commit together or not at all. Status changes
//! only ever leave `active`, so two racing transitions on the same
//! reservation resolve to whichever commits first; the other is rejected with
//! [`ReservationError::InvalidStateTransition`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use shared::{Holder, NewStockReservation, ReservationError, StockReservation, StockTarget};
use uuid::Uuid;

mod memory;
mod postgres;

pub use memory::InMemoryReservationStore;
pub use postgres::{DbPool, PgReservationStore};

#[async_trait]
pub trait ReservationStore: Send + Sync {
    /// Quantity free to reserve. Unknown targets have nothing available.
    async fn available_stock(&self, target: StockTarget) -> Result<i32, ReservationError>;

    /// Checks availability and inserts the reservation as one indivisible step.
    /// Fails with `InsufficientStock` without writing anything when the
    /// target cannot cover the quantity.
    async fn reserve(
        &self,
        reservation: NewStockReservation,
    ) -> Result<StockReservation, ReservationError>;

    /// `active -> released`, returning the held quantity to availability.
    async fn release(
        &self,
        id: Uuid,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<StockReservation, ReservationError>;

    /// `active -> completed`. Availability is left as is; the hold becomes a sale.
    async fn complete(
        &self,
        id: Uuid,
        order_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<StockReservation, ReservationError>;

    /// Moves every active reservation whose `expires_at` is before `now` to
    /// `expired` and returns what it reclaimed.
    async fn expire_due(&self, now: DateTime<Utc>) -> Result<Vec<StockReservation>, ReservationError>;

    async fn find(&self, id: Uuid) -> Result<Option<StockReservation>, ReservationError>;

    /// All reservations of a holder, newest first.
    async fn find_by_holder(&self, holder: &Holder) -> Result<Vec<StockReservation>, ReservationError>;

    /// Active reservations, soonest to expire first.
    async fn find_active(&self) -> Result<Vec<StockReservation>, ReservationError>;
}
