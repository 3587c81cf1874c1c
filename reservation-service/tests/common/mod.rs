#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reservation_service::{InMemoryReservationStore, ManualClock, ReservationEngine, ReservationStore};
use shared::*;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

/// In-memory store that counts calls and can be told to fail releases of
/// specific reservations.
#[derive(Default)]
pub struct FlakyStore {
    pub inner: InMemoryReservationStore,
    failing_releases: Mutex<HashSet<Uuid>>,
    failing_positions: Mutex<HashSet<usize>>,
    created: Mutex<Vec<Uuid>>,
    pub reads: AtomicUsize,
    pub reserves: AtomicUsize,
    pub releases: AtomicUsize,
}

impl FlakyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_release_of(&self, id: Uuid) {
        self.failing_releases.lock().unwrap().insert(id);
    }

    /// Fails the release of the `n`th reservation created through this store (0-based).
    pub fn fail_release_of_nth(&self, n: usize) {
        self.failing_positions.lock().unwrap().insert(n);
    }

    pub fn created(&self) -> Vec<Uuid> {
        self.created.lock().unwrap().clone()
    }

    fn release_fails(&self, id: Uuid) -> bool {
        if self.failing_releases.lock().unwrap().contains(&id) {
            return true;
        }
        let position = self.created.lock().unwrap().iter().position(|c| *c == id);
        position.map_or(false, |p| self.failing_positions.lock().unwrap().contains(&p))
    }

    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    pub fn reserves(&self) -> usize {
        self.reserves.load(Ordering::SeqCst)
    }

    pub fn releases(&self) -> usize {
        self.releases.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ReservationStore for FlakyStore {
    async fn available_stock(&self, target: StockTarget) -> Result<i32, ReservationError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.inner.available_stock(target).await
    }

    async fn reserve(
        &self,
        reservation: NewStockReservation,
    ) -> Result<StockReservation, ReservationError> {
        self.reserves.fetch_add(1, Ordering::SeqCst);
        let reservation = self.inner.reserve(reservation).await?;
        self.created.lock().unwrap().push(reservation.id);
        Ok(reservation)
    }

    async fn release(
        &self,
        id: Uuid,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<StockReservation, ReservationError> {
        self.releases.fetch_add(1, Ordering::SeqCst);
        if self.release_fails(id) {
            return Err(ReservationError::store("connection reset by peer"));
        }
        self.inner.release(id, reason, now).await
    }

    async fn complete(
        &self,
        id: Uuid,
        order_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<StockReservation, ReservationError> {
        self.inner.complete(id, order_id, now).await
    }

    async fn expire_due(&self, now: DateTime<Utc>) -> Result<Vec<StockReservation>, ReservationError> {
        self.inner.expire_due(now).await
    }

    async fn find(&self, id: Uuid) -> Result<Option<StockReservation>, ReservationError> {
        self.inner.find(id).await
    }

    async fn find_by_holder(&self, holder: &Holder) -> Result<Vec<StockReservation>, ReservationError> {
        self.inner.find_by_holder(holder).await
    }

    async fn find_active(&self) -> Result<Vec<StockReservation>, ReservationError> {
        self.inner.find_active().await
    }
}

pub struct Harness {
    pub store: Arc<InMemoryReservationStore>,
    pub clock: Arc<ManualClock>,
    pub engine: Arc<ReservationEngine>,
}

pub fn harness() -> Harness {
    let store = Arc::new(InMemoryReservationStore::new());
    let clock = Arc::new(ManualClock::default());
    let engine = Arc::new(ReservationEngine::new(store.clone()).with_clock(clock.clone()));
    Harness { store, clock, engine }
}

pub fn product() -> StockTarget {
    StockTarget::Product(Uuid::new_v4())
}

pub fn variant() -> StockTarget {
    StockTarget::Variant(Uuid::new_v4())
}

pub fn session() -> Holder {
    Holder::Session(format!("cart-{}", Uuid::new_v4()))
}

pub fn user() -> Holder {
    Holder::User(Uuid::new_v4())
}
