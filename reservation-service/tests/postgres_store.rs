//! Runs against a live PostgreSQL with the migrations applied.
//!
//! `DATABASE_URL=postgres://... cargo test -p reservation-service --test postgres_store -- --ignored`

use reservation_service::{PgReservationStore, ReservationEngine, ReservationStore};
use shared::*;
use std::sync::Arc;
use uuid::Uuid;

async fn store() -> PgReservationStore {
    let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");
    PgReservationStore::connect(&url, 16).await.expect("connect")
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
#[ignore]
async fn concurrent_reservations_never_oversell() {
    let store = Arc::new(store().await);
    let target = StockTarget::Product(Uuid::new_v4());
    store.set_available(target, 10).await.unwrap();
    let engine = Arc::new(ReservationEngine::new(store.clone()));

    let tasks: Vec<_> = (0..30)
        .map(|i| {
            let engine = engine.clone();
            tokio::spawn(async move {
                engine
                    .reserve_stock(target, 1, Holder::Session(format!("pg-{}", i)), None)
                    .await
            })
        })
        .collect();

    let mut succeeded = 0;
    for task in tasks {
        match task.await.unwrap() {
            Ok(_) => succeeded += 1,
            Err(err) => assert!(err.is_insufficient_stock(), "unexpected error: {}", err),
        }
    }

    assert_eq!(succeeded, 10);
    assert_eq!(store.available_stock(target).await.unwrap(), 0);
}

#[tokio::test]
#[ignore]
async fn lifecycle_against_postgres() {
    let store = Arc::new(store().await);
    let target = StockTarget::Variant(Uuid::new_v4());
    store.set_available(target, 5).await.unwrap();
    let engine = ReservationEngine::new(store.clone());
    let holder = Holder::User(Uuid::new_v4());

    let released = engine.reserve_stock(target, 2, holder.clone(), None).await.unwrap();
    let completed = engine.reserve_stock(target, 3, holder.clone(), None).await.unwrap();
    assert_eq!(store.available_stock(target).await.unwrap(), 0);

    engine.release_reservation(released, None).await.unwrap();
    assert_eq!(store.available_stock(target).await.unwrap(), 2);

    let order_id = Uuid::new_v4();
    engine.complete_reservation(completed, order_id).await.unwrap();
    assert_eq!(store.available_stock(target).await.unwrap(), 2);

    let err = engine.release_reservation(completed, None).await.unwrap_err();
    assert!(matches!(
        err,
        ReservationError::InvalidStateTransition { status: ReservationStatus::Completed, .. }
    ));
    assert!(matches!(
        engine.release_reservation(Uuid::new_v4(), None).await,
        Err(ReservationError::NotFound(_))
    ));

    let mine = engine.get_user_reservations(&holder).await.unwrap();
    assert_eq!(mine.len(), 2);
}
