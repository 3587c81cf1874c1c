use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel_async::pooled_connection::{bb8::Pool, AsyncDieselConnectionManager};
use diesel_async::{AsyncConnection, AsyncPgConnection, RunQueryDsl};
use shared::*;
use std::collections::BTreeMap;
use uuid::Uuid;

use super::ReservationStore;
use crate::models::*;
use crate::schema::*;

pub type DbPool = Pool<AsyncPgConnection>;

type PooledConnection<'a> =
    bb8::PooledConnection<'a, AsyncDieselConnectionManager<AsyncPgConnection>>;

/// Ledger backed by PostgreSQL.
///
/// Admission is a conditional `UPDATE ... WHERE available_quantity >= q`, so
/// concurrent reservations against one target queue on the stock row lock and
/// each re-checks availability against the committed value. Status changes
/// are conditional on `status = 'active'` in the same way.
#[derive(Clone)]
pub struct PgReservationStore {
    pool: DbPool,
}

impl PgReservationStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str, max_connections: u32) -> anyhow::Result<Self> {
        let config = AsyncDieselConnectionManager::<AsyncPgConnection>::new(database_url);
        let pool = Pool::builder().max_size(max_connections).build(config).await?;
        Ok(Self::new(pool))
    }

    /// Overwrites the quantity free to reserve for a target.
    pub async fn set_available(&self, target: StockTarget, quantity: i32) -> Result<(), ReservationError> {
        let mut conn = self.conn().await?;
        diesel::insert_into(stock_levels::table)
            .values(&NewStockLevel::new(target, quantity))
            .on_conflict((stock_levels::target_kind, stock_levels::target_id))
            .do_update()
            .set((
                stock_levels::available_quantity.eq(quantity),
                stock_levels::updated_at.eq(Some(Utc::now())),
            ))
            .execute(&mut conn)
            .await?;
        Ok(())
    }

    async fn conn(&self) -> Result<PooledConnection<'_>, ReservationError> {
        self.pool.get().await.map_err(ReservationError::store)
    }
}

async fn read_available(
    conn: &mut AsyncPgConnection,
    target: StockTarget,
) -> Result<i32, ReservationError> {
    let available = stock_levels::table
        .filter(stock_levels::target_kind.eq(target.kind()))
        .filter(stock_levels::target_id.eq(target.id()))
        .select(stock_levels::available_quantity)
        .first::<i32>(conn)
        .await
        .optional()?;
    Ok(available.unwrap_or(0).max(0))
}

async fn adjust_level(
    conn: &mut AsyncPgConnection,
    target: StockTarget,
    available_delta: i32,
    reserved_delta: i32,
    now: DateTime<Utc>,
) -> Result<(), ReservationError> {
    let updated = diesel::update(
        stock_levels::table
            .filter(stock_levels::target_kind.eq(target.kind()))
            .filter(stock_levels::target_id.eq(target.id())),
    )
    .set((
        stock_levels::available_quantity.eq(stock_levels::available_quantity + available_delta),
        stock_levels::reserved_quantity.eq(stock_levels::reserved_quantity + reserved_delta),
        stock_levels::updated_at.eq(Some(now)),
    ))
    .execute(conn)
    .await?;

    if updated == 0 {
        return Err(ReservationError::store(format!("no stock level for {}", target)));
    }
    Ok(())
}

/// Explains why a conditional transition on `id` matched no row.
async fn rejected_transition(conn: &mut AsyncPgConnection, id: Uuid) -> ReservationError {
    let status = stock_reservations::table
        .find(id)
        .select(stock_reservations::status)
        .first::<String>(conn)
        .await
        .optional();

    match status {
        Ok(Some(status)) => match status.parse::<ReservationStatus>() {
            Ok(status) => ReservationError::InvalidStateTransition { id, status },
            Err(e) => e,
        },
        Ok(None) => ReservationError::NotFound(id),
        Err(e) => e.into(),
    }
}

fn into_reservations(rows: Vec<DbStockReservation>) -> Result<Vec<StockReservation>, ReservationError> {
    rows.into_iter().map(StockReservation::try_from).collect()
}

#[async_trait]
impl ReservationStore for PgReservationStore {
    async fn available_stock(&self, target: StockTarget) -> Result<i32, ReservationError> {
        let mut pooled = self.conn().await?;
        read_available(&mut pooled, target).await
    }

    async fn reserve(
        &self,
        reservation: NewStockReservation,
    ) -> Result<StockReservation, ReservationError> {
        let mut pooled = self.conn().await?;
        let conn: &mut AsyncPgConnection = &mut pooled;

        let row = conn
            .transaction::<_, ReservationError, _>(|conn| {
                Box::pin(async move {
                    let target = reservation.target;
                    let quantity = reservation.quantity;

                    let admitted = diesel::update(
                        stock_levels::table
                            .filter(stock_levels::target_kind.eq(target.kind()))
                            .filter(stock_levels::target_id.eq(target.id()))
                            .filter(stock_levels::available_quantity.ge(quantity)),
                    )
                    .set((
                        stock_levels::available_quantity.eq(stock_levels::available_quantity - quantity),
                        stock_levels::reserved_quantity.eq(stock_levels::reserved_quantity + quantity),
                        stock_levels::updated_at.eq(Some(reservation.created_at)),
                    ))
                    .execute(conn)
                    .await?;

                    if admitted == 0 {
                        let available = read_available(conn, target).await?;
                        return Err(ReservationError::InsufficientStock {
                            target,
                            requested: quantity,
                            available,
                        });
                    }

                    let row = diesel::insert_into(stock_reservations::table)
                        .values(&NewDbStockReservation::from(&reservation))
                        .get_result::<DbStockReservation>(conn)
                        .await?;

                    Ok(row)
                })
            })
            .await?;

        row.try_into()
    }

    async fn release(
        &self,
        id: Uuid,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<StockReservation, ReservationError> {
        let mut pooled = self.conn().await?;
        let conn: &mut AsyncPgConnection = &mut pooled;
        let reason = reason.to_string();

        conn.transaction::<_, ReservationError, _>(|conn| {
            Box::pin(async move {
                let released = diesel::update(
                    stock_reservations::table
                        .filter(stock_reservations::id.eq(id))
                        .filter(stock_reservations::status.eq(ReservationStatus::Active.as_str())),
                )
                .set((
                    stock_reservations::status.eq(ReservationStatus::Released.as_str()),
                    stock_reservations::release_reason.eq(Some(reason)),
                    stock_reservations::updated_at.eq(Some(now)),
                ))
                .get_result::<DbStockReservation>(conn)
                .await
                .optional()?;

                let released = match released {
                    Some(row) => StockReservation::try_from(row)?,
                    None => return Err(rejected_transition(conn, id).await),
                };

                adjust_level(conn, released.target, released.quantity, -released.quantity, now).await?;
                Ok(released)
            })
        })
        .await
    }

    async fn complete(
        &self,
        id: Uuid,
        order_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<StockReservation, ReservationError> {
        let mut pooled = self.conn().await?;
        let conn: &mut AsyncPgConnection = &mut pooled;

        conn.transaction::<_, ReservationError, _>(|conn| {
            Box::pin(async move {
                let completed = diesel::update(
                    stock_reservations::table
                        .filter(stock_reservations::id.eq(id))
                        .filter(stock_reservations::status.eq(ReservationStatus::Active.as_str())),
                )
                .set((
                    stock_reservations::status.eq(ReservationStatus::Completed.as_str()),
                    stock_reservations::order_id.eq(Some(order_id)),
                    stock_reservations::updated_at.eq(Some(now)),
                ))
                .get_result::<DbStockReservation>(conn)
                .await
                .optional()?;

                let completed = match completed {
                    Some(row) => StockReservation::try_from(row)?,
                    None => return Err(rejected_transition(conn, id).await),
                };

                adjust_level(conn, completed.target, 0, -completed.quantity, now).await?;
                Ok(completed)
            })
        })
        .await
    }

    async fn expire_due(&self, now: DateTime<Utc>) -> Result<Vec<StockReservation>, ReservationError> {
        let mut pooled = self.conn().await?;
        let conn: &mut AsyncPgConnection = &mut pooled;

        conn.transaction::<_, ReservationError, _>(|conn| {
            Box::pin(async move {
                let rows = diesel::update(
                    stock_reservations::table
                        .filter(stock_reservations::status.eq(ReservationStatus::Active.as_str()))
                        .filter(stock_reservations::expires_at.lt(now)),
                )
                .set((
                    stock_reservations::status.eq(ReservationStatus::Expired.as_str()),
                    stock_reservations::release_reason.eq(Some(EXPIRED_RELEASE_REASON)),
                    stock_reservations::updated_at.eq(Some(now)),
                ))
                .get_results::<DbStockReservation>(conn)
                .await?;

                let expired = into_reservations(rows)?;

                // Restore per target in key order so concurrent sweeps lock rows alike.
                let mut returned: BTreeMap<StockTarget, i32> = BTreeMap::new();
                for reservation in &expired {
                    *returned.entry(reservation.target).or_default() += reservation.quantity;
                }
                for (target, quantity) in returned {
                    adjust_level(conn, target, quantity, -quantity, now).await?;
                }

                Ok(expired)
            })
        })
        .await
    }

    async fn find(&self, id: Uuid) -> Result<Option<StockReservation>, ReservationError> {
        let mut conn = self.conn().await?;
        let row = stock_reservations::table
            .find(id)
            .first::<DbStockReservation>(&mut conn)
            .await
            .optional()?;
        row.map(StockReservation::try_from).transpose()
    }

    async fn find_by_holder(&self, holder: &Holder) -> Result<Vec<StockReservation>, ReservationError> {
        let mut conn = self.conn().await?;
        let rows = match holder {
            Holder::User(user_id) => {
                stock_reservations::table
                    .filter(stock_reservations::user_id.eq(*user_id))
                    .order(stock_reservations::created_at.desc())
                    .load::<DbStockReservation>(&mut conn)
                    .await?
            }
            Holder::Session(session_id) => {
                stock_reservations::table
                    .filter(stock_reservations::session_id.eq(session_id.as_str()))
                    .order(stock_reservations::created_at.desc())
                    .load::<DbStockReservation>(&mut conn)
                    .await?
            }
        };
        into_reservations(rows)
    }

    async fn find_active(&self) -> Result<Vec<StockReservation>, ReservationError> {
        let mut conn = self.conn().await?;
        let rows = stock_reservations::table
            .filter(stock_reservations::status.eq(ReservationStatus::Active.as_str()))
            .order(stock_reservations::expires_at.asc())
            .load::<DbStockReservation>(&mut conn)
            .await?;
        into_reservations(rows)
    }
}
