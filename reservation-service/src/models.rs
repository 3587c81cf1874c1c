use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use chrono::{DateTime, Utc};
use shared::*;

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = crate::schema::stock_levels)]
pub struct NewStockLevel {
    pub target_kind: String,
    pub target_id: Uuid,
    pub available_quantity: i32,
    pub reserved_quantity: i32,
}

impl NewStockLevel {
    pub fn new(target: StockTarget, available_quantity: i32) -> Self {
        Self {
            target_kind: target.kind().to_string(),
            target_id: target.id(),
            available_quantity,
            reserved_quantity: 0,
        }
    }
}

#[derive(Debug, Clone, Queryable, Selectable, Serialize, Deserialize)]
#[diesel(table_name = crate::schema::stock_reservations)]
pub struct DbStockReservation {
    pub id: Uuid,
    pub product_id: Option<Uuid>,
    pub variant_id: Option<Uuid>,
    pub quantity: i32,
    pub user_id: Option<Uuid>,
    pub session_id: Option<String>,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub order_id: Option<Uuid>,
    pub release_reason: Option<String>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = crate::schema::stock_reservations)]
pub struct NewDbStockReservation {
    pub id: Uuid,
    pub product_id: Option<Uuid>,
    pub variant_id: Option<Uuid>,
    pub quantity: i32,
    pub user_id: Option<Uuid>,
    pub session_id: Option<String>,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl From<&NewStockReservation> for NewDbStockReservation {
    fn from(new: &NewStockReservation) -> Self {
        Self {
            id: new.id,
            product_id: new.target.product_id(),
            variant_id: new.target.variant_id(),
            quantity: new.quantity,
            user_id: new.holder.user_id(),
            session_id: new.holder.session_id().map(str::to_string),
            status: ReservationStatus::Active.as_str().to_string(),
            created_at: new.created_at,
            expires_at: new.expires_at,
        }
    }
}

impl TryFrom<DbStockReservation> for StockReservation {
    type Error = ReservationError;

    fn try_from(row: DbStockReservation) -> Result<Self, Self::Error> {
        // Rows violating the XOR constraints are corrupt, not caller mistakes.
        let target = StockTarget::from_columns(row.product_id, row.variant_id)
            .map_err(|e| ReservationError::store(format!("reservation {}: {}", row.id, e)))?;
        let holder = Holder::from_columns(row.user_id, row.session_id)
            .map_err(|e| ReservationError::store(format!("reservation {}: {}", row.id, e)))?;

        Ok(Self {
            id: row.id,
            target,
            quantity: row.quantity,
            holder,
            status: row.status.parse()?,
            created_at: row.created_at,
            expires_at: row.expires_at,
            order_id: row.order_id,
            release_reason: row.release_reason,
        })
    }
}
