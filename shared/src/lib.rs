use serde::{Deserialize, Serialize};
use uuid::Uuid;
use chrono::{DateTime, Utc};
use std::fmt;
use std::str::FromStr;

mod error;

pub use error::ReservationError;

pub const DEFAULT_HOLD_MINUTES: u32 = 15;
pub const DEFAULT_RELEASE_REASON: &str = "cancelled";
pub const EXPIRED_RELEASE_REASON: &str = "expired";
pub const PAYMENT_FAILED_RELEASE_REASON: &str = "payment_failed";

/// What a reservation holds stock against: a base product or one of its variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "TargetRef", try_from = "TargetRef")]
pub enum StockTarget {
    Product(Uuid),
    Variant(Uuid),
}

impl StockTarget {
    pub fn kind(&self) -> &'static str {
        match self {
            StockTarget::Product(_) => "product",
            StockTarget::Variant(_) => "variant",
        }
    }

    pub fn id(&self) -> Uuid {
        match self {
            StockTarget::Product(id) | StockTarget::Variant(id) => *id,
        }
    }

    pub fn product_id(&self) -> Option<Uuid> {
        match self {
            StockTarget::Product(id) => Some(*id),
            StockTarget::Variant(_) => None,
        }
    }

    pub fn variant_id(&self) -> Option<Uuid> {
        match self {
            StockTarget::Variant(id) => Some(*id),
            StockTarget::Product(_) => None,
        }
    }

    pub fn from_columns(
        product_id: Option<Uuid>,
        variant_id: Option<Uuid>,
    ) -> Result<Self, ReservationError> {
        match (product_id, variant_id) {
            (Some(id), None) => Ok(StockTarget::Product(id)),
            (None, Some(id)) => Ok(StockTarget::Variant(id)),
            (Some(_), Some(_)) => Err(ReservationError::invalid(
                "exactly one of product_id or variant_id must be set, got both",
            )),
            (None, None) => Err(ReservationError::invalid(
                "exactly one of product_id or variant_id must be set, got neither",
            )),
        }
    }

    pub fn from_kind(kind: &str, id: Uuid) -> Result<Self, ReservationError> {
        match kind {
            "product" => Ok(StockTarget::Product(id)),
            "variant" => Ok(StockTarget::Variant(id)),
            other => Err(ReservationError::store(format!("unknown stock target kind: {}", other))),
        }
    }
}

impl fmt::Display for StockTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.kind(), self.id())
    }
}

/// Wire shape of a target, as received from callers. Both fields are optional
/// here; converting into [`StockTarget`] enforces that exactly one is set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetRef {
    #[serde(default)]
    pub product_id: Option<Uuid>,
    #[serde(default)]
    pub variant_id: Option<Uuid>,
}

impl TryFrom<TargetRef> for StockTarget {
    type Error = ReservationError;

    fn try_from(value: TargetRef) -> Result<Self, Self::Error> {
        StockTarget::from_columns(value.product_id, value.variant_id)
    }
}

impl From<StockTarget> for TargetRef {
    fn from(target: StockTarget) -> Self {
        Self {
            product_id: target.product_id(),
            variant_id: target.variant_id(),
        }
    }
}

/// Who owns a reservation: an authenticated user or an anonymous cart session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "HolderRef", try_from = "HolderRef")]
pub enum Holder {
    User(Uuid),
    Session(String),
}

impl Holder {
    pub fn user_id(&self) -> Option<Uuid> {
        match self {
            Holder::User(id) => Some(*id),
            Holder::Session(_) => None,
        }
    }

    pub fn session_id(&self) -> Option<&str> {
        match self {
            Holder::Session(id) => Some(id.as_str()),
            Holder::User(_) => None,
        }
    }

    pub fn from_columns(
        user_id: Option<Uuid>,
        session_id: Option<String>,
    ) -> Result<Self, ReservationError> {
        // A blank session token is as good as none.
        let session_id = session_id.filter(|s| !s.trim().is_empty());
        match (user_id, session_id) {
            (Some(id), None) => Ok(Holder::User(id)),
            (None, Some(session)) => Ok(Holder::Session(session)),
            (Some(_), Some(_)) => Err(ReservationError::invalid(
                "exactly one of user_id or session_id must be set, got both",
            )),
            (None, None) => Err(ReservationError::invalid(
                "exactly one of user_id or session_id must be set, got neither",
            )),
        }
    }
}

impl fmt::Display for Holder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Holder::User(id) => write!(f, "user {}", id),
            Holder::Session(id) => write!(f, "session {}", id),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HolderRef {
    #[serde(default)]
    pub user_id: Option<Uuid>,
    #[serde(default)]
    pub session_id: Option<String>,
}

impl TryFrom<HolderRef> for Holder {
    type Error = ReservationError;

    fn try_from(value: HolderRef) -> Result<Self, Self::Error> {
        Holder::from_columns(value.user_id, value.session_id)
    }
}

impl From<Holder> for HolderRef {
    fn from(holder: Holder) -> Self {
        match holder {
            Holder::User(id) => Self { user_id: Some(id), session_id: None },
            Holder::Session(id) => Self { user_id: None, session_id: Some(id) },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReservationStatus {
    Active,
    Completed,
    Released,
    Expired,
}

impl ReservationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReservationStatus::Active => "active",
            ReservationStatus::Completed => "completed",
            ReservationStatus::Released => "released",
            ReservationStatus::Expired => "expired",
        }
    }

    /// `active` is the only state with outgoing transitions.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ReservationStatus::Active)
    }
}

impl fmt::Display for ReservationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReservationStatus {
    type Err = ReservationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(ReservationStatus::Active),
            "completed" => Ok(ReservationStatus::Completed),
            "released" => Ok(ReservationStatus::Released),
            "expired" => Ok(ReservationStatus::Expired),
            other => Err(ReservationError::store(format!("unknown reservation status: {}", other))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StockReservation {
    pub id: Uuid,
    #[serde(flatten)]
    pub target: StockTarget,
    pub quantity: i32,
    #[serde(flatten)]
    pub holder: Holder,
    pub status: ReservationStatus,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub order_id: Option<Uuid>,
    pub release_reason: Option<String>,
}

impl StockReservation {
    pub fn is_active(&self) -> bool {
        self.status == ReservationStatus::Active
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.is_active() && self.expires_at < now
    }
}

/// Everything needed to insert a reservation once the hold has been admitted.
#[derive(Debug, Clone)]
pub struct NewStockReservation {
    pub id: Uuid,
    pub target: StockTarget,
    pub quantity: i32,
    pub holder: Holder,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl NewStockReservation {
    pub fn into_active(self) -> StockReservation {
        StockReservation {
            id: self.id,
            target: self.target,
            quantity: self.quantity,
            holder: self.holder,
            status: ReservationStatus::Active,
            created_at: self.created_at,
            expires_at: self.expires_at,
            order_id: None,
            release_reason: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CartItem {
    pub target: StockTarget,
    pub quantity: i32,
}

impl CartItem {
    pub fn new(target: StockTarget, quantity: i32) -> Self {
        Self { target, quantity }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CartItemRef {
    #[serde(flatten)]
    pub target: TargetRef,
    pub quantity: i32,
}

impl TryFrom<CartItemRef> for CartItem {
    type Error = ReservationError;

    fn try_from(value: CartItemRef) -> Result<Self, Self::Error> {
        Ok(CartItem {
            target: value.target.try_into()?,
            quantity: value.quantity,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnavailableItem {
    #[serde(flatten)]
    pub target: StockTarget,
    pub requested: i32,
    pub available: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvailabilityReport {
    pub available: bool,
    pub unavailable_items: Vec<UnavailableItem>,
}

impl AvailabilityReport {
    pub fn all_available() -> Self {
        Self { available: true, unavailable_items: Vec::new() }
    }
}

/// Outcome of a best-effort bulk release.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseSummary {
    pub released: usize,
    pub failed: Vec<Uuid>,
}

/// Payment gateway notification that drives stock finalization.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum PaymentWebhook {
    PaymentSucceeded {
        order_id: Uuid,
        reservation_ids: Vec<Uuid>,
    },
    PaymentFailed {
        order_id: Uuid,
        reservation_ids: Vec<Uuid>,
    },
}

impl PaymentWebhook {
    pub fn order_id(&self) -> Uuid {
        match self {
            PaymentWebhook::PaymentSucceeded { order_id, .. }
            | PaymentWebhook::PaymentFailed { order_id, .. } => *order_id,
        }
    }
}
