use thiserror::Error;
use uuid::Uuid;

use crate::{ReservationStatus, StockTarget};

#[derive(Debug, Clone, Error)]
pub enum ReservationError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("insufficient stock for {target}: requested {requested}, available {available}")]
    InsufficientStock {
        target: StockTarget,
        requested: i32,
        available: i32,
    },

    #[error("reservation {0} not found")]
    NotFound(Uuid),

    #[error("reservation {id} is already {status}")]
    InvalidStateTransition { id: Uuid, status: ReservationStatus },

    #[error("store failure: {0}")]
    StoreFailure(String),
}

impl ReservationError {
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidArgument(message.into())
    }

    pub fn store(err: impl std::fmt::Display) -> Self {
        Self::StoreFailure(err.to_string())
    }

    /// Stable tag for callers that branch on the failure class.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidArgument(_) => "invalid_argument",
            Self::InsufficientStock { .. } => "insufficient_stock",
            Self::NotFound(_) => "not_found",
            Self::InvalidStateTransition { .. } => "invalid_state_transition",
            Self::StoreFailure(_) => "store_failure",
        }
    }

    /// Message safe to show to a shopper. Store failures never expose detail.
    pub fn public_message(&self) -> String {
        match self {
            Self::InvalidArgument(message) => format!("Invalid request: {}", message),
            Self::InsufficientStock { available, .. } => {
                format!("Not enough stock: only {} available", available)
            }
            Self::NotFound(_) => "Reservation not found".to_string(),
            Self::InvalidStateTransition { status, .. } => {
                format!("Reservation is already {}", status)
            }
            Self::StoreFailure(_) => "Temporary error, please try again".to_string(),
        }
    }

    pub fn is_insufficient_stock(&self) -> bool {
        matches!(self, Self::InsufficientStock { .. })
    }
}

impl From<diesel::result::Error> for ReservationError {
    fn from(err: diesel::result::Error) -> Self {
        Self::StoreFailure(err.to_string())
    }
}
