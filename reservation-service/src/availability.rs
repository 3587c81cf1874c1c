use futures::future::try_join_all;
use shared::*;
use std::sync::Arc;

use crate::store::ReservationStore;

/// Read-only view of the ledger used to pre-validate carts.
///
/// Nothing is locked, so an answer can be stale by the time the shopper
/// reserves. The authoritative check happens inside `reserve`.
#[derive(Clone)]
pub struct AvailabilityChecker {
    store: Arc<dyn ReservationStore>,
}

impl AvailabilityChecker {
    pub fn new(store: Arc<dyn ReservationStore>) -> Self {
        Self { store }
    }

    pub async fn get_available_stock(&self, target: StockTarget) -> Result<i32, ReservationError> {
        Ok(self.store.available_stock(target).await?.max(0))
    }

    /// Each item is checked on its own; repeated targets are not summed.
    /// A zero quantity is always satisfiable. Negative quantities are rejected
    /// before any read.
    pub async fn check_stock_availability(
        &self,
        items: &[CartItem],
    ) -> Result<AvailabilityReport, ReservationError> {
        if items.is_empty() {
            return Ok(AvailabilityReport::all_available());
        }
        if let Some(item) = items.iter().find(|item| item.quantity < 0) {
            return Err(ReservationError::invalid(format!(
                "quantity for {} must not be negative, got {}",
                item.target, item.quantity
            )));
        }

        let levels = try_join_all(items.iter().map(|item| self.get_available_stock(item.target))).await?;

        let unavailable_items: Vec<UnavailableItem> = items
            .iter()
            .zip(levels)
            .filter(|(item, available)| item.quantity > *available)
            .map(|(item, available)| UnavailableItem {
                target: item.target,
                requested: item.quantity,
                available,
            })
            .collect();

        Ok(AvailabilityReport {
            available: unavailable_items.is_empty(),
            unavailable_items,
        })
    }
}
