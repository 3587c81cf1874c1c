use shared::ReservationError;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{self, MissedTickBehavior};
use tracing::{error, info};

use crate::engine::ReservationEngine;

/// Background task that reclaims holds whose window elapsed without checkout.
pub struct ExpirySweeper {
    engine: Arc<ReservationEngine>,
    interval: Duration,
}

impl ExpirySweeper {
    pub fn new(engine: Arc<ReservationEngine>, interval: Duration) -> Self {
        Self { engine, interval }
    }

    pub async fn run(&self) {
        let mut interval = time::interval(self.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            interval.tick().await;

            if let Err(e) = self.sweep_once().await {
                error!("Error expiring reservations: {}", e);
            }
        }
    }

    pub async fn sweep_once(&self) -> Result<usize, ReservationError> {
        let expired = self.engine.cleanup_expired_reservations().await?;
        if expired > 0 {
            info!("Expired {} stale reservation(s)", expired);
        }
        Ok(expired)
    }
}
