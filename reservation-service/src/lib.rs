pub mod api;
pub mod availability;
pub mod clock;
pub mod engine;
pub mod models;
pub mod schema;
pub mod store;
pub mod sweeper;

pub use availability::AvailabilityChecker;
pub use clock::{Clock, ManualClock, SystemClock};
pub use engine::{CheckoutOutcome, ReservationEngine};
pub use store::{InMemoryReservationStore, PgReservationStore, ReservationStore};
pub use sweeper::ExpirySweeper;
