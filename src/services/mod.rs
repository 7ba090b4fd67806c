pub mod reservation;
pub mod scheduler;

pub use reservation::{ReservationEngine, SeatSweepOutcome};
pub use scheduler::{EventSweepReport, ReconciliationScheduler, SweepReport};
