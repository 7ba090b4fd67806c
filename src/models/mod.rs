pub mod event;
pub mod seat;

pub use event::{EventInfo, EventSummary, NewEvent, SeatLayout};
pub use seat::{SeatHolder, SeatRequest, SeatState, SeatStatus, UnknownSeatStatus};
