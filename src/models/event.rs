use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;
use validator::Validate;

use super::seat::SeatState;

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct NewEvent {
    #[validate(length(min = 1, max = 200, message = "title is required"))]
    pub title: String,
    pub date: DateTime<Utc>,
}

/// Схема зала: места нумеруются подряд, ряд за рядом.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct SeatLayout {
    #[validate(range(min = 1, max = 1000))]
    pub rows: i32,
    #[validate(range(min = 1, max = 1000))]
    pub seats_per_row: i32,
    #[validate(range(min = 1, max = 1_000_000))]
    pub start_number: i32,
}

impl SeatLayout {
    pub fn total_seats(&self) -> i32 {
        self.rows * self.seats_per_row
    }

    pub fn seat_numbers(&self) -> Vec<i32> {
        let mut seats = Vec::with_capacity(self.total_seats().max(0) as usize);
        for r in 0..self.rows {
            let row_start = self.start_number + r * self.seats_per_row;
            for s in 0..self.seats_per_row {
                seats.push(row_start + s);
            }
        }
        seats
    }
}

#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct EventSummary {
    pub id: Uuid,
    pub title: String,
    pub date: DateTime<Utc>,
    pub total_seats: i32,
    pub first_seat: i32,
}

impl EventSummary {
    /// Номера всех мест мероприятия, по которым идёт сверка.
    pub fn seat_numbers(&self) -> std::ops::Range<i32> {
        self.first_seat..self.first_seat + self.total_seats
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventInfo {
    pub id: Uuid,
    pub title: String,
    pub date: DateTime<Utc>,
    pub total_seats: i32,
    pub seats: Vec<SeatState>,
}
