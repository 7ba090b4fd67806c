use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use validator::Validate;

/// Статус места в БД. Единственный источник правды о занятости.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SeatStatus {
    Free,
    Reserving,
    Booked,
}

impl SeatStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SeatStatus::Free => "free",
            SeatStatus::Reserving => "reserving",
            SeatStatus::Booked => "booked",
        }
    }
}

impl fmt::Display for SeatStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
#[error("unknown seat status {0:?}")]
pub struct UnknownSeatStatus(pub String);

impl FromStr for SeatStatus {
    type Err = UnknownSeatStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "free" => Ok(SeatStatus::Free),
            "reserving" => Ok(SeatStatus::Reserving),
            "booked" => Ok(SeatStatus::Booked),
            other => Err(UnknownSeatStatus(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeatState {
    pub seat_number: i32,
    pub status: SeatStatus,
}

/// Статус места вместе с тем, за кем оно числится в БД.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeatHolder {
    pub status: SeatStatus,
    /// Пустая строка для свободного места.
    pub user_id: String,
}

/// Тело запросов на бронь и на подтверждение оплаты.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct SeatRequest {
    #[validate(range(min = 1, message = "seat_number must be greater than 0"))]
    pub seat_number: i32,
    #[validate(length(min = 1, max = 128, message = "user_id is required"))]
    pub user_id: String,
}

impl SeatRequest {
    pub fn new(seat_number: i32, user_id: impl Into<String>) -> Self {
        Self {
            seat_number,
            user_id: user_id.into(),
        }
    }
}
