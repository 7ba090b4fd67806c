//! Хранилища, с которыми работает движок бронирования.
//!
//! [`SeatStore`] - долговременное и авторитетное состояние мест (PostgreSQL).
//! [`ReservationLock`] - короткоживущая рекомендательная блокировка с TTL
//! (Redis), которая лишь отсекает конкурентов до похода в БД.

pub mod memory;
pub mod postgres;
pub mod redis_lock;

use async_trait::async_trait;
use std::time::Duration;
use uuid::Uuid;

use crate::error::StoreError;
use crate::models::{EventInfo, EventSummary, NewEvent, SeatHolder, SeatStatus};

pub use memory::{InMemoryReservationLock, InMemorySeatStore};
pub use postgres::PgSeatStore;
pub use redis_lock::RedisReservationLock;

/// Ключ блокировки одного места мероприятия.
pub fn seat_lock_key(event_id: Uuid, seat_number: i32) -> String {
    format!("seat_lock:{}:{}", event_id, seat_number)
}

#[async_trait]
pub trait SeatStore: Send + Sync {
    /// Мероприятие и все его места создаются одной транзакцией.
    async fn create_event(
        &self,
        event_id: Uuid,
        event: &NewEvent,
        total_seats: i32,
        seat_numbers: &[i32],
    ) -> Result<(), StoreError>;

    async fn get_seat_status(&self, event_id: Uuid, seat_number: i32) -> Result<SeatStatus, StoreError>;

    /// Статус и владелец места одним чтением.
    async fn get_seat_holder(&self, event_id: Uuid, seat_number: i32) -> Result<SeatHolder, StoreError>;

    /// free -> reserving. `false`, если место уже не свободно.
    async fn mark_reserving(&self, event_id: Uuid, seat_number: i32, user_id: &str) -> Result<bool, StoreError>;

    /// reserving -> booked, только для владельца брони.
    async fn confirm_booking(&self, event_id: Uuid, seat_number: i32, user_id: &str) -> Result<bool, StoreError>;

    /// reserving -> free для броней старше `held_for`.
    async fn free_seat(&self, event_id: Uuid, seat_number: i32, held_for: Duration) -> Result<bool, StoreError>;

    async fn list_events(&self) -> Result<Vec<EventSummary>, StoreError>;

    async fn get_event_info(&self, event_id: Uuid) -> Result<EventInfo, StoreError>;
}

#[async_trait]
pub trait ReservationLock: Send + Sync {
    /// Атомарный SET NX с TTL. `false` - ключ уже занят.
    async fn try_acquire(&self, key: &str, owner_id: &str, ttl: Duration) -> Result<bool, StoreError>;

    async fn check_owner(&self, key: &str) -> Result<Option<String>, StoreError>;

    async fn exists(&self, key: &str) -> Result<bool, StoreError>;

    /// Удаление отсутствующего ключа ошибкой не считается.
    async fn release(&self, key: &str) -> Result<(), StoreError>;
}
