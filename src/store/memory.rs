//! Хранилища в памяти процесса для тестов и локального запуска без
//! PostgreSQL и Redis. Семантика совпадает с боевыми реализациями: условные
//! переходы статусов и SET NX с TTL выполняются атомарно под одним мьютексом.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use uuid::Uuid;

use super::{ReservationLock, SeatStore};
use crate::error::StoreError;
use crate::models::{EventInfo, EventSummary, NewEvent, SeatHolder, SeatState, SeatStatus};

#[derive(Debug, Clone)]
struct SeatRow {
    status: SeatStatus,
    user_id: String,
    reserved_at: Option<Instant>,
}

#[derive(Debug, Clone)]
struct EventEntry {
    summary: EventSummary,
    seats: BTreeMap<i32, SeatRow>,
}

/// Клоны разделяют одно и то же состояние.
#[derive(Clone, Default)]
pub struct InMemorySeatStore {
    events: Arc<Mutex<HashMap<Uuid, EventEntry>>>,
    unavailable: Arc<AtomicBool>,
}

impl InMemorySeatStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Все последующие вызовы падают, как при недоступной БД.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Статус и владелец места, если оно существует.
    pub fn seat_snapshot(&self, event_id: Uuid, seat_number: i32) -> Option<(SeatStatus, String)> {
        let events = self.events.lock();
        let seat = events.get(&event_id)?.seats.get(&seat_number)?;
        Some((seat.status, seat.user_id.clone()))
    }

    async fn io(&self) -> Result<(), StoreError> {
        tokio::task::yield_now().await;
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Database(sqlx::Error::PoolTimedOut));
        }
        Ok(())
    }
}

#[async_trait]
impl SeatStore for InMemorySeatStore {
    async fn create_event(
        &self,
        event_id: Uuid,
        event: &NewEvent,
        total_seats: i32,
        seat_numbers: &[i32],
    ) -> Result<(), StoreError> {
        self.io().await?;
        if seat_numbers.len() != total_seats as usize {
            return Err(StoreError::Invalid("seat count mismatch".to_string()));
        }

        let mut seats = BTreeMap::new();
        for &number in seat_numbers {
            let row = SeatRow {
                status: SeatStatus::Free,
                user_id: String::new(),
                reserved_at: None,
            };
            if seats.insert(number, row).is_some() {
                return Err(StoreError::Invalid(format!("duplicate seat number {number}")));
            }
        }

        let mut events = self.events.lock();
        if events.contains_key(&event_id) {
            return Err(StoreError::Invalid(format!("event {event_id} already exists")));
        }
        events.insert(
            event_id,
            EventEntry {
                summary: EventSummary {
                    id: event_id,
                    title: event.title.clone(),
                    date: event.date,
                    total_seats,
                    first_seat: seat_numbers.iter().copied().min().unwrap_or(1),
                },
                seats,
            },
        );
        Ok(())
    }

    async fn get_seat_status(&self, event_id: Uuid, seat_number: i32) -> Result<SeatStatus, StoreError> {
        self.io().await?;
        self.seat_snapshot(event_id, seat_number)
            .map(|(status, _)| status)
            .ok_or_else(|| StoreError::NotFound(format!("seat {seat_number}")))
    }

    async fn get_seat_holder(&self, event_id: Uuid, seat_number: i32) -> Result<SeatHolder, StoreError> {
        self.io().await?;
        self.seat_snapshot(event_id, seat_number)
            .map(|(status, user_id)| SeatHolder { status, user_id })
            .ok_or_else(|| StoreError::NotFound(format!("seat {seat_number}")))
    }

    async fn mark_reserving(&self, event_id: Uuid, seat_number: i32, user_id: &str) -> Result<bool, StoreError> {
        self.io().await?;
        let mut events = self.events.lock();
        let Some(seat) = events
            .get_mut(&event_id)
            .and_then(|e| e.seats.get_mut(&seat_number))
        else {
            return Ok(false);
        };
        if seat.status != SeatStatus::Free {
            return Ok(false);
        }
        seat.status = SeatStatus::Reserving;
        seat.user_id = user_id.to_string();
        seat.reserved_at = Some(Instant::now());
        Ok(true)
    }

    async fn confirm_booking(&self, event_id: Uuid, seat_number: i32, user_id: &str) -> Result<bool, StoreError> {
        self.io().await?;
        let mut events = self.events.lock();
        let Some(seat) = events
            .get_mut(&event_id)
            .and_then(|e| e.seats.get_mut(&seat_number))
        else {
            return Ok(false);
        };
        if seat.status != SeatStatus::Reserving || seat.user_id != user_id {
            return Ok(false);
        }
        seat.status = SeatStatus::Booked;
        Ok(true)
    }

    async fn free_seat(&self, event_id: Uuid, seat_number: i32, held_for: Duration) -> Result<bool, StoreError> {
        self.io().await?;
        let mut events = self.events.lock();
        let Some(seat) = events
            .get_mut(&event_id)
            .and_then(|e| e.seats.get_mut(&seat_number))
        else {
            return Ok(false);
        };
        let expired = seat
            .reserved_at
            .map_or(true, |at| at.elapsed() >= held_for);
        if seat.status != SeatStatus::Reserving || !expired {
            return Ok(false);
        }
        seat.status = SeatStatus::Free;
        seat.user_id.clear();
        seat.reserved_at = None;
        Ok(true)
    }

    async fn list_events(&self) -> Result<Vec<EventSummary>, StoreError> {
        self.io().await?;
        let mut events: Vec<EventSummary> = self
            .events
            .lock()
            .values()
            .map(|e| e.summary.clone())
            .collect();
        events.sort_by_key(|e| e.date);
        Ok(events)
    }

    async fn get_event_info(&self, event_id: Uuid) -> Result<EventInfo, StoreError> {
        self.io().await?;
        let events = self.events.lock();
        let entry = events
            .get(&event_id)
            .ok_or_else(|| StoreError::NotFound(format!("event {event_id}")))?;

        Ok(EventInfo {
            id: entry.summary.id,
            title: entry.summary.title.clone(),
            date: entry.summary.date,
            total_seats: entry.summary.total_seats,
            seats: entry
                .seats
                .iter()
                .map(|(&seat_number, row)| SeatState {
                    seat_number,
                    status: row.status,
                })
                .collect(),
        })
    }
}

/// Блокировки с TTL в памяти. Просроченный ключ считается отсутствующим.
#[derive(Clone, Default)]
pub struct InMemoryReservationLock {
    entries: Arc<Mutex<HashMap<String, (String, Instant)>>>,
    unavailable: Arc<AtomicBool>,
}

impl InMemoryReservationLock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Теряет все ключи разом, как после FLUSHALL или рестарта Redis.
    pub fn flush(&self) {
        self.entries.lock().clear();
    }

    async fn io(&self) -> Result<(), StoreError> {
        tokio::task::yield_now().await;
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Redis(redis::RedisError::from((
                redis::ErrorKind::IoError,
                "lock store unavailable",
            ))));
        }
        Ok(())
    }

    fn live_owner(entries: &mut HashMap<String, (String, Instant)>, key: &str) -> Option<String> {
        match entries.get(key) {
            Some((owner, expires_at)) if *expires_at > Instant::now() => Some(owner.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }
}

#[async_trait]
impl ReservationLock for InMemoryReservationLock {
    async fn try_acquire(&self, key: &str, owner_id: &str, ttl: Duration) -> Result<bool, StoreError> {
        self.io().await?;
        let mut entries = self.entries.lock();
        if Self::live_owner(&mut entries, key).is_some() {
            return Ok(false);
        }
        entries.insert(key.to_string(), (owner_id.to_string(), Instant::now() + ttl));
        Ok(true)
    }

    async fn check_owner(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.io().await?;
        Ok(Self::live_owner(&mut self.entries.lock(), key))
    }

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        self.io().await?;
        Ok(Self::live_owner(&mut self.entries.lock(), key).is_some())
    }

    async fn release(&self, key: &str) -> Result<(), StoreError> {
        self.io().await?;
        self.entries.lock().remove(key);
        Ok(())
    }
}
