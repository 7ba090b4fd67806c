//! reservation.rs
//!
//! Движок бронирования мест. Защита от двойной продажи двухуровневая:
//!
//! 1.  **Блокировка в Redis** (SET NX с TTL) - дешёвый быстрый отказ для
//!     конкурентов, пока первый пользователь держит место. Не источник правды:
//!     ключ может пропасть раньше времени.
//! 2.  **Условный UPDATE в БД** - единственный авторитетный переход статуса
//!     места. Срабатывает даже если блокировку обошли.
//!
//! Пока место в статусе `reserving`, его бронь живёт ровно столько, сколько
//! живёт ключ в Redis. Просроченные брони возвращает в `free` сверка
//! (см. [`crate::services::scheduler`]).

use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use uuid::Uuid;
use validator::Validate;

use crate::error::BookingError;
use crate::models::{EventInfo, EventSummary, NewEvent, SeatLayout, SeatRequest, SeatStatus};
use crate::store::{seat_lock_key, ReservationLock, SeatStore};

/// Чем закончилась сверка одного места.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeatSweepOutcome {
    /// Ключ в Redis ещё жив - бронь действует.
    HoldLive,
    /// Ключа нет, место было в `reserving` и освобождено.
    Freed,
    /// Ключа нет, но место свободно, уже выкуплено или бронь слишком свежая.
    Untouched,
}

/// Порог свежести брони для сверки по умолчанию.
pub const DEFAULT_FRESH_HOLD_GRACE: Duration = Duration::from_secs(5);

#[derive(Clone)]
pub struct ReservationEngine {
    seats: Arc<dyn SeatStore>,
    locks: Arc<dyn ReservationLock>,
    hold_ttl: Duration,
    fresh_hold_grace: Duration,
}

/// Захваченная блокировка места. Если guard не разоружён, ключ удаляется:
/// явно через [`HoldGuard::release`] или в фоне при drop (например, когда
/// future запроса отменили посреди бронирования).
struct HoldGuard {
    locks: Arc<dyn ReservationLock>,
    key: String,
    armed: bool,
}

impl HoldGuard {
    fn new(locks: Arc<dyn ReservationLock>, key: String) -> Self {
        Self { locks, key, armed: true }
    }

    /// Блокировка переходит во владение брони в статусе `reserving`.
    fn disarm(mut self) {
        self.armed = false;
    }

    async fn release(mut self) {
        self.armed = false;
        // Не перезаписываем исходную ошибку, только логируем
        if let Err(e) = self.locks.release(&self.key).await {
            error!(key = %self.key, error = %e, "failed to release seat lock");
        }
    }
}

impl Drop for HoldGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let locks = self.locks.clone();
        let key = std::mem::take(&mut self.key);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = locks.release(&key).await {
                        error!(key = %key, error = %e, "failed to release abandoned seat lock");
                    }
                });
            }
            Err(_) => warn!(key = %key, "no runtime to release abandoned seat lock, leaving it to expire"),
        }
    }
}

impl ReservationEngine {
    pub fn new(seats: Arc<dyn SeatStore>, locks: Arc<dyn ReservationLock>, hold_ttl: Duration) -> Self {
        Self {
            seats,
            locks,
            hold_ttl,
            fresh_hold_grace: DEFAULT_FRESH_HOLD_GRACE.min(hold_ttl),
        }
    }

    /// Сверка не освобождает брони моложе `grace`, даже если ключа уже нет.
    pub fn with_fresh_hold_grace(mut self, grace: Duration) -> Self {
        self.fresh_hold_grace = grace;
        self
    }

    pub fn hold_ttl(&self) -> Duration {
        self.hold_ttl
    }

    /// Создаёт мероприятие и все места по схеме зала.
    pub async fn create_event(&self, event: NewEvent, layout: SeatLayout) -> Result<Uuid, BookingError> {
        event.validate()?;
        layout.validate()?;

        let event_id = Uuid::new_v4();
        let seat_numbers = layout.seat_numbers();
        self.seats
            .create_event(event_id, &event, layout.total_seats(), &seat_numbers)
            .await?;

        info!(
            event_id = %event_id,
            title = %event.title,
            date = %event.date,
            total_seats = layout.total_seats(),
            "event created"
        );
        Ok(event_id)
    }

    /// Ставит место в `reserving` за пользователем на время TTL брони.
    pub async fn try_reserve_seat(&self, event_id: Uuid, seat: &SeatRequest) -> Result<(), BookingError> {
        seat.validate()?;
        let key = seat_lock_key(event_id, seat.seat_number);

        // Быстрый отказ: в БД не ходим, если место уже кто-то держит
        let acquired = self
            .locks
            .try_acquire(&key, &seat.user_id, self.hold_ttl)
            .await
            .map_err(BookingError::StoreUnavailable)?;
        if !acquired {
            return Err(BookingError::Contention);
        }

        let guard = HoldGuard::new(self.locks.clone(), key);
        match self.claim_seat(event_id, seat).await {
            Ok(()) => {
                guard.disarm();
                info!(
                    event_id = %event_id,
                    seat_number = seat.seat_number,
                    user_id = %seat.user_id,
                    "seat reserved"
                );
                Ok(())
            }
            Err(e) => {
                guard.release().await;
                warn!(
                    event_id = %event_id,
                    seat_number = seat.seat_number,
                    error = %e,
                    "seat reservation rejected"
                );
                Err(e)
            }
        }
    }

    async fn claim_seat(&self, event_id: Uuid, seat: &SeatRequest) -> Result<(), BookingError> {
        let status = self.seats.get_seat_status(event_id, seat.seat_number).await?;
        if status != SeatStatus::Free {
            return Err(BookingError::StaleState("seat already booked".to_string()));
        }

        // Проигрыш здесь - гонка с тем, кто обошёл блокировку, или устаревшее чтение
        let reserved = self
            .seats
            .mark_reserving(event_id, seat.seat_number, &seat.user_id)
            .await?;
        if !reserved {
            return Err(BookingError::StaleState("failed to reserve seat in DB".to_string()));
        }
        Ok(())
    }

    /// Финальное подтверждение после оплаты: `reserving` -> `booked`.
    pub async fn confirm_seat_booking(
        &self,
        event_id: Uuid,
        seat_number: i32,
        user_id: &str,
    ) -> Result<(), BookingError> {
        SeatRequest::new(seat_number, user_id).validate()?;
        let key = seat_lock_key(event_id, seat_number);

        let owner = self.locks.check_owner(&key).await?;
        if owner.as_deref() != Some(user_id) {
            // Повторное подтверждение своего выкупленного места - конфликт, а не просрочка
            if owner.is_none() {
                let holder = self.seats.get_seat_holder(event_id, seat_number).await?;
                if holder.status == SeatStatus::Booked && holder.user_id == user_id {
                    return Err(BookingError::StaleState("seat already booked".to_string()));
                }
            }
            warn!(
                event_id = %event_id,
                seat_number,
                user_id = %user_id,
                "reservation expired or belongs to another user"
            );
            return Err(BookingError::ExpiredOrForeign);
        }

        if !self.seats.confirm_booking(event_id, seat_number, user_id).await? {
            warn!(
                event_id = %event_id,
                seat_number,
                "seat lock matched but durable reservation is gone"
            );
            return Err(BookingError::ExpiredOrForeign);
        }

        // Место выкуплено в БД, держать блокировку больше незачем
        if let Err(e) = self.locks.release(&key).await {
            error!(key = %key, error = %e, "failed to release seat lock after confirmation");
        }

        info!(event_id = %event_id, seat_number, user_id = %user_id, "booking confirmed");
        Ok(())
    }

    /// Освобождает место, если его бронь в Redis истекла, а в БД оно
    /// всё ещё `reserving`.
    pub async fn cleanup_expired_reservation(
        &self,
        event_id: Uuid,
        seat_number: i32,
    ) -> Result<SeatSweepOutcome, BookingError> {
        let key = seat_lock_key(event_id, seat_number);
        if self.locks.exists(&key).await? {
            return Ok(SeatSweepOutcome::HoldLive);
        }

        // Статус и возраст брони проверяются внутри UPDATE: выкупленное или
        // только что занятое за это время место не тронем
        let freed = self
            .seats
            .free_seat(event_id, seat_number, self.fresh_hold_grace)
            .await?;
        if freed {
            info!(event_id = %event_id, seat_number, "freed expired seat");
            Ok(SeatSweepOutcome::Freed)
        } else {
            Ok(SeatSweepOutcome::Untouched)
        }
    }

    pub async fn get_event_info(&self, event_id: Uuid) -> Result<EventInfo, BookingError> {
        Ok(self.seats.get_event_info(event_id).await?)
    }

    pub async fn get_all_events(&self) -> Result<Vec<EventSummary>, BookingError> {
        Ok(self.seats.list_events().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SeatHolder;
    use crate::store::{InMemoryReservationLock, InMemorySeatStore};
    use async_trait::async_trait;
    use chrono::Utc;

    use crate::error::StoreError;

    const TTL: Duration = Duration::from_secs(300);

    /// Обёртка над хранилищем в памяти, у которой чтение статуса места
    /// задерживается на `stall` или, при `None`, не завершается никогда.
    struct StallingSeatStore {
        inner: InMemorySeatStore,
        stall: Option<Duration>,
    }

    #[async_trait]
    impl SeatStore for StallingSeatStore {
        async fn create_event(
            &self,
            event_id: Uuid,
            event: &NewEvent,
            total_seats: i32,
            seat_numbers: &[i32],
        ) -> Result<(), StoreError> {
            self.inner.create_event(event_id, event, total_seats, seat_numbers).await
        }

        async fn get_seat_status(&self, event_id: Uuid, seat_number: i32) -> Result<SeatStatus, StoreError> {
            match self.stall {
                Some(delay) => tokio::time::sleep(delay).await,
                None => std::future::pending::<()>().await,
            }
            self.inner.get_seat_status(event_id, seat_number).await
        }

        async fn get_seat_holder(&self, event_id: Uuid, seat_number: i32) -> Result<SeatHolder, StoreError> {
            self.inner.get_seat_holder(event_id, seat_number).await
        }

        async fn mark_reserving(&self, event_id: Uuid, seat_number: i32, user_id: &str) -> Result<bool, StoreError> {
            self.inner.mark_reserving(event_id, seat_number, user_id).await
        }

        async fn confirm_booking(&self, event_id: Uuid, seat_number: i32, user_id: &str) -> Result<bool, StoreError> {
            self.inner.confirm_booking(event_id, seat_number, user_id).await
        }

        async fn free_seat(&self, event_id: Uuid, seat_number: i32, held_for: Duration) -> Result<bool, StoreError> {
            self.inner.free_seat(event_id, seat_number, held_for).await
        }

        async fn list_events(&self) -> Result<Vec<EventSummary>, StoreError> {
            self.inner.list_events().await
        }

        async fn get_event_info(&self, event_id: Uuid) -> Result<EventInfo, StoreError> {
            self.inner.get_event_info(event_id).await
        }
    }

    async fn create_event(engine: &ReservationEngine, total: i32) -> Uuid {
        engine
            .create_event(
                NewEvent { title: "Opera".to_string(), date: Utc::now() },
                SeatLayout { rows: 1, seats_per_row: total, start_number: 1 },
            )
            .await
            .unwrap()
    }

    fn stalling_engine(stall: Option<Duration>) -> (ReservationEngine, InMemorySeatStore, InMemoryReservationLock) {
        let seats = InMemorySeatStore::new();
        let locks = InMemoryReservationLock::new();
        let store = StallingSeatStore { inner: seats.clone(), stall };
        let engine = ReservationEngine::new(Arc::new(store), Arc::new(locks.clone()), TTL);
        (engine, seats, locks)
    }

    struct Fixture {
        engine: ReservationEngine,
        seats: InMemorySeatStore,
        locks: InMemoryReservationLock,
        event_id: Uuid,
    }

    async fn fixture(total: i32) -> Fixture {
        let seats = InMemorySeatStore::new();
        let locks = InMemoryReservationLock::new();
        let engine = ReservationEngine::new(Arc::new(seats.clone()), Arc::new(locks.clone()), TTL);
        let event_id = create_event(&engine, total).await;
        Fixture { engine, seats, locks, event_id }
    }

    #[tokio::test]
    async fn reserve_then_confirm_books_the_seat() {
        let f = fixture(20).await;

        f.engine.try_reserve_seat(f.event_id, &SeatRequest::new(12, "alice")).await.unwrap();
        assert_eq!(
            f.seats.seat_snapshot(f.event_id, 12),
            Some((SeatStatus::Reserving, "alice".to_string()))
        );

        let contender = f.engine.try_reserve_seat(f.event_id, &SeatRequest::new(12, "bob")).await;
        assert!(matches!(contender, Err(BookingError::Contention)));

        f.engine.confirm_seat_booking(f.event_id, 12, "alice").await.unwrap();
        assert_eq!(f.seats.seat_snapshot(f.event_id, 12).unwrap().0, SeatStatus::Booked);

        let key = seat_lock_key(f.event_id, 12);
        assert!(!f.locks.exists(&key).await.unwrap());

        let outcome = f.engine.cleanup_expired_reservation(f.event_id, 12).await.unwrap();
        assert_eq!(outcome, SeatSweepOutcome::Untouched);
        assert_eq!(f.seats.seat_snapshot(f.event_id, 12).unwrap().0, SeatStatus::Booked);
    }

    #[tokio::test]
    async fn failed_reservation_releases_the_lock() {
        let f = fixture(5).await;

        // Обходим блокировку и занимаем место напрямую в БД
        assert!(f.seats.mark_reserving(f.event_id, 3, "mallory").await.unwrap());

        let err = f
            .engine
            .try_reserve_seat(f.event_id, &SeatRequest::new(3, "alice"))
            .await
            .unwrap_err();
        assert!(matches!(err, BookingError::StaleState(ref m) if m == "seat already booked"));
        assert!(!f.locks.exists(&seat_lock_key(f.event_id, 3)).await.unwrap());
    }

    #[tokio::test]
    async fn unknown_seat_is_not_found_and_unlocked() {
        let f = fixture(5).await;

        let err = f
            .engine
            .try_reserve_seat(f.event_id, &SeatRequest::new(99, "alice"))
            .await
            .unwrap_err();
        assert!(matches!(err, BookingError::NotFound(_)));
        assert!(!f.locks.exists(&seat_lock_key(f.event_id, 99)).await.unwrap());
    }

    #[tokio::test]
    async fn database_outage_after_lock_releases_the_lock() {
        let f = fixture(5).await;
        f.seats.set_unavailable(true);

        let err = f
            .engine
            .try_reserve_seat(f.event_id, &SeatRequest::new(1, "alice"))
            .await
            .unwrap_err();
        assert!(matches!(err, BookingError::StoreUnavailable(_)));
        assert!(!f.locks.exists(&seat_lock_key(f.event_id, 1)).await.unwrap());

        f.seats.set_unavailable(false);
        f.engine.try_reserve_seat(f.event_id, &SeatRequest::new(1, "alice")).await.unwrap();
    }

    #[tokio::test]
    async fn lock_store_outage_never_touches_the_database() {
        let f = fixture(5).await;
        f.locks.set_unavailable(true);

        let err = f
            .engine
            .try_reserve_seat(f.event_id, &SeatRequest::new(2, "alice"))
            .await
            .unwrap_err();
        assert!(matches!(err, BookingError::StoreUnavailable(_)));
        assert_eq!(f.seats.seat_snapshot(f.event_id, 2).unwrap().0, SeatStatus::Free);
    }

    #[tokio::test]
    async fn invalid_requests_are_rejected_before_locking() {
        let f = fixture(5).await;

        let err = f
            .engine
            .try_reserve_seat(f.event_id, &SeatRequest::new(0, "alice"))
            .await
            .unwrap_err();
        assert!(matches!(err, BookingError::Validation(_)));

        let err = f.engine.confirm_seat_booking(f.event_id, 1, "").await.unwrap_err();
        assert!(matches!(err, BookingError::Validation(_)));
    }

    #[tokio::test]
    async fn confirmation_by_another_user_is_rejected() {
        let f = fixture(5).await;
        f.engine.try_reserve_seat(f.event_id, &SeatRequest::new(4, "alice")).await.unwrap();

        let err = f.engine.confirm_seat_booking(f.event_id, 4, "bob").await.unwrap_err();
        assert!(matches!(err, BookingError::ExpiredOrForeign));
        assert_eq!(f.seats.seat_snapshot(f.event_id, 4).unwrap().0, SeatStatus::Reserving);
    }

    #[tokio::test(start_paused = true)]
    async fn confirmation_after_expiry_fails_even_without_a_sweep() {
        let f = fixture(5).await;
        f.engine.try_reserve_seat(f.event_id, &SeatRequest::new(2, "alice")).await.unwrap();

        tokio::time::advance(TTL + Duration::from_secs(1)).await;

        let err = f.engine.confirm_seat_booking(f.event_id, 2, "alice").await.unwrap_err();
        assert!(matches!(err, BookingError::ExpiredOrForeign));
        assert_eq!(f.seats.seat_snapshot(f.event_id, 2).unwrap().0, SeatStatus::Reserving);
    }

    #[tokio::test]
    async fn double_confirmation_is_a_stale_state() {
        let f = fixture(5).await;
        f.engine.try_reserve_seat(f.event_id, &SeatRequest::new(5, "alice")).await.unwrap();
        f.engine.confirm_seat_booking(f.event_id, 5, "alice").await.unwrap();

        let err = f.engine.confirm_seat_booking(f.event_id, 5, "alice").await.unwrap_err();
        assert!(matches!(err, BookingError::StaleState(_)));
        assert_eq!(f.seats.seat_snapshot(f.event_id, 5).unwrap().0, SeatStatus::Booked);
    }

    #[tokio::test]
    async fn confirming_someone_elses_booked_seat_is_foreign() {
        let f = fixture(5).await;
        f.engine.try_reserve_seat(f.event_id, &SeatRequest::new(5, "alice")).await.unwrap();
        f.engine.confirm_seat_booking(f.event_id, 5, "alice").await.unwrap();

        let err = f.engine.confirm_seat_booking(f.event_id, 5, "bob").await.unwrap_err();
        assert!(matches!(err, BookingError::ExpiredOrForeign));
        assert_eq!(
            f.seats.seat_snapshot(f.event_id, 5),
            Some((SeatStatus::Booked, "alice".to_string()))
        );
    }

    #[tokio::test]
    async fn lock_without_durable_hold_cannot_be_confirmed() {
        let f = fixture(5).await;
        // Ключ есть, а строка в БД свободна - подтверждать нечего
        f.locks
            .try_acquire(&seat_lock_key(f.event_id, 1), "alice", TTL)
            .await
            .unwrap();

        let err = f.engine.confirm_seat_booking(f.event_id, 1, "alice").await.unwrap_err();
        assert!(matches!(err, BookingError::ExpiredOrForeign));
        assert_eq!(f.seats.seat_snapshot(f.event_id, 1).unwrap().0, SeatStatus::Free);
    }

    #[tokio::test(start_paused = true)]
    async fn expired_hold_is_reclaimed_and_reservable_again() {
        let f = fixture(10).await;
        f.engine.try_reserve_seat(f.event_id, &SeatRequest::new(7, "alice")).await.unwrap();

        let live = f.engine.cleanup_expired_reservation(f.event_id, 7).await.unwrap();
        assert_eq!(live, SeatSweepOutcome::HoldLive);

        tokio::time::advance(TTL + Duration::from_secs(1)).await;

        let freed = f.engine.cleanup_expired_reservation(f.event_id, 7).await.unwrap();
        assert_eq!(freed, SeatSweepOutcome::Freed);
        assert_eq!(f.seats.seat_snapshot(f.event_id, 7), Some((SeatStatus::Free, String::new())));

        f.engine.try_reserve_seat(f.event_id, &SeatRequest::new(7, "bob")).await.unwrap();
        assert_eq!(
            f.seats.seat_snapshot(f.event_id, 7),
            Some((SeatStatus::Reserving, "bob".to_string()))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn flushed_lock_does_not_free_a_fresh_hold() {
        let f = fixture(3).await;
        f.engine.try_reserve_seat(f.event_id, &SeatRequest::new(1, "alice")).await.unwrap();
        f.locks.flush();

        let outcome = f.engine.cleanup_expired_reservation(f.event_id, 1).await.unwrap();
        assert_eq!(outcome, SeatSweepOutcome::Untouched);
        assert_eq!(f.seats.seat_snapshot(f.event_id, 1).unwrap().0, SeatStatus::Reserving);
    }

    #[tokio::test(start_paused = true)]
    async fn hold_written_after_the_lock_is_freed_by_the_first_sweep_after_expiry() {
        // Ключ ставится в t=0, reserved_at пишется в t=2 после медленного чтения
        let (engine, seats, locks) = stalling_engine(Some(Duration::from_secs(2)));
        let event_id = create_event(&engine, 5).await;
        engine.try_reserve_seat(event_id, &SeatRequest::new(3, "alice")).await.unwrap();

        tokio::time::advance(TTL - Duration::from_secs(1)).await;
        assert!(!locks.exists(&seat_lock_key(event_id, 3)).await.unwrap());

        let outcome = engine.cleanup_expired_reservation(event_id, 3).await.unwrap();
        assert_eq!(outcome, SeatSweepOutcome::Freed);
        assert_eq!(seats.seat_snapshot(event_id, 3), Some((SeatStatus::Free, String::new())));
    }

    #[tokio::test]
    async fn cancelled_reservation_releases_the_lock() {
        let (engine, seats, locks) = stalling_engine(None);
        let event_id = create_event(&engine, 3).await;
        let key = seat_lock_key(event_id, 2);

        let request = {
            let engine = engine.clone();
            tokio::spawn(async move {
                engine.try_reserve_seat(event_id, &SeatRequest::new(2, "alice")).await
            })
        };
        for _ in 0..100 {
            if locks.exists(&key).await.unwrap() {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert!(locks.exists(&key).await.unwrap());

        request.abort();
        assert!(request.await.unwrap_err().is_cancelled());

        for _ in 0..100 {
            if !locks.exists(&key).await.unwrap() {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert!(!locks.exists(&key).await.unwrap());
        assert_eq!(seats.seat_snapshot(event_id, 2).unwrap().0, SeatStatus::Free);
    }

    #[tokio::test]
    async fn create_event_validates_layout() {
        let f = fixture(1).await;
        let err = f
            .engine
            .create_event(
                NewEvent { title: "Empty".to_string(), date: Utc::now() },
                SeatLayout { rows: 0, seats_per_row: 10, start_number: 1 },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, BookingError::Validation(_)));
        assert_eq!(f.engine.get_all_events().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn event_info_lists_seats_in_order() {
        let f = fixture(3).await;
        f.engine.try_reserve_seat(f.event_id, &SeatRequest::new(2, "alice")).await.unwrap();

        let info = f.engine.get_event_info(f.event_id).await.unwrap();
        assert_eq!(info.total_seats, 3);
        let statuses: Vec<_> = info.seats.iter().map(|s| (s.seat_number, s.status)).collect();
        assert_eq!(
            statuses,
            vec![(1, SeatStatus::Free), (2, SeatStatus::Reserving), (3, SeatStatus::Free)]
        );

        let missing = f.engine.get_event_info(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(missing, BookingError::NotFound(_)));
    }
}
