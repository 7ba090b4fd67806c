use async_trait::async_trait;
use std::time::Duration;
use tracing::{error, info};
use uuid::Uuid;

use super::SeatStore;
use crate::database::Database;
use crate::error::StoreError;
use crate::models::{EventInfo, EventSummary, NewEvent, SeatHolder, SeatState, SeatStatus};

/// Места и мероприятия в PostgreSQL. Все переходы статусов - условные
/// UPDATE по одной строке, результат определяется rows_affected.
#[derive(Clone)]
pub struct PgSeatStore {
    db: Database,
}

impl PgSeatStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

#[derive(sqlx::FromRow)]
struct EventRow {
    id: Uuid,
    title: String,
    date: chrono::DateTime<chrono::Utc>,
    total_seats: i32,
}

#[async_trait]
impl SeatStore for PgSeatStore {
    async fn create_event(
        &self,
        event_id: Uuid,
        event: &NewEvent,
        total_seats: i32,
        seat_numbers: &[i32],
    ) -> Result<(), StoreError> {
        if seat_numbers.len() != total_seats as usize {
            error!(
                expected = total_seats,
                got = seat_numbers.len(),
                "number of seats does not match total number of seats"
            );
            return Err(StoreError::Invalid("seat count mismatch".to_string()));
        }
        let first_seat = seat_numbers.iter().copied().min().unwrap_or(1);

        // При ошибке транзакция откатывается на drop
        let mut tx = self.db.pool.begin().await?;

        sqlx::query(
            "INSERT INTO events (id, title, date, total_seats, first_seat)
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(event_id)
        .bind(&event.title)
        .bind(event.date)
        .bind(total_seats)
        .bind(first_seat)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "INSERT INTO seats (event_id, seat_number, status, user_id)
             SELECT $1, n, 'free', '' FROM UNNEST($2::int4[]) AS n",
        )
        .bind(event_id)
        .bind(seat_numbers)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        info!(event_id = %event_id, seats = total_seats, "event created with seats");
        Ok(())
    }

    async fn get_seat_status(&self, event_id: Uuid, seat_number: i32) -> Result<SeatStatus, StoreError> {
        let status: Option<String> = sqlx::query_scalar(
            "SELECT status FROM seats WHERE event_id = $1 AND seat_number = $2",
        )
        .bind(event_id)
        .bind(seat_number)
        .fetch_optional(&self.db.pool)
        .await?;

        let status = status.ok_or_else(|| StoreError::NotFound(format!("seat {seat_number}")))?;
        Ok(status.parse()?)
    }

    async fn get_seat_holder(&self, event_id: Uuid, seat_number: i32) -> Result<SeatHolder, StoreError> {
        let row: Option<(String, String)> = sqlx::query_as(
            "SELECT status, user_id FROM seats WHERE event_id = $1 AND seat_number = $2",
        )
        .bind(event_id)
        .bind(seat_number)
        .fetch_optional(&self.db.pool)
        .await?;

        let (status, user_id) = row.ok_or_else(|| StoreError::NotFound(format!("seat {seat_number}")))?;
        Ok(SeatHolder {
            status: status.parse()?,
            user_id,
        })
    }

    async fn mark_reserving(&self, event_id: Uuid, seat_number: i32, user_id: &str) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE seats
             SET status = 'reserving', user_id = $1, reserved_at = NOW()
             WHERE event_id = $2 AND seat_number = $3 AND status = 'free'",
        )
        .bind(user_id)
        .bind(event_id)
        .bind(seat_number)
        .execute(&self.db.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn confirm_booking(&self, event_id: Uuid, seat_number: i32, user_id: &str) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE seats SET status = 'booked'
             WHERE event_id = $1 AND seat_number = $2 AND user_id = $3 AND status = 'reserving'",
        )
        .bind(event_id)
        .bind(seat_number)
        .bind(user_id)
        .execute(&self.db.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn free_seat(&self, event_id: Uuid, seat_number: i32, held_for: Duration) -> Result<bool, StoreError> {
        // Время сравнивается по часам БД, как и при установке reserved_at
        let result = sqlx::query(
            "UPDATE seats
             SET status = 'free', user_id = '', reserved_at = NULL
             WHERE event_id = $1 AND seat_number = $2 AND status = 'reserving'
               AND (reserved_at IS NULL OR reserved_at <= NOW() - make_interval(secs => $3))",
        )
        .bind(event_id)
        .bind(seat_number)
        .bind(held_for.as_secs_f64())
        .execute(&self.db.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn list_events(&self) -> Result<Vec<EventSummary>, StoreError> {
        let events = sqlx::query_as::<_, EventSummary>(
            "SELECT id, title, date, total_seats, first_seat
             FROM events
             ORDER BY date ASC",
        )
        .fetch_all(&self.db.pool)
        .await?;

        Ok(events)
    }

    async fn get_event_info(&self, event_id: Uuid) -> Result<EventInfo, StoreError> {
        let event = sqlx::query_as::<_, EventRow>(
            "SELECT id, title, date, total_seats FROM events WHERE id = $1",
        )
        .bind(event_id)
        .fetch_optional(&self.db.pool)
        .await?
        .ok_or_else(|| StoreError::NotFound(format!("event {event_id}")))?;

        let rows: Vec<(i32, String)> = sqlx::query_as(
            "SELECT seat_number, status FROM seats WHERE event_id = $1 ORDER BY seat_number",
        )
        .bind(event_id)
        .fetch_all(&self.db.pool)
        .await?;

        let seats = rows
            .into_iter()
            .map(|(seat_number, status)| -> Result<SeatState, StoreError> {
                Ok(SeatState {
                    seat_number,
                    status: status.parse()?,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(EventInfo {
            id: event.id,
            title: event.title,
            date: event.date,
            total_seats: event.total_seats,
            seats,
        })
    }
}
