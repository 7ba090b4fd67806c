use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::BookingConfig;
use crate::models::EventSummary;
use crate::services::reservation::{ReservationEngine, SeatSweepOutcome};

/// Итог сверки одного мероприятия.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventSweepReport {
    pub event_id: Uuid,
    pub freed: u32,
    pub live_holds: u32,
    pub errors: u32,
}

/// Итог полного прохода по всем мероприятиям.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub events: Vec<EventSweepReport>,
    /// Задачи, упавшие целиком (panic), и сбой получения списка мероприятий.
    pub failed_events: u32,
}

impl SweepReport {
    pub fn total_freed(&self) -> u32 {
        self.events.iter().map(|e| e.freed).sum()
    }

    pub fn total_errors(&self) -> u32 {
        self.events.iter().map(|e| e.errors).sum::<u32>() + self.failed_events
    }

    pub fn for_event(&self, event_id: Uuid) -> Option<&EventSweepReport> {
        self.events.iter().find(|e| e.event_id == event_id)
    }
}

/// Периодически возвращает в `free` места, чья бронь в Redis истекла.
#[derive(Clone)]
pub struct ReconciliationScheduler {
    engine: ReservationEngine,
    interval: Duration,
    concurrency: usize,
}

impl ReconciliationScheduler {
    pub fn new(engine: ReservationEngine, config: &BookingConfig) -> Self {
        Self {
            engine,
            interval: config.sweep_interval,
            concurrency: config.sweep_concurrency.max(1),
        }
    }

    /// Запускает фоновый цикл. Первый проход - через один интервал после
    /// старта; цикл завершается, когда в `shutdown` приходит `true` или
    /// отправитель закрыт.
    pub fn start(self, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + self.interval, self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            info!(interval_secs = self.interval.as_secs(), "reconciliation scheduler started");

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        self.run_once().await;
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            info!("reconciliation scheduler stopped");
                            break;
                        }
                    }
                }
            }
        })
    }

    /// Один проход сверки: по задаче на мероприятие, не больше
    /// `concurrency` одновременно. Ждёт завершения всех задач.
    pub async fn run_once(&self) -> SweepReport {
        info!("checking all events for expired reservations");

        let events = match self.engine.get_all_events().await {
            Ok(events) => events,
            Err(e) => {
                error!(error = %e, "failed to list events for reconciliation");
                return SweepReport { events: Vec::new(), failed_events: 1 };
            }
        };

        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut tasks = JoinSet::new();
        for event in events {
            let engine = self.engine.clone();
            let semaphore = semaphore.clone();
            tasks.spawn(async move {
                // Семафор никогда не закрывается
                let _permit = semaphore.acquire_owned().await.ok();
                sweep_event(&engine, &event).await
            });
        }

        let mut report = SweepReport::default();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(event_report) => report.events.push(event_report),
                Err(e) => {
                    error!(error = %e, "event sweep task failed");
                    report.failed_events += 1;
                }
            }
        }

        info!(
            events = report.events.len(),
            freed = report.total_freed(),
            errors = report.total_errors(),
            "reconciliation pass completed"
        );
        report
    }
}

async fn sweep_event(engine: &ReservationEngine, event: &EventSummary) -> EventSweepReport {
    debug!(event_id = %event.id, title = %event.title, "sweeping event");
    let mut report = EventSweepReport {
        event_id: event.id,
        ..EventSweepReport::default()
    };

    for seat_number in event.seat_numbers() {
        match engine.cleanup_expired_reservation(event.id, seat_number).await {
            Ok(SeatSweepOutcome::Freed) => report.freed += 1,
            Ok(SeatSweepOutcome::HoldLive) => report.live_holds += 1,
            Ok(SeatSweepOutcome::Untouched) => {}
            Err(e) => {
                warn!(event_id = %event.id, seat_number, error = %e, "failed to clean up seat");
                report.errors += 1;
            }
        }
    }

    debug!(
        event_id = %event.id,
        freed = report.freed,
        live_holds = report.live_holds,
        errors = report.errors,
        "event sweep finished"
    );
    report
}
