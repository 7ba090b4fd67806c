pub mod config;
pub mod controllers;
pub mod database;
pub mod error;
pub mod models;
pub mod redis_client;
pub mod services;
pub mod store;

use axum::{routing::get, Router};
use std::sync::Arc;
use tracing::info;

use services::ReservationEngine;
use store::{PgSeatStore, RedisReservationLock};

// Shared state для всего приложения
#[derive(Clone)]
pub struct AppState {
    pub engine: ReservationEngine,
}

impl AppState {
    pub fn new(engine: ReservationEngine) -> Arc<Self> {
        Arc::new(Self { engine })
    }

    /// Подключается к PostgreSQL и Redis, применяет миграции и собирает движок.
    pub async fn connect(config: &config::Config) -> anyhow::Result<Arc<Self>> {
        let db = database::Database::new(&config.database.url, config.database.pool_size).await?;
        info!("Database connected");

        db.run_migrations().await?;

        let redis = redis_client::RedisClient::new(&config.redis.url).await?;
        info!("Redis connected");

        let engine = ReservationEngine::new(
            Arc::new(PgSeatStore::new(db)),
            Arc::new(RedisReservationLock::new(redis)),
            config.booking.hold_ttl,
        )
        .with_fresh_hold_grace(config.booking.fresh_hold_grace);
        Ok(Self::new(engine))
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(|| async { "Event Booker API v1.0" }))
        .route("/health", get(|| async { "OK" }))
        .nest("/api", controllers::routes())
        .with_state(state)
}
