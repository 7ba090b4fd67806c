use axum::{
    extract::rejection::{JsonRejection, PathRejection},
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::time::Duration;
use thiserror::Error;

use crate::models::UnknownSeatStatus;

/// Ошибки хранилищ: БД мест и Redis с блокировками.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{0} not found")]
    NotFound(String),
    #[error("invalid input: {0}")]
    Invalid(String),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
    #[error(transparent)]
    Corrupt(#[from] UnknownSeatStatus),
}

#[derive(Debug, Error)]
pub enum BookingError {
    /// Бронь в Redis уже держит другой пользователь.
    #[error("seat is already being reserved by another user")]
    Contention,
    /// Статус в БД не допускает перехода (условный UPDATE не затронул строк).
    #[error("{0}")]
    StaleState(String),
    #[error("reservation expired or belongs to another user")]
    ExpiredOrForeign,
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Validation(String),
    #[error("service unavailable: {0}")]
    StoreUnavailable(#[source] StoreError),
}

impl BookingError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            BookingError::Contention | BookingError::StaleState(_) => StatusCode::CONFLICT,
            BookingError::ExpiredOrForeign => status_419(),
            BookingError::NotFound(_) => StatusCode::NOT_FOUND,
            BookingError::Validation(_) => StatusCode::BAD_REQUEST,
            BookingError::StoreUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    /// Через сколько имеет смысл повторить тот же запрос. Отдаётся
    /// клиенту заголовком `Retry-After`.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            BookingError::StoreUnavailable(_) => Some(Duration::from_secs(1)),
            _ => None,
        }
    }
}

// 419 - бронь истекла, как и в остальных ручках сервиса
fn status_419() -> StatusCode {
    StatusCode::from_u16(419).unwrap_or(StatusCode::CONFLICT)
}

impl From<StoreError> for BookingError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(what) => BookingError::NotFound(format!("{what} not found")),
            StoreError::Invalid(reason) => BookingError::Validation(reason),
            other => BookingError::StoreUnavailable(other),
        }
    }
}

impl From<validator::ValidationErrors> for BookingError {
    fn from(errors: validator::ValidationErrors) -> Self {
        BookingError::Validation(errors.to_string())
    }
}

// Тело и путь, которые axum не смог разобрать, отвечают тем же JSON, что и
// остальные ошибки
impl From<JsonRejection> for BookingError {
    fn from(rejection: JsonRejection) -> Self {
        BookingError::Validation(rejection.body_text())
    }
}

impl From<PathRejection> for BookingError {
    fn from(rejection: PathRejection) -> Self {
        BookingError::Validation(rejection.body_text())
    }
}

impl IntoResponse for BookingError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = ?self, "request failed on store access");
        }
        let retry_after = self.retry_after();
        let mut response = (status, Json(json!({ "error": self.to_string() }))).into_response();
        if let Some(delay) = retry_after {
            if let Ok(value) = HeaderValue::from_str(&delay.as_secs().max(1).to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }
        response
    }
}
