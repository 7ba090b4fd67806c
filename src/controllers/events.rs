use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;
use validator::Validate;

use super::extract::{ApiJson, ApiPath};
use crate::error::BookingError;
use crate::models::{NewEvent, SeatLayout, SeatRequest};
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/events", post(create_event))
        .route("/events/all", get(get_all_events))
        .route("/events/{id}", get(get_event))
        .route("/events/{id}/book", post(book_seat))
        .route("/events/{id}/confirm", post(confirm_booking))
}

// POST /api/events
#[derive(Debug, Deserialize, Validate)]
pub struct CreateEventRequest {
    #[validate(nested)]
    pub event: NewEvent,
    #[validate(nested)]
    pub layout: SeatLayout,
}

#[derive(Debug, Serialize)]
pub struct CreateEventResponse {
    pub event_id: Uuid,
}

async fn create_event(
    State(state): State<Arc<AppState>>,
    ApiJson(req): ApiJson<CreateEventRequest>,
) -> Result<impl IntoResponse, BookingError> {
    req.validate()?;
    let event_id = state.engine.create_event(req.event, req.layout).await?;
    Ok((StatusCode::CREATED, Json(CreateEventResponse { event_id })))
}

// GET /api/events/all
async fn get_all_events(State(state): State<Arc<AppState>>) -> Result<impl IntoResponse, BookingError> {
    let events = state.engine.get_all_events().await?;
    Ok(Json(events))
}

// GET /api/events/{id}
async fn get_event(
    State(state): State<Arc<AppState>>,
    ApiPath(event_id): ApiPath<Uuid>,
) -> Result<impl IntoResponse, BookingError> {
    let info = state.engine.get_event_info(event_id).await?;
    Ok(Json(info))
}

// POST /api/events/{id}/book
async fn book_seat(
    State(state): State<Arc<AppState>>,
    ApiPath(event_id): ApiPath<Uuid>,
    ApiJson(req): ApiJson<SeatRequest>,
) -> Result<impl IntoResponse, BookingError> {
    state.engine.try_reserve_seat(event_id, &req).await?;
    Ok(Json(json!({
        "message": "seat reserved successfully",
        "event_id": event_id,
        "seat_number": req.seat_number,
        "hold_seconds": state.engine.hold_ttl().as_secs(),
    })))
}

// POST /api/events/{id}/confirm
async fn confirm_booking(
    State(state): State<Arc<AppState>>,
    ApiPath(event_id): ApiPath<Uuid>,
    ApiJson(req): ApiJson<SeatRequest>,
) -> Result<impl IntoResponse, BookingError> {
    state
        .engine
        .confirm_seat_booking(event_id, req.seat_number, &req.user_id)
        .await?;
    Ok(Json(json!({
        "message": "booking confirmed successfully",
        "event_id": event_id,
        "seat_number": req.seat_number,
    })))
}
