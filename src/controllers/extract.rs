//! Обёртки над `Json` и `Path`, у которых ошибка разбора запроса приходит
//! клиенту в общем формате `{"error": ...}`.

use axum::extract::{FromRequest, FromRequestParts};

use crate::error::BookingError;

#[derive(FromRequest)]
#[from_request(via(axum::Json), rejection(BookingError))]
pub struct ApiJson<T>(pub T);

#[derive(FromRequestParts)]
#[from_request(via(axum::extract::Path), rejection(BookingError))]
pub struct ApiPath<T>(pub T);
