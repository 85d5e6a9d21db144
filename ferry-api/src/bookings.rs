use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Extension, Json,
};
use ferry_core::models::{Booking, BookingChannel, BookingStatus, PassengerInfo};
use ferry_core::search::{BookingFilter, Page};
use ferry_core::CoreError;
use ferry_order::CreateBookingRequest;
use serde::Deserialize;
use uuid::Uuid;

use crate::error::AppError;
use crate::middleware::Claims;
use crate::state::AppState;

// ============================================================================
// Request Types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct CreateBookingBody {
    pub schedule_id: Uuid,
    pub passengers: Vec<PassengerInfo>,
    #[serde(default = "default_payment_method")]
    pub payment_method: String,
    /// Operators book on behalf of a customer; customers book for themselves.
    #[serde(default)]
    pub customer_id: Option<Uuid>,
    #[serde(default)]
    pub channel: Option<BookingChannel>,
    #[serde(default)]
    pub special_requirements: Option<String>,
}

fn default_payment_method() -> String {
    "card".to_string()
}

#[derive(Debug, Deserialize)]
pub struct CancelBookingBody {
    pub reason: String,
}

// ============================================================================
// Handlers
// ============================================================================

/// POST /v1/bookings
/// 201 when paid and confirmed, 202 when the charge outcome is still open.
pub async fn create_booking(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(body): Json<CreateBookingBody>,
) -> Result<(StatusCode, Json<Booking>), AppError> {
    let request = if claims.is_operator() {
        let customer_id = body.customer_id.ok_or_else(|| {
            AppError::ValidationError("customer_id is required when booking for a customer".into())
        })?;
        CreateBookingRequest {
            customer_id,
            schedule_id: body.schedule_id,
            passengers: body.passengers,
            payment_method: body.payment_method,
            channel: body.channel.unwrap_or(BookingChannel::Counter),
            special_requirements: body.special_requirements,
            booking_agent_id: Some(claims.sub),
        }
    } else {
        if body.customer_id.is_some_and(|id| id != claims.sub) {
            return Err(AppError::AuthorizationError(
                "customers can only book for themselves".into(),
            ));
        }
        CreateBookingRequest {
            customer_id: claims.sub,
            schedule_id: body.schedule_id,
            passengers: body.passengers,
            payment_method: body.payment_method,
            channel: BookingChannel::Online,
            special_requirements: body.special_requirements,
            booking_agent_id: None,
        }
    };

    let booking = state.orchestrator.create_booking(request).await?;
    let status = match booking.booking_status {
        BookingStatus::Confirmed => StatusCode::CREATED,
        _ => StatusCode::ACCEPTED,
    };
    Ok((status, Json(booking)))
}

/// GET /v1/bookings
/// Operators filter across all bookings; customers only ever see their own.
pub async fn list_bookings(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Query(mut filter): Query<BookingFilter>,
) -> Result<Json<Page<Booking>>, AppError> {
    if !claims.is_operator() {
        if filter.customer_id.is_some_and(|id| id != claims.sub) {
            return Err(AppError::AuthorizationError(
                "customers can only list their own bookings".into(),
            ));
        }
        filter.customer_id = Some(claims.sub);
    }

    let page = state.orchestrator.list_bookings(&filter).await?;
    Ok(Json(page))
}

/// GET /v1/bookings/{id}
pub async fn get_booking(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(booking_id): Path<Uuid>,
) -> Result<Json<Booking>, AppError> {
    let booking = state.orchestrator.get_booking(booking_id).await?;
    Ok(Json(visible_to(&claims, booking)?))
}

/// GET /v1/bookings/reference/{reference}
pub async fn get_booking_by_reference(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(reference): Path<String>,
) -> Result<Json<Booking>, AppError> {
    let booking = state.orchestrator.get_booking_by_reference(&reference).await?;
    Ok(Json(visible_to(&claims, booking)?))
}

/// POST /v1/bookings/{id}/cancel
pub async fn cancel_booking(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(booking_id): Path<Uuid>,
    Json(body): Json<CancelBookingBody>,
) -> Result<Json<Booking>, AppError> {
    let booking = state.orchestrator.get_booking(booking_id).await?;
    visible_to(&claims, booking)?;

    let cancelled = state
        .orchestrator
        .cancel_booking(booking_id, &body.reason)
        .await?;
    Ok(Json(cancelled))
}

/// POST /v1/bookings/{id}/refund
pub async fn retry_refund(
    State(state): State<AppState>,
    Path(booking_id): Path<Uuid>,
) -> Result<Json<Booking>, AppError> {
    let booking = state.orchestrator.retry_refund(booking_id).await?;
    Ok(Json(booking))
}

/// Someone else's booking looks the same as a missing one.
fn visible_to(claims: &Claims, booking: Booking) -> Result<Booking, AppError> {
    if claims.may_access(booking.customer_id) {
        Ok(booking)
    } else {
        Err(CoreError::not_found("booking", booking.id).into())
    }
}
