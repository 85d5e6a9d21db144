use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
    Json,
};
use chrono::{DateTime, Utc};
use ferry_catalog::NewSchedule;
use ferry_core::models::{Schedule, ScheduleStatus};
use ferry_core::search::{Page, ScheduleOption, ScheduleSearch};
use ferry_order::Manifest;
use ferry_shared::{BookingEvent, SeatsChangedEvent};
use futures_util::stream::{self, Stream, StreamExt};
use serde::Deserialize;
use std::convert::Infallible;
use tokio_stream::wrappers::{errors::BroadcastStreamRecvError, BroadcastStream};
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::AppError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct UpdateStatusBody {
    pub status: ScheduleStatus,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RescheduleBody {
    pub departure_time: DateTime<Utc>,
    pub arrival_time: DateTime<Utc>,
    #[serde(default)]
    pub base_fare: Option<i64>,
}

/// GET /v1/schedules/search
pub async fn search_schedules(
    State(state): State<AppState>,
    Query(criteria): Query<ScheduleSearch>,
) -> Result<Json<Page<ScheduleOption>>, AppError> {
    let options = state.schedules.search(&criteria).await?;
    Ok(Json(options))
}

/// GET /v1/schedules/{id}
pub async fn get_schedule(
    State(state): State<AppState>,
    Path(schedule_id): Path<Uuid>,
) -> Result<Json<Schedule>, AppError> {
    Ok(Json(state.schedules.get(schedule_id).await?))
}

/// GET /v1/schedules/{id}/stream
/// Current seat count first, then every change as it happens.
pub async fn stream_availability(
    State(state): State<AppState>,
    Path(schedule_id): Path<Uuid>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
    // Subscribe before the snapshot read so no change falls in between
    let rx = state.events.subscribe();
    let schedule = state.schedules.get(schedule_id).await?;

    let snapshot = BookingEvent::SeatsChanged(SeatsChangedEvent {
        schedule_id,
        available_seats: schedule.available_seats,
        total_capacity: schedule.total_capacity,
        version: schedule.version,
        changed_at: Utc::now().timestamp(),
    });

    let updates = BroadcastStream::new(rx).filter_map(move |result| async move {
        match result {
            Ok(event @ BookingEvent::SeatsChanged(_)) if event.schedule_id() == schedule_id => {
                Some(event)
            }
            Ok(_) => None,
            Err(BroadcastStreamRecvError::Lagged(missed)) => {
                warn!("Availability stream for {} lagged by {} events", schedule_id, missed);
                None
            }
        }
    });

    let stream = stream::once(async move { snapshot })
        .chain(updates)
        .map(|event| Ok(sse_frame(&event)));

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

fn sse_frame(event: &BookingEvent) -> Event {
    Event::default()
        .event(event.name())
        .json_data(event)
        .unwrap_or_else(|e| {
            warn!("Could not encode {} event: {}", event.name(), e);
            Event::default().comment("encoding error")
        })
}

/// POST /v1/schedules
pub async fn publish_schedule(
    State(state): State<AppState>,
    Json(body): Json<NewSchedule>,
) -> Result<(StatusCode, Json<Schedule>), AppError> {
    let schedule = state.schedules.publish(body).await?;
    Ok((StatusCode::CREATED, Json(schedule)))
}

/// POST /v1/schedules/{id}/status
pub async fn update_status(
    State(state): State<AppState>,
    Path(schedule_id): Path<Uuid>,
    Json(body): Json<UpdateStatusBody>,
) -> Result<Json<Schedule>, AppError> {
    let schedule = state
        .schedules
        .update_status(schedule_id, body.status, body.reason)
        .await?;
    info!("Schedule {} is now {}", schedule.id, schedule.status);
    Ok(Json(schedule))
}

/// PUT /v1/schedules/{id}
pub async fn reschedule(
    State(state): State<AppState>,
    Path(schedule_id): Path<Uuid>,
    Json(body): Json<RescheduleBody>,
) -> Result<Json<Schedule>, AppError> {
    let schedule = state
        .schedules
        .reschedule(schedule_id, body.departure_time, body.arrival_time, body.base_fare)
        .await?;
    Ok(Json(schedule))
}

/// DELETE /v1/schedules/{id}
pub async fn delete_schedule(
    State(state): State<AppState>,
    Path(schedule_id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    state.schedules.delete(schedule_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /v1/schedules/{id}/manifest
pub async fn get_manifest(
    State(state): State<AppState>,
    Path(schedule_id): Path<Uuid>,
) -> Result<Json<Manifest>, AppError> {
    Ok(Json(state.manifests.get_manifest(schedule_id).await?))
}
