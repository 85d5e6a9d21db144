use axum::{extract::State, Json};
use ferry_core::models::Ticket;
use serde::Deserialize;

use crate::error::AppError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct CheckInBody {
    pub ticket_code: String,
}

/// POST /v1/checkin
pub async fn check_in(
    State(state): State<AppState>,
    Json(body): Json<CheckInBody>,
) -> Result<Json<Ticket>, AppError> {
    let ticket = state.manifests.check_in(&body.ticket_code).await?;
    Ok(Json(ticket))
}
