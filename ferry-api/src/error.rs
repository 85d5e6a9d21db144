use axum::{
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use ferry_core::CoreError;
use serde_json::json;

/// Seconds a client is told to wait before retrying a lost seat race.
const RETRY_AFTER_SECS: &str = "1";

#[derive(Debug)]
pub enum AppError {
    AuthenticationError(String),
    AuthorizationError(String),
    ValidationError(String),
    Core(CoreError),
}

impl From<CoreError> for AppError {
    fn from(err: CoreError) -> Self {
        AppError::Core(err)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            AppError::AuthenticationError(msg) => {
                (StatusCode::UNAUTHORIZED, json!({ "error": msg }))
            }
            AppError::AuthorizationError(msg) => (StatusCode::FORBIDDEN, json!({ "error": msg })),
            AppError::ValidationError(msg) => (StatusCode::BAD_REQUEST, json!({ "error": msg })),
            AppError::Core(err) => return core_response(err),
        };

        (status, Json(body)).into_response()
    }
}

fn core_response(err: CoreError) -> Response {
    let message = err.to_string();
    match err {
        CoreError::ValidationError(_) => {
            (StatusCode::BAD_REQUEST, Json(json!({ "error": message }))).into_response()
        }
        CoreError::NotFound { entity, .. } => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": message, "entity": entity })),
        )
            .into_response(),
        CoreError::InsufficientCapacity { requested, available } => (
            StatusCode::CONFLICT,
            Json(json!({
                "error": message,
                "requested": requested,
                "available": available,
            })),
        )
            .into_response(),
        CoreError::Conflict { .. } => (
            StatusCode::CONFLICT,
            [(header::RETRY_AFTER, RETRY_AFTER_SECS)],
            Json(json!({ "error": message, "retryable": true })),
        )
            .into_response(),
        CoreError::InvalidState(_) => {
            (StatusCode::UNPROCESSABLE_ENTITY, Json(json!({ "error": message }))).into_response()
        }
        CoreError::PaymentFailed {
            booking_id,
            booking_reference,
            ..
        } => (
            StatusCode::PAYMENT_REQUIRED,
            Json(json!({
                "error": message,
                "booking_id": booking_id,
                "booking_reference": booking_reference,
            })),
        )
            .into_response(),
        CoreError::Store(_) | CoreError::InternalError(_) => {
            tracing::error!("Internal Server Error: {}", message);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": "Internal Server Error" })),
            )
                .into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ferry_core::StoreError;
    use uuid::Uuid;

    fn status_of(err: CoreError) -> StatusCode {
        AppError::from(err).into_response().status()
    }

    #[test]
    fn test_core_errors_map_to_statuses() {
        assert_eq!(
            status_of(CoreError::ValidationError("bad".into())),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(status_of(CoreError::not_found("booking", "x")), StatusCode::NOT_FOUND);
        assert_eq!(
            status_of(CoreError::InsufficientCapacity { requested: 3, available: 1 }),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status_of(CoreError::InvalidState("cancelled".into())),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            status_of(CoreError::PaymentFailed {
                booking_id: Uuid::new_v4(),
                booking_reference: "FFABCD1234".into(),
                reason: "declined".into(),
            }),
            StatusCode::PAYMENT_REQUIRED
        );
        assert_eq!(
            status_of(CoreError::Store(StoreError::Backend("down".into()))),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_conflict_carries_retry_after() {
        let response = AppError::from(CoreError::Conflict {
            entity: "schedule",
            id: Uuid::new_v4(),
            attempts: 3,
        })
        .into_response();

        assert_eq!(response.status(), StatusCode::CONFLICT);
        assert_eq!(response.headers().get(header::RETRY_AFTER).unwrap(), "1");
    }
}
