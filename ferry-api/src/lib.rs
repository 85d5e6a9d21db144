use axum::{
    extract::State,
    http::Method,
    middleware::{from_fn, from_fn_with_state},
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub mod bookings;
pub mod checkin;
pub mod error;
pub mod middleware;
pub mod schedules;
pub mod state;
pub mod worker;

pub use state::AppState;

pub fn app(state: AppState) -> Router {
    // CORS Middleware
    let cors = CorsLayer::new()
        .allow_origin(tower_http::cors::Any)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([
            axum::http::header::AUTHORIZATION,
            axum::http::header::CONTENT_TYPE,
            axum::http::header::USER_AGENT,
        ]);

    let public = Router::new()
        .route("/health", get(health))
        .route("/v1/schedules/search", get(schedules::search_schedules))
        .route("/v1/schedules/{id}", get(schedules::get_schedule))
        .route("/v1/schedules/{id}/stream", get(schedules::stream_availability));

    let operator = Router::new()
        .route("/v1/schedules", post(schedules::publish_schedule))
        .route(
            "/v1/schedules/{id}",
            axum::routing::put(schedules::reschedule).delete(schedules::delete_schedule),
        )
        .route("/v1/schedules/{id}/status", post(schedules::update_status))
        .route("/v1/schedules/{id}/manifest", get(schedules::get_manifest))
        .route("/v1/checkin", post(checkin::check_in))
        .route("/v1/bookings/{id}/refund", post(bookings::retry_refund))
        .route_layer(from_fn(middleware::operator_middleware));

    let authenticated = Router::new()
        .route(
            "/v1/bookings",
            post(bookings::create_booking).get(bookings::list_bookings),
        )
        .route("/v1/bookings/{id}", get(bookings::get_booking))
        .route(
            "/v1/bookings/reference/{reference}",
            get(bookings::get_booking_by_reference),
        )
        .route("/v1/bookings/{id}/cancel", post(bookings::cancel_booking))
        .merge(operator)
        .route_layer(from_fn_with_state(state.clone(), middleware::auth_middleware));

    Router::new()
        .merge(public)
        .merge(authenticated)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .layer(from_fn_with_state(state.clone(), middleware::rate_limit_middleware))
        .with_state(state)
}

async fn health(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "rate_limiting": state.rate_limit.redis.is_some(),
    }))
}
