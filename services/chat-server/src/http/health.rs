use crate::state::AppState;
use axum::extract::State;
use axum::response::IntoResponse;

pub async fn healthz() -> impl IntoResponse {
    "ok"
}

/// Unlike `healthz`, this one touches the pool — a connection-starved
/// instance should fail readiness before it starts failing requests.
pub async fn readyz(State(state): State<AppState>) -> impl IntoResponse {
    match sqlx::query("SELECT 1").execute(&state.pool).await {
        Ok(_) => (axum::http::StatusCode::OK, "ok"),
        Err(_) => (axum::http::StatusCode::SERVICE_UNAVAILABLE, "db unavailable"),
    }
}
