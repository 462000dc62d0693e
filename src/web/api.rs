// src/web/api.rs - Axum routes serving the capture loop's snapshots
use crate::web::models::WeatherSnapshot;
use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Helper to create a JSON error response with a message and status code
fn json_error(message: &str, status: StatusCode) -> axum::response::Response {
    (status, Json(serde_json::json!({ "error": message }))).into_response()
}

/// In-memory ring of recent snapshots, newest at the back. The capture loop
/// is the only writer; handlers only ever take the read lock.
pub struct AppStateInner {
    history: RwLock<VecDeque<WeatherSnapshot>>,
    capacity: usize,
}

pub type AppState = Arc<AppStateInner>;

pub fn shared_state(capacity: usize) -> AppState {
    Arc::new(AppStateInner {
        history: RwLock::new(VecDeque::with_capacity(capacity.max(1))),
        capacity: capacity.max(1),
    })
}

/// Push one snapshot, evicting the oldest once the ring is full.
pub async fn publish(state: &AppState, snapshot: WeatherSnapshot) {
    let mut history = state.history.write().await;
    if history.len() == state.capacity {
        history.pop_front();
    }
    history.push_back(snapshot);
}

/// Creates the Axum router with all the API endpoints.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/weather", get(get_history))
        .route("/weather/latest", get(get_latest))
        .with_state(state)
}

/// Handler for the full retained history, oldest first.
async fn get_history(State(state): State<AppState>) -> axum::response::Response {
    let history = state.history.read().await;
    let snapshots: Vec<&WeatherSnapshot> = history.iter().collect();
    (StatusCode::OK, Json(snapshots)).into_response()
}

/// Handler for the most recent snapshot.
async fn get_latest(State(state): State<AppState>) -> axum::response::Response {
    let history = state.history.read().await;
    match history.back() {
        Some(snapshot) => (StatusCode::OK, Json(snapshot)).into_response(),
        None => json_error("No readings captured yet", StatusCode::NOT_FOUND),
    }
}
