//! API route definitions. Deliberately minimal: the agent fleet talks
//! over `/ws`, and `/health` is the only HTTP surface — a REST dashboard
//! API is out of scope.

use axum::{routing::get, Router};
use std::sync::Arc;

use crate::handlers::health;
use crate::middleware::require_agent_token;
use crate::state::AppState;
use crate::ws::ws_handler;

pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route_layer(axum::middleware::from_fn_with_state(state.clone(), require_agent_token))
        .route("/health", get(health::health))
        .route("/ready", get(health::ready))
        .with_state(state)
}
