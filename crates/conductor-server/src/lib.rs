//! Control-plane HTTP/WebSocket surface for Conductor.

pub mod handlers;
pub mod middleware;
pub mod routes;
pub mod state;
pub mod ws;

pub use routes::create_router;
pub use state::AppState;
