pub mod cli;
pub mod config;
pub mod handlers;
pub mod link;
pub mod registry;
pub mod session;
pub mod websocket;
pub mod world;

use axum::{routing::get, Router};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub use handlers::AppState;
pub use registry::{IdentityRegistry, RegistryError, RegistryEvent};
pub use session::SessionEntity;
pub use world::World;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/ws", get(websocket::signaling_handler))
        .route("/peer/:identity", get(websocket::peer_media_handler))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}
