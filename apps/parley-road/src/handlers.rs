use axum::{extract::State, Json};
use serde::Serialize;

use crate::registry::IdentityRegistry;
use crate::world::World;

#[derive(Clone)]
pub struct AppState {
    pub registry: IdentityRegistry,
    pub world: World,
}

#[derive(Debug, Serialize)]
pub struct HealthStatus {
    status: &'static str,
    sessions: usize,
}

pub async fn health_check(State(state): State<AppState>) -> Json<HealthStatus> {
    Json(HealthStatus {
        status: "ok",
        sessions: state.registry.len(),
    })
}
