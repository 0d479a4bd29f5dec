use std::sync::Arc;

use axum::{extract::State, response::Json};

use crate::{
    handler::{Reply, VersionInfo},
    transport::AppState,
};

/// GET /version
pub async fn get_version(State(state): State<Arc<AppState>>) -> Json<Reply<VersionInfo>> {
    tracing::debug!("GET /version");
    Json(state.handler.version())
}
