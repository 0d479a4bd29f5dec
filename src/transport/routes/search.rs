use std::sync::Arc;

use axum::{extract::State, response::Json};
use serde::Deserialize;

use crate::{
    player::TrackData,
    transport::{AppState, extract::ApiQuery, response::ApiResult},
};

#[derive(Deserialize)]
pub struct SearchParams {
    #[serde(default)]
    query: String,
}

/// GET /track/search?query=
pub async fn search_track(
    State(state): State<Arc<AppState>>,
    ApiQuery(params): ApiQuery<SearchParams>,
) -> ApiResult<Vec<TrackData>> {
    tracing::debug!(query = %params.query, "GET /track/search");
    Ok(Json(state.handler.search(&params.query).await?))
}
