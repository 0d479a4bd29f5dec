use std::sync::Arc;

use axum::{extract::State, response::Json};
use serde::Deserialize;
use uuid::Uuid;

use crate::{
    common::types::GuildId,
    handler::{AddTrackRequest, QueueSummary},
    player::Track,
    transport::{
        AppState,
        extract::{ApiJson, ApiPath, ApiQuery},
        response::ApiResult,
    },
};

#[derive(Deserialize)]
pub struct PageParams {
    #[serde(default)]
    offset: usize,
    limit: Option<usize>,
}

/// GET /guild/{guildId}/track
pub async fn get_current(
    State(state): State<Arc<AppState>>,
    ApiPath(guild_id): ApiPath<GuildId>,
) -> ApiResult<Track> {
    tracing::debug!("GET /guild/{}/track", guild_id);
    Ok(Json(state.handler.get_current(guild_id)?))
}

/// GET /guild/{guildId}/track/{trackId}
pub async fn get_track(
    State(state): State<Arc<AppState>>,
    ApiPath((guild_id, track_id)): ApiPath<(GuildId, Uuid)>,
) -> ApiResult<Track> {
    tracing::debug!("GET /guild/{}/track/{}", guild_id, track_id);
    Ok(Json(state.handler.get_by_id(guild_id, track_id)?))
}

/// GET /guild/{guildId}/tracks?offset=&limit=
pub async fn list_tracks(
    State(state): State<Arc<AppState>>,
    ApiPath(guild_id): ApiPath<GuildId>,
    ApiQuery(page): ApiQuery<PageParams>,
) -> ApiResult<Vec<Track>> {
    tracing::debug!("GET /guild/{}/tracks", guild_id);
    Ok(Json(state.handler.list_queue(guild_id, page.offset, page.limit)))
}

/// GET /guild/{guildId}/queue
pub async fn queue_summary(
    State(state): State<Arc<AppState>>,
    ApiPath(guild_id): ApiPath<GuildId>,
) -> ApiResult<QueueSummary> {
    tracing::debug!("GET /guild/{}/queue", guild_id);
    Ok(Json(state.handler.queue_summary(guild_id)))
}

/// POST /guild/{guildId}/track
pub async fn add_track(
    State(state): State<Arc<AppState>>,
    ApiPath(guild_id): ApiPath<GuildId>,
    ApiJson(body): ApiJson<AddTrackRequest>,
) -> ApiResult<Vec<Track>> {
    tracing::info!("POST /guild/{}/track", guild_id);
    Ok(Json(state.handler.add_track(guild_id, body)?))
}

/// DELETE /guild/{guildId}/track/{trackId}
pub async fn remove_track(
    State(state): State<Arc<AppState>>,
    ApiPath((guild_id, track_id)): ApiPath<(GuildId, Uuid)>,
) -> ApiResult<Track> {
    tracing::info!("DELETE /guild/{}/track/{}", guild_id, track_id);
    Ok(Json(state.handler.remove_track(guild_id, track_id).await?))
}

/// DELETE /guild/{guildId}/queue/{position}
pub async fn remove_at(
    State(state): State<Arc<AppState>>,
    ApiPath((guild_id, position)): ApiPath<(GuildId, usize)>,
) -> ApiResult<Track> {
    tracing::info!("DELETE /guild/{}/queue/{}", guild_id, position);
    Ok(Json(state.handler.remove_at(guild_id, position)?))
}
