use std::sync::Arc;

use axum::{extract::State, response::Json};
use serde::Deserialize;

use crate::{
    common::types::GuildId,
    player::Track,
    transport::{
        AppState,
        extract::{ApiJson, ApiPath, ApiQuery},
        response::ApiResult,
    },
    voice::VoiceCredentials,
};

#[derive(Deserialize)]
pub struct LoopParams {
    enable: bool,
}

#[derive(Deserialize)]
pub struct VolumeParams {
    /// Out-of-range values are rejected by deserialization.
    volume: u8,
}

/// PUT /guild/{guildId}/skip
pub async fn skip(
    State(state): State<Arc<AppState>>,
    ApiPath(guild_id): ApiPath<GuildId>,
) -> ApiResult<Track> {
    tracing::info!("PUT /guild/{}/skip", guild_id);
    Ok(Json(state.handler.skip(guild_id).await?))
}

/// PUT /guild/{guildId}/pause
pub async fn pause(
    State(state): State<Arc<AppState>>,
    ApiPath(guild_id): ApiPath<GuildId>,
) -> ApiResult<()> {
    tracing::info!("PUT /guild/{}/pause", guild_id);
    Ok(Json(state.handler.pause(guild_id).await?))
}

/// PUT /guild/{guildId}/unpause
pub async fn unpause(
    State(state): State<Arc<AppState>>,
    ApiPath(guild_id): ApiPath<GuildId>,
) -> ApiResult<()> {
    tracing::info!("PUT /guild/{}/unpause", guild_id);
    Ok(Json(state.handler.unpause(guild_id).await?))
}

/// PUT /guild/{guildId}/loop?enable=
pub async fn set_loop(
    State(state): State<Arc<AppState>>,
    ApiPath(guild_id): ApiPath<GuildId>,
    ApiQuery(params): ApiQuery<LoopParams>,
) -> ApiResult<bool> {
    tracing::info!("PUT /guild/{}/loop?enable={}", guild_id, params.enable);
    Ok(Json(state.handler.set_loop(guild_id, params.enable)?))
}

/// PUT /guild/{guildId}/volume?volume=
pub async fn set_volume(
    State(state): State<Arc<AppState>>,
    ApiPath(guild_id): ApiPath<GuildId>,
    ApiQuery(params): ApiQuery<VolumeParams>,
) -> ApiResult<u8> {
    tracing::info!("PUT /guild/{}/volume?volume={}", guild_id, params.volume);
    Ok(Json(state.handler.set_volume(guild_id, params.volume)?))
}

/// DELETE /guild/{guildId}
pub async fn stop(
    State(state): State<Arc<AppState>>,
    ApiPath(guild_id): ApiPath<GuildId>,
) -> ApiResult<()> {
    tracing::info!("DELETE /guild/{}", guild_id);
    Ok(Json(state.handler.stop(guild_id).await?))
}

/// PUT /guild/{guildId}/voice
pub async fn set_voice(
    State(state): State<Arc<AppState>>,
    ApiPath(guild_id): ApiPath<GuildId>,
    ApiJson(credentials): ApiJson<VoiceCredentials>,
) -> ApiResult<()> {
    tracing::debug!("PUT /guild/{}/voice", guild_id);
    Ok(Json(state.handler.set_voice(guild_id, credentials)))
}
