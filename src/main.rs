use std::{net::SocketAddr, sync::Arc};

use guild_player::{
    common::{logger, types::UserId},
    configs::Config,
    encoder::TranscodeSession,
    handler::CommandHandler,
    player::{Notifier, PlaybackContext, PlayerManager, messenger},
    sources::TrackFetcher,
    transport::{self, AppState},
    voice::{DiscordVoiceTransport, VoiceRegistry},
};
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let config = Config::load()?;
    logger::init(&config.logging);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        commit = option_env!("GIT_COMMIT").unwrap_or("unknown"),
        branch = option_env!("GIT_BRANCH").unwrap_or("unknown"),
        "Starting guild-player"
    );

    if config.discord.bot_user_id == 0 {
        warn!("discord.bot_user_id is not set; voice joins will be rejected by the gateway");
    }
    if config.server.password.is_empty() {
        warn!("server.password is empty; the HTTP API is unauthenticated");
    }

    let fetcher = Arc::new(TrackFetcher::new(&config)?);
    let registry = Arc::new(VoiceRegistry::new());
    let voice = Arc::new(DiscordVoiceTransport::new(
        registry.clone(),
        UserId(config.discord.bot_user_id),
        config.player.voice_join_timeout(),
    ));

    let ctx = Arc::new(PlaybackContext {
        fetcher: fetcher.clone(),
        voice,
        notifier: Notifier::spawn(messenger::from_config(&config.messenger)),
        player: config.player.clone(),
        encoder: config.encoder.clone(),
        open_session: TranscodeSession::new,
    });
    let manager = Arc::new(PlayerManager::new(ctx));

    let state = Arc::new(AppState {
        handler: CommandHandler::new(manager.clone(), fetcher, registry),
        password: config.server.password.clone(),
    });

    let address: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    let shutdown_manager = manager.clone();
    let shutdown = async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for shutdown signal: {}", e);
            return;
        }
        info!("Shutting down, stopping {} players", shutdown_manager.len());
        shutdown_manager.shutdown().await;
    };

    transport::serve(address, transport::router(state), shutdown).await?;
    info!("Server stopped");
    Ok(())
}
