use std::{future::Future, net::SocketAddr, sync::Arc};

use axum::{
    Router, middleware,
    routing::{delete, get, put},
};
use tokio::net::TcpListener;
use tower_http::{catch_panic::CatchPanicLayer, trace::TraceLayer};
use tracing::info;

use crate::transport::{
    AppState,
    middleware::{add_response_headers, check_auth},
    response::render_panic,
    routes::{control, queue, search, system},
};

pub fn router(state: Arc<AppState>) -> Router {
    let guild_routes = Router::new()
        .route("/{guild_id}", delete(control::stop))
        .route(
            "/{guild_id}/track",
            get(queue::get_current).post(queue::add_track),
        )
        .route(
            "/{guild_id}/track/{track_id}",
            get(queue::get_track).delete(queue::remove_track),
        )
        .route("/{guild_id}/tracks", get(queue::list_tracks))
        .route("/{guild_id}/queue", get(queue::queue_summary))
        .route("/{guild_id}/queue/{position}", delete(queue::remove_at))
        .route("/{guild_id}/skip", put(control::skip))
        .route("/{guild_id}/pause", put(control::pause))
        .route("/{guild_id}/unpause", put(control::unpause))
        .route("/{guild_id}/loop", put(control::set_loop))
        .route("/{guild_id}/volume", put(control::set_volume))
        .route("/{guild_id}/voice", put(control::set_voice));

    Router::new()
        .nest("/guild", guild_routes)
        .route("/track/search", get(search::search_track))
        .route("/version", get(system::get_version))
        .layer(middleware::from_fn_with_state(state.clone(), check_auth))
        .layer(middleware::from_fn(add_response_headers))
        .layer(CatchPanicLayer::custom(render_panic))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serves `router` on `addr` until `shutdown` resolves.
pub async fn serve(
    addr: SocketAddr,
    router: Router,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!("HTTP server listening on {}", listener.local_addr()?);
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await
}
