use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::HeaderValue,
    middleware::Next,
    response::{IntoResponse, Response},
};
use tracing::warn;

use super::AppState;
use crate::common::errors::PlayerError;

pub async fn check_auth(State(state): State<Arc<AppState>>, req: Request, next: Next) -> Response {
    if state.password.is_empty() {
        return next.run(req).await;
    }

    let auth_header = req
        .headers()
        .get("authorization")
        .and_then(|h| h.to_str().ok());

    match auth_header {
        Some(auth) if auth == state.password => next.run(req).await,
        Some(_) => {
            warn!("REST Authorization failed: Invalid password");
            PlayerError::Unauthorized.into_response()
        }
        None => {
            warn!("REST Authorization failed: Missing Authorization header");
            PlayerError::Unauthorized.into_response()
        }
    }
}

pub async fn add_response_headers(req: Request, next: Next) -> Response {
    let mut response = next.run(req).await;
    response.headers_mut().insert(
        "guild-player-version",
        HeaderValue::from_static(env!("CARGO_PKG_VERSION")),
    );
    response
}
