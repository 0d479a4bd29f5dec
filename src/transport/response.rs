use std::any::Any;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use tracing::{debug, error, warn};

use crate::{
    common::errors::{ErrorBody, PlayerError},
    handler::Reply,
};

pub type ApiResult<T> = Result<Json<Reply<T>>, PlayerError>;

impl IntoResponse for PlayerError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            warn!(code = ?self.code(), "Request failed: {}", self);
        } else {
            debug!(code = ?self.code(), %status, "Request rejected: {}", self);
        }
        (status, Json(ErrorBody::from(&self))).into_response()
    }
}

/// Renders a handler panic as the internal-error envelope.
pub fn render_panic(err: Box<dyn Any + Send + 'static>) -> Response {
    let detail = if let Some(s) = err.downcast_ref::<String>() {
        s.as_str()
    } else if let Some(s) = err.downcast_ref::<&str>() {
        s
    } else {
        "unknown panic"
    };
    error!("Handler panicked: {}", detail);

    let body = ErrorBody::from(&PlayerError::Internal("internal server error".to_string()));
    (StatusCode::INTERNAL_SERVER_ERROR, Json(body)).into_response()
}
