pub mod extract;
pub mod http_server;
pub mod middleware;
pub mod response;
pub mod routes;

pub use http_server::{router, serve};

use crate::handler::CommandHandler;

/// Shared state of the HTTP surface.
pub struct AppState {
    pub handler: CommandHandler,
    /// Expected `Authorization` value. Empty disables auth.
    pub password: String,
}
