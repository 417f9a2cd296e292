use std::sync::Arc;

use axum::{middleware, routing::get, Router};

use shared_config::AppConfig;
use shared_utils::extractor::auth_middleware;

use crate::handlers::websocket_handler;
use crate::services::NotificationHub;

pub fn notification_routes(config: Arc<AppConfig>, hub: NotificationHub) -> Router {
    Router::new()
        .route("/ws", get(websocket_handler))
        .layer(middleware::from_fn_with_state(config, auth_middleware))
        .with_state(hub)
}
