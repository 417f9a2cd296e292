use axum::{routing::post, Router};

use crate::handlers::{receive_webhook, MediaWebhookState};

/// Provider-facing routes. The webhook authenticates with its own signature,
/// not a user bearer token.
pub fn media_routes(state: MediaWebhookState) -> Router {
    Router::new()
        .route("/webhook", post(receive_webhook))
        .with_state(state)
}
