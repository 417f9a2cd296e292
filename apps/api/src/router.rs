use std::sync::Arc;

use axum::{extract::State, response::Json, routing::get, Router};
use serde_json::{json, Value};

use consultation_queue_cell::{consultation_routes, Dispatcher};
use notification_cell::{notification_routes, NotificationHub};
use shared_config::AppConfig;
use shared_models::error::AppError;
use video_conferencing_cell::{handlers::MediaWebhookState, media_routes, WebhookVerifier};

#[derive(Clone)]
pub struct Services {
    pub config: Arc<AppConfig>,
    pub hub: NotificationHub,
    pub dispatcher: Arc<Dispatcher>,
    pub verifier: WebhookVerifier,
}

pub fn create_router(services: Services) -> Router {
    let webhook = MediaWebhookState {
        verifier: services.verifier.clone(),
        sink: services.dispatcher.clone(),
    };

    Router::new()
        .route("/", get(|| async { "Telehealth dispatch API is running!" }))
        .route("/health", get(health))
        .with_state(services.clone())
        .merge(notification_routes(services.config.clone(), services.hub.clone()))
        .nest("/media", media_routes(webhook))
        .merge(consultation_routes(services.config, services.dispatcher))
}

/// Liveness plus a glance at live load. Unauthenticated.
async fn health(State(services): State<Services>) -> Result<Json<Value>, AppError> {
    let hub = services.hub.snapshot().await?;
    let queue_depth = services.dispatcher.queue_depth().await?;
    let active_sessions = services.dispatcher.active_session_count().await?;
    let persistence = if services.config.is_persistence_configured() {
        "supabase"
    } else {
        "memory"
    };

    Ok(Json(json!({
        "status": "ok",
        "persistence": persistence,
        "connections": hub.connections,
        "connections_by_role": hub.by_role,
        "queue_depth": queue_depth,
        "active_sessions": active_sessions,
    })))
}
