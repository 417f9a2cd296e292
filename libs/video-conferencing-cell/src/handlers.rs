use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::State,
    http::{header::AUTHORIZATION, HeaderMap},
    Json,
};
use serde_json::{json, Value};
use tracing::info;

use shared_models::error::AppError;

use crate::services::{parse_event, ProviderEventSink, WebhookVerifier};

#[derive(Clone)]
pub struct MediaWebhookState {
    pub verifier: WebhookVerifier,
    pub sink: Arc<dyn ProviderEventSink>,
}

/// `POST /media/webhook` - signed event feed from the media provider.
pub async fn receive_webhook(
    State(state): State<MediaWebhookState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, AppError> {
    let authorization = headers.get(AUTHORIZATION).and_then(|v| v.to_str().ok());
    state.verifier.verify(authorization, &body)?;

    let event = parse_event(&body)?;
    info!("Media provider event: {}", event.name());

    state.sink.handle_provider_event(event).await?;

    Ok(Json(json!({ "status": "processed" })))
}
