use std::sync::Arc;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};

use shared_config::AppConfig;
use shared_utils::extractor::auth_middleware;

use crate::handlers::*;
use crate::services::Dispatcher;

pub fn consultation_routes(config: Arc<AppConfig>, dispatcher: Arc<Dispatcher>) -> Router {
    Router::new()
        // Queue
        .route("/queue", get(list_queue))
        .route("/queue/join", post(join_queue))
        .route("/queue/me", get(my_queue_status))
        .route("/queue/{entry_id}/cancel", post(cancel_queue_entry))
        // Dispatch
        .route("/dispatch/next", post(assign_next))
        .route("/dispatch/ad-hoc", post(start_ad_hoc))
        .route("/dispatch/{entry_id}/assign", post(assign_entry))
        // Sessions
        .route("/sessions/active", get(list_active_sessions))
        .route("/sessions/{session_id}", get(get_session))
        .route("/sessions/{session_id}/end", post(end_session))
        .route("/sessions/{session_id}/cancel", post(cancel_session))
        .route("/sessions/{session_id}/token", post(session_token))
        .route("/sessions/{session_id}/recordings", get(session_recordings))
        // Recordings
        .route("/recordings", get(list_recordings))
        .layer(middleware::from_fn_with_state(config, auth_middleware))
        .with_state(dispatcher)
}
