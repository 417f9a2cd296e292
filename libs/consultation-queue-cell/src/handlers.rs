use std::sync::Arc;

use axum::{
    extract::{Path, State},
    response::Json,
    Extension,
};
use serde_json::{json, Value};
use tracing::info;
use uuid::Uuid;

use shared_models::{
    auth::{User, UserRole},
    error::AppError,
};

use crate::error::DispatchError;
use crate::models::{AdHocSessionRequest, CallSession, JoinQueueRequest, SessionTokenRequest};
use crate::services::{Dispatcher, Requester};

fn requester(user: &User) -> Result<Requester, AppError> {
    Ok(Requester {
        identity: user.uuid()?,
        role: user.user_role()?,
    })
}

fn require_staff(user: &User) -> Result<Requester, AppError> {
    let requester = requester(user)?;
    if !requester.role.is_staff_like() {
        return Err(AppError::Forbidden("Staff access required".to_string()));
    }
    Ok(requester)
}

/// Participants and staff-like roles may see or close a session.
fn ensure_can_manage(requester: &Requester, session: &CallSession) -> Result<(), AppError> {
    if requester.role == UserRole::Admin || session.involves(requester.identity) {
        return Ok(());
    }
    Err(DispatchError::NotParticipant.into())
}

// ==============================================================================
// QUEUE
// ==============================================================================

/// `POST /queue/join` - patients join for themselves, staff on a patient's behalf.
pub async fn join_queue(
    State(dispatcher): State<Arc<Dispatcher>>,
    Extension(user): Extension<User>,
    Json(request): Json<JoinQueueRequest>,
) -> Result<Json<Value>, AppError> {
    let requester = requester(&user)?;

    let patient_id = match requester.role {
        UserRole::Patient => match request.patient_id {
            Some(id) if id != requester.identity => {
                return Err(AppError::Forbidden(
                    "Patients can only join the queue for themselves".to_string(),
                ))
            }
            _ => requester.identity,
        },
        UserRole::Staff | UserRole::Admin => request.patient_id.ok_or_else(|| {
            AppError::BadRequest("patient_id is required".to_string())
        })?,
        UserRole::Family => {
            return Err(AppError::Forbidden(
                "Family members cannot join the queue".to_string(),
            ))
        }
    };

    let ranked = dispatcher
        .enqueue(patient_id, request.priority, request.reason, request.notes)
        .await?;

    Ok(Json(json!({
        "success": true,
        "entry": ranked,
    })))
}

/// `GET /queue` - full ordered queue with stats.
pub async fn list_queue(
    State(dispatcher): State<Arc<Dispatcher>>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    require_staff(&user)?;
    let listing = dispatcher.list_queue().await?;
    Ok(Json(json!(listing)))
}

/// `GET /queue/me`
pub async fn my_queue_status(
    State(dispatcher): State<Arc<Dispatcher>>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    let requester = requester(&user)?;
    let ranked = dispatcher.queue_status(requester.identity).await?;
    Ok(Json(json!(ranked)))
}

/// `POST /queue/{entry_id}/cancel`
pub async fn cancel_queue_entry(
    State(dispatcher): State<Arc<Dispatcher>>,
    Extension(user): Extension<User>,
    Path(entry_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let requester = requester(&user)?;
    let entry = dispatcher.cancel_entry(entry_id, requester).await?;

    Ok(Json(json!({
        "success": true,
        "entry": entry,
    })))
}

// ==============================================================================
// DISPATCH
// ==============================================================================

/// `POST /dispatch/next` - claim the head of the queue. An empty queue is an
/// ordinary outcome, not an error.
pub async fn assign_next(
    State(dispatcher): State<Arc<Dispatcher>>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    let staff = require_staff(&user)?;

    match dispatcher.assign_next(staff.identity).await {
        Ok(session) => Ok(Json(json!({
            "queue_empty": false,
            "session": session,
        }))),
        Err(DispatchError::QueueEmpty) => {
            info!("Staff {} polled an empty queue", staff.identity);
            Ok(Json(json!({
                "queue_empty": true,
                "session": null,
            })))
        }
        Err(e) => Err(e.into()),
    }
}

/// `POST /dispatch/{entry_id}/assign`
pub async fn assign_entry(
    State(dispatcher): State<Arc<Dispatcher>>,
    Extension(user): Extension<User>,
    Path(entry_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let staff = require_staff(&user)?;
    let session = dispatcher.assign_specific(entry_id, staff.identity).await?;
    Ok(Json(json!({ "session": session })))
}

/// `POST /dispatch/ad-hoc`
pub async fn start_ad_hoc(
    State(dispatcher): State<Arc<Dispatcher>>,
    Extension(user): Extension<User>,
    Json(request): Json<AdHocSessionRequest>,
) -> Result<Json<Value>, AppError> {
    let staff = require_staff(&user)?;
    let session = dispatcher
        .start_ad_hoc(request.patient_id, staff.identity)
        .await?;
    Ok(Json(json!({ "session": session })))
}

// ==============================================================================
// SESSIONS
// ==============================================================================

/// `GET /sessions/active`
pub async fn list_active_sessions(
    State(dispatcher): State<Arc<Dispatcher>>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    require_staff(&user)?;
    let sessions = dispatcher.list_active_sessions().await?;
    Ok(Json(json!({
        "total": sessions.len(),
        "sessions": sessions,
    })))
}

/// `GET /sessions/{session_id}`
pub async fn get_session(
    State(dispatcher): State<Arc<Dispatcher>>,
    Extension(user): Extension<User>,
    Path(session_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let requester = requester(&user)?;
    let session = dispatcher.get_session(session_id).await?;
    ensure_can_manage(&requester, &session)?;
    Ok(Json(json!(session)))
}

/// `POST /sessions/{session_id}/end`
pub async fn end_session(
    State(dispatcher): State<Arc<Dispatcher>>,
    Extension(user): Extension<User>,
    Path(session_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let requester = requester(&user)?;
    let session = dispatcher.get_session(session_id).await?;
    ensure_can_manage(&requester, &session)?;

    let ended = dispatcher.end_session(session_id).await?;
    Ok(Json(json!({
        "success": true,
        "session": ended,
    })))
}

/// `POST /sessions/{session_id}/cancel`
pub async fn cancel_session(
    State(dispatcher): State<Arc<Dispatcher>>,
    Extension(user): Extension<User>,
    Path(session_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let requester = requester(&user)?;
    let session = dispatcher.get_session(session_id).await?;
    ensure_can_manage(&requester, &session)?;

    let cancelled = dispatcher.cancel_session(session_id).await?;
    Ok(Json(json!({
        "success": true,
        "session": cancelled,
    })))
}

/// `POST /sessions/{session_id}/token` - media credentials for the room.
pub async fn session_token(
    State(dispatcher): State<Arc<Dispatcher>>,
    Extension(user): Extension<User>,
    Path(session_id): Path<Uuid>,
    request: Option<Json<SessionTokenRequest>>,
) -> Result<Json<Value>, AppError> {
    let requester = requester(&user)?;
    let observer = request.map(|Json(r)| r.observer).unwrap_or_default();

    let token = dispatcher
        .issue_session_token(session_id, requester, observer)
        .await?;
    Ok(Json(json!(token)))
}

// ==============================================================================
// RECORDINGS
// ==============================================================================

/// `GET /recordings` - everything the caller's role may see.
pub async fn list_recordings(
    State(dispatcher): State<Arc<Dispatcher>>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    let requester = requester(&user)?;
    let recordings = dispatcher.list_recordings(requester).await?;
    Ok(Json(json!({
        "count": recordings.len(),
        "recordings": recordings,
    })))
}

/// `GET /sessions/{session_id}/recordings`
pub async fn session_recordings(
    State(dispatcher): State<Arc<Dispatcher>>,
    Extension(user): Extension<User>,
    Path(session_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let requester = requester(&user)?;
    let recordings = dispatcher.session_recordings(session_id, requester).await?;
    Ok(Json(json!({
        "count": recordings.len(),
        "recordings": recordings,
    })))
}
