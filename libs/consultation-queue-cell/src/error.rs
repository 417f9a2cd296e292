use thiserror::Error;
use uuid::Uuid;

use shared_models::error::AppError;
use video_conferencing_cell::VideoConferencingError;

#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("Patient {0} is already waiting in the queue")]
    AlreadyWaiting(Uuid),

    #[error("Queue entry {0} has already been assigned")]
    AlreadyAssigned(Uuid),

    #[error("Patient {0} already has an active session")]
    AlreadyInSession(Uuid),

    #[error("Session {0} is no longer active")]
    SessionClosed(Uuid),

    #[error("No patients waiting")]
    QueueEmpty,

    #[error("Dispatcher is busy, retry shortly")]
    Busy,

    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("Not a participant of this session")]
    NotParticipant,

    #[error("Patient {0} has not consented to being observed")]
    ObservationNotConsented(Uuid),

    #[error(transparent)]
    Media(#[from] VideoConferencingError),
}

impl DispatchError {
    pub fn entry_not_found(id: Uuid) -> Self {
        DispatchError::NotFound(format!("Queue entry {}", id))
    }

    pub fn session_not_found(id: Uuid) -> Self {
        DispatchError::NotFound(format!("Session {}", id))
    }
}

impl From<DispatchError> for AppError {
    fn from(err: DispatchError) -> Self {
        match err {
            DispatchError::NotFound(_) | DispatchError::QueueEmpty => AppError::NotFound(err.to_string()),
            DispatchError::AlreadyWaiting(_)
            | DispatchError::AlreadyAssigned(_)
            | DispatchError::AlreadyInSession(_)
            | DispatchError::SessionClosed(_) => AppError::Conflict(err.to_string()),
            DispatchError::Busy => AppError::Busy(err.to_string()),
            DispatchError::StorageUnavailable(_) => AppError::Database(err.to_string()),
            DispatchError::NotParticipant | DispatchError::ObservationNotConsented(_) => {
                AppError::Forbidden(err.to_string())
            }
            DispatchError::Media(e) => AppError::from(e),
        }
    }
}
