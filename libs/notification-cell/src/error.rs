use thiserror::Error;
use uuid::Uuid;

use shared_models::error::AppError;

#[derive(Error, Debug)]
pub enum HubError {
    #[error("Notification hub is not running")]
    HubUnavailable,

    #[error("Notification hub mailbox is full")]
    MailboxFull,

    #[error("Delivery to {identity} failed: {reason}")]
    DeliveryFailed { identity: Uuid, reason: String },

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

impl From<HubError> for AppError {
    fn from(err: HubError) -> Self {
        match err {
            HubError::HubUnavailable | HubError::MailboxFull => AppError::Busy(err.to_string()),
            _ => AppError::Internal(err.to_string()),
        }
    }
}
