use thiserror::Error;

use shared_models::error::AppError;

#[derive(Error, Debug)]
pub enum VideoConferencingError {
    #[error("Video conferencing not configured")]
    NotConfigured,

    #[error("Unknown participant role: {0}")]
    UnknownRole(String),

    #[error("Media provider API error: {message}")]
    ProviderApiError { message: String },

    #[error("Failed to sign media token: {message}")]
    TokenSigning { message: String },

    #[error("Webhook signature rejected: {message}")]
    InvalidWebhookSignature { message: String },

    #[error("Malformed provider event: {message}")]
    MalformedEvent { message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl VideoConferencingError {
    pub fn malformed(message: impl Into<String>) -> Self {
        VideoConferencingError::MalformedEvent {
            message: message.into(),
        }
    }
}

impl From<anyhow::Error> for VideoConferencingError {
    fn from(err: anyhow::Error) -> Self {
        VideoConferencingError::Internal {
            message: err.to_string(),
        }
    }
}

impl From<reqwest::Error> for VideoConferencingError {
    fn from(err: reqwest::Error) -> Self {
        VideoConferencingError::ProviderApiError {
            message: err.to_string(),
        }
    }
}

impl From<jsonwebtoken::errors::Error> for VideoConferencingError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        VideoConferencingError::TokenSigning {
            message: err.to_string(),
        }
    }
}

impl From<VideoConferencingError> for AppError {
    fn from(err: VideoConferencingError) -> Self {
        match err {
            VideoConferencingError::UnknownRole(_) => AppError::BadRequest(err.to_string()),
            VideoConferencingError::MalformedEvent { .. } => AppError::BadRequest(err.to_string()),
            VideoConferencingError::InvalidWebhookSignature { .. } => AppError::Auth(err.to_string()),
            VideoConferencingError::ProviderApiError { .. } => {
                AppError::ExternalService(err.to_string())
            }
            VideoConferencingError::NotConfigured
            | VideoConferencingError::TokenSigning { .. }
            | VideoConferencingError::Internal { .. } => AppError::Internal(err.to_string()),
        }
    }
}
