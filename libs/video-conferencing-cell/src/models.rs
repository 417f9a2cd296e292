use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use shared_models::auth::UserRole;

// ==============================================================================
// CAPABILITIES
// ==============================================================================

/// Media permissions for one participant in one room. Derived per token
/// request and never stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilityGrant {
    pub role: UserRole,
    pub can_publish: bool,
    pub can_subscribe: bool,
    pub can_publish_data: bool,
    pub hidden: bool,
    pub room_admin: bool,
    pub room_record: bool,
    pub valid_from: DateTime<Utc>,
    pub valid_until: DateTime<Utc>,
}

impl CapabilityGrant {
    pub fn is_observer(&self) -> bool {
        self.hidden && !self.can_publish
    }
}

// ==============================================================================
// ROOMS & TOKENS
// ==============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomHandle {
    pub name: String,
    pub sid: Option<String>,
}

/// What a client needs to join a room.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaToken {
    pub token: String,
    pub server_url: String,
    pub room_name: String,
    pub identity: Uuid,
    pub grant: CapabilityGrant,
}

pub fn room_name_for(session_id: Uuid) -> String {
    format!("call_{}", session_id)
}

/// `video` claim of a LiveKit access token.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoGrantClaims {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub room: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub room_join: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub room_create: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub room_admin: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub room_record: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub can_publish: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub can_subscribe: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub can_publish_data: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hidden: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessTokenClaims {
    pub iss: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub sub: String,
    pub nbf: i64,
    pub exp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<String>,
    pub video: VideoGrantClaims,
}

#[derive(Debug, Clone, Serialize)]
pub struct CreateRoomRequest {
    pub name: String,
    pub empty_timeout: u32,
    pub max_participants: u32,
    pub metadata: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RoomResponse {
    #[serde(default)]
    pub sid: Option<String>,
    pub name: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct DeleteRoomRequest {
    pub room: String,
}

// ==============================================================================
// PROVIDER EVENTS
// ==============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordingFile {
    pub url: String,
    pub size_bytes: i64,
    pub duration_seconds: i64,
}

/// Webhook events the dispatcher reacts to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderEvent {
    RoomStarted {
        room_name: String,
    },
    RoomFinished {
        room_name: String,
    },
    RecordingStarted {
        room_name: String,
        egress_id: String,
    },
    RecordingEnded {
        egress_id: String,
        room_name: Option<String>,
        file: RecordingFile,
    },
    /// Anything else the provider sends; acknowledged and dropped.
    Ignored {
        event: String,
    },
}

impl ProviderEvent {
    pub fn name(&self) -> &str {
        match self {
            ProviderEvent::RoomStarted { .. } => "room_started",
            ProviderEvent::RoomFinished { .. } => "room_finished",
            ProviderEvent::RecordingStarted { .. } => "recording_started",
            ProviderEvent::RecordingEnded { .. } => "recording_ended",
            ProviderEvent::Ignored { event } => event,
        }
    }
}
