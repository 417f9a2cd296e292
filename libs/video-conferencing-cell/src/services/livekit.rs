use async_trait::async_trait;
use chrono::{Duration, Utc};
use jsonwebtoken::{encode, EncodingKey, Header};
use reqwest::{Client, StatusCode};
use serde::Serialize;
use serde_json::json;
use tracing::{debug, error, info};
use uuid::Uuid;

use shared_config::AppConfig;

use crate::error::VideoConferencingError;
use crate::models::{
    room_name_for, AccessTokenClaims, CapabilityGrant, CreateRoomRequest, DeleteRoomRequest,
    MediaToken, RoomHandle, RoomResponse, VideoGrantClaims,
};

const ROOM_EMPTY_TIMEOUT_SECS: u32 = 300;
const ROOM_MAX_PARTICIPANTS: u32 = 10;
const SERVER_TOKEN_TTL_MINUTES: i64 = 10;

/// The external session-media provider as the dispatcher sees it.
#[async_trait]
pub trait MediaProvider: Send + Sync {
    async fn create_room(
        &self,
        session_id: Uuid,
        patient_id: Uuid,
    ) -> Result<RoomHandle, VideoConferencingError>;

    async fn issue_token(
        &self,
        room_name: &str,
        identity: Uuid,
        grant: &CapabilityGrant,
    ) -> Result<MediaToken, VideoConferencingError>;

    async fn end_room(&self, room_name: &str) -> Result<(), VideoConferencingError>;
}

/// LiveKit client: signs access tokens locally and drives the RoomService
/// Twirp API over HTTP.
#[derive(Clone, Debug)]
pub struct LiveKitClient {
    client: Client,
    api_base_url: String,
    server_url: String,
    api_key: String,
    api_secret: String,
}

impl LiveKitClient {
    pub fn new(config: &AppConfig) -> Result<Self, VideoConferencingError> {
        if !config.is_video_conferencing_configured() {
            return Err(VideoConferencingError::NotConfigured);
        }

        Ok(Self {
            client: Client::new(),
            api_base_url: http_base_url(&config.livekit_url),
            server_url: config.livekit_url.clone(),
            api_key: config.livekit_api_key.clone(),
            api_secret: config.livekit_api_secret.clone(),
        })
    }

    pub fn server_url(&self) -> &str {
        &self.server_url
    }

    fn sign(&self, claims: &AccessTokenClaims) -> Result<String, VideoConferencingError> {
        let token = encode(
            &Header::default(),
            claims,
            &EncodingKey::from_secret(self.api_secret.as_bytes()),
        )?;
        Ok(token)
    }

    /// Short-lived token authorizing this service against the RoomService API.
    fn server_token(&self, video: VideoGrantClaims) -> Result<String, VideoConferencingError> {
        let now = Utc::now();
        self.sign(&AccessTokenClaims {
            iss: self.api_key.clone(),
            sub: String::new(),
            nbf: now.timestamp(),
            exp: (now + Duration::minutes(SERVER_TOKEN_TTL_MINUTES)).timestamp(),
            metadata: None,
            video,
        })
    }

    async fn twirp<B: Serialize>(
        &self,
        method: &str,
        body: &B,
        video: VideoGrantClaims,
    ) -> Result<(StatusCode, String), VideoConferencingError> {
        let url = format!("{}/twirp/livekit.RoomService/{}", self.api_base_url, method);
        debug!("Calling LiveKit {}", url);

        let response = self
            .client
            .post(&url)
            .bearer_auth(self.server_token(video)?)
            .json(body)
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;
        Ok((status, text))
    }
}

#[async_trait]
impl MediaProvider for LiveKitClient {
    async fn create_room(
        &self,
        session_id: Uuid,
        patient_id: Uuid,
    ) -> Result<RoomHandle, VideoConferencingError> {
        let name = room_name_for(session_id);
        info!("Creating LiveKit room {}", name);

        let request = CreateRoomRequest {
            name: name.clone(),
            empty_timeout: ROOM_EMPTY_TIMEOUT_SECS,
            max_participants: ROOM_MAX_PARTICIPANTS,
            metadata: json!({
                "type": "healthcare_call",
                "call_id": session_id,
                "patient_id": patient_id,
                "created_at": Utc::now().to_rfc3339(),
            })
            .to_string(),
        };

        let grant = VideoGrantClaims {
            room_create: Some(true),
            ..Default::default()
        };
        let (status, text) = self.twirp("CreateRoom", &request, grant).await?;

        if !status.is_success() {
            error!("LiveKit room creation failed: {} - {}", status, text);
            return Err(VideoConferencingError::ProviderApiError {
                message: format!("HTTP {}: {}", status, text),
            });
        }

        let room: RoomResponse =
            serde_json::from_str(&text).map_err(|e| VideoConferencingError::ProviderApiError {
                message: format!("Failed to parse room response: {}", e),
            })?;

        Ok(RoomHandle {
            name: room.name,
            sid: room.sid,
        })
    }

    async fn issue_token(
        &self,
        room_name: &str,
        identity: Uuid,
        grant: &CapabilityGrant,
    ) -> Result<MediaToken, VideoConferencingError> {
        let claims = AccessTokenClaims {
            iss: self.api_key.clone(),
            sub: identity.to_string(),
            nbf: grant.valid_from.timestamp(),
            exp: grant.valid_until.timestamp(),
            metadata: Some(json!({ "role": grant.role }).to_string()),
            video: VideoGrantClaims {
                room: Some(room_name.to_string()),
                room_join: Some(true),
                room_admin: Some(grant.room_admin),
                room_record: Some(grant.room_record),
                can_publish: Some(grant.can_publish),
                can_subscribe: Some(grant.can_subscribe),
                can_publish_data: Some(grant.can_publish_data),
                hidden: Some(grant.hidden),
                ..Default::default()
            },
        };

        let token = self.sign(&claims)?;
        debug!("Issued {} token for {} in {}", grant.role, identity, room_name);

        Ok(MediaToken {
            token,
            server_url: self.server_url.clone(),
            room_name: room_name.to_string(),
            identity,
            grant: grant.clone(),
        })
    }

    async fn end_room(&self, room_name: &str) -> Result<(), VideoConferencingError> {
        info!("Closing LiveKit room {}", room_name);

        let request = DeleteRoomRequest {
            room: room_name.to_string(),
        };
        let grant = VideoGrantClaims {
            room_create: Some(true),
            ..Default::default()
        };
        let (status, text) = self.twirp("DeleteRoom", &request, grant).await?;

        if status == StatusCode::NOT_FOUND {
            debug!("Room {} already gone", room_name);
            return Ok(());
        }
        if !status.is_success() {
            error!("LiveKit room deletion failed: {} - {}", status, text);
            return Err(VideoConferencingError::ProviderApiError {
                message: format!("HTTP {}: {}", status, text),
            });
        }

        Ok(())
    }
}

/// LiveKit publishes one URL for clients (`ws`/`wss`); its HTTP API lives
/// on the same host.
fn http_base_url(url: &str) -> String {
    let url = url.trim_end_matches('/');
    if let Some(rest) = url.strip_prefix("wss://") {
        format!("https://{}", rest)
    } else if let Some(rest) = url.strip_prefix("ws://") {
        format!("http://{}", rest)
    } else {
        url.to_string()
    }
}
