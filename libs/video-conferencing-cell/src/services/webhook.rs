use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use shared_config::AppConfig;
use shared_models::error::AppError;

use crate::error::VideoConferencingError;
use crate::models::{ProviderEvent, RecordingFile};

/// Whatever turns verified provider events into session state changes.
#[async_trait]
pub trait ProviderEventSink: Send + Sync {
    async fn handle_provider_event(&self, event: ProviderEvent) -> Result<(), AppError>;
}

#[derive(Debug, Deserialize)]
struct WebhookClaims {
    sha256: String,
}

/// Checks that a webhook body was signed by our LiveKit project: the
/// `Authorization` header is a JWT signed with the API secret whose `sha256`
/// claim is the base64 SHA-256 of the raw body.
#[derive(Clone)]
pub struct WebhookVerifier {
    api_key: String,
    api_secret: String,
}

impl WebhookVerifier {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            api_key: config.livekit_api_key.clone(),
            api_secret: config.livekit_api_secret.clone(),
        }
    }

    pub fn verify(&self, authorization: Option<&str>, body: &[u8]) -> Result<(), VideoConferencingError> {
        let token = authorization
            .map(|value| value.strip_prefix("Bearer ").unwrap_or(value).trim())
            .filter(|token| !token.is_empty())
            .ok_or_else(|| rejected("missing authorization"))?;

        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[self.api_key.as_str()]);

        let claims = decode::<WebhookClaims>(
            token,
            &DecodingKey::from_secret(self.api_secret.as_bytes()),
            &validation,
        )
        .map_err(|e| rejected(e.to_string()))?
        .claims;

        let digest = general_purpose::STANDARD.encode(Sha256::digest(body));
        if claims.sha256 != digest {
            warn!("Webhook body hash mismatch");
            return Err(rejected("body hash mismatch"));
        }

        Ok(())
    }
}

fn rejected(message: impl Into<String>) -> VideoConferencingError {
    VideoConferencingError::InvalidWebhookSignature {
        message: message.into(),
    }
}

/// Decodes a webhook body. Events we act on must carry every field we need;
/// a missing or mistyped field is `MalformedEvent`, never a default.
pub fn parse_event(body: &[u8]) -> Result<ProviderEvent, VideoConferencingError> {
    let value: Value = serde_json::from_slice(body)
        .map_err(|e| VideoConferencingError::malformed(format!("body is not JSON: {}", e)))?;

    let event = require_str(&value, &["event"], "event")?;

    let parsed = match event.as_str() {
        "room_started" => ProviderEvent::RoomStarted {
            room_name: room_name(&value)?,
        },
        "room_finished" => ProviderEvent::RoomFinished {
            room_name: room_name(&value)?,
        },
        "recording_started" | "egress_started" => {
            let info = egress_info(&value)?;
            ProviderEvent::RecordingStarted {
                egress_id: require_str(info, &["egress_id", "egressId"], "egress_info.egress_id")?,
                room_name: require_str(info, &["room_name", "roomName"], "egress_info.room_name")?,
            }
        }
        "recording_ended" | "egress_ended" => {
            let info = egress_info(&value)?;
            let file = field(info, &["file"])
                .or_else(|| {
                    field(info, &["file_results", "fileResults"])
                        .and_then(|results| results.get(0))
                })
                .ok_or_else(|| VideoConferencingError::malformed("egress_info.file missing"))?;

            ProviderEvent::RecordingEnded {
                egress_id: require_str(info, &["egress_id", "egressId"], "egress_info.egress_id")?,
                room_name: field(info, &["room_name", "roomName"])
                    .and_then(Value::as_str)
                    .map(str::to_string),
                file: RecordingFile {
                    url: require_str(file, &["location", "filepath", "filename"], "file.location")?,
                    size_bytes: require_i64(file, "size")?,
                    duration_seconds: require_i64(file, "duration")?,
                },
            }
        }
        _ => {
            debug!("Ignoring provider event {}", event);
            ProviderEvent::Ignored { event }
        }
    };

    Ok(parsed)
}

fn field<'a>(value: &'a Value, keys: &[&str]) -> Option<&'a Value> {
    keys.iter().find_map(|key| value.get(*key))
}

fn require_str(value: &Value, keys: &[&str], label: &str) -> Result<String, VideoConferencingError> {
    field(value, keys)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .ok_or_else(|| VideoConferencingError::malformed(format!("{} missing or not a string", label)))
}

/// Integers may arrive as JSON numbers or, from protobuf JSON, as strings.
fn require_i64(value: &Value, key: &str) -> Result<i64, VideoConferencingError> {
    let raw = value
        .get(key)
        .ok_or_else(|| VideoConferencingError::malformed(format!("file.{} missing", key)))?;

    raw.as_i64()
        .or_else(|| raw.as_f64().map(|f| f as i64))
        .or_else(|| raw.as_str().and_then(|s| s.parse().ok()))
        .ok_or_else(|| VideoConferencingError::malformed(format!("file.{} is not an integer", key)))
}

fn room_name(value: &Value) -> Result<String, VideoConferencingError> {
    let room = value
        .get("room")
        .filter(|room| room.is_object())
        .ok_or_else(|| VideoConferencingError::malformed("room missing"))?;
    require_str(room, &["name"], "room.name")
}

fn egress_info(value: &Value) -> Result<&Value, VideoConferencingError> {
    field(value, &["egress_info", "egressInfo"])
        .filter(|info| info.is_object())
        .ok_or_else(|| VideoConferencingError::malformed("egress_info missing"))
}
