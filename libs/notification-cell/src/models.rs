use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use shared_models::auth::UserRole;

/// Who a published notification is addressed to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Audience {
    All,
    Role(UserRole),
    Identity(Uuid),
}

impl Audience {
    pub fn matches(&self, identity: Uuid, role: UserRole) -> bool {
        match self {
            Audience::All => true,
            Audience::Role(target) => *target == role,
            Audience::Identity(target) => *target == identity,
        }
    }
}

/// Envelope written to clients: `{"type": ..., "data": ..., "timestamp": ...}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: Value,
    pub timestamp: DateTime<Utc>,
}

impl Notification {
    pub fn new(event_type: impl Into<String>, data: Value) -> Self {
        Self {
            event_type: event_type.into(),
            data,
            timestamp: Utc::now(),
        }
    }

    /// Serializes once so fan-out shares a single allocation.
    pub fn to_frame(&self) -> Result<Arc<str>, serde_json::Error> {
        serde_json::to_string(self).map(Arc::from)
    }
}

/// Control message sent by a client over its connection.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientMessage {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub data: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Connecting,
    Registered,
    Unregistering,
    Closed,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct HubSnapshot {
    pub connections: usize,
    pub by_role: HashMap<UserRole, usize>,
}

/// Server -> client event names.
pub mod event_types {
    pub const CALL_STARTED: &str = "call_started";
    pub const CALL_ENDED: &str = "call_ended";
    pub const QUEUE_POSITION: &str = "queue_position";
    pub const QUEUE_UPDATED: &str = "queue_updated";
    pub const AUTH_RESPONSE: &str = "auth_response";
    pub const PONG: &str = "pong";
}
