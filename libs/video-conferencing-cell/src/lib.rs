//! # Video Conferencing Cell
//!
//! Everything that talks to the external session-media provider (LiveKit):
//!
//! - **Capability resolution**: role + observer flag to a [`CapabilityGrant`]
//! - **Rooms and tokens**: [`MediaProvider`] with the [`LiveKitClient`]
//!   implementation (RoomService Twirp API, locally signed access tokens)
//! - **Webhooks**: signature verification and typed [`ProviderEvent`]s,
//!   handed to a [`ProviderEventSink`]
//!
//! ```text
//! +-----------------------------------------------------+
//! |  handlers.rs     |  POST /media/webhook             |
//! |  router.rs       |  Route definitions               |
//! |  models.rs       |  Grants, tokens, provider events |
//! |  services/       |                                  |
//! |    capability.rs |  Role -> permission mapping      |
//! |    livekit.rs    |  LiveKit client                  |
//! |    webhook.rs    |  Verification and parsing        |
//! +-----------------------------------------------------+
//! ```
//!
//! ## Configuration
//!
//! - `LIVEKIT_URL` - client-facing URL; the HTTP API is derived from it
//! - `LIVEKIT_API_KEY` / `LIVEKIT_API_SECRET` - token signing and webhook checks
//! - `MEDIA_TOKEN_VALIDITY_MINUTES` - validity window stamped into grants

pub mod error;
pub mod handlers;
pub mod models;
pub mod router;
pub mod services;

pub use error::VideoConferencingError;
pub use models::{room_name_for, CapabilityGrant, MediaToken, ProviderEvent, RecordingFile, RoomHandle};
pub use services::{CapabilityResolver, LiveKitClient, MediaProvider, ProviderEventSink, WebhookVerifier};

pub use router::media_routes;
