pub mod capability;
pub mod livekit;
pub mod webhook;

pub use capability::CapabilityResolver;
pub use livekit::{LiveKitClient, MediaProvider};
pub use webhook::{parse_event, ProviderEventSink, WebhookVerifier};
