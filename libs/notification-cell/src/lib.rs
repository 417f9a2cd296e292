//! Live notification delivery.
//!
//! Authenticated clients hold one WebSocket each. The [`NotificationHub`]
//! actor keeps `identity -> connection` and `role -> identities` and fans
//! published events out without ever blocking on a client:
//!
//! - a newer connection for an identity supersedes the older one
//! - a connection whose buffer is full is disconnected
//! - delivery to an identity with no connection is a silent no-op

pub mod error;
pub mod handlers;
pub mod models;
pub mod router;
pub mod services;

pub use error::HubError;
pub use models::{event_types, Audience, HubSnapshot, Notification};
pub use router::notification_routes;
pub use services::NotificationHub;
