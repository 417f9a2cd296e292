pub mod connection;
pub mod hub;

pub use connection::{serve_connection, ClientFrame, ServerFrame};
pub use hub::{NotificationHub, Registration};
