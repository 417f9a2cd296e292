//! # Consultation Queue Cell
//!
//! Matches waiting patients to staff and tracks the resulting call sessions.
//!
//! ```text
//! +--------------------------------------------------------------+
//! |  handlers.rs       |  Queue, dispatch, session, recordings   |
//! |  router.rs         |  Route definitions                      |
//! |  models.rs         |  Entries, sessions, requests            |
//! |  services/         |                                         |
//! |    queue.rs        |  Priority-ordered waiting set           |
//! |    sessions.rs     |  Session lookups, active index          |
//! |    dispatcher.rs   |  Serialized state changes + events      |
//! |    repository.rs   |  Durable storage (Supabase / memory)    |
//! +--------------------------------------------------------------+
//! ```
//!
//! Invariants held by the [`Dispatcher`]:
//!
//! - a patient has at most one waiting entry and at most one active session,
//!   never both
//! - a queue entry is assigned at most once
//! - memory is only changed after the repository accepted the write

pub mod error;
pub mod handlers;
pub mod models;
pub mod router;
pub mod services;

pub use error::DispatchError;
pub use models::*;
pub use router::consultation_routes;
pub use services::{
    ConsultationRepository, Dispatcher, HydrationSummary, InMemoryRepository, Requester,
    SupabaseRepository,
};
