pub mod dispatcher;
pub mod queue;
pub mod repository;
pub mod sessions;

pub use dispatcher::{Dispatcher, HydrationSummary, Requester};
pub use queue::QueueStore;
pub use repository::{ConsultationRepository, InMemoryRepository, SupabaseRepository};
pub use sessions::SessionRegistry;
