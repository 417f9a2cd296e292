use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use dotenv::dotenv;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::{self, TraceLayer};
use tracing::{info, warn, Level};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod router;

use consultation_queue_cell::{
    ConsultationRepository, Dispatcher, InMemoryRepository, SupabaseRepository,
};
use notification_cell::NotificationHub;
use shared_config::AppConfig;
use shared_database::SupabaseClient;
use video_conferencing_cell::{CapabilityResolver, LiveKitClient, WebhookVerifier};

use crate::router::Services;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Loading Env Vars
    dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,tower_http=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting telehealth dispatch API server");

    // Load configuration
    let config = Arc::new(AppConfig::from_env());

    let repository: Arc<dyn ConsultationRepository> = if config.is_persistence_configured() {
        info!("Persisting queue state to Supabase");
        Arc::new(SupabaseRepository::new(SupabaseClient::new(&config)))
    } else {
        warn!("No database configured, queue state lives in memory only");
        Arc::new(InMemoryRepository::new())
    };

    let media = LiveKitClient::new(&config).context("LiveKit is not configured")?;
    info!("Media provider at {}", media.server_url());

    // The hub actor runs for as long as any handle to it is alive.
    let (hub, _hub_task) = NotificationHub::spawn(config.hub_settings());

    let dispatcher = Arc::new(Dispatcher::new(
        repository,
        Arc::new(media),
        hub.clone(),
        CapabilityResolver::from_minutes(config.media_token_validity_minutes),
        config.dispatch_policy(),
    ));
    dispatcher
        .hydrate()
        .await
        .context("failed to load persisted queue state")?;

    // Set up CORS
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let services = Services {
        config: config.clone(),
        hub,
        dispatcher,
        verifier: WebhookVerifier::new(&config),
    };

    // Build the application router
    let app = router::create_router(services)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(trace::DefaultMakeSpan::new().level(Level::INFO))
                .on_response(trace::DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(cors);

    // Run the server
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    info!("Listening on {}", addr);

    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    axum::serve(listener, app).await?;

    Ok(())
}
