use std::env;
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub supabase_url: String,
    pub supabase_anon_key: String,
    pub supabase_jwt_secret: String,
    pub livekit_url: String,
    pub livekit_api_key: String,
    pub livekit_api_secret: String,
    pub queue_average_session_minutes: u32,
    pub dispatch_lock_timeout_ms: u64,
    pub storage_timeout_ms: u64,
    pub storage_read_retries: u32,
    pub hub_mailbox_capacity: usize,
    pub connection_buffer_capacity: usize,
    pub connection_write_timeout_ms: u64,
    pub media_token_validity_minutes: i64,
    pub port: u16,
}

/// Knobs for the dispatcher's critical section and its persistence calls.
#[derive(Debug, Clone)]
pub struct DispatchPolicy {
    pub average_session_minutes: u32,
    pub lock_timeout: Duration,
    pub storage_timeout: Duration,
    pub storage_read_retries: u32,
}

/// Sizing for the notification hub and its per-connection buffers.
#[derive(Debug, Clone)]
pub struct HubSettings {
    pub mailbox_capacity: usize,
    pub connection_buffer_capacity: usize,
    pub write_timeout: Duration,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let config = Self {
            supabase_url: env::var("SUPABASE_URL")
                .unwrap_or_else(|_| {
                    warn!("SUPABASE_URL not set, falling back to in-memory persistence");
                    String::new()
                }),
            supabase_anon_key: env::var("SUPABASE_ANON_PUBLIC_KEY")
                .unwrap_or_else(|_| {
                    warn!("SUPABASE_ANON_PUBLIC_KEY not set, using empty value");
                    String::new()
                }),
            supabase_jwt_secret: env::var("SUPABASE_JWT_SECRET")
                .unwrap_or_else(|_| {
                    warn!("SUPABASE_JWT_SECRET not set, using empty value");
                    String::new()
                }),
            livekit_url: env::var("LIVEKIT_URL")
                .unwrap_or_else(|_| {
                    warn!("LIVEKIT_URL not set, using local development server");
                    "ws://localhost:7880".to_string()
                }),
            livekit_api_key: env::var("LIVEKIT_API_KEY")
                .unwrap_or_else(|_| {
                    warn!("LIVEKIT_API_KEY not set, using development key");
                    "devkey".to_string()
                }),
            livekit_api_secret: env::var("LIVEKIT_API_SECRET")
                .unwrap_or_else(|_| {
                    warn!("LIVEKIT_API_SECRET not set, using development secret");
                    "secret".to_string()
                }),
            queue_average_session_minutes: env_or("QUEUE_AVERAGE_SESSION_MINUTES", 15),
            dispatch_lock_timeout_ms: env_or("DISPATCH_LOCK_TIMEOUT_MS", 2_000),
            storage_timeout_ms: env_or("STORAGE_TIMEOUT_MS", 5_000),
            storage_read_retries: env_or("STORAGE_READ_RETRIES", 3),
            hub_mailbox_capacity: env_or("HUB_MAILBOX_CAPACITY", 1_024),
            connection_buffer_capacity: env_or("CONNECTION_BUFFER_CAPACITY", 256),
            connection_write_timeout_ms: env_or("CONNECTION_WRITE_TIMEOUT_MS", 10_000),
            media_token_validity_minutes: env_or("MEDIA_TOKEN_VALIDITY_MINUTES", 120),
            port: env_or("PORT", 3000),
        };

        if !config.is_configured() {
            warn!("Application not fully configured - missing environment variables");
        }

        config
    }

    pub fn is_configured(&self) -> bool {
        !self.supabase_jwt_secret.is_empty()
    }

    pub fn is_persistence_configured(&self) -> bool {
        !self.supabase_url.is_empty() && !self.supabase_anon_key.is_empty()
    }

    pub fn is_video_conferencing_configured(&self) -> bool {
        !self.livekit_url.is_empty()
            && !self.livekit_api_key.is_empty()
            && !self.livekit_api_secret.is_empty()
    }

    pub fn dispatch_policy(&self) -> DispatchPolicy {
        DispatchPolicy {
            average_session_minutes: self.queue_average_session_minutes,
            lock_timeout: Duration::from_millis(self.dispatch_lock_timeout_ms),
            storage_timeout: Duration::from_millis(self.storage_timeout_ms),
            storage_read_retries: self.storage_read_retries,
        }
    }

    pub fn hub_settings(&self) -> HubSettings {
        HubSettings {
            mailbox_capacity: self.hub_mailbox_capacity.max(1),
            connection_buffer_capacity: self.connection_buffer_capacity.max(1),
            write_timeout: Duration::from_millis(self.connection_write_timeout_ms),
        }
    }
}

impl Default for DispatchPolicy {
    fn default() -> Self {
        Self {
            average_session_minutes: 15,
            lock_timeout: Duration::from_secs(2),
            storage_timeout: Duration::from_secs(5),
            storage_read_retries: 3,
        }
    }
}

impl Default for HubSettings {
    fn default() -> Self {
        Self {
            mailbox_capacity: 1_024,
            connection_buffer_capacity: 256,
            write_timeout: Duration::from_secs(10),
        }
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    match env::var(key) {
        Ok(raw) => raw.parse().unwrap_or_else(|_| {
            warn!("{} has an invalid value {:?}, using default", key, raw);
            default
        }),
        Err(_) => default,
    }
}
