use redis::aio::ConnectionManager;
use std::sync::Arc;
use std::time::Duration;
use zeroize::Zeroizing;

use crate::cache::{CacheStore, RedisCache};
use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::error::Result;
use crate::realtime::gateway::ConnectionGateway;
use crate::realtime::hub::EventHub;
use crate::repositories::attendance::{AttendanceStore, PgAttendanceStore};
use crate::services::admission::CheckInController;
use crate::services::credentials::{CacheCredentialVerifier, CredentialVerifier};
use crate::services::tokens::{TokenService, TokenSettings};

/// The external systems the service runs against.
pub struct Collaborators {
    pub cache: Arc<dyn CacheStore>,
    pub store: Arc<dyn AttendanceStore>,
    pub credentials: Arc<dyn CredentialVerifier>,
    pub clock: Arc<dyn Clock>,
}

/// The application's state.
#[derive(Clone)]
pub struct AppState {
    /// QR token lifecycle.
    pub tokens: TokenService,
    /// Check-in admission and teacher attendance operations.
    pub checkins: CheckInController,
    /// Real-time connection factory.
    pub gateway: ConnectionGateway,
    /// Bearer credential verification.
    pub credentials: Arc<dyn CredentialVerifier>,
    /// The topic hub shared by every connection.
    pub hub: EventHub,
}

impl AppState {
    /// Creates a new `AppState` backed by PostgreSQL and Redis.
    ///
    /// # Arguments
    ///
    /// * `config` - The application's configuration.
    ///
    /// # Returns
    ///
    /// A `Result` containing the `AppState`.
    pub async fn new(config: &Config) -> Result<Self> {
        let pool = crate::db::create_pool(&config.database_url)?;
        tracing::info!("✅ PostgreSQL Pool initialized with deadpool-postgres");

        let redis_client = redis::Client::open(config.redis_url.as_str())?;
        let redis = ConnectionManager::new(redis_client).await?;
        tracing::info!("✅ Redis Connection Manager initialized (pooled)");

        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let cache: Arc<dyn CacheStore> = Arc::new(RedisCache::new(redis));
        let credentials = Arc::new(CacheCredentialVerifier::new(
            cache.clone(),
            clock.clone(),
            Duration::from_millis(config.cache_timeout_ms),
        ));

        let state = Self::assemble(
            Collaborators {
                cache,
                store: Arc::new(PgAttendanceStore::new(pool)),
                credentials,
                clock,
            },
            config.qr_secret_key.clone(),
            TokenSettings::from_config(config),
            config.connection_buffer,
        );
        tracing::info!(
            "✅ Token service initialized (expiry {}s, {} attempts per {}s)",
            config.token_expiry_secs,
            config.rate_limit_max_attempts,
            config.rate_limit_window_secs
        );

        Ok(state)
    }

    /// Wires the services over the given collaborators.
    pub fn assemble(
        parts: Collaborators,
        secret: Zeroizing<Vec<u8>>,
        settings: TokenSettings,
        connection_buffer: usize,
    ) -> Self {
        let hub = EventHub::new();

        let tokens = TokenService::new(
            parts.cache,
            parts.clock.clone(),
            hub.clone(),
            secret,
            settings,
        );
        let checkins = CheckInController::new(
            tokens.clone(),
            parts.store.clone(),
            hub.clone(),
            parts.clock.clone(),
        );
        let gateway = ConnectionGateway::new(
            hub.clone(),
            parts.credentials.clone(),
            parts.store,
            parts.clock,
            connection_buffer,
        );

        AppState {
            tokens,
            checkins,
            gateway,
            credentials: parts.credentials,
            hub,
        }
    }
}
