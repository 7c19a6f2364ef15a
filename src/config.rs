use std::env;
use std::net::SocketAddr;
use anyhow::{Context, Result};
use zeroize::{Zeroize, Zeroizing};

/// Minimum length of the QR signing key in bytes.
pub const MIN_SECRET_KEY_BYTES: usize = 32;

/// The application's configuration.
#[derive(Clone)]
pub struct Config {
    /// The URL of the PostgreSQL database.
    pub database_url: String,
    /// The URL of the Redis server.
    pub redis_url: String,
    /// The address the HTTP server binds to.
    pub bind_addr: SocketAddr,
    /// The key used to sign QR check-in tokens.
    pub qr_secret_key: Zeroizing<Vec<u8>>,
    /// How long an issued token stays valid, in seconds.
    pub token_expiry_secs: i64,
    /// Length of the validation rate-limit window, in seconds.
    pub rate_limit_window_secs: u64,
    /// Validation attempts allowed per session within one window.
    pub rate_limit_max_attempts: i64,
    /// Upper bound on a single cache round trip, in milliseconds.
    pub cache_timeout_ms: u64,
    /// Depth of each real-time connection's outbound queue.
    pub connection_buffer: usize,
}

impl Config {
    /// Creates a new `Config` from environment variables.
    ///
    /// # Returns
    ///
    /// A `Result` containing the `Config`.
    pub fn from_env() -> Result<Self> {
        let mut secret_hex = env::var("QR_SECRET_KEY")
            .context("QR_SECRET_KEY must be set (generate with: openssl rand -hex 32)")?;

        let secret_bytes = hex::decode(&secret_hex)
            .context("QR_SECRET_KEY must be valid hexadecimal")?;

        secret_hex.zeroize();

        if secret_bytes.len() < MIN_SECRET_KEY_BYTES {
            anyhow::bail!(
                "QR_SECRET_KEY must be at least {} bytes ({} hex characters)",
                MIN_SECRET_KEY_BYTES,
                MIN_SECRET_KEY_BYTES * 2
            );
        }

        let config = Self {
            database_url: env::var("DATABASE_URL")
                .context("DATABASE_URL must be set")?,
            redis_url: env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string()),
            bind_addr: env::var("BIND_ADDR")
                .unwrap_or_else(|_| "127.0.0.1:3000".to_string())
                .parse()
                .context("Invalid BIND_ADDR")?,
            qr_secret_key: Zeroizing::new(secret_bytes),
            token_expiry_secs: env::var("QR_TOKEN_EXPIRY_SECS")
                .unwrap_or_else(|_| "1800".to_string())
                .parse()
                .context("Invalid QR_TOKEN_EXPIRY_SECS")?,
            rate_limit_window_secs: env::var("QR_RATE_LIMIT_WINDOW_SECS")
                .unwrap_or_else(|_| "60".to_string())
                .parse()
                .context("Invalid QR_RATE_LIMIT_WINDOW_SECS")?,
            rate_limit_max_attempts: env::var("QR_RATE_LIMIT_MAX_ATTEMPTS")
                .unwrap_or_else(|_| "5".to_string())
                .parse()
                .context("Invalid QR_RATE_LIMIT_MAX_ATTEMPTS")?,
            cache_timeout_ms: env::var("CACHE_TIMEOUT_MS")
                .unwrap_or_else(|_| "2000".to_string())
                .parse()
                .context("Invalid CACHE_TIMEOUT_MS")?,
            connection_buffer: env::var("CONNECTION_BUFFER")
                .unwrap_or_else(|_| "64".to_string())
                .parse()
                .context("Invalid CONNECTION_BUFFER")?,
        };

        if config.token_expiry_secs <= 0 {
            anyhow::bail!("QR_TOKEN_EXPIRY_SECS must be positive");
        }
        if config.rate_limit_window_secs == 0 || config.rate_limit_max_attempts <= 0 {
            anyhow::bail!("Rate limit window and attempts must be positive");
        }
        if config.connection_buffer == 0 {
            anyhow::bail!("CONNECTION_BUFFER must be positive");
        }

        Ok(config)
    }
}
