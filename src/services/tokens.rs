//! Issuance, validation, revocation and status of QR check-in tokens.

use chrono::{DateTime, Duration as ChronoDuration};
use rand::RngCore;
use rand::rngs::OsRng;
use std::sync::Arc;
use std::time::Duration;
use zeroize::Zeroizing;

use crate::cache::{self, CacheStore};
use crate::clock::Clock;
use crate::config::Config;
use crate::crypto::token_codec;
use crate::error::{AppError, Result, TokenError};
use crate::models::token::{IssuedToken, NONCE_LEN, TokenClaims, TokenPayload, TokenStatus};
use crate::realtime::hub::EventHub;
use crate::realtime::messages::{QrCodeEvent, ServerMessage, Topic};
use crate::services::rate_limiter::RateLimiter;

/// Tunables for [`TokenService`].
#[derive(Clone, Debug)]
pub struct TokenSettings {
    /// Validity window of an issued token, in seconds.
    pub expiry_secs: i64,
    /// Validation attempts allowed per session within one window.
    pub max_attempts: i64,
    /// Rate-limit window length, in seconds.
    pub window_secs: u64,
    /// Bound on each cache round trip.
    pub cache_timeout: Duration,
}

impl TokenSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            expiry_secs: config.token_expiry_secs,
            max_attempts: config.rate_limit_max_attempts,
            window_secs: config.rate_limit_window_secs,
            cache_timeout: Duration::from_millis(config.cache_timeout_ms),
        }
    }
}

impl Default for TokenSettings {
    fn default() -> Self {
        Self {
            expiry_secs: 30 * 60,
            max_attempts: crate::services::rate_limiter::DEFAULT_MAX_ATTEMPTS,
            window_secs: crate::services::rate_limiter::DEFAULT_WINDOW_SECS,
            cache_timeout: Duration::from_secs(2),
        }
    }
}

/// Owns the lifecycle of QR check-in tokens.
///
/// The cached "active token" per (session, issuer) is a convenience for
/// status queries. [`TokenService::revoke`] only clears that entry: a token
/// already handed out keeps validating until its own expiry.
#[derive(Clone)]
pub struct TokenService {
    cache: Arc<dyn CacheStore>,
    limiter: RateLimiter,
    secret: Arc<Zeroizing<Vec<u8>>>,
    settings: TokenSettings,
    clock: Arc<dyn Clock>,
    hub: EventHub,
}

impl TokenService {
    /// Creates a new `TokenService`.
    pub fn new(
        cache: Arc<dyn CacheStore>,
        clock: Arc<dyn Clock>,
        hub: EventHub,
        secret: Zeroizing<Vec<u8>>,
        settings: TokenSettings,
    ) -> Self {
        let limiter = RateLimiter::new(cache.clone(), settings.max_attempts, settings.window_secs);
        Self {
            cache,
            limiter,
            secret: Arc::new(secret),
            settings,
            clock,
            hub,
        }
    }

    fn active_key(session_id: i64, issuer_id: i64) -> String {
        format!("qr:token:{}:{}", session_id, issuer_id)
    }

    /// Validity window of issued tokens, in seconds.
    pub fn expiry_secs(&self) -> i64 {
        self.settings.expiry_secs
    }

    /// Mints a token for `session_id` and records it as the session's
    /// active token.
    pub async fn issue(&self, session_id: i64, issuer_id: i64) -> Result<IssuedToken> {
        let mut nonce = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce);

        let now = self.clock.now();
        let payload = TokenPayload {
            session_id,
            issuer_id,
            issued_at: now.timestamp(),
            nonce,
        };

        let token = token_codec::encode(&payload, self.secret.as_slice())?;

        cache::within(
            self.settings.cache_timeout,
            "active token write",
            self.cache.set_ex(
                &Self::active_key(session_id, issuer_id),
                &token,
                self.settings.expiry_secs as u64,
            ),
        )
        .await?;

        let expires_at = now + ChronoDuration::seconds(self.settings.expiry_secs);
        tracing::info!("🎫 Generated QR token for session {} (issuer {})", session_id, issuer_id);

        self.hub.publish(
            Topic::Session(session_id),
            ServerMessage::QrCodeUpdate {
                data: QrCodeEvent {
                    session_id,
                    active: true,
                    expires_at: Some(expires_at),
                },
                timestamp: now,
            },
        );

        Ok(IssuedToken {
            token,
            payload,
            expires_at,
            expires_in_seconds: self.settings.expiry_secs,
        })
    }

    /// Structure, signature and age checks. Touches no shared state.
    fn verify(&self, token: &str) -> Result<TokenClaims> {
        let decoded = token_codec::decode(token).map_err(|e| {
            tracing::debug!("QR token rejected: malformed");
            AppError::InvalidToken(e)
        })?;

        if !token_codec::verify(&decoded, self.secret.as_slice())? {
            tracing::warn!(
                "❌ QR token signature mismatch (claimed session {})",
                decoded.payload.session_id
            );
            return Err(TokenError::BadSignature.into());
        }

        let payload = decoded.payload;
        let age = self.clock.unix_seconds() - payload.issued_at;

        if age < 0 {
            tracing::warn!(
                "❌ QR token for session {} issued {}s in the future",
                payload.session_id,
                -age
            );
            return Err(TokenError::Expired.into());
        }

        if age > self.settings.expiry_secs {
            tracing::info!("⌛ QR token for session {} expired {}s ago", payload.session_id, age - self.settings.expiry_secs);
            return Err(TokenError::Expired.into());
        }

        Ok(TokenClaims {
            session_id: payload.session_id,
            issuer_id: payload.issuer_id,
            issued_at: payload.issued_at,
            expires_at: payload.issued_at + self.settings.expiry_secs,
        })
    }

    /// Full validation of a presented token: structure, signature, age,
    /// then one rate-limit attempt against the claimed session.
    pub async fn validate(&self, token: &str) -> Result<TokenClaims> {
        let claims = self.verify(token)?;

        let allowed = cache::within(
            self.settings.cache_timeout,
            "rate limit",
            self.limiter.check_and_increment(claims.session_id),
        )
        .await?;

        if !allowed {
            tracing::warn!("⛔ QR validation rate limit hit for session {}", claims.session_id);
            return Err(TokenError::RateLimited.into());
        }

        tracing::info!("✅ Validated QR token for session {}", claims.session_id);
        Ok(claims)
    }

    /// Forgets the active token for (session, issuer). Returns `false` if
    /// the cache could not be reached.
    pub async fn revoke(&self, session_id: i64, issuer_id: i64) -> bool {
        let deleted = cache::within(
            self.settings.cache_timeout,
            "active token delete",
            self.cache.delete(&Self::active_key(session_id, issuer_id)),
        )
        .await;

        if let Err(e) = deleted {
            tracing::error!("❌ Error revoking QR token for session {}: {}", session_id, e);
            return false;
        }

        tracing::info!("🗑️  Revoked QR token for session {}", session_id);

        self.hub.publish(
            Topic::Session(session_id),
            ServerMessage::QrCodeUpdate {
                data: QrCodeEvent {
                    session_id,
                    active: false,
                    expires_at: None,
                },
                timestamp: self.clock.now(),
            },
        );

        true
    }

    /// Reports whether (session, issuer) has a live token. Re-checks the
    /// cached token without spending a rate-limit attempt.
    pub async fn status(&self, session_id: i64, issuer_id: i64) -> Result<TokenStatus> {
        let cached = cache::within(
            self.settings.cache_timeout,
            "active token read",
            self.cache.get(&Self::active_key(session_id, issuer_id)),
        )
        .await?;

        let Some(token) = cached else {
            return Ok(TokenStatus::inactive("No active QR code for this session"));
        };

        match self.verify(&token) {
            Ok(claims) => Ok(TokenStatus {
                active: true,
                expires_at: DateTime::from_timestamp(claims.expires_at, 0),
                time_remaining: Some(claims.expires_at - self.clock.unix_seconds()),
                message: None,
            }),
            Err(AppError::InvalidToken(_)) => {
                Ok(TokenStatus::inactive("QR code expired or invalid"))
            }
            Err(e) => Err(e),
        }
    }
}
