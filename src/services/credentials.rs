use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::cache::{self, CacheStore};
use crate::clock::Clock;
use crate::error::{AppError, Result};
use crate::models::user::{CredentialRecord, Principal};

/// Maps an opaque bearer credential to the user behind it.
#[async_trait]
pub trait CredentialVerifier: Send + Sync {
    async fn verify(&self, credential: &str) -> Result<Principal>;
}

/// Verifies credentials issued by the login service, which stores one JSON
/// [`CredentialRecord`] per credential at `session:<uuid>` in the shared
/// cache.
#[derive(Clone)]
pub struct CacheCredentialVerifier {
    cache: Arc<dyn CacheStore>,
    clock: Arc<dyn Clock>,
    timeout: Duration,
}

impl CacheCredentialVerifier {
    /// Creates a new `CacheCredentialVerifier`.
    pub fn new(cache: Arc<dyn CacheStore>, clock: Arc<dyn Clock>, timeout: Duration) -> Self {
        Self {
            cache,
            clock,
            timeout,
        }
    }
}

#[async_trait]
impl CredentialVerifier for CacheCredentialVerifier {
    async fn verify(&self, credential: &str) -> Result<Principal> {
        let credential_id = Uuid::parse_str(credential.trim()).map_err(|_| {
            AppError::Authentication("Credential is not a valid session id".to_string())
        })?;
        let key = format!("session:{}", credential_id);

        let raw = cache::within(self.timeout, "credential lookup", self.cache.get(&key))
            .await?
            .ok_or_else(|| AppError::Authentication("Session not found".to_string()))?;

        let record: CredentialRecord = sonic_rs::from_str(&raw).map_err(|e| {
            tracing::warn!("❌ Invalid credential JSON for {}: {}", credential_id, e);
            AppError::Authentication("Invalid session".to_string())
        })?;

        if self.clock.now() > record.expires_at {
            tracing::warn!("❌ Session expired for user: {}", record.user_id);
            let deleted =
                cache::within(self.timeout, "expired credential delete", self.cache.delete(&key))
                    .await;
            if let Err(e) = deleted {
                tracing::debug!("Failed to delete expired session {}: {}", credential_id, e);
            }
            return Err(AppError::Authentication("Session expired".to_string()));
        }

        tracing::debug!("✅ User authenticated: {} ({})", record.user_id, record.role);

        Ok(Principal {
            user_id: record.user_id,
            role: record.role,
        })
    }
}

/// Fixed credential table, for tests and local tooling.
#[derive(Clone, Default)]
pub struct StaticCredentials {
    principals: HashMap<String, Principal>,
}

impl StaticCredentials {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a credential, builder style.
    pub fn with(mut self, credential: &str, principal: Principal) -> Self {
        self.principals.insert(credential.to_string(), principal);
        self
    }
}

#[async_trait]
impl CredentialVerifier for StaticCredentials {
    async fn verify(&self, credential: &str) -> Result<Principal> {
        self.principals
            .get(credential)
            .copied()
            .ok_or_else(|| AppError::Authentication("Unknown credential".to_string()))
    }
}
