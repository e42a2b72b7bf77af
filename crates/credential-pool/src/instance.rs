//! One credential instance
//!
//! Holds the NPSSO secret, the lazily built API client (one per instance,
//! rebuilt only on token refresh), a small per-subject resolution cache
//! with TTL eviction, and the health/refresh/quarantine timestamps the
//! coordinator reads during selection.
//!
//! All mutation happens through the coordinator and health loop on the
//! instance's own data; nothing mutates across instances.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use common::Secret;
use psn_api::PsnClient;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};

/// How long a cached subject resolution (online id → account id) stays
/// valid. Account ids never change, but bounding the cache keeps one
/// instance from accumulating every subject ever routed to it.
const SUBJECT_CACHE_TTL: Duration = Duration::from_secs(3600);

struct CacheEntry {
    account_id: String,
    inserted: Instant,
}

#[derive(Default)]
struct TokenState {
    client: Option<PsnClient>,
    expires_at: Option<Instant>,
}

#[derive(Default)]
struct HealthState {
    last_health: Option<Instant>,
    last_refresh: Option<Instant>,
    quarantined_until: Option<Instant>,
}

/// One external-API identity managed by the coordinator.
pub struct CredentialInstance {
    id: String,
    npsso: Secret<String>,
    fingerprint: String,
    http: reqwest::Client,
    pace: Duration,
    token: RwLock<TokenState>,
    health: RwLock<HealthState>,
    subject_cache: Mutex<HashMap<String, CacheEntry>>,
}

impl CredentialInstance {
    pub fn new(id: String, npsso: Secret<String>, http: reqwest::Client, pace: Duration) -> Self {
        let fingerprint = npsso.fingerprint();
        Self {
            id,
            npsso,
            fingerprint,
            http,
            pace,
            token: RwLock::new(TokenState::default()),
            health: RwLock::new(HealthState::default()),
            subject_cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// One-way fingerprint for audit records and logs.
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    /// The API client, building it (token exchange) on first use.
    ///
    /// The handle lives as long as the token does; refresh replaces it.
    pub async fn client(&self) -> Result<PsnClient> {
        {
            let token = self.token.read().await;
            if let (Some(client), Some(expires_at)) = (&token.client, token.expires_at)
                && Instant::now() < expires_at
            {
                return Ok(client.clone());
            }
        }
        self.refresh().await?;
        let token = self.token.read().await;
        token
            .client
            .clone()
            .ok_or_else(|| Error::Refresh(format!("{}: no client after refresh", self.id)))
    }

    /// Exchange the NPSSO for a fresh access token and rebuild the client.
    ///
    /// Failure zeroes the health timestamp so selection skips this instance
    /// until a later health cycle succeeds.
    pub async fn refresh(&self) -> Result<()> {
        match psn_api::exchange_npsso(&self.http, self.npsso.expose()).await {
            Ok(token) => {
                let mut state = self.token.write().await;
                state.client = Some(PsnClient::new(
                    self.http.clone(),
                    token.access_token,
                    self.pace,
                ));
                state.expires_at = Some(Instant::now() + Duration::from_secs(token.expires_in));
                drop(state);

                let mut health = self.health.write().await;
                health.last_refresh = Some(Instant::now());
                health.last_health = Some(Instant::now());
                info!(credential = %self.id, "token refreshed");
                Ok(())
            }
            Err(e) => {
                self.mark_unhealthy().await;
                warn!(credential = %self.id, error = %e, "token refresh failed, marked unhealthy");
                Err(Error::Refresh(format!("{}: {e}", self.id)))
            }
        }
    }

    /// Remaining lifetime of the current access token, if one exists.
    pub async fn token_remaining(&self) -> Option<Duration> {
        let token = self.token.read().await;
        token
            .expires_at
            .map(|at| at.saturating_duration_since(Instant::now()))
    }

    /// Whether this instance is selectable: not quarantined, with a health
    /// stamp fresh within `health_interval`.
    pub async fn is_healthy(&self, health_interval: Duration) -> bool {
        let health = self.health.read().await;
        if let Some(until) = health.quarantined_until
            && Instant::now() < until
        {
            return false;
        }
        health
            .last_health
            .is_some_and(|at| at.elapsed() < health_interval)
    }

    pub async fn mark_healthy(&self) {
        let mut health = self.health.write().await;
        health.last_health = Some(Instant::now());
    }

    /// Zero the health timestamp. The instance stays out of selection until
    /// a health cycle stamps it again.
    pub async fn mark_unhealthy(&self) {
        let mut health = self.health.write().await;
        health.last_health = None;
    }

    /// Refresh the health timestamp unless the instance was explicitly
    /// marked unhealthy (zeroed stamp) or is under quarantine. Returns
    /// whether the stamp was renewed.
    ///
    /// The health loop calls this every cycle: stamp age tracks loop
    /// liveness, not instance state, so an idle instance must be
    /// re-stamped even when its previous stamp has already lapsed.
    pub async fn renew_health_stamp(&self) -> bool {
        let mut health = self.health.write().await;
        if health.last_health.is_none() {
            return false;
        }
        if let Some(until) = health.quarantined_until
            && Instant::now() < until
        {
            return false;
        }
        health.last_health = Some(Instant::now());
        true
    }

    /// Rate-limit quarantine for the given cooldown.
    pub async fn quarantine(&self, cooldown: Duration) {
        let mut health = self.health.write().await;
        health.quarantined_until = Some(Instant::now() + cooldown);
        info!(credential = %self.id, cooldown_secs = cooldown.as_secs(), "credential quarantined");
    }

    /// Clear an elapsed quarantine. Returns whether anything changed.
    pub async fn clear_expired_quarantine(&self) -> bool {
        let mut health = self.health.write().await;
        match health.quarantined_until {
            Some(until) if Instant::now() >= until => {
                health.quarantined_until = None;
                health.last_health = Some(Instant::now());
                info!(credential = %self.id, "quarantine elapsed, credential available again");
                true
            }
            _ => false,
        }
    }

    /// Cached account id for a subject, if still within TTL.
    pub async fn cached_account_id(&self, online_id: &str) -> Option<String> {
        let cache = self.subject_cache.lock().await;
        cache
            .get(online_id)
            .filter(|e| e.inserted.elapsed() < SUBJECT_CACHE_TTL)
            .map(|e| e.account_id.clone())
    }

    /// Remember a subject resolution on this instance.
    pub async fn cache_account_id(&self, online_id: &str, account_id: &str) {
        let mut cache = self.subject_cache.lock().await;
        cache.insert(
            online_id.to_string(),
            CacheEntry {
                account_id: account_id.to_string(),
                inserted: Instant::now(),
            },
        );
    }

    /// Drop cache entries past the TTL. Called by the health loop.
    pub async fn evict_stale_cache_entries(&self) -> usize {
        let mut cache = self.subject_cache.lock().await;
        let before = cache.len();
        cache.retain(|_, e| e.inserted.elapsed() < SUBJECT_CACHE_TTL);
        let evicted = before - cache.len();
        if evicted > 0 {
            debug!(credential = %self.id, evicted, "evicted stale subject cache entries");
        }
        evicted
    }

    /// Unix-less snapshot of refresh recency, for stats.
    pub async fn last_refresh_age(&self) -> Option<Duration> {
        let health = self.health.read().await;
        health.last_refresh.map(|at| at.elapsed())
    }
}
