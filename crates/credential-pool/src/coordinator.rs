//! Pool coordinator: singleton ownership, leasing, selection, stats
//!
//! Exactly one coordinator per deployment owns credential state. Ownership
//! is a runtime fact in the shared store — a `coordinator:running` marker
//! written set-if-absent with a TTL and renewed by the health loop — not a
//! compile-time guarantee. A second process that finds the marker gets
//! [`InitOutcome::AlreadyRunning`] back, which is a value, not an error.
//!
//! Checkout is a short-interval polling loop: score every registered,
//! healthy, unleased instance by calls-in-window, then attempt an atomic
//! set-if-absent lease in ascending score order. Losers keep polling until
//! the caller's timeout, then get [`Checkout::Unavailable`].

use std::sync::Arc;
use std::time::{Duration, Instant};

use common::Secret;
use coordination::Store;
use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::instance::CredentialInstance;
use crate::window::{CallMarker, RateWindow};

/// Shared-store marker that negotiates singleton ownership.
const RUNNING_KEY: &str = "coordinator:running";

/// Pool tuning knobs.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Exact number of credentials the deployment is provisioned for.
    pub expected_credentials: usize,
    /// Sliding rate-window length.
    pub window: Duration,
    /// Call budget per window — a routing signal, not a gate.
    pub max_calls_per_window: u64,
    /// Lease lifetime; a crashed worker's lease self-expires after this.
    pub lease_ttl: Duration,
    /// Health loop period; also bounds how fresh a health stamp must be.
    pub health_interval: Duration,
    /// Refresh tokens whose remaining lifetime drops below this.
    pub refresh_threshold: Duration,
    /// Quarantine length after a rate-limit error.
    pub cooldown: Duration,
    /// Checkout polling interval.
    pub checkout_poll: Duration,
    /// Pacing delay before each external call.
    pub pace: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            expected_credentials: 3,
            window: Duration::from_secs(900),
            max_calls_per_window: 300,
            lease_ttl: Duration::from_secs(120),
            health_interval: Duration::from_secs(60),
            refresh_threshold: Duration::from_secs(300),
            cooldown: Duration::from_secs(300),
            checkout_poll: Duration::from_millis(100),
            pace: Duration::from_millis(250),
        }
    }
}

/// Result of an initialization attempt.
pub enum InitOutcome {
    /// This process owns the pool.
    Started(Arc<CredentialCoordinator>),
    /// Another process holds the running marker.
    AlreadyRunning,
}

/// Result of a checkout attempt.
pub enum Checkout {
    Leased(Arc<CredentialInstance>),
    /// No instance could be leased within the timeout. A normal result —
    /// callers defer or retry.
    Unavailable,
}

/// Read-only per-instance snapshot for operational visibility.
#[derive(Debug, Clone, Serialize)]
pub struct InstanceStats {
    pub id: String,
    pub busy: bool,
    pub healthy: bool,
    pub calls_in_window: u64,
}

/// Owner of the credential instances.
pub struct CredentialCoordinator {
    instances: Vec<Arc<CredentialInstance>>,
    store: Arc<dyn Store>,
    window: RateWindow,
    cfg: PoolConfig,
    owner_id: String,
}

impl CredentialCoordinator {
    /// Build one instance per configured secret and claim pool ownership.
    ///
    /// Fails with a configuration error when the secret count does not
    /// match the provisioned credential count. Instances are registered in
    /// the store and start healthy-idle.
    pub async fn initialize(
        cfg: PoolConfig,
        secrets: Vec<Secret<String>>,
        store: Arc<dyn Store>,
        http: reqwest::Client,
    ) -> Result<InitOutcome> {
        if cfg.expected_credentials == 0 {
            return Err(Error::Config("expected_credentials must be non-zero".into()));
        }
        if secrets.len() != cfg.expected_credentials {
            return Err(Error::Config(format!(
                "expected {} credentials, got {}",
                cfg.expected_credentials,
                secrets.len()
            )));
        }

        let owner_id = Uuid::new_v4().simple().to_string();
        let claimed = store
            .set_nx(RUNNING_KEY, &owner_id, Some(marker_ttl(&cfg)))
            .await?;
        if !claimed {
            info!("coordinator already running elsewhere, not taking ownership");
            return Ok(InitOutcome::AlreadyRunning);
        }

        let instances: Vec<Arc<CredentialInstance>> = secrets
            .into_iter()
            .enumerate()
            .map(|(i, npsso)| {
                Arc::new(CredentialInstance::new(
                    format!("cred-{i}"),
                    npsso,
                    http.clone(),
                    cfg.pace,
                ))
            })
            .collect();

        for instance in &instances {
            store
                .set(&registered_key(instance.id()), "1", None)
                .await?;
            instance.mark_healthy().await;
        }
        info!(instances = instances.len(), "credential pool initialized");

        let window = RateWindow::new(store.clone(), cfg.window, cfg.max_calls_per_window);
        Ok(InitOutcome::Started(Arc::new(Self {
            instances,
            store,
            window,
            cfg,
            owner_id,
        })))
    }

    pub fn config(&self) -> &PoolConfig {
        &self.cfg
    }

    pub fn rate_window(&self) -> &RateWindow {
        &self.window
    }

    pub fn instances(&self) -> &[Arc<CredentialInstance>] {
        &self.instances
    }

    /// Look up an instance by id.
    pub fn instance(&self, id: &str) -> Result<Arc<CredentialInstance>> {
        self.instances
            .iter()
            .find(|i| i.id() == id)
            .cloned()
            .ok_or_else(|| Error::UnknownInstance(id.to_string()))
    }

    /// Ids of instances currently selectable, with their window loads.
    pub async fn healthy_loads(&self) -> Result<Vec<(String, u64)>> {
        let mut loads = Vec::new();
        for instance in &self.instances {
            if !instance.is_healthy(self.cfg.health_interval).await {
                continue;
            }
            if !self.is_registered(instance.id()).await? {
                continue;
            }
            loads.push((instance.id().to_string(), self.window.count(instance.id()).await?));
        }
        Ok(loads)
    }

    /// Lease the least-loaded healthy instance, polling until `timeout`.
    pub async fn checkout(&self, timeout: Duration) -> Result<Checkout> {
        let deadline = Instant::now() + timeout;
        loop {
            let mut candidates = self.healthy_loads().await?;
            candidates.sort_by_key(|(_, load)| *load);

            for (id, _) in &candidates {
                if self.try_lease(id).await? {
                    metrics::counter!("pool_checkout_total", "outcome" => "leased").increment(1);
                    return Ok(Checkout::Leased(self.instance(id)?));
                }
            }

            let now = Instant::now();
            if now >= deadline {
                metrics::counter!("pool_checkout_total", "outcome" => "unavailable").increment(1);
                debug!(timeout_ms = timeout.as_millis() as u64, "checkout timed out");
                return Ok(Checkout::Unavailable);
            }
            tokio::time::sleep(self.cfg.checkout_poll.min(deadline - now)).await;
        }
    }

    /// Lease one specific instance, polling until `timeout`. Used by
    /// workers pinned to an instance's queue.
    pub async fn checkout_instance(&self, id: &str, timeout: Duration) -> Result<Checkout> {
        let instance = self.instance(id)?;
        let deadline = Instant::now() + timeout;
        loop {
            if instance.is_healthy(self.cfg.health_interval).await
                && self.is_registered(id).await?
                && self.try_lease(id).await?
            {
                metrics::counter!("pool_checkout_total", "outcome" => "leased").increment(1);
                return Ok(Checkout::Leased(instance));
            }

            let now = Instant::now();
            if now >= deadline {
                metrics::counter!("pool_checkout_total", "outcome" => "unavailable").increment(1);
                return Ok(Checkout::Unavailable);
            }
            tokio::time::sleep(self.cfg.checkout_poll.min(deadline - now)).await;
        }
    }

    /// Release a lease. Unconditional and idempotent.
    pub async fn checkin(&self, id: &str) -> Result<()> {
        self.store.del(&lease_key(id)).await?;
        Ok(())
    }

    /// Record one call against an instance's window.
    pub async fn record_call(&self, id: &str) -> Result<CallMarker> {
        self.window.record(id).await
    }

    /// Roll back exactly one recorded call.
    pub async fn rollback_call(&self, marker: &CallMarker) -> Result<()> {
        self.window.rollback(marker).await?;
        Ok(())
    }

    /// Quarantine an instance after a rate-limit error.
    pub async fn quarantine(&self, id: &str) -> Result<()> {
        let instance = self.instance(id)?;
        instance.quarantine(self.cfg.cooldown).await;
        metrics::counter!("pool_quarantine_total").increment(1);
        Ok(())
    }

    /// Per-instance snapshot for the admin surface.
    pub async fn stats(&self) -> Result<Vec<InstanceStats>> {
        let mut stats = Vec::with_capacity(self.instances.len());
        for instance in &self.instances {
            let id = instance.id().to_string();
            stats.push(InstanceStats {
                busy: self.store.get(&lease_key(&id)).await?.is_some(),
                healthy: instance.is_healthy(self.cfg.health_interval).await,
                calls_in_window: self.window.count(&id).await?,
                id,
            });
        }
        Ok(stats)
    }

    /// One health pass: renew the running marker, clear elapsed
    /// quarantines, refresh expiring tokens, evict stale cache entries.
    ///
    /// Refresh failures mark the instance unhealthy and are logged; they
    /// never abort the pass or fail in-flight jobs.
    pub async fn health_cycle(&self) {
        if let Err(e) = self
            .store
            .set(RUNNING_KEY, &self.owner_id, Some(marker_ttl(&self.cfg)))
            .await
        {
            warn!(error = %e, "failed to renew running marker");
        }

        for instance in &self.instances {
            instance.clear_expired_quarantine().await;

            let needs_refresh = match instance.token_remaining().await {
                Some(remaining) => remaining < self.cfg.refresh_threshold,
                // No token yet: minted lazily on first use, not here
                None => false,
            };
            if needs_refresh {
                // refresh() already marks unhealthy and logs on failure
                if instance.refresh().await.is_ok() {
                    instance.mark_healthy().await;
                }
            } else {
                // The stamp must be renewed even when the previous one has
                // already aged past the interval (the ticker period equals
                // the interval, so that happens on normal cycles); only an
                // explicit unhealthy mark or a live quarantine blocks it
                instance.renew_health_stamp().await;
            }

            instance.evict_stale_cache_entries().await;
        }

        metrics::gauge!("pool_instances_total").set(self.instances.len() as f64);
    }

    async fn is_registered(&self, id: &str) -> Result<bool> {
        Ok(self.store.get(&registered_key(id)).await?.is_some())
    }

    async fn try_lease(&self, id: &str) -> Result<bool> {
        let acquired = self
            .store
            .set_nx(&lease_key(id), &self.owner_id, Some(self.cfg.lease_ttl))
            .await?;
        Ok(acquired)
    }
}

fn lease_key(id: &str) -> String {
    format!("lease:{id}")
}

fn registered_key(id: &str) -> String {
    format!("credential:registered:{id}")
}

fn marker_ttl(cfg: &PoolConfig) -> Duration {
    // The marker must outlive a couple of missed health ticks before a
    // standby process may claim ownership
    cfg.health_interval * 3
}
