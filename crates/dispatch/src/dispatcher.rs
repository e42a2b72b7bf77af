//! Job dispatcher: routing, caps, deferral
//!
//! All dispatcher state lives in the shared store under three key
//! families, each mutated only through single-round-trip atomic
//! primitives:
//!
//! - `subject:{id}:inflight` / `subject:{id}:active` / `subject:{id}:deferred`
//!   — per-subject concurrency counter, active marker, deferred FIFO
//! - `affinity:{subject}` — subject → credential binding with a 1h TTL
//! - `affinity:changed:{credential}` — 60s anti-thrash marker
//!
//! Dispatched descriptors land on a per-credential, per-tier queue
//! (`instance:{id}:queue:{tier}`) so a worker pinned to one credential only
//! ever sees that credential's work, drained high tier first.

use std::sync::Arc;

use coordination::Store;
use credential_pool::CredentialCoordinator;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::job::{JobDescriptor, Tier};

/// Dispatcher tuning knobs.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// In-flight cap per subject. The cap bounds dispatch, not submission:
    /// non-urgent jobs past it are deferred, never rejected.
    pub max_jobs_per_subject: u64,
    /// Affinity binding lifetime.
    pub affinity_ttl: std::time::Duration,
    /// How long a credential carries the anti-thrash penalty after losing
    /// a subject's affinity.
    pub penalty_window: std::time::Duration,
    /// Score added to a penalized credential during selection, in
    /// calls-in-window units.
    pub penalty_weight: u64,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            max_jobs_per_subject: 20,
            affinity_ttl: std::time::Duration::from_secs(3600),
            penalty_window: std::time::Duration::from_secs(60),
            penalty_weight: 50,
        }
    }
}

/// Result of a job submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Assignment {
    /// Published to the chosen credential's tier queue.
    Dispatched { instance_id: String },
    /// Subject at cap; queued in its FIFO, dispatched on a later completion.
    Deferred,
    /// No healthy credential to route to. A normal result, not an error.
    Unavailable,
}

/// Per-subject snapshot for the admin surface.
#[derive(Debug, Clone, Serialize)]
pub struct SubjectStats {
    pub subject_id: String,
    pub in_flight: i64,
    pub deferred: u64,
    pub affinity: Option<String>,
}

pub struct JobDispatcher {
    store: Arc<dyn Store>,
    coordinator: Arc<CredentialCoordinator>,
    cfg: DispatcherConfig,
}

impl JobDispatcher {
    pub fn new(
        store: Arc<dyn Store>,
        coordinator: Arc<CredentialCoordinator>,
        cfg: DispatcherConfig,
    ) -> Self {
        Self {
            store,
            coordinator,
            cfg,
        }
    }

    pub fn coordinator(&self) -> &Arc<CredentialCoordinator> {
        &self.coordinator
    }

    /// Pick the credential for a subject's next job.
    ///
    /// An existing affinity binding to a still-healthy credential is reused
    /// without re-scoring. Otherwise every healthy credential is scored by
    /// calls-in-window plus the anti-thrash penalty, the minimum wins, and
    /// the binding is refreshed. `None` means no healthy credential exists
    /// right now.
    pub async fn instance_for_subject(&self, subject_id: &str) -> Result<Option<String>> {
        let previous = self.store.get(&affinity_key(subject_id)).await?;
        if let Some(bound) = &previous
            && self.coordinator.instance(bound).is_ok()
            && self
                .coordinator
                .healthy_loads()
                .await?
                .iter()
                .any(|(id, _)| id == bound)
        {
            return Ok(Some(bound.clone()));
        }

        let mut scored = Vec::new();
        for (id, load) in self.coordinator.healthy_loads().await? {
            let penalized = self.store.get(&penalty_key(&id)).await?.is_some();
            let score = load + if penalized { self.cfg.penalty_weight } else { 0 };
            scored.push((score, id));
        }
        let Some((_, chosen)) = scored.into_iter().min() else {
            return Ok(None);
        };

        if let Some(old) = &previous
            && old != &chosen
        {
            // The credential the subject moved away from gets penalized so
            // routing does not flip straight back
            self.store
                .set(&penalty_key(old), "1", Some(self.cfg.penalty_window))
                .await?;
            debug!(subject = %subject_id, from = %old, to = %chosen, "affinity rebound");
        }
        self.store
            .set(&affinity_key(subject_id), &chosen, Some(self.cfg.affinity_ttl))
            .await?;
        Ok(Some(chosen))
    }

    /// Submit one job. High-tier jobs always dispatch; lower tiers defer
    /// once the subject is at its in-flight cap.
    ///
    /// The slot is reserved by incrementing first and checking the result:
    /// a read-then-increment would let two workers in separate processes
    /// both pass the cap check on a networked store.
    pub async fn assign_job(&self, descriptor: JobDescriptor) -> Result<Assignment> {
        let tier = descriptor.job.tier();
        let subject = descriptor.subject_id.clone();

        let in_flight = self.store.incr(&inflight_key(&subject)).await?;
        if tier != Tier::High && in_flight > self.cfg.max_jobs_per_subject as i64 {
            self.store.decr_floor(&inflight_key(&subject)).await?;
            self.store
                .queue_push(&deferred_key(&subject), &serde_json::to_string(&descriptor)?)
                .await?;
            metrics::counter!("dispatch_jobs_total", "outcome" => "deferred").increment(1);
            debug!(subject = %subject, kind = descriptor.job.kind(), "subject at cap, job deferred");
            return Ok(Assignment::Deferred);
        }

        let Some(instance_id) = self.instance_for_subject(&subject).await? else {
            // Give the reserved slot back; the job was never placed
            self.store.decr_floor(&inflight_key(&subject)).await?;
            metrics::counter!("dispatch_jobs_total", "outcome" => "unavailable").increment(1);
            return Ok(Assignment::Unavailable);
        };

        self.store.set(&active_key(&subject), "1", None).await?;
        self.store
            .queue_push(
                &queue_key(&instance_id, tier),
                &serde_json::to_string(&descriptor)?,
            )
            .await?;
        metrics::counter!("dispatch_jobs_total", "outcome" => "dispatched", "tier" => tier.as_str())
            .increment(1);
        debug!(subject = %subject, kind = descriptor.job.kind(), instance = %instance_id, tier = tier.as_str(), "job dispatched");
        Ok(Assignment::Dispatched { instance_id })
    }

    /// Release one unit of a subject's concurrency.
    ///
    /// Decrements the in-flight counter, floored at zero; at zero the
    /// active marker is cleared. At most one deferred job is popped, in
    /// arrival order, and re-submitted.
    pub async fn complete_job(&self, subject_id: &str) -> Result<()> {
        let remaining = self.store.decr_floor(&inflight_key(subject_id)).await?;
        if remaining == 0 {
            self.store.del(&active_key(subject_id)).await?;
        }

        if let Some(raw) = self.store.queue_pop(&deferred_key(subject_id)).await? {
            let descriptor: JobDescriptor = serde_json::from_str(&raw)?;
            debug!(subject = %subject_id, kind = descriptor.job.kind(), "dispatching deferred job");
            if matches!(self.assign_job(descriptor).await?, Assignment::Unavailable) {
                // No credential to route to right now. Put the descriptor
                // back at the head so it keeps its place and a later
                // completion (or admin action) can drive it through
                self.store
                    .queue_push_front(&deferred_key(subject_id), &raw)
                    .await?;
                warn!(subject = %subject_id, "deferred job could not be routed, requeued");
            }
        }
        Ok(())
    }

    /// Pop the next descriptor for one credential, highest tier first.
    pub async fn pop_job(&self, instance_id: &str) -> Result<Option<JobDescriptor>> {
        for tier in Tier::ALL {
            if let Some(raw) = self.store.queue_pop(&queue_key(instance_id, tier)).await? {
                return Ok(Some(serde_json::from_str(&raw)?));
            }
        }
        Ok(None)
    }

    /// Total queued descriptors across one credential's tier queues.
    pub async fn queue_depth(&self, instance_id: &str) -> Result<u64> {
        let mut depth = 0;
        for tier in Tier::ALL {
            depth += self.store.queue_len(&queue_key(instance_id, tier)).await?;
        }
        Ok(depth)
    }

    /// Snapshot of one subject's concurrency state.
    pub async fn subject_stats(&self, subject_id: &str) -> Result<SubjectStats> {
        Ok(SubjectStats {
            subject_id: subject_id.to_string(),
            in_flight: self.store.counter(&inflight_key(subject_id)).await?,
            deferred: self.store.queue_len(&deferred_key(subject_id)).await?,
            affinity: self.store.get(&affinity_key(subject_id)).await?,
        })
    }

    /// Drop one subject's dispatcher state: counter, active marker,
    /// deferred queue, affinity. Destructive; admin surface only.
    pub async fn clear_subject(&self, subject_id: &str) -> Result<u64> {
        let mut cleared = self
            .store
            .clear_prefix(&format!("subject:{subject_id}:"))
            .await?;
        if self.store.del(&affinity_key(subject_id)).await? {
            cleared += 1;
        }
        info!(subject = %subject_id, cleared, "subject state cleared");
        Ok(cleared)
    }

    /// Wipe all dispatcher, queue, lease and window state. Destructive;
    /// admin surface only, behind explicit confirmation.
    pub async fn reset_shared_state(&self) -> Result<u64> {
        let mut cleared = 0;
        for prefix in ["subject:", "affinity:", "instance:", "lease:", "ratewindow:"] {
            cleared += self.store.clear_prefix(prefix).await?;
        }
        info!(cleared, "shared dispatch state reset");
        Ok(cleared)
    }
}

fn inflight_key(subject_id: &str) -> String {
    format!("subject:{subject_id}:inflight")
}

fn active_key(subject_id: &str) -> String {
    format!("subject:{subject_id}:active")
}

fn deferred_key(subject_id: &str) -> String {
    format!("subject:{subject_id}:deferred")
}

fn affinity_key(subject_id: &str) -> String {
    format!("affinity:{subject_id}")
}

fn penalty_key(credential_id: &str) -> String {
    format!("affinity:changed:{credential_id}")
}

fn queue_key(instance_id: &str, tier: Tier) -> String {
    format!("instance:{instance_id}:queue:{}", tier.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use common::Secret;
    use coordination::MemoryStore;
    use credential_pool::{InitOutcome, PoolConfig};

    use crate::job::Job;

    async fn test_dispatcher(credentials: usize, cfg: DispatcherConfig) -> JobDispatcher {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let secrets = (0..credentials)
            .map(|i| Secret::new(format!("npsso-{i}")))
            .collect();
        let pool_cfg = PoolConfig {
            expected_credentials: credentials,
            ..PoolConfig::default()
        };
        let InitOutcome::Started(coordinator) = CredentialCoordinator::initialize(
            pool_cfg,
            secrets,
            store.clone(),
            reqwest::Client::new(),
        )
        .await
        .unwrap() else {
            panic!("fresh store cannot be already running");
        };
        JobDispatcher::new(store, coordinator, cfg)
    }

    fn low_job(n: u32) -> Job {
        Job::TitleTrophySync {
            account_id: "123".into(),
            np_comm_id: format!("NPWR{n:05}_00"),
        }
    }

    fn descriptor(subject: &str, job: Job) -> JobDescriptor {
        JobDescriptor {
            subject_id: subject.into(),
            job,
        }
    }

    #[tokio::test]
    async fn jobs_defer_at_the_cap_and_auto_dispatch_on_completion() {
        let dispatcher = test_dispatcher(3, DispatcherConfig::default()).await;

        for n in 0..20 {
            let a = dispatcher
                .assign_job(descriptor("subject-a", low_job(n)))
                .await
                .unwrap();
            assert!(matches!(a, Assignment::Dispatched { .. }));
        }
        let stats = dispatcher.subject_stats("subject-a").await.unwrap();
        assert_eq!(stats.in_flight, 20);

        // The 21st defers instead of dispatching
        let a = dispatcher
            .assign_job(descriptor("subject-a", low_job(20)))
            .await
            .unwrap();
        assert_eq!(a, Assignment::Deferred);
        let stats = dispatcher.subject_stats("subject-a").await.unwrap();
        assert_eq!(stats.in_flight, 20);
        assert_eq!(stats.deferred, 1);

        // One completion frees a slot and the deferred job takes it
        dispatcher.complete_job("subject-a").await.unwrap();
        let stats = dispatcher.subject_stats("subject-a").await.unwrap();
        assert_eq!(stats.in_flight, 20);
        assert_eq!(stats.deferred, 0);
    }

    #[tokio::test]
    async fn high_tier_jobs_bypass_the_cap() {
        let dispatcher = test_dispatcher(
            1,
            DispatcherConfig {
                max_jobs_per_subject: 1,
                ..DispatcherConfig::default()
            },
        )
        .await;

        dispatcher
            .assign_job(descriptor("subject-a", low_job(0)))
            .await
            .unwrap();
        let a = dispatcher
            .assign_job(descriptor(
                "subject-a",
                Job::ProfileSync {
                    online_id: "player-a".into(),
                },
            ))
            .await
            .unwrap();
        assert!(matches!(a, Assignment::Dispatched { .. }));
    }

    #[tokio::test]
    async fn deferred_jobs_dispatch_in_arrival_order() {
        let dispatcher = test_dispatcher(
            1,
            DispatcherConfig {
                max_jobs_per_subject: 1,
                ..DispatcherConfig::default()
            },
        )
        .await;

        dispatcher
            .assign_job(descriptor("subject-a", low_job(0)))
            .await
            .unwrap();
        for n in 1..4 {
            assert_eq!(
                dispatcher
                    .assign_job(descriptor("subject-a", low_job(n)))
                    .await
                    .unwrap(),
                Assignment::Deferred
            );
        }

        // Drain the instance queue, completing as a worker would; deferred
        // jobs must come through in submission order
        let mut seen = vec![];
        while let Some(d) = dispatcher.pop_job("cred-0").await.unwrap() {
            seen.push(d.job);
            dispatcher.complete_job("subject-a").await.unwrap();
        }
        assert_eq!(seen, (0..4).map(low_job).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn in_flight_never_goes_negative() {
        let dispatcher = test_dispatcher(1, DispatcherConfig::default()).await;
        dispatcher.complete_job("subject-a").await.unwrap();
        dispatcher.complete_job("subject-a").await.unwrap();
        let stats = dispatcher.subject_stats("subject-a").await.unwrap();
        assert_eq!(stats.in_flight, 0);

        let a = dispatcher
            .assign_job(descriptor("subject-a", low_job(0)))
            .await
            .unwrap();
        assert!(matches!(a, Assignment::Dispatched { .. }));
        dispatcher.complete_job("subject-a").await.unwrap();
        assert_eq!(
            dispatcher.subject_stats("subject-a").await.unwrap().in_flight,
            0
        );
    }

    #[tokio::test]
    async fn unroutable_deferred_job_is_requeued_not_lost() {
        let dispatcher = test_dispatcher(
            1,
            DispatcherConfig {
                max_jobs_per_subject: 1,
                ..DispatcherConfig::default()
            },
        )
        .await;

        dispatcher
            .assign_job(descriptor("subject-a", low_job(0)))
            .await
            .unwrap();
        assert_eq!(
            dispatcher
                .assign_job(descriptor("subject-a", low_job(1)))
                .await
                .unwrap(),
            Assignment::Deferred
        );

        // The pool goes dark before the completion that would release the
        // deferred job
        dispatcher.coordinator().quarantine("cred-0").await.unwrap();
        dispatcher.complete_job("subject-a").await.unwrap();

        let stats = dispatcher.subject_stats("subject-a").await.unwrap();
        assert_eq!(stats.in_flight, 0);
        assert_eq!(
            stats.deferred, 1,
            "an unroutable deferred job must stay queued, not vanish"
        );
    }

    #[tokio::test]
    async fn concurrent_submissions_never_breach_the_cap() {
        let dispatcher = Arc::new(
            test_dispatcher(
                1,
                DispatcherConfig {
                    max_jobs_per_subject: 5,
                    ..DispatcherConfig::default()
                },
            )
            .await,
        );

        let mut handles = vec![];
        for n in 0..12 {
            let d = dispatcher.clone();
            handles.push(tokio::spawn(async move {
                d.assign_job(descriptor("subject-a", low_job(n))).await.unwrap()
            }));
        }
        let mut dispatched = 0;
        let mut deferred = 0;
        for h in handles {
            match h.await.unwrap() {
                Assignment::Dispatched { .. } => dispatched += 1,
                Assignment::Deferred => deferred += 1,
                Assignment::Unavailable => panic!("healthy pool cannot be unavailable"),
            }
        }

        assert_eq!(dispatched, 5);
        assert_eq!(deferred, 7);
        let stats = dispatcher.subject_stats("subject-a").await.unwrap();
        assert_eq!(stats.in_flight, 5, "the cap is a hard bound under contention");
    }

    #[tokio::test]
    async fn affinity_is_sticky_while_the_credential_stays_healthy() {
        let dispatcher = test_dispatcher(3, DispatcherConfig::default()).await;

        let first = dispatcher
            .instance_for_subject("subject-a")
            .await
            .unwrap()
            .unwrap();
        // Load the bound credential heavily; re-scoring would move off it,
        // so only the sticky binding can keep it selected
        for _ in 0..10 {
            dispatcher.coordinator().record_call(&first).await.unwrap();
        }
        let second = dispatcher
            .instance_for_subject("subject-a")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(second, first);
    }

    #[tokio::test]
    async fn routing_leaves_a_quarantined_credential() {
        let dispatcher = test_dispatcher(2, DispatcherConfig::default()).await;

        let first = dispatcher
            .instance_for_subject("subject-a")
            .await
            .unwrap()
            .unwrap();
        dispatcher.coordinator().quarantine(&first).await.unwrap();

        let second = dispatcher
            .instance_for_subject("subject-a")
            .await
            .unwrap()
            .unwrap();
        assert_ne!(second, first);

        let stats = dispatcher.subject_stats("subject-a").await.unwrap();
        assert_eq!(stats.affinity.as_deref(), Some(second.as_str()));
    }

    #[tokio::test]
    async fn no_healthy_credential_means_unavailable() {
        let dispatcher = test_dispatcher(1, DispatcherConfig::default()).await;
        dispatcher.coordinator().quarantine("cred-0").await.unwrap();

        let a = dispatcher
            .assign_job(descriptor("subject-a", low_job(0)))
            .await
            .unwrap();
        assert_eq!(a, Assignment::Unavailable);
        assert_eq!(
            dispatcher.subject_stats("subject-a").await.unwrap().in_flight,
            0,
            "an unroutable job must not consume a slot"
        );
    }

    #[tokio::test]
    async fn pop_drains_higher_tiers_first() {
        let dispatcher = test_dispatcher(1, DispatcherConfig::default()).await;

        dispatcher
            .assign_job(descriptor("subject-a", low_job(0)))
            .await
            .unwrap();
        dispatcher
            .assign_job(descriptor(
                "subject-a",
                Job::ProfileSync {
                    online_id: "player-a".into(),
                },
            ))
            .await
            .unwrap();

        let first = dispatcher.pop_job("cred-0").await.unwrap().unwrap();
        assert_eq!(first.job.tier(), Tier::High);
        let second = dispatcher.pop_job("cred-0").await.unwrap().unwrap();
        assert_eq!(second.job.tier(), Tier::Low);
        assert!(dispatcher.pop_job("cred-0").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn clear_subject_drops_counters_queue_and_affinity() {
        let dispatcher = test_dispatcher(
            1,
            DispatcherConfig {
                max_jobs_per_subject: 1,
                ..DispatcherConfig::default()
            },
        )
        .await;

        dispatcher
            .assign_job(descriptor("subject-a", low_job(0)))
            .await
            .unwrap();
        dispatcher
            .assign_job(descriptor("subject-a", low_job(1)))
            .await
            .unwrap();

        dispatcher.clear_subject("subject-a").await.unwrap();
        let stats = dispatcher.subject_stats("subject-a").await.unwrap();
        assert_eq!(stats.in_flight, 0);
        assert_eq!(stats.deferred, 0);
        assert_eq!(stats.affinity, None);
    }

    #[tokio::test]
    async fn reset_wipes_queues_and_windows() {
        let dispatcher = test_dispatcher(1, DispatcherConfig::default()).await;
        dispatcher
            .assign_job(descriptor("subject-a", low_job(0)))
            .await
            .unwrap();
        dispatcher.coordinator().record_call("cred-0").await.unwrap();

        dispatcher.reset_shared_state().await.unwrap();
        assert!(dispatcher.pop_job("cred-0").await.unwrap().is_none());
        assert_eq!(
            dispatcher
                .coordinator()
                .rate_window()
                .count("cred-0")
                .await
                .unwrap(),
            0
        );
    }
}
