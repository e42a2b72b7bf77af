//! Worker loops: pull descriptors, execute under retry, fan out
//!
//! Each credential instance gets a small pool of workers pinned to its
//! queues. A worker pops the highest-tier descriptor available, runs it as
//! one retryable unit of work, and submits any follow-up descriptors the
//! work produced. Multi-phase sync never loops inline: a profile sync fans
//! out one library page, a library page fans out per-title detail jobs and
//! the next page.
//!
//! An attempt leases a credential for its duration only. The pinned
//! instance is tried first; if it has been quarantined or leased away, the
//! attempt falls back to any healthy credential so a rate-limited
//! credential does not strand its queue.

use std::sync::Arc;
use std::time::{Duration, Instant};

use credential_pool::{Checkout, CredentialInstance};
use dispatch::{
    run_retryable, Assignment, Job, JobDescriptor, JobDispatcher, RetryPolicy, TaskOutcome,
};
use psn_api::{AuditRecord, AuditSink, ErrorClass, TitleListResponse};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::metrics;

/// Page size for library listing calls.
const TITLE_PAGE_SIZE: u32 = 100;

/// How long an idle worker sleeps before polling its queues again.
const IDLE_POLL: Duration = Duration::from_millis(200);

/// Everything a worker needs to execute jobs.
pub struct WorkerContext {
    pub dispatcher: Arc<JobDispatcher>,
    pub policy: RetryPolicy,
    pub checkout_timeout: Duration,
    pub workers_per_credential: usize,
    pub audit: Arc<dyn AuditSink>,
}

/// Spawn the worker pools, one per credential instance.
pub fn spawn_workers(
    ctx: Arc<WorkerContext>,
    shutdown: watch::Receiver<bool>,
) -> Vec<JoinHandle<()>> {
    let mut handles = Vec::new();
    for instance in ctx.dispatcher.coordinator().instances() {
        for slot in 0..ctx.workers_per_credential {
            let ctx = ctx.clone();
            let shutdown = shutdown.clone();
            let instance_id = instance.id().to_string();
            handles.push(tokio::spawn(async move {
                worker_loop(ctx, instance_id, slot, shutdown).await;
            }));
        }
    }
    handles
}

async fn worker_loop(
    ctx: Arc<WorkerContext>,
    instance_id: String,
    slot: usize,
    mut shutdown: watch::Receiver<bool>,
) {
    info!(instance = %instance_id, slot, "worker started");
    loop {
        if *shutdown.borrow() {
            break;
        }
        let next = tokio::select! {
            result = ctx.dispatcher.pop_job(&instance_id) => result,
            _ = shutdown.changed() => continue,
        };
        match next {
            Ok(Some(descriptor)) => {
                if let Err(e) = execute_job(&ctx, &instance_id, descriptor).await {
                    warn!(instance = %instance_id, error = %e, "job execution error");
                }
            }
            Ok(None) => {
                tokio::select! {
                    _ = tokio::time::sleep(IDLE_POLL) => {}
                    _ = shutdown.changed() => {}
                }
            }
            Err(e) => {
                warn!(instance = %instance_id, error = %e, "queue pop failed");
                tokio::time::sleep(IDLE_POLL).await;
            }
        }
    }
    info!(instance = %instance_id, slot, "worker stopped");
}

/// Run one descriptor to a terminal outcome and submit its follow-ups.
async fn execute_job(
    ctx: &Arc<WorkerContext>,
    pinned: &str,
    descriptor: JobDescriptor,
) -> dispatch::Result<()> {
    let kind = descriptor.job.kind();
    let subject = descriptor.subject_id.clone();
    let started = Instant::now();

    let outcome = {
        let dispatcher = ctx.dispatcher.clone();
        let policy = ctx.policy.clone();
        let ctx = ctx.clone();
        let pinned = pinned.to_string();
        run_retryable(&policy, &dispatcher, &subject, move |attempt| {
            let ctx = ctx.clone();
            let pinned = pinned.clone();
            let descriptor = descriptor.clone();
            async move { attempt_job(&ctx, &pinned, &descriptor, attempt).await }
        })
        .await?
    };

    match outcome {
        TaskOutcome::Succeeded {
            value: followups,
            attempts,
        } => {
            metrics::record_job(kind, "succeeded", started.elapsed().as_secs_f64());
            debug!(subject = %subject, kind, attempts, followups = followups.len(), "job succeeded");
            for followup in followups {
                match ctx.dispatcher.assign_job(followup).await? {
                    Assignment::Dispatched { .. } | Assignment::Deferred => {}
                    Assignment::Unavailable => {
                        warn!(subject = %subject, "follow-up could not be routed, dropped");
                    }
                }
            }
        }
        TaskOutcome::Failed { error, attempts } => {
            metrics::record_job(kind, "failed", started.elapsed().as_secs_f64());
            warn!(subject = %subject, kind, attempts, error = %error, "job failed terminally");
        }
    }
    Ok(())
}

/// One attempt: lease, call, account, release.
async fn attempt_job(
    ctx: &Arc<WorkerContext>,
    pinned: &str,
    descriptor: &JobDescriptor,
    attempt: u32,
) -> Result<Vec<JobDescriptor>, psn_api::Error> {
    let coordinator = ctx.dispatcher.coordinator();

    let leased = match coordinator
        .checkout_instance(pinned, ctx.checkout_timeout)
        .await
        .map_err(as_transient)?
    {
        Checkout::Leased(instance) => instance,
        // Pinned instance unavailable (quarantined, unhealthy or leased
        // out): fall back to any credential so the attempt reroutes
        Checkout::Unavailable => match coordinator
            .checkout(ctx.checkout_timeout)
            .await
            .map_err(as_transient)?
        {
            Checkout::Leased(instance) => {
                debug!(pinned = %pinned, rerouted = %instance.id(), attempt, "rerouted off pinned credential");
                instance
            }
            Checkout::Unavailable => {
                return Err(psn_api::Error::Http(
                    "no credential available within checkout timeout".into(),
                ));
            }
        },
    };

    let result = call_api(ctx, &leased, descriptor).await;
    if let Err(e) = coordinator.checkin(leased.id()).await {
        warn!(credential = %leased.id(), error = %e, "checkin failed, lease will expire on its own");
    }
    result
}

/// Execute the external call for one descriptor against a leased
/// credential, with window accounting, audit and rate-limit handling.
async fn call_api(
    ctx: &Arc<WorkerContext>,
    instance: &Arc<CredentialInstance>,
    descriptor: &JobDescriptor,
) -> Result<Vec<JobDescriptor>, psn_api::Error> {
    let coordinator = ctx.dispatcher.coordinator();
    let client = instance
        .client()
        .await
        .map_err(|e| psn_api::Error::TokenExchange(e.to_string()))?;

    let marker = coordinator
        .record_call(instance.id())
        .await
        .map_err(as_transient)?;

    let endpoint = endpoint_label(&descriptor.job);
    let started = Instant::now();
    let result: Result<Vec<JobDescriptor>, psn_api::Error> = match &descriptor.job {
        Job::ProfileSync { online_id } => match client.fetch_profile(online_id).await {
            Ok(profile) => {
                instance
                    .cache_account_id(online_id, &profile.account_id)
                    .await;
                Ok(vec![JobDescriptor {
                    subject_id: descriptor.subject_id.clone(),
                    job: Job::LibrarySync {
                        account_id: profile.account_id,
                        offset: 0,
                    },
                }])
            }
            Err(e) => Err(e),
        },
        Job::LibrarySync { account_id, offset } => client
            .fetch_title_list(account_id, *offset, TITLE_PAGE_SIZE)
            .await
            .map(|page| library_followups(&descriptor.subject_id, account_id, *offset, &page)),
        Job::TitleTrophySync {
            account_id,
            np_comm_id,
        } => client
            .fetch_title_trophies(account_id, np_comm_id)
            .await
            .map(|detail| {
                debug!(
                    subject = %descriptor.subject_id,
                    np_comm_id = %np_comm_id,
                    trophies = detail.trophies.len(),
                    "title trophies synced"
                );
                Vec::new()
            }),
    };
    let latency = started.elapsed();

    let calls_remaining = coordinator
        .rate_window()
        .remaining(instance.id())
        .await
        .unwrap_or(0);
    ctx.audit.record(AuditRecord {
        credential_fingerprint: instance.fingerprint().to_string(),
        subject_id: descriptor.subject_id.clone(),
        endpoint: endpoint.to_string(),
        status: match &result {
            Ok(_) => Some(200),
            Err(e) => error_status(e),
        },
        latency_ms: latency.as_millis() as u64,
        error: result.as_ref().err().map(ToString::to_string),
        calls_remaining,
    });
    metrics::record_psn_call(
        endpoint,
        match &result {
            Ok(_) => "ok",
            Err(e) => e.class().label(),
        },
        latency.as_secs_f64(),
    );

    if let Err(e) = &result
        && e.class() == ErrorClass::RateLimited
    {
        // The call never counted against the provider's budget; take the
        // optimistic window entry back and cool the credential down
        if let Err(re) = coordinator.rollback_call(&marker).await {
            warn!(credential = %instance.id(), error = %re, "window rollback failed");
        }
        if let Err(qe) = coordinator.quarantine(instance.id()).await {
            warn!(credential = %instance.id(), error = %qe, "quarantine failed");
        }
    }

    result
}

/// Follow-up descriptors for one library page: per-title detail jobs plus
/// the next page while more titles remain.
fn library_followups(
    subject_id: &str,
    account_id: &str,
    offset: u32,
    page: &TitleListResponse,
) -> Vec<JobDescriptor> {
    let mut followups: Vec<JobDescriptor> = page
        .trophy_titles
        .iter()
        .map(|title| JobDescriptor {
            subject_id: subject_id.to_string(),
            job: Job::TitleTrophySync {
                account_id: account_id.to_string(),
                np_comm_id: title.np_communication_id.clone(),
            },
        })
        .collect();

    let fetched = offset + page.trophy_titles.len() as u32;
    if fetched < page.total_item_count && !page.trophy_titles.is_empty() {
        followups.push(JobDescriptor {
            subject_id: subject_id.to_string(),
            job: Job::LibrarySync {
                account_id: account_id.to_string(),
                offset: fetched,
            },
        });
    }
    followups
}

fn endpoint_label(job: &Job) -> &'static str {
    match job {
        Job::ProfileSync { .. } => "profile",
        Job::LibrarySync { .. } => "title_list",
        Job::TitleTrophySync { .. } => "title_trophies",
    }
}

fn error_status(error: &psn_api::Error) -> Option<u16> {
    match error {
        psn_api::Error::RateLimited(_) => Some(429),
        psn_api::Error::NotFound(_) => Some(404),
        psn_api::Error::Upstream { status, .. } => Some(*status),
        _ => None,
    }
}

fn as_transient(e: credential_pool::Error) -> psn_api::Error {
    // Coordination failures retry like network failures
    psn_api::Error::Http(e.to_string())
}
