//! Credential pool for PSN sync workers
//!
//! Manages a small fixed set of NPSSO credentials with exclusive TTL-bounded
//! leasing, per-credential sliding-window call accounting, proactive token
//! refresh, and rate-limit quarantine. One coordinator process owns the pool
//! (negotiated through a shared running marker); workers in any process
//! lease credentials through the shared store.
//!
//! Credential lifecycle:
//! 1. `CredentialCoordinator::initialize()` builds one instance per secret
//!    and registers it — instances start healthy-idle
//! 2. A worker calls `checkout()` — least-loaded healthy instance wins an
//!    atomic lease, `Unavailable` after the timeout
//! 3. Calls are recorded in the instance's rate window; a rate-limited
//!    call rolls back exactly its own window entry (other failures still
//!    consumed provider budget and stay counted)
//! 4. A 429 quarantines the instance for the cooldown; the health loop
//!    brings it back and refreshes tokens before they expire
//! 5. `checkin()` (or lease TTL expiry after a crash) frees the instance

pub mod coordinator;
pub mod error;
pub mod health;
pub mod instance;
pub mod window;

pub use coordinator::{Checkout, CredentialCoordinator, InitOutcome, InstanceStats, PoolConfig};
pub use error::{Error, Result};
pub use health::spawn_health_loop;
pub use instance::CredentialInstance;
pub use window::{CallMarker, RateWindow};
