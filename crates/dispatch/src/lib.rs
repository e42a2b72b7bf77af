//! Priority-tiered job dispatch with per-subject concurrency caps
//!
//! Jobs come from a fixed catalogue, each statically mapped to a priority
//! tier. The dispatcher enforces a per-subject cap on in-flight work:
//! non-urgent jobs past the cap wait in a per-subject FIFO and dispatch
//! automatically as earlier jobs complete. Credential routing is sticky per
//! subject through a TTL-bounded affinity binding, with an anti-thrash
//! penalty so a subject does not ping-pong between credentials.
//!
//! Every dispatched job runs under the retry wrapper in [`retry`], which
//! guarantees exactly one completion call back into the dispatcher no
//! matter how the work ends. A job that skips completion leaks a
//! concurrency slot for its subject permanently.

pub mod dispatcher;
pub mod error;
pub mod job;
pub mod retry;

pub use dispatcher::{Assignment, DispatcherConfig, JobDispatcher};
pub use error::{Error, Result};
pub use job::{Job, JobDescriptor, Tier};
pub use retry::{run_retryable, RetryPolicy, TaskOutcome};
