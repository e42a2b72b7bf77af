//! Shared coordination store for psn-sync
//!
//! Workers run in independent processes with no shared memory, so every
//! piece of cross-process state (leases, rate windows, per-subject counters,
//! deferred queues, affinity bindings) lives behind the [`Store`] trait.
//! The trait exposes only atomic primitives; callers never perform a
//! read-modify-write across two round trips.
//!
//! [`MemoryStore`] is the in-process implementation used by single-node
//! deployments and tests. A networked backend implements the same trait.

pub mod memory;
pub mod store;

pub use memory::MemoryStore;
pub use store::{Store, StoreError, StoreFuture};
