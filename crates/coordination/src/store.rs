//! The atomic coordination primitives
//!
//! Each method is one atomic operation on the shared store. The set of
//! primitives is deliberately closed: plain keys with optional TTL,
//! set-if-absent (the lease/ownership building block), floored counters,
//! sorted time windows with exact-member removal, and FIFO queues.
//!
//! Uses `Pin<Box<dyn Future>>` return types for dyn-compatibility
//! (`Arc<dyn Store>`).

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

/// Errors from store operations.
///
/// The in-memory backend never fails; a networked backend surfaces
/// connectivity problems here.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store backend error: {0}")]
    Backend(String),
}

/// Result alias for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Boxed future returned by every store primitive.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// Atomic key-value, counter, window and queue primitives.
///
/// TTLs are enforced by the store: an expired key behaves as absent for
/// `get` and `set_nx`. Counters are independent of the key space and never
/// expire. Window members are `(timestamp_ms, member)` pairs; removal is by
/// exact member, counting prunes everything older than the given bound.
pub trait Store: Send + Sync {
    /// Read a key. Expired keys read as `None`.
    fn get<'a>(&'a self, key: &'a str) -> StoreFuture<'a, Option<String>>;

    /// Write a key unconditionally, with an optional TTL.
    fn set<'a>(
        &'a self,
        key: &'a str,
        value: &'a str,
        ttl: Option<Duration>,
    ) -> StoreFuture<'a, ()>;

    /// Set a key only if it is absent (or expired). Returns whether the
    /// write happened. This is the lease and ownership-marker primitive.
    fn set_nx<'a>(
        &'a self,
        key: &'a str,
        value: &'a str,
        ttl: Option<Duration>,
    ) -> StoreFuture<'a, bool>;

    /// Delete a key. Returns whether it existed. Idempotent.
    fn del<'a>(&'a self, key: &'a str) -> StoreFuture<'a, bool>;

    /// Increment a counter by one, returning the new value.
    fn incr<'a>(&'a self, key: &'a str) -> StoreFuture<'a, i64>;

    /// Decrement a counter by one, floored at zero, returning the new value.
    fn decr_floor<'a>(&'a self, key: &'a str) -> StoreFuture<'a, i64>;

    /// Read a counter without mutating it. Missing counters read as zero.
    fn counter<'a>(&'a self, key: &'a str) -> StoreFuture<'a, i64>;

    /// Add a timestamped member to a window.
    fn window_add<'a>(
        &'a self,
        key: &'a str,
        member: &'a str,
        timestamp_ms: u64,
    ) -> StoreFuture<'a, ()>;

    /// Remove exactly one member from a window. Returns whether it existed.
    fn window_remove<'a>(&'a self, key: &'a str, member: &'a str) -> StoreFuture<'a, bool>;

    /// Prune window members older than `min_timestamp_ms`, then count the
    /// remainder.
    fn window_count<'a>(&'a self, key: &'a str, min_timestamp_ms: u64) -> StoreFuture<'a, u64>;

    /// Append to the tail of a FIFO queue.
    fn queue_push<'a>(&'a self, key: &'a str, value: &'a str) -> StoreFuture<'a, ()>;

    /// Push onto the head of a FIFO queue, so the value is the next pop.
    /// Used to return a popped value without losing its place.
    fn queue_push_front<'a>(&'a self, key: &'a str, value: &'a str) -> StoreFuture<'a, ()>;

    /// Pop from the head of a FIFO queue.
    fn queue_pop<'a>(&'a self, key: &'a str) -> StoreFuture<'a, Option<String>>;

    /// Current length of a FIFO queue.
    fn queue_len<'a>(&'a self, key: &'a str) -> StoreFuture<'a, u64>;

    /// Remove every key, counter, window and queue whose name starts with
    /// `prefix`. Returns the number of entries removed. Administrative
    /// resets only; never called on the normal dispatch path.
    fn clear_prefix<'a>(&'a self, prefix: &'a str) -> StoreFuture<'a, u64>;
}
