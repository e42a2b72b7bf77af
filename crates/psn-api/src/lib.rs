//! PlayStation Network API client library
//!
//! Provides NPSSO token exchange/refresh, the fixed catalogue of trophy API
//! calls (profile fetch, title listing, per-title trophy detail), upstream
//! error classification, and the append-only audit record seam. This crate
//! is a standalone library with no dependency on the pool or dispatcher —
//! it can be tested and used independently.
//!
//! Call flow:
//! 1. Coordinator calls `token::exchange_npsso()` to mint an access token
//! 2. `PsnClient` issues paced, authenticated calls for an [`Endpoint`]
//! 3. Failures are classified via [`ErrorClass`] for the retry layer
//! 4. Every attempt is reported to an [`AuditSink`]

pub mod audit;
pub mod classify;
pub mod client;
pub mod constants;
pub mod error;
pub mod token;

pub use audit::{AuditRecord, AuditSink, TracingAuditSink};
pub use classify::{ErrorClass, classify_status};
pub use client::{
    Endpoint, ProfileResponse, PsnClient, TitleListResponse, TitleTrophiesResponse, Trophy,
    TrophyTitle,
};
pub use error::{Error, Result};
pub use token::{TokenResponse, exchange_npsso};
