//! # Sync Error Types
//!
//! Error types for verification, reconciliation, and the service facade.
//!
//! ## Error Taxonomy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Grant Error Categories                             │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │   Entitlement   │  │  Verification   │  │     Transient           │ │
//! │  │                 │  │                 │  │                         │ │
//! │  │  NotEntitled    │  │  Rejected       │  │  Verifier outage,       │ │
//! │  │  (fail closed,  │  │  (permanent,    │  │  timeout (retryable,    │ │
//! │  │   offer         │  │   security-     │  │   zero state change,    │ │
//! │  │   "upgrade")    │  │   relevant)     │  │   offer "try again")    │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐                              │
//! │  │   Storefront    │  │  Persistence    │                              │
//! │  │                 │  │                 │                              │
//! │  │  store listing/ │  │  DbError        │                              │
//! │  │  purchase calls │  │  passthrough    │                              │
//! │  └─────────────────┘  └─────────────────┘                              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! `NotEntitled` and `VerificationRejected` stay distinguishable so a host
//! can offer "upgrade" versus "retry" paths.

use thiserror::Error;

use paygate_core::CoreError;
use paygate_db::DbError;

/// Result type alias for sync operations.
pub type GrantResult<T> = Result<T, GrantError>;

/// Errors surfaced by the service facade and the reconciler.
#[derive(Debug, Error)]
pub enum GrantError {
    /// Entitlement decision failure from the engine (`NotEntitled`).
    /// Fail closed: the gated action must not proceed.
    #[error(transparent)]
    Entitlement(#[from] CoreError),

    /// The verifier permanently rejected a transaction.
    ///
    /// Logged as a potential integrity issue and never silently retried;
    /// the transaction id is ledgered so future syncs skip it.
    #[error("verification rejected: {reason}")]
    VerificationRejected { reason: String },

    /// Verifier outage or timeout. Retryable: no record or ledger change
    /// was made, the next restore will see the transaction again.
    #[error("transient verification failure: {reason}")]
    Transient { reason: String },

    /// The storefront collaborator failed (listing or purchase call).
    #[error("storefront error: {0}")]
    Storefront(String),

    /// Invalid or unreadable configuration.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Persistence failure passthrough.
    #[error(transparent)]
    Db(#[from] DbError),
}

impl GrantError {
    /// Whether the caller may simply try again later.
    ///
    /// Retryable failures are guaranteed to have left record and ledger
    /// untouched.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, GrantError::Transient { .. } | GrantError::Storefront(_))
    }
}
