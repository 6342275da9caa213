//! # Error Types
//!
//! Domain-specific error types for paygate-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  paygate-core errors (this file)                                       │
//! │  ├── CoreError        - Entitlement decision failures                  │
//! │  └── ValidationError  - Record/transaction invariant violations        │
//! │                                                                         │
//! │  paygate-db errors (separate crate)                                    │
//! │  └── DbError          - Persistence failures, corrupt stored state     │
//! │                                                                         │
//! │  paygate-sync errors (separate crate)                                  │
//! │  └── GrantError       - Verification / reconciliation failures         │
//! │                                                                         │
//! │  Flow: ValidationError → CoreError → GrantError → host application    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Design Principles
//! 1. Use `thiserror` for derive macros (not manual impl)
//! 2. Errors are enum variants, never String
//! 3. `NotEntitled` is fail-closed: the caller must not start the session

use thiserror::Error;

// =============================================================================
// Core Error
// =============================================================================

/// Entitlement decision errors.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Consumption was attempted with no valid grant.
    ///
    /// ## When This Occurs
    /// - Free allowance already spent and no paid grant applied
    /// - Credits exhausted
    /// - Subscription lapsed with no fallback credits
    ///
    /// Fail-closed: the gated action must not proceed. Distinguishable
    /// from a verification failure so the host can offer "upgrade"
    /// rather than "retry".
    #[error("not entitled: no usable grant for a session")]
    NotEntitled,

    /// Validation error (wraps ValidationError).
    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),
}

// =============================================================================
// Validation Error
// =============================================================================

/// Record/transaction invariant violations.
///
/// Raised by the checks in [`crate::validation`]; a persisted record that
/// fails them is treated as corrupt and reset by the persistence layer.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// A required field is missing or empty.
    #[error("{field} is required")]
    Required { field: String },

    /// A counter exceeded its structural limit.
    #[error("{field} is {value}, must be at most {max}")]
    CountExceedsLimit { field: String, value: u32, max: u32 },

    /// A time-boxed record is missing its expiry timestamp.
    #[error("time-boxed record has no expiry")]
    MissingExpiry,

    /// A non-time-boxed record carries an expiry timestamp.
    #[error("{tier} record carries an expiry")]
    UnexpectedExpiry { tier: String },
}

// =============================================================================
// Result Type Alias
// =============================================================================

/// Convenience type alias for Results with CoreError.
pub type CoreResult<T> = Result<T, CoreError>;

// =============================================================================
// Unit Tests
// =============================================================================
