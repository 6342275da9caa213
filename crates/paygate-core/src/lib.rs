//! # paygate-core: Pure Entitlement Logic for Paygate
//!
//! This crate is the **heart** of Paygate. It decides whether a metered
//! session may start, spends entitlement when one does, and folds verified
//! purchase events into the record - all as pure functions with zero I/O
//! dependencies.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Paygate Architecture                             │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                 Host Application (UI layer)                     │   │
//! │  │    Session button ──► Paywall ──► Restore button               │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │              paygate-sync (EntitlementService)                  │   │
//! │  │    consume, apply_purchase, restore - serialized                │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │               ★ paygate-core (THIS CRATE) ★                     │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────┐  ┌───────────┐  ┌───────────┐  ┌───────────┐  │   │
//! │  │   │   types   │  │  engine   │  │validation │  │   error   │  │   │
//! │  │   │  Record   │  │ consume   │  │invariants │  │NotEntitled│  │   │
//! │  │   │  Ledger   │  │  grant    │  │  checks   │  │  typed    │  │   │
//! │  │   └───────────┘  └───────────┘  └───────────┘  └───────────┘  │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO DATABASE • NO CLOCK READS • PURE FUNCTIONS       │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │                  paygate-db (Persistence Layer)                 │   │
//! │  │          SQLite record + applied-transaction ledger             │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`types`] - Domain types (EntitlementRecord, Transaction, Tier, etc.)
//! - [`engine`] - Gate evaluation, consumption, grant folding
//! - [`error`] - Domain error types
//! - [`validation`] - Record/transaction invariant checks
//!
//! ## Design Principles
//!
//! 1. **Pure Functions**: Every operation is deterministic - `now` is an
//!    explicit parameter, never read from the system clock
//! 2. **No I/O**: Database, network, file system access is FORBIDDEN here
//! 3. **Fail Closed**: Consumption never succeeds speculatively - the gate
//!    is re-checked in the same step that mutates the record
//! 4. **Explicit Errors**: All errors are typed, never strings or panics
//!
//! ## Example Usage
//!
//! ```rust
//! use chrono::Utc;
//! use paygate_core::EntitlementRecord;
//!
//! let now = Utc::now();
//! let mut record = EntitlementRecord::new(now);
//!
//! // A fresh install gets exactly one free session.
//! assert!(record.can_consume(now));
//! record.consume(now).unwrap();
//! assert!(!record.can_consume(now));
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod engine;
pub mod error;
pub mod types;
pub mod validation;

// =============================================================================
// Re-exports for Convenience
// =============================================================================
// These allow users to do `use paygate_core::EntitlementRecord` instead of
// `use paygate_core::types::EntitlementRecord`

pub use engine::{AccessGate, GrantOutcome};
pub use error::{CoreError, CoreResult, ValidationError};
pub use types::*;

// =============================================================================
// Crate-Level Constants
// =============================================================================

/// Number of sessions granted to a fresh install before any purchase.
///
/// ## Why a constant?
/// The free allowance is a one-shot trial: once consumed it never resets,
/// and once any paid grant lands the free gate is closed for good.
pub const FREE_SESSION_LIMIT: u32 = 1;

/// Fallback subscription window, in days, for a verified subscription
/// transaction that carries no expiry timestamp.
///
/// ## Business Reason
/// Store-side renewal events occasionally omit the expiration date; the
/// subscription is still real, so it is granted a standard monthly window
/// from the moment of application rather than dropped.
pub const DEFAULT_SUBSCRIPTION_DAYS: i64 = 30;
