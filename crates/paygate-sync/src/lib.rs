//! # paygate-sync: Verification + Reconciliation for Paygate
//!
//! Everything between the external store and the persisted entitlement
//! record: the verifier and storefront contracts, the reconciler that
//! folds store transactions into the record, and the serialized
//! [`EntitlementService`] facade the host application talks to.
//!
//! ## Data Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Paygate Sync Flows                               │
//! │                                                                         │
//! │  Session start:                                                        │
//! │    host ──► service.consume() ──► engine (under mutex) ──► paygate-db  │
//! │                                                                         │
//! │  Purchase:                                                             │
//! │    host ──► service.purchase() ──► Storefront ──► Verifier             │
//! │                  └──► engine.grant (under mutex) ──► paygate-db        │
//! │                                                                         │
//! │  Restore:                                                              │
//! │    host ──► service.restore() ──► Storefront.list ──► Verifier (N×     │
//! │    concurrent) ──► fold sequentially (under mutex) ──► persist once    │
//! │                                                                         │
//! │  Every successful mutation ends with one observer notification.        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! - [`service`] - The serialized facade (consume / purchase / restore)
//! - [`reconciler`] - Verification fan-out and grant folding
//! - [`verifier`] - Verifier contract + catalog adapter
//! - [`storefront`] - Store collaborator contract
//! - [`config`] - TOML configuration (catalog, retry tuning, install id)
//! - [`clock`] - Clock contract
//! - [`error`] - Grant error taxonomy

// =============================================================================
// Module Declarations
// =============================================================================

pub mod clock;
pub mod config;
pub mod error;
pub mod reconciler;
pub mod service;
pub mod storefront;
pub mod verifier;

// =============================================================================
// Re-exports
// =============================================================================

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::EntitlementConfig;
pub use error::{GrantError, GrantResult};
pub use reconciler::{Reconciler, RestoreSummary};
pub use service::{
    EntitlementObserver, EntitlementService, EntitlementServiceBuilder, EntitlementSnapshot,
    NoOpObserver, PurchaseOutcome,
};
pub use storefront::{PurchaseFlow, RawTransaction, Storefront};
pub use verifier::{CatalogVerifier, TransactionVerifier, VerificationOutcome};
