//! # Transaction Verifier Contract
//!
//! Turns a raw store transaction into a typed verdict. Cryptographic
//! receipt verification itself lives outside this crate - behind this
//! trait - but the verdict contract is pinned here because the engine's
//! safety depends on it:
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                     Verdict Contract                                    │
//! │                                                                         │
//! │  Verified(txn)        → may grant; txn carries the verification state  │
//! │  Unverified{reason}   → PERMANENT for this txn id. Ledgered so it is   │
//! │                         never re-examined; record never mutated.       │
//! │  TransientFailure     → RETRYABLE. Never ledgered, never granted;      │
//! │                         the next restore sees the transaction again.   │
//! │                                                                         │
//! │  Treating TransientFailure as Unverified would permanently burn a      │
//! │  real purchase on a network blip. The two are separate variants so     │
//! │  the engine cannot confuse them.                                       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use futures_util::future::BoxFuture;
use tracing::warn;

use paygate_core::{ProductKind, Transaction, VerificationState};

use crate::config::EntitlementConfig;
use crate::storefront::RawTransaction;

// =============================================================================
// Verification Outcome
// =============================================================================

/// Verdict on one raw transaction.
#[derive(Debug, Clone)]
pub enum VerificationOutcome {
    /// The transaction checks out. The embedded transaction carries the
    /// verification state the verifier assigned (`Verified`, or
    /// `Pending` for a deferred approval that has not resolved).
    Verified(Transaction),

    /// Permanent rejection for this transaction id.
    Unverified { reason: String },

    /// The verifier could not reach a verdict (outage, timeout).
    TransientFailure { reason: String },
}

// =============================================================================
// Verifier Contract
// =============================================================================

/// Transaction verifier collaborator.
///
/// Implementations may be called concurrently; each call is independent.
pub trait TransactionVerifier: Send + Sync {
    /// Verifies one raw transaction.
    fn verify<'a>(&'a self, raw: &'a RawTransaction) -> BoxFuture<'a, VerificationOutcome>;
}

// =============================================================================
// Catalog Verifier
// =============================================================================

/// Catalog-backed verifier adapter.
///
/// Classifies product ids against the configured catalog and stamps the
/// verification state. This adapter trusts the store's payload; a
/// production deployment layers cryptographic receipt checking behind
/// the same trait and only falls back to classification after the
/// signature verdict.
#[derive(Debug, Clone)]
pub struct CatalogVerifier {
    config: EntitlementConfig,
}

impl CatalogVerifier {
    /// Creates a verifier over the given catalog configuration.
    pub fn new(config: EntitlementConfig) -> Self {
        CatalogVerifier { config }
    }
}

impl TransactionVerifier for CatalogVerifier {
    fn verify<'a>(&'a self, raw: &'a RawTransaction) -> BoxFuture<'a, VerificationOutcome> {
        Box::pin(async move {
            let Some(kind) = self.config.classify(&raw.product_id) else {
                warn!(
                    txn_id = %raw.id,
                    product_id = %raw.product_id,
                    "Transaction references a product outside the catalog"
                );
                return VerificationOutcome::Unverified {
                    reason: format!("unknown product id: {}", raw.product_id),
                };
            };

            // Consumables must not smuggle an expiry in; that is the
            // shape of a tampered payload.
            if kind == ProductKind::Consumable && raw.expiry.is_some() {
                warn!(txn_id = %raw.id, "Consumable transaction carries an expiry");
                return VerificationOutcome::Unverified {
                    reason: "consumable transaction carries an expiry".to_string(),
                };
            }

            VerificationOutcome::Verified(Transaction {
                id: raw.id.clone(),
                product_id: raw.product_id.clone(),
                product_kind: kind,
                expiry: raw.expiry,
                verification_state: VerificationState::Verified,
            })
        })
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
