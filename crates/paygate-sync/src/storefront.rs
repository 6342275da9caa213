//! # Storefront Contract
//!
//! The external store collaborator: the thing that knows which raw
//! transactions the user currently holds and how to run a purchase.
//! Paygate never talks to a store SDK directly - the host application
//! implements this trait over whatever store it ships with.

use chrono::{DateTime, Utc};
use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};

use crate::error::GrantResult;

/// An unverified purchase/renewal event as produced by the store.
///
/// Raw means untrusted: nothing here is believed until the verifier has
/// ruled on it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawTransaction {
    /// Stable unique identifier assigned by the store.
    pub id: String,

    /// Store product identifier.
    pub product_id: String,

    /// Expiry timestamp, if the store supplied one (subscriptions).
    pub expiry: Option<DateTime<Utc>>,

    /// When the store says the purchase happened.
    pub purchased_at: DateTime<Utc>,
}

/// Outcome of a user-initiated purchase flow.
///
/// ## Cancellation
/// A user may abandon the purchase before it completes. That has no
/// effect on the entitlement record - no reservation or pending-credit
/// bookkeeping is held anywhere, so cancellation needs no compensating
/// action.
#[derive(Debug, Clone)]
pub enum PurchaseFlow {
    /// The store produced a transaction; it still needs verification.
    Completed(RawTransaction),
    /// The user backed out before completion.
    Cancelled,
    /// The purchase needs external approval (e.g. family approval) and
    /// will surface through a later restore once it resolves.
    Pending,
}

/// External store collaborator.
pub trait Storefront: Send + Sync {
    /// Lists the raw transactions the user currently holds.
    ///
    /// Used by the restore/sync flow; every returned transaction is
    /// verified independently before any of them can grant.
    fn list_current_transactions(&self) -> BoxFuture<'_, GrantResult<Vec<RawTransaction>>>;

    /// Runs the store's purchase flow for a product.
    fn purchase<'a>(&'a self, product_id: &'a str) -> BoxFuture<'a, GrantResult<PurchaseFlow>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raw_transaction_serde_roundtrip() {
        let raw = RawTransaction {
            id: "txn-1".to_string(),
            product_id: "com.paygate.session.single".to_string(),
            expiry: None,
            purchased_at: Utc::now(),
        };

        let json = serde_json::to_string(&raw).unwrap();
        let back: RawTransaction = serde_json::from_str(&json).unwrap();
        assert_eq!(back.id, raw.id);
        assert_eq!(back.product_id, raw.product_id);
    }
}
