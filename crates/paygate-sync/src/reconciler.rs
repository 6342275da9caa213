//! # Reconciler
//!
//! Folds a batch of external store transactions into the local record
//! consistently, independent of delivery order.
//!
//! ## Restore/Sync Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Reconciliation                                   │
//! │                                                                         │
//! │  Storefront.list_current_transactions()                                │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  verify_all: CONCURRENT fan-out, one bounded-retry verification        │
//! │  per transaction (timeout → transient → exponential backoff)           │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  fold: SEQUENTIAL grant application under the service's single         │
//! │  serialization point - order does not matter (commutative merge),      │
//! │  one rejected transaction never blocks the others                      │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  persist record + ledger once, emit one change event                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::sync::Arc;
use std::time::Duration;

use backoff::ExponentialBackoffBuilder;
use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use tracing::{debug, info, warn};

use paygate_core::validation::validate_transaction;
use paygate_core::{
    EntitlementRecord, GrantOutcome, ProductKind, Transaction, TransactionLedger,
    VerificationState,
};

use crate::config::EntitlementConfig;
use crate::storefront::RawTransaction;
use crate::verifier::{TransactionVerifier, VerificationOutcome};

// =============================================================================
// Restore Summary
// =============================================================================

/// Per-batch aggregation of reconciliation results.
///
/// Failures are counted, not propagated - a rejected or transiently
/// failing transaction never blocks application of the others.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RestoreSummary {
    /// Verified transactions whose effect was applied to the record.
    pub granted: usize,
    /// Transactions already in the ledger (no-ops).
    pub already_applied: usize,
    /// Permanently rejected transactions (ledgered, nothing granted).
    pub rejected: usize,
    /// Pending transactions deferred to a future sync.
    pub deferred: usize,
    /// Transactions with no verdict this round (verifier outage/timeout);
    /// untouched, the next restore retries them.
    pub transient_failures: usize,
}

impl RestoreSummary {
    /// Whether this batch changed the entitlement record.
    #[must_use]
    pub fn changed(&self) -> bool {
        self.granted > 0
    }

    /// Total transactions examined.
    #[must_use]
    pub fn total(&self) -> usize {
        self.granted + self.already_applied + self.rejected + self.deferred
            + self.transient_failures
    }
}

// =============================================================================
// Transaction Verdict
// =============================================================================

/// Per-transaction result of the verification stage.
#[derive(Debug)]
pub(crate) enum TxnVerdict {
    /// The verifier reached a decision; the transaction (whatever its
    /// verification state) is ready to fold through the engine.
    /// `rejection_reason` is set iff the verdict was `Unverified`.
    Decided {
        txn: Transaction,
        rejection_reason: Option<String>,
    },
    /// No verdict this round. Not folded, not ledgered.
    Transient { txn_id: String, reason: String },
}

// =============================================================================
// Reconciler
// =============================================================================

/// Verification fan-out + grant folding.
///
/// The reconciler owns no state of its own; the service hands it the
/// record and ledger inside the critical section.
pub struct Reconciler<V> {
    verifier: Arc<V>,
    config: EntitlementConfig,
}

impl<V: TransactionVerifier> Reconciler<V> {
    /// Creates a reconciler over a verifier and configuration.
    pub fn new(verifier: Arc<V>, config: EntitlementConfig) -> Self {
        Reconciler { verifier, config }
    }

    /// Verifies a whole batch concurrently.
    ///
    /// Verification calls are independent and run in parallel; ordering
    /// of the returned verdicts does not matter to [`fold`](Self::fold).
    pub(crate) async fn verify_all(&self, raw: &[RawTransaction]) -> Vec<TxnVerdict> {
        debug!(count = raw.len(), "Verifying transaction batch");
        join_all(raw.iter().map(|txn| self.verify_one(txn))).await
    }

    /// Verifies one raw transaction with timeout + bounded retry.
    ///
    /// A timed-out call is a transient failure; transient failures are
    /// retried with exponential backoff until the configured budget is
    /// exhausted, then reported as `Transient`.
    pub(crate) async fn verify_one(&self, raw: &RawTransaction) -> TxnVerdict {
        let policy = ExponentialBackoffBuilder::new()
            .with_initial_interval(Duration::from_millis(self.config.reconcile.initial_backoff_ms))
            .with_max_interval(Duration::from_secs(self.config.reconcile.max_backoff_secs))
            .with_max_elapsed_time(Some(Duration::from_secs(
                self.config.reconcile.max_retry_elapsed_secs,
            )))
            .build();

        let result = backoff::future::retry(policy, || async {
            match self.verify_bounded(raw).await {
                VerificationOutcome::TransientFailure { reason } => {
                    debug!(txn_id = %raw.id, %reason, "Transient verification failure, will retry");
                    Err(backoff::Error::transient(reason))
                }
                other => Ok(other),
            }
        })
        .await;

        match result {
            Ok(VerificationOutcome::Verified(txn)) => {
                if let Err(e) = validate_transaction(&txn) {
                    warn!(txn_id = %raw.id, error = %e, "Verified transaction is malformed");
                    return TxnVerdict::Decided {
                        txn: self.unverified_stub(raw),
                        rejection_reason: Some(e.to_string()),
                    };
                }
                TxnVerdict::Decided {
                    txn,
                    rejection_reason: None,
                }
            }
            Ok(VerificationOutcome::Unverified { reason }) => {
                warn!(txn_id = %raw.id, %reason, "Transaction failed verification");
                TxnVerdict::Decided {
                    txn: self.unverified_stub(raw),
                    rejection_reason: Some(reason),
                }
            }
            Ok(VerificationOutcome::TransientFailure { reason }) | Err(reason) => {
                warn!(txn_id = %raw.id, %reason, "No verification verdict this round");
                TxnVerdict::Transient {
                    txn_id: raw.id.clone(),
                    reason,
                }
            }
        }
    }

    /// One verification call with the configured timeout applied.
    async fn verify_bounded(&self, raw: &RawTransaction) -> VerificationOutcome {
        let timeout = Duration::from_secs(self.config.reconcile.verify_timeout_secs);
        match tokio::time::timeout(timeout, self.verifier.verify(raw)).await {
            Ok(outcome) => outcome,
            Err(_) => VerificationOutcome::TransientFailure {
                reason: format!("verification timed out after {}s", timeout.as_secs()),
            },
        }
    }

    /// Builds the unverified form of a raw transaction, for ledgering.
    ///
    /// The engine never reads the product kind of an unverified
    /// transaction (no mutation happens), so an unclassifiable product
    /// id defaults to `Consumable`.
    fn unverified_stub(&self, raw: &RawTransaction) -> Transaction {
        Transaction {
            id: raw.id.clone(),
            product_id: raw.product_id.clone(),
            product_kind: self
                .config
                .classify(&raw.product_id)
                .unwrap_or(ProductKind::Consumable),
            expiry: raw.expiry,
            verification_state: VerificationState::Unverified,
        }
    }

    /// Folds verdicts into the record sequentially.
    ///
    /// Must be called inside the service's critical section. Returns the
    /// batch summary plus the transaction ids newly added to the ledger
    /// (for the incremental persist).
    pub(crate) fn fold(
        &self,
        record: &mut EntitlementRecord,
        ledger: &mut TransactionLedger,
        verdicts: Vec<TxnVerdict>,
        now: DateTime<Utc>,
    ) -> (RestoreSummary, Vec<String>) {
        let mut summary = RestoreSummary::default();
        let mut newly_applied = Vec::new();

        for verdict in verdicts {
            match verdict {
                TxnVerdict::Decided { txn, .. } => {
                    let outcome = record.grant(&txn, ledger, now);
                    if outcome.is_ledgered() {
                        newly_applied.push(txn.id.clone());
                    }
                    match outcome {
                        GrantOutcome::Granted => {
                            info!(txn_id = %txn.id, product_id = %txn.product_id, "Grant applied");
                            summary.granted += 1;
                        }
                        GrantOutcome::AlreadyApplied => summary.already_applied += 1,
                        GrantOutcome::Rejected => summary.rejected += 1,
                        GrantOutcome::Deferred => {
                            debug!(txn_id = %txn.id, "Pending transaction deferred");
                            summary.deferred += 1;
                        }
                    }
                }
                TxnVerdict::Transient { txn_id, .. } => {
                    debug!(%txn_id, "Transaction left for the next restore");
                    summary.transient_failures += 1;
                }
            }
        }

        (summary, newly_applied)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::verifier::CatalogVerifier;
    use chrono::Duration as ChronoDuration;
    use futures_util::future::BoxFuture;
    use std::collections::HashMap;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Verifier with scripted per-transaction outcomes; falls back to
    /// catalog classification once a script runs dry.
    struct ScriptedVerifier {
        script: Mutex<HashMap<String, VecDeque<VerificationOutcome>>>,
        fallback: CatalogVerifier,
    }

    impl ScriptedVerifier {
        fn new() -> Self {
            ScriptedVerifier {
                script: Mutex::new(HashMap::new()),
                fallback: CatalogVerifier::new(EntitlementConfig::default()),
            }
        }

        fn push(&self, txn_id: &str, outcome: VerificationOutcome) {
            self.script
                .lock()
                .unwrap()
                .entry(txn_id.to_string())
                .or_default()
                .push_back(outcome);
        }
    }

    impl TransactionVerifier for ScriptedVerifier {
        fn verify<'a>(&'a self, raw: &'a RawTransaction) -> BoxFuture<'a, VerificationOutcome> {
            if let Some(outcome) = self
                .script
                .lock()
                .unwrap()
                .get_mut(&raw.id)
                .and_then(VecDeque::pop_front)
            {
                return Box::pin(async move { outcome });
            }
            self.fallback.verify(raw)
        }
    }

    fn fast_config() -> EntitlementConfig {
        let mut config = EntitlementConfig::default();
        config.reconcile.initial_backoff_ms = 5;
        config.reconcile.max_backoff_secs = 1;
        config.reconcile.max_retry_elapsed_secs = 1;
        config.reconcile.verify_timeout_secs = 1;
        config
    }

    fn raw(id: &str, product_id: &str) -> RawTransaction {
        RawTransaction {
            id: id.to_string(),
            product_id: product_id.to_string(),
            expiry: None,
            purchased_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_transient_then_verified_is_retried_to_success() {
        let verifier = Arc::new(ScriptedVerifier::new());
        verifier.push(
            "t1",
            VerificationOutcome::TransientFailure {
                reason: "offline".to_string(),
            },
        );

        let reconciler = Reconciler::new(verifier, fast_config());
        let verdict = reconciler
            .verify_one(&raw("t1", "com.paygate.session.single"))
            .await;

        match verdict {
            TxnVerdict::Decided { txn, rejection_reason } => {
                assert_eq!(txn.verification_state, VerificationState::Verified);
                assert!(rejection_reason.is_none());
            }
            other => panic!("expected Decided, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_exhausted_retries_surface_as_transient() {
        let verifier = Arc::new(ScriptedVerifier::new());
        for _ in 0..64 {
            verifier.push(
                "t1",
                VerificationOutcome::TransientFailure {
                    reason: "still offline".to_string(),
                },
            );
        }

        let reconciler = Reconciler::new(verifier, fast_config());
        let verdict = reconciler
            .verify_one(&raw("t1", "com.paygate.session.single"))
            .await;

        assert!(matches!(verdict, TxnVerdict::Transient { .. }), "got {verdict:?}");
    }

    #[tokio::test]
    async fn test_fold_aggregates_without_aborting() {
        let verifier = Arc::new(ScriptedVerifier::new());
        verifier.push(
            "bad",
            VerificationOutcome::Unverified {
                reason: "bad signature".to_string(),
            },
        );

        let reconciler = Reconciler::new(verifier, fast_config());
        let batch = [
            raw("good", "com.paygate.session.single"),
            raw("bad", "com.paygate.session.single"),
        ];
        let verdicts = reconciler.verify_all(&batch).await;

        let now = Utc::now();
        let mut record = EntitlementRecord::new(now);
        let mut ledger = TransactionLedger::new();
        let (summary, newly_applied) =
            reconciler.fold(&mut record, &mut ledger, verdicts, now);

        assert_eq!(summary.granted, 1);
        assert_eq!(summary.rejected, 1);
        assert_eq!(record.consumable_credits, 1);
        // Both decided transactions were ledgered.
        assert_eq!(newly_applied.len(), 2);
        assert!(ledger.contains("good"));
        assert!(ledger.contains("bad"));
    }

    #[tokio::test]
    async fn test_fold_is_order_independent_for_subscriptions() {
        let now = Utc::now();
        let e1 = now + ChronoDuration::days(10);
        let e2 = now + ChronoDuration::days(40);
        let reconciler = Reconciler::new(Arc::new(ScriptedVerifier::new()), fast_config());

        let mut batch = vec![
            RawTransaction {
                id: "renewal-late".to_string(),
                product_id: "com.paygate.subscription.monthly".to_string(),
                expiry: Some(e2),
                purchased_at: now,
            },
            RawTransaction {
                id: "renewal-early".to_string(),
                product_id: "com.paygate.subscription.monthly".to_string(),
                expiry: Some(e1),
                purchased_at: now,
            },
        ];

        let mut results = Vec::new();
        for _ in 0..2 {
            let verdicts = reconciler.verify_all(&batch).await;
            let mut record = EntitlementRecord::new(now);
            let mut ledger = TransactionLedger::new();
            reconciler.fold(&mut record, &mut ledger, verdicts, now);
            results.push(record);
            batch.reverse();
        }

        assert_eq!(results[0], results[1]);
        assert_eq!(results[0].time_boxed_expiry, Some(e2));
    }

    #[tokio::test]
    async fn test_timeout_is_transient() {
        struct StuckVerifier;
        impl TransactionVerifier for StuckVerifier {
            fn verify<'a>(
                &'a self,
                _raw: &'a RawTransaction,
            ) -> BoxFuture<'a, VerificationOutcome> {
                Box::pin(futures_util::future::pending())
            }
        }

        let mut config = fast_config();
        config.reconcile.max_retry_elapsed_secs = 0; // no retry budget
        let reconciler = Reconciler::new(Arc::new(StuckVerifier), config);

        let verdict = reconciler
            .verify_one(&raw("t1", "com.paygate.session.single"))
            .await;
        assert!(matches!(verdict, TxnVerdict::Transient { .. }), "got {verdict:?}");
    }
}
