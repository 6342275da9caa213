//! # Entitlement Service
//!
//! The facade the host application talks to. Owns the single
//! serialization point around the entitlement record and its ledger.
//!
//! ## Serialization Discipline
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                  EntitlementService Concurrency                         │
//! │                                                                         │
//! │  ┌──────────────────────────────────────────────────────────────────┐  │
//! │  │                tokio::sync::Mutex<ServiceState>                  │  │
//! │  │                                                                  │  │
//! │  │  AT MOST ONE ACTIVE MUTATOR. Inside the critical section:        │  │
//! │  │    1. clone record (+ ledger for grants)                         │  │
//! │  │    2. engine mutation (consume / grant fold)                     │  │
//! │  │    3. persist via repository                                     │  │
//! │  │    4. commit the clone back to state                             │  │
//! │  │  An observed record is always backed by durable state before     │  │
//! │  │  the lock releases - no dirty-read window across restarts.       │  │
//! │  └──────────────────────────────────────────────────────────────────┘  │
//! │                                                                         │
//! │  OUTSIDE the critical section:                                          │
//! │  • verification calls (concurrent with each other and with reads)      │
//! │  • can_consume()/remaining(): lock-free snapshot reads for display,    │
//! │    slight staleness tolerated - the authoritative gate check runs      │
//! │    inside consume(), under the mutex                                   │
//! │  • observer notification (after the lock releases)                     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use paygate_core::{
    AccessGate, EntitlementRecord, GrantOutcome, Remaining, Tier, TransactionLedger,
};
use paygate_db::{Database, DbError, EntitlementRepository, StoredEntitlement};

use crate::clock::{Clock, SystemClock};
use crate::config::EntitlementConfig;
use crate::error::{GrantError, GrantResult};
use crate::reconciler::{Reconciler, RestoreSummary, TxnVerdict};
use crate::storefront::{PurchaseFlow, RawTransaction, Storefront};
use crate::verifier::TransactionVerifier;

// =============================================================================
// Snapshot & Observer
// =============================================================================

/// Read-only view of the entitlement state, for display.
#[derive(Debug, Clone, Serialize)]
pub struct EntitlementSnapshot {
    /// Current tier label.
    pub tier: Tier,
    /// Whether a session may start (as of snapshot time).
    pub can_consume: bool,
    /// Sessions remaining display value.
    pub remaining: Remaining,
    /// Subscription expiry, if any.
    pub time_boxed_expiry: Option<DateTime<Utc>>,
}

impl EntitlementSnapshot {
    fn of(record: &EntitlementRecord, now: DateTime<Utc>) -> Self {
        EntitlementSnapshot {
            tier: record.tier,
            can_consume: record.can_consume(now),
            remaining: record.remaining(now),
            time_boxed_expiry: record.time_boxed_expiry,
        }
    }
}

/// Change notification seam (implemented by the host's UI integration).
///
/// Called with a fresh snapshot after every successful mutation, outside
/// the critical section. This replaces ambient observable state: the
/// record itself is reachable only through the service.
pub trait EntitlementObserver: Send + Sync {
    /// The entitlement state changed.
    fn entitlement_changed(&self, snapshot: &EntitlementSnapshot);
}

/// No-op observer for hosts that poll instead.
pub struct NoOpObserver;

impl EntitlementObserver for NoOpObserver {
    fn entitlement_changed(&self, _snapshot: &EntitlementSnapshot) {}
}

// =============================================================================
// Purchase Outcome
// =============================================================================

/// What a user-initiated purchase flow produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PurchaseOutcome {
    /// Verified and applied; entitlement increased.
    Granted,
    /// The user backed out. Nothing changed.
    Cancelled,
    /// Awaiting external approval; a later restore picks it up.
    Pending,
}

// =============================================================================
// Service State
// =============================================================================

/// The shared mutable resource: record + ledger, always updated together.
struct ServiceState {
    record: EntitlementRecord,
    ledger: TransactionLedger,
}

// =============================================================================
// Builder
// =============================================================================

/// Builder for [`EntitlementService`].
pub struct EntitlementServiceBuilder<S, V> {
    db: Database,
    storefront: S,
    verifier: Arc<V>,
    config: EntitlementConfig,
    clock: Arc<dyn Clock>,
    observer: Arc<dyn EntitlementObserver>,
}

impl<S: Storefront, V: TransactionVerifier> EntitlementServiceBuilder<S, V> {
    /// Starts a builder with the default clock and a no-op observer.
    pub fn new(db: Database, storefront: S, verifier: V, config: EntitlementConfig) -> Self {
        EntitlementServiceBuilder {
            db,
            storefront,
            verifier: Arc::new(verifier),
            config,
            clock: Arc::new(SystemClock),
            observer: Arc::new(NoOpObserver),
        }
    }

    /// Sets the clock (tests drive a manual clock past expiries).
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Sets the change observer.
    pub fn with_observer(mut self, observer: Arc<dyn EntitlementObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Loads persisted state and builds the service.
    ///
    /// ## Corruption Recovery
    /// A persisted record that fails its invariant checks is reset to the
    /// zero value (record AND ledger, atomically) rather than crashing.
    /// Conservative and access-revoking: the reset grants nothing, and a
    /// subsequent restore rebuilds entitlements from the store.
    pub async fn load(self) -> GrantResult<EntitlementService<S, V>> {
        let repo = self.db.entitlements();
        let now = self.clock.now();

        let stored = match repo.load().await {
            Ok(Some(stored)) => stored,
            Ok(None) => {
                info!("First launch: initializing zero entitlement record");
                let record = EntitlementRecord::new(now);
                repo.save(&record, &[]).await?;
                StoredEntitlement {
                    record,
                    ledger: TransactionLedger::new(),
                }
            }
            Err(DbError::Corrupt { reason }) => {
                warn!(%reason, "Corrupt persisted entitlement state, resetting to zero");
                let record = repo.reset(now).await?;
                StoredEntitlement {
                    record,
                    ledger: TransactionLedger::new(),
                }
            }
            Err(e) => return Err(e.into()),
        };

        info!(
            tier = %stored.record.tier,
            credits = stored.record.consumable_credits,
            ledger_len = stored.ledger.len(),
            "Entitlement service ready"
        );

        Ok(EntitlementService {
            repo,
            storefront: self.storefront,
            reconciler: Reconciler::new(self.verifier, self.config.clone()),
            config: self.config,
            clock: self.clock,
            observer: self.observer,
            display: RwLock::new(stored.record.clone()),
            state: Mutex::new(ServiceState {
                record: stored.record,
                ledger: stored.ledger,
            }),
        })
    }
}

// =============================================================================
// Entitlement Service
// =============================================================================

/// Serialized entitlement facade.
///
/// Cheap to share behind an `Arc`; every method takes `&self`.
pub struct EntitlementService<S, V> {
    repo: EntitlementRepository,
    storefront: S,
    reconciler: Reconciler<V>,
    config: EntitlementConfig,
    clock: Arc<dyn Clock>,
    observer: Arc<dyn EntitlementObserver>,
    /// Display copy of the record, refreshed after each mutation.
    /// Lock-free from the mutator's perspective: readers never touch the
    /// main mutex.
    display: RwLock<EntitlementRecord>,
    /// The single serialization point for record + ledger.
    state: Mutex<ServiceState>,
}

impl<S: Storefront, V: TransactionVerifier> EntitlementService<S, V> {
    /// Starts a builder.
    pub fn builder(
        db: Database,
        storefront: S,
        verifier: V,
        config: EntitlementConfig,
    ) -> EntitlementServiceBuilder<S, V> {
        EntitlementServiceBuilder::new(db, storefront, verifier, config)
    }

    /// Loads the service with the default clock and observer.
    pub async fn load(
        db: Database,
        storefront: S,
        verifier: V,
        config: EntitlementConfig,
    ) -> GrantResult<Self> {
        Self::builder(db, storefront, verifier, config).load().await
    }

    // -------------------------------------------------------------------------
    // Read-only queries (snapshot, no mutex)
    // -------------------------------------------------------------------------

    /// Whether a session may start right now.
    ///
    /// Snapshot read for UI gating/display; tolerates slight staleness.
    /// The authoritative check happens inside [`consume`](Self::consume).
    pub fn can_consume(&self) -> bool {
        let record = self.display.read().expect("display lock poisoned");
        record.can_consume(self.clock.now())
    }

    /// Sessions-remaining display value.
    pub fn remaining(&self) -> Remaining {
        let record = self.display.read().expect("display lock poisoned");
        record.remaining(self.clock.now())
    }

    /// Full display snapshot.
    pub fn snapshot(&self) -> EntitlementSnapshot {
        let record = self.display.read().expect("display lock poisoned");
        EntitlementSnapshot::of(&record, self.clock.now())
    }

    // -------------------------------------------------------------------------
    // Consumption
    // -------------------------------------------------------------------------

    /// Spends one unit of entitlement; call when the gated action starts.
    ///
    /// Check-then-mutate runs as one atomic step under the mutex, and the
    /// mutated record is durable before the lock releases. Of N racing
    /// calls against a single remaining unit, exactly one succeeds.
    ///
    /// ## Errors
    /// [`GrantError::Entitlement`] (`NotEntitled`) if no gate passes.
    pub async fn consume(&self) -> GrantResult<AccessGate> {
        let mut state = self.state.lock().await;
        let now = self.clock.now();

        let mut record = state.record.clone();
        let gate = record.consume(now).map_err(GrantError::from)?;

        self.repo.save(&record, &[]).await?;
        state.record = record;

        let snapshot = self.refresh_display(&state.record, now);
        drop(state);

        info!(gate = ?gate, "Session consumed");
        self.observer.entitlement_changed(&snapshot);
        Ok(gate)
    }

    // -------------------------------------------------------------------------
    // Purchase flows
    // -------------------------------------------------------------------------

    /// Runs the store purchase flow for a product and applies the result.
    ///
    /// Cancellation and pending approval produce no state change at all.
    pub async fn purchase(&self, product_id: &str) -> GrantResult<PurchaseOutcome> {
        info!(product_id, "Starting purchase flow");

        match self.storefront.purchase(product_id).await? {
            PurchaseFlow::Cancelled => {
                debug!(product_id, "Purchase cancelled by user");
                Ok(PurchaseOutcome::Cancelled)
            }
            PurchaseFlow::Pending => {
                debug!(product_id, "Purchase pending external approval");
                Ok(PurchaseOutcome::Pending)
            }
            PurchaseFlow::Completed(raw) => match self.apply_purchase(raw).await? {
                // AlreadyApplied means a background sync beat us to the
                // same transaction; its effect is present either way.
                GrantOutcome::Granted | GrantOutcome::AlreadyApplied => {
                    Ok(PurchaseOutcome::Granted)
                }
                GrantOutcome::Deferred => Ok(PurchaseOutcome::Pending),
                GrantOutcome::Rejected => Err(GrantError::VerificationRejected {
                    reason: "transaction failed verification".to_string(),
                }),
            },
        }
    }

    /// Verifies and applies one raw transaction.
    ///
    /// ## Errors
    /// - [`GrantError::VerificationRejected`]: permanent; the id is
    ///   ledgered (no repeated futile attempts) but the record is
    ///   untouched.
    /// - [`GrantError::Transient`]: retryable; record and ledger are both
    ///   untouched so the next restore retries.
    pub async fn apply_purchase(&self, raw: RawTransaction) -> GrantResult<GrantOutcome> {
        let verdict = self.reconciler.verify_one(&raw).await;

        match verdict {
            TxnVerdict::Transient { reason, .. } => Err(GrantError::Transient { reason }),
            TxnVerdict::Decided {
                txn,
                rejection_reason,
            } => {
                let mut state = self.state.lock().await;
                let now = self.clock.now();

                let mut record = state.record.clone();
                let mut ledger = state.ledger.clone();
                let outcome = record.grant(&txn, &mut ledger, now);

                if outcome.is_ledgered() {
                    self.repo.save(&record, &[txn.id.clone()]).await?;
                    state.record = record;
                    state.ledger = ledger;
                }

                let snapshot = self.refresh_display(&state.record, now);
                drop(state);

                if outcome.is_granted() {
                    info!(txn_id = %txn.id, "Purchase applied");
                    self.observer.entitlement_changed(&snapshot);
                }

                if outcome == GrantOutcome::Rejected {
                    return Err(GrantError::VerificationRejected {
                        reason: rejection_reason
                            .unwrap_or_else(|| "transaction failed verification".to_string()),
                    });
                }
                Ok(outcome)
            }
        }
    }

    // -------------------------------------------------------------------------
    // Restore / sync
    // -------------------------------------------------------------------------

    /// Pulls the store's current transactions, verifies them
    /// concurrently, and folds every verdict into the record under the
    /// single serialization point. Persists record + ledger once.
    ///
    /// Per-transaction failures land in the summary; one bad transaction
    /// never blocks the rest of the batch.
    pub async fn restore(&self) -> GrantResult<RestoreSummary> {
        info!("Starting restore");

        let raw = self.storefront.list_current_transactions().await?;
        debug!(count = raw.len(), "Fetched current transactions");

        // Verification runs outside the critical section.
        let verdicts = self.reconciler.verify_all(&raw).await;

        let mut state = self.state.lock().await;
        let now = self.clock.now();

        let mut record = state.record.clone();
        let mut ledger = state.ledger.clone();
        let (summary, newly_applied) =
            self.reconciler.fold(&mut record, &mut ledger, verdicts, now);

        self.repo.save(&record, &newly_applied).await?;
        state.record = record;
        state.ledger = ledger;

        let snapshot = self.refresh_display(&state.record, now);
        drop(state);

        info!(
            granted = summary.granted,
            already_applied = summary.already_applied,
            rejected = summary.rejected,
            deferred = summary.deferred,
            transient = summary.transient_failures,
            "Restore complete"
        );

        if summary.changed() {
            self.observer.entitlement_changed(&snapshot);
        }
        Ok(summary)
    }

    // -------------------------------------------------------------------------
    // Maintenance
    // -------------------------------------------------------------------------

    /// Prunes ledger entries older than the configured retention window.
    ///
    /// Serialized with mutators so the in-memory ledger can be reloaded
    /// to match disk.
    pub async fn prune_ledger(&self) -> GrantResult<u64> {
        let retention = chrono::Duration::days(self.config.reconcile.ledger_retention_days);
        let cutoff = self.clock.now() - retention;

        let mut state = self.state.lock().await;
        let pruned = self.repo.prune_applied_before(cutoff).await?;

        if pruned > 0 {
            if let Some(stored) = self.repo.load().await? {
                state.ledger = stored.ledger;
            }
            info!(pruned, "Ledger pruned");
        }

        Ok(pruned)
    }

    // -------------------------------------------------------------------------
    // Internals
    // -------------------------------------------------------------------------

    /// Refreshes the display copy; returns the snapshot to emit.
    fn refresh_display(
        &self,
        record: &EntitlementRecord,
        now: DateTime<Utc>,
    ) -> EntitlementSnapshot {
        let mut display = self.display.write().expect("display lock poisoned");
        *display = record.clone();
        EntitlementSnapshot::of(record, now)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
