//! # Entitlement Engine
//!
//! Gate evaluation, consumption, and grant folding over an
//! [`EntitlementRecord`]. Pure and synchronous: callers provide `now` and
//! hold whatever lock serializes access to the record (see
//! `paygate-sync`'s service for the single-mutator discipline).
//!
//! ## Gate Evaluation Order
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                     can_consume / consume                               │
//! │                                                                         │
//! │  1. Subscription gate    tier == TimeBoxed && now < expiry             │
//! │         │ pass → allowed, consume mutates nothing (expiry-gated)       │
//! │         ▼ fail                                                          │
//! │  2. Credit gate          consumable_credits > 0                        │
//! │         │ pass → allowed, consume decrements credits                   │
//! │         ▼ fail                                                          │
//! │  3. Free gate            tier == Free && free_consumed_count == 0      │
//! │         │ pass → allowed, consume increments free_consumed_count       │
//! │         ▼ fail                                                          │
//! │  NotEntitled (fail closed)                                             │
//! │                                                                         │
//! │  The free gate sits behind the paid gates AND behind the tier label:   │
//! │  once any paid grant has been applied the free allowance is gone,      │
//! │  even if the paid entitlement is exhausted.                            │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Grant Folding
//! `grant` is idempotent (ledger check first) and commutative (credits are
//! additive, expiry merges extend-not-shrink), so a batch of verified
//! transactions can be folded in any delivery order and reproduce the same
//! record. A later-arriving but chronologically earlier renewal can never
//! erase a longer expiry already recorded.

use chrono::{DateTime, Duration, Utc};

use crate::error::{CoreError, CoreResult};
use crate::types::{
    EntitlementRecord, ProductKind, Remaining, Tier, Transaction, TransactionLedger,
    VerificationState,
};
use crate::DEFAULT_SUBSCRIPTION_DAYS;

// =============================================================================
// Access Gate
// =============================================================================

/// Which gate admitted a consumption.
///
/// Returned by [`EntitlementRecord::consume`] so callers can log or
/// display what was spent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessGate {
    /// The one-shot free allowance.
    FreeSession,
    /// One consumable credit.
    Credit,
    /// An unexpired subscription window (nothing decremented).
    Subscription,
}

// =============================================================================
// Grant Outcome
// =============================================================================

/// Result of folding one transaction into the record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GrantOutcome {
    /// Verified and applied; the record was mutated.
    Granted,
    /// Transaction id already in the ledger; nothing changed.
    AlreadyApplied,
    /// Verification verdict was `Unverified`; ledgered without granting.
    Rejected,
    /// Verification verdict was `Pending`; not ledgered, re-evaluated on
    /// a future sync.
    Deferred,
}

impl GrantOutcome {
    /// Whether this outcome added the transaction id to the ledger.
    #[inline]
    pub const fn is_ledgered(self) -> bool {
        matches!(self, GrantOutcome::Granted | GrantOutcome::Rejected)
    }

    /// Whether the record was mutated.
    #[inline]
    pub const fn is_granted(self) -> bool {
        matches!(self, GrantOutcome::Granted)
    }
}

// =============================================================================
// Engine Operations
// =============================================================================

impl EntitlementRecord {
    /// The strongest gate that currently admits a session, if any.
    fn active_gate(&self, now: DateTime<Utc>) -> Option<AccessGate> {
        if self.subscription_active(now) {
            return Some(AccessGate::Subscription);
        }
        if self.consumable_credits > 0 {
            return Some(AccessGate::Credit);
        }
        if self.free_session_available() {
            return Some(AccessGate::FreeSession);
        }
        None
    }

    /// Whether a session may start right now.
    ///
    /// Read-only; safe against a snapshot for display purposes. The
    /// authoritative check happens inside [`consume`](Self::consume),
    /// under the same lock as the mutation.
    #[must_use]
    pub fn can_consume(&self, now: DateTime<Utc>) -> bool {
        self.active_gate(now).is_some()
    }

    /// Spends one unit of entitlement.
    ///
    /// Re-checks the gate and mutates in the same step - callers must hold
    /// the record's single-mutator lock across the call so two concurrent
    /// consumers cannot both observe the last unit.
    ///
    /// ## Mutation per Gate
    /// - `FreeSession`: `free_consumed_count += 1`
    /// - `Credit`: `consumable_credits -= 1`
    /// - `Subscription`: nothing (expiry-gated, not count-gated)
    ///
    /// ## Errors
    /// Returns [`CoreError::NotEntitled`] and leaves the record untouched
    /// if no gate passes. Fail closed: never consume speculatively.
    pub fn consume(&mut self, now: DateTime<Utc>) -> CoreResult<AccessGate> {
        let gate = self.active_gate(now).ok_or(CoreError::NotEntitled)?;

        match gate {
            AccessGate::FreeSession => self.free_consumed_count += 1,
            AccessGate::Credit => self.consumable_credits -= 1,
            AccessGate::Subscription => {}
        }
        self.updated_at = now;

        Ok(gate)
    }

    /// Folds one transaction into the record, idempotently.
    ///
    /// ## Decision Table
    /// ```text
    /// id in ledger            → AlreadyApplied  (no-op)
    /// state == Pending        → Deferred        (no-op, NOT ledgered)
    /// state == Unverified     → Rejected        (ledgered, record untouched)
    /// state == Verified:
    ///   Consumable            → credits += 1, tier promoted to at least
    ///                           Consumable (TimeBoxed dominates)
    ///   Subscription          → tier = TimeBoxed,
    ///                           expiry = max(existing, txn expiry or
    ///                                        now + DEFAULT_SUBSCRIPTION_DAYS)
    /// ```
    ///
    /// The extend-not-shrink expiry merge is what makes grant application
    /// commutative; see the module docs.
    pub fn grant(
        &mut self,
        txn: &Transaction,
        ledger: &mut TransactionLedger,
        now: DateTime<Utc>,
    ) -> GrantOutcome {
        if ledger.contains(&txn.id) {
            return GrantOutcome::AlreadyApplied;
        }

        match txn.verification_state {
            VerificationState::Pending => return GrantOutcome::Deferred,
            VerificationState::Unverified => {
                ledger.record(txn.id.clone());
                return GrantOutcome::Rejected;
            }
            VerificationState::Verified => {}
        }

        match txn.product_kind {
            ProductKind::Consumable => {
                self.consumable_credits += 1;
                self.tier = Tier::strongest(self.tier, Tier::Consumable);
            }
            ProductKind::Subscription => {
                let granted_until = txn
                    .expiry
                    .unwrap_or_else(|| now + Duration::days(DEFAULT_SUBSCRIPTION_DAYS));
                self.time_boxed_expiry = Some(match self.time_boxed_expiry {
                    Some(existing) => existing.max(granted_until),
                    None => granted_until,
                });
                self.tier = Tier::TimeBoxed;
            }
        }
        self.updated_at = now;

        ledger.record(txn.id.clone());
        GrantOutcome::Granted
    }

    /// Derived display value for "sessions remaining".
    ///
    /// Free → the unspent free allowance; consumable → the credit count;
    /// time-boxed unexpired → unlimited. A lapsed subscription falls back
    /// to the credit count, matching the consumption gates.
    #[must_use]
    pub fn remaining(&self, now: DateTime<Utc>) -> Remaining {
        if self.subscription_active(now) {
            return Remaining::Unlimited;
        }
        if self.tier.is_paid() {
            return Remaining::Sessions(self.consumable_credits);
        }
        Remaining::Sessions(
            crate::FREE_SESSION_LIMIT.saturating_sub(self.free_consumed_count),
        )
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn verified(id: &str, kind: ProductKind, expiry: Option<DateTime<Utc>>) -> Transaction {
        Transaction {
            id: id.to_string(),
            product_id: match kind {
                ProductKind::Consumable => "com.paygate.session.single".to_string(),
                ProductKind::Subscription => "com.paygate.subscription.monthly".to_string(),
            },
            product_kind: kind,
            expiry,
            verification_state: VerificationState::Verified,
        }
    }

    // -------------------------------------------------------------------------
    // Free tier
    // -------------------------------------------------------------------------

    #[test]
    fn test_fresh_record_allows_exactly_one_free_session() {
        let now = Utc::now();
        let mut record = EntitlementRecord::new(now);

        assert!(record.can_consume(now));
        assert_eq!(record.consume(now).unwrap(), AccessGate::FreeSession);
        assert_eq!(record.free_consumed_count, 1);
        assert!(!record.can_consume(now));

        let err = record.consume(now).unwrap_err();
        assert!(matches!(err, CoreError::NotEntitled));
        assert_eq!(record.free_consumed_count, 1);
    }

    #[test]
    fn test_free_gate_closed_after_paid_grant_even_if_exhausted() {
        let now = Utc::now();
        let mut record = EntitlementRecord::new(now);
        let mut ledger = TransactionLedger::new();

        record.grant(&verified("txn-1", ProductKind::Consumable, None), &mut ledger, now);
        record.consume(now).unwrap(); // spends the credit, not the free session

        assert_eq!(record.consumable_credits, 0);
        assert_eq!(record.free_consumed_count, 0);
        // Credits gone and the free allowance is permanently off the table.
        assert!(!record.can_consume(now));
    }

    // -------------------------------------------------------------------------
    // Consumable credits
    // -------------------------------------------------------------------------

    #[test]
    fn test_consumable_grant_then_consume() {
        let now = Utc::now();
        let mut record = EntitlementRecord::new(now);
        let mut ledger = TransactionLedger::new();

        let outcome =
            record.grant(&verified("txn-1", ProductKind::Consumable, None), &mut ledger, now);
        assert_eq!(outcome, GrantOutcome::Granted);
        assert_eq!(record.tier, Tier::Consumable);
        assert_eq!(record.consumable_credits, 1);

        assert_eq!(record.consume(now).unwrap(), AccessGate::Credit);
        assert_eq!(record.consumable_credits, 0);
        assert!(!record.can_consume(now));
    }

    #[test]
    fn test_grant_is_idempotent() {
        let now = Utc::now();
        let mut record = EntitlementRecord::new(now);
        let mut ledger = TransactionLedger::new();
        let txn = verified("txn-1", ProductKind::Consumable, None);

        assert_eq!(record.grant(&txn, &mut ledger, now), GrantOutcome::Granted);
        assert_eq!(record.grant(&txn, &mut ledger, now), GrantOutcome::AlreadyApplied);
        assert_eq!(record.consumable_credits, 1);
        assert_eq!(ledger.len(), 1);
    }

    #[test]
    fn test_consumable_under_active_subscription_accumulates() {
        let now = Utc::now();
        let expiry = now + Duration::days(30);
        let mut record = EntitlementRecord::new(now);
        let mut ledger = TransactionLedger::new();

        record.grant(&verified("sub", ProductKind::Subscription, Some(expiry)), &mut ledger, now);
        record.grant(&verified("credit", ProductKind::Consumable, None), &mut ledger, now);

        // TimeBoxed dominates; the credit waits as a fallback.
        assert_eq!(record.tier, Tier::TimeBoxed);
        assert_eq!(record.consumable_credits, 1);
        assert_eq!(record.consume(now).unwrap(), AccessGate::Subscription);
        assert_eq!(record.consumable_credits, 1);

        // After the subscription lapses the credit becomes spendable.
        let later = expiry + Duration::seconds(1);
        assert_eq!(record.consume(later).unwrap(), AccessGate::Credit);
        assert_eq!(record.consumable_credits, 0);
    }

    // -------------------------------------------------------------------------
    // Subscriptions
    // -------------------------------------------------------------------------

    #[test]
    fn test_subscription_gates_on_expiry_without_decrement() {
        let now = Utc::now();
        let expiry = now + Duration::days(30);
        let mut record = EntitlementRecord::new(now);
        let mut ledger = TransactionLedger::new();

        record.grant(&verified("sub", ProductKind::Subscription, Some(expiry)), &mut ledger, now);
        assert_eq!(record.tier, Tier::TimeBoxed);

        for _ in 0..5 {
            assert_eq!(record.consume(now).unwrap(), AccessGate::Subscription);
        }

        // Lapsed: tier label survives, access does not.
        let later = expiry + Duration::seconds(1);
        assert_eq!(record.tier, Tier::TimeBoxed);
        assert!(!record.can_consume(later));
    }

    #[test]
    fn test_expiry_merge_is_commutative() {
        let now = Utc::now();
        let e1 = now + Duration::days(10);
        let e2 = now + Duration::days(40);

        let fold = |order: [(&str, DateTime<Utc>); 2]| {
            let mut record = EntitlementRecord::new(now);
            let mut ledger = TransactionLedger::new();
            for (id, expiry) in order {
                record.grant(
                    &verified(id, ProductKind::Subscription, Some(expiry)),
                    &mut ledger,
                    now,
                );
            }
            record
        };

        let forward = fold([("txn-a", e1), ("txn-b", e2)]);
        let reverse = fold([("txn-b", e2), ("txn-a", e1)]);

        assert_eq!(forward.time_boxed_expiry, Some(e2));
        assert_eq!(reverse.time_boxed_expiry, Some(e2));
        assert_eq!(forward, reverse);
    }

    #[test]
    fn test_earlier_renewal_never_shrinks_expiry() {
        let now = Utc::now();
        let long = now + Duration::days(60);
        let short = now + Duration::days(5);
        let mut record = EntitlementRecord::new(now);
        let mut ledger = TransactionLedger::new();

        record.grant(&verified("new", ProductKind::Subscription, Some(long)), &mut ledger, now);
        record.grant(&verified("old", ProductKind::Subscription, Some(short)), &mut ledger, now);

        assert_eq!(record.time_boxed_expiry, Some(long));
    }

    #[test]
    fn test_subscription_without_expiry_gets_default_window() {
        let now = Utc::now();
        let mut record = EntitlementRecord::new(now);
        let mut ledger = TransactionLedger::new();

        record.grant(&verified("sub", ProductKind::Subscription, None), &mut ledger, now);

        assert_eq!(
            record.time_boxed_expiry,
            Some(now + Duration::days(DEFAULT_SUBSCRIPTION_DAYS))
        );
        assert!(record.can_consume(now));
    }

    #[test]
    fn test_subscription_reenters_after_lapse() {
        let now = Utc::now();
        let first_expiry = now + Duration::days(30);
        let mut record = EntitlementRecord::new(now);
        let mut ledger = TransactionLedger::new();

        record.grant(
            &verified("sub-1", ProductKind::Subscription, Some(first_expiry)),
            &mut ledger,
            now,
        );

        let lapsed = first_expiry + Duration::days(3);
        assert!(!record.can_consume(lapsed));

        // A fresh renewal re-opens the window.
        let second_expiry = lapsed + Duration::days(30);
        record.grant(
            &verified("sub-2", ProductKind::Subscription, Some(second_expiry)),
            &mut ledger,
            lapsed,
        );
        assert!(record.can_consume(lapsed));
        assert_eq!(record.time_boxed_expiry, Some(second_expiry));
    }

    // -------------------------------------------------------------------------
    // Verification verdicts
    // -------------------------------------------------------------------------

    #[test]
    fn test_unverified_never_mutates_record_however_often_replayed() {
        let now = Utc::now();
        let mut record = EntitlementRecord::new(now);
        let mut ledger = TransactionLedger::new();

        let mut txn = verified("bad", ProductKind::Subscription, Some(now + Duration::days(30)));
        txn.verification_state = VerificationState::Unverified;

        let baseline = record.clone();
        assert_eq!(record.grant(&txn, &mut ledger, now), GrantOutcome::Rejected);
        for _ in 0..3 {
            assert_eq!(record.grant(&txn, &mut ledger, now), GrantOutcome::AlreadyApplied);
        }

        assert_eq!(record, baseline);
        assert!(ledger.contains("bad"));
    }

    #[test]
    fn test_pending_is_deferred_not_ledgered() {
        let now = Utc::now();
        let mut record = EntitlementRecord::new(now);
        let mut ledger = TransactionLedger::new();

        let mut txn = verified("maybe", ProductKind::Consumable, None);
        txn.verification_state = VerificationState::Pending;

        assert_eq!(record.grant(&txn, &mut ledger, now), GrantOutcome::Deferred);
        assert_eq!(record.consumable_credits, 0);
        assert!(ledger.is_empty());

        // Once it resolves, the next sync can still grant it.
        txn.verification_state = VerificationState::Verified;
        assert_eq!(record.grant(&txn, &mut ledger, now), GrantOutcome::Granted);
        assert_eq!(record.consumable_credits, 1);
    }

    // -------------------------------------------------------------------------
    // Remaining display value
    // -------------------------------------------------------------------------

    #[test]
    fn test_remaining_per_tier() {
        let now = Utc::now();
        let mut record = EntitlementRecord::new(now);
        let mut ledger = TransactionLedger::new();

        assert_eq!(record.remaining(now), Remaining::Sessions(1));
        record.consume(now).unwrap();
        assert_eq!(record.remaining(now), Remaining::Sessions(0));

        record.grant(&verified("c1", ProductKind::Consumable, None), &mut ledger, now);
        record.grant(&verified("c2", ProductKind::Consumable, None), &mut ledger, now);
        assert_eq!(record.remaining(now), Remaining::Sessions(2));

        let expiry = now + Duration::days(30);
        record.grant(&verified("sub", ProductKind::Subscription, Some(expiry)), &mut ledger, now);
        assert_eq!(record.remaining(now), Remaining::Unlimited);

        // Lapsed subscription falls back to the credit count.
        assert_eq!(
            record.remaining(expiry + Duration::seconds(1)),
            Remaining::Sessions(2)
        );
    }

    // -------------------------------------------------------------------------
    // End-to-end scenarios
    // -------------------------------------------------------------------------

    #[test]
    fn test_scenario_credits_then_subscription() {
        let now = Utc::now();
        let mut record = EntitlementRecord::new(now);
        let mut ledger = TransactionLedger::new();

        // Buy a single session, spend it.
        record.grant(&verified("txn-1", ProductKind::Consumable, None), &mut ledger, now);
        assert_eq!(record.consumable_credits, 1);
        record.consume(now).unwrap();
        assert!(!record.can_consume(now));

        // Subscribe: unlimited until expiry.
        let expiry = now + Duration::days(30);
        record.grant(&verified("txn-2", ProductKind::Subscription, Some(expiry)), &mut ledger, now);
        assert_eq!(record.tier, Tier::TimeBoxed);
        assert!(record.can_consume(now));
        assert!(record.can_consume(expiry - Duration::seconds(1)));
        assert!(!record.can_consume(expiry));
    }

    #[test]
    fn test_replaying_full_grant_set_reproduces_record() {
        let now = Utc::now();
        let e1 = now + Duration::days(14);
        let e2 = now + Duration::days(45);

        let txns = [
            verified("a", ProductKind::Consumable, None),
            verified("b", ProductKind::Subscription, Some(e1)),
            verified("c", ProductKind::Consumable, None),
            verified("d", ProductKind::Subscription, Some(e2)),
        ];

        let fold = |order: &[usize]| {
            let mut record = EntitlementRecord::new(now);
            let mut ledger = TransactionLedger::new();
            for &i in order {
                record.grant(&txns[i], &mut ledger, now);
            }
            record
        };

        let canonical = fold(&[0, 1, 2, 3]);
        for order in [[3, 2, 1, 0], [1, 3, 0, 2], [2, 0, 3, 1]] {
            assert_eq!(fold(&order), canonical);
        }
        assert_eq!(canonical.consumable_credits, 2);
        assert_eq!(canonical.time_boxed_expiry, Some(e2));
    }
}
