//! # Domain Types
//!
//! Core domain types used throughout Paygate.
//!
//! ## Type Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Domain Types                                    │
//! │                                                                         │
//! │  ┌───────────────────┐   ┌───────────────────┐   ┌──────────────────┐  │
//! │  │ EntitlementRecord │   │    Transaction    │   │TransactionLedger │  │
//! │  │  ───────────────  │   │  ───────────────  │   │  ──────────────  │  │
//! │  │  tier             │   │  id               │   │  set of applied  │  │
//! │  │  free_consumed    │   │  product_kind     │   │  transaction ids │  │
//! │  │  credits          │   │  expiry           │   │  (idempotency)   │  │
//! │  │  time_boxed_expiry│   │  verification     │   │                  │  │
//! │  └───────────────────┘   └───────────────────┘   └──────────────────┘  │
//! │                                                                         │
//! │  ┌───────────────────┐   ┌───────────────────┐   ┌──────────────────┐  │
//! │  │       Tier        │   │ VerificationState │   │   ProductKind    │  │
//! │  │  ───────────────  │   │  ───────────────  │   │  ──────────────  │  │
//! │  │  Free             │   │  Verified         │   │  Consumable      │  │
//! │  │  Consumable       │   │  Unverified       │   │  Subscription    │  │
//! │  │  TimeBoxed        │   │  Pending          │   │                  │  │
//! │  └───────────────────┘   └───────────────────┘   └──────────────────┘  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Credits Are Tier-Independent
//! `consumable_credits` is stored outside the `tier` label so that credits
//! purchased while a subscription is active survive its lapse. The tier
//! label records the *strongest* paid grant ever applied; the gates in
//! [`crate::engine`] fall through strongest-first.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::FREE_SESSION_LIMIT;

// =============================================================================
// Tier
// =============================================================================

/// The category of access currently in effect.
///
/// ## Transition Rules
/// ```text
/// Free ──(verified consumable grant)──► Consumable
/// Free | Consumable ──(verified subscription grant)──► TimeBoxed
/// ```
/// `TimeBoxed` never transitions away automatically: expiry is a gate, not
/// a tier change. A lapsed subscription keeps the `TimeBoxed` label until a
/// fresh grant arrives; the credit gate takes over for consumption.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    /// No paid grant has ever been applied. One free session available.
    Free,
    /// At least one consumable credit purchase has been applied.
    Consumable,
    /// A subscription grant has been applied; access is expiry-gated.
    TimeBoxed,
}

impl Tier {
    /// Dominance rank: `TimeBoxed > Consumable > Free`.
    ///
    /// A grant never demotes the tier label; see [`Tier::strongest`].
    const fn rank(self) -> u8 {
        match self {
            Tier::Free => 0,
            Tier::Consumable => 1,
            Tier::TimeBoxed => 2,
        }
    }

    /// Returns the stronger of two tiers under the dominance order.
    #[must_use]
    pub fn strongest(a: Tier, b: Tier) -> Tier {
        if a.rank() >= b.rank() {
            a
        } else {
            b
        }
    }

    /// Whether this tier reflects a paid grant.
    #[inline]
    pub const fn is_paid(self) -> bool {
        !matches!(self, Tier::Free)
    }

    /// Stable string form, matching the persisted representation.
    pub const fn as_str(self) -> &'static str {
        match self {
            Tier::Free => "free",
            Tier::Consumable => "consumable",
            Tier::TimeBoxed => "time_boxed",
        }
    }
}

impl Default for Tier {
    fn default() -> Self {
        Tier::Free
    }
}

impl std::str::FromStr for Tier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "free" => Ok(Tier::Free),
            "consumable" => Ok(Tier::Consumable),
            "time_boxed" => Ok(Tier::TimeBoxed),
            other => Err(format!("unknown tier: {other}")),
        }
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Product Kind
// =============================================================================

/// What a store product grants when purchased.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProductKind {
    /// One session credit per purchase.
    Consumable,
    /// Time-boxed unlimited access until the transaction's expiry.
    Subscription,
}

// =============================================================================
// Verification State
// =============================================================================

/// The verifier's verdict on a transaction.
///
/// Assigned only by the verifier, never by the engine. The engine grants
/// exclusively on `Verified`; `Unverified` is a permanent rejection for
/// that transaction id, `Pending` is re-evaluated on a future sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationState {
    /// Cryptographic verification succeeded; safe to grant.
    Verified,
    /// Verification failed permanently. Never granted, but ledgered so it
    /// is not re-examined on every sync.
    Unverified,
    /// Verification has not resolved yet (e.g. awaiting approval).
    /// Not ledgered - the next sync sees it again.
    Pending,
}

// =============================================================================
// Transaction
// =============================================================================

/// An external purchase/renewal event, after verification.
///
/// Ephemeral: produced by the store, verified, folded into the record
/// once, and then only its id survives (as a ledger entry).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    /// Stable unique identifier assigned by the store.
    pub id: String,

    /// Store product identifier (e.g. `"com.paygate.session.single"`).
    pub product_id: String,

    /// What this product grants.
    pub product_kind: ProductKind,

    /// Expiry timestamp. Subscriptions only; a subscription without one
    /// receives the default window at grant time.
    pub expiry: Option<DateTime<Utc>>,

    /// Verifier verdict for this transaction.
    pub verification_state: VerificationState,
}

// =============================================================================
// Transaction Ledger
// =============================================================================

/// Set of transaction ids already folded into the record.
///
/// ## Why a Ledger?
/// Store events replay: restores re-deliver every live transaction, and
/// purchase completion can race a background sync delivering the same
/// event. The ledger makes grant application idempotent - a transaction's
/// *effect* is baked into the record exactly once.
///
/// Grows monotonically; entries older than any plausible re-delivery
/// window may be pruned (see the repository) without affecting
/// correctness.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TransactionLedger {
    applied: HashSet<String>,
}

impl TransactionLedger {
    /// Creates an empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a ledger from previously persisted ids.
    pub fn from_ids<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        TransactionLedger {
            applied: ids.into_iter().map(Into::into).collect(),
        }
    }

    /// Whether a transaction id has already been applied.
    pub fn contains(&self, txn_id: &str) -> bool {
        self.applied.contains(txn_id)
    }

    /// Records a transaction id. Returns `false` if it was already present.
    pub fn record(&mut self, txn_id: impl Into<String>) -> bool {
        self.applied.insert(txn_id.into())
    }

    /// Number of ids tracked.
    pub fn len(&self) -> usize {
        self.applied.len()
    }

    /// Whether the ledger is empty.
    pub fn is_empty(&self) -> bool {
        self.applied.is_empty()
    }

    /// Iterates over the tracked ids (no particular order).
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.applied.iter().map(String::as_str)
    }
}

// =============================================================================
// Entitlement Record
// =============================================================================

/// The single source of truth for access rights.
///
/// ## Determinism Invariant
/// The record's fields are fully determined by the ordered application of
/// grant and consumption events to the zero record. Grant application is
/// commutative (extend-not-shrink expiry merge, additive credits), so
/// replaying the same grant set in any order reproduces the same record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntitlementRecord {
    /// Strongest paid grant ever applied (`Free` if none).
    pub tier: Tier,

    /// Free sessions consumed. Invariant: `<= FREE_SESSION_LIMIT`.
    /// Meaningful only while `tier` is `Free`.
    pub free_consumed_count: u32,

    /// Unspent session credits. Tracked independently of `tier`.
    pub consumable_credits: u32,

    /// Subscription expiry. `Some` iff `tier` is `TimeBoxed`.
    pub time_boxed_expiry: Option<DateTime<Utc>>,

    /// When the record was last mutated.
    pub updated_at: DateTime<Utc>,
}

impl EntitlementRecord {
    /// The zero record: free tier, nothing consumed, nothing granted.
    pub fn new(now: DateTime<Utc>) -> Self {
        EntitlementRecord {
            tier: Tier::Free,
            free_consumed_count: 0,
            consumable_credits: 0,
            time_boxed_expiry: None,
            updated_at: now,
        }
    }

    /// Whether the free allowance is still available.
    ///
    /// Closed permanently once any paid grant applies - a paid
    /// entitlement is never replaced by the free tier again.
    #[inline]
    pub fn free_session_available(&self) -> bool {
        self.tier == Tier::Free && self.free_consumed_count < FREE_SESSION_LIMIT
    }

    /// Whether an unexpired subscription window is in effect.
    pub fn subscription_active(&self, now: DateTime<Utc>) -> bool {
        match (self.tier, self.time_boxed_expiry) {
            (Tier::TimeBoxed, Some(expiry)) => now < expiry,
            _ => false,
        }
    }
}

// =============================================================================
// Remaining (display value)
// =============================================================================

/// Derived, read-only display value for "sessions remaining".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Remaining {
    /// A concrete number of sessions (free allowance or credits).
    Sessions(u32),
    /// Unbounded access under an unexpired subscription.
    Unlimited,
}

impl std::fmt::Display for Remaining {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Remaining::Sessions(n) => write!(f, "{n}"),
            Remaining::Unlimited => f.write_str("∞"),
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tier_dominance() {
        assert_eq!(Tier::strongest(Tier::Free, Tier::Consumable), Tier::Consumable);
        assert_eq!(Tier::strongest(Tier::TimeBoxed, Tier::Consumable), Tier::TimeBoxed);
        assert_eq!(Tier::strongest(Tier::Consumable, Tier::TimeBoxed), Tier::TimeBoxed);
        assert_eq!(Tier::strongest(Tier::Free, Tier::Free), Tier::Free);
    }

    #[test]
    fn test_tier_string_roundtrip() {
        for tier in [Tier::Free, Tier::Consumable, Tier::TimeBoxed] {
            let parsed: Tier = tier.as_str().parse().unwrap();
            assert_eq!(parsed, tier);
        }
        assert!("platinum".parse::<Tier>().is_err());
    }

    #[test]
    fn test_zero_record() {
        let now = Utc::now();
        let record = EntitlementRecord::new(now);
        assert_eq!(record.tier, Tier::Free);
        assert_eq!(record.free_consumed_count, 0);
        assert_eq!(record.consumable_credits, 0);
        assert!(record.time_boxed_expiry.is_none());
        assert!(record.free_session_available());
        assert!(!record.subscription_active(now));
    }

    #[test]
    fn test_ledger_records_once() {
        let mut ledger = TransactionLedger::new();
        assert!(ledger.record("txn-1"));
        assert!(!ledger.record("txn-1"));
        assert!(ledger.contains("txn-1"));
        assert_eq!(ledger.len(), 1);
    }

    #[test]
    fn test_ledger_from_ids() {
        let ledger = TransactionLedger::from_ids(["a", "b"]);
        assert!(ledger.contains("a"));
        assert!(ledger.contains("b"));
        assert!(!ledger.contains("c"));
    }

    #[test]
    fn test_remaining_display() {
        assert_eq!(Remaining::Sessions(3).to_string(), "3");
        assert_eq!(Remaining::Unlimited.to_string(), "∞");
    }

    #[test]
    fn test_record_serde_roundtrip() {
        let now = Utc::now();
        let mut record = EntitlementRecord::new(now);
        record.tier = Tier::TimeBoxed;
        record.time_boxed_expiry = Some(now + chrono::Duration::days(7));

        let json = serde_json::to_string(&record).unwrap();
        let back: EntitlementRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back, record);
    }
}
