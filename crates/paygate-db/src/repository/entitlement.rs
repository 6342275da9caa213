//! # Entitlement Repository
//!
//! Database operations for the entitlement record and the
//! applied-transaction ledger.
//!
//! ## Atomicity Contract
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Persistence Contract                               │
//! │                                                                         │
//! │  save(record, newly_applied)                                           │
//! │     └── ONE SQL transaction:                                           │
//! │         1. upsert the singleton record row                             │
//! │         2. INSERT OR IGNORE each newly applied transaction id          │
//! │     Record and ledger can never diverge on disk.                       │
//! │                                                                         │
//! │  load()                                                                │
//! │     └── reads row + ledger, validates invariants                       │
//! │         invalid row → DbError::Corrupt (caller resets, never crashes)  │
//! │                                                                         │
//! │  reset()                                                               │
//! │     └── ONE SQL transaction: zero record + cleared ledger, so a        │
//! │         later restore can rebuild state from the store                 │
//! │                                                                         │
//! │  prune_applied_before(cutoff)                                          │
//! │     └── drops ledger entries older than any plausible re-delivery      │
//! │         window; a grant's effect is already baked into the record      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use tracing::{debug, warn};

use crate::error::{DbError, DbResult};
use paygate_core::validation::validate_record;
use paygate_core::{EntitlementRecord, Tier, TransactionLedger};

/// The record plus its ledger, loaded together.
#[derive(Debug, Clone)]
pub struct StoredEntitlement {
    pub record: EntitlementRecord,
    pub ledger: TransactionLedger,
}

/// Raw record row, as stored. Converted to the domain type with full
/// invariant checking in [`EntitlementRow::into_record`].
#[derive(Debug, sqlx::FromRow)]
struct EntitlementRow {
    tier: String,
    free_consumed_count: i64,
    consumable_credits: i64,
    time_boxed_expiry: Option<DateTime<Utc>>,
    updated_at: DateTime<Utc>,
}

impl EntitlementRow {
    /// Maps the row into the domain record, surfacing any structural
    /// problem as [`DbError::Corrupt`].
    fn into_record(self) -> DbResult<EntitlementRecord> {
        let tier: Tier = self.tier.parse().map_err(DbError::corrupt)?;

        let free_consumed_count = u32::try_from(self.free_consumed_count)
            .map_err(|_| DbError::corrupt(format!(
                "free_consumed_count out of range: {}",
                self.free_consumed_count
            )))?;
        let consumable_credits = u32::try_from(self.consumable_credits)
            .map_err(|_| DbError::corrupt(format!(
                "consumable_credits out of range: {}",
                self.consumable_credits
            )))?;

        let record = EntitlementRecord {
            tier,
            free_consumed_count,
            consumable_credits,
            time_boxed_expiry: self.time_boxed_expiry,
            updated_at: self.updated_at,
        };

        validate_record(&record).map_err(|e| DbError::corrupt(e.to_string()))?;

        Ok(record)
    }
}

/// Repository for entitlement persistence.
#[derive(Debug, Clone)]
pub struct EntitlementRepository {
    pool: SqlitePool,
}

impl EntitlementRepository {
    /// Creates a new EntitlementRepository.
    pub fn new(pool: SqlitePool) -> Self {
        EntitlementRepository { pool }
    }

    /// Loads the record and ledger.
    ///
    /// ## Returns
    /// - `Ok(None)` - first launch, nothing persisted yet
    /// - `Ok(Some(_))` - validated record plus ledger
    /// - `Err(DbError::Corrupt)` - stored state fails invariant checks;
    ///   the caller should [`reset`](Self::reset)
    pub async fn load(&self) -> DbResult<Option<StoredEntitlement>> {
        let row: Option<EntitlementRow> = sqlx::query_as(
            r#"
            SELECT tier, free_consumed_count, consumable_credits,
                   time_boxed_expiry, updated_at
            FROM entitlement_record
            WHERE id = 1
            "#,
        )
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            debug!("No entitlement record persisted yet");
            return Ok(None);
        };

        let record = row.into_record()?;

        let ids: Vec<String> = sqlx::query_scalar("SELECT txn_id FROM applied_transactions")
            .fetch_all(&self.pool)
            .await?;

        debug!(tier = %record.tier, ledger_len = ids.len(), "Loaded entitlement record");

        Ok(Some(StoredEntitlement {
            record,
            ledger: TransactionLedger::from_ids(ids),
        }))
    }

    /// Persists the record and any newly applied transaction ids in one
    /// SQL transaction.
    ///
    /// `newly_applied` carries only the ids ledgered since the last save;
    /// re-sending an id is harmless (`INSERT OR IGNORE`).
    pub async fn save(
        &self,
        record: &EntitlementRecord,
        newly_applied: &[String],
    ) -> DbResult<()> {
        debug!(
            tier = %record.tier,
            credits = record.consumable_credits,
            newly_applied = newly_applied.len(),
            "Persisting entitlement record"
        );

        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO entitlement_record (
                id, tier, free_consumed_count, consumable_credits,
                time_boxed_expiry, updated_at
            ) VALUES (1, ?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(id) DO UPDATE SET
                tier = excluded.tier,
                free_consumed_count = excluded.free_consumed_count,
                consumable_credits = excluded.consumable_credits,
                time_boxed_expiry = excluded.time_boxed_expiry,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(record.tier.as_str())
        .bind(i64::from(record.free_consumed_count))
        .bind(i64::from(record.consumable_credits))
        .bind(record.time_boxed_expiry)
        .bind(record.updated_at)
        .execute(&mut *tx)
        .await?;

        for txn_id in newly_applied {
            sqlx::query(
                "INSERT OR IGNORE INTO applied_transactions (txn_id, applied_at) VALUES (?1, ?2)",
            )
            .bind(txn_id)
            .bind(record.updated_at)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        Ok(())
    }

    /// Resets persisted state to the zero value: free tier record, empty
    /// ledger, one SQL transaction.
    ///
    /// ## When To Call
    /// Corruption recovery ([`DbError::Corrupt`] from
    /// [`load`](Self::load)). Clearing the ledger alongside the record
    /// lets the next restore rebuild entitlements from the store's
    /// current transactions.
    pub async fn reset(&self, now: DateTime<Utc>) -> DbResult<EntitlementRecord> {
        warn!("Resetting entitlement record to zero value");

        let record = EntitlementRecord::new(now);

        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO entitlement_record (
                id, tier, free_consumed_count, consumable_credits,
                time_boxed_expiry, updated_at
            ) VALUES (1, ?1, 0, 0, NULL, ?2)
            ON CONFLICT(id) DO UPDATE SET
                tier = excluded.tier,
                free_consumed_count = 0,
                consumable_credits = 0,
                time_boxed_expiry = NULL,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(record.tier.as_str())
        .bind(record.updated_at)
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM applied_transactions")
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        Ok(record)
    }

    /// Prunes ledger entries applied before `cutoff`.
    ///
    /// Safe at any time: a pruned grant's effect is already baked into
    /// the record, the ledger entry only guards against re-delivery.
    ///
    /// ## Returns
    /// Number of entries removed.
    pub async fn prune_applied_before(&self, cutoff: DateTime<Utc>) -> DbResult<u64> {
        let result = sqlx::query("DELETE FROM applied_transactions WHERE applied_at < ?1")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;

        let pruned = result.rows_affected();
        if pruned > 0 {
            debug!(pruned, "Pruned applied-transaction ledger");
        }

        Ok(pruned)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
