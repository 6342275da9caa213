//! # Invariant Validation
//!
//! Structural checks for records and transactions. The persistence layer
//! runs [`validate_record`] on every load; a stored record that fails is
//! treated as corrupt and reset to the zero value (access-revoking
//! recovery - corruption never grants access).

use crate::error::ValidationError;
use crate::types::{EntitlementRecord, Tier, Transaction};
use crate::FREE_SESSION_LIMIT;

/// Checks the structural invariants of a record.
///
/// ## Rules
/// - `free_consumed_count <= FREE_SESSION_LIMIT`
/// - `time_boxed_expiry` present iff `tier` is `TimeBoxed`
///
/// ## Errors
/// Returns the first violated rule.
pub fn validate_record(record: &EntitlementRecord) -> Result<(), ValidationError> {
    if record.free_consumed_count > FREE_SESSION_LIMIT {
        return Err(ValidationError::CountExceedsLimit {
            field: "free_consumed_count".to_string(),
            value: record.free_consumed_count,
            max: FREE_SESSION_LIMIT,
        });
    }

    match (record.tier, record.time_boxed_expiry) {
        (Tier::TimeBoxed, None) => Err(ValidationError::MissingExpiry),
        (Tier::Free | Tier::Consumable, Some(_)) => Err(ValidationError::UnexpectedExpiry {
            tier: record.tier.to_string(),
        }),
        _ => Ok(()),
    }
}

/// Checks that a transaction is well-formed before it is folded.
pub fn validate_transaction(txn: &Transaction) -> Result<(), ValidationError> {
    if txn.id.trim().is_empty() {
        return Err(ValidationError::Required {
            field: "transaction id".to_string(),
        });
    }
    if txn.product_id.trim().is_empty() {
        return Err(ValidationError::Required {
            field: "product id".to_string(),
        });
    }
    Ok(())
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ProductKind, VerificationState};
    use chrono::{Duration, Utc};

    #[test]
    fn test_zero_record_is_valid() {
        let record = EntitlementRecord::new(Utc::now());
        assert!(validate_record(&record).is_ok());
    }

    #[test]
    fn test_overrun_free_count_is_corrupt() {
        let mut record = EntitlementRecord::new(Utc::now());
        record.free_consumed_count = 7;
        assert!(matches!(
            validate_record(&record),
            Err(ValidationError::CountExceedsLimit { .. })
        ));
    }

    #[test]
    fn test_time_boxed_without_expiry_is_corrupt() {
        let mut record = EntitlementRecord::new(Utc::now());
        record.tier = Tier::TimeBoxed;
        assert!(matches!(
            validate_record(&record),
            Err(ValidationError::MissingExpiry)
        ));
    }

    #[test]
    fn test_free_with_expiry_is_corrupt() {
        let now = Utc::now();
        let mut record = EntitlementRecord::new(now);
        record.time_boxed_expiry = Some(now + Duration::days(1));
        assert!(matches!(
            validate_record(&record),
            Err(ValidationError::UnexpectedExpiry { .. })
        ));
    }

    #[test]
    fn test_valid_time_boxed_record() {
        let now = Utc::now();
        let mut record = EntitlementRecord::new(now);
        record.tier = Tier::TimeBoxed;
        record.time_boxed_expiry = Some(now + Duration::days(30));
        assert!(validate_record(&record).is_ok());
    }

    #[test]
    fn test_blank_transaction_id_rejected() {
        let txn = Transaction {
            id: "  ".to_string(),
            product_id: "com.paygate.session.single".to_string(),
            product_kind: ProductKind::Consumable,
            expiry: None,
            verification_state: VerificationState::Verified,
        };
        assert!(matches!(
            validate_transaction(&txn),
            Err(ValidationError::Required { .. })
        ));
    }
}
