//! # Entitlement Configuration
//!
//! Configuration for the sync layer: the product catalog, reconciler
//! tuning, and the install identity.
//!
//! ## Configuration Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Configuration Priority                               │
//! │                                                                         │
//! │  1. Environment Variables (highest priority)                           │
//! │     PAYGATE_CONFIG=/path/to/entitlement.toml                           │
//! │     PAYGATE_INSTALL_ID=abc-123                                         │
//! │                                                                         │
//! │  2. TOML Config File                                                   │
//! │     ~/.config/paygate/entitlement.toml (Linux)                         │
//! │     ~/Library/Application Support/com.paygate.paygate/ (macOS)         │
//! │                                                                         │
//! │  3. Default Values (lowest priority)                                   │
//! │     bundled catalog, auto-generated install id                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration File Format
//! ```toml
//! # entitlement.toml
//! [install]
//! id = "550e8400-e29b-41d4-a716-446655440000"
//!
//! [products]
//! consumable_ids = ["com.paygate.session.single"]
//! subscription_ids = ["com.paygate.subscription.monthly"]
//!
//! [reconcile]
//! verify_timeout_secs = 10
//! initial_backoff_ms = 250
//! max_backoff_secs = 5
//! max_retry_elapsed_secs = 30
//! ledger_retention_days = 365
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use paygate_core::ProductKind;

use crate::error::{GrantError, GrantResult};

// =============================================================================
// Sections
// =============================================================================

/// Identity of this installation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstallSection {
    /// Stable install identifier (UUID v4, generated on first run).
    pub id: String,
}

impl Default for InstallSection {
    fn default() -> Self {
        InstallSection {
            id: Uuid::new_v4().to_string(),
        }
    }
}

/// The product catalog: which store product ids grant what.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductsSection {
    /// Product ids granting one session credit per purchase.
    pub consumable_ids: Vec<String>,

    /// Product ids granting time-boxed unlimited access.
    pub subscription_ids: Vec<String>,
}

impl Default for ProductsSection {
    fn default() -> Self {
        ProductsSection {
            consumable_ids: vec!["com.paygate.session.single".to_string()],
            subscription_ids: vec!["com.paygate.subscription.monthly".to_string()],
        }
    }
}

/// Reconciler tuning knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconcileSection {
    /// Per-call verification timeout. A timed-out call is treated as a
    /// transient failure.
    pub verify_timeout_secs: u64,

    /// Initial backoff between retries of a transiently failing
    /// verification call.
    pub initial_backoff_ms: u64,

    /// Cap on the backoff interval.
    pub max_backoff_secs: u64,

    /// Total retry budget per transaction before the failure is reported
    /// in the restore summary.
    pub max_retry_elapsed_secs: u64,

    /// Ledger entries older than this are eligible for pruning. Must
    /// comfortably exceed any plausible store re-delivery window.
    pub ledger_retention_days: i64,
}

impl Default for ReconcileSection {
    fn default() -> Self {
        ReconcileSection {
            verify_timeout_secs: 10,
            initial_backoff_ms: 250,
            max_backoff_secs: 5,
            max_retry_elapsed_secs: 30,
            ledger_retention_days: 365,
        }
    }
}

// =============================================================================
// Entitlement Config
// =============================================================================

/// Top-level configuration for the sync layer.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EntitlementConfig {
    pub install: InstallSection,
    pub products: ProductsSection,
    pub reconcile: ReconcileSection,
}

impl EntitlementConfig {
    /// Loads configuration using the documented source priority.
    ///
    /// A missing file is not an error - defaults apply. A present but
    /// unparsable file is an error: silently ignoring a broken catalog
    /// could misclassify purchases.
    pub fn load() -> GrantResult<Self> {
        let path = match std::env::var("PAYGATE_CONFIG") {
            Ok(p) => PathBuf::from(p),
            Err(_) => Self::default_path()?,
        };

        let mut config = if path.exists() {
            Self::load_from_path(&path)?
        } else {
            debug!(path = %path.display(), "No config file, using defaults");
            EntitlementConfig::default()
        };

        if let Ok(id) = std::env::var("PAYGATE_INSTALL_ID") {
            config.install.id = id;
        }

        config.validate()?;
        Ok(config)
    }

    /// Loads configuration from a specific TOML file.
    pub fn load_from_path(path: &Path) -> GrantResult<Self> {
        info!(path = %path.display(), "Loading entitlement config");

        let raw = std::fs::read_to_string(path)
            .map_err(|e| GrantError::InvalidConfig(format!("read {}: {e}", path.display())))?;
        let config: EntitlementConfig = toml::from_str(&raw)
            .map_err(|e| GrantError::InvalidConfig(format!("parse {}: {e}", path.display())))?;

        config.validate()?;
        Ok(config)
    }

    /// Writes the configuration to a TOML file.
    pub fn save_to_path(&self, path: &Path) -> GrantResult<()> {
        let raw = toml::to_string_pretty(self)
            .map_err(|e| GrantError::InvalidConfig(format!("serialize config: {e}")))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| GrantError::InvalidConfig(format!("create {}: {e}", parent.display())))?;
        }
        std::fs::write(path, raw)
            .map_err(|e| GrantError::InvalidConfig(format!("write {}: {e}", path.display())))?;

        Ok(())
    }

    /// Platform config file location.
    fn default_path() -> GrantResult<PathBuf> {
        let dirs = directories::ProjectDirs::from("com", "paygate", "paygate")
            .ok_or_else(|| GrantError::InvalidConfig("no home directory".to_string()))?;
        Ok(dirs.config_dir().join("entitlement.toml"))
    }

    /// Classifies a store product id against the catalog.
    ///
    /// `None` means the product is outside the catalog; the verifier
    /// rejects such transactions.
    #[must_use]
    pub fn classify(&self, product_id: &str) -> Option<ProductKind> {
        if self.products.consumable_ids.iter().any(|id| id == product_id) {
            return Some(ProductKind::Consumable);
        }
        if self.products.subscription_ids.iter().any(|id| id == product_id) {
            return Some(ProductKind::Subscription);
        }
        None
    }

    /// Validates the configuration.
    ///
    /// ## Rules
    /// - at least one product configured
    /// - no product id listed as both consumable and subscription
    pub fn validate(&self) -> GrantResult<()> {
        if self.products.consumable_ids.is_empty() && self.products.subscription_ids.is_empty() {
            return Err(GrantError::InvalidConfig(
                "product catalog is empty".to_string(),
            ));
        }

        for id in &self.products.consumable_ids {
            if self.products.subscription_ids.contains(id) {
                return Err(GrantError::InvalidConfig(format!(
                    "product id '{id}' is both consumable and subscription"
                )));
            }
        }

        Ok(())
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = EntitlementConfig::default();
        assert!(config.validate().is_ok());
        assert!(!config.install.id.is_empty());
    }

    #[test]
    fn test_classify() {
        let config = EntitlementConfig::default();
        assert_eq!(
            config.classify("com.paygate.session.single"),
            Some(ProductKind::Consumable)
        );
        assert_eq!(
            config.classify("com.paygate.subscription.monthly"),
            Some(ProductKind::Subscription)
        );
        assert_eq!(config.classify("com.other.thing"), None);
    }

    #[test]
    fn test_overlapping_catalog_rejected() {
        let mut config = EntitlementConfig::default();
        config
            .products
            .subscription_ids
            .push("com.paygate.session.single".to_string());
        assert!(matches!(
            config.validate(),
            Err(GrantError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_empty_catalog_rejected() {
        let mut config = EntitlementConfig::default();
        config.products.consumable_ids.clear();
        config.products.subscription_ids.clear();
        assert!(matches!(
            config.validate(),
            Err(GrantError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_toml_roundtrip() {
        let config = EntitlementConfig::default();
        let raw = toml::to_string_pretty(&config).unwrap();
        let back: EntitlementConfig = toml::from_str(&raw).unwrap();
        assert_eq!(back.install.id, config.install.id);
        assert_eq!(back.products.consumable_ids, config.products.consumable_ids);
        assert_eq!(
            back.reconcile.verify_timeout_secs,
            config.reconcile.verify_timeout_secs
        );
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let raw = r#"
            [products]
            consumable_ids = ["com.example.one"]
            subscription_ids = []
        "#;
        let config: EntitlementConfig = toml::from_str(raw).unwrap();
        assert_eq!(config.products.consumable_ids, vec!["com.example.one"]);
        // Unlisted sections come from defaults.
        assert_eq!(config.reconcile.verify_timeout_secs, 10);
        assert!(!config.install.id.is_empty());
    }
}
