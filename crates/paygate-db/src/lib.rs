//! # paygate-db: Database Layer for Paygate
//!
//! This crate persists the entitlement record and its applied-transaction
//! ledger. It uses SQLite for local storage with sqlx for async operations.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Paygate Data Flow                                │
//! │                                                                         │
//! │  EntitlementService (paygate-sync, inside its critical section)        │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                     paygate-db (THIS CRATE)                     │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────────┐    ┌───────────────┐    ┌──────────────┐  │   │
//! │  │   │   Database    │    │  Repository   │    │  Migrations  │  │   │
//! │  │   │   (pool.rs)   │◄───│ (entitlement) │    │  (embedded)  │  │   │
//! │  │   │   SqlitePool  │    │ load/save/    │    │ 001_initial_ │  │   │
//! │  │   │   WAL mode    │    │ reset/prune   │    │ schema.sql   │  │   │
//! │  │   └───────────────┘    └───────────────┘    └──────────────┘  │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  SQLite database (one record row + ledger table)                       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! - [`pool`] - Connection pool creation and configuration
//! - [`migrations`] - Embedded database migrations
//! - [`error`] - Database error types
//! - [`repository`] - The entitlement repository
//!
//! ## Usage
//!
//! ```rust,ignore
//! use paygate_db::{Database, DbConfig};
//!
//! let db = Database::new(DbConfig::new("path/to/paygate.db")).await?;
//! let stored = db.entitlements().load().await?;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod migrations;
pub mod pool;
pub mod repository;

// =============================================================================
// Re-exports
// =============================================================================

pub use error::{DbError, DbResult};
pub use pool::{Database, DbConfig};
pub use repository::entitlement::{EntitlementRepository, StoredEntitlement};
