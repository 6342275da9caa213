//! # Repository Module
//!
//! Repository implementation for persisted entitlement state.
//!
//! ## Repository Pattern
//! The repository wraps the connection pool and owns every SQL statement
//! that touches its tables; callers deal in domain types from
//! `paygate-core`, never in rows.

pub mod entitlement;

pub use entitlement::EntitlementRepository;
