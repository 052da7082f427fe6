//! Scheduling domain model.
//!
//! # Responsibility
//! - Define the records the engine reads and rewrites: tenancy entities,
//!   recurring rules, per-date exceptions, personal events and audit rows.
//!
//! # Invariants
//! - Every entity belongs to exactly one center (personal events belong
//!   to a teacher and are read across centers).
//! - Deletion is a soft marker; historical rows stay readable.

pub mod audit;
pub mod exception;
pub mod personal_event;
pub mod rule;
pub mod tenancy;
