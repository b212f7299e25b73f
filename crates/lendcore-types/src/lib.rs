//! Shared domain types for Lendcore.
//!
//! This crate contains the core domain types used across the loan
//! origination platform: conversation contexts and tasks, customer and
//! loan records, verification records, and their associated error types.
//!
//! Zero infrastructure dependencies -- only serde, uuid, chrono, thiserror.

pub mod config;
pub mod conversation;
pub mod customer;
pub mod error;
pub mod loan;
pub mod verification;
