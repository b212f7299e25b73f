//! Infrastructure implementations for the Lendcore platform.
//!
//! Everything here implements a trait declared in `lendcore-core::storage`:
//! file-backed context and history stores, the verification ledger, the
//! resilient external-API gateway, and the sanction-letter renderer. The
//! API crate pins the core services to these concrete types at its
//! composition root.

pub mod config;
pub mod context_store;
pub mod document;
pub mod external;
pub mod history;
pub mod letter;
pub mod verification;
