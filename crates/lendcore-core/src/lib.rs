//! Business logic for the Lendcore loan-origination chat platform.
//!
//! This crate owns the conversation-state coordination layer: the stage
//! machine, the intent classifier, the agent contract with its retry and
//! recovery engine, the worker agents, the master agent, and the session
//! manager. Storage and external-gateway traits are declared here; their
//! implementations live in `lendcore-infra`.

pub mod agent;
pub mod calculator;
pub mod conversation;
pub mod errors;
pub mod intent;
pub mod session;
pub mod storage;
