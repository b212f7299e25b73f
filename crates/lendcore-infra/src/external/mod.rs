//! Resilient access to the external collaborator services.

pub mod breaker;
pub mod client;

pub use breaker::{BreakerState, CircuitBreaker};
pub use client::ResilientGateway;
