//! Observability setup for the Lendcore service.
//!
//! Owns the tracing-subscriber initialization shared by the server binary
//! so logging looks the same no matter how the service is launched.

pub mod tracing_setup;
