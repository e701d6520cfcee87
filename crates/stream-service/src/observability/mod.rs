//! Observability for the stream service.
//!
//! Provides metrics definitions and recording helpers.

pub mod metrics;
