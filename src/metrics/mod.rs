//! Prometheus metrics for the Ark backup controller
//!
//! This module exposes metrics for monitoring controller health and performance.

mod prometheus;

pub use prometheus::*;
