//! Ark backup controller
//!
//! Executes Backup custom resources: validates each request, streams the
//! selected cluster objects to durable storage and records the outcome on
//! the resource's status.

pub mod backupper;
pub mod clock;
pub mod collections;
pub mod config;
pub mod controllers;
pub mod crd;
pub mod error;
pub mod metrics;
pub mod plugin;
pub mod reconcilers;
pub mod store;
pub mod upload;

pub use error::{Error, Result};
