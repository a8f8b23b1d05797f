//! Core reconciliation logic for cross-platform deletion propagation.
//!
//! This crate is intentionally framework-agnostic. The Telegram client,
//! the SQLite ledger, and webhook delivery live behind ports (traits)
//! implemented in adapter crates.

pub mod cache;
pub mod config;
pub mod domain;
pub mod errors;
pub mod listener;
pub mod logging;
pub mod ports;
pub mod reconciler;
pub mod resolver;
pub mod util;

#[cfg(test)]
pub(crate) mod testutil;

pub use errors::{Error, Result};
