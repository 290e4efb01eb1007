//! Shared utilities for evmlift modules.

/// The external currency ledger used by run harnesses
pub mod currency;

/// Assorted utilities
pub mod utils;
