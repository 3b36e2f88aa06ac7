//! Configuration management
//!
//! Environment-seeded settings for the ledger engine: data directory and
//! the fixed mining difficulty.

pub mod settings;

pub use settings::{Config, GLOBAL_CONFIG};
