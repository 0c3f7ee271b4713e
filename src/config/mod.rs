//! Configuration module for backup-sync
//!
//! This module handles loading and validating the TOML configuration file.
//!
//! ## Layout
//!
//! - `[global]`: logging, retry defaults, default exclude patterns
//! - `[storages.<name>]`: one provider account (`type = "s3" | "cloudfiles" | "gcs" | "dropbox"`)
//! - `[syncers.<name>]`: directories kept in sync with a storage
//!
//! Per-storage `max_retries` / `retry_wait_seconds` override the global values.
//!
//! ## Example Usage
//!
//! ```no_run
//! use backup_sync::config;
//!
//! let config = config::load_config("backup-sync.toml")?;
//!
//! for (name, syncer) in &config.syncers {
//!     println!("Syncer: {}, Storage: {}", name, syncer.storage);
//! }
//! # Ok::<(), config::ConfigError>(())
//! ```

mod loader;
mod types;

pub use loader::{load_config, parse_config, ConfigError, Result};
pub use types::*;

use crate::utils::retry::RetryPolicy;

/// Retry policy for a storage: its own overrides, else the global settings
pub fn effective_retry_policy(storage: &StorageConfig, global: &GlobalConfig) -> RetryPolicy {
    RetryPolicy::from_secs(
        storage.max_retries.unwrap_or(global.max_retries),
        storage
            .retry_wait_seconds
            .unwrap_or(global.retry_wait_seconds),
    )
}

/// Expand tilde (~) in path
pub fn expand_tilde(path: &std::path::Path) -> std::path::PathBuf {
    if let Ok(stripped) = path.strip_prefix("~") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    }
    path.to_path_buf()
}
