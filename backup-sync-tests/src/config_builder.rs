//! Fluent API for building test configurations
//!
//! Provides a builder pattern for creating test configurations with sensible defaults.

use backup_sync::config::{
    Config, DropboxConfig, GlobalConfig, ProviderConfig, S3Config, StorageConfig, SyncerConfig,
};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Builder for creating test configurations
pub struct ConfigBuilder {
    temp_dir: TempDir,
    global: GlobalConfig,
    storages: HashMap<String, StorageConfig>,
    syncers: HashMap<String, SyncerConfig>,
}

impl ConfigBuilder {
    /// Create a new ConfigBuilder with logs in a temp directory and no retry waits
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");

        let log_directory = temp_dir.path().join("logs");
        fs::create_dir_all(&log_directory).expect("Failed to create log_directory");

        let global = GlobalConfig {
            log_directory,
            log_level: "debug".to_string(),
            log_max_files: 5,
            max_retries: 0,
            retry_wait_seconds: 0,
            timeout_seconds: 5,
            ..Default::default()
        };

        Self {
            temp_dir,
            global,
            storages: HashMap::new(),
            syncers: HashMap::new(),
        }
    }

    /// Create a config with one S3 storage named `s3`
    pub fn minimal() -> Self {
        Self::new().add_s3_storage("s3", "test-bucket")
    }

    /// Set the log directory
    pub fn with_log_dir(mut self, path: &Path) -> Self {
        self.global.log_directory = path.to_path_buf();
        self
    }

    /// Set the global retry policy
    pub fn with_retries(mut self, max_retries: u32, wait_seconds: u64) -> Self {
        self.global.max_retries = max_retries;
        self.global.retry_wait_seconds = wait_seconds;
        self
    }

    /// Set the global exclude patterns
    pub fn with_default_excludes(mut self, excludes: &[&str]) -> Self {
        self.global.default_excludes = excludes.iter().map(|e| e.to_string()).collect();
        self
    }

    /// Add an S3 storage with dummy credentials
    pub fn add_s3_storage(mut self, name: &str, bucket: &str) -> Self {
        self.storages.insert(
            name.to_string(),
            storage(ProviderConfig::S3(S3Config {
                access_key_id: "AKIDEXAMPLE".to_string(),
                secret_access_key: "secret".to_string(),
                region: "us-east-1".to_string(),
                bucket: bucket.to_string(),
                endpoint: None,
                chunk_size_mb: 5,
                storage_class: None,
                encryption: None,
            })),
        );
        self
    }

    /// Add a Dropbox storage with a dummy token
    pub fn add_dropbox_storage(mut self, name: &str) -> Self {
        self.storages.insert(
            name.to_string(),
            storage(ProviderConfig::Dropbox(DropboxConfig {
                access_token: "test-token".to_string(),
                chunk_size_mb: 4,
            })),
        );
        self
    }

    /// Add a storage with custom settings
    pub fn add_storage(mut self, name: &str, storage: StorageConfig) -> Self {
        self.storages.insert(name.to_string(), storage);
        self
    }

    /// Add a syncer with default options
    pub fn add_syncer(mut self, name: &str, storage: &str, directories: &[&Path]) -> Self {
        self.syncers.insert(
            name.to_string(),
            SyncerConfig {
                storage: storage.to_string(),
                description: format!("Test syncer: {}", name),
                path: "backups".to_string(),
                directories: directories.iter().map(|d| d.to_path_buf()).collect(),
                mirror: false,
                thread_count: 0,
                excludes: vec![],
            },
        );
        self
    }

    /// Add a syncer with full configuration
    pub fn add_syncer_config(mut self, name: &str, syncer: SyncerConfig) -> Self {
        self.syncers.insert(name.to_string(), syncer);
        self
    }

    /// Get the temp directory path
    pub fn temp_dir(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Build the Config
    pub fn build(self) -> Config {
        self.persist().0
    }

    /// Keep the temp directory (don't delete on drop)
    pub fn persist(self) -> (Config, TempDir) {
        let config = Config {
            global: self.global,
            storages: self.storages,
            syncers: self.syncers,
        };
        (config, self.temp_dir)
    }

    /// Write the config as TOML into its temp directory
    pub fn write(self) -> (PathBuf, Config, TempDir) {
        let (config, temp_dir) = self.persist();
        let path = temp_dir.path().join("backup-sync.toml");
        let toml_str = toml::to_string_pretty(&config).expect("Failed to serialize config");
        fs::write(&path, toml_str).expect("Failed to write config");
        (path, config, temp_dir)
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn storage(provider: ProviderConfig) -> StorageConfig {
    StorageConfig {
        provider,
        description: String::new(),
        path: String::new(),
        days_to_keep: None,
        max_retries: None,
        retry_wait_seconds: None,
    }
}
