use super::types::*;
use crate::cloud::{dropbox, s3};
use crate::sync::ExcludeSet;
use std::fs;
use std::path::Path;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Storage '{0}' not found")]
    StorageNotFound(String),

    #[error("Syncer '{0}' not found")]
    SyncerNotFound(String),
}

pub type Result<T> = std::result::Result<T, ConfigError>;

/// Largest part/segment any provider accepts, in MiB
const MAX_PART_MB: u64 = 5 * 1024;

/// Load and validate configuration from a TOML file
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config> {
    let contents = fs::read_to_string(path)?;
    parse_config(&contents)
}

/// Parse and validate configuration from a TOML string
pub fn parse_config(contents: &str) -> Result<Config> {
    let config: Config = toml::from_str(contents)?;
    validate_config(&config)?;
    Ok(config)
}

/// Validate the configuration
fn validate_config(config: &Config) -> Result<()> {
    if config.storages.is_empty() {
        return Err(ConfigError::ValidationError(
            "No storages defined".to_string(),
        ));
    }

    for (name, storage) in &config.storages {
        validate_storage(name, storage)?;
    }

    for (name, syncer) in &config.syncers {
        validate_syncer(name, syncer, config)?;
    }

    ExcludeSet::new(&config.global.default_excludes).map_err(|e| {
        ConfigError::ValidationError(format!("Invalid default exclude pattern: {}", e))
    })?;

    Ok(())
}

fn validate_storage(name: &str, storage: &StorageConfig) -> Result<()> {
    let invalid = |message: String| {
        Err(ConfigError::ValidationError(format!(
            "Storage '{}': {}",
            name, message
        )))
    };

    match &storage.provider {
        ProviderConfig::S3(s3_config) => {
            if s3_config.bucket.is_empty() {
                return invalid("bucket must not be empty".to_string());
            }
            let chunk = s3_config.chunk_size_mb;
            if chunk != 0 && !(s3::MIN_CHUNK_MB..=MAX_PART_MB).contains(&chunk) {
                return invalid(format!(
                    "chunk_size_mb must be 0 or between {} and {} (got {})",
                    s3::MIN_CHUNK_MB,
                    MAX_PART_MB,
                    chunk
                ));
            }
        }
        ProviderConfig::CloudFiles(cf_config) => {
            if cf_config.container.is_empty() {
                return invalid("container must not be empty".to_string());
            }
            if cf_config.segment_size_mb > MAX_PART_MB {
                return invalid(format!(
                    "segment_size_mb must not exceed {} (got {})",
                    MAX_PART_MB, cf_config.segment_size_mb
                ));
            }
            if cf_config.segments_container.as_deref() == Some(cf_config.container.as_str()) {
                return invalid(
                    "segments_container must differ from container".to_string(),
                );
            }
        }
        ProviderConfig::Gcs(gcs_config) => {
            if gcs_config.bucket.is_empty() {
                return invalid("bucket must not be empty".to_string());
            }
            let chunk = gcs_config.chunk_size_mb;
            if chunk != 0 && !(s3::MIN_CHUNK_MB..=MAX_PART_MB).contains(&chunk) {
                return invalid(format!(
                    "chunk_size_mb must be 0 or between {} and {} (got {})",
                    s3::MIN_CHUNK_MB,
                    MAX_PART_MB,
                    chunk
                ));
            }
        }
        ProviderConfig::Dropbox(dropbox_config) => {
            if dropbox_config.access_token.is_empty() {
                return invalid("access_token must not be empty".to_string());
            }
            if dropbox_config.chunk_size_mb > dropbox::MAX_CHUNK_MB {
                return invalid(format!(
                    "chunk_size_mb must not exceed {} (got {})",
                    dropbox::MAX_CHUNK_MB,
                    dropbox_config.chunk_size_mb
                ));
            }
        }
    }

    if storage.days_to_keep.is_some()
        && matches!(storage.provider, ProviderConfig::S3(_) | ProviderConfig::Dropbox(_))
    {
        return invalid(format!(
            "days_to_keep is not supported by {} storages",
            storage.storage_type()
        ));
    }

    Ok(())
}

fn validate_syncer(name: &str, syncer: &SyncerConfig, config: &Config) -> Result<()> {
    if !config.storages.contains_key(&syncer.storage) {
        return Err(ConfigError::StorageNotFound(syncer.storage.clone()));
    }

    if syncer.directories.is_empty() {
        return Err(ConfigError::ValidationError(format!(
            "Syncer '{}': no directories defined",
            name
        )));
    }

    for directory in &syncer.directories {
        if directory.file_name().is_none() {
            return Err(ConfigError::ValidationError(format!(
                "Syncer '{}': directory {:?} has no name",
                name, directory
            )));
        }
    }

    ExcludeSet::new(&syncer.excludes).map_err(|e| {
        ConfigError::ValidationError(format!(
            "Syncer '{}': invalid exclude pattern: {}",
            name, e
        ))
    })?;

    Ok(())
}

impl Config {
    pub fn storage(&self, name: &str) -> Result<&StorageConfig> {
        self.storages
            .get(name)
            .ok_or_else(|| ConfigError::StorageNotFound(name.to_string()))
    }

    pub fn syncer(&self, name: &str) -> Result<&SyncerConfig> {
        self.syncers
            .get(name)
            .ok_or_else(|| ConfigError::SyncerNotFound(name.to_string()))
    }

    /// Exclude patterns for a syncer: global defaults followed by its own
    pub fn effective_excludes(&self, syncer: &SyncerConfig) -> Vec<String> {
        let mut excludes = self.global.default_excludes.clone();
        excludes.extend(syncer.excludes.iter().cloned());
        excludes
    }
}
