//! Test utilities for backup-sync
//!
//! This crate provides shared test utilities, an in-memory recording backend,
//! and helper functions for testing the backup-sync application.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use test_utils::{ConfigBuilder, RecordingBackend, TestContext};
//!
//! #[test]
//! fn my_test() {
//!     let ctx = TestContext::new();
//!     let backend = RecordingBackend::new();
//!     let config = ConfigBuilder::new()
//!         .add_dropbox_storage("remote")
//!         .add_syncer("docs", "remote", &[ctx.temp_dir()])
//!         .build();
//!     // ... test code
//! }
//! ```

pub mod config_builder;
pub mod fixtures;
pub mod recording_backend;
pub mod test_context;

// Re-export commonly used items
pub use config_builder::ConfigBuilder;
pub use fixtures::*;
pub use recording_backend::{RecordedCall, RecordingBackend};
pub use test_context::{OptionAssertions, ResultAssertions, TestContext};

// Re-export types from the main crate for convenience
pub use backup_sync::config::{
    Config, DropboxConfig, GlobalConfig, ProviderConfig, S3Config, StorageConfig, SyncerConfig,
};

// Re-export provider API mocks from the main crate
pub use backup_sync::cloud::cloudfiles::api::mock::MockSwiftApi;
pub use backup_sync::cloud::dropbox::api::mock::MockDropboxApi;
pub use backup_sync::cloud::gcs::api::mock::MockGcsApi;
pub use backup_sync::cloud::mock::{MockCall, MockStore, StoredObject};
pub use backup_sync::cloud::s3::api::mock::MockS3Api;

/// Common test result type
pub type TestResult<T = ()> = anyhow::Result<T>;
