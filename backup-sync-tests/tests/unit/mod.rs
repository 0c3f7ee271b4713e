//! Unit tests for backup-sync
//!
//! Configuration parsing and the pure planning logic behind uploads.
