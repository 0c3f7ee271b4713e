//! Sync engine and sync manager tests
//!
//! Driven through [`test_utils::RecordingBackend`], which stores objects in
//! memory and records every call the engine makes.

mod engine;
