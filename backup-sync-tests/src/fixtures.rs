//! Test fixtures and sample data
//!
//! Provides pre-built file trees and config templates for testing.

use std::fs::{self, File};
use std::path::{Path, PathBuf};

/// A small tree with nested directories
pub fn sample_tree() -> Vec<(&'static str, &'static str)> {
    vec![
        ("readme.txt", "hello"),
        ("docs/report.pdf", "pdf bytes"),
        ("docs/notes/todo.md", "- buy milk"),
        ("photos/cat.jpg", "meow"),
    ]
}

/// Write `(relative path, content)` pairs under `root`
pub fn write_tree(root: &Path, files: &[(&str, &str)]) -> Vec<PathBuf> {
    files
        .iter()
        .map(|(relative, content)| {
            let path = root.join(relative);
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).expect("Failed to create parent directory");
            }
            fs::write(&path, content).expect("Failed to write file");
            path
        })
        .collect()
}

/// Create a sparse file of `size` bytes without writing its contents
pub fn sparse_file(path: &Path, size: u64) -> PathBuf {
    let file = File::create(path).expect("Failed to create sparse file");
    file.set_len(size).expect("Failed to size sparse file");
    path.to_path_buf()
}

/// File of `size` bytes with a repeating, position-dependent pattern
pub fn patterned_file(path: &Path, size: usize) -> Vec<u8> {
    let data: Vec<u8> = (0..size).map(|i| (i % 251) as u8).collect();
    fs::write(path, &data).expect("Failed to write patterned file");
    data
}

/// Minimal valid config TOML template
///
/// Placeholders: `{log_dir}`, `{directory}`
pub fn minimal_config_toml() -> &'static str {
    r#"
[global]
log_directory = "{log_dir}"
max_retries = 0
retry_wait_seconds = 0

[storages.remote]
type = "dropbox"
access_token = "test-token"

[syncers.documents]
storage = "remote"
path = "backups"
directories = ["{directory}"]
"#
}

/// Render [`minimal_config_toml`] with forward-slash paths
pub fn render_minimal_config(log_dir: &Path, directory: &Path) -> String {
    minimal_config_toml()
        .replace("{log_dir}", &toml_path(log_dir))
        .replace("{directory}", &toml_path(directory))
}

/// Path as a TOML-safe string
pub fn toml_path(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}
