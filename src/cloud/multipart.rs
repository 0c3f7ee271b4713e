//! Segmented upload driver shared by every provider
//!
//! A provider describes its session protocol through [`MultipartSession`]; the
//! driver streams the file in fixed windows, retries each call on its own, and
//! guarantees the session is either completed or abandoned before returning.

use super::segments::{ChunkSpec, ProgressReporter, SegmentReader};
use super::{Result, RetryPolicy};
use std::path::Path;
use tracing::{debug, warn};

/// Provider side of one segmented upload
pub trait MultipartSession {
    /// Remote key the session writes, for log lines
    fn key(&self) -> &str;

    /// Open a session and return its id
    fn initiate(&self) -> Result<String>;

    /// Send one segment; returns the token the completion call needs
    fn upload_part(&self, session_id: &str, part: &ChunkSpec, data: &[u8]) -> Result<String>;

    /// Commit the session from `(index, token)` pairs in ascending index order
    fn complete(&self, session_id: &str, parts: &[(u32, String)]) -> Result<()>;

    /// Release whatever the session left behind
    fn abort(&self, session_id: &str, parts: &[(u32, String)]) -> Result<()>;
}

/// Upload `source` through `session` in `segment_bytes` windows
pub fn upload_in_parts(
    session: &dyn MultipartSession,
    retry: &RetryPolicy,
    source: &Path,
    file_size: u64,
    segment_bytes: u64,
) -> Result<()> {
    let key = session.key().to_string();
    let session_id = retry.run(&format!("Initiate upload of '{}'", key), || {
        session.initiate()
    })?;
    debug!(key = %key, session_id = %session_id, "Upload session started");

    let mut parts: Vec<(u32, String)> = Vec::new();
    let result = send_parts(
        session,
        retry,
        &session_id,
        source,
        file_size,
        segment_bytes,
        &mut parts,
    )
    .and_then(|()| {
        retry.run(&format!("Complete upload of '{}'", key), || {
            session.complete(&session_id, &parts)
        })
    });

    if let Err(e) = result {
        if let Err(abort_err) = session.abort(&session_id, &parts) {
            warn!(
                key = %key,
                error = %abort_err,
                "Failed to abandon upload session {}",
                session_id
            );
        }
        return Err(e);
    }
    Ok(())
}

fn send_parts(
    session: &dyn MultipartSession,
    retry: &RetryPolicy,
    session_id: &str,
    source: &Path,
    file_size: u64,
    segment_bytes: u64,
    parts: &mut Vec<(u32, String)>,
) -> Result<()> {
    let reader = SegmentReader::open(source, segment_bytes, file_size)?;
    let total = super::segments::segment_count(file_size, segment_bytes);
    let progress = ProgressReporter::new(session.key(), total);

    for segment in reader {
        let (spec, data) = segment?;
        let label = format!("Upload segment {} of '{}'", spec.index, session.key());
        let token = retry.run(&label, || session.upload_part(session_id, &spec, &data))?;
        parts.push((spec.index, token));
        progress.completed(parts.len() as u64);
    }
    Ok(())
}
