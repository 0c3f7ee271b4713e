//! Segment planning for multipart uploads

use super::{CloudError, Result};
use crate::utils::digest;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

pub const MIB: u64 = 1024 * 1024;
pub const GIB: u64 = 1024 * MIB;
pub const TIB: u64 = 1024 * GIB;

/// Smallest whole-MiB segment size `>= requested` that keeps the segment count of a
/// `file_size`-byte file within `max_segments`
///
/// Returns `requested` unchanged when it already fits.
pub fn adjusted_segment_bytes(requested: u64, file_size: u64, max_segments: u64) -> u64 {
    if requested == 0 || max_segments == 0 {
        return requested;
    }
    if file_size.div_ceil(requested) <= max_segments {
        return requested;
    }

    let requested_mib = requested.div_ceil(MIB);
    let needed_mib = file_size.div_ceil(max_segments).div_ceil(MIB);
    requested_mib.max(needed_mib) * MIB
}

/// Number of segments a file splits into
pub fn segment_count(file_size: u64, segment_bytes: u64) -> u64 {
    if segment_bytes == 0 {
        return 1;
    }
    file_size.div_ceil(segment_bytes).max(1)
}

/// Provider limits that apply to one upload
#[derive(Debug, Clone, Copy)]
pub struct UploadLimits {
    pub provider: &'static str,
    pub max_object_bytes: u64,
    pub max_multipart_bytes: u64,
    pub max_segments: u64,
}

/// How a file of a given size will be uploaded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadPlan {
    SingleShot,
    Segmented { segment_bytes: u64, segments: u64 },
}

impl UploadLimits {
    /// Choose single-shot or segmented upload, enforcing the size limits up front
    pub fn plan(&self, path: &Path, file_size: u64, segment_bytes: u64) -> Result<UploadPlan> {
        if segment_bytes == 0 || file_size <= segment_bytes {
            if file_size > self.max_object_bytes {
                return Err(self.too_large(path, file_size, self.max_object_bytes, false));
            }
            return Ok(UploadPlan::SingleShot);
        }

        if file_size > self.max_multipart_bytes {
            return Err(self.too_large(path, file_size, self.max_multipart_bytes, true));
        }

        let adjusted = adjusted_segment_bytes(segment_bytes, file_size, self.max_segments);
        if adjusted != segment_bytes {
            warn!(
                provider = self.provider,
                original_mib = segment_bytes / MIB,
                adjusted_mib = adjusted / MIB,
                "Segment size adjusted from {} MiB to {} MiB to stay within {} segments",
                segment_bytes / MIB,
                adjusted / MIB,
                self.max_segments
            );
        }

        Ok(UploadPlan::Segmented {
            segment_bytes: adjusted,
            segments: segment_count(file_size, adjusted),
        })
    }

    fn too_large(&self, path: &Path, size: u64, limit: u64, multipart: bool) -> CloudError {
        CloudError::FileTooLarge {
            path: path.to_path_buf(),
            size,
            limit,
            limit_kind: if multipart {
                super::SizeLimit::Multipart
            } else {
                super::SizeLimit::SingleObject
            },
            provider: self.provider,
        }
    }
}

/// Size of a local file, as an upload error on failure
pub fn file_size(path: &Path) -> Result<u64> {
    std::fs::metadata(path)
        .map(|m| m.len())
        .map_err(|e| CloudError::io(path, e))
}

/// One contiguous byte range of a source file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkSpec {
    /// 1-based part number
    pub index: u32,
    pub byte_offset: u64,
    pub byte_length: u64,
    pub content_md5: [u8; 16],
}

impl ChunkSpec {
    pub fn md5_hex(&self) -> String {
        hex::encode(self.content_md5)
    }

    pub fn md5_base64(&self) -> String {
        STANDARD.encode(self.content_md5)
    }
}

/// Reads a file in fixed windows, one segment at a time
///
/// Holds a single read handle; memory use is bounded by the segment size.
pub struct SegmentReader {
    path: PathBuf,
    file: File,
    segment_bytes: u64,
    file_size: u64,
    offset: u64,
    next_index: u32,
}

impl SegmentReader {
    pub fn open(path: &Path, segment_bytes: u64, file_size: u64) -> Result<Self> {
        let file = File::open(path).map_err(|e| CloudError::io(path, e))?;
        Ok(Self {
            path: path.to_path_buf(),
            file,
            segment_bytes,
            file_size,
            offset: 0,
            next_index: 1,
        })
    }
}

impl Iterator for SegmentReader {
    type Item = Result<(ChunkSpec, Vec<u8>)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.offset >= self.file_size {
            return None;
        }

        let length = self.segment_bytes.min(self.file_size - self.offset);
        let mut data = vec![0u8; length as usize];
        if let Err(e) = self.file.read_exact(&mut data) {
            self.offset = self.file_size;
            return Some(Err(CloudError::io(&self.path, e)));
        }

        let spec = ChunkSpec {
            index: self.next_index,
            byte_offset: self.offset,
            byte_length: length,
            content_md5: digest::md5_digest(&data),
        };
        self.offset += length;
        self.next_index += 1;
        Some(Ok((spec, data)))
    }
}

/// Logs upload progress at roughly every 10% of segments
pub struct ProgressReporter {
    label: String,
    marks: Vec<u64>,
}

impl ProgressReporter {
    pub fn new(label: impl Into<String>, total_segments: u64) -> Self {
        Self {
            label: label.into(),
            marks: progress_marks(total_segments),
        }
    }

    /// Report that `completed` segments are done
    pub fn completed(&self, completed: u64) {
        if let Some(percent) = progress_percent(&self.marks, completed) {
            info!("  ...{}% Complete ({})...", percent, self.label);
        }
    }
}

/// Segment counts at which 10%, 20% ... 90% is reached
pub fn progress_marks(total_segments: u64) -> Vec<u64> {
    (1..=9).map(|n| total_segments * n / 10).collect()
}

/// Percentage to report once `completed` segments are done, if it lands on a mark
pub fn progress_percent(marks: &[u64], completed: u64) -> Option<u32> {
    marks
        .iter()
        .rposition(|&mark| mark == completed && mark > 0)
        .map(|i| (i as u32 + 1) * 10)
}
