//! WAL reader
//!
//! Reads segments in first-LSN order and parses records until the data
//! runs out. A partial record at the end of the newest segment is the
//! normal signature of a crash and is silently discarded; a checksum
//! mismatch discards the rest of that segment and is logged. Recovery
//! never trusts anything after the first bad frame of a segment.

use crate::wal::record::{WalRecord, WalRecordError};
use crate::wal::segment::{WalSegment, SEGMENT_HEADER_SIZE};
use bri_core::Result;
use std::path::Path;
use tracing::{debug, warn};

/// Where and why reading a segment stopped early.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DroppedTail {
    /// First LSN of the affected segment
    pub segment_first_lsn: u64,
    /// Byte offset where valid records end
    pub valid_end: u64,
    /// Total size of the segment file
    pub segment_size: u64,
}

/// The result of scanning a WAL directory.
#[derive(Debug, Default)]
pub struct WalReadResult {
    /// All valid records, in LSN order
    pub records: Vec<WalRecord>,
    /// Set when the newest segment ended in a partial or corrupt tail
    pub dropped_tail: Option<DroppedTail>,
}

/// Read every valid record from every segment under `wal_dir`.
///
/// A missing directory reads as empty.
pub fn read_all(wal_dir: &Path) -> Result<WalReadResult> {
    if !wal_dir.exists() {
        return Ok(WalReadResult::default());
    }

    let segments = WalSegment::list(wal_dir)?;
    let mut result = WalReadResult::default();

    for (index, &first_lsn) in segments.iter().enumerate() {
        let mut segment = WalSegment::open_read(wal_dir, first_lsn)?;
        let body = segment.read_body()?;

        let mut offset = 0usize;
        let mut stopped_early = false;
        while offset < body.len() {
            match WalRecord::from_bytes(&body[offset..]) {
                Ok((record, consumed)) => {
                    result.records.push(record);
                    offset += consumed;
                }
                Err(WalRecordError::InsufficientData) => {
                    debug!(
                        segment = first_lsn,
                        offset,
                        "partial record at segment tail, discarding"
                    );
                    stopped_early = true;
                    break;
                }
                Err(e) => {
                    warn!(
                        segment = first_lsn,
                        offset,
                        error = %e,
                        "bad WAL record, discarding segment tail"
                    );
                    stopped_early = true;
                    break;
                }
            }
        }

        if stopped_early {
            let tail = DroppedTail {
                segment_first_lsn: first_lsn,
                valid_end: SEGMENT_HEADER_SIZE as u64 + offset as u64,
                segment_size: segment.size(),
            };
            if index + 1 == segments.len() {
                result.dropped_tail = Some(tail);
            } else {
                // A bad tail in a non-final segment means records were lost
                // mid-log; later segments are still replayed, but flag it.
                warn!(
                    segment = first_lsn,
                    "non-final WAL segment has a bad tail"
                );
            }
        }
    }

    Ok(result)
}
