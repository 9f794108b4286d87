//! WAL writer
//!
//! Single writer per database: it owns the append offset, LSN assignment,
//! segment rotation, and the fsync policy. Under `FsyncMode::Immediate`
//! every append is synced before returning; under `FsyncMode::Batched`
//! syncing is left to the engine's interval tick calling [`WalWriter::flush`].
//!
//! [`WalWriter::append_batch`] writes a group of ops back-to-back and
//! syncs once at the end — the single WAL barrier transaction commits
//! ride on.

use crate::wal::record::{WalOp, WalRecord};
use crate::wal::segment::WalSegment;
use bri_core::{Error, FsyncMode, Result};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Append-only WAL writer with rotation and fsync policy.
pub struct WalWriter {
    segment: WalSegment,
    wal_dir: PathBuf,
    database_uuid: [u8; 16],
    segment_size: u64,
    fsync_mode: FsyncMode,
    next_lsn: u64,
    unsynced: bool,
}

impl WalWriter {
    /// Open the WAL for appending.
    ///
    /// Resumes the newest existing segment when there is one (keeping its
    /// database UUID), otherwise creates the first segment with
    /// `fallback_uuid`. `next_lsn` is the LSN the next append receives;
    /// recovery computes it from the replayed tail.
    pub fn open(
        wal_dir: &Path,
        fallback_uuid: [u8; 16],
        segment_size: u64,
        fsync_mode: FsyncMode,
        next_lsn: u64,
    ) -> Result<Self> {
        std::fs::create_dir_all(wal_dir)?;

        let existing = WalSegment::list(wal_dir)?;
        let segment = match existing.last() {
            Some(&first_lsn) => match WalSegment::open_append(wal_dir, first_lsn) {
                Ok(segment) => segment,
                Err(e) => {
                    // Unreadable active segment: leave it for recovery to
                    // salvage and start a fresh one after it.
                    debug!(first_lsn, error = %e, "could not resume segment, creating new");
                    WalSegment::create(wal_dir, next_lsn, fallback_uuid)
                        .map_err(|e| Error::storage_with_source("create WAL segment", e))?
                }
            },
            None => WalSegment::create(wal_dir, next_lsn, fallback_uuid)
                .map_err(|e| Error::storage_with_source("create WAL segment", e))?,
        };

        let database_uuid = segment.database_uuid();
        Ok(WalWriter {
            segment,
            wal_dir: wal_dir.to_path_buf(),
            database_uuid,
            segment_size,
            fsync_mode,
            next_lsn,
            unsynced: false,
        })
    }

    /// Append one op, assigning it the next LSN.
    ///
    /// Returns the framed record (with its LSN). Under immediate fsync the
    /// record is durable when this returns.
    pub fn append(&mut self, op: WalOp) -> Result<WalRecord> {
        let record = self.write_record(op)?;
        match self.fsync_mode {
            FsyncMode::Immediate => self.flush()?,
            FsyncMode::Batched => self.unsynced = true,
        }
        Ok(record)
    }

    /// Append a group of ops and sync once after the last.
    ///
    /// This is the atomic-batch barrier: either the whole suffix is
    /// durable, or recovery discards the partial tail.
    pub fn append_batch(&mut self, ops: Vec<WalOp>) -> Result<Vec<WalRecord>> {
        let mut records = Vec::with_capacity(ops.len());
        for op in ops {
            records.push(self.write_record(op)?);
        }
        if !records.is_empty() {
            self.flush()?;
        }
        Ok(records)
    }

    fn write_record(&mut self, op: WalOp) -> Result<WalRecord> {
        let lsn = self.next_lsn;
        let record = WalRecord::new(lsn, op);
        let bytes = record
            .to_bytes()
            .map_err(|e| Error::serialization(e.to_string()))?;

        if self.segment.size() + bytes.len() as u64 > self.segment_size {
            self.rotate(lsn)?;
        }

        self.segment
            .write(&bytes)
            .map_err(|e| Error::storage_with_source("WAL append", e))?;
        self.next_lsn += 1;
        self.unsynced = true;
        Ok(record)
    }

    fn rotate(&mut self, first_lsn: u64) -> Result<()> {
        self.segment
            .close()
            .map_err(|e| Error::storage_with_source("close WAL segment", e))?;
        debug!(
            closed = %self.segment.path().display(),
            first_lsn,
            "rotating WAL segment"
        );
        self.segment = WalSegment::create(&self.wal_dir, first_lsn, self.database_uuid)
            .map_err(|e| Error::storage_with_source("create WAL segment", e))?;
        Ok(())
    }

    /// Force buffered records to disk.
    pub fn flush(&mut self) -> Result<()> {
        if self.unsynced {
            self.segment
                .sync()
                .map_err(|e| Error::storage_with_source("WAL fsync", e))?;
            self.unsynced = false;
        }
        Ok(())
    }

    /// LSN the next append will receive.
    pub fn next_lsn(&self) -> u64 {
        self.next_lsn
    }

    /// LSN of the most recent append, if any append happened.
    pub fn last_lsn(&self) -> Option<u64> {
        self.next_lsn.checked_sub(1).filter(|&lsn| lsn > 0)
    }

    /// Database UUID shared by this WAL's segments.
    pub fn database_uuid(&self) -> [u8; 16] {
        self.database_uuid
    }

    /// Number of segment files on disk.
    pub fn segment_count(&self) -> Result<usize> {
        Ok(WalSegment::list(&self.wal_dir)?.len())
    }

    /// Flush and close the active segment.
    pub fn close(mut self) -> Result<()> {
        self.flush()?;
        self.segment
            .close()
            .map_err(|e| Error::storage_with_source("close WAL segment", e))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wal::reader;
    use tempfile::tempdir;

    fn set_op(n: u64) -> WalOp {
        WalOp::Set {
            key: format!("USER_{n}"),
            value: format!("{{\"n\":{n}}}"),
        }
    }

    fn open_writer(dir: &Path, segment_size: u64, next_lsn: u64) -> WalWriter {
        WalWriter::open(dir, [1u8; 16], segment_size, FsyncMode::Immediate, next_lsn).unwrap()
    }

    #[test]
    fn test_append_assigns_monotonic_lsns() {
        let dir = tempdir().unwrap();
        let mut writer = open_writer(&dir.path().join("wal"), 1024 * 1024, 1);

        let a = writer.append(set_op(1)).unwrap();
        let b = writer.append(set_op(2)).unwrap();
        assert_eq!(a.lsn, 1);
        assert_eq!(b.lsn, 2);
        assert_eq!(writer.next_lsn(), 3);
        assert_eq!(writer.last_lsn(), Some(2));
    }

    #[test]
    fn test_rotation_at_segment_size() {
        let dir = tempdir().unwrap();
        let wal_dir = dir.path().join("wal");
        let mut writer = open_writer(&wal_dir, 150, 1);

        for n in 0..10 {
            writer.append(set_op(n)).unwrap();
        }
        assert!(
            writer.segment_count().unwrap() > 1,
            "small segment size should force rotation"
        );

        // Every record survives rotation
        let result = reader::read_all(&wal_dir).unwrap();
        assert_eq!(result.records.len(), 10);
        let lsns: Vec<u64> = result.records.iter().map(|r| r.lsn).collect();
        assert_eq!(lsns, (1..=10).collect::<Vec<u64>>());
    }

    #[test]
    fn test_reopen_resumes_lsn_and_uuid() {
        let dir = tempdir().unwrap();
        let wal_dir = dir.path().join("wal");

        let uuid;
        {
            let mut writer = open_writer(&wal_dir, 1024 * 1024, 1);
            writer.append(set_op(1)).unwrap();
            uuid = writer.database_uuid();
            writer.close().unwrap();
        }

        // A different fallback uuid must not replace the resumed one
        let mut writer =
            WalWriter::open(&wal_dir, [9u8; 16], 1024 * 1024, FsyncMode::Immediate, 2).unwrap();
        assert_eq!(writer.database_uuid(), uuid);
        let record = writer.append(set_op(2)).unwrap();
        assert_eq!(record.lsn, 2);
    }

    #[test]
    fn test_batch_is_contiguous() {
        let dir = tempdir().unwrap();
        let wal_dir = dir.path().join("wal");
        let mut writer =
            WalWriter::open(&wal_dir, [1u8; 16], 1024 * 1024, FsyncMode::Batched, 1).unwrap();

        let records = writer
            .append_batch(vec![set_op(1), set_op(2), set_op(3)])
            .unwrap();
        let lsns: Vec<u64> = records.iter().map(|r| r.lsn).collect();
        assert_eq!(lsns, vec![1, 2, 3]);

        // The batch synced; everything is readable
        let result = reader::read_all(&wal_dir).unwrap();
        assert_eq!(result.records.len(), 3);
    }
}
