//! WAL segment files
//!
//! Segments are named `wal-<lsn>.log` where `<lsn>` is the zero-padded
//! LSN of the first record the segment may hold, so lexical file order is
//! replay order. Only the newest segment is writable; rotation closes it
//! and opens the next.
//!
//! # Segment layout
//!
//! ```text
//! ┌────────────────────────────────────┐
//! │ Segment Header (32 bytes)          │
//! ├────────────────────────────────────┤
//! │ Record 1 │ Record 2 │ ...          │
//! └────────────────────────────────────┘
//! ```

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Magic bytes identifying a WAL segment file
pub const SEGMENT_MAGIC: [u8; 4] = *b"BRIW";

/// Current segment format version
pub const SEGMENT_FORMAT_VERSION: u32 = 1;

/// Size of the segment header in bytes
pub const SEGMENT_HEADER_SIZE: usize = 32;

/// WAL segment header (32 bytes).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentHeader {
    /// Magic bytes
    pub magic: [u8; 4],
    /// Format version
    pub format_version: u32,
    /// LSN of the first record this segment may hold
    pub first_lsn: u64,
    /// Database UUID, shared by all segments of one database
    pub database_uuid: [u8; 16],
}

impl SegmentHeader {
    /// Create a header for a new segment.
    pub fn new(first_lsn: u64, database_uuid: [u8; 16]) -> Self {
        SegmentHeader {
            magic: SEGMENT_MAGIC,
            format_version: SEGMENT_FORMAT_VERSION,
            first_lsn,
            database_uuid,
        }
    }

    /// Serialise to the fixed 32-byte form.
    pub fn to_bytes(&self) -> [u8; SEGMENT_HEADER_SIZE] {
        let mut bytes = [0u8; SEGMENT_HEADER_SIZE];
        bytes[0..4].copy_from_slice(&self.magic);
        bytes[4..8].copy_from_slice(&self.format_version.to_le_bytes());
        bytes[8..16].copy_from_slice(&self.first_lsn.to_le_bytes());
        bytes[16..32].copy_from_slice(&self.database_uuid);
        bytes
    }

    /// Parse from the fixed 32-byte form.
    pub fn from_bytes(bytes: &[u8; SEGMENT_HEADER_SIZE]) -> Option<Self> {
        Some(SegmentHeader {
            magic: bytes[0..4].try_into().ok()?,
            format_version: u32::from_le_bytes(bytes[4..8].try_into().ok()?),
            first_lsn: u64::from_le_bytes(bytes[8..16].try_into().ok()?),
            database_uuid: bytes[16..32].try_into().ok()?,
        })
    }

    /// Whether the magic bytes are correct.
    pub fn is_valid(&self) -> bool {
        self.magic == SEGMENT_MAGIC
    }
}

/// An open WAL segment file.
pub struct WalSegment {
    file: File,
    header: SegmentHeader,
    write_position: u64,
    path: PathBuf,
    closed: bool,
}

impl WalSegment {
    /// Create a new segment and write its header.
    pub fn create(dir: &Path, first_lsn: u64, database_uuid: [u8; 16]) -> std::io::Result<Self> {
        let path = Self::segment_path(dir, first_lsn);
        let mut file = OpenOptions::new()
            .create_new(true)
            .write(true)
            .read(true)
            .open(&path)?;

        let header = SegmentHeader::new(first_lsn, database_uuid);
        file.write_all(&header.to_bytes())?;

        Ok(WalSegment {
            file,
            header,
            write_position: SEGMENT_HEADER_SIZE as u64,
            path,
            closed: false,
        })
    }

    /// Open an existing segment for appending.
    pub fn open_append(dir: &Path, first_lsn: u64) -> std::io::Result<Self> {
        let path = Self::segment_path(dir, first_lsn);
        let mut file = OpenOptions::new().read(true).write(true).open(&path)?;
        let header = Self::read_header(&mut file, first_lsn)?;
        let write_position = file.seek(SeekFrom::End(0))?;

        Ok(WalSegment {
            file,
            header,
            write_position,
            path,
            closed: false,
        })
    }

    /// Open an existing segment read-only.
    pub fn open_read(dir: &Path, first_lsn: u64) -> std::io::Result<Self> {
        let path = Self::segment_path(dir, first_lsn);
        let mut file = OpenOptions::new().read(true).open(&path)?;
        let header = Self::read_header(&mut file, first_lsn)?;
        let write_position = file.seek(SeekFrom::End(0))?;

        Ok(WalSegment {
            file,
            header,
            write_position,
            path,
            closed: true,
        })
    }

    fn read_header(file: &mut File, expected_first_lsn: u64) -> std::io::Result<SegmentHeader> {
        let mut header_bytes = [0u8; SEGMENT_HEADER_SIZE];
        file.read_exact(&mut header_bytes)?;

        let header = SegmentHeader::from_bytes(&header_bytes).ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::InvalidData, "invalid segment header")
        })?;
        if !header.is_valid() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "invalid segment magic bytes",
            ));
        }
        if header.first_lsn != expected_first_lsn {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!(
                    "segment lsn mismatch: expected {}, got {}",
                    expected_first_lsn, header.first_lsn
                ),
            ));
        }
        Ok(header)
    }

    /// Path of the segment holding records from `first_lsn`.
    pub fn segment_path(dir: &Path, first_lsn: u64) -> PathBuf {
        dir.join(format!("wal-{:012}.log", first_lsn))
    }

    /// List the first-LSNs of all segments in a directory, in replay order.
    pub fn list(dir: &Path) -> std::io::Result<Vec<u64>> {
        let mut segments = Vec::new();
        for entry in std::fs::read_dir(dir)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().to_string();
            if let Some(stem) = name.strip_prefix("wal-").and_then(|s| s.strip_suffix(".log")) {
                if let Ok(lsn) = stem.parse::<u64>() {
                    segments.push(lsn);
                }
            }
        }
        segments.sort_unstable();
        Ok(segments)
    }

    /// First LSN this segment may hold.
    pub fn first_lsn(&self) -> u64 {
        self.header.first_lsn
    }

    /// Database UUID recorded in the header.
    pub fn database_uuid(&self) -> [u8; 16] {
        self.header.database_uuid
    }

    /// Current size in bytes (header included).
    pub fn size(&self) -> u64 {
        self.write_position
    }

    /// File path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append bytes. Fails on a closed segment.
    pub fn write(&mut self, data: &[u8]) -> std::io::Result<()> {
        if self.closed {
            return Err(std::io::Error::new(
                std::io::ErrorKind::PermissionDenied,
                "cannot write to closed segment",
            ));
        }
        self.file.write_all(data)?;
        self.write_position += data.len() as u64;
        Ok(())
    }

    /// fsync segment contents.
    pub fn sync(&mut self) -> std::io::Result<()> {
        self.file.sync_all()
    }

    /// Sync and mark immutable.
    pub fn close(&mut self) -> std::io::Result<()> {
        if !self.closed {
            self.file.sync_all()?;
            self.closed = true;
        }
        Ok(())
    }

    /// Whether the segment is closed.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Truncate at `position`, discarding a partial or corrupt tail.
    ///
    /// Used during recovery so later appends never land after garbage.
    pub fn truncate(&mut self, position: u64) -> std::io::Result<()> {
        if self.closed {
            return Err(std::io::Error::new(
                std::io::ErrorKind::PermissionDenied,
                "cannot truncate closed segment",
            ));
        }
        self.file.set_len(position)?;
        self.write_position = position;
        self.file.seek(SeekFrom::Start(position))?;
        Ok(())
    }

    /// Read everything after the header.
    pub fn read_body(&mut self) -> std::io::Result<Vec<u8>> {
        self.file.seek(SeekFrom::Start(SEGMENT_HEADER_SIZE as u64))?;
        let mut body = Vec::new();
        self.file.read_to_end(&mut body)?;
        Ok(body)
    }
}
