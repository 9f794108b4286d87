//! WAL record format
//!
//! Each record is self-delimiting and checksummed so a truncated or
//! corrupt tail is unambiguously detectable during recovery:
//!
//! ```text
//! ┌──────────────────┬────────────────┬─────────────────────┬───────────┐
//! │ Length (4 bytes) │ Format Ver (1) │ Payload (variable)  │ CRC32 (4) │
//! └──────────────────┴────────────────┴─────────────────────┴───────────┘
//!
//! Payload:
//! ┌──────────┬───────────────────────────┐
//! │ LSN (8)  │ Op (bincode, variable)    │
//! └──────────┴───────────────────────────┘
//! ```
//!
//! The length field covers format version + payload + CRC32. LSNs are
//! assigned by the writer and are strictly increasing per process.

use crc32fast::Hasher;
use serde::{Deserialize, Serialize};

/// Current WAL record format version
pub const WAL_RECORD_FORMAT_VERSION: u8 = 1;

/// A single logged mutation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum WalOp {
    /// Overwrite or insert a key
    Set {
        /// Target key
        key: String,
        /// JSON-encoded document value
        value: String,
    },
    /// Atomically move a key; the old key becomes non-existent
    Rename {
        /// Source key
        old_key: String,
        /// Destination key
        new_key: String,
    },
    /// Add a member to a collection set
    SAdd {
        /// Set key, e.g. `USER?`
        set_key: String,
        /// Member id
        member: String,
    },
    /// Remove a member from a collection set
    SRem {
        /// Set key
        set_key: String,
        /// Member id
        member: String,
    },
}

impl WalOp {
    /// The document key this op touches, when it touches one.
    pub fn doc_key(&self) -> Option<&str> {
        match self {
            WalOp::Set { key, .. } => Some(key),
            WalOp::Rename { old_key, .. } => Some(old_key),
            WalOp::SAdd { .. } | WalOp::SRem { .. } => None,
        }
    }

    /// The set key this op touches, when it touches one.
    pub fn set_key(&self) -> Option<&str> {
        match self {
            WalOp::SAdd { set_key, .. } | WalOp::SRem { set_key, .. } => Some(set_key),
            _ => None,
        }
    }
}

/// A framed WAL record: an op plus its log sequence number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalRecord {
    /// Log sequence number, strictly increasing
    pub lsn: u64,
    /// The logged mutation
    pub op: WalOp,
}

impl WalRecord {
    /// Create a record.
    pub fn new(lsn: u64, op: WalOp) -> Self {
        WalRecord { lsn, op }
    }

    /// Serialise to the framed on-disk form.
    pub fn to_bytes(&self) -> Result<Vec<u8>, WalRecordError> {
        let op_bytes = bincode::serialize(&self.op)
            .map_err(|e| WalRecordError::Payload(e.to_string()))?;

        // payload: format_version + lsn + op
        let mut payload = Vec::with_capacity(9 + op_bytes.len());
        payload.push(WAL_RECORD_FORMAT_VERSION);
        payload.extend_from_slice(&self.lsn.to_le_bytes());
        payload.extend_from_slice(&op_bytes);

        let crc = compute_crc(&payload);

        let total_len = payload.len() + 4;
        let mut record = Vec::with_capacity(4 + total_len);
        record.extend_from_slice(&(total_len as u32).to_le_bytes());
        record.extend_from_slice(&payload);
        record.extend_from_slice(&crc.to_le_bytes());
        Ok(record)
    }

    /// Parse one record from the front of `bytes`.
    ///
    /// Returns `(record, bytes_consumed)` on success.
    pub fn from_bytes(bytes: &[u8]) -> Result<(Self, usize), WalRecordError> {
        if bytes.len() < 4 {
            return Err(WalRecordError::InsufficientData);
        }

        let length = u32::from_le_bytes(bytes[0..4].try_into().unwrap()) as usize;
        // Minimum: 1 byte version + 8 bytes lsn + 4 bytes CRC
        if length < 13 {
            return Err(WalRecordError::InvalidFormat);
        }
        if bytes.len() < 4 + length {
            return Err(WalRecordError::InsufficientData);
        }

        let payload = &bytes[4..4 + length - 4];
        let stored_crc = u32::from_le_bytes(bytes[4 + length - 4..4 + length].try_into().unwrap());
        let computed_crc = compute_crc(payload);
        if computed_crc != stored_crc {
            return Err(WalRecordError::ChecksumMismatch {
                expected: stored_crc,
                computed: computed_crc,
            });
        }

        let format_version = payload[0];
        if format_version != WAL_RECORD_FORMAT_VERSION {
            return Err(WalRecordError::UnsupportedVersion(format_version));
        }

        let lsn = u64::from_le_bytes(payload[1..9].try_into().unwrap());
        let op: WalOp = bincode::deserialize(&payload[9..])
            .map_err(|e| WalRecordError::Payload(e.to_string()))?;

        Ok((WalRecord { lsn, op }, 4 + length))
    }
}

fn compute_crc(data: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(data);
    hasher.finalize()
}

/// WAL record parsing errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WalRecordError {
    /// Not enough data to parse a record (truncated tail)
    #[error("insufficient data to parse record")]
    InsufficientData,

    /// Record framing is invalid
    #[error("invalid record format")]
    InvalidFormat,

    /// Checksum verification failed
    #[error("checksum mismatch: expected {expected:08x}, computed {computed:08x}")]
    ChecksumMismatch {
        /// Checksum stored in the record
        expected: u32,
        /// Checksum computed over the payload
        computed: u32,
    },

    /// Unknown format version
    #[error("unsupported format version: {0}")]
    UnsupportedVersion(u8),

    /// CRC was valid but the op payload could not be decoded
    #[error("payload decode failed: {0}")]
    Payload(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_ops() -> Vec<WalOp> {
        vec![
            WalOp::Set {
                key: "USER_a".into(),
                value: "{\"x\":1}".into(),
            },
            WalOp::Rename {
                old_key: "USER_a".into(),
                new_key: "X:USER_a:X".into(),
            },
            WalOp::SAdd {
                set_key: "USER?".into(),
                member: "USER_a".into(),
            },
            WalOp::SRem {
                set_key: "USER?".into(),
                member: "USER_a".into(),
            },
        ]
    }

    #[test]
    fn test_roundtrip_all_ops() {
        for (i, op) in sample_ops().into_iter().enumerate() {
            let record = WalRecord::new(i as u64 + 1, op);
            let bytes = record.to_bytes().unwrap();
            let (parsed, consumed) = WalRecord::from_bytes(&bytes).unwrap();
            assert_eq!(parsed, record);
            assert_eq!(consumed, bytes.len());
        }
    }

    #[test]
    fn test_multiple_records_in_sequence() {
        let records: Vec<WalRecord> = sample_ops()
            .into_iter()
            .enumerate()
            .map(|(i, op)| WalRecord::new(i as u64 + 1, op))
            .collect();

        let mut all_bytes = Vec::new();
        for record in &records {
            all_bytes.extend_from_slice(&record.to_bytes().unwrap());
        }

        let mut offset = 0;
        for expected in &records {
            let (parsed, consumed) = WalRecord::from_bytes(&all_bytes[offset..]).unwrap();
            assert_eq!(&parsed, expected);
            offset += consumed;
        }
        assert_eq!(offset, all_bytes.len());
    }

    #[test]
    fn test_truncated_tail_detected() {
        let record = WalRecord::new(
            7,
            WalOp::Set {
                key: "k".into(),
                value: "v".into(),
            },
        );
        let bytes = record.to_bytes().unwrap();

        // Any strict prefix must report InsufficientData, never garbage
        for cut in 0..bytes.len() {
            let result = WalRecord::from_bytes(&bytes[..cut]);
            assert!(
                matches!(result, Err(WalRecordError::InsufficientData)),
                "prefix of {cut} bytes should be insufficient"
            );
        }
    }

    #[test]
    fn test_corruption_detected() {
        let record = WalRecord::new(
            9,
            WalOp::SAdd {
                set_key: "USER?".into(),
                member: "USER_a".into(),
            },
        );
        let mut bytes = record.to_bytes().unwrap();
        bytes[10] ^= 0xFF;
        assert!(matches!(
            WalRecord::from_bytes(&bytes),
            Err(WalRecordError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn test_unsupported_version() {
        let record = WalRecord::new(
            1,
            WalOp::Set {
                key: "k".into(),
                value: "v".into(),
            },
        );
        let mut bytes = record.to_bytes().unwrap();
        // Rewrite version byte and fix up the checksum
        bytes[4] = 99;
        let length = u32::from_le_bytes(bytes[0..4].try_into().unwrap()) as usize;
        let crc = compute_crc(&bytes[4..4 + length - 4]);
        let crc_at = 4 + length - 4;
        bytes[crc_at..crc_at + 4].copy_from_slice(&crc.to_le_bytes());

        assert!(matches!(
            WalRecord::from_bytes(&bytes),
            Err(WalRecordError::UnsupportedVersion(99))
        ));
    }
}
