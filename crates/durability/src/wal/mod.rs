//! Write-ahead log: record framing, segment files, writer, reader.

pub mod reader;
pub mod record;
pub mod segment;
pub mod writer;

pub use reader::{read_all, DroppedTail, WalReadResult};
pub use record::{WalOp, WalRecord, WalRecordError, WAL_RECORD_FORMAT_VERSION};
pub use segment::{SegmentHeader, WalSegment, SEGMENT_HEADER_SIZE};
pub use writer::WalWriter;
