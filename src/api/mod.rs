//! Purpose: Define the public Rust API boundary for termlog.
//! Exports: Log setup, the claim/commit protocol, readers, scanners, and repair entry points.
//! Role: Additive-only surface used by the CLI and integration tests.
//! Invariants: Everything here is a re-export; behaviour lives in `core`.

pub use crate::core::appender::{AppendOutcome, ClaimOutcome, SPIN_RESET_THRESHOLD, TermAppender};
pub use crate::core::block_scanner::scan as scan_block;
pub use crate::core::buffer::AtomicBuffer;
pub use crate::core::claim::BufferClaim;
pub use crate::core::descriptor;
#[doc(hidden)]
pub use crate::core::error::to_exit_code;
pub use crate::core::error::{Error, ErrorKind};
pub use crate::core::frame::{self, DataHeader};
pub use crate::core::gap_scanner::scan_for_gap;
pub use crate::core::header::{Header, HeaderWriter};
pub use crate::core::log_buffers::{LogBuffers, LogOptions};
pub use crate::core::partition::{LogBufferPartition, TermStatus};
pub use crate::core::reader::{ReadOutcome, TermReader};
pub use crate::core::rebuilder::insert as rebuild_insert;
pub use crate::core::term_scanner::{Availability, scan_for_availability};
pub use crate::core::unblocker::{UnblockStatus, unblock_log, unblock_term};
pub use crate::core::validate::{
    FrameInfo, TermSummary, debug_assert_term, describe_frames, validate_term,
};
