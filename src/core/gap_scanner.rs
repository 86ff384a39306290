//! Purpose: Locate the first missing byte range in a term being filled out of order.
//! Exports: `scan_for_gap`.
//! Role: Drives retransmission requests; read-only over the term.
//! Invariants: The handler sees at most one gap per call, starting at the returned offset.
use crate::core::buffer::AtomicBuffer;
use crate::core::frame::{self, DATA_HEADER_LENGTH, FRAME_ALIGNMENT};

const ALIGNED_HEADER_LENGTH: usize = (DATA_HEADER_LENGTH + FRAME_ALIGNMENT - 1) & !(FRAME_ALIGNMENT - 1);

/// Walks contiguous frames from `rebuild_offset`; if they stop short of `hwm_offset`,
/// reports the hole as `handler(term_id, buffer, gap_offset, gap_length)`.
/// Returns the offset up to which the term is contiguous.
pub fn scan_for_gap<F>(
    term_buffer: &AtomicBuffer,
    term_id: i32,
    rebuild_offset: usize,
    hwm_offset: usize,
    mut handler: F,
) -> usize
where
    F: FnMut(i32, &AtomicBuffer, usize, usize),
{
    let hwm_offset = hwm_offset.min(term_buffer.capacity());
    let mut offset = rebuild_offset;
    while offset < hwm_offset {
        let frame_length = frame::frame_length_volatile(term_buffer, offset);
        if frame_length <= 0 {
            break;
        }
        offset += frame::aligned_frame_length(frame_length as usize);
    }

    let gap_begin_offset = offset;
    if offset < hwm_offset {
        let limit = hwm_offset.saturating_sub(ALIGNED_HEADER_LENGTH);
        while offset < limit {
            offset += FRAME_ALIGNMENT;
            if term_buffer.get_i32_volatile(frame::length_offset(offset)) != 0 {
                offset -= ALIGNED_HEADER_LENGTH;
                break;
            }
        }

        let gap_length = (offset - gap_begin_offset) + ALIGNED_HEADER_LENGTH;
        handler(term_id, term_buffer, gap_begin_offset, gap_length);
    }

    gap_begin_offset
}
