//! Purpose: Repair a term stalled by a writer that claimed a frame and never resolved it.
//! Exports: `UnblockStatus`, `unblock_term`, `unblock_log`.
//! Role: Called by an external watchdog once a consumer position stops advancing.
//! Invariants: A slot is only overwritten after everything between it and the next frame reads zero.
//! Invariants: Repaired slots are published as padding through the ordered frame-length write.
use crate::core::buffer::AtomicBuffer;
use crate::core::descriptor::{self, PARTITION_COUNT};
use crate::core::frame::{self, FRAME_ALIGNMENT, PADDING_FRAME_TYPE};
use crate::core::partition::LogBufferPartition;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum UnblockStatus {
    NoAction,
    /// A padding frame now covers the blocked range.
    Unblocked,
    /// Padding runs from the blocked offset to the end of the term.
    UnblockedToEnd,
}

/// Attempts to unblock the term at `blocked_offset`, given the current tail.
pub fn unblock_term(
    log_meta_data_buffer: &AtomicBuffer,
    term_buffer: &AtomicBuffer,
    blocked_offset: usize,
    tail_offset: usize,
    term_id: i32,
) -> UnblockStatus {
    let frame_length = frame::frame_length_volatile(term_buffer, blocked_offset);

    if frame_length < 0 {
        let length = frame_length.unsigned_abs() as usize;
        reset_header(log_meta_data_buffer, term_buffer, blocked_offset, length, term_id);
        return UnblockStatus::Unblocked;
    }
    if frame_length > 0 {
        return UnblockStatus::NoAction;
    }

    let capacity = term_buffer.capacity();
    let tail_offset = tail_offset.min(capacity);
    let mut current_offset = blocked_offset + FRAME_ALIGNMENT;
    while current_offset < tail_offset {
        if frame::frame_length_volatile(term_buffer, current_offset) != 0 {
            if scan_back_to_confirm_zeroed(term_buffer, current_offset, blocked_offset) {
                reset_header(
                    log_meta_data_buffer,
                    term_buffer,
                    blocked_offset,
                    current_offset - blocked_offset,
                    term_id,
                );
                return UnblockStatus::Unblocked;
            }
            return UnblockStatus::NoAction;
        }
        current_offset += FRAME_ALIGNMENT;
    }

    if current_offset >= capacity && frame::frame_length_volatile(term_buffer, blocked_offset) == 0 {
        reset_header(
            log_meta_data_buffer,
            term_buffer,
            blocked_offset,
            capacity - blocked_offset,
            term_id,
        );
        return UnblockStatus::UnblockedToEnd;
    }

    UnblockStatus::NoAction
}

/// Resolves `blocked_position` to its partition and unblocks it, rotating the log
/// when the repair padded the term to its end. Returns `true` if anything was repaired.
pub fn unblock_log(
    partitions: &[LogBufferPartition; PARTITION_COUNT],
    log_meta_data_buffer: &AtomicBuffer,
    blocked_position: i64,
) -> bool {
    let term_length = partitions[0].term_buffer().capacity();
    let bits = descriptor::position_bits_to_shift(term_length);
    let initial_term_id = descriptor::initial_term_id(log_meta_data_buffer);
    let index = descriptor::index_by_position(blocked_position, bits);
    let blocked_term_id =
        descriptor::compute_term_id_from_position(blocked_position, bits, initial_term_id);
    let blocked_offset = descriptor::compute_term_offset_from_position(blocked_position, bits);
    if blocked_position < 0 || blocked_offset % FRAME_ALIGNMENT != 0 {
        tracing::warn!(
            blocked_position,
            "blocked position is not on a frame boundary; ignoring it"
        );
        return false;
    }

    let partition = &partitions[index];
    let raw_tail = partition.raw_tail_volatile();
    let term_id = descriptor::term_id(raw_tail);
    if term_id != blocked_term_id {
        tracing::warn!(
            blocked_position,
            blocked_term_id,
            term_id,
            "blocked position no longer maps to its partition's term"
        );
        return false;
    }
    let tail_offset = descriptor::term_offset(raw_tail, term_length);

    let status = unblock_term(
        log_meta_data_buffer,
        partition.term_buffer(),
        blocked_offset,
        tail_offset,
        term_id,
    );
    match status {
        UnblockStatus::NoAction => false,
        UnblockStatus::Unblocked => {
            tracing::warn!(blocked_position, term_id, blocked_offset, "unblocked term");
            true
        }
        UnblockStatus::UnblockedToEnd => {
            tracing::warn!(
                blocked_position,
                term_id,
                blocked_offset,
                "unblocked term to its end"
            );
            if descriptor::active_partition_index(log_meta_data_buffer) == index {
                descriptor::rotate_log(
                    partitions,
                    log_meta_data_buffer,
                    index,
                    term_id.wrapping_add(1),
                );
            }
            true
        }
    }
}

fn scan_back_to_confirm_zeroed(buffer: &AtomicBuffer, from: usize, limit: usize) -> bool {
    let mut offset = from;
    while offset > limit {
        offset -= 4;
        if buffer.get_i32_volatile(offset) != 0 {
            return false;
        }
    }
    true
}

fn reset_header(
    log_meta_data_buffer: &AtomicBuffer,
    term_buffer: &AtomicBuffer,
    term_offset: usize,
    frame_length: usize,
    term_id: i32,
) {
    descriptor::apply_default_header(log_meta_data_buffer, term_buffer, term_offset, frame_length);
    frame::set_frame_type(term_buffer, term_offset, PADDING_FRAME_TYPE);
    frame::set_frame_term_offset(term_buffer, term_offset);
    frame::set_frame_term_id(term_buffer, term_offset, term_id);
    frame::frame_length_ordered(term_buffer, term_offset, frame_length as i32);
}
