// Merges frames received out of order into a term at their original offsets.
use crate::core::buffer::AtomicBuffer;
use crate::core::frame::{self, VERSION_FIELD_OFFSET};

/// Copies `packet` (one or more whole frames) into the term at `term_offset`.
///
/// Everything after the first frame's length word is written first; the first
/// length is then published with release ordering so readers never see a
/// partially copied frame. Inserting the same packet twice is harmless.
pub fn insert(term_buffer: &AtomicBuffer, term_offset: usize, packet: &[u8]) {
    assert!(
        packet.len() >= VERSION_FIELD_OFFSET,
        "packet of {} bytes has no frame length",
        packet.len()
    );
    let mut length = [0u8; 4];
    length.copy_from_slice(&packet[..VERSION_FIELD_OFFSET]);
    let first_frame_length = i32::from_le_bytes(length);

    term_buffer.put_bytes(term_offset + VERSION_FIELD_OFFSET, &packet[VERSION_FIELD_OFFSET..]);
    frame::frame_length_ordered(term_buffer, term_offset, first_frame_length);
}
