// Availability scan: how many committed bytes can be taken from an offset, with padding reported apart.
use crate::core::buffer::AtomicBuffer;
use crate::core::frame::{self, DATA_HEADER_LENGTH};

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Availability {
    /// Bytes of whole frames to consume, including a padding frame's header.
    pub available: usize,
    /// Bytes past a padding frame's header that carry no data.
    pub padding: usize,
}

impl Availability {
    /// Total bytes to advance past.
    pub fn total(&self) -> usize {
        self.available + self.padding
    }
}

/// Scans committed frames from `offset`, up to `max_length` bytes; stops after a padding frame.
pub fn scan_for_availability(
    term_buffer: &AtomicBuffer,
    offset: usize,
    max_length: usize,
) -> Availability {
    let capacity = term_buffer.capacity();
    let max_available = max_length.min(capacity.saturating_sub(offset));
    let mut available = 0usize;
    let mut padding = 0usize;

    while available + padding < max_available {
        let frame_offset = offset + available;
        let frame_length = frame::frame_length_volatile(term_buffer, frame_offset);
        if frame_length <= 0 {
            break;
        }

        let mut aligned_length = frame::aligned_frame_length(frame_length as usize);
        let is_padding = frame::is_padding_frame(term_buffer, frame_offset);
        if is_padding {
            padding = aligned_length.saturating_sub(DATA_HEADER_LENGTH);
            aligned_length = aligned_length.min(DATA_HEADER_LENGTH);
        }

        available += aligned_length;
        if available > max_available {
            available -= aligned_length;
            padding = 0;
            break;
        }
        if is_padding {
            break;
        }
    }

    Availability { available, padding }
}
