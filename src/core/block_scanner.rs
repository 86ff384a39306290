// Finds the end of the longest run of committed frames that fits before a limit.
use crate::core::buffer::AtomicBuffer;
use crate::core::frame;

/// Returns the offset after the last whole committed frame in `[offset, limit)`.
pub fn scan(term_buffer: &AtomicBuffer, offset: usize, limit: usize) -> usize {
    let limit = limit.min(term_buffer.capacity());
    let mut offset = offset;
    while offset < limit {
        let frame_length = frame::frame_length_volatile(term_buffer, offset);
        if frame_length <= 0 {
            break;
        }
        let aligned_length = frame::aligned_frame_length(frame_length as usize);
        if offset + aligned_length > limit {
            break;
        }
        offset += aligned_length;
    }
    offset
}

#[cfg(test)]
mod tests {
    use super::scan;
    use crate::core::buffer::AtomicBuffer;
    use crate::core::frame::{PADDING_FRAME_TYPE, frame_length_ordered, set_frame_type};

    #[test]
    fn stops_at_uncommitted_frame() {
        let term = AtomicBuffer::allocate(1024).expect("term");
        frame_length_ordered(&term, 0, 40);
        frame_length_ordered(&term, 64, 32);
        frame_length_ordered(&term, 96, -64);
        assert_eq!(scan(&term, 0, 1024), 96);
        assert_eq!(scan(&term, 96, 1024), 96);
    }

    #[test]
    fn never_overshoots_the_limit() {
        let term = AtomicBuffer::allocate(1024).expect("term");
        frame_length_ordered(&term, 0, 64);
        frame_length_ordered(&term, 64, 128);
        assert_eq!(scan(&term, 0, 128), 64);
        assert_eq!(scan(&term, 0, 192), 192);
    }

    #[test]
    fn padding_counts_as_committed() {
        let term = AtomicBuffer::allocate(256).expect("term");
        frame_length_ordered(&term, 0, 32);
        set_frame_type(&term, 32, PADDING_FRAME_TYPE);
        frame_length_ordered(&term, 32, 224);
        assert_eq!(scan(&term, 0, 4096), 256);
    }
}
