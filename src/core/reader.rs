// Delivers committed data frames from a term to a fragment handler, skipping padding.
use crate::core::buffer::AtomicBuffer;
use crate::core::frame;
use crate::core::header::Header;

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct ReadOutcome {
    /// Term offset just past the last frame consumed.
    pub offset: usize,
    pub fragments_read: usize,
}

#[derive(Clone, Copy, Debug)]
pub struct TermReader {
    initial_term_id: i32,
    position_bits_to_shift: u32,
}

impl TermReader {
    pub fn new(initial_term_id: i32, position_bits_to_shift: u32) -> Self {
        Self {
            initial_term_id,
            position_bits_to_shift,
        }
    }

    /// Reads up to `fragments_limit` data frames starting at `offset`.
    ///
    /// The handler receives `(buffer, payload_offset, payload_length, header)`.
    /// Padding frames are consumed without being delivered and do not count
    /// toward the limit.
    pub fn read<F>(
        &self,
        term_buffer: &AtomicBuffer,
        offset: usize,
        fragments_limit: usize,
        mut handler: F,
    ) -> ReadOutcome
    where
        F: FnMut(&AtomicBuffer, usize, usize, &Header<'_>),
    {
        let capacity = term_buffer.capacity();
        let mut offset = offset;
        let mut fragments_read = 0;

        while fragments_read < fragments_limit && offset < capacity {
            let frame_length = frame::frame_length_volatile(term_buffer, offset);
            if frame_length <= 0 {
                break;
            }

            let frame_offset = offset;
            offset += frame::aligned_frame_length(frame_length as usize);

            if frame::is_padding_frame(term_buffer, frame_offset) {
                continue;
            }

            let header = Header::new(
                term_buffer,
                frame_offset,
                self.initial_term_id,
                self.position_bits_to_shift,
            );
            let header_length = frame::DATA_HEADER_LENGTH.min(frame_length as usize);
            handler(
                term_buffer,
                frame_offset + header_length,
                frame_length as usize - header_length,
                &header,
            );
            fragments_read += 1;
        }

        ReadOutcome {
            offset,
            fragments_read,
        }
    }
}
