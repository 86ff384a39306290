// Structural validation of quiescent terms plus debug-only assertions.
// Full walks are for explicit validation; hot paths never call these.
use crate::core::buffer::AtomicBuffer;
use crate::core::error::{Error, ErrorKind};
use crate::core::frame::{self, DATA_HEADER_LENGTH, FRAME_ALIGNMENT, PADDING_FRAME_TYPE};

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct TermSummary {
    pub data_frames: usize,
    pub padding_frames: usize,
    /// Payload bytes across data frames.
    pub data_bytes: usize,
    /// Offset where the walk ended; equals the tail for a valid term.
    pub end_offset: usize,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct FrameInfo {
    pub offset: usize,
    pub frame_length: i32,
    pub frame_type: u16,
    pub flags: u8,
    pub term_id: i32,
}

/// Walks frames in `[0, tail_offset)` and checks each one against its position.
pub fn validate_term(
    term_buffer: &AtomicBuffer,
    term_id: i32,
    tail_offset: usize,
) -> Result<TermSummary, Error> {
    let capacity = term_buffer.capacity();
    if tail_offset > capacity {
        return Err(Error::new(ErrorKind::Corrupt)
            .with_message(format!("tail {tail_offset} exceeds term capacity {capacity}")));
    }
    if tail_offset % FRAME_ALIGNMENT != 0 {
        return Err(Error::new(ErrorKind::Corrupt)
            .with_message(format!("tail {tail_offset} is not frame aligned")));
    }

    let mut summary = TermSummary::default();
    let mut offset = 0usize;
    while offset < tail_offset {
        let frame_length = frame::frame_length_volatile(term_buffer, offset);
        if frame_length <= 0 {
            return Err(corrupt_at(offset, format!("frame length {frame_length} below tail")));
        }
        let frame_length = frame_length as usize;
        let is_padding = frame::frame_type(term_buffer, offset) == PADDING_FRAME_TYPE;
        if !is_padding && frame_length < DATA_HEADER_LENGTH {
            return Err(corrupt_at(
                offset,
                format!("data frame of {frame_length} bytes is shorter than its header"),
            ));
        }
        let aligned_length = frame::aligned_frame_length(frame_length);
        if offset + aligned_length > capacity {
            return Err(corrupt_at(offset, "frame crosses term capacity"));
        }
        let recorded_offset = frame::frame_term_offset(term_buffer, offset);
        if recorded_offset != offset as i32 {
            return Err(corrupt_at(
                offset,
                format!("header records term offset {recorded_offset}"),
            ));
        }
        let recorded_term_id = frame::frame_term_id(term_buffer, offset);
        if recorded_term_id != term_id {
            return Err(corrupt_at(
                offset,
                format!("header records term id {recorded_term_id}, expected {term_id}"),
            ));
        }

        if is_padding {
            summary.padding_frames += 1;
        } else {
            summary.data_frames += 1;
            summary.data_bytes += frame_length - DATA_HEADER_LENGTH;
        }
        offset += aligned_length;
    }

    if offset != tail_offset {
        return Err(corrupt_at(offset, format!("last frame overruns tail {tail_offset}")));
    }
    summary.end_offset = offset;
    Ok(summary)
}

/// Committed and claimed frames from offset 0 up to the first empty slot or `limit`.
pub fn describe_frames(term_buffer: &AtomicBuffer, limit: usize) -> Vec<FrameInfo> {
    let limit = limit.min(term_buffer.capacity());
    let mut frames = Vec::new();
    let mut offset = 0usize;
    while offset < limit {
        let frame_length = frame::frame_length_volatile(term_buffer, offset);
        if frame_length == 0 {
            break;
        }
        frames.push(FrameInfo {
            offset,
            frame_length,
            frame_type: frame::frame_type(term_buffer, offset),
            flags: frame::frame_flags(term_buffer, offset),
            term_id: frame::frame_term_id(term_buffer, offset),
        });
        offset += frame::aligned_frame_length(frame_length.unsigned_abs() as usize);
    }
    frames
}

pub fn debug_assert_term(term_buffer: &AtomicBuffer, term_id: i32, tail_offset: usize) {
    if !cfg!(debug_assertions) {
        return;
    }
    if let Err(err) = validate_term(term_buffer, term_id, tail_offset) {
        panic!("term invariant failed: {err}");
    }
}

fn corrupt_at(offset: usize, message: impl Into<String>) -> Error {
    Error::new(ErrorKind::Corrupt)
        .with_message(message)
        .with_offset(offset as u64)
}
