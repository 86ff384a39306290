// Frame header layout, alignment helpers, and the data header codec.
use crate::core::buffer::AtomicBuffer;
use crate::core::error::{Error, ErrorKind};

pub const FRAME_ALIGNMENT: usize = 32;

pub const BEGIN_FRAG_FLAG: u8 = 0b1000_0000;
pub const END_FRAG_FLAG: u8 = 0b0100_0000;
pub const UNFRAGMENTED: u8 = BEGIN_FRAG_FLAG | END_FRAG_FLAG;

pub const PADDING_FRAME_TYPE: u16 = 0;
pub const DATA_FRAME_TYPE: u16 = 1;
pub const CURRENT_VERSION: u8 = 0;

pub const FRAME_LENGTH_FIELD_OFFSET: usize = 0;
pub const VERSION_FIELD_OFFSET: usize = 4;
pub const FLAGS_FIELD_OFFSET: usize = 5;
pub const TYPE_FIELD_OFFSET: usize = 6;
pub const TERM_OFFSET_FIELD_OFFSET: usize = 8;
pub const TERM_ID_FIELD_OFFSET: usize = 12;
pub const SESSION_ID_FIELD_OFFSET: usize = 16;
pub const STREAM_ID_FIELD_OFFSET: usize = 20;
pub const RESERVED_VALUE_FIELD_OFFSET: usize = 24;

/// Fields every frame carries: length, version, flags, type, term offset, term id.
pub const BASE_HEADER_LENGTH: usize = 16;
pub const DATA_HEADER_LENGTH: usize = 32;

pub fn align(value: usize, alignment: usize) -> usize {
    debug_assert!(alignment.is_power_of_two());
    (value + (alignment - 1)) & !(alignment - 1)
}

pub fn aligned_frame_length(frame_length: usize) -> usize {
    align(frame_length, FRAME_ALIGNMENT)
}

/// A single message may use at most an eighth of the term.
pub fn compute_max_message_length(capacity: usize) -> usize {
    capacity / 8
}

pub fn length_offset(term_offset: usize) -> usize {
    term_offset + FRAME_LENGTH_FIELD_OFFSET
}

pub fn version_offset(term_offset: usize) -> usize {
    term_offset + VERSION_FIELD_OFFSET
}

pub fn flags_offset(term_offset: usize) -> usize {
    term_offset + FLAGS_FIELD_OFFSET
}

pub fn type_offset(term_offset: usize) -> usize {
    term_offset + TYPE_FIELD_OFFSET
}

pub fn term_offset_offset(term_offset: usize) -> usize {
    term_offset + TERM_OFFSET_FIELD_OFFSET
}

pub fn term_id_offset(term_offset: usize) -> usize {
    term_offset + TERM_ID_FIELD_OFFSET
}

/// Acquire read of the frame length; readers must use this before touching other fields.
pub fn frame_length_volatile(buffer: &AtomicBuffer, term_offset: usize) -> i32 {
    buffer.get_i32_volatile(length_offset(term_offset))
}

/// Release write of the frame length; the publishing step of every frame.
pub fn frame_length_ordered(buffer: &AtomicBuffer, term_offset: usize, frame_length: i32) {
    buffer.put_i32_ordered(length_offset(term_offset), frame_length);
}

pub fn frame_type(buffer: &AtomicBuffer, term_offset: usize) -> u16 {
    buffer.get_u16(type_offset(term_offset))
}

pub fn set_frame_type(buffer: &AtomicBuffer, term_offset: usize, frame_type: u16) {
    buffer.put_u16(type_offset(term_offset), frame_type);
}

pub fn frame_flags(buffer: &AtomicBuffer, term_offset: usize) -> u8 {
    buffer.get_u8(flags_offset(term_offset))
}

pub fn set_frame_flags(buffer: &AtomicBuffer, term_offset: usize, flags: u8) {
    buffer.put_u8(flags_offset(term_offset), flags);
}

pub fn frame_version(buffer: &AtomicBuffer, term_offset: usize) -> u8 {
    buffer.get_u8(version_offset(term_offset))
}

pub fn frame_term_offset(buffer: &AtomicBuffer, term_offset: usize) -> i32 {
    buffer.get_i32(term_offset_offset(term_offset))
}

/// Stamps the frame's own offset into its header.
pub fn set_frame_term_offset(buffer: &AtomicBuffer, term_offset: usize) {
    buffer.put_i32(term_offset_offset(term_offset), term_offset as i32);
}

pub fn frame_term_id(buffer: &AtomicBuffer, term_offset: usize) -> i32 {
    buffer.get_i32(term_id_offset(term_offset))
}

pub fn set_frame_term_id(buffer: &AtomicBuffer, term_offset: usize, term_id: i32) {
    buffer.put_i32(term_id_offset(term_offset), term_id);
}

pub fn is_padding_frame(buffer: &AtomicBuffer, term_offset: usize) -> bool {
    frame_type(buffer, term_offset) == PADDING_FRAME_TYPE
}

/// The full data header, encoded field by field in little-endian order.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct DataHeader {
    pub frame_length: i32,
    pub version: u8,
    pub flags: u8,
    pub frame_type: u16,
    pub term_offset: i32,
    pub term_id: i32,
    pub session_id: i32,
    pub stream_id: i32,
    pub reserved_value: i64,
}

impl DataHeader {
    /// Template stamped into every new frame of a stream.
    pub fn default_for(session_id: i32, stream_id: i32, initial_term_id: i32) -> Self {
        Self {
            frame_length: 0,
            version: CURRENT_VERSION,
            flags: UNFRAGMENTED,
            frame_type: DATA_FRAME_TYPE,
            term_offset: 0,
            term_id: initial_term_id,
            session_id,
            stream_id,
            reserved_value: 0,
        }
    }

    pub fn encode(&self) -> [u8; DATA_HEADER_LENGTH] {
        let mut buf = [0u8; DATA_HEADER_LENGTH];
        write_i32(&mut buf, FRAME_LENGTH_FIELD_OFFSET, self.frame_length);
        buf[VERSION_FIELD_OFFSET] = self.version;
        buf[FLAGS_FIELD_OFFSET] = self.flags;
        buf[TYPE_FIELD_OFFSET..TYPE_FIELD_OFFSET + 2].copy_from_slice(&self.frame_type.to_le_bytes());
        write_i32(&mut buf, TERM_OFFSET_FIELD_OFFSET, self.term_offset);
        write_i32(&mut buf, TERM_ID_FIELD_OFFSET, self.term_id);
        write_i32(&mut buf, SESSION_ID_FIELD_OFFSET, self.session_id);
        write_i32(&mut buf, STREAM_ID_FIELD_OFFSET, self.stream_id);
        buf[RESERVED_VALUE_FIELD_OFFSET..RESERVED_VALUE_FIELD_OFFSET + 8]
            .copy_from_slice(&self.reserved_value.to_le_bytes());
        buf
    }

    pub fn decode(buf: &[u8]) -> Result<Self, Error> {
        if buf.len() < DATA_HEADER_LENGTH {
            return Err(Error::new(ErrorKind::Corrupt).with_message("data header too small"));
        }
        let mut frame_type = [0u8; 2];
        frame_type.copy_from_slice(&buf[TYPE_FIELD_OFFSET..TYPE_FIELD_OFFSET + 2]);
        let mut reserved = [0u8; 8];
        reserved.copy_from_slice(&buf[RESERVED_VALUE_FIELD_OFFSET..RESERVED_VALUE_FIELD_OFFSET + 8]);
        Ok(Self {
            frame_length: read_i32(buf, FRAME_LENGTH_FIELD_OFFSET),
            version: buf[VERSION_FIELD_OFFSET],
            flags: buf[FLAGS_FIELD_OFFSET],
            frame_type: u16::from_le_bytes(frame_type),
            term_offset: read_i32(buf, TERM_OFFSET_FIELD_OFFSET),
            term_id: read_i32(buf, TERM_ID_FIELD_OFFSET),
            session_id: read_i32(buf, SESSION_ID_FIELD_OFFSET),
            stream_id: read_i32(buf, STREAM_ID_FIELD_OFFSET),
            reserved_value: i64::from_le_bytes(reserved),
        })
    }
}

fn read_i32(buf: &[u8], offset: usize) -> i32 {
    let mut out = [0u8; 4];
    out.copy_from_slice(&buf[offset..offset + 4]);
    i32::from_le_bytes(out)
}

fn write_i32(buf: &mut [u8], offset: usize, value: i32) {
    buf[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}
