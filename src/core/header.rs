//! Purpose: Stamp default headers into claimed slots and read committed frame headers.
//! Exports: `HeaderWriter`, `Header`.
//! Role: Write side used by the appender and end-of-term padding; read side handed to fragment handlers.
//! Invariants: The writer leaves the frame negative (claimed) and never publishes a frame itself.
//! Invariants: `Header` is only built for frames whose length was read positive with acquire ordering.
use crate::core::buffer::AtomicBuffer;
use crate::core::descriptor::{self, LOG_DEFAULT_FRAME_HEADER_MAX_LENGTH};
use crate::core::error::Error;
use crate::core::frame::{
    self, DataHeader, FLAGS_FIELD_OFFSET, FRAME_ALIGNMENT, RESERVED_VALUE_FIELD_OFFSET,
    SESSION_ID_FIELD_OFFSET, STREAM_ID_FIELD_OFFSET, TERM_ID_FIELD_OFFSET,
    TERM_OFFSET_FIELD_OFFSET, TYPE_FIELD_OFFSET, VERSION_FIELD_OFFSET,
};

#[derive(Clone, Debug)]
pub struct HeaderWriter {
    template: [u8; LOG_DEFAULT_FRAME_HEADER_MAX_LENGTH],
    length: usize,
}

impl HeaderWriter {
    pub fn new(default_header: &[u8]) -> Result<Self, Error> {
        descriptor::check_default_header_length(default_header.len())?;
        let mut template = [0u8; LOG_DEFAULT_FRAME_HEADER_MAX_LENGTH];
        template[..default_header.len()].copy_from_slice(default_header);
        Ok(Self {
            template,
            length: default_header.len(),
        })
    }

    pub fn from_data_header(header: &DataHeader) -> Self {
        let encoded = header.encode();
        let mut template = [0u8; LOG_DEFAULT_FRAME_HEADER_MAX_LENGTH];
        template[..encoded.len()].copy_from_slice(&encoded);
        Self {
            template,
            length: encoded.len(),
        }
    }

    /// Loads the template stored in the log metadata region.
    pub fn from_log_meta(log_meta_data_buffer: &AtomicBuffer) -> Result<Self, Error> {
        let stored = descriptor::default_frame_header(log_meta_data_buffer)?;
        Self::new(&stored)
    }

    pub fn header_length(&self) -> usize {
        self.length
    }

    /// Writes the template at `offset` as a claimed, uncommitted frame of `frame_length` bytes.
    pub fn write(&self, buffer: &AtomicBuffer, offset: usize, frame_length: usize, term_id: i32) {
        let mut header = self.template;
        let length = self.length.min(frame_length);
        header[TERM_OFFSET_FIELD_OFFSET..TERM_OFFSET_FIELD_OFFSET + 4]
            .copy_from_slice(&(offset as i32).to_le_bytes());
        header[TERM_ID_FIELD_OFFSET..TERM_ID_FIELD_OFFSET + 4]
            .copy_from_slice(&term_id.to_le_bytes());

        buffer.put_i32_relaxed(frame::length_offset(offset), -(frame_length as i32));
        if length > VERSION_FIELD_OFFSET {
            buffer.put_bytes(frame::version_offset(offset), &header[VERSION_FIELD_OFFSET..length]);
        }
    }
}

/// Read-only view over one committed frame.
#[derive(Clone, Copy, Debug)]
pub struct Header<'a> {
    buffer: &'a AtomicBuffer,
    offset: usize,
    initial_term_id: i32,
    position_bits_to_shift: u32,
}

impl<'a> Header<'a> {
    pub fn new(
        buffer: &'a AtomicBuffer,
        offset: usize,
        initial_term_id: i32,
        position_bits_to_shift: u32,
    ) -> Self {
        Self {
            buffer,
            offset,
            initial_term_id,
            position_bits_to_shift,
        }
    }

    pub fn buffer(&self) -> &'a AtomicBuffer {
        self.buffer
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn initial_term_id(&self) -> i32 {
        self.initial_term_id
    }

    pub fn frame_length(&self) -> i32 {
        self.buffer.get_i32(frame::length_offset(self.offset))
    }

    pub fn version(&self) -> u8 {
        self.buffer.get_u8(self.offset + VERSION_FIELD_OFFSET)
    }

    pub fn flags(&self) -> u8 {
        self.buffer.get_u8(self.offset + FLAGS_FIELD_OFFSET)
    }

    pub fn frame_type(&self) -> u16 {
        self.buffer.get_u16(self.offset + TYPE_FIELD_OFFSET)
    }

    pub fn term_offset(&self) -> i32 {
        self.buffer.get_i32(self.offset + TERM_OFFSET_FIELD_OFFSET)
    }

    pub fn term_id(&self) -> i32 {
        self.buffer.get_i32(self.offset + TERM_ID_FIELD_OFFSET)
    }

    pub fn session_id(&self) -> i32 {
        self.buffer.get_i32(self.offset + SESSION_ID_FIELD_OFFSET)
    }

    pub fn stream_id(&self) -> i32 {
        self.buffer.get_i32(self.offset + STREAM_ID_FIELD_OFFSET)
    }

    pub fn reserved_value(&self) -> i64 {
        self.buffer.get_i64(self.offset + RESERVED_VALUE_FIELD_OFFSET)
    }

    /// Stream position just past this frame.
    pub fn position(&self) -> i64 {
        let next_offset = frame::align(
            self.offset + self.frame_length().max(0) as usize,
            FRAME_ALIGNMENT,
        );
        descriptor::compute_position(
            self.term_id(),
            next_offset,
            self.position_bits_to_shift,
            self.initial_term_id,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::{Header, HeaderWriter};
    use crate::core::buffer::AtomicBuffer;
    use crate::core::descriptor::{LOG_META_DATA_LENGTH, store_default_frame_header};
    use crate::core::error::ErrorKind;
    use crate::core::frame::{
        DATA_FRAME_TYPE, DataHeader, UNFRAGMENTED, frame_length_ordered, frame_length_volatile,
    };

    fn template() -> DataHeader {
        DataHeader::default_for(101, 202, 5)
    }

    #[test]
    fn write_leaves_frame_claimed_with_stamped_fields() {
        let buffer = AtomicBuffer::allocate(256).expect("allocate");
        let writer = HeaderWriter::from_data_header(&template());
        writer.write(&buffer, 64, 80, 9);

        assert_eq!(frame_length_volatile(&buffer, 64), -80);
        let decoded = DataHeader::decode(&buffer.to_vec(64, 32)).expect("decode");
        assert_eq!(decoded.term_offset, 64);
        assert_eq!(decoded.term_id, 9);
        assert_eq!(decoded.session_id, 101);
        assert_eq!(decoded.stream_id, 202);
        assert_eq!(decoded.flags, UNFRAGMENTED);
        assert_eq!(decoded.frame_type, DATA_FRAME_TYPE);
    }

    #[test]
    fn short_frames_only_receive_the_bytes_they_own() {
        let buffer = AtomicBuffer::allocate(64).expect("allocate");
        buffer.put_bytes(16, &[0xEE; 16]);
        let writer = HeaderWriter::from_data_header(&template());
        writer.write(&buffer, 0, 16, 3);
        assert_eq!(buffer.to_vec(16, 16), vec![0xEE; 16]);
    }

    #[test]
    fn template_loads_from_log_meta() {
        let meta = AtomicBuffer::allocate(LOG_META_DATA_LENGTH).expect("meta");
        assert_eq!(HeaderWriter::from_log_meta(&meta).unwrap_err().kind(), ErrorKind::Corrupt);
        store_default_frame_header(&meta, &template().encode()).expect("store");
        let writer = HeaderWriter::from_log_meta(&meta).expect("writer");
        assert_eq!(writer.header_length(), 32);
        assert_eq!(HeaderWriter::new(&[0u8; 4]).unwrap_err().kind(), ErrorKind::Usage);
    }

    #[test]
    fn header_reports_fields_and_position() {
        let buffer = AtomicBuffer::allocate(1 << 16).expect("allocate");
        let writer = HeaderWriter::from_data_header(&template());
        writer.write(&buffer, 128, 40, 7);
        buffer.put_i64(128 + 24, 1234);
        frame_length_ordered(&buffer, 128, 40);

        let header = Header::new(&buffer, 128, 5, 16);
        assert_eq!(header.frame_length(), 40);
        assert_eq!(header.term_id(), 7);
        assert_eq!(header.term_offset(), 128);
        assert_eq!(header.session_id(), 101);
        assert_eq!(header.stream_id(), 202);
        assert_eq!(header.reserved_value(), 1234);
        assert_eq!(header.position(), (2i64 << 16) + 192);
    }
}
