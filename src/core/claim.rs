// Scoped handle over a claimed frame: fill the payload, then commit or abort exactly once.
use crate::core::buffer::AtomicBuffer;
use crate::core::frame::{self, PADDING_FRAME_TYPE, RESERVED_VALUE_FIELD_OFFSET};

#[must_use = "a claim must be committed or aborted, otherwise the term stays blocked"]
#[derive(Debug)]
pub struct BufferClaim<'a> {
    buffer: &'a AtomicBuffer,
    frame_offset: usize,
    frame_length: usize,
    header_length: usize,
    resolved: bool,
}

impl<'a> BufferClaim<'a> {
    pub(crate) fn new(
        buffer: &'a AtomicBuffer,
        frame_offset: usize,
        frame_length: usize,
        header_length: usize,
    ) -> Self {
        Self {
            buffer,
            frame_offset,
            frame_length,
            header_length,
            resolved: false,
        }
    }

    pub fn frame_offset(&self) -> usize {
        self.frame_offset
    }

    pub fn frame_length(&self) -> usize {
        self.frame_length
    }

    /// Term offset of the first payload byte.
    pub fn offset(&self) -> usize {
        self.frame_offset + self.header_length
    }

    /// Payload length in bytes.
    pub fn length(&self) -> usize {
        self.frame_length - self.header_length
    }

    pub fn buffer(&self) -> &'a AtomicBuffer {
        self.buffer
    }

    /// Copies `src` into the payload at `index` (payload-relative).
    pub fn put_bytes(&mut self, index: usize, src: &[u8]) {
        assert!(
            index + src.len() <= self.length(),
            "write {index}+{} exceeds claimed payload of {} bytes",
            src.len(),
            self.length()
        );
        self.buffer.put_bytes(self.offset() + index, src);
    }

    pub fn set_reserved_value(&mut self, value: i64) {
        assert!(
            self.header_length >= RESERVED_VALUE_FIELD_OFFSET + 8,
            "header of {} bytes has no reserved value field",
            self.header_length
        );
        self.buffer
            .put_i64(self.frame_offset + RESERVED_VALUE_FIELD_OFFSET, value);
    }

    /// Publishes the frame to readers.
    pub fn commit(mut self) {
        frame::frame_length_ordered(self.buffer, self.frame_offset, self.frame_length as i32);
        self.resolved = true;
    }

    /// Publishes the slot as padding so readers skip it.
    pub fn abort(mut self) {
        frame::set_frame_type(self.buffer, self.frame_offset, PADDING_FRAME_TYPE);
        frame::frame_length_ordered(self.buffer, self.frame_offset, self.frame_length as i32);
        self.resolved = true;
    }
}

impl Drop for BufferClaim<'_> {
    fn drop(&mut self) {
        if self.resolved {
            return;
        }
        tracing::error!(
            frame_offset = self.frame_offset,
            frame_length = self.frame_length,
            "buffer claim dropped without commit or abort"
        );
        if cfg!(debug_assertions) && !std::thread::panicking() {
            panic!(
                "buffer claim at offset {} dropped without commit or abort",
                self.frame_offset
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::BufferClaim;
    use crate::core::buffer::AtomicBuffer;
    use crate::core::frame::{
        DATA_FRAME_TYPE, PADDING_FRAME_TYPE, frame_length_volatile, frame_type, set_frame_type,
    };

    fn claimed(buffer: &AtomicBuffer) -> BufferClaim<'_> {
        buffer.put_i32_ordered(32, -96);
        set_frame_type(buffer, 32, DATA_FRAME_TYPE);
        BufferClaim::new(buffer, 32, 96, 32)
    }

    #[test]
    fn payload_range_follows_header() {
        let buffer = AtomicBuffer::allocate(256).expect("allocate");
        let mut claim = claimed(&buffer);
        assert_eq!(claim.offset(), 64);
        assert_eq!(claim.length(), 64);
        claim.put_bytes(60, b"tail");
        claim.set_reserved_value(77);
        claim.commit();
        assert_eq!(buffer.to_vec(124, 4), b"tail".to_vec());
        assert_eq!(buffer.get_i64(56), 77);
    }

    #[test]
    fn commit_publishes_positive_length() {
        let buffer = AtomicBuffer::allocate(256).expect("allocate");
        claimed(&buffer).commit();
        assert_eq!(frame_length_volatile(&buffer, 32), 96);
        assert_eq!(frame_type(&buffer, 32), DATA_FRAME_TYPE);
    }

    #[test]
    fn abort_publishes_padding() {
        let buffer = AtomicBuffer::allocate(256).expect("allocate");
        claimed(&buffer).abort();
        assert_eq!(frame_length_volatile(&buffer, 32), 96);
        assert_eq!(frame_type(&buffer, 32), PADDING_FRAME_TYPE);
    }

    #[test]
    #[should_panic(expected = "exceeds claimed payload")]
    fn payload_writes_are_bounded() {
        let buffer = AtomicBuffer::allocate(256).expect("allocate");
        let mut claim = claimed(&buffer);
        claim.put_bytes(62, b"tail");
    }

    #[test]
    fn unresolved_drop_is_flagged_in_debug_builds() {
        let buffer = AtomicBuffer::allocate(256).expect("allocate");
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let claim = BufferClaim::new(&buffer, 0, 64, 32);
            drop(claim);
        }));
        assert_eq!(result.is_err(), cfg!(debug_assertions));
    }
}
