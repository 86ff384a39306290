// One term buffer paired with its metadata region (raw tail counter + cleaning status).
use crate::core::buffer::AtomicBuffer;
use crate::core::descriptor::{self, TERM_STATUS_OFFSET, TERM_TAIL_COUNTER_OFFSET};
use crate::core::error::{Error, ErrorKind};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TermStatus {
    Clean = 0,
    NeedsCleaning = 1,
}

impl TermStatus {
    fn from_i32(value: i32) -> Result<Self, Error> {
        match value {
            0 => Ok(TermStatus::Clean),
            1 => Ok(TermStatus::NeedsCleaning),
            _ => Err(Error::new(ErrorKind::Corrupt)
                .with_message(format!("invalid term status {value}"))
                .with_offset(TERM_STATUS_OFFSET as u64)),
        }
    }
}

#[derive(Clone, Debug)]
pub struct LogBufferPartition {
    term_buffer: AtomicBuffer,
    meta_data_buffer: AtomicBuffer,
}

impl LogBufferPartition {
    pub fn new(term_buffer: AtomicBuffer, meta_data_buffer: AtomicBuffer) -> Self {
        Self {
            term_buffer,
            meta_data_buffer,
        }
    }

    pub fn term_buffer(&self) -> &AtomicBuffer {
        &self.term_buffer
    }

    pub fn meta_data_buffer(&self) -> &AtomicBuffer {
        &self.meta_data_buffer
    }

    pub fn raw_tail_volatile(&self) -> i64 {
        self.meta_data_buffer.get_i64_volatile(TERM_TAIL_COUNTER_OFFSET)
    }

    pub fn term_id(&self) -> i32 {
        descriptor::term_id(self.raw_tail_volatile())
    }

    /// Resets the tail to offset 0 of `term_id` with release semantics.
    pub fn set_term_id(&self, term_id: i32) {
        self.meta_data_buffer
            .put_i64_ordered(TERM_TAIL_COUNTER_OFFSET, descriptor::pack_tail(term_id, 0));
    }

    pub fn tail_offset(&self) -> usize {
        descriptor::term_offset(self.raw_tail_volatile(), self.term_buffer.capacity())
    }

    pub fn status(&self) -> Result<TermStatus, Error> {
        TermStatus::from_i32(self.meta_data_buffer.get_i32_volatile(TERM_STATUS_OFFSET))
    }

    pub fn set_status_ordered(&self, status: TermStatus) {
        self.meta_data_buffer
            .put_i32_ordered(TERM_STATUS_OFFSET, status as i32);
    }

    /// Zeroes the whole term and marks it clean.
    pub fn clean(&self) {
        self.term_buffer
            .set_memory(0, self.term_buffer.capacity(), 0);
        self.set_status_ordered(TermStatus::Clean);
    }

    /// Cleans the term unless its status word reads clean; returns whether it cleaned.
    /// An unrecognised status is treated as dirty.
    pub fn clean_if_dirty(&self) -> bool {
        let status = self.meta_data_buffer.get_i32_volatile(TERM_STATUS_OFFSET);
        if status == TermStatus::Clean as i32 {
            return false;
        }
        self.clean();
        true
    }
}
