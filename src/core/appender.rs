//! Purpose: Lock-free multi-producer claim/commit protocol over one term.
//! Exports: `TermAppender`, `ClaimOutcome`, `AppendOutcome`, `SPIN_RESET_THRESHOLD`.
//! Role: Writers reserve byte ranges here; the layer above rotates partitions on `Tripped`.
//! Invariants: A range is owned by the claimant whose tail add returned its start; the slot CAS only gates the add.
//! Invariants: The raw tail only grows by atomic add; a term always ends in a full frame or padding.
//! Invariants: Oversized messages are rejected before the claim loop; everything else returns an outcome.
use crate::core::buffer::AtomicBuffer;
use crate::core::claim::BufferClaim;
use crate::core::descriptor::{self, TERM_TAIL_COUNTER_OFFSET};
use crate::core::error::{Error, ErrorKind};
use crate::core::frame::{self, PADDING_FRAME_TYPE};
use crate::core::header::HeaderWriter;
use crate::core::partition::LogBufferPartition;

/// Unchanged-tail CAS failures tolerated before a stuck slot is forced back to zero.
pub const SPIN_RESET_THRESHOLD: u32 = 100;

#[derive(Debug)]
pub enum ClaimOutcome<'a> {
    Claimed(BufferClaim<'a>),
    /// This claimant crossed the term end and padded it; rotate and retry.
    Tripped,
    /// The term was already exhausted before this claim.
    Failed,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum AppendOutcome {
    Appended { term_id: i32, resulting_offset: usize },
    Tripped,
    Failed,
}

#[derive(Clone, Debug)]
pub struct TermAppender {
    term_buffer: AtomicBuffer,
    meta_data_buffer: AtomicBuffer,
    max_message_length: usize,
}

impl TermAppender {
    pub fn new(term_buffer: AtomicBuffer, meta_data_buffer: AtomicBuffer) -> Result<Self, Error> {
        descriptor::check_meta_data_buffer(&meta_data_buffer)?;
        if term_buffer.capacity() % frame::FRAME_ALIGNMENT != 0 {
            return Err(Error::new(ErrorKind::Usage).with_message(format!(
                "term capacity {} is not a multiple of {}",
                term_buffer.capacity(),
                frame::FRAME_ALIGNMENT
            )));
        }
        let max_message_length = frame::compute_max_message_length(term_buffer.capacity());
        Ok(Self {
            term_buffer,
            meta_data_buffer,
            max_message_length,
        })
    }

    pub fn for_partition(partition: &LogBufferPartition) -> Result<Self, Error> {
        Self::new(
            partition.term_buffer().clone(),
            partition.meta_data_buffer().clone(),
        )
    }

    pub fn term_buffer(&self) -> &AtomicBuffer {
        &self.term_buffer
    }

    pub fn max_message_length(&self) -> usize {
        self.max_message_length
    }

    pub fn raw_tail_volatile(&self) -> i64 {
        self.meta_data_buffer.get_i64_volatile(TERM_TAIL_COUNTER_OFFSET)
    }

    pub fn tail_offset(&self) -> usize {
        descriptor::term_offset(self.raw_tail_volatile(), self.term_buffer.capacity())
    }

    /// Reserves a frame for `length` payload bytes.
    pub fn claim<'a>(
        &'a self,
        header: &HeaderWriter,
        length: usize,
    ) -> Result<ClaimOutcome<'a>, Error> {
        if length > self.max_message_length {
            return Err(Error::new(ErrorKind::Usage).with_message(format!(
                "message length {length} exceeds max {} for term of {} bytes",
                self.max_message_length,
                self.term_buffer.capacity()
            )));
        }

        let term_length = self.term_buffer.capacity();
        let frame_length = length + header.header_length();
        let aligned_length = frame::aligned_frame_length(frame_length);

        let mut raw_tail = self.raw_tail_volatile();
        let mut spins = 0u32;
        let mut stuck_value = 0i32;
        loop {
            let term_offset = (raw_tail & 0xFFFF_FFFF) as usize;
            if term_offset >= term_length {
                let previous = self
                    .meta_data_buffer
                    .get_and_add_i64(TERM_TAIL_COUNTER_OFFSET, aligned_length as i64);
                return Ok(self.handle_end_of_log_condition(header, previous));
            }

            // An overshooting claim reserves the slot for the end-of-term padding instead.
            let slot_length = if term_offset + aligned_length > term_length {
                term_length - term_offset
            } else {
                frame_length
            };
            if self.term_buffer.compare_and_set_i32(
                frame::length_offset(term_offset),
                0,
                -(slot_length as i32),
            ) {
                if let Some(outcome) =
                    self.complete_reservation(header, raw_tail, frame_length, aligned_length)
                {
                    return Ok(outcome);
                }
                raw_tail = self.raw_tail_volatile();
                spins = 0;
                continue;
            }

            let observed = self.raw_tail_volatile();
            if observed != raw_tail {
                spins = 0;
                raw_tail = observed;
                continue;
            }

            if spins == 0 {
                stuck_value = frame::frame_length_volatile(&self.term_buffer, term_offset);
            }
            spins += 1;
            if spins > SPIN_RESET_THRESHOLD {
                self.reset_stuck_slot(term_offset, stuck_value);
                spins = 0;
            }
            std::hint::spin_loop();
        }
    }

    /// Claims, copies `payload`, and commits in one step.
    pub fn append(&self, header: &HeaderWriter, payload: &[u8]) -> Result<AppendOutcome, Error> {
        let outcome = match self.claim(header, payload.len())? {
            ClaimOutcome::Claimed(mut claim) => {
                claim.put_bytes(0, payload);
                let term_id = frame::frame_term_id(&self.term_buffer, claim.frame_offset());
                let resulting_offset = claim.frame_offset()
                    + frame::aligned_frame_length(claim.frame_length());
                claim.commit();
                AppendOutcome::Appended {
                    term_id,
                    resulting_offset,
                }
            }
            ClaimOutcome::Tripped => AppendOutcome::Tripped,
            ClaimOutcome::Failed => AppendOutcome::Failed,
        };
        Ok(outcome)
    }

    /// Advances the tail for a claimant that holds the slot at `raw_tail`.
    ///
    /// The range returned by the tail add belongs to this claimant alone. When it does not start
    /// at the slot that was taken, the slot was reset and retaken while this claimant stalled
    /// after its CAS; the reserved range is then published as padding and `None` asks for a retry.
    fn complete_reservation<'a>(
        &'a self,
        header: &HeaderWriter,
        raw_tail: i64,
        frame_length: usize,
        aligned_length: usize,
    ) -> Option<ClaimOutcome<'a>> {
        let term_length = self.term_buffer.capacity();
        let previous = self
            .meta_data_buffer
            .get_and_add_i64(TERM_TAIL_COUNTER_OFFSET, aligned_length as i64);
        let term_offset = (previous & 0xFFFF_FFFF) as usize;
        let term_id = descriptor::term_id(previous);

        if term_offset + aligned_length > term_length {
            return Some(self.handle_end_of_log_condition(header, previous));
        }
        if previous != raw_tail {
            tracing::warn!(
                term_id,
                term_offset,
                aligned_length,
                "claimed slot was reset while stalled; padding the reserved range"
            );
            self.write_padding(header, term_offset, aligned_length, term_id);
            return None;
        }

        header.write(&self.term_buffer, term_offset, frame_length, term_id);
        Some(ClaimOutcome::Claimed(BufferClaim::new(
            &self.term_buffer,
            term_offset,
            frame_length,
            header.header_length(),
        )))
    }

    fn handle_end_of_log_condition<'a>(
        &'a self,
        header: &HeaderWriter,
        previous_raw_tail: i64,
    ) -> ClaimOutcome<'a> {
        let term_length = self.term_buffer.capacity();
        let term_offset = (previous_raw_tail & 0xFFFF_FFFF) as usize;
        let term_id = descriptor::term_id(previous_raw_tail);

        if term_offset > term_length {
            return ClaimOutcome::Failed;
        }
        if term_offset < term_length {
            self.write_padding(header, term_offset, term_length - term_offset, term_id);
        }
        ClaimOutcome::Tripped
    }

    // Only called for ranges this claimant's tail add returned, so no other writer touches them.
    fn write_padding(&self, header: &HeaderWriter, term_offset: usize, length: usize, term_id: i32) {
        header.write(&self.term_buffer, term_offset, length, term_id);
        frame::set_frame_type(&self.term_buffer, term_offset, PADDING_FRAME_TYPE);
        frame::frame_length_ordered(&self.term_buffer, term_offset, length as i32);
    }

    // Only claimed, unpublished (negative) values are reset, and only if unchanged since spinning
    // began. A live claimant that loses its slot this way pads whatever its tail add reserves.
    fn reset_stuck_slot(&self, term_offset: usize, stuck_value: i32) {
        if stuck_value >= 0 {
            return;
        }
        if self
            .term_buffer
            .compare_and_set_i32(frame::length_offset(term_offset), stuck_value, 0)
        {
            tracing::warn!(
                term_offset,
                stuck_value,
                spins = SPIN_RESET_THRESHOLD,
                "forced stuck frame length back to zero"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{AppendOutcome, ClaimOutcome, TermAppender};
    use crate::core::buffer::AtomicBuffer;
    use crate::core::descriptor::{TERM_META_DATA_LENGTH, TERM_TAIL_COUNTER_OFFSET, pack_tail};
    use crate::core::error::ErrorKind;
    use crate::core::frame::{
        self, BASE_HEADER_LENGTH, DATA_FRAME_TYPE, DataHeader, PADDING_FRAME_TYPE,
        frame_length_volatile, frame_type,
    };
    use crate::core::header::HeaderWriter;
    use crate::core::validate::validate_term;

    fn appender(term_length: usize) -> TermAppender {
        TermAppender::new(
            AtomicBuffer::allocate(term_length).expect("term"),
            AtomicBuffer::allocate(TERM_META_DATA_LENGTH).expect("meta"),
        )
        .expect("appender")
    }

    fn data_header_writer() -> HeaderWriter {
        HeaderWriter::from_data_header(&DataHeader::default_for(1, 2, 0))
    }

    fn set_tail(appender: &TermAppender, term_id: i32, offset: u32) {
        appender
            .meta_data_buffer
            .put_i64_ordered(TERM_TAIL_COUNTER_OFFSET, pack_tail(term_id, offset));
    }

    #[test]
    fn claim_reserves_aligned_range_and_advances_tail() {
        let appender = appender(1024);
        let header = data_header_writer();
        set_tail(&appender, 4, 0);

        let ClaimOutcome::Claimed(claim) = appender.claim(&header, 20).expect("claim") else {
            panic!("expected a claim");
        };
        assert_eq!(claim.frame_offset(), 0);
        assert_eq!(claim.frame_length(), 52);
        assert_eq!(appender.tail_offset(), 64);
        assert_eq!(frame_length_volatile(appender.term_buffer(), 0), -52);
        assert_eq!(frame::frame_term_id(appender.term_buffer(), 0), 4);
        claim.commit();
        assert_eq!(frame_length_volatile(appender.term_buffer(), 0), 52);

        let ClaimOutcome::Claimed(second) = appender.claim(&header, 0).expect("claim") else {
            panic!("expected a claim");
        };
        assert_eq!(second.frame_offset(), 64);
        assert_eq!(frame::frame_term_offset(appender.term_buffer(), 64), 64);
        second.abort();
    }

    #[test]
    fn trip_pads_remainder_of_term() {
        let appender = appender(128);
        let header = HeaderWriter::new(&[0u8; BASE_HEADER_LENGTH]).expect("header");
        set_tail(&appender, 7, 100);

        let outcome = appender.claim(&header, 1).expect("claim");
        assert!(matches!(outcome, ClaimOutcome::Tripped));
        assert_eq!(frame_length_volatile(appender.term_buffer(), 100), 28);
        assert_eq!(frame_type(appender.term_buffer(), 100), PADDING_FRAME_TYPE);
        assert_eq!(frame::frame_term_id(appender.term_buffer(), 100), 7);
        assert_eq!(appender.tail_offset(), 128);
    }

    #[test]
    fn claims_after_trip_fail() {
        let appender = appender(128);
        let header = HeaderWriter::new(&[0u8; BASE_HEADER_LENGTH]).expect("header");
        set_tail(&appender, 0, 112);
        assert!(matches!(appender.claim(&header, 1).expect("claim"), ClaimOutcome::Tripped));
        assert_eq!(frame_length_volatile(appender.term_buffer(), 112), 16);
        assert!(matches!(appender.claim(&header, 1).expect("claim"), ClaimOutcome::Failed));
    }

    #[test]
    fn exact_fill_does_not_trip() {
        let appender = appender(128);
        let header = HeaderWriter::new(&[0u8; BASE_HEADER_LENGTH]).expect("header");
        set_tail(&appender, 0, 96);
        let ClaimOutcome::Claimed(claim) = appender.claim(&header, 16).expect("claim") else {
            panic!("expected a claim");
        };
        claim.commit();
        assert_eq!(appender.tail_offset(), 128);
        assert!(matches!(appender.claim(&header, 1).expect("claim"), ClaimOutcome::Tripped));
    }

    #[test]
    fn oversized_message_is_rejected() {
        let appender = appender(1024);
        let err = appender
            .claim(&data_header_writer(), 129)
            .expect_err("too large");
        assert_eq!(err.kind(), ErrorKind::Usage);
    }

    #[test]
    fn append_copies_payload_and_commits() {
        let appender = appender(64 * 1024);
        let header = data_header_writer();
        set_tail(&appender, 3, 0);
        let outcome = appender.append(&header, b"hello term").expect("append");
        assert_eq!(
            outcome,
            AppendOutcome::Appended {
                term_id: 3,
                resulting_offset: 64
            }
        );
        let buffer = appender.term_buffer();
        assert_eq!(frame_length_volatile(buffer, 0), 42);
        assert_eq!(frame_type(buffer, 0), DATA_FRAME_TYPE);
        assert_eq!(buffer.to_vec(32, 10), b"hello term".to_vec());
    }

    #[test]
    fn stuck_slot_is_reset_after_spinning() {
        let appender = appender(1024);
        let header = data_header_writer();
        // A claimant that won the CAS at 0 and died before advancing the tail.
        appender.term_buffer().put_i32_ordered(0, -64);
        let ClaimOutcome::Claimed(claim) = appender.claim(&header, 8).expect("claim") else {
            panic!("expected a claim");
        };
        assert_eq!(claim.frame_offset(), 0);
        assert_eq!(frame_length_volatile(appender.term_buffer(), 0), -40);
        claim.commit();
    }

    #[test]
    fn stalled_claimant_pads_its_range_after_losing_the_slot() {
        let appender = appender(1024);
        let header = data_header_writer();
        set_tail(&appender, 2, 0);
        let stalled_tail = appender.raw_tail_volatile();
        // A claimant took the slot at 0 and stalled before its tail add.
        assert!(appender.term_buffer().compare_and_set_i32(0, 0, -40));

        let ClaimOutcome::Claimed(mut claim) = appender.claim(&header, 8).expect("claim") else {
            panic!("expected a claim");
        };
        assert_eq!(claim.frame_offset(), 0);
        claim.put_bytes(0, b"retaken!");
        claim.commit();

        // The stalled claimant resumes; its add lands after the frame that retook the slot.
        assert!(appender
            .complete_reservation(&header, stalled_tail, 40, 64)
            .is_none());
        let buffer = appender.term_buffer();
        assert_eq!(frame_length_volatile(buffer, 0), 40);
        assert_eq!(frame_type(buffer, 0), DATA_FRAME_TYPE);
        assert_eq!(buffer.to_vec(32, 8), b"retaken!".to_vec());
        assert_eq!(frame_length_volatile(buffer, 64), 64);
        assert_eq!(frame_type(buffer, 64), PADDING_FRAME_TYPE);
        assert_eq!(appender.tail_offset(), 128);

        let outcome = appender.append(&header, b"after").expect("append");
        assert_eq!(
            outcome,
            AppendOutcome::Appended {
                term_id: 2,
                resulting_offset: 192
            }
        );
        let summary = validate_term(buffer, 2, appender.tail_offset()).expect("valid term");
        assert_eq!(summary.data_frames, 2);
        assert_eq!(summary.padding_frames, 1);
    }

    #[test]
    fn only_unpublished_lengths_are_reset() {
        let appender = appender(1024);
        let buffer = appender.term_buffer();
        buffer.put_i32_ordered(0, 64);
        appender.reset_stuck_slot(0, 64);
        assert_eq!(frame_length_volatile(buffer, 0), 64);

        buffer.put_i32_ordered(64, -64);
        appender.reset_stuck_slot(64, -64);
        assert_eq!(frame_length_volatile(buffer, 64), 0);
    }
}
