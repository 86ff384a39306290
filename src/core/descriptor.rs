//! Purpose: Static layout of term/log metadata plus position, index and rotation arithmetic.
//! Exports: layout constants, `compute_*` position helpers, `index_by_*`, `rotate_log`, log metadata accessors.
//! Role: Shared vocabulary between appenders, readers, the unblocker and `LogBuffers`.
//! Invariants: Layout is a set of compile-time constants derived from `CACHE_LINE_LENGTH`.
//! Invariants: Rotation cleans the next term if dirty, writes its term id, marks the one after dirty, then the active index (ordered last).
use crate::core::buffer::{AtomicBuffer, CACHE_LINE_LENGTH};
use crate::core::error::{Error, ErrorKind};
use crate::core::frame::{BASE_HEADER_LENGTH, FRAME_ALIGNMENT};
use crate::core::partition::{LogBufferPartition, TermStatus};

pub const PARTITION_COUNT: usize = 3;

pub const TERM_MIN_LENGTH: usize = 64 * 1024;
pub const TERM_MAX_LENGTH: usize = 1024 * 1024 * 1024;

// Per-partition term metadata; each hot word sits on its own pair of cache lines.
pub const TERM_TAIL_COUNTER_OFFSET: usize = CACHE_LINE_LENGTH * 2;
pub const TERM_STATUS_OFFSET: usize = TERM_TAIL_COUNTER_OFFSET + CACHE_LINE_LENGTH * 2;
pub const TERM_META_DATA_LENGTH: usize = TERM_STATUS_OFFSET + CACHE_LINE_LENGTH * 2;

// Shared log metadata.
pub const LOG_ACTIVE_PARTITION_INDEX_OFFSET: usize = CACHE_LINE_LENGTH * 2;
pub const LOG_TIME_OF_LAST_SM_OFFSET: usize = LOG_ACTIVE_PARTITION_INDEX_OFFSET + CACHE_LINE_LENGTH * 2;
pub const LOG_CORRELATION_ID_OFFSET: usize = LOG_TIME_OF_LAST_SM_OFFSET + CACHE_LINE_LENGTH * 2;
pub const LOG_INITIAL_TERM_ID_OFFSET: usize = LOG_CORRELATION_ID_OFFSET + 8;
pub const LOG_DEFAULT_FRAME_HEADER_LENGTH_OFFSET: usize = LOG_INITIAL_TERM_ID_OFFSET + 4;
pub const LOG_MTU_LENGTH_OFFSET: usize = LOG_DEFAULT_FRAME_HEADER_LENGTH_OFFSET + 4;
pub const LOG_DEFAULT_FRAME_HEADER_OFFSET: usize = LOG_CORRELATION_ID_OFFSET + CACHE_LINE_LENGTH;
pub const LOG_DEFAULT_FRAME_HEADER_MAX_LENGTH: usize = CACHE_LINE_LENGTH * 2;
pub const LOG_META_DATA_LENGTH: usize =
    LOG_DEFAULT_FRAME_HEADER_OFFSET + LOG_DEFAULT_FRAME_HEADER_MAX_LENGTH;

pub fn check_term_length(term_length: usize) -> Result<(), Error> {
    if term_length < TERM_MIN_LENGTH {
        return Err(Error::new(ErrorKind::Usage).with_message(format!(
            "term length {term_length} is less than min length {TERM_MIN_LENGTH}"
        )));
    }
    if term_length > TERM_MAX_LENGTH {
        return Err(Error::new(ErrorKind::Usage).with_message(format!(
            "term length {term_length} is greater than max length {TERM_MAX_LENGTH}"
        )));
    }
    if term_length % FRAME_ALIGNMENT != 0 {
        return Err(Error::new(ErrorKind::Usage).with_message(format!(
            "term length {term_length} is not a multiple of {FRAME_ALIGNMENT}"
        )));
    }
    if !term_length.is_power_of_two() {
        return Err(Error::new(ErrorKind::Usage)
            .with_message(format!("term length {term_length} is not a power of 2"))
            .with_hint("Positions are derived by shifting, so term lengths must be powers of 2."));
    }
    Ok(())
}

pub fn check_meta_data_buffer(buffer: &AtomicBuffer) -> Result<(), Error> {
    if buffer.capacity() < TERM_META_DATA_LENGTH {
        return Err(Error::new(ErrorKind::Usage).with_message(format!(
            "term meta data buffer of {} bytes is smaller than required {TERM_META_DATA_LENGTH}",
            buffer.capacity()
        )));
    }
    Ok(())
}

pub fn check_log_meta_data_buffer(buffer: &AtomicBuffer) -> Result<(), Error> {
    if buffer.capacity() < LOG_META_DATA_LENGTH {
        return Err(Error::new(ErrorKind::Usage).with_message(format!(
            "log meta data buffer of {} bytes is smaller than required {LOG_META_DATA_LENGTH}",
            buffer.capacity()
        )));
    }
    Ok(())
}

pub fn compute_log_length(term_length: usize) -> usize {
    (term_length * PARTITION_COUNT) + (TERM_META_DATA_LENGTH * PARTITION_COUNT) + LOG_META_DATA_LENGTH
}

/// Inverse of `compute_log_length`; returns `None` when the length leaves no term space.
pub fn compute_term_length(log_length: usize) -> Option<usize> {
    let meta_data_section = (TERM_META_DATA_LENGTH * PARTITION_COUNT) + LOG_META_DATA_LENGTH;
    let terms = log_length.checked_sub(meta_data_section)?;
    if terms == 0 || terms % PARTITION_COUNT != 0 {
        return None;
    }
    Some(terms / PARTITION_COUNT)
}

pub fn position_bits_to_shift(term_length: usize) -> u32 {
    term_length.trailing_zeros()
}

/// Stream position of `term_offset` within `active_term_id`; term ids wrap.
pub fn compute_position(
    active_term_id: i32,
    term_offset: usize,
    position_bits_to_shift: u32,
    initial_term_id: i32,
) -> i64 {
    let term_count = active_term_id.wrapping_sub(initial_term_id) as i64;
    (term_count << position_bits_to_shift) + term_offset as i64
}

pub fn compute_term_begin_position(
    active_term_id: i32,
    position_bits_to_shift: u32,
    initial_term_id: i32,
) -> i64 {
    compute_position(active_term_id, 0, position_bits_to_shift, initial_term_id)
}

pub fn compute_term_id_from_position(
    position: i64,
    position_bits_to_shift: u32,
    initial_term_id: i32,
) -> i32 {
    ((position >> position_bits_to_shift) as i32).wrapping_add(initial_term_id)
}

pub fn compute_term_offset_from_position(position: i64, position_bits_to_shift: u32) -> usize {
    let mask = (1i64 << position_bits_to_shift) - 1;
    (position & mask) as usize
}

pub fn index_by_term(initial_term_id: i32, active_term_id: i32) -> usize {
    index_by_term_count(active_term_id.wrapping_sub(initial_term_id) as i64)
}

pub fn index_by_term_count(term_count: i64) -> usize {
    term_count.rem_euclid(PARTITION_COUNT as i64) as usize
}

pub fn index_by_position(position: i64, position_bits_to_shift: u32) -> usize {
    index_by_term_count(position >> position_bits_to_shift)
}

pub fn next_partition_index(current_index: usize) -> usize {
    (current_index + 1) % PARTITION_COUNT
}

pub fn previous_partition_index(current_index: usize) -> usize {
    (current_index + PARTITION_COUNT - 1) % PARTITION_COUNT
}

pub fn pack_tail(term_id: i32, term_offset: u32) -> i64 {
    ((term_id as i64) << 32) | term_offset as i64
}

pub fn term_id(raw_tail: i64) -> i32 {
    (raw_tail >> 32) as i32
}

/// Physical offset for scanning; the raw counter keeps growing past the term end.
pub fn term_offset(raw_tail: i64, term_length: usize) -> usize {
    let tail = (raw_tail & 0xFFFF_FFFF) as usize;
    tail.min(term_length)
}

/// Makes the partition after `active_index` current for `new_term_id`, zeroing it first
/// if it still holds an older term.
pub fn rotate_log(
    partitions: &[LogBufferPartition; PARTITION_COUNT],
    log_meta_data_buffer: &AtomicBuffer,
    active_index: usize,
    new_term_id: i32,
) {
    let next_index = next_partition_index(active_index);
    let next_next_index = next_partition_index(next_index);

    if partitions[next_index].clean_if_dirty() {
        tracing::debug!(partition = next_index, "cleaned partition before rotation");
    }
    partitions[next_index].set_term_id(new_term_id);
    partitions[next_next_index].set_status_ordered(TermStatus::NeedsCleaning);
    set_active_partition_index(log_meta_data_buffer, next_index);

    tracing::debug!(
        from = active_index,
        to = next_index,
        term_id = new_term_id,
        "rotated log"
    );
}

pub fn active_partition_index(log_meta_data_buffer: &AtomicBuffer) -> usize {
    log_meta_data_buffer.get_i32_volatile(LOG_ACTIVE_PARTITION_INDEX_OFFSET) as usize
}

pub fn set_active_partition_index(log_meta_data_buffer: &AtomicBuffer, index: usize) {
    log_meta_data_buffer.put_i32_ordered(LOG_ACTIVE_PARTITION_INDEX_OFFSET, index as i32);
}

pub fn time_of_last_status_message(log_meta_data_buffer: &AtomicBuffer) -> i64 {
    log_meta_data_buffer.get_i64_volatile(LOG_TIME_OF_LAST_SM_OFFSET)
}

pub fn set_time_of_last_status_message(log_meta_data_buffer: &AtomicBuffer, time_ms: i64) {
    log_meta_data_buffer.put_i64_ordered(LOG_TIME_OF_LAST_SM_OFFSET, time_ms);
}

pub fn correlation_id(log_meta_data_buffer: &AtomicBuffer) -> i64 {
    log_meta_data_buffer.get_i64(LOG_CORRELATION_ID_OFFSET)
}

pub fn set_correlation_id(log_meta_data_buffer: &AtomicBuffer, id: i64) {
    log_meta_data_buffer.put_i64(LOG_CORRELATION_ID_OFFSET, id);
}

pub fn initial_term_id(log_meta_data_buffer: &AtomicBuffer) -> i32 {
    log_meta_data_buffer.get_i32(LOG_INITIAL_TERM_ID_OFFSET)
}

pub fn set_initial_term_id(log_meta_data_buffer: &AtomicBuffer, term_id: i32) {
    log_meta_data_buffer.put_i32(LOG_INITIAL_TERM_ID_OFFSET, term_id);
}

pub fn mtu_length(log_meta_data_buffer: &AtomicBuffer) -> i32 {
    log_meta_data_buffer.get_i32(LOG_MTU_LENGTH_OFFSET)
}

pub fn set_mtu_length(log_meta_data_buffer: &AtomicBuffer, length: i32) {
    log_meta_data_buffer.put_i32(LOG_MTU_LENGTH_OFFSET, length);
}

pub fn default_frame_header_length(log_meta_data_buffer: &AtomicBuffer) -> i32 {
    log_meta_data_buffer.get_i32(LOG_DEFAULT_FRAME_HEADER_LENGTH_OFFSET)
}

pub fn store_default_frame_header(
    log_meta_data_buffer: &AtomicBuffer,
    default_header: &[u8],
) -> Result<(), Error> {
    check_default_header_length(default_header.len())?;
    log_meta_data_buffer.put_i32(
        LOG_DEFAULT_FRAME_HEADER_LENGTH_OFFSET,
        default_header.len() as i32,
    );
    log_meta_data_buffer.put_bytes(LOG_DEFAULT_FRAME_HEADER_OFFSET, default_header);
    Ok(())
}

/// Copy of the stored template; `Corrupt` when the stored length is out of range.
pub fn default_frame_header(log_meta_data_buffer: &AtomicBuffer) -> Result<Vec<u8>, Error> {
    let length = default_frame_header_length(log_meta_data_buffer);
    if length < 0 || check_default_header_length(length as usize).is_err() {
        return Err(Error::new(ErrorKind::Corrupt)
            .with_message(format!("stored default frame header length {length} is invalid"))
            .with_offset(LOG_DEFAULT_FRAME_HEADER_LENGTH_OFFSET as u64));
    }
    Ok(log_meta_data_buffer.to_vec(LOG_DEFAULT_FRAME_HEADER_OFFSET, length as usize))
}

/// Copies the stored template over `term_offset`, leaving the frame length word untouched.
pub fn apply_default_header(
    log_meta_data_buffer: &AtomicBuffer,
    term_buffer: &AtomicBuffer,
    term_offset: usize,
    frame_length: usize,
) {
    let stored = default_frame_header_length(log_meta_data_buffer).max(0) as usize;
    let length = stored
        .min(LOG_DEFAULT_FRAME_HEADER_MAX_LENGTH)
        .min(frame_length);
    if length <= 4 {
        return;
    }
    let mut template = [0u8; LOG_DEFAULT_FRAME_HEADER_MAX_LENGTH];
    log_meta_data_buffer.get_bytes(LOG_DEFAULT_FRAME_HEADER_OFFSET, &mut template[..length]);
    term_buffer.put_bytes(term_offset + 4, &template[4..length]);
}

pub(crate) fn check_default_header_length(length: usize) -> Result<(), Error> {
    if !(BASE_HEADER_LENGTH..=LOG_DEFAULT_FRAME_HEADER_MAX_LENGTH).contains(&length) {
        return Err(Error::new(ErrorKind::Usage).with_message(format!(
            "default frame header length {length} must be between {BASE_HEADER_LENGTH} and {LOG_DEFAULT_FRAME_HEADER_MAX_LENGTH}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::partition::LogBufferPartition;

    fn partitions(term_length: usize) -> [LogBufferPartition; PARTITION_COUNT] {
        std::array::from_fn(|_| {
            LogBufferPartition::new(
                AtomicBuffer::allocate(term_length).expect("term"),
                AtomicBuffer::allocate(TERM_META_DATA_LENGTH).expect("meta"),
            )
        })
    }

    #[test]
    fn layout_keeps_hot_words_on_separate_cache_lines() {
        assert_eq!(TERM_TAIL_COUNTER_OFFSET % CACHE_LINE_LENGTH, 0);
        assert_eq!(TERM_STATUS_OFFSET - TERM_TAIL_COUNTER_OFFSET, 2 * CACHE_LINE_LENGTH);
        assert_eq!(LOG_DEFAULT_FRAME_HEADER_OFFSET % CACHE_LINE_LENGTH, 0);
        assert!(LOG_MTU_LENGTH_OFFSET + 4 <= LOG_DEFAULT_FRAME_HEADER_OFFSET);
        assert_eq!(LOG_META_DATA_LENGTH % CACHE_LINE_LENGTH, 0);
    }

    #[test]
    fn term_length_checks() {
        assert!(check_term_length(TERM_MIN_LENGTH).is_ok());
        assert!(check_term_length(1024 * 1024).is_ok());
        let cases = [TERM_MIN_LENGTH / 2, TERM_MIN_LENGTH + 16, TERM_MIN_LENGTH * 3, TERM_MAX_LENGTH * 2];
        for length in cases {
            let err = check_term_length(length).expect_err("invalid length");
            assert_eq!(err.kind(), ErrorKind::Usage);
        }
    }

    #[test]
    fn meta_data_buffer_checks() {
        let small = AtomicBuffer::allocate(TERM_META_DATA_LENGTH - 8).expect("allocate");
        assert!(check_meta_data_buffer(&small).is_err());
        assert!(check_log_meta_data_buffer(&small).is_err());
        let term_meta = AtomicBuffer::allocate(TERM_META_DATA_LENGTH).expect("allocate");
        assert!(check_meta_data_buffer(&term_meta).is_ok());
    }

    #[test]
    fn log_length_round_trips() {
        let term_length = TERM_MIN_LENGTH;
        let log_length = compute_log_length(term_length);
        assert_eq!(compute_term_length(log_length), Some(term_length));
        assert_eq!(compute_term_length(LOG_META_DATA_LENGTH), None);
    }

    #[test]
    fn position_arithmetic() {
        let shift = position_bits_to_shift(TERM_MIN_LENGTH);
        assert_eq!(shift, 16);
        let initial = 7;
        let position = compute_position(initial + 3, 96, shift, initial);
        assert_eq!(position, 3 * TERM_MIN_LENGTH as i64 + 96);
        assert_eq!(compute_term_id_from_position(position, shift, initial), initial + 3);
        assert_eq!(compute_term_offset_from_position(position, shift), 96);
        assert_eq!(compute_term_begin_position(initial + 1, shift, initial), TERM_MIN_LENGTH as i64);
        assert_eq!(index_by_position(position, shift), 0);
        assert_eq!(index_by_term(initial, initial + 3), 0);
        assert_eq!(index_by_term(initial, initial + 4), 1);
    }

    #[test]
    fn positions_survive_term_id_wraparound() {
        let shift = position_bits_to_shift(TERM_MIN_LENGTH);
        let initial = i32::MAX - 1;
        let active = initial.wrapping_add(4);
        assert!(active < 0);
        let position = compute_position(active, 64, shift, initial);
        assert_eq!(position, 4 * TERM_MIN_LENGTH as i64 + 64);
        assert_eq!(compute_term_id_from_position(position, shift, initial), active);
        assert_eq!(index_by_term(initial, active), 1);
    }

    #[test]
    fn partition_rotation_indexes() {
        assert_eq!(next_partition_index(0), 1);
        assert_eq!(next_partition_index(2), 0);
        assert_eq!(previous_partition_index(0), 2);
        assert_eq!(previous_partition_index(1), 0);
    }

    #[test]
    fn raw_tail_packing() {
        let raw = pack_tail(-5, 4096);
        assert_eq!(term_id(raw), -5);
        assert_eq!(term_offset(raw, 1 << 16), 4096);
        assert_eq!(term_offset(pack_tail(3, 70_000), 1 << 16), 1 << 16);
    }

    #[test]
    fn rotate_log_sets_term_id_status_and_active_index() {
        let partitions = partitions(1024);
        let meta = AtomicBuffer::allocate(LOG_META_DATA_LENGTH).expect("meta");
        for active in 0..PARTITION_COUNT {
            set_active_partition_index(&meta, active);
            let new_term_id = 40 + active as i32;
            rotate_log(&partitions, &meta, active, new_term_id);

            let next = next_partition_index(active);
            assert_eq!(partitions[next].term_id(), new_term_id);
            assert_eq!(partitions[next].tail_offset(), 0);
            assert_eq!(
                partitions[next_partition_index(next)].status().expect("status"),
                TermStatus::NeedsCleaning
            );
            assert_eq!(active_partition_index(&meta), next);
        }
    }

    #[test]
    fn default_header_storage() {
        let meta = AtomicBuffer::allocate(LOG_META_DATA_LENGTH).expect("meta");
        let err = store_default_frame_header(&meta, &[0u8; 8]).expect_err("too short");
        assert_eq!(err.kind(), ErrorKind::Usage);
        assert_eq!(default_frame_header(&meta).expect_err("unset").kind(), ErrorKind::Corrupt);

        let template: Vec<u8> = (0u8..32).collect();
        store_default_frame_header(&meta, &template).expect("store");
        assert_eq!(default_frame_header(&meta).expect("load"), template);

        let term = AtomicBuffer::allocate(128).expect("term");
        term.put_i32(64, -96);
        apply_default_header(&meta, &term, 64, 96);
        assert_eq!(term.get_i32(64), -96);
        assert_eq!(term.to_vec(68, 28), template[4..].to_vec());
    }

    #[test]
    fn log_meta_accessors() {
        let meta = AtomicBuffer::allocate(LOG_META_DATA_LENGTH).expect("meta");
        set_time_of_last_status_message(&meta, 1_700_000_000_000);
        set_correlation_id(&meta, 99);
        set_initial_term_id(&meta, -3);
        set_mtu_length(&meta, 4096);
        assert_eq!(time_of_last_status_message(&meta), 1_700_000_000_000);
        assert_eq!(correlation_id(&meta), 99);
        assert_eq!(initial_term_id(&meta), -3);
        assert_eq!(mtu_length(&meta), 4096);
    }
}
