//! Purpose: Allocate, create, and open complete logs: three terms, their metadata, and log metadata.
//! Exports: `LogOptions`, `LogBuffers`.
//! Role: Setup layer; hands partitions, appenders and header writers to the hot path.
//! Invariants: Region layout is terms, then term metadata, then log metadata (`compute_log_length`).
//! Invariants: Configuration errors surface here as `Usage`; bad files surface as `Corrupt`.
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::core::appender::TermAppender;
use crate::core::buffer::AtomicBuffer;
use crate::core::descriptor::{
    self, LOG_META_DATA_LENGTH, PARTITION_COUNT, TERM_META_DATA_LENGTH,
};
use crate::core::error::{Error, ErrorKind};
use crate::core::frame::{self, DATA_HEADER_LENGTH, DataHeader, FRAME_ALIGNMENT};
use crate::core::header::HeaderWriter;
use crate::core::partition::{LogBufferPartition, TermStatus};

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LogOptions {
    pub term_length: usize,
    pub mtu_length: usize,
    pub initial_term_id: i32,
    pub session_id: i32,
    pub stream_id: i32,
    pub correlation_id: i64,
}

impl Default for LogOptions {
    fn default() -> Self {
        Self {
            term_length: descriptor::TERM_MIN_LENGTH,
            mtu_length: 4096,
            initial_term_id: 0,
            session_id: 0,
            stream_id: 0,
            correlation_id: 0,
        }
    }
}

impl LogOptions {
    pub fn validate(&self) -> Result<(), Error> {
        descriptor::check_term_length(self.term_length)?;
        let max_message_length = frame::compute_max_message_length(self.term_length);
        if self.mtu_length < DATA_HEADER_LENGTH
            || self.mtu_length % FRAME_ALIGNMENT != 0
            || self.mtu_length > max_message_length
        {
            return Err(Error::new(ErrorKind::Usage)
                .with_message(format!("mtu length {} is invalid", self.mtu_length))
                .with_hint(format!(
                    "Use a multiple of {FRAME_ALIGNMENT} between {DATA_HEADER_LENGTH} and {max_message_length}."
                )));
        }
        Ok(())
    }

    /// Reads options from a JSON object; missing keys take their defaults.
    pub fn from_json_path(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|err| {
            let kind = if err.kind() == std::io::ErrorKind::NotFound {
                ErrorKind::NotFound
            } else {
                ErrorKind::Io
            };
            Error::new(kind).with_path(path).with_source(err)
        })?;
        serde_json::from_str(&text).map_err(|err| {
            Error::new(ErrorKind::Usage)
                .with_message("invalid log options")
                .with_path(path)
                .with_source(err)
        })
    }

    pub fn default_header(&self) -> DataHeader {
        DataHeader::default_for(self.session_id, self.stream_id, self.initial_term_id)
    }
}

#[derive(Debug)]
pub struct LogBuffers {
    path: Option<PathBuf>,
    buffer: AtomicBuffer,
    term_length: usize,
    partitions: [LogBufferPartition; PARTITION_COUNT],
    log_meta_data_buffer: AtomicBuffer,
}

impl LogBuffers {
    /// A log on the heap, initialised from `options`.
    pub fn allocate(options: &LogOptions) -> Result<Self, Error> {
        options.validate()?;
        let buffer = AtomicBuffer::allocate(descriptor::compute_log_length(options.term_length))?;
        let log = Self::from_buffer(buffer, options.term_length, None)?;
        log.initialise(options)?;
        tracing::debug!(term_length = options.term_length, "allocated log");
        Ok(log)
    }

    /// Creates (or truncates) `path`, sizes it for `options`, and maps it.
    pub fn create_mapped(path: impl AsRef<Path>, options: &LogOptions) -> Result<Self, Error> {
        options.validate()?;
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .create(true)
            .truncate(true)
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|err| Error::new(ErrorKind::Io).with_path(&path).with_source(err))?;
        let log_length = descriptor::compute_log_length(options.term_length);
        file.set_len(log_length as u64)
            .map_err(|err| Error::new(ErrorKind::Io).with_path(&path).with_source(err))?;

        let buffer = map(&file, &path)?;
        let log = Self::from_buffer(buffer, options.term_length, Some(path.clone()))?;
        log.initialise(options)?;
        log.flush()?;
        tracing::debug!(path = %path.display(), log_length, "created log file");
        Ok(log)
    }

    /// Maps an existing log file after checking its length and stored metadata.
    pub fn open_mapped(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|err| {
                let kind = if err.kind() == std::io::ErrorKind::NotFound {
                    ErrorKind::NotFound
                } else {
                    ErrorKind::Io
                };
                Error::new(kind).with_path(&path).with_source(err)
            })?;
        let file_length = file
            .metadata()
            .map(|meta| meta.len())
            .map_err(|err| Error::new(ErrorKind::Io).with_path(&path).with_source(err))?;

        let term_length = descriptor::compute_term_length(file_length as usize)
            .filter(|term_length| descriptor::check_term_length(*term_length).is_ok())
            .ok_or_else(|| {
                Error::new(ErrorKind::Corrupt)
                    .with_message(format!("file length {file_length} is not a valid log length"))
                    .with_path(&path)
            })?;

        let buffer = map(&file, &path)?;
        let log = Self::from_buffer(buffer, term_length, Some(path.clone()))?;
        log.check_stored_meta()
            .map_err(|err| err.with_path(&path))?;
        tracing::debug!(path = %path.display(), term_length, "opened log file");
        Ok(log)
    }

    fn from_buffer(
        buffer: AtomicBuffer,
        term_length: usize,
        path: Option<PathBuf>,
    ) -> Result<Self, Error> {
        let meta_section = term_length * PARTITION_COUNT;
        let mut partitions = Vec::with_capacity(PARTITION_COUNT);
        for index in 0..PARTITION_COUNT {
            let term = buffer.view(index * term_length, term_length)?;
            let meta = buffer.view(
                meta_section + index * TERM_META_DATA_LENGTH,
                TERM_META_DATA_LENGTH,
            )?;
            partitions.push(LogBufferPartition::new(term, meta));
        }
        let log_meta_data_buffer = buffer.view(
            meta_section + PARTITION_COUNT * TERM_META_DATA_LENGTH,
            LOG_META_DATA_LENGTH,
        )?;
        let partitions: [LogBufferPartition; PARTITION_COUNT] = partitions
            .try_into()
            .map_err(|_| Error::new(ErrorKind::Internal).with_message("partition count mismatch"))?;

        Ok(Self {
            path,
            buffer,
            term_length,
            partitions,
            log_meta_data_buffer,
        })
    }

    fn initialise(&self, options: &LogOptions) -> Result<(), Error> {
        let meta = &self.log_meta_data_buffer;
        descriptor::set_initial_term_id(meta, options.initial_term_id);
        descriptor::set_mtu_length(meta, options.mtu_length as i32);
        descriptor::set_correlation_id(meta, options.correlation_id);
        descriptor::store_default_frame_header(meta, &options.default_header().encode())?;

        for (index, partition) in self.partitions.iter().enumerate() {
            let term_id = if index == 0 {
                options.initial_term_id
            } else {
                options
                    .initial_term_id
                    .wrapping_add(index as i32)
                    .wrapping_sub(PARTITION_COUNT as i32)
            };
            partition.set_term_id(term_id);
            partition.set_status_ordered(TermStatus::Clean);
        }
        descriptor::set_active_partition_index(meta, 0);
        Ok(())
    }

    fn check_stored_meta(&self) -> Result<(), Error> {
        let meta = &self.log_meta_data_buffer;
        descriptor::default_frame_header(meta)?;
        let mtu_length = descriptor::mtu_length(meta);
        if mtu_length < DATA_HEADER_LENGTH as i32 {
            return Err(Error::new(ErrorKind::Corrupt)
                .with_message(format!("stored mtu length {mtu_length} is invalid")));
        }
        let active = descriptor::active_partition_index(meta);
        if active >= PARTITION_COUNT {
            return Err(Error::new(ErrorKind::Corrupt)
                .with_message(format!("stored active partition index {active} is out of range")));
        }
        for partition in &self.partitions {
            partition.status()?;
        }
        Ok(())
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn is_mapped(&self) -> bool {
        self.buffer.is_mapped()
    }

    pub fn log_length(&self) -> usize {
        self.buffer.capacity()
    }

    pub fn term_length(&self) -> usize {
        self.term_length
    }

    pub fn position_bits_to_shift(&self) -> u32 {
        descriptor::position_bits_to_shift(self.term_length)
    }

    pub fn initial_term_id(&self) -> i32 {
        descriptor::initial_term_id(&self.log_meta_data_buffer)
    }

    pub fn mtu_length(&self) -> usize {
        descriptor::mtu_length(&self.log_meta_data_buffer).max(0) as usize
    }

    pub fn partitions(&self) -> &[LogBufferPartition; PARTITION_COUNT] {
        &self.partitions
    }

    pub fn log_meta_data_buffer(&self) -> &AtomicBuffer {
        &self.log_meta_data_buffer
    }

    pub fn active_partition_index(&self) -> usize {
        descriptor::active_partition_index(&self.log_meta_data_buffer)
    }

    pub fn active_partition(&self) -> &LogBufferPartition {
        &self.partitions[self.active_partition_index() % PARTITION_COUNT]
    }

    pub fn appender(&self, index: usize) -> Result<TermAppender, Error> {
        let partition = self.partitions.get(index).ok_or_else(|| {
            Error::new(ErrorKind::Usage).with_message(format!("no partition {index}"))
        })?;
        TermAppender::for_partition(partition)
    }

    pub fn appenders(&self) -> Result<[TermAppender; PARTITION_COUNT], Error> {
        Ok([self.appender(0)?, self.appender(1)?, self.appender(2)?])
    }

    /// Writer for the default header stored in the log metadata.
    pub fn header_writer(&self) -> Result<HeaderWriter, Error> {
        HeaderWriter::from_log_meta(&self.log_meta_data_buffer)
    }

    /// Rotates from `active_index` to the next partition for the following term id.
    /// `rotate_log` cleans that partition first if it still holds an old term.
    ///
    /// Only the claimant that tripped `active_index` should call this.
    pub fn rotate(&self, active_index: usize) {
        let term_id = self.partitions[active_index].term_id();
        descriptor::rotate_log(
            &self.partitions,
            &self.log_meta_data_buffer,
            active_index,
            term_id.wrapping_add(1),
        );
    }

    /// Cleans every partition marked `NeedsCleaning`; returns how many were cleaned.
    pub fn clean_dirty_partitions(&self) -> Result<usize, Error> {
        let mut cleaned = 0;
        for (index, partition) in self.partitions.iter().enumerate() {
            if partition.status()? == TermStatus::NeedsCleaning {
                partition.clean();
                cleaned += 1;
                tracing::debug!(partition = index, "cleaned partition");
            }
        }
        Ok(cleaned)
    }

    pub fn flush(&self) -> Result<(), Error> {
        self.buffer.flush().map_err(|err| match &self.path {
            Some(path) => err.with_path(path),
            None => err,
        })
    }
}

fn map(file: &File, path: &Path) -> Result<AtomicBuffer, Error> {
    AtomicBuffer::map_file(file).map_err(|err| err.with_path(path))
}
