//! Purpose: Hold top-level CLI command dispatch for `termlog`.
//! Exports: `dispatch_command`.
//! Role: Keep `main.rs` focused on parse/bootstrap and delegate command execution.
//! Invariants: Every command emits exactly one JSON document on success.
//! Invariants: Appends rotate only from the partition that tripped or was left exhausted.

use super::*;
use termlog::api::{
    ClaimOutcome, LogBuffers, LogOptions, TermReader, describe_frames, descriptor, frame,
    unblock_log,
};

use crate::log_info_json::{frames_json, header_json, log_info_json};

pub(super) fn dispatch_command(command: Command) -> Result<RunOutcome, Error> {
    match command {
        Command::Create {
            path,
            term_length,
            mtu_length,
            initial_term_id,
            session_id,
            stream_id,
            correlation_id,
            config,
        } => {
            let mut options = match config {
                Some(config) => LogOptions::from_json_path(config)?,
                None => LogOptions::default(),
            };
            if let Some(term_length) = term_length {
                options.term_length = term_length;
            }
            if let Some(mtu_length) = mtu_length {
                options.mtu_length = mtu_length;
            }
            if let Some(initial_term_id) = initial_term_id {
                options.initial_term_id = initial_term_id;
            }
            if let Some(session_id) = session_id {
                options.session_id = session_id;
            }
            if let Some(stream_id) = stream_id {
                options.stream_id = stream_id;
            }
            if let Some(correlation_id) = correlation_id {
                options.correlation_id = correlation_id;
            }

            let log = LogBuffers::create_mapped(&path, &options)?;
            let mut value = log_info_json(&log)?;
            if let Value::Object(map) = &mut value {
                map.insert("created_at".to_string(), json!(rfc3339_now()));
            }
            emit_json(value);
            Ok(RunOutcome::ok())
        }
        Command::Inspect { path, frames } => {
            let log = LogBuffers::open_mapped(&path)?;
            let mut value = log_info_json(&log)?;
            if let Value::Object(map) = &mut value {
                if frames {
                    let active = log.active_partition();
                    let listed = describe_frames(active.term_buffer(), active.tail_offset());
                    map.insert("frames".to_string(), frames_json(&listed));
                }
                map.insert("inspected_at".to_string(), json!(rfc3339_now()));
            }
            emit_json(value);
            Ok(RunOutcome::ok())
        }
        Command::Append {
            path,
            data,
            reserved_value,
        } => {
            let log = LogBuffers::open_mapped(&path)?;
            let value = append_message(&log, data.as_bytes(), reserved_value)?;
            log.flush()?;
            emit_json(value);
            Ok(RunOutcome::ok())
        }
        Command::Read { path, from, limit } => {
            let log = LogBuffers::open_mapped(&path)?;
            emit_json(read_messages(&log, from, limit)?);
            Ok(RunOutcome::ok())
        }
        Command::Unblock { path, position } => {
            let log = LogBuffers::open_mapped(&path)?;
            if position < 0 {
                return Err(Error::new(ErrorKind::Usage)
                    .with_message(format!("position {position} is negative")));
            }
            if position % frame::FRAME_ALIGNMENT as i64 != 0 {
                return Err(Error::new(ErrorKind::Usage)
                    .with_message(format!(
                        "position {position} is not a multiple of {}",
                        frame::FRAME_ALIGNMENT
                    ))
                    .with_hint("Pass a position where a frame starts, as reported by `termlog read`."));
            }
            let unblocked = unblock_log(log.partitions(), log.log_meta_data_buffer(), position);
            log.flush()?;
            emit_json(json!({
                "position": position,
                "unblocked": unblocked,
                "active_partition": log.active_partition_index(),
                "active_term_id": log.active_partition().term_id(),
            }));
            Ok(RunOutcome::ok())
        }
        Command::Clean { path } => {
            let log = LogBuffers::open_mapped(&path)?;
            let cleaned = log.clean_dirty_partitions()?;
            log.flush()?;
            emit_json(json!({ "cleaned": cleaned }));
            Ok(RunOutcome::ok())
        }
        Command::Bench {
            writers,
            messages,
            payload_bytes,
            term_length,
        } => {
            let args = bench::BenchArgs {
                writers,
                messages,
                payload_bytes,
                term_length,
            };
            emit_json(bench::run_bench(&args, env!("CARGO_PKG_VERSION"))?);
            Ok(RunOutcome::ok())
        }
    }
}

fn append_message(
    log: &LogBuffers,
    payload: &[u8],
    reserved_value: Option<i64>,
) -> Result<Value, Error> {
    let writer = log.header_writer()?;
    let frame_length = payload.len() + writer.header_length();
    if frame_length > log.mtu_length() {
        return Err(Error::new(ErrorKind::Usage)
            .with_message(format!(
                "frame of {frame_length} bytes exceeds mtu of {} bytes",
                log.mtu_length()
            ))
            .with_hint("Send a shorter message or recreate the log with a larger --mtu."));
    }
    for _ in 0..descriptor::PARTITION_COUNT {
        let index = log.active_partition_index();
        let appender = log.appender(index)?;
        match appender.claim(&writer, payload.len())? {
            ClaimOutcome::Claimed(mut claim) => {
                claim.put_bytes(0, payload);
                if let Some(value) = reserved_value {
                    claim.set_reserved_value(value);
                }
                let term_offset = claim.frame_offset();
                let term_id = frame::frame_term_id(claim.buffer(), term_offset);
                let next_offset = term_offset + claim.frame_length();
                claim.commit();

                let bits = log.position_bits_to_shift();
                let initial_term_id = log.initial_term_id();
                return Ok(json!({
                    "partition": index,
                    "term_id": term_id,
                    "term_offset": term_offset,
                    "position": descriptor::compute_position(term_id, term_offset, bits, initial_term_id),
                    "next_position": descriptor::compute_position(
                        term_id,
                        frame::align(next_offset, frame::FRAME_ALIGNMENT),
                        bits,
                        initial_term_id,
                    ),
                    "length": payload.len(),
                }));
            }
            ClaimOutcome::Tripped => log.rotate(index),
            ClaimOutcome::Failed => {
                // The tripping writer is gone; rotate on its behalf.
                if log.active_partition_index() == index {
                    log.rotate(index);
                }
            }
        }
    }
    Err(Error::new(ErrorKind::Internal)
        .with_message("append did not find room after rotating through every partition"))
}

fn read_messages(log: &LogBuffers, from: Option<i64>, limit: usize) -> Result<Value, Error> {
    let bits = log.position_bits_to_shift();
    let initial_term_id = log.initial_term_id();
    let position = match from {
        Some(position) if position < 0 => {
            return Err(Error::new(ErrorKind::Usage)
                .with_message(format!("position {position} is negative")));
        }
        Some(position) => position,
        None => descriptor::compute_term_begin_position(
            log.active_partition().term_id(),
            bits,
            initial_term_id,
        ),
    };

    let index = descriptor::index_by_position(position, bits);
    let partition = &log.partitions()[index];
    let term_id = descriptor::compute_term_id_from_position(position, bits, initial_term_id);
    if partition.term_id() != term_id {
        return Err(Error::new(ErrorKind::NotFound)
            .with_message(format!("position {position} is not in a retained term"))
            .with_hint("Only the three most recent terms are kept; use `termlog inspect` to see them."));
    }
    let offset = descriptor::compute_term_offset_from_position(position, bits);

    let reader = TermReader::new(initial_term_id, bits);
    let mut messages = Vec::new();
    let outcome = reader.read(partition.term_buffer(), offset, limit, |buffer, at, length, header| {
        messages.push(header_json(header, &buffer.to_vec(at, length)));
    });

    Ok(json!({
        "from": position,
        "messages": messages,
        "next_position": position + (outcome.offset - offset) as i64,
    }))
}
