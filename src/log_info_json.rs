//! Purpose: JSON serializers for log metadata, partitions, frames and validation.
//! Exports: `log_info_json`, `frames_json`, `header_json`.
//! Role: Keep the envelope shape shared by `create`, `inspect` and `append` consistent.
//! Invariants: Stable key names; validation failures are reported in-band, not as errors.

use serde_json::{Map, Value, json};
use termlog::api::{
    DataHeader, Error, FrameInfo, Header, LogBuffers, TermStatus, descriptor, frame,
    validate_term,
};

pub(crate) fn log_info_json(log: &LogBuffers) -> Result<Value, Error> {
    let meta = log.log_meta_data_buffer();
    let default_header = DataHeader::decode(&descriptor::default_frame_header(meta)?)?;
    let active_index = log.active_partition_index();

    let mut partitions = Vec::new();
    for (index, partition) in log.partitions().iter().enumerate() {
        let term_id = partition.term_id();
        let tail_offset = partition.tail_offset();
        let status = match partition.status()? {
            TermStatus::Clean => "clean",
            TermStatus::NeedsCleaning => "needs_cleaning",
        };
        let begin = descriptor::compute_term_begin_position(
            term_id,
            log.position_bits_to_shift(),
            log.initial_term_id(),
        );
        let validation = match validate_term(partition.term_buffer(), term_id, tail_offset) {
            Ok(summary) => json!({
                "ok": true,
                "data_frames": summary.data_frames,
                "padding_frames": summary.padding_frames,
                "data_bytes": summary.data_bytes,
            }),
            Err(err) => json!({
                "ok": false,
                "message": err.message().unwrap_or("invalid term"),
                "offset": err.offset(),
            }),
        };
        partitions.push(json!({
            "index": index,
            "active": index == active_index,
            "term_id": term_id,
            "tail_offset": tail_offset,
            "status": status,
            "begin_position": begin,
            "tail_position": begin + tail_offset as i64,
            "validation": validation,
        }));
    }

    let mut map = Map::new();
    if let Some(path) = log.path() {
        map.insert("path".to_string(), json!(path.display().to_string()));
    }
    map.insert("log_length".to_string(), json!(log.log_length()));
    map.insert("term_length".to_string(), json!(log.term_length()));
    map.insert("mtu_length".to_string(), json!(log.mtu_length()));
    map.insert("initial_term_id".to_string(), json!(log.initial_term_id()));
    map.insert(
        "correlation_id".to_string(),
        json!(descriptor::correlation_id(meta)),
    );
    map.insert(
        "time_of_last_status_message".to_string(),
        json!(descriptor::time_of_last_status_message(meta)),
    );
    map.insert("active_partition".to_string(), json!(active_index));
    map.insert("default_header".to_string(), data_header_json(&default_header));
    map.insert("partitions".to_string(), Value::Array(partitions));
    Ok(Value::Object(map))
}

pub(crate) fn frames_json(frames: &[FrameInfo]) -> Value {
    let frames = frames
        .iter()
        .map(|info| {
            let kind = if info.frame_length < 0 {
                "claimed"
            } else if info.frame_type == frame::PADDING_FRAME_TYPE {
                "padding"
            } else {
                "data"
            };
            json!({
                "offset": info.offset,
                "frame_length": info.frame_length,
                "kind": kind,
                "flags": info.flags,
                "term_id": info.term_id,
            })
        })
        .collect::<Vec<_>>();
    Value::Array(frames)
}

pub(crate) fn header_json(header: &Header<'_>, payload: &[u8]) -> Value {
    json!({
        "position": header.position(),
        "term_id": header.term_id(),
        "term_offset": header.term_offset(),
        "session_id": header.session_id(),
        "stream_id": header.stream_id(),
        "flags": header.flags(),
        "reserved_value": header.reserved_value(),
        "length": payload.len(),
        "data": String::from_utf8_lossy(payload),
    })
}

fn data_header_json(header: &DataHeader) -> Value {
    json!({
        "version": header.version,
        "flags": header.flags,
        "frame_type": header.frame_type,
        "session_id": header.session_id,
        "stream_id": header.stream_id,
    })
}
