// Benchmark harness for termlog.
//
// Purpose:
// - Provide a repeatable baseline for multi-writer claim/commit throughput with term rotation.
// - Emit machine-readable JSON to stdout.
//
// Design notes:
// - Writers are threads over one heap-allocated log; the writer that trips a term rotates it.
// - Keep numbers "good enough" for trend tracking, not lab-grade profiling.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Instant, SystemTime};

use serde_json::{Value, json};

use termlog::api::{
    AppendOutcome, Error, ErrorKind, LogBuffers, LogOptions, debug_assert_term, descriptor,
    validate_term,
};

#[derive(Clone, Debug)]
pub struct BenchArgs {
    pub writers: usize,
    pub messages: u64,
    pub payload_bytes: usize,
    pub term_length: usize,
}

#[derive(Debug, Default)]
struct Counters {
    rotations: AtomicU64,
    failed_spins: AtomicU64,
}

pub fn run_bench(args: &BenchArgs, program_version: &str) -> Result<Value, Error> {
    if args.writers == 0 {
        return Err(Error::new(ErrorKind::Usage).with_message("--writers must be at least 1"));
    }
    let options = LogOptions {
        term_length: args.term_length,
        mtu_length: mtu_for(args.term_length),
        ..LogOptions::default()
    };
    let log = LogBuffers::allocate(&options)?;
    let appenders = log.appenders()?;
    let writer = log.header_writer()?;
    if args.payload_bytes > appenders[0].max_message_length() {
        return Err(Error::new(ErrorKind::Usage).with_message(format!(
            "--payload-bytes {} exceeds max message length {}",
            args.payload_bytes,
            appenders[0].max_message_length()
        )));
    }

    let counters = Counters::default();
    let payload = vec![0x5au8; args.payload_bytes];
    let start_ts = SystemTime::now();
    let start = Instant::now();

    std::thread::scope(|scope| -> Result<(), Error> {
        let handles: Vec<_> = (0..args.writers)
            .map(|_| {
                scope.spawn(|| -> Result<(), Error> {
                    let mut sent = 0u64;
                    while sent < args.messages {
                        let index = log.active_partition_index();
                        match appenders[index].append(&writer, &payload)? {
                            AppendOutcome::Appended { .. } => sent += 1,
                            AppendOutcome::Tripped => {
                                log.rotate(index);
                                counters.rotations.fetch_add(1, Ordering::Relaxed);
                            }
                            AppendOutcome::Failed => {
                                counters.failed_spins.fetch_add(1, Ordering::Relaxed);
                                std::thread::yield_now();
                            }
                        }
                    }
                    Ok(())
                })
            })
            .collect();
        for handle in handles {
            handle.join().map_err(|_| {
                Error::new(ErrorKind::Internal).with_message("bench writer thread panicked")
            })??;
        }
        Ok(())
    })?;

    let duration = start.elapsed();
    let active = log.active_partition();
    if counters.rotations.load(Ordering::Relaxed) > 0 {
        let retired = &log.partitions()[descriptor::previous_partition_index(log.active_partition_index())];
        debug_assert_term(retired.term_buffer(), retired.term_id(), retired.tail_offset());
    }
    let validation = validate_term(active.term_buffer(), active.term_id(), active.tail_offset());

    let total = args.messages * args.writers as u64;
    let secs = duration.as_secs_f64().max(1e-9);
    let mb = (args.payload_bytes as f64 * total as f64) / (1024.0 * 1024.0);

    Ok(json!({
        "name": "termlog",
        "version": program_version,
        "ts": crate::rfc3339(start_ts),
        "system": system_json(),
        "params": {
            "writers": args.writers,
            "messages": args.messages,
            "payload_bytes": args.payload_bytes,
            "term_length": args.term_length,
            "debug_build": cfg!(debug_assertions),
        },
        "results": {
            "messages_total": total,
            "duration_ms": duration.as_secs_f64() * 1000.0,
            "msgs_per_sec": total as f64 / secs,
            "mb_per_sec": mb / secs,
            "rotations": counters.rotations.load(Ordering::Relaxed),
            "failed_spins": counters.failed_spins.load(Ordering::Relaxed),
            "active_term_id": active.term_id(),
            "active_term_valid": validation.is_ok(),
        },
    }))
}

fn mtu_for(term_length: usize) -> usize {
    let max_message_length = termlog::api::frame::compute_max_message_length(term_length);
    LogOptions::default().mtu_length.min(max_message_length)
}

fn system_json() -> Value {
    let cpus = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    json!({
        "os": std::env::consts::OS,
        "arch": std::env::consts::ARCH,
        "cpus": cpus,
    })
}
