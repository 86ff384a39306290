//! Purpose: `termlog` CLI entry point.
//! Role: Binary crate root; parses args, runs commands, emits JSON on stdout.
//! Invariants: Non-interactive errors are emitted as JSON on stderr; a TTY gets plain text.
//! Invariants: Process exit code is derived from `api::to_exit_code`.
//! Invariants: All log mutations go through `api::LogBuffers` and the claim protocol.
#![allow(clippy::result_large_err)]
use std::io::{self, IsTerminal};
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use clap::{Parser, Subcommand, ValueHint, error::ErrorKind as ClapErrorKind};
use serde_json::{Map, Value, json};
use tracing_subscriber::EnvFilter;

mod bench;
mod command_dispatch;
mod log_info_json;

use termlog::api::{Error, ErrorKind, to_exit_code};

#[derive(Copy, Clone, Debug)]
struct RunOutcome {
    exit_code: i32,
}

impl RunOutcome {
    fn ok() -> Self {
        Self { exit_code: 0 }
    }

    fn with_code(exit_code: i32) -> Self {
        Self { exit_code }
    }
}

fn main() {
    init_tracing();
    let exit_code = match run() {
        Ok(outcome) => outcome.exit_code,
        Err(err) => {
            emit_error(&err);
            to_exit_code(err.kind())
        }
    };
    std::process::exit(exit_code);
}

fn run() -> Result<RunOutcome, Error> {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => match err.kind() {
            ClapErrorKind::DisplayHelp
            | ClapErrorKind::DisplayVersion
            | ClapErrorKind::DisplayHelpOnMissingArgumentOrSubcommand => {
                err.print().map_err(|io_err| {
                    Error::new(ErrorKind::Io)
                        .with_message("failed to write help")
                        .with_source(io_err)
                })?;
                let exit_code = if matches!(
                    err.kind(),
                    ClapErrorKind::DisplayHelpOnMissingArgumentOrSubcommand
                ) {
                    2
                } else {
                    0
                };
                return Ok(RunOutcome::with_code(exit_code));
            }
            _ => {
                return Err(Error::new(ErrorKind::Usage)
                    .with_message(clap_error_summary(&err))
                    .with_hint("Try `termlog --help`."));
            }
        },
    };

    command_dispatch::dispatch_command(cli.command)
        .map_err(add_corrupt_hint)
        .map_err(add_io_hint)
        .map_err(add_internal_hint)
}

#[derive(Parser)]
#[command(
    name = "termlog",
    version,
    about = "Lock-free term log buffers in memory-mapped files",
    long_about = None,
    after_help = r#"EXAMPLES
  $ termlog create stream.log --term-length 65536 --session-id 7 --stream-id 1001
  $ termlog append stream.log --data 'hello'
  $ termlog inspect stream.log --frames
  $ termlog read stream.log --limit 10
  $ termlog unblock stream.log --position 4096
  $ termlog bench --writers 4 --messages 100000

NOTES
  - Output is JSON on stdout; errors are JSON on stderr (text on a terminal)
  - Set RUST_LOG=debug to see rotation, cleaning and repair events"#,
    arg_required_else_help = true
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    #[command(about = "Create a log file sized for three terms plus metadata")]
    Create {
        #[arg(help = "Log file path", value_hint = ValueHint::FilePath)]
        path: PathBuf,
        #[arg(long, help = "Term length in bytes (power of 2, 64KiB..1GiB)")]
        term_length: Option<usize>,
        #[arg(long = "mtu", help = "Maximum frame length in bytes (multiple of 32)")]
        mtu_length: Option<usize>,
        #[arg(long, help = "Term id of the first term", allow_hyphen_values = true)]
        initial_term_id: Option<i32>,
        #[arg(long, help = "Session id stamped in every frame header", allow_hyphen_values = true)]
        session_id: Option<i32>,
        #[arg(long, help = "Stream id stamped in every frame header", allow_hyphen_values = true)]
        stream_id: Option<i32>,
        #[arg(long, help = "Correlation id stored in the log metadata", allow_hyphen_values = true)]
        correlation_id: Option<i64>,
        #[arg(
            long,
            help = "JSON file with log options; flags override its values",
            value_hint = ValueHint::FilePath
        )]
        config: Option<PathBuf>,
    },
    #[command(about = "Show log metadata, partitions, and term validation")]
    Inspect {
        #[arg(help = "Log file path", value_hint = ValueHint::FilePath)]
        path: PathBuf,
        #[arg(long, help = "List frames of the active term")]
        frames: bool,
    },
    #[command(about = "Append one message to the active term, rotating when it fills")]
    Append {
        #[arg(help = "Log file path", value_hint = ValueHint::FilePath)]
        path: PathBuf,
        #[arg(long, help = "Message payload (UTF-8 text)")]
        data: String,
        #[arg(long, help = "Value for the header's reserved field", allow_hyphen_values = true)]
        reserved_value: Option<i64>,
    },
    #[command(about = "Read committed messages from a stream position")]
    Read {
        #[arg(help = "Log file path", value_hint = ValueHint::FilePath)]
        path: PathBuf,
        #[arg(long, help = "Start position (default: start of the active term)")]
        from: Option<i64>,
        #[arg(long, default_value_t = 100, help = "Maximum messages to return")]
        limit: usize,
    },
    #[command(about = "Repair a term blocked by a writer that never committed")]
    Unblock {
        #[arg(help = "Log file path", value_hint = ValueHint::FilePath)]
        path: PathBuf,
        #[arg(long, help = "Stream position where consumers are stuck")]
        position: i64,
    },
    #[command(about = "Zero partitions marked as needing cleaning")]
    Clean {
        #[arg(help = "Log file path", value_hint = ValueHint::FilePath)]
        path: PathBuf,
    },
    #[command(about = "Measure multi-writer claim/commit throughput in memory")]
    Bench {
        #[arg(long, default_value_t = 4, help = "Concurrent writer threads")]
        writers: usize,
        #[arg(long, default_value_t = 100_000, help = "Messages per writer")]
        messages: u64,
        #[arg(long, default_value_t = 64, help = "Payload bytes per message")]
        payload_bytes: usize,
        #[arg(long, default_value_t = 1024 * 1024, help = "Term length in bytes")]
        term_length: usize,
    },
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(io::stderr)
        .with_target(false)
        .try_init();
}

fn add_io_hint(err: Error) -> Error {
    if err.hint().is_some() {
        return err;
    }
    match err.kind() {
        ErrorKind::NotFound => err.with_hint("Check the path, or create the log with `termlog create`."),
        ErrorKind::Io => err.with_hint("I/O error. Check the path, filesystem, and disk space."),
        _ => err,
    }
}

fn add_corrupt_hint(err: Error) -> Error {
    if err.kind() != ErrorKind::Corrupt || err.hint().is_some() {
        return err;
    }
    err.with_hint("Log appears corrupt. Recreate it or run `termlog inspect` for details.")
}

fn add_internal_hint(err: Error) -> Error {
    if err.kind() != ErrorKind::Internal || err.hint().is_some() {
        return err;
    }
    err.with_hint(
        "Unexpected internal failure. Retry with RUST_LOG=debug and share command/context if it persists.",
    )
}

fn emit_json(value: Value) {
    let json = if io::stdout().is_terminal() {
        serde_json::to_string_pretty(&value)
    } else {
        serde_json::to_string(&value)
    }
    .unwrap_or_else(|_| "{\"error\":\"json encode failed\"}".to_string());
    println!("{json}");
}

fn emit_error(err: &Error) {
    if io::stderr().is_terminal() {
        eprintln!("{}", error_text(err));
        return;
    }

    let value = error_json(err);
    let json = serde_json::to_string(&value).unwrap_or_else(|_| {
        "{\"error\":{\"kind\":\"Internal\",\"message\":\"json encode failed\"}}".to_string()
    });
    eprintln!("{json}");
}

fn error_message(err: &Error) -> String {
    if let Some(message) = err.message() {
        return message.to_string();
    }
    match err.kind() {
        ErrorKind::Internal => "internal error".to_string(),
        ErrorKind::Usage => "usage error".to_string(),
        ErrorKind::NotFound => "not found".to_string(),
        ErrorKind::Corrupt => "corrupt data".to_string(),
        ErrorKind::Io => "i/o error".to_string(),
    }
}

fn error_causes(err: &Error) -> Vec<String> {
    use std::error::Error as _;
    let mut causes = Vec::new();
    let mut cur = err.source();
    while let Some(source) = cur {
        causes.push(source.to_string());
        cur = source.source();
    }
    causes
}

fn error_json(err: &Error) -> Value {
    let mut inner = Map::new();
    inner.insert("kind".to_string(), json!(format!("{:?}", err.kind())));
    inner.insert("message".to_string(), json!(error_message(err)));
    if let Some(hint) = err.hint() {
        inner.insert("hint".to_string(), json!(hint));
    }
    if let Some(path) = err.path() {
        inner.insert("path".to_string(), json!(path.display().to_string()));
    }
    if let Some(offset) = err.offset() {
        inner.insert("offset".to_string(), json!(offset));
    }
    let causes = error_causes(err);
    if !causes.is_empty() {
        inner.insert("causes".to_string(), json!(causes));
    }

    let mut outer = Map::new();
    outer.insert("error".to_string(), Value::Object(inner));
    Value::Object(outer)
}

fn error_text(err: &Error) -> String {
    let mut lines = vec![format!("error: {}", error_message(err))];
    if let Some(hint) = err.hint() {
        lines.push(format!("hint: {hint}"));
    }
    if let Some(path) = err.path() {
        lines.push(format!("path: {}", path.display()));
    }
    if let Some(offset) = err.offset() {
        lines.push(format!("offset: {offset}"));
    }
    for cause in error_causes(err) {
        lines.push(format!("caused by: {cause}"));
    }
    lines.join("\n")
}

fn clap_error_summary(err: &clap::Error) -> String {
    for line in err.to_string().lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if let Some(rest) = trimmed.strip_prefix("error:") {
            return rest.trim().to_string();
        }
        return trimmed.to_string();
    }
    "invalid arguments".to_string()
}

fn rfc3339_now() -> String {
    rfc3339(SystemTime::now())
}

fn rfc3339(ts: SystemTime) -> String {
    use time::format_description::well_known::Rfc3339;
    let nanos = ts
        .duration_since(UNIX_EPOCH)
        .map(|dur| dur.as_nanos() as i128)
        .unwrap_or_default();
    time::OffsetDateTime::from_unix_timestamp_nanos(nanos)
        .ok()
        .and_then(|tm| tm.format(&Rfc3339).ok())
        .unwrap_or_else(|| "1970-01-01T00:00:00Z".to_string())
}
