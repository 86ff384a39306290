// CLI integration tests for create/append/read/inspect/unblock/clean/bench flows.
use std::path::Path;
use std::process::{Command, Output};

use serde_json::Value;

fn cmd() -> Command {
    let exe = env!("CARGO_BIN_EXE_termlog");
    Command::new(exe)
}

fn parse_json(output: &[u8]) -> Value {
    let text = std::str::from_utf8(output).expect("utf8");
    serde_json::from_str(text.trim()).expect("valid json")
}

fn run(args: &[&str]) -> Output {
    cmd().args(args).output().expect("spawn termlog")
}

fn create_log(path: &Path) -> Value {
    let create = run(&[
        "create",
        path.to_str().unwrap(),
        "--session-id",
        "7",
        "--stream-id",
        "1001",
        "--initial-term-id",
        "5",
    ]);
    assert!(create.status.success(), "create failed: {create:?}");
    parse_json(&create.stdout)
}

#[test]
fn create_append_read_inspect_flow() {
    let temp = tempfile::tempdir().expect("tempdir");
    let path = temp.path().join("stream.log");

    let created = create_log(&path);
    assert_eq!(created["term_length"], 64 * 1024);
    assert_eq!(created["initial_term_id"], 5);
    assert_eq!(created["active_partition"], 0);
    assert_eq!(created["default_header"]["session_id"], 7);
    assert_eq!(created["default_header"]["stream_id"], 1001);
    assert!(created["created_at"].is_string());
    let partitions = created["partitions"].as_array().expect("partitions");
    assert_eq!(partitions.len(), 3);
    assert_eq!(partitions[0]["term_id"], 5);
    assert_eq!(partitions[0]["status"], "clean");

    let first = run(&["append", path.to_str().unwrap(), "--data", "hello"]);
    assert!(first.status.success());
    let first = parse_json(&first.stdout);
    assert_eq!(first["term_id"], 5);
    assert_eq!(first["term_offset"], 0);
    assert_eq!(first["position"], 0);
    assert_eq!(first["next_position"], 64);

    let second = run(&[
        "append",
        path.to_str().unwrap(),
        "--data",
        "world",
        "--reserved-value",
        "-9",
    ]);
    assert!(second.status.success());
    let second = parse_json(&second.stdout);
    assert_eq!(second["position"], 64);

    let read = run(&["read", path.to_str().unwrap()]);
    assert!(read.status.success());
    let read = parse_json(&read.stdout);
    let messages = read["messages"].as_array().expect("messages");
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0]["data"], "hello");
    assert_eq!(messages[0]["session_id"], 7);
    assert_eq!(messages[1]["data"], "world");
    assert_eq!(messages[1]["reserved_value"], -9);
    assert_eq!(read["next_position"], 128);

    let from = run(&["read", path.to_str().unwrap(), "--from", "64", "--limit", "1"]);
    assert!(from.status.success());
    let from = parse_json(&from.stdout);
    assert_eq!(from["messages"][0]["data"], "world");
    assert_eq!(from["messages"][0]["position"], 128);

    let inspect = run(&["inspect", path.to_str().unwrap(), "--frames"]);
    assert!(inspect.status.success());
    let inspect = parse_json(&inspect.stdout);
    assert_eq!(inspect["partitions"][0]["tail_offset"], 128);
    assert_eq!(inspect["partitions"][0]["validation"]["ok"], true);
    assert_eq!(inspect["partitions"][0]["validation"]["data_frames"], 2);
    let frames = inspect["frames"].as_array().expect("frames");
    assert_eq!(frames.len(), 2);
    assert_eq!(frames[0]["kind"], "data");
    assert_eq!(frames[1]["offset"], 64);
}

#[test]
fn invalid_term_length_is_usage_error() {
    let temp = tempfile::tempdir().expect("tempdir");
    let path = temp.path().join("bad.log");

    let create = run(&["create", path.to_str().unwrap(), "--term-length", "1000"]);
    assert_eq!(create.status.code().unwrap(), 2);
    let err = parse_json(&create.stderr);
    assert_eq!(err["error"]["kind"], "Usage");
    assert!(err["error"]["message"].as_str().unwrap().contains("1000"));
    assert!(!path.exists());
}

#[test]
fn oversized_message_is_usage_error() {
    let temp = tempfile::tempdir().expect("tempdir");
    let path = temp.path().join("stream.log");
    let create = run(&["create", path.to_str().unwrap(), "--mtu", "64"]);
    assert!(create.status.success());

    let payload = "x".repeat(40);
    let append = run(&["append", path.to_str().unwrap(), "--data", &payload]);
    assert_eq!(append.status.code().unwrap(), 2);
    let err = parse_json(&append.stderr);
    assert!(err["error"]["message"].as_str().unwrap().contains("mtu"));
}

#[test]
fn missing_log_is_not_found() {
    let temp = tempfile::tempdir().expect("tempdir");
    let path = temp.path().join("missing.log");

    let inspect = run(&["inspect", path.to_str().unwrap()]);
    assert_eq!(inspect.status.code().unwrap(), 3);
    let err = parse_json(&inspect.stderr);
    assert_eq!(err["error"]["kind"], "NotFound");
    assert!(err["error"]["hint"].is_string());
}

#[test]
fn unblock_and_clean_on_healthy_log_are_no_ops() {
    let temp = tempfile::tempdir().expect("tempdir");
    let path = temp.path().join("stream.log");
    create_log(&path);
    let append = run(&["append", path.to_str().unwrap(), "--data", "hello"]);
    assert!(append.status.success());

    let unblock = run(&["unblock", path.to_str().unwrap(), "--position", "64"]);
    assert!(unblock.status.success());
    let unblock = parse_json(&unblock.stdout);
    assert_eq!(unblock["unblocked"], false);
    assert_eq!(unblock["active_partition"], 0);
    assert_eq!(unblock["active_term_id"], 5);

    let clean = run(&["clean", path.to_str().unwrap()]);
    assert!(clean.status.success());
    assert_eq!(parse_json(&clean.stdout)["cleaned"], 0);

    let negative = run(&["unblock", path.to_str().unwrap(), "--position", "-1"]);
    assert_eq!(negative.status.code().unwrap(), 2);

    for unaligned in ["2", "36"] {
        let unblock = run(&["unblock", path.to_str().unwrap(), "--position", unaligned]);
        assert_eq!(unblock.status.code().unwrap(), 2);
        let err = parse_json(&unblock.stderr);
        assert_eq!(err["error"]["kind"], "Usage");
    }
}

#[test]
fn read_from_unretained_term_is_not_found() {
    let temp = tempfile::tempdir().expect("tempdir");
    let path = temp.path().join("stream.log");
    create_log(&path);

    // Three terms ahead of the active one maps back onto partition 0 with a stale term id.
    let position = (3 * 64 * 1024).to_string();
    let read = run(&["read", path.to_str().unwrap(), "--from", &position]);
    assert_eq!(read.status.code().unwrap(), 3);
}

#[test]
fn bench_reports_rotations() {
    let bench = run(&[
        "bench",
        "--writers",
        "2",
        "--messages",
        "2000",
        "--term-length",
        "65536",
    ]);
    assert!(bench.status.success());
    let bench = parse_json(&bench.stdout);
    assert_eq!(bench["name"], "termlog");
    assert_eq!(bench["results"]["messages_total"], 4000);
    // 96-byte frames fill a 64KiB term after 682 messages.
    assert!(bench["results"]["rotations"].as_u64().unwrap() >= 5);
    assert_eq!(bench["results"]["active_term_valid"], true);
}
