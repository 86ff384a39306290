// Core modules implementing the term log: layout, append protocol, scanning, and repair.
pub mod appender;
pub mod block_scanner;
pub mod buffer;
pub mod claim;
pub mod descriptor;
pub mod error;
pub mod frame;
pub mod gap_scanner;
pub mod header;
pub mod log_buffers;
pub mod partition;
pub mod reader;
pub mod rebuilder;
pub mod term_scanner;
pub mod unblocker;
pub mod validate;
