//! Purpose: Lock-free, multi-producer term log buffers shared by the `termlog` CLI and tests.
//! Exports: `core` (buffers, framing, append protocol, scanners, repair, errors) and `api`.
//! Role: Library backing the binary; `api` is the curated surface for embedding.
//! Invariants: The frame length word is the only publication point between writers and readers.
//! Invariants: Hot paths return outcome enums; only setup and file handling return `Error`.
pub mod api;
pub mod core;
