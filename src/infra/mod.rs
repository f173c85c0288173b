//! Infrastructure layer
//!
//! Handles all I/O primitives: network transfers, digests, and filesystem.

pub mod checksum;
pub mod dirs;
pub mod download;
pub mod filesystem;
